use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Refund percentage granted when at least `min_hours` remain before departure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefundTier {
    pub min_hours: i64,
    pub percent: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundQuote {
    pub percent: u8,
    /// Minor units, rounded half-up.
    pub amount: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RefundError {
    #[error("Cancellations close {cutoff_hours}h before departure ({minutes_left} minutes left)")]
    TooCloseToDeparture { cutoff_hours: i64, minutes_left: i64 },
}

/// Cancellation window and refund tiers by time-to-departure.
#[derive(Debug, Clone)]
pub struct RefundPolicy {
    cutoff: Duration,
    /// Sorted by `min_hours`, largest first.
    tiers: Vec<RefundTier>,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self::new(
            24,
            vec![
                RefundTier { min_hours: 72, percent: 90 },
                RefundTier { min_hours: 48, percent: 70 },
                RefundTier { min_hours: 24, percent: 50 },
            ],
        )
    }
}

impl RefundPolicy {
    pub fn new(cutoff_hours: i64, mut tiers: Vec<RefundTier>) -> Self {
        tiers.sort_by(|a, b| b.min_hours.cmp(&a.min_hours));
        Self {
            cutoff: Duration::hours(cutoff_hours),
            tiers,
        }
    }

    pub fn cutoff(&self) -> Duration {
        self.cutoff
    }

    /// Refund due if a booking worth `total_amount` is cancelled at `now`.
    ///
    /// The cancellation window is open only while strictly more than the cutoff
    /// remains; this also refuses anything at or after departure.
    pub fn quote(
        &self,
        total_amount: i64,
        departure: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RefundQuote, RefundError> {
        let remaining = departure - now;
        if remaining <= self.cutoff {
            return Err(RefundError::TooCloseToDeparture {
                cutoff_hours: self.cutoff.num_hours(),
                minutes_left: remaining.num_minutes(),
            });
        }

        let percent = self
            .tiers
            .iter()
            .find(|tier| remaining >= Duration::hours(tier.min_hours))
            .map(|tier| tier.percent)
            .unwrap_or(0);

        Ok(RefundQuote {
            percent,
            amount: percent_of(total_amount, percent),
        })
    }
}

fn percent_of(amount: i64, percent: u8) -> i64 {
    (amount * i64::from(percent) + 50) / 100
}

#[cfg(test)]
mod tests {
    use super::*;

    fn departing_in(d: Duration) -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc::now();
        (now + d, now)
    }

    #[test]
    fn test_cutoff_boundary() {
        let policy = RefundPolicy::default();

        let (departure, now) = departing_in(Duration::hours(24));
        assert!(matches!(
            policy.quote(100_000, departure, now),
            Err(RefundError::TooCloseToDeparture { cutoff_hours: 24, .. })
        ));

        let (departure, now) = departing_in(Duration::hours(24) + Duration::seconds(1));
        let quote = policy.quote(100_000, departure, now).unwrap();
        assert_eq!(quote.percent, 50);
        assert_eq!(quote.amount, 50_000);
    }

    #[test]
    fn test_tier_boundaries() {
        let policy = RefundPolicy::default();

        let (departure, now) = departing_in(Duration::hours(72));
        assert_eq!(policy.quote(100_000, departure, now).unwrap().percent, 90);

        let (departure, now) = departing_in(Duration::hours(71) + Duration::minutes(59));
        assert_eq!(policy.quote(100_000, departure, now).unwrap().percent, 70);

        let (departure, now) = departing_in(Duration::hours(48));
        assert_eq!(policy.quote(100_000, departure, now).unwrap().percent, 70);

        let (departure, now) = departing_in(Duration::hours(47));
        assert_eq!(policy.quote(100_000, departure, now).unwrap().percent, 50);
    }

    #[test]
    fn test_after_departure_is_refused() {
        let policy = RefundPolicy::default();
        let (departure, now) = departing_in(Duration::hours(-2));
        assert!(policy.quote(100_000, departure, now).is_err());
    }

    #[test]
    fn test_refund_amount_rounding() {
        // 1140 rupees at 90%
        let policy = RefundPolicy::default();
        let (departure, now) = departing_in(Duration::hours(80));
        assert_eq!(policy.quote(114_000, departure, now).unwrap().amount, 102_600);

        assert_eq!(percent_of(333, 50), 167);
        assert_eq!(percent_of(331, 70), 232);
    }

    #[test]
    fn test_custom_tiers_are_ordered() {
        let policy = RefundPolicy::new(
            12,
            vec![
                RefundTier { min_hours: 12, percent: 25 },
                RefundTier { min_hours: 96, percent: 100 },
            ],
        );
        let (departure, now) = departing_in(Duration::hours(100));
        assert_eq!(policy.quote(10_000, departure, now).unwrap().percent, 100);

        let (departure, now) = departing_in(Duration::hours(13));
        assert_eq!(policy.quote(10_000, departure, now).unwrap().percent, 25);
    }
}
