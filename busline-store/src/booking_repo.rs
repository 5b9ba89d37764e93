use async_trait::async_trait;
use busline_core::booking::{
    CancellationRecord, PaymentRecord, RefundStatus, VerificationStatus,
};
use busline_core::{
    Booking, BookingLedger, BookingStatus, Contact, FareComponents, LedgerError, Passenger,
    Transition,
};
use busline_shared::Masked;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use std::error::Error;
use tracing::{info, warn};
use uuid::Uuid;

const CREATE_ATTEMPTS: u32 = 3;

const BOOKING_COLUMNS: &str = "id, schedule_id, user_id, seats, passengers, contact_email, \
    contact_phone, fare_base, fare_tax, fare_service, total_amount, currency, status, order_id, \
    payment_id, verification_status, cancelled_at, cancel_reason, refund_percent, refund_amount, \
    refund_status, created_at, expires_at, updated_at";

/// Postgres ledger. Seat exclusivity rests on the `seat_holds` primary key,
/// state changes on `UPDATE ... WHERE status = $expected`.
pub struct PgBookingLedger {
    pool: PgPool,
}

impl PgBookingLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Booking>, LedgerError> {
        let sql = format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS);
        let row: Option<BookingRow> = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.map(Booking::try_from).transpose().map_err(LedgerError::Storage)
    }

    /// One claim attempt in its own transaction.
    async fn try_create(&self, booking: &Booking, now: DateTime<Utc>) -> Result<(), LedgerError> {
        let passengers = serde_json::to_value(&booking.passengers)
            .map_err(|e| LedgerError::Storage(Box::new(e)))?;

        // Every claim touches rows in seat order, so two overlapping claims
        // queue on their first shared seat instead of waiting on each other
        let seats = ordered_seats(&booking.seats);

        let mut tx = self.pool.begin().await.map_err(storage)?;

        // 1. Lapsed pending holders of these seats give them up first,
        //    locked in id order
        let holders: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM bookings
            WHERE status = 'PENDING'
              AND expires_at <= $3
              AND id IN (
                  SELECT booking_id FROM seat_holds
                  WHERE schedule_id = $1 AND seat_id = ANY($2)
              )
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(booking.schedule_id)
        .bind(&seats)
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(storage)?;

        if !holders.is_empty() {
            let locked: Vec<Uuid> = holders.into_iter().map(|(id,)| id).collect();
            let expired: Vec<(Uuid,)> = sqlx::query_as(
                r#"
                UPDATE bookings SET status = 'EXPIRED', updated_at = $2
                WHERE id = ANY($1) AND status = 'PENDING' AND expires_at <= $2
                RETURNING id
                "#,
            )
            .bind(&locked)
            .bind(now)
            .fetch_all(&mut *tx)
            .await
            .map_err(storage)?;

            let ids: Vec<Uuid> = expired.into_iter().map(|(id,)| id).collect();
            sqlx::query("DELETE FROM seat_holds WHERE booking_id = ANY($1)")
                .bind(&ids)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
            info!("Expired {} lapsed booking(s) while reclaiming seats", ids.len());
        }

        // 2. The booking itself
        sqlx::query(
            r#"
            INSERT INTO bookings (
                id, schedule_id, user_id, seats, passengers, contact_email, contact_phone,
                fare_base, fare_tax, fare_service, total_amount, currency, status,
                order_id, payment_id, verification_status, created_at, expires_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(booking.id)
        .bind(booking.schedule_id)
        .bind(&booking.user_id)
        .bind(&booking.seats)
        .bind(passengers)
        .bind(booking.contact.email.expose())
        .bind(booking.contact.phone.expose())
        .bind(booking.fare.base)
        .bind(booking.fare.tax)
        .bind(booking.fare.service_fee)
        .bind(booking.total_amount)
        .bind(&booking.currency)
        .bind(booking.status.as_str())
        .bind(booking.payment.order_id.as_deref())
        .bind(booking.payment.payment_id.as_deref())
        .bind(booking.payment.verification.as_str())
        .bind(booking.created_at)
        .bind(booking.expires_at)
        .bind(booking.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        // 3. All holds or nothing; a concurrent claim on the same key waits
        //    for ours to commit or roll back, then sees the conflict
        let inserted = sqlx::query(
            r#"
            INSERT INTO seat_holds (schedule_id, seat_id, booking_id)
            SELECT $1, seat, $3 FROM UNNEST($2::text[]) AS seat
            ORDER BY seat
            ON CONFLICT (schedule_id, seat_id) DO NOTHING
            "#,
        )
        .bind(booking.schedule_id)
        .bind(&seats)
        .bind(booking.id)
        .execute(&mut *tx)
        .await
        .map_err(storage)?
        .rows_affected();

        if inserted < seats.len() as u64 {
            let taken = conflicting_seats(&mut tx, booking).await?;
            tx.rollback().await.map_err(storage)?;
            return Err(LedgerError::SeatConflict(taken));
        }

        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    /// Works out why a conditional update matched no row.
    async fn explain_miss(
        &self,
        id: Uuid,
        expected: BookingStatus,
        transition: &Transition,
    ) -> LedgerError {
        let current = match self.fetch(id).await {
            Ok(Some(booking)) => booking,
            Ok(None) => return LedgerError::NotFound(id),
            Err(e) => return e,
        };

        if current.status != expected {
            return LedgerError::StateMismatch {
                id,
                expected,
                actual: current.status,
            };
        }
        match transition {
            Transition::Confirm { .. } => LedgerError::HoldLapsed(id),
            Transition::Expire => LedgerError::HoldLive(id),
            // Cancel has no extra condition; the row changed between the two reads
            Transition::Cancel { .. } => LedgerError::StateMismatch {
                id,
                expected,
                actual: current.status,
            },
        }
    }
}

fn storage(e: sqlx::Error) -> LedgerError {
    LedgerError::Storage(Box::new(e))
}

/// Deadlock or serialization failure; the transaction was rolled back
/// and may be run again.
fn is_contention(e: &LedgerError) -> bool {
    let LedgerError::Storage(source) = e else {
        return false;
    };
    match source.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db)) => is_retryable_sqlstate(db.code().as_deref()),
        _ => false,
    }
}

fn is_retryable_sqlstate(code: Option<&str>) -> bool {
    matches!(code, Some("40P01") | Some("40001"))
}

fn ordered_seats(seats: &[String]) -> Vec<String> {
    let mut ordered = seats.to_vec();
    ordered.sort();
    ordered.dedup();
    ordered
}

#[async_trait]
impl BookingLedger for PgBookingLedger {
    async fn create(&self, booking: &Booking, now: DateTime<Utc>) -> Result<(), LedgerError> {
        let mut attempt = 1;
        loop {
            match self.try_create(booking, now).await {
                Err(e) if is_contention(&e) => {
                    if attempt >= CREATE_ATTEMPTS {
                        warn!(
                            booking_id = %booking.id,
                            "Claim lost to concurrent claims after {} attempts: {}", attempt, e
                        );
                        return Err(LedgerError::SeatConflict(ordered_seats(&booking.seats)));
                    }
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: BookingStatus,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<Booking, LedgerError> {
        let target = transition.target();
        if !expected.can_transition_to(target) {
            return Err(LedgerError::InvalidTransition { from: expected, to: target });
        }

        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row: Option<BookingRow> = match &transition {
            Transition::Confirm { payment_id } => {
                let sql = format!(
                    "UPDATE bookings SET status = 'CONFIRMED', payment_id = $3, \
                     verification_status = 'VERIFIED', updated_at = $4 \
                     WHERE id = $1 AND status = $2 AND expires_at > $4 RETURNING {}",
                    BOOKING_COLUMNS
                );
                sqlx::query_as::<_, BookingRow>(&sql)
                    .bind(id)
                    .bind(expected.as_str())
                    .bind(payment_id)
                    .bind(now)
                    .fetch_optional(&mut *tx)
                    .await
            }
            Transition::Expire => {
                let sql = format!(
                    "UPDATE bookings SET status = 'EXPIRED', updated_at = $3 \
                     WHERE id = $1 AND status = $2 AND expires_at <= $3 RETURNING {}",
                    BOOKING_COLUMNS
                );
                sqlx::query_as::<_, BookingRow>(&sql)
                    .bind(id)
                    .bind(expected.as_str())
                    .bind(now)
                    .fetch_optional(&mut *tx)
                    .await
            }
            Transition::Cancel {
                reason,
                refund_percent,
                refund_amount,
            } => {
                let sql = format!(
                    "UPDATE bookings SET status = 'CANCELLED', cancelled_at = $3, \
                     cancel_reason = $4, refund_percent = $5, refund_amount = $6, \
                     refund_status = 'PENDING', updated_at = $3 \
                     WHERE id = $1 AND status = $2 RETURNING {}",
                    BOOKING_COLUMNS
                );
                sqlx::query_as::<_, BookingRow>(&sql)
                    .bind(id)
                    .bind(expected.as_str())
                    .bind(now)
                    .bind(reason)
                    .bind(i16::from(*refund_percent))
                    .bind(*refund_amount)
                    .fetch_optional(&mut *tx)
                    .await
            }
        }
        .map_err(storage)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(storage)?;
            return Err(self.explain_miss(id, expected, &transition).await);
        };

        if target.is_terminal() {
            sqlx::query("DELETE FROM seat_holds WHERE booking_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
        }

        tx.commit().await.map_err(storage)?;
        Booking::try_from(row).map_err(LedgerError::Storage)
    }

    async fn attach_order(
        &self,
        id: Uuid,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Booking, LedgerError> {
        let sql = format!(
            "UPDATE bookings SET order_id = $2, updated_at = $3 \
             WHERE id = $1 AND status = 'PENDING' AND expires_at > $3 AND order_id IS NULL \
             RETURNING {}",
            BOOKING_COLUMNS
        );
        let row: Option<BookingRow> = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id)
            .bind(order_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        if let Some(row) = row {
            return Booking::try_from(row).map_err(LedgerError::Storage);
        }

        let current = self.fetch(id).await?.ok_or(LedgerError::NotFound(id))?;
        if current.status != BookingStatus::Pending {
            return Err(LedgerError::StateMismatch {
                id,
                expected: BookingStatus::Pending,
                actual: current.status,
            });
        }
        if current.hold_lapsed(now) {
            return Err(LedgerError::HoldLapsed(id));
        }
        // Someone else attached first
        Ok(current)
    }

    async fn mark_verification_failed(&self, id: Uuid) -> Result<(), LedgerError> {
        let updated = sqlx::query(
            "UPDATE bookings SET verification_status = 'FAILED' WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage)?
        .rows_affected();

        if updated == 0 && self.fetch(id).await?.is_none() {
            return Err(LedgerError::NotFound(id));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Booking>, LedgerError> {
        self.fetch(id).await
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Booking>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM bookings WHERE user_id = $1 ORDER BY created_at DESC",
            BOOKING_COLUMNS
        );
        let rows: Vec<BookingRow> = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        convert_rows(rows)
    }

    async fn list_by_schedule(
        &self,
        schedule_id: Uuid,
        states: &[BookingStatus],
    ) -> Result<Vec<Booking>, LedgerError> {
        let states: Vec<&str> = states.iter().map(|s| s.as_str()).collect();
        let sql = format!(
            "SELECT {} FROM bookings WHERE schedule_id = $1 AND status = ANY($2)",
            BOOKING_COLUMNS
        );
        let rows: Vec<BookingRow> = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(schedule_id)
            .bind(&states)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        convert_rows(rows)
    }

    async fn list_lapsed(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Booking>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM bookings WHERE status = 'PENDING' AND expires_at <= $1 \
             ORDER BY expires_at LIMIT $2",
            BOOKING_COLUMNS
        );
        let rows: Vec<BookingRow> = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        convert_rows(rows)
    }
}

async fn conflicting_seats(
    tx: &mut Transaction<'_, Postgres>,
    booking: &Booking,
) -> Result<Vec<String>, LedgerError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT seat_id FROM seat_holds
        WHERE schedule_id = $1 AND seat_id = ANY($2) AND booking_id <> $3
        ORDER BY seat_id
        "#,
    )
    .bind(booking.schedule_id)
    .bind(&booking.seats)
    .bind(booking.id)
    .fetch_all(&mut **tx)
    .await
    .map_err(storage)?;

    let taken: Vec<String> = rows.into_iter().map(|(seat,)| seat).collect();
    if taken.is_empty() {
        // Holder committed and released between our insert and this read
        warn!(booking_id = %booking.id, "Seat conflict with no visible holder");
        return Ok(booking.seats.clone());
    }
    Ok(taken)
}

fn convert_rows(rows: Vec<BookingRow>) -> Result<Vec<Booking>, LedgerError> {
    rows.into_iter()
        .map(Booking::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(LedgerError::Storage)
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    schedule_id: Uuid,
    user_id: String,
    seats: Vec<String>,
    passengers: Value,
    contact_email: String,
    contact_phone: String,
    fare_base: i64,
    fare_tax: i64,
    fare_service: i64,
    total_amount: i64,
    currency: String,
    status: String,
    order_id: Option<String>,
    payment_id: Option<String>,
    verification_status: String,
    cancelled_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    refund_percent: Option<i16>,
    refund_amount: Option<i64>,
    refund_status: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = Box<dyn Error + Send + Sync>;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let passengers: Vec<Passenger> = serde_json::from_value(row.passengers)?;
        let status: BookingStatus = row.status.parse()?;

        let cancellation = match row.cancelled_at {
            Some(cancelled_at) => Some(CancellationRecord {
                cancelled_at,
                reason: row.cancel_reason.unwrap_or_default(),
                refund_percent: row
                    .refund_percent
                    .and_then(|p| u8::try_from(p).ok())
                    .unwrap_or(0),
                refund_amount: row.refund_amount.unwrap_or(0),
                refund_status: row
                    .refund_status
                    .as_deref()
                    .map(RefundStatus::parse)
                    .unwrap_or(RefundStatus::Pending),
            }),
            None => None,
        };

        Ok(Booking {
            id: row.id,
            schedule_id: row.schedule_id,
            user_id: row.user_id,
            seats: row.seats,
            passengers,
            contact: Contact {
                email: Masked::new(row.contact_email),
                phone: Masked::new(row.contact_phone),
            },
            fare: FareComponents::new(row.fare_base, row.fare_tax, row.fare_service),
            total_amount: row.total_amount,
            currency: row.currency,
            status,
            payment: PaymentRecord {
                order_id: row.order_id,
                payment_id: row.payment_id,
                verification: VerificationStatus::parse(&row.verification_status),
            },
            cancellation,
            created_at: row.created_at,
            expires_at: row.expires_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_lock_seats_in_one_order() {
        let forward = ordered_seats(&["3B".to_string(), "1A".to_string(), "2C".to_string()]);
        let reverse = ordered_seats(&["2C".to_string(), "1A".to_string(), "3B".to_string(), "1A".to_string()]);
        assert_eq!(forward, vec!["1A", "2C", "3B"]);
        assert_eq!(forward, reverse);
    }

    #[test]
    fn test_only_lock_contention_is_retried() {
        assert!(is_retryable_sqlstate(Some("40P01")));
        assert!(is_retryable_sqlstate(Some("40001")));
        assert!(!is_retryable_sqlstate(Some("23505")));
        assert!(!is_retryable_sqlstate(None));

        assert!(!is_contention(&storage(sqlx::Error::RowNotFound)));
        assert!(!is_contention(&LedgerError::SeatConflict(vec!["1A".to_string()])));
    }
}
