use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::{info, warn};

use crate::app_config::{BusinessRules, RefundTierConfig};

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Merge rows of the `business_rules` table over the file configuration.
    pub async fn fetch_business_rules(
        &self,
        defaults: BusinessRules,
    ) -> Result<BusinessRules, sqlx::Error> {
        let rows: Vec<(String, Value)> =
            sqlx::query_as("SELECT rule_key, rule_value FROM business_rules")
                .fetch_all(&self.pool)
                .await?;

        Ok(apply_rule_overrides(defaults, rows))
    }
}

/// Each row is `{"value": ...}`; unknown keys and ill-typed values are skipped.
pub fn apply_rule_overrides(
    defaults: BusinessRules,
    rows: impl IntoIterator<Item = (String, Value)>,
) -> BusinessRules {
    let mut rules = defaults;

    for (key, raw) in rows {
        let Some(v) = raw.get("value") else {
            warn!("Business rule {} has no value field, ignoring", key);
            continue;
        };

        match key.as_str() {
            "booking_ttl_seconds" => {
                if let Some(u) = v.as_u64() {
                    rules.booking_ttl_seconds = u;
                }
            }
            "sweep_interval_seconds" => {
                if let Some(u) = v.as_u64() {
                    rules.sweep_interval_seconds = u;
                }
            }
            "cancellation_cutoff_hours" => {
                if let Some(i) = v.as_i64() {
                    rules.cancellation_cutoff_hours = i;
                }
            }
            "rate_limit_per_minute" => {
                if let Some(i) = v.as_i64() {
                    rules.rate_limit_per_minute = i;
                }
            }
            "refund_tiers" => {
                match serde_json::from_value::<Vec<RefundTierConfig>>(v.clone()) {
                    Ok(tiers) if !tiers.is_empty() => rules.refund_tiers = tiers,
                    Ok(_) => warn!("Empty refund_tiers override ignored"),
                    Err(e) => warn!("Malformed refund_tiers override ignored: {}", e),
                }
            }
            _ => {}
        }
    }

    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_overrides_merge_over_defaults() {
        let rows = vec![
            ("booking_ttl_seconds".to_string(), json!({"value": 600})),
            ("refund_tiers".to_string(), json!({"value": [{"min_hours": 96, "percent": 100}]})),
            ("cancellation_cutoff_hours".to_string(), json!({"value": "twelve"})),
            ("unknown_rule".to_string(), json!({"value": 1})),
        ];

        let rules = apply_rule_overrides(BusinessRules::default(), rows);
        assert_eq!(rules.booking_ttl_seconds, 600);
        assert_eq!(rules.refund_tiers, vec![RefundTierConfig { min_hours: 96, percent: 100 }]);
        assert_eq!(rules.cancellation_cutoff_hours, 24);
        assert_eq!(rules.sweep_interval_seconds, 60);
    }
}
