use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub kafka: Option<KafkaConfig>,
    pub auth: AuthConfig,
    pub payment: PaymentConfig,
    #[serde(default)]
    pub business_rules: BusinessRules,
}

/// Same shape as the refund policy's tier; kept here so config has no
/// dependency on the booking engine.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct RefundTierConfig {
    pub min_hours: i64,
    pub percent: u8,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    #[serde(default = "default_booking_ttl")]
    pub booking_ttl_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_cutoff_hours")]
    pub cancellation_cutoff_hours: i64,
    #[serde(default = "default_refund_tiers")]
    pub refund_tiers: Vec<RefundTierConfig>,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: i64,
}

fn default_booking_ttl() -> u64 { 900 }
fn default_sweep_interval() -> u64 { 60 }
fn default_cutoff_hours() -> i64 { 24 }
fn default_rate_limit() -> i64 { 100 }

fn default_refund_tiers() -> Vec<RefundTierConfig> {
    vec![
        RefundTierConfig { min_hours: 72, percent: 90 },
        RefundTierConfig { min_hours: 48, percent: 70 },
        RefundTierConfig { min_hours: 24, percent: 50 },
    ]
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            booking_ttl_seconds: default_booking_ttl(),
            sweep_interval_seconds: default_sweep_interval(),
            cancellation_cutoff_hours: default_cutoff_hours(),
            refund_tiers: default_refund_tiers(),
            rate_limit_per_minute: default_rate_limit(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMode {
    Mock,
    Http,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentConfig {
    pub mode: PaymentMode,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub key_id: String,
    pub key_secret: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String { "INR".to_string() }

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. BUSLINE__SERVER__PORT=8080
            .add_source(config::Environment::with_prefix("BUSLINE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_rules_defaults() {
        let rules: BusinessRules = serde_json::from_str("{}").unwrap();
        assert_eq!(rules.booking_ttl_seconds, 900);
        assert_eq!(rules.cancellation_cutoff_hours, 24);
        assert_eq!(rules.refund_tiers.len(), 3);
        assert_eq!(rules.refund_tiers[0], RefundTierConfig { min_hours: 72, percent: 90 });
    }

    #[test]
    fn test_optional_sections() {
        let raw = r#"{
            "server": {"port": 3000},
            "database": {"url": "postgres://localhost/busline"},
            "auth": {"jwt_secret": "s", "jwt_expiration_seconds": 3600},
            "payment": {"mode": "mock", "key_secret": "k"}
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert!(config.redis.is_none());
        assert!(config.kafka.is_none());
        assert_eq!(config.payment.mode, PaymentMode::Mock);
        assert_eq!(config.payment.currency, "INR");
        assert_eq!(config.database.max_connections, 5);
    }
}
