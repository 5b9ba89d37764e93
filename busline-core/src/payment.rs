use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Order descriptor returned by the payment provider, shown to the payer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayOrder {
    pub order_id: String,
    /// Minor units.
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Payment provider rejected the request: {0}")]
    Rejected(String),
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::ProviderUnavailable(_))
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create an order with the provider. `receipt` is our booking reference.
    async fn create_order(
        &self,
        receipt: &str,
        amount: i64,
        currency: &str,
    ) -> Result<GatewayOrder, PaymentError>;
}
