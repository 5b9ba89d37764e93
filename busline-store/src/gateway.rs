use async_trait::async_trait;
use busline_core::payment::{GatewayOrder, PaymentError, PaymentGateway};
use chrono::{TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Orders API client for a Razorpay-style provider: `POST {base}/v1/orders`
/// with HTTP basic auth.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

#[derive(Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Deserialize)]
struct OrderResponse {
    id: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    receipt: Option<String>,
    #[serde(default)]
    created_at: Option<i64>,
}

impl HttpPaymentGateway {
    pub fn new(base_url: &str, key_id: &str, key_secret: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            key_id: key_id.to_string(),
            key_secret: key_secret.to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_order(
        &self,
        receipt: &str,
        amount: i64,
        currency: &str,
    ) -> Result<GatewayOrder, PaymentError> {
        let response = self
            .client
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&CreateOrderBody { amount, currency, receipt })
            .send()
            .await
            .map_err(|e| {
                warn!("Payment gateway unreachable: {}", e);
                PaymentError::ProviderUnavailable(e.to_string())
            })?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PaymentError::ProviderUnavailable(format!("gateway returned {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Rejected(format!("{}: {}", status, body)));
        }

        let order: OrderResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::ProviderUnavailable(format!("unreadable order: {}", e)))?;

        debug!("Gateway order {} created for receipt {}", order.id, receipt);

        Ok(GatewayOrder {
            order_id: order.id,
            amount: order.amount,
            currency: order.currency,
            receipt: order.receipt.unwrap_or_else(|| receipt.to_string()),
            created_at: order
                .created_at
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
                .unwrap_or_else(Utc::now),
        })
    }
}
