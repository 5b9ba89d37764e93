use async_trait::async_trait;
use busline_core::payment::{GatewayOrder, PaymentError, PaymentGateway};
use busline_core::Booking;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Signature the gateway attaches to a successful payment callback:
/// hex(HMAC-SHA256(secret, "order_id|payment_id")).
pub fn sign_payment(secret: &[u8], order_id: &str, payment_id: &str) -> String {
    match HmacSha256::new_from_slice(secret) {
        Ok(mut mac) => {
            mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
            hex::encode(mac.finalize().into_bytes())
        }
        // HMAC takes keys of any length; an empty string never verifies anyway
        Err(_) => String::new(),
    }
}

/// Talks to the external payment provider and checks its callback proofs.
pub struct PaymentBridge {
    gateway: Arc<dyn PaymentGateway>,
    secret: Vec<u8>,
}

impl PaymentBridge {
    pub fn new(gateway: Arc<dyn PaymentGateway>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            gateway,
            secret: secret.into(),
        }
    }

    /// Create a provider order for the booking's frozen total.
    pub async fn create_order(&self, booking: &Booking) -> Result<GatewayOrder, PaymentError> {
        self.gateway
            .create_order(&booking.id.to_string(), booking.total_amount, &booking.currency)
            .await
    }

    /// Recompute the expected signature and compare in constant time.
    ///
    /// Pure: no I/O, no state. Any missing field or malformed signature is a
    /// plain `false`.
    pub fn verify(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        if order_id.is_empty() || payment_id.is_empty() || signature.is_empty() {
            return false;
        }

        let Ok(provided) = hex::decode(signature.trim()) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.secret) else {
            return false;
        };

        mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
        mac.verify_slice(&provided).is_ok()
    }
}

/// Gateway stand-in for development and tests. Orders are minted locally.
#[derive(Default)]
pub struct MockPaymentGateway {
    unavailable: AtomicBool,
    calls: AtomicUsize,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a provider outage.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_order(
        &self,
        receipt: &str,
        amount: i64,
        currency: &str,
    ) -> Result<GatewayOrder, PaymentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PaymentError::ProviderUnavailable(
                "Simulated payment gateway outage".to_string(),
            ));
        }
        if amount <= 0 {
            return Err(PaymentError::Rejected("amount must be positive".to_string()));
        }

        Ok(GatewayOrder {
            order_id: format!("order_mock_{}", Uuid::new_v4().simple()),
            amount,
            currency: currency.to_string(),
            receipt: receipt.to_string(),
            created_at: chrono::Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test_key_secret";

    fn bridge() -> PaymentBridge {
        PaymentBridge::new(Arc::new(MockPaymentGateway::new()), SECRET)
    }

    #[test]
    fn test_valid_signature_verifies() {
        let signature = sign_payment(SECRET, "order_1", "pay_1");
        assert!(bridge().verify("order_1", "pay_1", &signature));
    }

    #[test]
    fn test_tampered_or_missing_fields_fail() {
        let bridge = bridge();
        let signature = sign_payment(SECRET, "order_1", "pay_1");

        assert!(!bridge.verify("order_1", "pay_2", &signature));
        assert!(!bridge.verify("order_2", "pay_1", &signature));
        assert!(!bridge.verify("order_1", "pay_1", "not-hex"));
        assert!(!bridge.verify("order_1", "pay_1", ""));
        assert!(!bridge.verify("", "pay_1", &signature));

        let mut flipped = signature.clone();
        flipped.replace_range(0..1, if &signature[0..1] == "0" { "1" } else { "0" });
        assert!(!bridge.verify("order_1", "pay_1", &flipped));
    }

    #[test]
    fn test_signature_depends_on_secret() {
        let signature = sign_payment(b"other_secret", "order_1", "pay_1");
        assert!(!bridge().verify("order_1", "pay_1", &signature));
    }

    #[tokio::test]
    async fn test_mock_gateway_outage() {
        let gateway = MockPaymentGateway::new();
        gateway.set_available(false);
        let result = gateway.create_order("receipt", 1000, "INR").await;
        assert!(matches!(result, Err(PaymentError::ProviderUnavailable(_))));
        assert!(result.unwrap_err().is_retryable());

        gateway.set_available(true);
        let order = gateway.create_order("receipt", 1000, "INR").await.unwrap();
        assert!(order.order_id.starts_with("order_mock_"));
        assert_eq!(gateway.calls(), 2);
    }
}
