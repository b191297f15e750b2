use std::collections::HashMap;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

use super::Expandable;
use crate::config::StripeConfig;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const CHECKOUT_SESSION_ASYNC_PAYMENT_SUCCEEDED: &str =
    "checkout.session.async_payment_succeeded";
pub const CHECKOUT_SESSION_ASYNC_PAYMENT_FAILED: &str = "checkout.session.async_payment_failed";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed signature header")]
    Malformed,
    #[error("timestamp outside tolerance")]
    Stale,
    #[error("signature mismatch")]
    Mismatch,
}

/// Checks `Stripe-Signature` headers (`t=<unix>,v1=<hex>`) against the shared secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    pub fn from_config(config: &StripeConfig) -> Self {
        Self::new(config.webhook_secret.clone(), config.webhook_tolerance_secs)
    }

    pub fn verify(&self, payload: &[u8], header: &str) -> Result<(), SignatureError> {
        self.verify_at(payload, header, Utc::now().timestamp())
    }

    pub fn verify_at(&self, payload: &[u8], header: &str, now: i64) -> Result<(), SignatureError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
        if signatures.is_empty() {
            return Err(SignatureError::Malformed);
        }
        let ts: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;
        let tolerance = u64::try_from(self.tolerance_secs).unwrap_or(0);
        if now.abs_diff(ts) > tolerance {
            return Err(SignatureError::Stale);
        }

        let matched = signatures.iter().any(|sig| {
            let Ok(expected) = hex::decode(sig) else {
                return false;
            };
            self.mac_for(timestamp, payload)
                .map(|mac| mac.verify_slice(&expected).is_ok())
                .unwrap_or(false)
        });

        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    /// Builds a header value the way the provider does; used to simulate deliveries.
    pub fn signature_header(&self, payload: &[u8], timestamp: i64) -> String {
        let signature = self
            .mac_for(&timestamp.to_string(), payload)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default();
        format!("t={timestamp},v1={signature}")
    }

    fn mac_for(&self, timestamp: &str, payload: &[u8]) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).ok()?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        Some(mac)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub payment_intent: Option<Expandable>,
    pub payment_status: Option<String>,
}

impl CheckoutSessionObject {
    /// `unpaid` means a delayed payment method; the async events settle it later.
    pub fn is_paid(&self) -> bool {
        !matches!(self.payment_status.as_deref(), Some("unpaid"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";
    const PAYLOAD: &[u8] = br#"{"type":"checkout.session.completed"}"#;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(SECRET, 300)
    }

    #[test]
    fn accepts_valid_signature() {
        let now = Utc::now().timestamp();
        let header = verifier().signature_header(PAYLOAD, now);
        assert_eq!(verifier().verify_at(PAYLOAD, &header, now), Ok(()));
    }

    #[test]
    fn rejects_wrong_secret() {
        let now = Utc::now().timestamp();
        let header = WebhookVerifier::new("other", 300).signature_header(PAYLOAD, now);
        assert_eq!(
            verifier().verify_at(PAYLOAD, &header, now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_modified_payload() {
        let now = Utc::now().timestamp();
        let header = verifier().signature_header(PAYLOAD, now);
        let tampered = br#"{"type":"checkout.session.completed","hacked":true}"#;
        assert_eq!(
            verifier().verify_at(tampered, &header, now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_stale_timestamp() {
        let now = Utc::now().timestamp();
        let header = verifier().signature_header(PAYLOAD, now - 600);
        assert_eq!(
            verifier().verify_at(PAYLOAD, &header, now),
            Err(SignatureError::Stale)
        );
    }

    #[test]
    fn extreme_timestamps_are_stale() {
        let now = Utc::now().timestamp();
        for ts in [i64::MIN, i64::MAX, 0] {
            let header = verifier().signature_header(PAYLOAD, ts);
            assert_eq!(
                verifier().verify_at(PAYLOAD, &header, now),
                Err(SignatureError::Stale),
                "t={ts}"
            );
        }
        assert_eq!(
            verifier().verify(b"{}", "t=-9223372036854775808,v1=00"),
            Err(SignatureError::Stale)
        );
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let now = Utc::now().timestamp();
        let good = verifier().signature_header(PAYLOAD, now);
        let sig = good.split_once(",v1=").map(|(_, s)| s).unwrap();
        let header = format!("t={now},v1=deadbeef,v0=ignored,v1={sig}");
        assert_eq!(verifier().verify_at(PAYLOAD, &header, now), Ok(()));
    }

    #[test]
    fn rejects_malformed_headers() {
        let now = Utc::now().timestamp();
        for header in ["", "garbage", "v1=abc", "t=123", "t=notanumber,v1=abc"] {
            assert_eq!(
                verifier().verify_at(PAYLOAD, header, now),
                Err(SignatureError::Malformed),
                "header {header:?}"
            );
        }
    }

    #[test]
    fn parses_checkout_session_event() {
        let raw = r#"{
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {"object": {
                "id": "cs_1",
                "metadata": {"order_id": "3f1c2a44-5b0e-4c61-9a77-0d8e2b8f6a10"},
                "payment_intent": "pi_1",
                "payment_status": "paid"
            }}
        }"#;
        let event: WebhookEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event_type, CHECKOUT_SESSION_COMPLETED);
        let session: CheckoutSessionObject = serde_json::from_value(event.data.object).unwrap();
        assert!(session.is_paid());
        assert_eq!(session.payment_intent.unwrap().id(), "pi_1");
        assert_eq!(
            session.metadata.get("order_id").map(String::as_str),
            Some("3f1c2a44-5b0e-4c61-9a77-0d8e2b8f6a10")
        );
    }

    #[test]
    fn unpaid_session_is_not_paid() {
        let session: CheckoutSessionObject =
            serde_json::from_str(r#"{"id":"cs_2","payment_status":"unpaid"}"#).unwrap();
        assert!(!session.is_paid());
        assert!(session.metadata.is_empty());
    }
}
