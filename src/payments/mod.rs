//! Payment provider integration.
//!
//! Services talk to the provider through [`PaymentGateway`] so the order pipeline can be
//! driven by a fake in tests. [`stripe::StripeClient`] is the production implementation
//! and [`webhook::WebhookVerifier`] authenticates inbound callbacks.

pub mod stripe;
pub mod webhook;

use async_trait::async_trait;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

/// Metadata key carrying our order id on provider objects.
pub const ORDER_ID_METADATA_KEY: &str = "order_id";

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("payment provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("amount {0} cannot be expressed in minor units")]
    InvalidAmount(Decimal),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLineItem {
    pub name: String,
    /// Unit price in the currency's minor unit (cents).
    pub unit_amount: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub order_id: Uuid,
    pub line_items: Vec<CheckoutLineItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    /// Only known up front on older API versions; otherwise filled in by the webhook.
    pub payment_intent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    pub order_id: Option<Uuid>,
}

impl PaymentIntent {
    pub fn succeeded(&self) -> bool {
        self.status == "succeeded"
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, PaymentError>;

    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, PaymentError>;
}

/// A provider reference that may arrive either as a bare id or as an expanded object.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    pub fn id(&self) -> &str {
        match self {
            Expandable::Id(id) => id,
            Expandable::Object { id } => id,
        }
    }
}

pub fn to_minor_units(amount: Decimal) -> Result<i64, PaymentError> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp(0)
        .to_i64()
        .ok_or(PaymentError::InvalidAmount(amount))
}
