use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePaymentIntentRequest {
    #[serde(alias = "orderId")]
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutSessionResponse {
    pub checkout_url: Option<String>,
    pub session_id: String,
    pub payment_intent_id: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmPaymentRequest {
    #[serde(alias = "paymentIntentId")]
    pub payment_intent_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConfirmPaymentResponse {
    pub success: bool,
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}
