use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    CheckoutSession, CheckoutSessionRequest, Expandable, ORDER_ID_METADATA_KEY, PaymentError,
    PaymentGateway, PaymentIntent,
};
use crate::config::StripeConfig;

/// Stripe REST client covering hosted checkout sessions and payment intent lookups.
#[derive(Clone)]
pub struct StripeClient {
    config: StripeConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
    payment_intent: Option<Expandable>,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentResponse {
    id: String,
    status: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    fn session_form(&self, request: &CheckoutSessionRequest) -> Vec<(String, String)> {
        let order_id = request.order_id.to_string();
        let mut params = vec![
            ("mode".to_string(), "payment".to_string()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("success_url".to_string(), self.config.success_url.clone()),
            ("cancel_url".to_string(), self.config.cancel_url.clone()),
            ("client_reference_id".to_string(), order_id.clone()),
            (format!("metadata[{ORDER_ID_METADATA_KEY}]"), order_id.clone()),
            (
                format!("payment_intent_data[metadata][{ORDER_ID_METADATA_KEY}]"),
                order_id,
            ),
        ];

        for (i, item) in request.line_items.iter().enumerate() {
            let prefix = format!("line_items[{i}]");
            params.push((
                format!("{prefix}[price_data][currency]"),
                self.config.currency.clone(),
            ));
            params.push((
                format!("{prefix}[price_data][product_data][name]"),
                item.name.clone(),
            ));
            params.push((
                format!("{prefix}[price_data][unit_amount]"),
                item.unit_amount.to_string(),
            ));
            params.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
        }

        params
    }

    async fn into_api_error(response: reqwest::Response) -> PaymentError {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&text)
            .ok()
            .and_then(|env| env.error.message)
            .unwrap_or(text);
        warn!(status, message = %message, "stripe api error");
        PaymentError::Api { status, message }
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let response = self
            .client
            .post(self.url("checkout/sessions"))
            .basic_auth(&self.config.secret_key, Some(""))
            .form(&self.session_form(&request))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::into_api_error(response).await);
        }

        let session: SessionResponse = response.json().await?;
        info!(session_id = %session.id, "checkout session created");
        Ok(CheckoutSession {
            id: session.id,
            url: session.url,
            payment_intent_id: session.payment_intent.map(|pi| pi.id().to_string()),
        })
    }

    #[instrument(skip(self))]
    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, PaymentError> {
        let response = self
            .client
            .get(self.url(&format!("payment_intents/{id}")))
            .basic_auth(&self.config.secret_key, Some(""))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::into_api_error(response).await);
        }

        let intent: PaymentIntentResponse = response.json().await?;
        let order_id = intent
            .metadata
            .get(ORDER_ID_METADATA_KEY)
            .and_then(|v| Uuid::parse_str(v).ok());
        Ok(PaymentIntent {
            id: intent.id,
            status: intent.status,
            order_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::CheckoutLineItem;

    fn client() -> StripeClient {
        StripeClient::new(StripeConfig {
            secret_key: "sk_test_xxx".into(),
            webhook_secret: "whsec_test".into(),
            api_base: "https://api.stripe.test/".into(),
            webhook_tolerance_secs: 300,
            success_url: "http://shop.test/ok".into(),
            cancel_url: "http://shop.test/cancel".into(),
            currency: "usd".into(),
        })
    }

    #[test]
    fn builds_urls_without_double_slashes() {
        assert_eq!(
            client().url("checkout/sessions"),
            "https://api.stripe.test/v1/checkout/sessions"
        );
    }

    #[test]
    fn session_form_carries_order_metadata_and_line_items() {
        let order_id = Uuid::new_v4();
        let form = client().session_form(&CheckoutSessionRequest {
            order_id,
            line_items: vec![
                CheckoutLineItem {
                    name: "Mug".into(),
                    unit_amount: 1000,
                    quantity: 2,
                },
                CheckoutLineItem {
                    name: "Sticker".into(),
                    unit_amount: 500,
                    quantity: 1,
                },
            ],
        });
        let get = |key: &str| {
            form.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("mode"), Some("payment"));
        assert_eq!(get("metadata[order_id]"), Some(order_id.to_string().as_str()));
        assert_eq!(
            get("payment_intent_data[metadata][order_id]"),
            Some(order_id.to_string().as_str())
        );
        assert_eq!(get("line_items[0][price_data][unit_amount]"), Some("1000"));
        assert_eq!(get("line_items[0][quantity]"), Some("2"));
        assert_eq!(get("line_items[1][price_data][product_data][name]"), Some("Sticker"));
        assert_eq!(get("line_items[1][price_data][currency]"), Some("usd"));
    }

    #[test]
    fn session_response_accepts_missing_payment_intent() {
        let session: SessionResponse =
            serde_json::from_str(r#"{"id":"cs_1","url":"https://pay","payment_intent":null}"#)
                .unwrap();
        assert!(session.payment_intent.is_none());
        assert_eq!(session.url.as_deref(), Some("https://pay"));
    }
}
