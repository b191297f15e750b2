use uuid::Uuid;

use crate::{
    dto::payments::WebhookAck,
    error::{AppError, AppResult},
    payments::{
        ORDER_ID_METADATA_KEY,
        webhook::{
            CHECKOUT_SESSION_ASYNC_PAYMENT_FAILED, CHECKOUT_SESSION_ASYNC_PAYMENT_SUCCEEDED,
            CHECKOUT_SESSION_COMPLETED, CheckoutSessionObject, WebhookEvent,
        },
    },
    services::payment_service,
    state::AppState,
};

/// Authenticates and applies a provider callback. Unknown event types are acknowledged
/// untouched; errors after verification surface as 5xx so the provider retries.
pub async fn handle_stripe_webhook(
    state: &AppState,
    signature: Option<&str>,
    payload: &[u8],
) -> AppResult<WebhookAck> {
    let signature = signature.ok_or_else(|| {
        tracing::warn!("webhook without signature header");
        AppError::InvalidSignature
    })?;
    state.webhooks.verify(payload, signature).map_err(|err| {
        tracing::warn!(error = %err, "webhook signature rejected");
        AppError::InvalidSignature
    })?;

    let event: WebhookEvent = serde_json::from_slice(payload)
        .map_err(|e| AppError::BadRequest(format!("Invalid webhook payload: {e}")))?;
    tracing::info!(event_id = %event.id, event_type = %event.event_type, "webhook received");

    match event.event_type.as_str() {
        CHECKOUT_SESSION_COMPLETED => {
            let session = checkout_session(&event)?;
            if !session.is_paid() {
                tracing::info!(session_id = %session.id, "checkout completed, payment still pending");
                return Ok(WebhookAck { received: true });
            }
            settle(state, &session).await?;
        }
        CHECKOUT_SESSION_ASYNC_PAYMENT_SUCCEEDED => {
            let session = checkout_session(&event)?;
            settle(state, &session).await?;
        }
        CHECKOUT_SESSION_ASYNC_PAYMENT_FAILED => {
            let session = checkout_session(&event)?;
            let Some(order_id) = order_id_of(&session) else {
                return Ok(WebhookAck { received: true });
            };
            let outcome =
                payment_service::mark_payment_failed(state, order_id, intent_id_of(&session)).await;
            acknowledge_unknown_order(outcome, order_id)?;
        }
        other => tracing::debug!(event_type = other, "ignoring webhook event"),
    }

    Ok(WebhookAck { received: true })
}

async fn settle(state: &AppState, session: &CheckoutSessionObject) -> AppResult<()> {
    let Some(order_id) = order_id_of(session) else {
        return Ok(());
    };
    let outcome = payment_service::settle_payment(state, order_id, intent_id_of(session)).await;
    if let Some(settlement) = acknowledge_unknown_order(outcome, order_id)? {
        if !settlement.newly_paid {
            tracing::info!(order_id = %order_id, session_id = %session.id, "duplicate payment event");
        }
    }
    Ok(())
}

/// Events for orders we do not know are acknowledged so the provider stops retrying them.
fn acknowledge_unknown_order<T>(outcome: AppResult<T>, order_id: Uuid) -> AppResult<Option<T>> {
    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(AppError::NotFound(_)) => {
            tracing::warn!(order_id = %order_id, "webhook for unknown order ignored");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn checkout_session(event: &WebhookEvent) -> AppResult<CheckoutSessionObject> {
    serde_json::from_value(event.data.object.clone())
        .map_err(|e| AppError::BadRequest(format!("Invalid checkout session: {e}")))
}

fn order_id_of(session: &CheckoutSessionObject) -> Option<Uuid> {
    let order_id = session
        .metadata
        .get(ORDER_ID_METADATA_KEY)
        .and_then(|raw| Uuid::parse_str(raw).ok());
    if order_id.is_none() {
        tracing::warn!(session_id = %session.id, "checkout session without order id, ignoring");
    }
    order_id
}

fn intent_id_of(session: &CheckoutSessionObject) -> Option<String> {
    session
        .payment_intent
        .as_ref()
        .map(|intent| intent.id().to_string())
}
