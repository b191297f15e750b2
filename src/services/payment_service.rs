use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QuerySelect,
    Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::payments::{
        CheckoutSessionResponse, ConfirmPaymentRequest, ConfirmPaymentResponse,
        CreatePaymentIntentRequest,
    },
    entity::{
        enums::{OrderStatus, PaymentStatus},
        invoices, order_items,
        orders::{self, ActiveModel as OrderActive, Entity as Orders},
        payments::{ActiveModel as PaymentActive, Column as PaymentCol, Entity as Payments},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Payment,
    payments::{CheckoutLineItem, CheckoutSessionRequest, to_minor_units},
    response::{ApiResponse, Meta},
    services::{cart_service, invoice_service, order_service},
    state::AppState,
};

/// Result of applying a successful payment to an order.
#[derive(Debug)]
pub struct Settlement {
    /// False when the order had already been settled by an earlier delivery.
    pub newly_paid: bool,
    pub invoice: invoices::Model,
}

/// Opens a hosted checkout for one of the caller's unpaid orders.
pub async fn create_payment_intent(
    state: &AppState,
    user: &AuthUser,
    payload: CreatePaymentIntentRequest,
) -> AppResult<ApiResponse<CheckoutSessionResponse>> {
    let order = order_service::find_order_scoped(&state.orm, payload.order_id, user.scope()).await?;
    if order.payment_status == PaymentStatus::PaymentSuccess {
        return Err(AppError::Conflict("Order already paid".into()));
    }

    let items = order_service::order_items(&state.orm, order.id).await?;
    let line_items = checkout_line_items(&items)?;
    if line_items.is_empty() {
        return Err(AppError::BadRequest("Order has no items".into()));
    }

    let session = state
        .payments
        .create_checkout_session(CheckoutSessionRequest {
            order_id: order.id,
            line_items,
        })
        .await?;

    let now = Utc::now();
    Payments::insert(PaymentActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        checkout_session_id: Set(Some(session.id.clone())),
        payment_intent_id: Set(session.payment_intent_id.clone()),
        amount: Set(order.total_amount),
        status: Set(PaymentStatus::PaymentPending),
        created_at: NotSet,
        updated_at: Set(now.into()),
    })
    .on_conflict(
        OnConflict::column(PaymentCol::OrderId)
            .update_columns([
                PaymentCol::CheckoutSessionId,
                PaymentCol::PaymentIntentId,
                PaymentCol::Amount,
                PaymentCol::Status,
                PaymentCol::UpdatedAt,
            ])
            .to_owned(),
    )
    .exec(&state.orm)
    .await?;

    tracing::info!(order_id = %order.id, session_id = %session.id, "checkout session created");
    audit::record(
        state,
        Some(user.user_id),
        "payment_checkout_create",
        "payments",
        serde_json::json!({ "order_id": order.id, "session_id": session.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Checkout session created",
        CheckoutSessionResponse {
            checkout_url: session.url,
            session_id: session.id,
            payment_intent_id: session.payment_intent_id,
        },
        Some(Meta::empty()),
    ))
}

/// Client-driven confirmation: asks the provider for the intent's current state and
/// settles the order the same way the webhook would.
pub async fn confirm_payment(
    state: &AppState,
    user: &AuthUser,
    payload: ConfirmPaymentRequest,
) -> AppResult<ApiResponse<ConfirmPaymentResponse>> {
    let intent_id = payload.payment_intent_id.trim();
    if intent_id.is_empty() {
        return Err(AppError::BadRequest("payment_intent_id is required".into()));
    }

    let intent = state.payments.retrieve_payment_intent(intent_id).await?;

    let order_id = match intent.order_id {
        Some(order_id) => order_id,
        None => Payments::find()
            .filter(PaymentCol::PaymentIntentId.eq(intent.id.as_str()))
            .one(&state.orm)
            .await?
            .map(|payment| payment.order_id)
            .ok_or(AppError::NotFound("Payment"))?,
    };
    let order = order_service::find_order_scoped(&state.orm, order_id, user.scope()).await?;

    let success = if intent.succeeded() {
        settle_payment(state, order.id, Some(intent.id.clone())).await?;
        true
    } else {
        tracing::info!(order_id = %order.id, intent_id = %intent.id, status = %intent.status, "payment not completed");
        mark_payment_failed(state, order.id, Some(intent.id.clone())).await?;
        false
    };

    Ok(ApiResponse::success(
        if success { "Payment confirmed" } else { "Payment not completed" },
        ConfirmPaymentResponse {
            success,
            order_id: order.id,
        },
        None,
    ))
}

pub async fn get_payment_status(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<ApiResponse<Payment>> {
    let order = order_service::find_order_scoped(&state.orm, order_id, user.scope()).await?;
    let payment = Payments::find()
        .filter(PaymentCol::OrderId.eq(order.id))
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound("Payment"))?;
    Ok(ApiResponse::success("OK", payment.into(), None))
}

/// Marks the order paid, records the payment and empties the owner's cart in one
/// transaction, then makes sure an invoice exists. Redeliveries find the order already
/// settled and only re-run the invoice step, which is itself idempotent.
pub async fn settle_payment(
    state: &AppState,
    order_id: Uuid,
    payment_intent_id: Option<String>,
) -> AppResult<Settlement> {
    let txn = state.orm.begin().await?;
    let order = lock_order(&txn, order_id).await?;

    let (order, newly_paid) = if order.payment_status == PaymentStatus::PaymentSuccess {
        txn.commit().await?;
        tracing::info!(order_id = %order_id, "payment already settled, skipping");
        (order, false)
    } else {
        upsert_payment_status(
            &txn,
            &order,
            PaymentStatus::PaymentSuccess,
            payment_intent_id.clone(),
        )
        .await?;

        let mut active: OrderActive = order.into();
        active.status = Set(OrderStatus::Paid);
        active.payment_status = Set(PaymentStatus::PaymentSuccess);
        active.updated_at = Set(Utc::now().into());
        let order = active.update(&txn).await?;

        let cleared = cart_service::clear_cart_for_user(&txn, order.user_id).await?;
        txn.commit().await?;

        tracing::info!(order_id = %order.id, cleared_lines = cleared, "order paid");
        audit::record(
            state,
            Some(order.user_id),
            "payment_success",
            "payments",
            serde_json::json!({ "order_id": order.id, "payment_intent_id": payment_intent_id }),
        )
        .await;
        (order, true)
    };

    let invoice = invoice_service::ensure_invoice(state, &order).await?;
    Ok(Settlement {
        newly_paid,
        invoice,
    })
}

/// Records a failed attempt. A settled order is never downgraded; returns whether
/// anything changed.
pub async fn mark_payment_failed(
    state: &AppState,
    order_id: Uuid,
    payment_intent_id: Option<String>,
) -> AppResult<bool> {
    let txn = state.orm.begin().await?;
    let order = lock_order(&txn, order_id).await?;

    if order.payment_status == PaymentStatus::PaymentSuccess {
        txn.commit().await?;
        tracing::info!(order_id = %order_id, "ignoring failure for settled order");
        return Ok(false);
    }

    upsert_payment_status(&txn, &order, PaymentStatus::PaymentFailed, payment_intent_id).await?;

    let user_id = order.user_id;
    let mut active: OrderActive = order.into();
    active.payment_status = Set(PaymentStatus::PaymentFailed);
    active.updated_at = Set(Utc::now().into());
    active.update(&txn).await?;
    txn.commit().await?;

    tracing::warn!(order_id = %order_id, "payment failed");
    audit::record(
        state,
        Some(user_id),
        "payment_failed",
        "payments",
        serde_json::json!({ "order_id": order_id }),
    )
    .await;
    Ok(true)
}

async fn lock_order(txn: &DatabaseTransaction, order_id: Uuid) -> AppResult<orders::Model> {
    Orders::find_by_id(order_id)
        .lock_exclusive()
        .one(txn)
        .await?
        .ok_or(AppError::NotFound("Order"))
}

/// Creates or updates the order's single payment row. A missing intent id leaves the
/// stored one untouched.
async fn upsert_payment_status(
    txn: &DatabaseTransaction,
    order: &orders::Model,
    status: PaymentStatus,
    payment_intent_id: Option<String>,
) -> AppResult<()> {
    let mut on_conflict = OnConflict::column(PaymentCol::OrderId);
    on_conflict.update_columns([PaymentCol::Status, PaymentCol::UpdatedAt]);
    if payment_intent_id.is_some() {
        on_conflict.update_column(PaymentCol::PaymentIntentId);
    }

    Payments::insert(PaymentActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        checkout_session_id: Set(None),
        payment_intent_id: Set(payment_intent_id),
        amount: Set(order.total_amount),
        status: Set(status),
        created_at: NotSet,
        updated_at: Set(Utc::now().into()),
    })
    .on_conflict(on_conflict)
    .exec(txn)
    .await?;
    Ok(())
}

/// Prices come from the order snapshot so the charge always equals the order total.
fn checkout_line_items(items: &[order_items::Model]) -> AppResult<Vec<CheckoutLineItem>> {
    items
        .iter()
        .map(|item| {
            Ok(CheckoutLineItem {
                name: item.product_name.clone(),
                unit_amount: to_minor_units(item.unit_price)?,
                quantity: i64::from(item.quantity),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(name: &str, price: rust_decimal::Decimal, quantity: i32) -> order_items::Model {
        order_items::Model {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            product_id: None,
            product_name: name.into(),
            quantity,
            unit_price: price,
            created_at: Utc::now().into(),
        }
    }

    #[test]
    fn line_items_use_snapshot_prices_in_cents() {
        let lines =
            checkout_line_items(&[item("Mug", dec!(12.50), 2), item("Pen", dec!(0.99), 1)]).unwrap();
        assert_eq!(
            lines,
            vec![
                CheckoutLineItem {
                    name: "Mug".into(),
                    unit_amount: 1250,
                    quantity: 2,
                },
                CheckoutLineItem {
                    name: "Pen".into(),
                    unit_amount: 99,
                    quantity: 1,
                },
            ]
        );
    }
}
