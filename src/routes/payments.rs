use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::payments::{
        CheckoutSessionResponse, ConfirmPaymentRequest, ConfirmPaymentResponse,
        CreatePaymentIntentRequest,
    },
    error::AppResult,
    middleware::auth::AuthUser,
    models::Payment,
    response::ApiResponse,
    services::payment_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create-intent", post(create_payment_intent))
        .route("/confirm", post(confirm_payment))
        .route("/status/{order_id}", get(get_payment_status))
}

#[utoipa::path(
    post,
    path = "/api/payments/create-intent",
    request_body = CreatePaymentIntentRequest,
    responses(
        (status = 200, description = "Hosted checkout session", body = ApiResponse<CheckoutSessionResponse>),
        (status = 400, description = "Order already paid"),
        (status = 404, description = "Order not found"),
        (status = 502, description = "Payment provider error")
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreatePaymentIntentRequest>,
) -> AppResult<Json<ApiResponse<CheckoutSessionResponse>>> {
    let resp = payment_service::create_payment_intent(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/payments/confirm",
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Confirmation result", body = ApiResponse<ConfirmPaymentResponse>),
        (status = 404, description = "Payment or order not found"),
        (status = 502, description = "Payment provider error")
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<ConfirmPaymentRequest>,
) -> AppResult<Json<ApiResponse<ConfirmPaymentResponse>>> {
    let resp = payment_service::confirm_payment(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/payments/status/{order_id}",
    params(
        ("order_id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Payment record", body = ApiResponse<Payment>),
        (status = 404, description = "Payment not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn get_payment_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Payment>>> {
    let resp = payment_service::get_payment_status(&state, &user, order_id).await?;
    Ok(Json(resp))
}
