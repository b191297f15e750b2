mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use storefront_api::routes::build_app;
use tower::ServiceExt;

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn unknown_routes_use_the_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_app(common::offline_state(dir.path()));

    let response = app
        .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Not Found");
    assert_eq!(body["data"]["path"], "/nope");
}

#[tokio::test]
async fn protected_routes_require_a_bearer_token() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_app(common::offline_state(dir.path()));

    let response = app
        .clone()
        .oneshot(Request::get("/api/auth/me").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["message"], "Unauthorized");

    let response = app
        .oneshot(
            Request::get("/api/cart")
                .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unsigned_webhooks_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_app(common::offline_state(dir.path()));
    let payload = r#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{}}}"#;

    let response = app
        .clone()
        .oneshot(
            Request::post("/api/webhooks/stripe")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(
            Request::post("/api/webhooks/stripe")
                .header("stripe-signature", "t=1,v1=deadbeef")
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["message"],
        "Webhook signature verification failed"
    );
}

#[tokio::test]
async fn request_ids_are_propagated() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_app(common::offline_state(dir.path()));

    let response = app
        .oneshot(
            Request::get("/nope")
                .header("x-request-id", "req-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-42");
}

#[tokio::test]
async fn health_reports_database_reachability() {
    let Some(database_url) = common::database_url() else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run the health check.");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let pool = storefront_api::db::create_pool(&database_url, 1).await.unwrap();
    let state = storefront_api::state::AppState::new(
        pool,
        common::test_config(&database_url, dir.path()),
        std::sync::Arc::new(common::FakeGateway::default()),
    );

    let response = build_app(state)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["database"], "ok");
}
