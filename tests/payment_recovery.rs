mod common;

use chrono::Utc;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use storefront_api::{
    dto::{
        auth::RegisterRequest,
        cart::{AddToCartRequest, UpdateCartItemRequest},
        products::CreateProductRequest,
    },
    entity::{
        enums::{OrderStatus, PaymentStatus},
        invoices, orders,
    },
    error::AppError,
    middleware::auth::AuthUser,
    services::{
        auth_service, cart_service, invoice_service, order_service, payment_service,
        product_service, webhook_service,
    },
    state::AppState,
};
use uuid::Uuid;

// Cart edge cases, a payment whose invoice could not be written, redelivery after the
// cart was refilled, and overlapping settlements of the same order.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn payment_recovery_and_cart_edges() -> anyhow::Result<()> {
    let Some(database_url) = common::database_url() else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run payment recovery.");
        return Ok(());
    };
    let public_dir = tempfile::tempdir()?;
    let (state, _gateway) = common::database_state(&database_url, public_dir.path()).await?;

    let dana = register(&state, "Dana", "dana@example.com", None).await?;
    let carol = register(&state, "Carol", "carol@example.com", None).await?;
    let admin = register(&state, "Ops", "ops@example.com", Some("ADMIN")).await?;
    let lamp = product_service::create_product(&state, &admin, product("Lamp", "30.00"))
        .await?
        .data
        .expect("product");
    let bulb = product_service::create_product(&state, &admin, product("Bulb", "2.50"))
        .await?
        .data
        .expect("product");

    // Clearing a cart that was never created is a no-op.
    cart_service::clear_cart(&state, &dana).await?;
    let cart = cart_service::get_cart(&state, &dana).await?.data.unwrap();
    assert!(cart.items.is_empty());

    // Concurrent first access yields one cart.
    let (first, second) = tokio::join!(
        cart_service::get_or_create_cart(&state, carol.user_id),
        cart_service::get_or_create_cart(&state, carol.user_id),
    );
    assert_eq!(first?.id, second?.id);

    // A non-positive quantity update drops the line.
    add(&state, &dana, bulb.id, 3).await?;
    let line = cart_service::get_cart(&state, &dana).await?.data.unwrap().items[0].clone();
    cart_service::update_item(&state, &dana, line.id, UpdateCartItemRequest { quantity: 0 })
        .await?;
    let cart = cart_service::get_cart(&state, &dana).await?.data.unwrap();
    assert!(cart.items.is_empty());

    // Removing a line twice: the second attempt no longer finds it.
    add(&state, &dana, bulb.id, 1).await?;
    let line = cart_service::get_cart(&state, &dana).await?.data.unwrap().items[0].clone();
    cart_service::remove_item(&state, &dana, line.id).await?;
    let again = cart_service::remove_item(&state, &dana, line.id)
        .await
        .expect_err("already removed");
    assert!(matches!(again, AppError::NotFound(_)));
    let unknown = cart_service::remove_item(&state, &dana, Uuid::new_v4())
        .await
        .expect_err("unknown line");
    assert!(matches!(unknown, AppError::NotFound(_)));

    // The invoice folder cannot be created: payment still lands, the invoice does not.
    add(&state, &dana, lamp.id, 1).await?;
    let order_id = order_service::create_order(&state, &dana)
        .await?
        .data
        .unwrap()
        .order
        .id;
    let invoices_dir = state.config.invoices_dir();
    tokio::fs::write(&invoices_dir, b"not a directory").await?;

    let failed = payment_service::settle_payment(&state, order_id, Some("pi_dana".into())).await;
    assert!(failed.is_err(), "invoice write should fail");
    let order = orders::Entity::find_by_id(order_id)
        .one(&state.orm)
        .await?
        .expect("order");
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.payment_status, PaymentStatus::PaymentSuccess);
    assert_eq!(invoice_count(&state, order_id).await?, 0);

    // The provider retries once the disk is fixed; the retry only completes the invoice.
    tokio::fs::remove_file(&invoices_dir).await?;
    add(&state, &dana, bulb.id, 2).await?;
    deliver_completed(&state, order_id, "pi_dana").await?;
    assert_eq!(invoice_count(&state, order_id).await?, 1);
    let (path, _) = invoice_service::invoice_file(&state, &dana, order_id).await?;
    assert!(tokio::fs::read(&path).await?.starts_with(b"%PDF"));

    // Items added after payment survive every later delivery.
    deliver_completed(&state, order_id, "pi_dana").await?;
    let cart = cart_service::get_cart(&state, &dana).await?.data.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 2);

    // A lost file is rebuilt under the same number on the next settlement.
    let number = invoice_service::get_invoice(&state, &dana, order_id)
        .await?
        .data
        .unwrap()
        .invoice_number;
    tokio::fs::remove_file(&path).await?;
    let settled = payment_service::settle_payment(&state, order_id, None).await?;
    assert!(!settled.newly_paid);
    assert_eq!(settled.invoice.invoice_number, number);
    assert!(tokio::fs::try_exists(&path).await?);

    // Overlapping settlements (webhook vs. client confirm) leave one invoice with its PDF.
    add(&state, &carol, lamp.id, 1).await?;
    let mut order_ids = Vec::new();
    for _ in 0..5 {
        let created = order_service::create_order(&state, &carol).await?.data.unwrap();
        order_ids.push(created.order.id);
    }
    for &id in &order_ids {
        let (a, b) = tokio::join!(
            payment_service::settle_payment(&state, id, Some(format!("pi_{}", id.simple()))),
            payment_service::settle_payment(&state, id, None),
        );
        let (a, b) = (a?, b?);
        assert_eq!(a.invoice.id, b.invoice.id);
        assert!(a.newly_paid != b.newly_paid, "exactly one settlement wins");

        assert_eq!(invoice_count(&state, id).await?, 1);
        let (path, _) = invoice_service::invoice_file(&state, &carol, id).await?;
        assert!(tokio::fs::read(&path).await?.starts_with(b"%PDF"));
    }

    let mut entries = tokio::fs::read_dir(&invoices_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        assert!(!name.ends_with(".tmp"), "staged file left behind: {name}");
    }

    Ok(())
}

async fn register(
    state: &AppState,
    name: &str,
    email: &str,
    role: Option<&str>,
) -> anyhow::Result<AuthUser> {
    let resp = auth_service::register_user(
        state,
        RegisterRequest {
            name: name.into(),
            email: email.into(),
            password: "password123".into(),
            role: role.map(str::to_string),
        },
    )
    .await?;
    let data = resp.data.expect("auth data");
    Ok(state.tokens.verify(&data.token)?)
}

fn product(name: &str, price: &str) -> CreateProductRequest {
    CreateProductRequest {
        name: name.into(),
        description: None,
        price: price.parse().unwrap(),
        stock: 50,
    }
}

async fn add(state: &AppState, user: &AuthUser, product_id: Uuid, quantity: i32) -> anyhow::Result<()> {
    cart_service::add_item(
        state,
        user,
        AddToCartRequest {
            product_id,
            quantity,
        },
    )
    .await?;
    Ok(())
}

async fn invoice_count(state: &AppState, order_id: Uuid) -> anyhow::Result<u64> {
    Ok(invoices::Entity::find()
        .filter(invoices::Column::OrderId.eq(order_id))
        .count(&state.orm)
        .await?)
}

async fn deliver_completed(state: &AppState, order_id: Uuid, intent: &str) -> anyhow::Result<()> {
    let payload = serde_json::json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": "cs_recovery",
                "metadata": { "order_id": order_id.to_string() },
                "payment_intent": intent,
                "payment_status": "paid",
            }
        }
    })
    .to_string();
    let header = state
        .webhooks
        .signature_header(payload.as_bytes(), Utc::now().timestamp());
    let ack = webhook_service::handle_stripe_webhook(state, Some(&header), payload.as_bytes()).await?;
    assert!(ack.received);
    Ok(())
}
