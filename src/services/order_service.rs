use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::orders::{OrderList, OrderWithItems, UpdateOrderStatusRequest},
    entity::{
        cart_items::{Column as CartItemCol, Entity as CartItems},
        carts::{Column as CartCol, Entity as Carts},
        enums::{OrderStatus, PaymentStatus},
        invoices::{Column as InvoiceCol, Entity as Invoices},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        payments::{Column as PaymentCol, Entity as Payments},
        products::{Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, OrderItem},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    state::AppState,
};

/// A cart line frozen at order time.
#[derive(Debug, Clone, PartialEq)]
pub struct LineSnapshot {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// Freezes current catalog prices into order lines and sums them.
pub fn snapshot_lines<'a, I>(lines: I) -> (Vec<LineSnapshot>, Decimal)
where
    I: IntoIterator<Item = (i32, &'a ProductModel)>,
{
    let snapshots: Vec<LineSnapshot> = lines
        .into_iter()
        .map(|(quantity, product)| LineSnapshot {
            product_id: product.id,
            product_name: product.name.clone(),
            quantity,
            unit_price: product.price,
        })
        .collect();
    let total = snapshots
        .iter()
        .map(|line| line.unit_price * Decimal::from(line.quantity))
        .sum();
    (snapshots, total)
}

/// Converts the caller's cart into a PENDING order. The cart is left untouched; it is
/// cleared once payment is confirmed.
pub async fn create_order(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;

    let cart = Carts::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .one(&txn)
        .await?
        .ok_or(AppError::EmptyCart)?;

    let rows = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .find_also_related(Products)
        .order_by_asc(CartItemCol::CreatedAt)
        .all(&txn)
        .await?;

    let (lines, total_amount) = snapshot_lines(
        rows.iter()
            .filter_map(|(item, product)| product.as_ref().map(|p| (item.quantity, p))),
    );
    if lines.is_empty() {
        return Err(AppError::EmptyCart);
    }

    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        status: Set(OrderStatus::Pending),
        payment_status: Set(PaymentStatus::PaymentPending),
        total_amount: Set(total_amount),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut items: Vec<OrderItem> = Vec::with_capacity(lines.len());
    for line in lines {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(Some(line.product_id)),
            product_name: Set(line.product_name),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
        items.push(item.into());
    }

    txn.commit().await?;

    tracing::info!(order_id = %order.id, user_id = %user.user_id, total = %order.total_amount, "order created");
    audit::record(
        state,
        Some(user.user_id),
        "order_create",
        "orders",
        serde_json::json!({ "order_id": order.id, "total_amount": order.total_amount }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order created",
        OrderWithItems {
            order: order.into(),
            items,
            payment: None,
            invoice: None,
        },
        Some(Meta::empty()),
    ))
}

/// Lists the caller's orders, or every order for admins, newest first by default.
pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all();
    if let Some(owner) = user.scope() {
        condition = condition.add(OrderCol::UserId.eq(owner));
    }
    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
        let status = OrderStatus::parse(status)
            .ok_or_else(|| AppError::BadRequest("Invalid order status".into()))?;
        condition = condition.add(OrderCol::Status.eq(status));
    }

    let mut finder = Orders::find().filter(condition);
    finder = match query.sort_order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Order::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = find_order_scoped(&state.orm, id, user.scope()).await?;

    let items = order_items(&state.orm, order.id)
        .await?
        .into_iter()
        .map(OrderItem::from)
        .collect();
    let payment = Payments::find()
        .filter(PaymentCol::OrderId.eq(order.id))
        .one(&state.orm)
        .await?
        .map(Into::into);
    let invoice = Invoices::find()
        .filter(InvoiceCol::OrderId.eq(order.id))
        .one(&state.orm)
        .await?
        .map(Into::into);

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order.into(),
            items,
            payment,
            invoice,
        },
        Some(Meta::empty()),
    ))
}

/// Admin override: any member of the status set is accepted regardless of the current one.
pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;
    if payload.status.trim().is_empty() {
        return Err(AppError::BadRequest("Status is required".into()));
    }
    let status = OrderStatus::parse(&payload.status)
        .ok_or_else(|| AppError::BadRequest("Invalid order status".into()))?;

    let existing = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound("Order"))?;
    let previous = existing.status;

    let mut active: OrderActive = existing.into();
    active.status = Set(status);
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&state.orm).await?;

    tracing::info!(order_id = %order.id, from = previous.as_str(), to = status.as_str(), "order status updated");
    audit::record(
        state,
        Some(user.user_id),
        "order_status_update",
        "orders",
        serde_json::json!({ "order_id": order.id, "from": previous.as_str(), "to": status.as_str() }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order updated",
        order.into(),
        Some(Meta::empty()),
    ))
}

/// Fetches an order, restricted to `owner` when given. Orders belonging to someone else
/// are reported exactly like missing ones.
pub async fn find_order_scoped<C>(conn: &C, id: Uuid, owner: Option<Uuid>) -> AppResult<OrderModel>
where
    C: ConnectionTrait,
{
    let mut condition = Condition::all().add(OrderCol::Id.eq(id));
    if let Some(owner) = owner {
        condition = condition.add(OrderCol::UserId.eq(owner));
    }
    Orders::find()
        .filter(condition)
        .one(conn)
        .await?
        .ok_or(AppError::NotFound("Order"))
}

pub async fn order_items<C>(conn: &C, order_id: Uuid) -> AppResult<Vec<OrderItemModel>>
where
    C: ConnectionTrait,
{
    Ok(OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .order_by_asc(OrderItemCol::CreatedAt)
        .all(conn)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product(name: &str, price: Decimal) -> ProductModel {
        ProductModel {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            price,
            stock: 100,
            created_at: Utc::now().into(),
        }
    }

    #[test]
    fn snapshot_totals_price_times_quantity() {
        let mug = product("Mug", dec!(10));
        let sticker = product("Sticker", dec!(5));

        let (lines, total) = snapshot_lines([(2, &mug), (1, &sticker)]);

        assert_eq!(total, dec!(25));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].unit_price, dec!(10));
        assert_eq!(lines[0].quantity, 2);
        assert_eq!(lines[1].product_name, "Sticker");
    }

    #[test]
    fn snapshot_of_nothing_is_empty() {
        let (lines, total) = snapshot_lines(std::iter::empty());
        assert!(lines.is_empty());
        assert_eq!(total, Decimal::ZERO);
    }

    #[test]
    fn snapshot_keeps_fractional_prices_exact() {
        let item = product("Pen", dec!(0.10));
        let (_, total) = snapshot_lines([(3, &item)]);
        assert_eq!(total, dec!(0.30));
    }
}
