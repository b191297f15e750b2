use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, RelationTrait, Set, SqlErr,
};
use uuid::Uuid;

use crate::{
    dto::cart::{AddToCartRequest, UpdateCartItemRequest},
    entity::{
        cart_items::{self, ActiveModel as CartItemActive, Column as CartItemCol, Entity as CartItems},
        carts::{self, ActiveModel as CartActive, Column as CartCol, Entity as Carts},
        products::{self, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Cart, CartItem, Product},
    response::{ApiResponse, Meta},
    state::AppState,
};

/// Returns the caller's cart, creating an empty one on first access.
pub async fn get_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<Cart>> {
    let cart = get_or_create_cart(state, user.user_id).await?;
    let cart = load_cart(&state.orm, cart).await?;
    Ok(ApiResponse::success("OK", cart, Some(Meta::empty())))
}

pub async fn add_item(
    state: &AppState,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartItem>> {
    if payload.quantity < 1 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let product = Products::find_by_id(payload.product_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound("Product"))?;

    let cart = get_or_create_cart(state, user.user_id).await?;

    // Read-then-write: two concurrent adds may lose one increment; the unique
    // (cart_id, product_id) index still guarantees a single line.
    let item = match find_line(&state.orm, cart.id, product.id).await? {
        Some(existing) => increment_line(&state.orm, existing, payload.quantity).await?,
        None => {
            let inserted = CartItemActive {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product.id),
                quantity: Set(payload.quantity),
                created_at: NotSet,
            }
            .insert(&state.orm)
            .await;

            match inserted {
                Ok(item) => item,
                Err(err) if is_unique_violation(&err) => {
                    let existing = find_line(&state.orm, cart.id, product.id)
                        .await?
                        .ok_or(AppError::OrmError(err))?;
                    increment_line(&state.orm, existing, payload.quantity).await?
                }
                Err(err) => return Err(err.into()),
            }
        }
    };

    tracing::debug!(cart_id = %cart.id, product_id = %product.id, quantity = item.quantity, "cart line updated");

    Ok(ApiResponse::success(
        "Item added to cart",
        cart_item_from_parts(item, product),
        None,
    ))
}

pub async fn update_item(
    state: &AppState,
    user: &AuthUser,
    item_id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<CartItem>> {
    let item = find_owned_line(&state.orm, user.user_id, item_id).await?;

    if payload.quantity <= 0 {
        CartItems::delete_by_id(item.id).exec(&state.orm).await?;
        return Ok(ApiResponse::message_only("Item removed from cart"));
    }

    let mut active: CartItemActive = item.into();
    active.quantity = Set(payload.quantity);
    let item = active.update(&state.orm).await?;

    let product = Products::find_by_id(item.product_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound("Product"))?;

    Ok(ApiResponse::success(
        "Cart item updated",
        cart_item_from_parts(item, product),
        None,
    ))
}

pub async fn remove_item(
    state: &AppState,
    user: &AuthUser,
    item_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let item = find_owned_line(&state.orm, user.user_id, item_id).await?;
    let result = CartItems::delete_by_id(item.id).exec(&state.orm).await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound("Cart item"));
    }
    Ok(ApiResponse::message_only("Item removed from cart"))
}

pub async fn clear_cart(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let removed = clear_cart_for_user(&state.orm, user.user_id).await?;
    tracing::debug!(user_id = %user.user_id, removed, "cart cleared");
    Ok(ApiResponse::message_only("Cart cleared"))
}

/// Deletes every line in the user's cart. A user without a cart is a no-op.
pub async fn clear_cart_for_user<C>(conn: &C, user_id: Uuid) -> Result<u64, DbErr>
where
    C: ConnectionTrait,
{
    let cart = Carts::find()
        .filter(CartCol::UserId.eq(user_id))
        .one(conn)
        .await?;
    let Some(cart) = cart else {
        return Ok(0);
    };
    let result = CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart.id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Atomic get-or-create keyed on the unique `carts.user_id`: a concurrent first access
/// loses the insert silently and both callers read the same row.
pub async fn get_or_create_cart(state: &AppState, user_id: Uuid) -> AppResult<carts::Model> {
    if let Some(cart) = Carts::find()
        .filter(CartCol::UserId.eq(user_id))
        .one(&state.orm)
        .await?
    {
        return Ok(cart);
    }

    Carts::insert(CartActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        created_at: NotSet,
    })
    .on_conflict(OnConflict::column(CartCol::UserId).do_nothing().to_owned())
    .exec_without_returning(&state.orm)
    .await?;

    Carts::find()
        .filter(CartCol::UserId.eq(user_id))
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("cart missing after upsert")))
}

async fn load_cart<C>(conn: &C, cart: carts::Model) -> AppResult<Cart>
where
    C: ConnectionTrait,
{
    let rows = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .find_also_related(Products)
        .order_by_asc(CartItemCol::CreatedAt)
        .all(conn)
        .await?;

    let items: Vec<CartItem> = rows
        .into_iter()
        .filter_map(|(item, product)| product.map(|p| cart_item_from_parts(item, p)))
        .collect();
    let total = cart_total(&items);

    Ok(Cart {
        id: cart.id,
        user_id: cart.user_id,
        items,
        total,
    })
}

async fn find_line<C>(
    conn: &C,
    cart_id: Uuid,
    product_id: Uuid,
) -> Result<Option<cart_items::Model>, DbErr>
where
    C: ConnectionTrait,
{
    CartItems::find()
        .filter(CartItemCol::CartId.eq(cart_id))
        .filter(CartItemCol::ProductId.eq(product_id))
        .one(conn)
        .await
}

async fn increment_line<C>(
    conn: &C,
    existing: cart_items::Model,
    by: i32,
) -> Result<cart_items::Model, DbErr>
where
    C: ConnectionTrait,
{
    let quantity = existing.quantity.saturating_add(by);
    let mut active: CartItemActive = existing.into();
    active.quantity = Set(quantity);
    active.update(conn).await
}

/// Looks up a line through its cart so another user's line reads as absent.
async fn find_owned_line<C>(conn: &C, user_id: Uuid, item_id: Uuid) -> AppResult<cart_items::Model>
where
    C: ConnectionTrait,
{
    CartItems::find_by_id(item_id)
        .join(
            sea_orm::JoinType::InnerJoin,
            cart_items::Relation::Carts.def(),
        )
        .filter(CartCol::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or(AppError::NotFound("Cart item"))
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn cart_item_from_parts(item: cart_items::Model, product: products::Model) -> CartItem {
    CartItem {
        id: item.id,
        product_id: item.product_id,
        quantity: item.quantity,
        product: Product::from(product),
    }
}

fn cart_total(items: &[CartItem]) -> Decimal {
    items
        .iter()
        .map(|item| item.product.price * Decimal::from(item.quantity))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn line(price: Decimal, quantity: i32) -> CartItem {
        let product_id = Uuid::new_v4();
        CartItem {
            id: Uuid::new_v4(),
            product_id,
            quantity,
            product: Product {
                id: product_id,
                name: "thing".into(),
                description: None,
                price,
                stock: 10,
                created_at: Utc::now(),
            },
        }
    }

    #[test]
    fn total_sums_price_times_quantity() {
        let items = vec![line(Decimal::new(1000, 2), 2), line(Decimal::new(500, 2), 1)];
        assert_eq!(cart_total(&items), Decimal::new(2500, 2));
        assert_eq!(cart_total(&[]), Decimal::ZERO);
    }
}
