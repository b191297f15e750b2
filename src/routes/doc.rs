use utoipa::{
    Modify, OpenApi,
    openapi::{
        self, OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{AuthResponse, LoginRequest, RegisterRequest},
        cart::{AddToCartRequest, UpdateCartItemRequest},
        orders::{OrderList, OrderWithItems, UpdateOrderStatusRequest},
        payments::{
            CheckoutSessionResponse, ConfirmPaymentRequest, ConfirmPaymentResponse,
            CreatePaymentIntentRequest, WebhookAck,
        },
        products::{CreateProductRequest, ProductList, UpdateProductRequest},
    },
    entity::enums::{OrderStatus, PaymentStatus, Role},
    models::{Cart, CartItem, Invoice, Order, OrderItem, Payment, Product, User},
    response::{ApiResponse, Meta},
    routes::{
        auth, cart, health, invoices, orders, params, payments, products as product_routes,
        webhooks,
    },
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::register,
        auth::login,
        auth::me,
        product_routes::list_products,
        product_routes::get_product,
        product_routes::create_product,
        product_routes::update_product,
        product_routes::delete_product,
        cart::get_cart,
        cart::add_item,
        cart::update_item,
        cart::remove_item,
        cart::clear_cart,
        orders::create_order,
        orders::list_orders,
        orders::get_order,
        orders::update_order_status,
        payments::create_payment_intent,
        payments::confirm_payment,
        payments::get_payment_status,
        invoices::get_invoice,
        invoices::download_invoice,
        webhooks::stripe_webhook
    ),
    components(
        schemas(
            Role,
            OrderStatus,
            PaymentStatus,
            User,
            Product,
            Cart,
            CartItem,
            Order,
            OrderItem,
            Payment,
            Invoice,
            RegisterRequest,
            LoginRequest,
            AuthResponse,
            CreateProductRequest,
            UpdateProductRequest,
            ProductList,
            AddToCartRequest,
            UpdateCartItemRequest,
            UpdateOrderStatusRequest,
            OrderList,
            OrderWithItems,
            CreatePaymentIntentRequest,
            CheckoutSessionResponse,
            ConfirmPaymentRequest,
            ConfirmPaymentResponse,
            WebhookAck,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            Meta,
            ApiResponse<User>,
            ApiResponse<AuthResponse>,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<Cart>,
            ApiResponse<CartItem>,
            ApiResponse<Order>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<Payment>,
            ApiResponse<CheckoutSessionResponse>,
            ApiResponse<ConfirmPaymentResponse>,
            ApiResponse<Invoice>
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Registration, login and profile"),
        (name = "Products", description = "Catalog endpoints"),
        (name = "Cart", description = "Shopping cart endpoints"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Payments", description = "Hosted checkout and payment status"),
        (name = "Invoices", description = "Invoice metadata and PDF download"),
        (name = "Webhooks", description = "Payment provider callbacks"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_routes_are_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/api/auth/me",
            "/api/cart/items/{id}",
            "/api/orders/{id}/status",
            "/api/payments/create-intent",
            "/api/invoices/{order_id}/download",
            "/api/webhooks/stripe",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
