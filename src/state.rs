use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::{DbPool, OrmConn, create_orm_conn},
    payments::{PaymentGateway, webhook::WebhookVerifier},
    services::token_service::TokenService,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub config: Arc<AppConfig>,
    pub tokens: TokenService,
    pub payments: Arc<dyn PaymentGateway>,
    pub webhooks: WebhookVerifier,
}

impl AppState {
    pub fn new(pool: DbPool, config: AppConfig, payments: Arc<dyn PaymentGateway>) -> Self {
        let orm = create_orm_conn(&pool);
        let tokens = TokenService::from_config(&config);
        let webhooks = WebhookVerifier::from_config(&config.stripe);
        Self {
            pool,
            orm,
            config: Arc::new(config),
            tokens,
            payments,
            webhooks,
        }
    }
}
