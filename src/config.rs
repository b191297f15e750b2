use std::{env, path::PathBuf};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_expires_in_secs: i64,
    pub stripe: StripeConfig,
    pub public_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    pub webhook_tolerance_secs: i64,
    pub success_url: String,
    pub cancel_url: String,
    pub currency: String,
}

pub const DEFAULT_JWT_EXPIRES_IN_SECS: i64 = 60 * 60 * 24 * 7;
/// Ten years; anything longer is treated as a typo.
pub const MAX_JWT_EXPIRES_IN_SECS: i64 = 60 * 60 * 24 * 3650;

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so it can be exercised without
    /// touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| lookup(key).with_context(|| format!("{key} is not set"));
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        let database_url = required("DATABASE_URL")?;
        let db_max_connections = lookup("DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(10);
        let host = or_default("APP_HOST", "127.0.0.1");
        let port = lookup("APP_PORT")
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let jwt_secret = required("JWT_SECRET")?;
        let jwt_expires_in_secs = lookup("JWT_EXPIRES_IN")
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| (1..=MAX_JWT_EXPIRES_IN_SECS).contains(v))
            .unwrap_or(DEFAULT_JWT_EXPIRES_IN_SECS);

        let stripe = StripeConfig {
            secret_key: required("STRIPE_SECRET_KEY")?,
            webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            api_base: or_default("STRIPE_API_BASE", "https://api.stripe.com"),
            webhook_tolerance_secs: lookup("STRIPE_WEBHOOK_TOLERANCE_SECS")
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(300),
            success_url: or_default("CHECKOUT_SUCCESS_URL", "http://localhost:8501?success=true"),
            cancel_url: or_default("CHECKOUT_CANCEL_URL", "http://localhost:8501?canceled=true"),
            currency: or_default("CURRENCY", "usd"),
        };

        Ok(Self {
            database_url,
            db_max_connections,
            host,
            port,
            jwt_secret,
            jwt_expires_in_secs,
            stripe,
            public_dir: PathBuf::from(or_default("PUBLIC_DIR", "public")),
        })
    }

    pub fn invoices_dir(&self) -> PathBuf {
        self.public_dir.join("invoices")
    }
}
