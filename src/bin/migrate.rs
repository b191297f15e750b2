use storefront_api::db::{create_orm_conn, create_pool, run_migrations};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Only the database is needed here, not the full application config.
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL is not set"))?;
    let pool = create_pool(&database_url, 1).await?;
    run_migrations(&create_orm_conn(&pool)).await?;
    tracing::info!("migrations applied");
    Ok(())
}
