use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use storefront_api::{
    db::{create_orm_conn, create_pool, run_migrations},
    entity::{
        enums::Role,
        products::{self, Entity as Products},
        users::{self, Entity as Users},
    },
    services::auth_service::hash_password,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL is not set"))?;
    let pool = create_pool(&database_url, 2).await?;
    let orm = create_orm_conn(&pool);
    run_migrations(&orm).await?;

    let admin_id = ensure_user(&orm, "Admin", "admin@example.com", "admin123", Role::Admin).await?;
    let user_id = ensure_user(&orm, "Demo User", "user@example.com", "user123", Role::User).await?;
    seed_products(&orm).await?;

    tracing::info!(%admin_id, %user_id, "seed completed");
    Ok(())
}

async fn ensure_user(
    orm: &DatabaseConnection,
    name: &str,
    email: &str,
    password: &str,
    role: Role,
) -> anyhow::Result<Uuid> {
    if let Some(existing) = Users::find()
        .filter(users::Column::Email.eq(email))
        .one(orm)
        .await?
    {
        tracing::info!(email, "user already present");
        return Ok(existing.id);
    }

    let password_hash = hash_password(password.to_string())
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let user = users::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        email: Set(email.to_string()),
        password_hash: Set(password_hash),
        role: Set(role),
        created_at: NotSet,
    }
    .insert(orm)
    .await?;

    tracing::info!(email, role = role.as_str(), "user created");
    Ok(user.id)
}

async fn seed_products(orm: &DatabaseConnection) -> anyhow::Result<()> {
    let catalog = [
        ("Canvas Tote", "Sturdy everyday bag", Decimal::new(2450, 2), 50),
        ("Ceramic Mug", "350 ml, dishwasher safe", Decimal::new(1200, 2), 100),
        ("Sticker Pack", "Ten vinyl stickers", Decimal::new(500, 2), 200),
        ("Notebook", "A5 dotted, 120 pages", Decimal::new(899, 2), 75),
    ];

    for (name, description, price, stock) in catalog {
        let exists = Products::find()
            .filter(products::Column::Name.eq(name))
            .one(orm)
            .await?
            .is_some();
        if exists {
            continue;
        }
        products::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(Some(description.to_string())),
            price: Set(price),
            stock: Set(stock),
            created_at: NotSet,
        }
        .insert(orm)
        .await?;
        tracing::info!(name, %price, "product seeded");
    }

    Ok(())
}
