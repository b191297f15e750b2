use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, JoinType, QueryFilter, QuerySelect, RelationTrait,
    Set, SqlErr,
};
use uuid::Uuid;

use crate::{
    audit,
    entity::{
        invoices::{self, ActiveModel as InvoiceActive, Column as InvoiceCol, Entity as Invoices},
        order_items, orders,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Invoice,
    pdf::{InvoiceDocument, InvoiceLine, render_invoice},
    response::ApiResponse,
    services::order_service,
    state::AppState,
};

/// Public URL prefix of generated invoices; mirrors the `invoices` folder under the public dir.
pub const INVOICE_URL_PREFIX: &str = "/invoices";

/// `INV-<UTC yyyymmddHHMMSS>-<first 8 hex chars of the order id>`
pub fn build_invoice_number(order_id: Uuid, at: DateTime<Utc>) -> String {
    let simple = order_id.simple().to_string();
    format!("INV-{}-{}", at.format("%Y%m%d%H%M%S"), &simple[..8])
}

/// Returns the order's invoice, generating it on first call. Safe to call repeatedly and
/// concurrently: the unique `order_id` index decides which generation wins, and only the
/// winner moves its staged PDF into place.
pub async fn ensure_invoice(state: &AppState, order: &orders::Model) -> AppResult<invoices::Model> {
    if let Some(existing) = find_for_order(state, order.id).await? {
        restore_missing_file(state, order, &existing).await?;
        return Ok(existing);
    }

    let items = order_service::order_items(&state.orm, order.id).await?;
    let issued_at = Utc::now();
    let invoice_number = build_invoice_number(order.id, issued_at);
    let document = invoice_document(state, order, &items, &invoice_number, issued_at);
    let staged = stage(state, &document).await?;

    let inserted = InvoiceActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        invoice_number: Set(invoice_number.clone()),
        pdf_url: Set(invoice_url(&invoice_number)),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await;

    match inserted {
        Ok(invoice) => {
            publish(&staged, &file_path(state, &invoice.pdf_url)?).await?;
            tracing::info!(order_id = %order.id, invoice_number = %invoice.invoice_number, "invoice generated");
            audit::record(
                state,
                Some(order.user_id),
                "invoice_generate",
                "invoices",
                serde_json::json!({ "order_id": order.id, "invoice_number": invoice.invoice_number }),
            )
            .await;
            Ok(invoice)
        }
        Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            tracing::info!(order_id = %order.id, "invoice created concurrently, reusing it");
            discard(&staged).await;
            find_for_order(state, order.id)
                .await?
                .ok_or(AppError::OrmError(err))
        }
        Err(err) => {
            discard(&staged).await;
            Err(err.into())
        }
    }
}

/// Renders the document and writes it below the public invoices folder, returning its URL.
pub async fn generate(state: &AppState, document: &InvoiceDocument) -> AppResult<String> {
    let staged = stage(state, document).await?;
    let url = invoice_url(&document.invoice_number);
    match file_path(state, &url) {
        Ok(target) => publish(&staged, &target).await?,
        Err(err) => {
            discard(&staged).await;
            return Err(err);
        }
    }
    Ok(url)
}

/// An invoice row whose file was lost (failed write, wiped disk) gets its PDF rebuilt
/// under the same number.
async fn restore_missing_file(
    state: &AppState,
    order: &orders::Model,
    invoice: &invoices::Model,
) -> AppResult<()> {
    let path = file_path(state, &invoice.pdf_url)?;
    if tokio::fs::try_exists(&path)
        .await
        .map_err(|e| AppError::Internal(e.into()))?
    {
        return Ok(());
    }

    tracing::warn!(order_id = %order.id, path = %path.display(), "invoice file missing, regenerating");
    let items = order_service::order_items(&state.orm, order.id).await?;
    let document = invoice_document(
        state,
        order,
        &items,
        &invoice.invoice_number,
        invoice.created_at.with_timezone(&Utc),
    );
    generate(state, &document).await?;
    Ok(())
}

/// Renders into a file private to this attempt; nothing public changes until `publish`.
async fn stage(state: &AppState, document: &InvoiceDocument) -> AppResult<PathBuf> {
    let doc = document.clone();
    let bytes = tokio::task::spawn_blocking(move || render_invoice(&doc))
        .await
        .map_err(|e| AppError::Internal(e.into()))?
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invoice render failed: {e}")))?;

    let dir = state.config.invoices_dir();
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;
    let staged = dir.join(format!(
        ".{}.{}.tmp",
        document.invoice_number,
        Uuid::new_v4().simple()
    ));
    tokio::fs::write(&staged, bytes)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;
    Ok(staged)
}

async fn publish(staged: &Path, target: &Path) -> AppResult<()> {
    if let Err(err) = tokio::fs::rename(staged, target).await {
        discard(staged).await;
        return Err(AppError::Internal(err.into()));
    }
    Ok(())
}

async fn discard(staged: &Path) {
    if let Err(err) = tokio::fs::remove_file(staged).await {
        tracing::warn!(error = %err, path = %staged.display(), "could not remove staged invoice");
    }
}

fn invoice_url(invoice_number: &str) -> String {
    format!("{INVOICE_URL_PREFIX}/{invoice_number}.pdf")
}

pub async fn get_invoice(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<ApiResponse<Invoice>> {
    let invoice = find_scoped(state, user, order_id).await?;
    Ok(ApiResponse::success("OK", invoice.into(), None))
}

/// Resolves the on-disk PDF for an order the caller may see.
pub async fn invoice_file(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<(PathBuf, String)> {
    let invoice = find_scoped(state, user, order_id).await?;
    let path = file_path(state, &invoice.pdf_url)?;
    let exists = tokio::fs::try_exists(&path)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;
    if !exists {
        tracing::warn!(order_id = %order_id, path = %path.display(), "invoice file missing");
        return Err(AppError::NotFound("Invoice"));
    }
    Ok((path, format!("{}.pdf", invoice.invoice_number)))
}

async fn find_for_order(state: &AppState, order_id: Uuid) -> AppResult<Option<invoices::Model>> {
    Ok(Invoices::find()
        .filter(InvoiceCol::OrderId.eq(order_id))
        .one(&state.orm)
        .await?)
}

async fn find_scoped(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<invoices::Model> {
    let mut finder = Invoices::find().filter(InvoiceCol::OrderId.eq(order_id));
    if let Some(owner) = user.scope() {
        finder = finder
            .join(JoinType::InnerJoin, invoices::Relation::Orders.def())
            .filter(orders::Column::UserId.eq(owner));
    }
    finder
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound("Invoice"))
}

fn invoice_document(
    state: &AppState,
    order: &orders::Model,
    items: &[order_items::Model],
    invoice_number: &str,
    issued_at: DateTime<Utc>,
) -> InvoiceDocument {
    InvoiceDocument {
        invoice_number: invoice_number.to_string(),
        order_id: order.id,
        issued_at,
        currency: state.config.stripe.currency.clone(),
        lines: items
            .iter()
            .map(|item| InvoiceLine {
                description: item.product_name.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect(),
        total: order.total_amount,
    }
}

fn file_path(state: &AppState, pdf_url: &str) -> AppResult<PathBuf> {
    resolve_public_path(&state.config.public_dir, pdf_url)
}

/// Maps a public URL onto the public dir, refusing anything that could escape it.
pub fn resolve_public_path(public_dir: &Path, url: &str) -> AppResult<PathBuf> {
    let relative = Path::new(url.trim_start_matches('/'));
    let safe = relative.components().count() > 0
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        tracing::warn!(url, "rejected invoice path");
        return Err(AppError::NotFound("Invoice"));
    }
    Ok(public_dir.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn invoice_number_format() {
        let order_id = Uuid::parse_str("9f1c2d3e-4b5a-6789-abcd-ef0123456789").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(build_invoice_number(order_id, at), "INV-20240307090501-9f1c2d3e");
    }

    #[test]
    fn public_paths_stay_inside_the_public_dir() {
        let root = Path::new("/srv/public");
        assert_eq!(
            resolve_public_path(root, "/invoices/INV-1.pdf").unwrap(),
            PathBuf::from("/srv/public/invoices/INV-1.pdf")
        );
        assert!(resolve_public_path(root, "/invoices/../../etc/passwd").is_err());
        assert!(resolve_public_path(root, "/").is_err());
        assert!(resolve_public_path(root, "").is_err());
    }
}
