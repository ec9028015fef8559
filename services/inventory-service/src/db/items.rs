//! Read and seed paths for inventory items. Quantity mutations live in the
//! serialized reservation engine only.

use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::domain::InventoryItem;
use crate::error::{AppError, AppResult};

pub(crate) fn map_item(row: &PgRow) -> Result<InventoryItem, sqlx::Error> {
    Ok(InventoryItem {
        id: row.try_get("id")?,
        item_id: row.try_get("item_id")?,
        total_quantity: row.try_get("total_quantity")?,
        available_quantity: row.try_get("available_quantity")?,
        reserved_quantity: row.try_get("reserved_quantity")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const ITEM_COLUMNS: &str =
    "id, item_id, total_quantity, available_quantity, reserved_quantity, created_at, updated_at";

pub async fn list_items(pool: &PgPool) -> AppResult<Vec<InventoryItem>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM inventory_items ORDER BY item_id",
        ITEM_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| map_item(row).map_err(AppError::from))
        .collect()
}

pub async fn find_item(pool: &PgPool, item_id: &str) -> AppResult<Option<InventoryItem>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM inventory_items WHERE item_id = $1",
        ITEM_COLUMNS
    ))
    .bind(item_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(map_item).transpose().map_err(AppError::from)
}

/// Seed a stock line. Idempotent on the business key: an existing item is
/// returned unchanged.
pub async fn create_item(pool: &PgPool, item_id: &str, total_quantity: i32) -> AppResult<InventoryItem> {
    sqlx::query(
        r#"
        INSERT INTO inventory_items (
            id, item_id, total_quantity, available_quantity, reserved_quantity
        ) VALUES ($1, $2, $3, $3, 0)
        ON CONFLICT (item_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(item_id)
    .bind(total_quantity)
    .execute(pool)
    .await?;

    find_item(pool, item_id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("Item {} missing after insert", item_id)))
}
