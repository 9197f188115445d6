//! Per-table row cap guard (§5 "Creation operations enforce a per-table
//! row cap"). A generic helper rather than one check per CRUD module —
//! every table this crate owns (backends, pools, models, provider
//! configs, remote hooks) calls it the same way before inserting.

use crate::error::StoreError;
use sqlx::SqlitePool;

/// Deliberately generous: this guards against unbounded growth from a
/// misbehaving operator script, not normal fleet sizes.
pub const MAX_ROWS_PER_TABLE: i64 = 10_000;

pub async fn check_row_cap(pool: &SqlitePool, table: &str) -> Result<(), StoreError> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await?;
    if count >= MAX_ROWS_PER_TABLE {
        return Err(StoreError::MaxRowsReached(table.to_string()));
    }
    Ok(())
}
