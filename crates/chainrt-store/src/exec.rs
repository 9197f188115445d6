//! The `Exec` transactional KV interface (§4.J) and its SQLite
//! implementation. Migrations run `CREATE TABLE IF NOT EXISTS` once at
//! construction, each wrapped in its own error-mapped step.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, Sqlite, SqlitePool, Transaction, sqlite::SqlitePoolOptions};

/// A single key/value row plus its last-write timestamp.
#[derive(Debug, Clone)]
pub struct KvRow {
    pub key: String,
    pub value: Vec<u8>,
}

/// Transactional access to the `kv` table. All reads/writes inside one
/// `Exec::begin()` call see a consistent view and commit atomically —
/// this is what gives the dispatch queue's lease move
/// (§4.H, invariant 2) its "never both pending and leased" guarantee.
#[async_trait]
pub trait KvTransaction: Send {
    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    async fn delete(&mut self, key: &str) -> Result<(), StoreError>;
    async fn list_prefix(&mut self, prefix: &str) -> Result<Vec<KvRow>, StoreError>;
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// The store-wide entry point: single-statement KV operations plus
/// `begin()` for multi-step transactional work (the dispatch queue's
/// assign/mark-done/mark-failed, chain `update`'s exists-check).
#[async_trait]
pub trait Exec: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<KvRow>, StoreError>;
    async fn begin(&self) -> Result<Box<dyn KvTransaction + '_>, StoreError>;
}

pub struct SqliteExec {
    pool: SqlitePool,
}

impl SqliteExec {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        // Same reasoning as `Store::connect`: `:memory:` databases are
        // private per connection, so a pool of more than one would
        // silently split reads and writes across disjoint databases.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::DbError(format!("failed to connect to sqlite: {e}")))?;
        Self::from_pool(pool).await
    }

    /// Wraps an already-open pool, running the same migrations. Used by
    /// [`crate::Store`] so the `kv`/`events` tables share a connection
    /// pool with every other CRUD store instead of opening a second one.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Exposes the pool to sibling modules (`dispatch`, `chains`,
    /// `backends`, ...) that need their own tables alongside `kv`.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .execute(pool)
        .await
        .map_err(|e| StoreError::DbError(format!("failed to create kv table: {e}")))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                op_name TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );",
        )
        .execute(pool)
        .await
        .map_err(|e| StoreError::DbError(format!("failed to create events table: {e}")))?;

        tracing::debug!("sqlite kv/event store migrations completed");
        Ok(())
    }

    /// Appends one row to the `events` table — the durable half of the
    /// activity tracker's `report_change` (§4.C), kept separate from `kv`
    /// because events are append-only and never looked up by key.
    pub async fn record_event(&self, op_name: &str, kind: &str, payload: &serde_json::Value) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO events (op_name, kind, payload, recorded_at) VALUES (?, ?, ?, ?)")
            .bind(op_name)
            .bind(kind)
            .bind(payload.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::DbError(format!("failed to record event: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Exec for SqliteExec {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>("value")))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<KvRow>, StoreError> {
        let like = format!("{}%", prefix.replace('%', "\\%"));
        let rows = sqlx::query("SELECT key, value FROM kv WHERE key LIKE ? ESCAPE '\\' ORDER BY key ASC")
            .bind(like)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| KvRow {
                key: r.get("key"),
                value: r.get("value"),
            })
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn KvTransaction + '_>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteKvTransaction { tx: Some(tx) }))
    }
}

struct SqliteKvTransaction<'c> {
    tx: Option<Transaction<'c, Sqlite>>,
}

impl<'c> SqliteKvTransaction<'c> {
    fn tx_mut(&mut self) -> &mut Transaction<'c, Sqlite> {
        self.tx.as_mut().expect("transaction used after commit/rollback")
    }
}

#[async_trait]
impl<'c> KvTransaction for SqliteKvTransaction<'c> {
    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&mut **self.tx_mut())
            .await?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>("value")))
    }

    async fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut **self.tx_mut())
        .await?;
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&mut **self.tx_mut())
            .await?;
        Ok(())
    }

    async fn list_prefix(&mut self, prefix: &str) -> Result<Vec<KvRow>, StoreError> {
        let like = format!("{}%", prefix.replace('%', "\\%"));
        let rows = sqlx::query("SELECT key, value FROM kv WHERE key LIKE ? ESCAPE '\\' ORDER BY key ASC")
            .bind(like)
            .fetch_all(&mut **self.tx_mut())
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| KvRow {
                key: r.get("key"),
                value: r.get("value"),
            })
            .collect())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let tx = self.tx.take().expect("transaction used after commit/rollback");
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        let tx = self.tx.take().expect("transaction used after commit/rollback");
        tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteExec {
        SqliteExec::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn set_then_get_returns_identical_bytes() {
        let store = memory_store().await;
        store.set("chain:x", b"hello").await.unwrap();
        let got = store.get("chain:x").await.unwrap();
        assert_eq!(got, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn delete_removes_the_key() {
        let store = memory_store().await;
        store.set("k", b"v").await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_prefix_only_returns_matching_keys() {
        let store = memory_store().await;
        store.set("chain:a", b"1").await.unwrap();
        store.set("chain:b", b"2").await.unwrap();
        store.set("job:a", b"3").await.unwrap();
        let rows = store.list_prefix("chain:").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.key.starts_with("chain:")));
    }

    #[tokio::test]
    async fn transaction_rollback_discards_writes() {
        let store = memory_store().await;
        let mut tx = store.begin().await.unwrap();
        tx.set("k", b"v").await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn transaction_commit_persists_writes() {
        let store = memory_store().await;
        let mut tx = store.begin().await.unwrap();
        tx.set("k", b"v").await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }
}
