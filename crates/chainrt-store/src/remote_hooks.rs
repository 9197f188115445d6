//! Remote hook CRUD (§3, §6 `hooks/remote`) plus the `chainrt-store` side
//! of `RemoteHookLookup` (§4.F): the chain engine's hook registry depends
//! only on the trait in `chainrt_core::hooks`, this module supplies the
//! SQL-backed implementation.

use crate::error::StoreError;
use crate::row_cap::check_row_cap;
use async_trait::async_trait;
use chainrt_core::error::CoreError;
use chainrt_core::hooks::{RemoteHook, RemoteHookLookup};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

pub struct RemoteHookStore {
    pool: SqlitePool,
}

impl RemoteHookStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS remote_hooks (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL UNIQUE,
                endpoint_url TEXT NOT NULL,
                method TEXT NOT NULL,
                timeout_ms INTEGER NOT NULL,
                headers TEXT NOT NULL
            );",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    pub async fn create(&self, hook: RemoteHook) -> Result<RemoteHook, StoreError> {
        hook.validate().map_err(StoreError::Other)?;
        check_row_cap(&self.pool, "remote_hooks").await?;

        let name_taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM remote_hooks WHERE name = ?)")
            .bind(&hook.name)
            .fetch_one(&self.pool)
            .await?;
        if name_taken {
            return Err(StoreError::Constraint(format!("remote hook name {} already in use", hook.name)));
        }

        let headers_json = serde_json::to_string(&hook.headers)?;
        sqlx::query(
            "INSERT INTO remote_hooks (id, name, endpoint_url, method, timeout_ms, headers)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&hook.id)
        .bind(&hook.name)
        .bind(&hook.endpoint_url)
        .bind(&hook.method)
        .bind(hook.timeout_ms as i64)
        .bind(headers_json)
        .execute(&self.pool)
        .await?;
        Ok(hook)
    }

    pub async fn get(&self, id: &str) -> Result<Option<RemoteHook>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, endpoint_url, method, timeout_ms, headers FROM remote_hooks WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_hook).transpose()
    }

    pub async fn list(&self) -> Result<Vec<RemoteHook>, StoreError> {
        let rows = sqlx::query("SELECT id, name, endpoint_url, method, timeout_ms, headers FROM remote_hooks")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_hook).collect()
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM remote_hooks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("remote hook {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteHookLookup for RemoteHookStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<RemoteHook>, CoreError> {
        let row = sqlx::query(
            "SELECT id, name, endpoint_url, method, timeout_ms, headers FROM remote_hooks WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;
        row.map(row_to_hook).transpose().map_err(CoreError::from)
    }

    async fn list_all(&self) -> Result<Vec<RemoteHook>, CoreError> {
        self.list().await.map_err(CoreError::from)
    }
}

fn row_to_hook(row: sqlx::sqlite::SqliteRow) -> Result<RemoteHook, StoreError> {
    let headers_str: String = row.get("headers");
    let headers: HashMap<String, String> = serde_json::from_str(&headers_str)?;
    Ok(RemoteHook {
        id: row.get("id"),
        name: row.get("name"),
        endpoint_url: row.get("endpoint_url"),
        method: row.get("method"),
        timeout_ms: row.get::<i64, _>("timeout_ms") as u64,
        headers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> RemoteHookStore {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        RemoteHookStore::new(pool).await.unwrap()
    }

    fn sample(id: &str, name: &str) -> RemoteHook {
        RemoteHook {
            id: id.to_string(),
            name: name.to_string(),
            endpoint_url: "https://hooks.example.com/run".to_string(),
            method: "POST".to_string(),
            timeout_ms: 2000,
            headers: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn create_then_find_by_name() {
        let store = store().await;
        store.create(sample("h1", "review")).await.unwrap();
        let found = store.find_by_name("review").await.unwrap().unwrap();
        assert_eq!(found.id, "h1");
    }

    #[tokio::test]
    async fn relative_endpoint_is_rejected() {
        let store = store().await;
        let mut hook = sample("h1", "review");
        hook.endpoint_url = "/not-absolute".into();
        assert!(store.create(hook).await.is_err());
    }

    #[tokio::test]
    async fn list_all_reflects_inserted_hooks() {
        let store = store().await;
        store.create(sample("h1", "review")).await.unwrap();
        store.create(sample("h2", "summarize")).await.unwrap();
        let all = RemoteHookLookup::list_all(&store).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
