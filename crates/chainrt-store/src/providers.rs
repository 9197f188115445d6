//! Provider config CRUD (§3, §6 `providers/{type}/configure`): secrets
//! keyed by provider type. `api_key` is written and read back but never
//! logged — `ProviderConfig`'s own `Debug` impl redacts it, and nothing
//! here formats the struct through anything but that impl.

use crate::error::StoreError;
use crate::row_cap::check_row_cap;
use chainrt_core::model::ProviderConfig;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

pub struct ProviderConfigStore {
    pool: SqlitePool,
}

impl ProviderConfigStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS provider_configs (
                type TEXT PRIMARY KEY NOT NULL,
                api_key TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Upsert: configuring an already-configured provider type replaces
    /// its key rather than erroring, matching the PUT-like semantics of
    /// `providers/{type}/configure`.
    pub async fn upsert(&self, config: ProviderConfig) -> Result<ProviderConfig, StoreError> {
        let already_configured: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM provider_configs WHERE type = ?)")
                .bind(&config.provider_type)
                .fetch_one(&self.pool)
                .await?;
        if !already_configured {
            check_row_cap(&self.pool, "provider_configs").await?;
        }

        sqlx::query(
            "INSERT INTO provider_configs (type, api_key, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(type) DO UPDATE SET api_key = excluded.api_key, updated_at = excluded.updated_at",
        )
        .bind(&config.provider_type)
        .bind(&config.api_key)
        .bind(config.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(config)
    }

    pub async fn get(&self, provider_type: &str) -> Result<Option<ProviderConfig>, StoreError> {
        let row = sqlx::query("SELECT type, api_key, updated_at FROM provider_configs WHERE type = ?")
            .bind(provider_type)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_config).transpose()
    }

    /// Lists every configured provider type with its key still redacted
    /// by `ProviderConfig`'s `Debug`; callers building an API response
    /// should still only surface `provider_type`/`updated_at`.
    pub async fn list(&self) -> Result<Vec<ProviderConfig>, StoreError> {
        let rows = sqlx::query("SELECT type, api_key, updated_at FROM provider_configs")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_config).collect()
    }

    pub async fn delete(&self, provider_type: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM provider_configs WHERE type = ?")
            .bind(provider_type)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("provider config {provider_type}")));
        }
        Ok(())
    }
}

fn row_to_config(row: sqlx::sqlite::SqliteRow) -> Result<ProviderConfig, StoreError> {
    let updated_at_str: String = row.get("updated_at");
    Ok(ProviderConfig {
        provider_type: row.get("type"),
        api_key: row.get("api_key"),
        updated_at: DateTime::parse_from_rfc3339(&updated_at_str)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| StoreError::CodecError(e.to_string()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> ProviderConfigStore {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        ProviderConfigStore::new(pool).await.unwrap()
    }

    fn sample(provider_type: &str, key: &str) -> ProviderConfig {
        ProviderConfig {
            provider_type: provider_type.to_string(),
            api_key: key.to_string(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn configuring_twice_replaces_the_key() {
        let store = store().await;
        store.upsert(sample("openai", "sk-one")).await.unwrap();
        store.upsert(sample("openai", "sk-two")).await.unwrap();
        let got = store.get("openai").await.unwrap().unwrap();
        assert_eq!(got.api_key, "sk-two");
    }

    #[tokio::test]
    async fn debug_output_never_shows_the_key() {
        let config = sample("openai", "sk-secret-value");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret-value"));
    }

    #[tokio::test]
    async fn missing_provider_returns_none() {
        let store = store().await;
        assert!(store.get("gemini").await.unwrap().is_none());
    }
}
