//! Model CRUD (§3): declared models, with capabilities stored as a JSON
//! array column (refined at runtime by the reconciler, never mutated
//! here — this table only holds the operator's declaration).

use crate::error::StoreError;
use crate::row_cap::check_row_cap;
use chainrt_core::ids::ModelId;
use chainrt_core::model::{Capability, Model};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;

pub struct ModelStore {
    pool: SqlitePool,
}

impl ModelStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS models (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                context_length INTEGER,
                capabilities TEXT NOT NULL
            );",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    pub async fn create(&self, model: Model) -> Result<Model, StoreError> {
        check_row_cap(&self.pool, "models").await?;

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM models WHERE id = ?)")
            .bind(model.id.as_str())
            .fetch_one(&self.pool)
            .await?;
        if exists {
            return Err(StoreError::AlreadyExists(format!("model {}", model.id)));
        }

        let caps_json = serde_json::to_string(&model.capabilities)?;
        sqlx::query("INSERT INTO models (id, name, context_length, capabilities) VALUES (?, ?, ?, ?)")
            .bind(model.id.as_str())
            .bind(&model.name)
            .bind(model.context_length.map(|c| c as i64))
            .bind(caps_json)
            .execute(&self.pool)
            .await?;
        Ok(model)
    }

    pub async fn get(&self, id: &ModelId) -> Result<Option<Model>, StoreError> {
        let row = sqlx::query("SELECT id, name, context_length, capabilities FROM models WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_model).transpose()
    }

    pub async fn list(&self) -> Result<Vec<Model>, StoreError> {
        let rows = sqlx::query("SELECT id, name, context_length, capabilities FROM models")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_model).collect()
    }

    pub async fn delete(&self, id: &ModelId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM models WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("model {id}")));
        }
        Ok(())
    }
}

fn row_to_model(row: sqlx::sqlite::SqliteRow) -> Result<Model, StoreError> {
    let caps_str: String = row.get("capabilities");
    let capabilities: HashSet<Capability> = serde_json::from_str(&caps_str)?;
    Ok(Model {
        id: ModelId::from_str(row.get::<String, _>("id")),
        name: row.get("name"),
        context_length: row.get::<Option<i64>, _>("context_length").map(|c| c as u64),
        capabilities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> ModelStore {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        ModelStore::new(pool).await.unwrap()
    }

    #[tokio::test]
    async fn create_then_get_round_trips_capabilities() {
        let store = store().await;
        let model = Model {
            id: ModelId::from_str("m1"),
            name: "llama3".into(),
            context_length: Some(8192),
            capabilities: [Capability::Chat, Capability::Prompt].into_iter().collect(),
        };
        store.create(model.clone()).await.unwrap();
        let got = store.get(&model.id).await.unwrap().unwrap();
        assert_eq!(got.capabilities, model.capabilities);
        assert_eq!(got.context_length, Some(8192));
    }
}
