//! Pool CRUD (§3): many-to-many association with backends and models via
//! join tables. Invariant 1: no two pools share a `name`.

use crate::error::StoreError;
use crate::row_cap::check_row_cap;
use chainrt_core::ids::{BackendId, ModelId, PoolId};
use chainrt_core::model::Pool;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;

pub struct PoolStore {
    pool: SqlitePool,
}

impl PoolStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pools (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL UNIQUE,
                purpose TEXT NOT NULL
            );",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pool_backends (
                pool_id TEXT NOT NULL,
                backend_id TEXT NOT NULL,
                PRIMARY KEY (pool_id, backend_id)
            );",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pool_models (
                pool_id TEXT NOT NULL,
                model_id TEXT NOT NULL,
                PRIMARY KEY (pool_id, model_id)
            );",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    pub async fn create(&self, def: Pool) -> Result<Pool, StoreError> {
        check_row_cap(&self.pool, "pools").await?;

        let mut tx = self.pool.begin().await?;

        let name_taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pools WHERE name = ?)")
            .bind(&def.name)
            .fetch_one(&mut *tx)
            .await?;
        if name_taken {
            tx.rollback().await?;
            return Err(StoreError::Constraint(format!("pool name {} already in use", def.name)));
        }

        sqlx::query("INSERT INTO pools (id, name, purpose) VALUES (?, ?, ?)")
            .bind(def.id.as_str())
            .bind(&def.name)
            .bind(&def.purpose)
            .execute(&mut *tx)
            .await?;

        for backend_id in &def.backend_ids {
            sqlx::query("INSERT INTO pool_backends (pool_id, backend_id) VALUES (?, ?)")
                .bind(def.id.as_str())
                .bind(backend_id.as_str())
                .execute(&mut *tx)
                .await?;
        }
        for model_id in &def.model_ids {
            sqlx::query("INSERT INTO pool_models (pool_id, model_id) VALUES (?, ?)")
                .bind(def.id.as_str())
                .bind(model_id.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(def)
    }

    pub async fn get(&self, id: &PoolId) -> Result<Option<Pool>, StoreError> {
        let row = sqlx::query("SELECT id, name, purpose FROM pools WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };

        let backend_rows = sqlx::query("SELECT backend_id FROM pool_backends WHERE pool_id = ?")
            .bind(id.as_str())
            .fetch_all(&self.pool)
            .await?;
        let model_rows = sqlx::query("SELECT model_id FROM pool_models WHERE pool_id = ?")
            .bind(id.as_str())
            .fetch_all(&self.pool)
            .await?;

        Ok(Some(Pool {
            id: PoolId::from_str(row.get::<String, _>("id")),
            name: row.get("name"),
            purpose: row.get("purpose"),
            backend_ids: backend_rows
                .into_iter()
                .map(|r| BackendId::from_str(r.get::<String, _>("backend_id")))
                .collect::<HashSet<_>>(),
            model_ids: model_rows
                .into_iter()
                .map(|r| ModelId::from_str(r.get::<String, _>("model_id")))
                .collect::<HashSet<_>>(),
        }))
    }

    pub async fn delete(&self, id: &PoolId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM pools WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound(format!("pool {id}")));
        }
        sqlx::query("DELETE FROM pool_backends WHERE pool_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM pool_models WHERE pool_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> PoolStore {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        PoolStore::new(pool).await.unwrap()
    }

    #[tokio::test]
    async fn duplicate_pool_name_is_rejected() {
        let store = store().await;
        store
            .create(Pool {
                id: PoolId::new(),
                name: "general".into(),
                purpose: "chat".into(),
                backend_ids: HashSet::new(),
                model_ids: HashSet::new(),
            })
            .await
            .unwrap();

        let err = store
            .create(Pool {
                id: PoolId::new(),
                name: "general".into(),
                purpose: "other".into(),
                backend_ids: HashSet::new(),
                model_ids: HashSet::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn associations_round_trip() {
        let store = store().await;
        let backend_id = BackendId::new();
        let model_id = ModelId::new();
        let pool_def = Pool {
            id: PoolId::new(),
            name: "p".into(),
            purpose: "chat".into(),
            backend_ids: [backend_id.clone()].into_iter().collect(),
            model_ids: [model_id.clone()].into_iter().collect(),
        };
        store.create(pool_def.clone()).await.unwrap();
        let got = store.get(&pool_def.id).await.unwrap().unwrap();
        assert!(got.backend_ids.contains(&backend_id));
        assert!(got.model_ids.contains(&model_id));
    }
}
