//! Backend CRUD (§3, §6): thin validation + persistence over a
//! relational `backends` table, guarded by the per-table row cap (§5).

use crate::error::StoreError;
use crate::row_cap::check_row_cap;
use chainrt_core::ids::BackendId;
use chainrt_core::model::{Backend, BackendType};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

pub struct BackendStore {
    pool: SqlitePool,
}

impl BackendStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS backends (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                base_url TEXT NOT NULL,
                type TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    pub async fn create(&self, backend: Backend) -> Result<Backend, StoreError> {
        backend.validate().map_err(StoreError::Other)?;
        check_row_cap(&self.pool, "backends").await?;

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM backends WHERE id = ?)")
            .bind(backend.id.as_str())
            .fetch_one(&self.pool)
            .await?;
        if exists {
            return Err(StoreError::AlreadyExists(format!("backend {}", backend.id)));
        }

        sqlx::query("INSERT INTO backends (id, name, base_url, type, created_at) VALUES (?, ?, ?, ?, ?)")
            .bind(backend.id.as_str())
            .bind(&backend.name)
            .bind(&backend.base_url)
            .bind(backend_type_str(backend.backend_type))
            .bind(backend.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(backend)
    }

    pub async fn get(&self, id: &BackendId) -> Result<Option<Backend>, StoreError> {
        let row = sqlx::query("SELECT id, name, base_url, type, created_at FROM backends WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_backend).transpose()
    }

    pub async fn list(&self) -> Result<Vec<Backend>, StoreError> {
        let rows = sqlx::query("SELECT id, name, base_url, type, created_at FROM backends ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_backend).collect()
    }

    pub async fn delete(&self, id: &BackendId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM backends WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("backend {id}")));
        }
        Ok(())
    }
}

fn backend_type_str(t: BackendType) -> &'static str {
    match t {
        BackendType::Ollama => "ollama",
        BackendType::Vllm => "vllm",
    }
}

fn row_to_backend(row: sqlx::sqlite::SqliteRow) -> Result<Backend, StoreError> {
    let id: String = row.get("id");
    let type_str: String = row.get("type");
    let created_at_str: String = row.get("created_at");
    Ok(Backend {
        id: BackendId::from_str(id),
        name: row.get("name"),
        base_url: row.get("base_url"),
        backend_type: match type_str.as_str() {
            "ollama" => BackendType::Ollama,
            "vllm" => BackendType::Vllm,
            other => return Err(StoreError::CodecError(format!("unknown backend type {other}"))),
        },
        created_at: parse_rfc3339(&created_at_str)?,
    })
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::CodecError(e.to_string()))
}
