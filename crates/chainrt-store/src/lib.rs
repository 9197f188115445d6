//! sqlx-backed persistence for chainrt (§4.J, §6): the `kv`/`events`
//! store, job dispatch queue, chain CRUD + default seeding, and the
//! declared-data-model CRUD (backends/pools/models/provider configs/
//! remote hooks). One [`Store`] owns a single shared [`sqlx::SqlitePool`]
//! and hands every sub-store its own handle onto it.

pub mod backends;
pub mod chains;
pub mod dispatch;
pub mod error;
pub mod exec;
pub mod kv;
pub mod models;
pub mod pools;
pub mod providers;
pub mod remote_hooks;
pub mod row_cap;

pub use error::StoreError;

use backends::BackendStore;
use dispatch::DispatchQueue;
use exec::SqliteExec;
use models::ModelStore;
use pools::PoolStore;
use providers::ProviderConfigStore;
use remote_hooks::RemoteHookStore;
use sqlx::sqlite::SqlitePoolOptions;

/// A fully migrated handle onto every persistence concern, sharing one
/// connection pool. `chainrt-service` constructs exactly one of these at
/// startup and clones the `Arc` it holds this in into every handler.
pub struct Store {
    pub exec: SqliteExec,
    pub dispatch: DispatchQueue,
    pub backends: BackendStore,
    pub pools: PoolStore,
    pub models: ModelStore,
    pub providers: ProviderConfigStore,
    pub remote_hooks: RemoteHookStore,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        // `:memory:` URLs are per-connection private databases: a second
        // pooled connection would see an unmigrated, empty database. Cap
        // the pool at one connection so every query lands on the same one.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::DbError(format!("failed to connect to sqlite: {e}")))?;

        let exec = SqliteExec::from_pool(pool.clone()).await?;
        let dispatch = DispatchQueue::new(pool.clone()).await?;
        let backends = BackendStore::new(pool.clone()).await?;
        let pools = PoolStore::new(pool.clone()).await?;
        let models = ModelStore::new(pool.clone()).await?;
        let providers = ProviderConfigStore::new(pool.clone()).await?;
        let remote_hooks = RemoteHookStore::new(pool).await?;

        chains::seed_defaults(&exec).await?;

        Ok(Self {
            exec,
            dispatch,
            backends,
            pools,
            models,
            providers,
            remote_hooks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_seeds_default_chains() {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        let all = chains::list(&store.exec).await.unwrap();
        assert_eq!(all.len(), 3);
    }
}
