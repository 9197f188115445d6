//! Backend state reconciler (§4.D). Polled by a [`crate::routine::RoutineGroup`]
//! loop over every declared backend, fetches each backend's model list,
//! synthesizes observed capability flags, and publishes an
//! [`crate::snapshot::LlmStateSnapshot`] atomically.
//!
//! Builds an HTTP client, checks `response.status().is_success()`, and
//! maps non-2xx to a typed error — see `client::list_models`.

use crate::client::{self, PulledModelInfo};
use crate::model::{Backend, Capability, Model};
use crate::snapshot::{BackendSnapshotEntry, LlmStateSnapshot, PulledModel, SnapshotPublisher};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Declares which models/pools a backend is expected to serve — the
/// operator-declared half of the reconciliation (§3 "Declared").
#[derive(Debug, Clone, Default)]
pub struct DeclaredBackendConfig {
    pub models: Vec<Model>,
}

/// Synthesizes capability flags for an observed model from its metadata.
/// Every backend type is assumed capable of chat+prompt+stream; embed is
/// granted only to names containing "embed", the simplest signal
/// available without a backend-specific metadata field for it.
fn synthesize_capabilities(model_name: &str) -> HashSet<Capability> {
    let mut caps = HashSet::new();
    caps.insert(Capability::Chat);
    caps.insert(Capability::Prompt);
    caps.insert(Capability::Stream);
    if model_name.to_lowercase().contains("embed") {
        caps.insert(Capability::Embed);
    }
    caps
}

fn to_pulled_model(info: PulledModelInfo) -> PulledModel {
    PulledModel {
        capabilities: synthesize_capabilities(&info.name),
        name: info.name,
        context_length: info.context_length,
    }
}

/// Reconciles a single backend: fetches its model list, builds a fresh
/// snapshot entry. On HTTP failure, `prior` (the entry's current value,
/// if any) is carried forward with only `error` populated — the
/// reconciler never discards known-good data on a transient failure.
pub async fn reconcile_backend(
    http: &reqwest::Client,
    backend: &Backend,
    declared: &DeclaredBackendConfig,
    prior: Option<&BackendSnapshotEntry>,
) -> BackendSnapshotEntry {
    match client::list_models(http, &backend.base_url, backend.backend_type).await {
        Ok(models) => BackendSnapshotEntry {
            backend: backend.clone(),
            declared_models: declared.models.clone(),
            pulled_models: models.into_iter().map(to_pulled_model).collect(),
            error: None,
        },
        Err(err) => {
            tracing::warn!(backend = %backend.id, error = %err, "reconcile: backend poll failed, keeping last-known state");
            BackendSnapshotEntry {
                backend: backend.clone(),
                declared_models: declared.models.clone(),
                pulled_models: prior.map(|p| p.pulled_models.clone()).unwrap_or_default(),
                error: Some(err.to_string()),
            }
        }
    }
}

/// Runs one reconciliation tick across every declared backend and
/// publishes the merged map atomically. Intended as the `op` registered
/// per-backend (or fanned across all backends) with the routine group.
pub async fn reconcile_tick(
    http: &reqwest::Client,
    backends: &[(Backend, DeclaredBackendConfig)],
    publisher: &Arc<SnapshotPublisher>,
) {
    let prior = publisher.load();
    let mut merged: HashMap<crate::ids::BackendId, BackendSnapshotEntry> = HashMap::new();

    for (backend, declared) in backends {
        let prior_entry = prior.backends.get(&backend.id);
        let entry = reconcile_backend(http, backend, declared, prior_entry).await;
        merged.insert(backend.id.clone(), entry);
    }

    publisher.publish(LlmStateSnapshot {
        backends: merged,
        published_at: None,
    });
}
