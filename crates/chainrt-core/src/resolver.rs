//! LLM Resolver (§4.E): matches a resolve request against the latest
//! snapshot and returns a concrete backend+model pair. Unchanged semantics
//! from spec.md; the "typed client" it returns is a [`crate::client::BackendClient`]
//! bound to `(base_url, model_name, backend_type)` behind the
//! `reqwest-client` feature — callers without that feature still get the
//! resolved target and can build their own client.

use crate::error::ResolverError;
use crate::ids::BackendId;
use crate::model::{BackendType, Capability};
use crate::snapshot::{LlmStateSnapshot, SnapshotPublisher};
use rand::seq::SliceRandom;
use std::sync::Arc;

/// Selection strategy among multiple satisfactory candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Randomly,
    LowestLatency,
    RoundRobin,
}

#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    pub model_names: Vec<String>,
    pub provider_types: Vec<String>,
    pub context_length: Option<u64>,
    pub capability: Option<Capability>,
}

/// The resolved, concrete backend+model the engine should dispatch to.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub backend_id: BackendId,
    pub base_url: String,
    pub model_name: String,
    pub backend_type: BackendType,
    pub context_length: Option<u64>,
}

/// Reads the latest snapshot and picks a candidate per `ResolveRequest`.
/// Stateful only in the round-robin cursor; everything else is a pure
/// function of the snapshot it's handed.
pub struct Resolver {
    snapshot: Arc<SnapshotPublisher>,
    round_robin_cursor: std::sync::atomic::AtomicUsize,
}

impl Resolver {
    pub fn new(snapshot: Arc<SnapshotPublisher>) -> Self {
        Self {
            snapshot,
            round_robin_cursor: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn resolve(
        &self,
        request: &ResolveRequest,
        strategy: Strategy,
    ) -> Result<ResolvedTarget, ResolverError> {
        let snapshot = self.snapshot.load();
        resolve_against(&snapshot, request, strategy, &self.round_robin_cursor)
    }
}

fn resolve_against(
    snapshot: &LlmStateSnapshot,
    request: &ResolveRequest,
    strategy: Strategy,
    round_robin_cursor: &std::sync::atomic::AtomicUsize,
) -> Result<ResolvedTarget, ResolverError> {
    if snapshot.backends.is_empty() {
        return Err(ResolverError::NoAvailableModels);
    }

    let mut candidates: Vec<ResolvedTarget> = Vec::new();
    for entry in snapshot.backends.values() {
        if !request.provider_types.is_empty() {
            let matches_provider = request
                .provider_types
                .iter()
                .any(|p| backend_type_name(entry.backend.backend_type) == p.to_lowercase());
            if !matches_provider {
                continue;
            }
        }

        for pulled in &entry.pulled_models {
            if !request.model_names.is_empty()
                && !request.model_names.iter().any(|n| n == &pulled.name)
            {
                continue;
            }

            if let Some(cap) = request.capability {
                if !pulled.capabilities.contains(&cap) {
                    continue;
                }
            }

            if let Some(requested_len) = request.context_length {
                match pulled.context_length {
                    Some(observed) if observed >= requested_len => {}
                    _ => continue,
                }
            }

            candidates.push(ResolvedTarget {
                backend_id: entry.backend.id.clone(),
                base_url: entry.backend.base_url.clone(),
                model_name: pulled.name.clone(),
                backend_type: entry.backend.backend_type,
                context_length: pulled.context_length,
            });
        }
    }

    if candidates.is_empty() {
        return Err(ResolverError::NoSatisfactoryModel);
    }

    let chosen = match strategy {
        Strategy::Randomly => candidates
            .choose(&mut rand::thread_rng())
            .cloned()
            .expect("candidates is non-empty"),
        Strategy::LowestLatency => {
            // No latency telemetry is modeled in the snapshot; fall back to
            // the first candidate, which is deterministic and documented
            // here rather than silently picked.
            candidates.into_iter().next().expect("non-empty")
        }
        Strategy::RoundRobin => {
            let idx = round_robin_cursor.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % candidates.len();
            candidates.swap_remove(idx)
        }
    };

    Ok(chosen)
}

fn backend_type_name(t: BackendType) -> String {
    match t {
        BackendType::Ollama => "ollama".to_string(),
        BackendType::Vllm => "vllm".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Backend, BackendType};
    use crate::snapshot::{BackendSnapshotEntry, PulledModel};
    use std::collections::HashSet;

    fn snapshot_with_one_chat_model(context_length: u64) -> LlmStateSnapshot {
        let mut snap = LlmStateSnapshot::default();
        let backend = Backend {
            id: BackendId::from_str("b1"),
            name: "b1".into(),
            base_url: "http://localhost:11434".into(),
            backend_type: BackendType::Ollama,
            created_at: chrono::Utc::now(),
        };
        let mut caps = HashSet::new();
        caps.insert(Capability::Chat);
        snap.backends.insert(
            backend.id.clone(),
            BackendSnapshotEntry {
                backend,
                declared_models: vec![],
                pulled_models: vec![PulledModel {
                    name: "llama3".into(),
                    context_length: Some(context_length),
                    capabilities: caps,
                }],
                error: None,
            },
        );
        snap
    }

    #[test]
    fn empty_snapshot_is_no_available_models() {
        let snap = LlmStateSnapshot::default();
        let cursor = std::sync::atomic::AtomicUsize::new(0);
        let err = resolve_against(&snap, &ResolveRequest::default(), Strategy::Randomly, &cursor).unwrap_err();
        assert_eq!(err, ResolverError::NoAvailableModels);
    }

    #[test]
    fn context_length_filter_excludes_all_candidates() {
        let snap = snapshot_with_one_chat_model(4096);
        let request = ResolveRequest {
            context_length: Some(1_000_000),
            capability: Some(Capability::Chat),
            ..Default::default()
        };
        let cursor = std::sync::atomic::AtomicUsize::new(0);
        let err = resolve_against(&snap, &request, Strategy::Randomly, &cursor).unwrap_err();
        assert_eq!(err, ResolverError::NoSatisfactoryModel);
    }

    #[test]
    fn matching_request_resolves_to_the_candidate() {
        let snap = snapshot_with_one_chat_model(8192);
        let request = ResolveRequest {
            capability: Some(Capability::Chat),
            ..Default::default()
        };
        let cursor = std::sync::atomic::AtomicUsize::new(0);
        let resolved = resolve_against(&snap, &request, Strategy::Randomly, &cursor).unwrap();
        assert_eq!(resolved.model_name, "llama3");
    }

    #[test]
    fn round_robin_cycles_through_candidates() {
        let mut snap = LlmStateSnapshot::default();
        for i in 0..3 {
            let backend = Backend {
                id: BackendId::from_str(format!("b{i}")),
                name: format!("b{i}"),
                base_url: format!("http://host{i}"),
                backend_type: BackendType::Ollama,
                created_at: chrono::Utc::now(),
            };
            let mut caps = HashSet::new();
            caps.insert(Capability::Chat);
            snap.backends.insert(
                backend.id.clone(),
                BackendSnapshotEntry {
                    backend,
                    declared_models: vec![],
                    pulled_models: vec![PulledModel {
                        name: "m".into(),
                        context_length: Some(4096),
                        capabilities: caps,
                    }],
                    error: None,
                },
            );
        }
        let request = ResolveRequest {
            capability: Some(Capability::Chat),
            ..Default::default()
        };
        let cursor = std::sync::atomic::AtomicUsize::new(0);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            let resolved = resolve_against(&snap, &request, Strategy::RoundRobin, &cursor).unwrap();
            seen.insert(resolved.backend_id.as_str().to_string());
        }
        assert_eq!(seen.len(), 3, "round robin should visit every backend once across 3 calls");
    }
}
