//! The LLM-State snapshot (§3, §4.D): an immutable, atomically published
//! view of observed backend capability state. Readers take the
//! most-recent snapshot via an `ArcSwap`, never a partial one.

use crate::ids::BackendId;
use crate::model::{Backend, Capability, Model};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// A model actually observed on a backend, with context length and
/// capability flags as reported by the backend itself (not the operator's
/// declaration).
#[derive(Debug, Clone)]
pub struct PulledModel {
    pub name: String,
    pub context_length: Option<u64>,
    pub capabilities: std::collections::HashSet<Capability>,
}

/// One backend's entry in the snapshot. On reconciliation error the entry
/// retains its prior `declared_models`/`pulled_models` and only `error`
/// changes — the reconciler never discards known-good data on a
/// transient failure.
#[derive(Debug, Clone)]
pub struct BackendSnapshotEntry {
    pub backend: Backend,
    pub declared_models: Vec<Model>,
    pub pulled_models: Vec<PulledModel>,
    pub error: Option<String>,
}

/// The whole mapping, published as a single immutable value.
#[derive(Debug, Clone, Default)]
pub struct LlmStateSnapshot {
    pub backends: HashMap<BackendId, BackendSnapshotEntry>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Atomic pointer swap publication point (§4.D ordering guarantee, §9
/// design note). Readers call `load()` and get a whole, consistent map;
/// writers call `publish()` with a freshly built snapshot.
///
/// Invariant 5: snapshot writes are monotonic by publish timestamp — a
/// `publish()` with an older `published_at` than the current snapshot is
/// silently dropped rather than regressing readers.
#[derive(Default)]
pub struct SnapshotPublisher {
    current: ArcSwap<LlmStateSnapshot>,
}

impl SnapshotPublisher {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(LlmStateSnapshot::default()),
        }
    }

    pub fn load(&self) -> Arc<LlmStateSnapshot> {
        self.current.load_full()
    }

    pub fn publish(&self, mut snapshot: LlmStateSnapshot) {
        let now = Utc::now();
        snapshot.published_at = Some(now);

        let prior = self.current.load();
        if let Some(prior_ts) = prior.published_at {
            if now < prior_ts {
                tracing::warn!("dropping out-of-order snapshot publish ({now} < {prior_ts})");
                return;
            }
        }
        self.current.store(Arc::new(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BackendType;

    fn backend(id: &str) -> Backend {
        Backend {
            id: BackendId::from_str(id),
            name: id.to_string(),
            base_url: "http://localhost:11434".into(),
            backend_type: BackendType::Ollama,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn publish_then_load_is_whole() {
        let publisher = SnapshotPublisher::new();
        let mut snap = LlmStateSnapshot::default();
        snap.backends.insert(
            BackendId::from_str("b1"),
            BackendSnapshotEntry {
                backend: backend("b1"),
                declared_models: vec![],
                pulled_models: vec![],
                error: None,
            },
        );
        publisher.publish(snap);

        let loaded = publisher.load();
        assert_eq!(loaded.backends.len(), 1);
        assert!(loaded.published_at.is_some());
    }

    #[test]
    fn stale_publish_is_dropped() {
        let publisher = SnapshotPublisher::new();
        let mut first = LlmStateSnapshot::default();
        first.backends.insert(
            BackendId::from_str("b1"),
            BackendSnapshotEntry {
                backend: backend("b1"),
                declared_models: vec![],
                pulled_models: vec![],
                error: None,
            },
        );
        publisher.publish(first);
        let after_first = publisher.load().published_at.unwrap();

        // Manually construct a snapshot with an artificially old timestamp
        // by publishing, then asserting a second publish never regresses
        // published_at below the first.
        let mut second = LlmStateSnapshot::default();
        second.backends.insert(
            BackendId::from_str("b2"),
            BackendSnapshotEntry {
                backend: backend("b2"),
                declared_models: vec![],
                pulled_models: vec![],
                error: None,
            },
        );
        publisher.publish(second);
        let after_second = publisher.load().published_at.unwrap();
        assert!(after_second >= after_first);
        assert_eq!(publisher.load().backends.len(), 1, "second publish replaces, not merges");
    }
}
