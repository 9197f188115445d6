//! Declared data model (§3): backends, pools, models, provider configs.
//! These are the operator-declared inputs the reconciler (§4.D) checks
//! against observed backend state.

use crate::ids::{BackendId, ModelId, PoolId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Backend server type. Constrained to a closed set per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    Ollama,
    Vllm,
}

/// `{id, name, baseURL, type, createdAt}`. Uniqueness on `id`; `baseURL`
/// must be non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backend {
    pub id: BackendId,
    pub name: String,
    pub base_url: String,
    #[serde(rename = "type")]
    pub backend_type: BackendType,
    pub created_at: DateTime<Utc>,
}

impl Backend {
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.trim().is_empty() {
            return Err("backend baseURL must be non-empty".into());
        }
        Ok(())
    }
}

/// `{id, name, purpose}`. Many-to-many with Backend and Model via
/// association sets. No two pools may share a `name` (invariant 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
    pub name: String,
    pub purpose: String,
    #[serde(default)]
    pub backend_ids: HashSet<BackendId>,
    #[serde(default)]
    pub model_ids: HashSet<ModelId>,
}

/// A capability flag on a model/backend pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Prompt,
    Embed,
    Stream,
}

/// `{id, name, contextLength?, capabilities}`. Declared; capabilities may
/// be refined at runtime by the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: ModelId,
    pub name: String,
    pub context_length: Option<u64>,
    pub capabilities: HashSet<Capability>,
}

/// `{type, apiKey, updatedAt}` keyed by provider type, e.g. `openai`,
/// `gemini`. `api_key` is secret and must never be logged, hence the
/// hand-rolled `Debug` impl that redacts it.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: String,
    pub api_key: String,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider_type", &self.provider_type)
            .field("api_key", &"***redacted***")
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_with_empty_base_url_fails_validation() {
        let b = Backend {
            id: BackendId::new(),
            name: "local".into(),
            base_url: "   ".into(),
            backend_type: BackendType::Ollama,
            created_at: Utc::now(),
        };
        assert!(b.validate().is_err());
    }

    #[test]
    fn backend_with_base_url_passes_validation() {
        let b = Backend {
            id: BackendId::new(),
            name: "local".into(),
            base_url: "http://localhost:11434".into(),
            backend_type: BackendType::Ollama,
            created_at: Utc::now(),
        };
        assert!(b.validate().is_ok());
    }
}
