use crate::chain::CapturedStateUnit;
use thiserror::Error;

/// Errors surfaced by the core runtime, tagged by the taxonomy kind so
/// callers (HTTP handlers, dispatch workers, reconciler loops) can
/// pattern-match on what happened without parsing message text.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad request shape, missing required field. Maps to 4xx at the API edge.
    #[error("validation error: {0}")]
    Validation(String),

    /// Entity lookup miss.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique / foreign-key / not-null / check violation.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Deadlock, serialization failure, lock-unavailable, query-canceled.
    #[error("concurrency error: {0}")]
    Concurrency(String),

    /// Per-table row cap reached. Never retried.
    #[error("max rows reached for {0}")]
    Capacity(String),

    /// Backend HTTP error, bus disconnect, remote hook timeout.
    #[error("transient upstream error: {0}")]
    TransientUpstream(String),

    /// No available models / no satisfactory model.
    #[error("resolver error: {0}")]
    Resolver(#[from] ResolverError),

    /// No transition matched, type coercion failure, raise_error task.
    /// Carries the partial capture trace so operators can see where
    /// execution stopped.
    #[error("chain error: {message}")]
    Chain {
        message: String,
        partial_trace: Vec<CapturedStateUnit>,
    },

    /// Malformed remote hook response, or a non-2xx hook reply. `transition`
    /// carries the HTTP status code when that's what triggered this (§4.F),
    /// so the engine can route an `equals` branch on it instead of only
    /// falling back to `transition.onFailure`.
    #[error("hook protocol error ({hook}): {message}")]
    HookProtocol {
        hook: String,
        message: String,
        transition: Option<String>,
    },

    /// Config load failure at startup. The process exits after logging this.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl CoreError {
    pub fn chain(message: impl Into<String>, partial_trace: Vec<CapturedStateUnit>) -> Self {
        CoreError::Chain {
            message: message.into(),
            partial_trace,
        }
    }
}

/// Errors returned by the LLM resolver (§4.E).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ResolverError {
    #[error("no available models in the current snapshot")]
    NoAvailableModels,
    #[error("no model satisfies the requested filters")]
    NoSatisfactoryModel,
}

#[cfg(feature = "reqwest-client")]
impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::TransientUpstream(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Validation(format!("{err}"))
    }
}

impl From<url::ParseError> for CoreError {
    fn from(err: url::ParseError) -> Self {
        CoreError::Validation(format!("invalid url: {err}"))
    }
}
