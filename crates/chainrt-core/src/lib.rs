//! `chainrt-core` — the branching task-chain engine, LLM backend resolver,
//! circuit-breaker routine supervisor, message bus abstraction, activity
//! tracker, hook registry, and backend state reconciler described in the
//! runtime's component design (§4.A–§4.G).
//!
//! Persistence (the dispatch queue, chain CRUD, and the KV/event store
//! adapters) lives in the sibling `chainrt-store` crate; this crate only
//! depends on the small `Exec`-shaped traits it needs, never on `sqlx`
//! directly.

pub mod breaker;
pub mod bus;
pub mod chain;
pub mod chat;
#[cfg(feature = "reqwest-client")]
pub mod client;
pub mod embedding;
pub mod error;
#[cfg(feature = "reqwest-client")]
pub mod hooks;
pub mod ids;
pub mod model;
pub mod prompt;
#[cfg(feature = "reqwest-client")]
pub mod reconcile;
pub mod resolver;
pub mod routine;
pub mod snapshot;
pub mod tracker;
pub mod types;

pub use error::CoreError;
