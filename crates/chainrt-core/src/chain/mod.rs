//! Task Chain Engine (§4.G): a typed, statically validated task graph
//! executed step by step, with a coercion lattice bridging each task's
//! declared data type to the next's, and a capture trace recorded per
//! task for observability and debugging.

mod coerce;
#[cfg(feature = "reqwest-client")]
mod engine;
mod template;
mod transition;
mod types;

pub use coerce::coerce;
#[cfg(feature = "reqwest-client")]
pub use engine::{ChainEngine, ChainExecution, MAX_STEPS};
pub use transition::{evaluate as evaluate_transition, TransitionOutcome};
pub use types::{
    Branch, CapturedStateUnit, ChainDefinition, ChainValidationError, ComposeConfig,
    ComposeStrategy, DataType, DataValue, ExecuteConfig, HookConfig, Operator, Task, TaskType,
    Transition, END,
};
