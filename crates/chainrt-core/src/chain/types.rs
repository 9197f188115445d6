//! Chain definition data model (§3, §4.G): tasks, transitions, the
//! Data-Type tag closed set, and the typed `DataValue` that carries a
//! task's input/output plus its coercion lattice.

use crate::chat::ChatMessage;
use crate::types::{OpenAiChatRequest, OpenAiChatResponse, SearchResults};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The closed Data-Type tag set (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    Int,
    Float,
    Bool,
    Json,
    ChatHistory,
    OpenaiChat,
    OpenaiChatResponse,
    SearchResults,
    Any,
}

/// A task's input or output value, tagged with its `DataType`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "data_type", content = "value")]
pub enum DataValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Json(serde_json::Value),
    ChatHistory(Vec<ChatMessage>),
    OpenaiChat(OpenAiChatRequest),
    OpenaiChatResponse(OpenAiChatResponse),
    SearchResults(SearchResults),
    Any(serde_json::Value),
}

impl DataValue {
    pub fn data_type(&self) -> DataType {
        match self {
            DataValue::String(_) => DataType::String,
            DataValue::Int(_) => DataType::Int,
            DataValue::Float(_) => DataType::Float,
            DataValue::Bool(_) => DataType::Bool,
            DataValue::Json(_) => DataType::Json,
            DataValue::ChatHistory(_) => DataType::ChatHistory,
            DataValue::OpenaiChat(_) => DataType::OpenaiChat,
            DataValue::OpenaiChatResponse(_) => DataType::OpenaiChatResponse,
            DataValue::SearchResults(_) => DataType::SearchResults,
            DataValue::Any(_) => DataType::Any,
        }
    }

    /// Renders the value as a template-substitution string (used when
    /// filling `{{.name}}` placeholders).
    pub fn as_template_string(&self) -> String {
        match self {
            DataValue::String(s) => s.clone(),
            DataValue::Int(i) => i.to_string(),
            DataValue::Float(f) => f.to_string(),
            DataValue::Bool(b) => b.to_string(),
            DataValue::Json(v) | DataValue::Any(v) => v.to_string(),
            DataValue::ChatHistory(msgs) => msgs
                .iter()
                .map(|m| m.content.clone())
                .collect::<Vec<_>>()
                .join("\n"),
            DataValue::OpenaiChat(req) => req
                .messages
                .iter()
                .map(|m| m.content.clone())
                .collect::<Vec<_>>()
                .join("\n"),
            DataValue::OpenaiChatResponse(resp) => resp
                .choices
                .first()
                .map(|c| c.message.content.clone())
                .unwrap_or_default(),
            DataValue::SearchResults(results) => results
                .0
                .iter()
                .map(|r| format!("{}: {}", r.title, r.snippet))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Task types (§3): the closed tagged union the engine switches on (§9
/// "Dynamic task dispatch").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    RawString,
    ParseNumber,
    ParseBool,
    ParseTransition,
    ModelExecution,
    Hook,
    Compose,
    Noop,
    RaiseError,
}

/// Operators over `(output, when)` used by transition branches (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Default,
    Equals,
    GreaterThan,
    LessThan,
    Contains,
    StartsWith,
    Between,
}

/// `{operator, when?, goto, alertOnMatch?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub operator: Operator,
    #[serde(default)]
    pub when: Option<String>,
    pub goto: String,
    #[serde(default)]
    pub alert_on_match: bool,
}

/// `{branches[], onFailure?}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Transition {
    #[serde(default)]
    pub branches: Vec<Branch>,
    #[serde(default)]
    pub on_failure: Option<String>,
}

/// Sentinel target that terminates a chain.
pub const END: &str = "end";

/// `executeConfig.{models, providers}` for `model_execution` tasks.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecuteConfig {
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub providers: Vec<String>,
}

/// Merge strategies for `compose` tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComposeStrategy {
    AppendStringToChatHistory,
    ReplaceInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeConfig {
    pub with_var: String,
    pub strategy: ComposeStrategy,
}

/// `{name, type, args}` as declared on a `hook` task (distinct from
/// `hooks::HookCall`, which is the runtime-templated version of this).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub hook_type: String,
    #[serde(default)]
    pub args: HashMap<String, String>,
}

/// A single typed step in a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prompt_template: Option<String>,
    #[serde(default)]
    pub input_var: Option<String>,
    #[serde(default)]
    pub system_instruction: Option<String>,
    #[serde(default)]
    pub execute_config: Option<ExecuteConfig>,
    #[serde(default)]
    pub hook: Option<HookConfig>,
    #[serde(default)]
    pub compose: Option<ComposeConfig>,
    pub transition: Transition,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry_on_failure: Option<u32>,
}

/// `{id, description, debug, tasks[]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainDefinition {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub debug: bool,
    pub tasks: Vec<Task>,
}

/// Errors raised by static chain-graph validation (§9 "Chain graph
/// validation").
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ChainValidationError {
    #[error("chain {0} has no tasks")]
    EmptyChain(String),
    #[error("task {task} goto target {target} does not exist")]
    DanglingGoto { task: String, target: String },
    #[error("task {task} has more than one default branch")]
    MultipleDefaultBranches { task: String },
    #[error("task {task} onFailure target {target} does not exist")]
    DanglingOnFailure { task: String, target: String },
    #[error("duplicate task id {0}")]
    DuplicateTaskId(String),
}

impl ChainDefinition {
    /// Static check before execution (§9): every `goto` resolves to a
    /// task id or `end`; at most one `default` branch per transition;
    /// `onFailure` if present resolves the same way; invariant 4 (≥1 task).
    pub fn validate(&self) -> Result<(), ChainValidationError> {
        if self.tasks.is_empty() {
            return Err(ChainValidationError::EmptyChain(self.id.clone()));
        }

        let mut ids = std::collections::HashSet::new();
        for task in &self.tasks {
            if !ids.insert(task.id.as_str()) {
                return Err(ChainValidationError::DuplicateTaskId(task.id.clone()));
            }
        }

        for task in &self.tasks {
            let mut default_count = 0;
            for branch in &task.transition.branches {
                if branch.operator == Operator::Default {
                    default_count += 1;
                }
                if branch.goto != END && !ids.contains(branch.goto.as_str()) {
                    return Err(ChainValidationError::DanglingGoto {
                        task: task.id.clone(),
                        target: branch.goto.clone(),
                    });
                }
            }
            if default_count > 1 {
                return Err(ChainValidationError::MultipleDefaultBranches { task: task.id.clone() });
            }
            if let Some(on_failure) = &task.transition.on_failure {
                if on_failure != END && !ids.contains(on_failure.as_str()) {
                    return Err(ChainValidationError::DanglingOnFailure {
                        task: task.id.clone(),
                        target: on_failure.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Per-task record of one chain execution (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedStateUnit {
    pub task_id: String,
    #[serde(default)]
    pub input_snapshot: Option<serde_json::Value>,
    pub output: serde_json::Value,
    pub output_type: DataType,
    pub transition_taken: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub alerts: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, goto: &str) -> Task {
        Task {
            id: id.to_string(),
            task_type: TaskType::Noop,
            description: String::new(),
            prompt_template: None,
            input_var: None,
            system_instruction: None,
            execute_config: None,
            hook: None,
            compose: None,
            transition: Transition {
                branches: vec![Branch {
                    operator: Operator::Default,
                    when: None,
                    goto: goto.to_string(),
                    alert_on_match: false,
                }],
                on_failure: None,
            },
            timeout_ms: None,
            retry_on_failure: None,
        }
    }

    #[test]
    fn empty_chain_fails_validation() {
        let chain = ChainDefinition {
            id: "c".into(),
            description: String::new(),
            debug: false,
            tasks: vec![],
        };
        assert_eq!(
            chain.validate(),
            Err(ChainValidationError::EmptyChain("c".into()))
        );
    }

    #[test]
    fn dangling_goto_fails_validation() {
        let chain = ChainDefinition {
            id: "c".into(),
            description: String::new(),
            debug: false,
            tasks: vec![task("a", "nonexistent")],
        };
        assert!(matches!(
            chain.validate(),
            Err(ChainValidationError::DanglingGoto { .. })
        ));
    }

    #[test]
    fn goto_end_is_valid() {
        let chain = ChainDefinition {
            id: "c".into(),
            description: String::new(),
            debug: false,
            tasks: vec![task("a", END)],
        };
        assert!(chain.validate().is_ok());
    }

    #[test]
    fn two_default_branches_fails_validation() {
        let mut t = task("a", END);
        t.transition.branches.push(Branch {
            operator: Operator::Default,
            when: None,
            goto: END.to_string(),
            alert_on_match: false,
        });
        let chain = ChainDefinition {
            id: "c".into(),
            description: String::new(),
            debug: false,
            tasks: vec![t],
        };
        assert!(matches!(
            chain.validate(),
            Err(ChainValidationError::MultipleDefaultBranches { .. })
        ));
    }

    #[test]
    fn duplicate_task_ids_fail_validation() {
        let chain = ChainDefinition {
            id: "c".into(),
            description: String::new(),
            debug: false,
            tasks: vec![task("a", END), task("a", END)],
        };
        assert_eq!(
            chain.validate(),
            Err(ChainValidationError::DuplicateTaskId("a".into()))
        );
    }
}
