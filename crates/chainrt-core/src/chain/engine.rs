//! Task Chain Engine (§4.G), the hardest and largest component. Strictly
//! single-threaded per invocation; concurrency across invocations is
//! horizontal (one `ChainEngine` is cheap to clone/share, holding only
//! `Arc`s to its collaborators).

use super::coerce::coerce;
use super::template;
use super::transition::{evaluate as evaluate_transition, evaluate_error_label};
use super::types::{
    CapturedStateUnit, ChainDefinition, ComposeStrategy, DataType, DataValue, Task, TaskType, END,
};
use crate::chat::{ChatMessage, ChatRequest};
use crate::client::BackendClient;
use crate::error::CoreError;
use crate::hooks::{HookCall, HookRegistry};
use crate::model::Capability;
use crate::prompt::PromptRequest;
use crate::resolver::{ResolveRequest, Resolver, Strategy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Hard cap on steps per execution (§9 design notes): a static graph
/// check plus this runtime cap together prevent infinite-loop chains.
pub const MAX_STEPS: usize = 1000;

/// Everything a running chain returns: the result (success or the
/// terminating error) plus the full capture trace recorded so far —
/// "any unrecoverable error returns (nil, _, capturedUnits, err) so
/// callers still receive the trace" (§4.G Termination).
pub struct ChainExecution {
    pub result: Result<(DataValue, DataType), CoreError>,
    pub trace: Vec<CapturedStateUnit>,
}

/// Collaborators the engine needs to dispatch `model_execution` and
/// `hook` tasks. Cloned cheaply; held as `Arc`s internally.
#[derive(Clone)]
pub struct ChainEngine {
    resolver: Arc<Resolver>,
    hooks: Arc<HookRegistry>,
    http: reqwest::Client,
}

impl ChainEngine {
    pub fn new(resolver: Arc<Resolver>, hooks: Arc<HookRegistry>) -> Self {
        Self {
            resolver,
            hooks,
            http: crate::client::build_http_client(),
        }
    }

    /// Executes `chain` starting from `input` bound under the first
    /// task's `inputVar` (default `"input"`). Cancellation is checked at
    /// the start of every task, after coercion, and after each
    /// hook/model await (§5 Suspension points).
    pub async fn execute(
        &self,
        chain: &ChainDefinition,
        input: DataValue,
        cancel: CancellationToken,
    ) -> ChainExecution {
        if let Err(err) = chain.validate() {
            return ChainExecution {
                result: Err(CoreError::Chain {
                    message: err.to_string(),
                    partial_trace: vec![],
                }),
                trace: vec![],
            };
        }

        let tasks_by_id: HashMap<&str, &Task> =
            chain.tasks.iter().map(|t| (t.id.as_str(), t)).collect();

        let first_task = &chain.tasks[0];
        let input_var = first_task.input_var.clone().unwrap_or_else(|| "input".to_string());

        let mut vars: HashMap<String, DataValue> = HashMap::new();
        vars.insert(input_var, input);

        let mut trace: Vec<CapturedStateUnit> = Vec::new();
        let mut current_id = first_task.id.clone();

        for _ in 0..MAX_STEPS {
            if cancel.is_cancelled() {
                return ChainExecution {
                    result: Err(CoreError::Chain {
                        message: "chain execution cancelled".to_string(),
                        partial_trace: trace.clone(),
                    }),
                    trace,
                };
            }

            let Some(task) = tasks_by_id.get(current_id.as_str()).copied() else {
                return ChainExecution {
                    result: Err(CoreError::Chain {
                        message: format!("task {current_id} not found"),
                        partial_trace: trace.clone(),
                    }),
                    trace,
                };
            };

            let started = Instant::now();
            let input_value = self.resolve_task_input(task, &vars);
            let input_snapshot = if chain.debug {
                input_value.as_ref().ok().map(to_json_snapshot)
            } else {
                None
            };

            let outcome = match input_value {
                Ok(value) => self.run_task_with_timeout(task, value, &vars, cancel.clone()).await,
                Err(err) => Err(err),
            };

            match outcome {
                Ok((output, output_type, label)) => {
                    let transition_outcome = evaluate_transition(&task.transition, &output, label.as_deref());
                    let Some(transition_outcome) = transition_outcome else {
                        let duration_ms = started.elapsed().as_millis() as u64;
                        trace.push(CapturedStateUnit {
                            task_id: task.id.clone(),
                            input_snapshot,
                            output: to_raw_json(&output),
                            output_type,
                            transition_taken: String::new(),
                            duration_ms,
                            error: Some("no transition matched".to_string()),
                            alerts: vec![],
                        });
                        return ChainExecution {
                            result: Err(CoreError::Chain {
                                message: format!("task {}: no transition matched", task.id),
                                partial_trace: trace.clone(),
                            }),
                            trace,
                        };
                    };

                    let duration_ms = started.elapsed().as_millis() as u64;
                    let mut alerts = Vec::new();
                    if transition_outcome.alert {
                        alerts.push(format!("branch matched for task {}", task.id));
                    }
                    trace.push(CapturedStateUnit {
                        task_id: task.id.clone(),
                        input_snapshot,
                        output: to_raw_json(&output),
                        output_type,
                        transition_taken: transition_outcome.goto.clone(),
                        duration_ms,
                        error: None,
                        alerts,
                    });

                    vars.insert(task.id.clone(), output.clone());

                    if transition_outcome.goto == END {
                        return ChainExecution {
                            result: Ok((output, output_type)),
                            trace,
                        };
                    }
                    current_id = transition_outcome.goto;
                }
                Err(err) => {
                    // A hook protocol error can carry its own transition
                    // label (the HTTP status code, §4.F) — give `equals`
                    // branches first crack at it before falling back to
                    // `transition.onFailure`.
                    let label_outcome = error_transition_label(&err)
                        .and_then(|label| evaluate_error_label(&task.transition, label));

                    if let Some(transition_outcome) = label_outcome {
                        let duration_ms = started.elapsed().as_millis() as u64;
                        let mut alerts = Vec::new();
                        if transition_outcome.alert {
                            alerts.push(format!("branch matched for task {}", task.id));
                        }
                        trace.push(CapturedStateUnit {
                            task_id: task.id.clone(),
                            input_snapshot,
                            output: serde_json::Value::Null,
                            output_type: DataType::Any,
                            transition_taken: transition_outcome.goto.clone(),
                            duration_ms,
                            error: Some(err.to_string()),
                            alerts,
                        });

                        if transition_outcome.goto == END {
                            return ChainExecution {
                                result: Err(with_trace(err, &trace)),
                                trace,
                            };
                        }
                        current_id = transition_outcome.goto;
                        continue;
                    }

                    let duration_ms = started.elapsed().as_millis() as u64;
                    trace.push(CapturedStateUnit {
                        task_id: task.id.clone(),
                        input_snapshot,
                        output: serde_json::Value::Null,
                        output_type: DataType::Any,
                        transition_taken: task.transition.on_failure.clone().unwrap_or_default(),
                        duration_ms,
                        error: Some(err.to_string()),
                        alerts: vec![],
                    });

                    match &task.transition.on_failure {
                        Some(target) if target == END => {
                            return ChainExecution {
                                result: Err(with_trace(err, &trace)),
                                trace,
                            };
                        }
                        Some(target) => {
                            current_id = target.clone();
                        }
                        None => {
                            return ChainExecution {
                                result: Err(with_trace(err, &trace)),
                                trace,
                            };
                        }
                    }
                }
            }
        }

        ChainExecution {
            result: Err(CoreError::Chain {
                message: format!("chain exceeded {MAX_STEPS} steps"),
                partial_trace: trace.clone(),
            }),
            trace,
        }
    }

    /// Computes the task's input (step 1–2 of §4.G's step loop): template
    /// expansion when `promptTemplate` is set, else the referenced
    /// variable, then `compose` if present.
    fn resolve_task_input(&self, task: &Task, vars: &HashMap<String, DataValue>) -> Result<DataValue, CoreError> {
        let mut value = if let Some(template_str) = &task.prompt_template {
            let string_vars: HashMap<String, String> = vars
                .iter()
                .map(|(k, v)| (k.clone(), v.as_template_string()))
                .collect();
            DataValue::String(template::expand(template_str, &string_vars))
        } else {
            let var_name = task.input_var.as_deref().unwrap_or("input");
            vars.get(var_name)
                .cloned()
                .ok_or_else(|| CoreError::Chain {
                    message: format!("task {}: variable {var_name} not bound", task.id),
                    partial_trace: vec![],
                })?
        };

        if let Some(compose) = &task.compose {
            let with_value = vars.get(&compose.with_var).cloned().ok_or_else(|| CoreError::Chain {
                message: format!("task {}: compose withVar {} not bound", task.id, compose.with_var),
                partial_trace: vec![],
            })?;
            value = apply_compose(value, with_value, compose.strategy)?;
        }

        Ok(value)
    }

    async fn run_task_with_timeout(
        &self,
        task: &Task,
        input: DataValue,
        vars: &HashMap<String, DataValue>,
        cancel: CancellationToken,
    ) -> Result<(DataValue, DataType, Option<String>), CoreError> {
        let attempts = 1 + task.retry_on_failure.unwrap_or(0);
        let mut last_err = None;

        for attempt in 0..attempts {
            if cancel.is_cancelled() {
                return Err(CoreError::Chain {
                    message: "chain execution cancelled".to_string(),
                    partial_trace: vec![],
                });
            }

            let dispatch = self.dispatch(task, input.clone(), vars);
            let result = match task.timeout_ms {
                Some(ms) => {
                    tokio::select! {
                        _ = cancel.cancelled() => Err(CoreError::Chain {
                            message: "chain execution cancelled".to_string(),
                            partial_trace: vec![],
                        }),
                        outcome = tokio::time::timeout(Duration::from_millis(ms), dispatch) => {
                            match outcome {
                                Ok(inner) => inner,
                                Err(_) => Err(CoreError::TransientUpstream(format!(
                                    "task {} timed out after {ms}ms",
                                    task.id
                                ))),
                            }
                        }
                    }
                }
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => Err(CoreError::Chain {
                            message: "chain execution cancelled".to_string(),
                            partial_trace: vec![],
                        }),
                        outcome = dispatch => outcome,
                    }
                }
            };

            match result {
                Ok(ok) => return Ok(ok),
                Err(err) if attempt + 1 < attempts => {
                    tracing::warn!(task = %task.id, attempt, error = %err, "task failed, retrying");
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err.expect("attempts >= 1 guarantees a recorded error on exhaustion"))
    }

    /// Dispatches by task type (§4.G "Task dispatch by type"). The third
    /// tuple element is the transition label a branch can match via
    /// `equals` — set for `parse_transition` (the parsed text itself) and
    /// `hook` (the hook's returned `transition`), `None` everywhere else.
    async fn dispatch(
        &self,
        task: &Task,
        input: DataValue,
        vars: &HashMap<String, DataValue>,
    ) -> Result<(DataValue, DataType, Option<String>), CoreError> {
        match task.task_type {
            TaskType::RawString => {
                let s = coerce(&input, DataType::String)?;
                Ok((s.clone(), s.data_type(), None))
            }
            TaskType::ParseNumber => {
                let text = self.maybe_model_generate(task, &input).await?;
                let parsed = coerce(&DataValue::String(text), DataType::Float)?;
                Ok((parsed.clone(), parsed.data_type(), None))
            }
            TaskType::ParseBool => {
                let text = self.maybe_model_generate(task, &input).await?;
                let parsed = coerce(&DataValue::String(text), DataType::Bool)?;
                Ok((parsed.clone(), parsed.data_type(), None))
            }
            TaskType::ParseTransition => {
                let text = self.maybe_model_generate(task, &input).await?;
                let value = DataValue::String(text.clone());
                Ok((value.clone(), value.data_type(), Some(text)))
            }
            TaskType::ModelExecution => {
                let (value, data_type) = self.dispatch_model_execution(task, input).await?;
                Ok((value, data_type, None))
            }
            TaskType::Hook => self.dispatch_hook(task, input, vars).await,
            TaskType::Compose => {
                // compose is folded into `resolve_task_input`; a bare
                // `compose` task with no further work just passes through.
                Ok((input.clone(), input.data_type(), None))
            }
            TaskType::Noop => Ok((input.clone(), input.data_type(), None)),
            TaskType::RaiseError => Err(CoreError::Chain {
                message: input.as_template_string(),
                partial_trace: vec![],
            }),
        }
    }

    /// `parse_number`/`parse_bool`/`parse_transition` run a model over the
    /// templated prompt if `executeConfig` is set, else parse the input
    /// text directly (§4.G).
    async fn maybe_model_generate(&self, task: &Task, input: &DataValue) -> Result<String, CoreError> {
        let Some(execute_config) = &task.execute_config else {
            return Ok(input.as_template_string());
        };

        let client = self.resolve_client(execute_config, Capability::Prompt, task)?;
        let response = client
            .prompt(&PromptRequest::new(input.as_template_string()))
            .await?;
        Ok(response.text)
    }

    /// "chat_history → openai_chat_response is the job of the model task
    /// output, not coercion" (§4.G): the output shape tracks the task's
    /// original input shape, decided here rather than through `coerce`.
    async fn dispatch_model_execution(
        &self,
        task: &Task,
        input: DataValue,
    ) -> Result<(DataValue, DataType), CoreError> {
        let execute_config = task.execute_config.clone().unwrap_or_default();
        let client = self.resolve_client(&execute_config, Capability::Chat, task)?;

        let requested_model = match &input {
            DataValue::OpenaiChat(req) => Some(req.model.clone()),
            _ => None,
        };

        let mut messages = match coerce(&input, DataType::ChatHistory)? {
            DataValue::ChatHistory(history) => history,
            _ => unreachable!("coerce to ChatHistory always returns ChatHistory"),
        };

        if let Some(system) = &task.system_instruction {
            messages.insert(0, ChatMessage::system(system.clone()));
        }

        let response = client.chat(&ChatRequest { messages }).await?;

        let value = match requested_model {
            Some(model) => DataValue::OpenaiChatResponse(crate::types::history_to_openai_response(
                &model,
                &response.message,
            )),
            None => DataValue::ChatHistory(vec![response.message]),
        };
        Ok((value.clone(), value.data_type()))
    }

    fn resolve_client(
        &self,
        execute_config: &super::types::ExecuteConfig,
        capability: Capability,
        task: &Task,
    ) -> Result<BackendClient, CoreError> {
        let request = ResolveRequest {
            model_names: execute_config.models.clone(),
            provider_types: execute_config.providers.clone(),
            context_length: None,
            capability: Some(capability),
        };
        let resolved = self.resolver.resolve(&request, Strategy::Randomly).map_err(|e| {
            CoreError::Chain {
                message: format!("task {}: {e}", task.id),
                partial_trace: vec![],
            }
        })?;
        Ok(BackendClient::new(
            self.http.clone(),
            resolved.base_url,
            resolved.model_name,
            resolved.backend_type,
        ))
    }

    async fn dispatch_hook(
        &self,
        task: &Task,
        input: DataValue,
        vars: &HashMap<String, DataValue>,
    ) -> Result<(DataValue, DataType, Option<String>), CoreError> {
        let hook_config = task.hook.as_ref().ok_or_else(|| CoreError::Chain {
            message: format!("task {} is a hook task with no hook configured", task.id),
            partial_trace: vec![],
        })?;

        let string_vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.clone(), v.as_template_string()))
            .collect();
        let templated_args: HashMap<String, String> = hook_config
            .args
            .iter()
            .map(|(k, v)| (k.clone(), template::expand(v, &string_vars)))
            .collect();

        let call = HookCall {
            name: hook_config.name.clone(),
            hook_type: hook_config.hook_type.clone(),
            args: templated_args,
        };

        let input_json = to_raw_json(&input);
        let input_type_str = format!("{:?}", input.data_type());
        let result = self.hooks.exec(call, input_json, &input_type_str, "").await?;

        let label = if result.transition.is_empty() {
            None
        } else {
            Some(result.transition)
        };
        let value = DataValue::Json(result.output);
        Ok((value.clone(), value.data_type(), label))
    }
}

fn apply_compose(input: DataValue, with: DataValue, strategy: ComposeStrategy) -> Result<DataValue, CoreError> {
    match strategy {
        ComposeStrategy::ReplaceInput => Ok(with),
        ComposeStrategy::AppendStringToChatHistory => {
            let mut history = match coerce(&with, DataType::ChatHistory)? {
                DataValue::ChatHistory(h) => h,
                _ => unreachable!(),
            };
            history.push(ChatMessage::user(input.as_template_string()));
            Ok(DataValue::ChatHistory(history))
        }
    }
}

fn to_raw_json(value: &DataValue) -> serde_json::Value {
    match value {
        DataValue::String(s) => serde_json::Value::String(s.clone()),
        DataValue::Int(i) => serde_json::json!(i),
        DataValue::Float(f) => serde_json::json!(f),
        DataValue::Bool(b) => serde_json::Value::Bool(*b),
        DataValue::Json(v) | DataValue::Any(v) => v.clone(),
        other => serde_json::to_value(other).unwrap_or(serde_json::Value::Null),
    }
}

fn to_json_snapshot(value: &DataValue) -> serde_json::Value {
    to_raw_json(value)
}

/// Pulls a branchable transition label out of an error, if it carries one.
/// Only `HookProtocol` does today (a non-2xx hook reply's status code).
fn error_transition_label(err: &CoreError) -> Option<&str> {
    match err {
        CoreError::HookProtocol { transition, .. } => transition.as_deref(),
        _ => None,
    }
}

fn with_trace(err: CoreError, trace: &[CapturedStateUnit]) -> CoreError {
    match err {
        CoreError::Chain { message, .. } => CoreError::Chain {
            message,
            partial_trace: trace.to_vec(),
        },
        other => CoreError::Chain {
            message: other.to_string(),
            partial_trace: trace.to_vec(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::{Branch, ExecuteConfig, HookConfig, Operator, Transition};
    use crate::hooks::{HookResult, LocalHook};
    use crate::snapshot::SnapshotPublisher;
    use async_trait::async_trait;

    fn noop_task(id: &str, goto: &str) -> Task {
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

    fn test_engine() -> ChainEngine {
        let resolver = Arc::new(Resolver::new(Arc::new(SnapshotPublisher::new())));
        let hooks = Arc::new(HookRegistry::new(None));
        ChainEngine::new(resolver, hooks)
    }

    #[tokio::test]
    async fn single_noop_task_reaches_end() {
        let engine = test_engine();
        let chain = ChainDefinition {
            id: "c".into(),
            description: String::new(),
            debug: true,
            tasks: vec![noop_task("a", END)],
        };
        let execution = engine
            .execute(&chain, DataValue::String("hi".into()), CancellationToken::new())
            .await;
        assert!(execution.result.is_ok());
        assert_eq!(execution.trace.len(), 1);
        assert_eq!(execution.trace[0].transition_taken, END);
    }

    #[tokio::test]
    async fn raise_error_task_terminates_with_chain_error_and_trace() {
        let engine = test_engine();
        let mut raise = noop_task("a", END);
        raise.task_type = TaskType::RaiseError;
        raise.prompt_template = Some("boom: {{.input}}".to_string());
        let chain = ChainDefinition {
            id: "c".into(),
            description: String::new(),
            debug: false,
            tasks: vec![raise],
        };
        let execution = engine
            .execute(&chain, DataValue::String("bad".into()), CancellationToken::new())
            .await;
        assert!(execution.result.is_err());
        assert_eq!(execution.trace.len(), 1);
        assert!(execution.trace[0].error.is_some());
    }

    #[tokio::test]
    async fn on_failure_routes_to_alternate_task() {
        let engine = test_engine();
        let mut failing = noop_task("a", END);
        failing.task_type = TaskType::RaiseError;
        failing.prompt_template = Some("nope".to_string());
        failing.transition.on_failure = Some("recover".to_string());

        let chain = ChainDefinition {
            id: "c".into(),
            description: String::new(),
            debug: false,
            tasks: vec![failing, noop_task("recover", END)],
        };
        let execution = engine
            .execute(&chain, DataValue::String("x".into()), CancellationToken::new())
            .await;
        assert!(execution.result.is_ok());
        assert_eq!(execution.trace.len(), 2);
        assert_eq!(execution.trace[1].task_id, "recover");
    }

    #[tokio::test]
    async fn no_matching_transition_fails_the_chain_with_partial_trace() {
        let engine = test_engine();
        let mut task = noop_task("a", "nonexistent");
        task.transition.branches = vec![Branch {
            operator: Operator::Equals,
            when: Some("never".to_string()),
            goto: END.to_string(),
            alert_on_match: false,
        }];
        let chain = ChainDefinition {
            id: "c".into(),
            description: String::new(),
            debug: false,
            tasks: vec![task],
        };
        let execution = engine
            .execute(&chain, DataValue::String("x".into()), CancellationToken::new())
            .await;
        match execution.result {
            Err(CoreError::Chain { partial_trace, .. }) => assert_eq!(partial_trace.len(), 1),
            other => panic!("expected chain error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn parse_transition_routes_on_command_string() {
        let engine = test_engine();
        let mut mux = noop_task("mux_input", END);
        mux.task_type = TaskType::ParseTransition;
        mux.prompt_template = Some("{{.input}}".to_string());
        mux.transition = Transition {
            branches: vec![
                Branch {
                    operator: Operator::Equals,
                    when: Some("echo".to_string()),
                    goto: "echo_message".to_string(),
                    alert_on_match: false,
                },
                Branch {
                    operator: Operator::Default,
                    when: None,
                    goto: END.to_string(),
                    alert_on_match: false,
                },
            ],
            on_failure: None,
        };

        let chain = ChainDefinition {
            id: "chat_chain".into(),
            description: String::new(),
            debug: false,
            tasks: vec![mux, noop_task("echo_message", END)],
        };

        let execution = engine
            .execute(&chain, DataValue::String("echo".into()), CancellationToken::new())
            .await;
        assert!(execution.result.is_ok());
        assert_eq!(execution.trace[0].transition_taken, "echo_message");
        assert_eq!(execution.trace[1].task_id, "echo_message");
    }

    struct RecordingHook;

    #[async_trait]
    impl LocalHook for RecordingHook {
        async fn call(&self, _call: &HookCall, input: &serde_json::Value) -> Result<HookResult, CoreError> {
            Ok(HookResult {
                output: input.clone(),
                data_type: "json".to_string(),
                transition: END.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn hook_task_dispatches_through_registry() {
        let mut hooks = HookRegistry::new(None);
        hooks.register_local("echo", Arc::new(RecordingHook));
        let resolver = Arc::new(Resolver::new(Arc::new(SnapshotPublisher::new())));
        let engine = ChainEngine::new(resolver, Arc::new(hooks));

        let mut hook_task = noop_task("h", END);
        hook_task.task_type = TaskType::Hook;
        hook_task.hook = Some(HookConfig {
            name: "echo".to_string(),
            hook_type: "echo".to_string(),
            args: HashMap::new(),
        });

        let chain = ChainDefinition {
            id: "c".into(),
            description: String::new(),
            debug: false,
            tasks: vec![hook_task],
        };

        let execution = engine
            .execute(&chain, DataValue::String("payload".into()), CancellationToken::new())
            .await;
        assert!(execution.result.is_ok());
    }

    struct EchoingArgHook;

    #[async_trait]
    impl LocalHook for EchoingArgHook {
        async fn call(&self, call: &HookCall, input: &serde_json::Value) -> Result<HookResult, CoreError> {
            let mode = call.args.get("mode").cloned().unwrap_or_default();
            Ok(HookResult {
                output: input.clone(),
                data_type: "json".to_string(),
                transition: mode,
            })
        }
    }

    #[tokio::test]
    async fn hook_transition_label_and_templated_args_drive_branching() {
        let mut hooks = HookRegistry::new(None);
        hooks.register_local("labeler", Arc::new(EchoingArgHook));
        let resolver = Arc::new(Resolver::new(Arc::new(SnapshotPublisher::new())));
        let engine = ChainEngine::new(resolver, Arc::new(hooks));

        let mut hook_task = noop_task("h", END);
        hook_task.task_type = TaskType::Hook;
        let mut args = HashMap::new();
        args.insert("mode".to_string(), "{{.input}}".to_string());
        hook_task.hook = Some(HookConfig {
            name: "labeler".to_string(),
            hook_type: "labeler".to_string(),
            args,
        });
        hook_task.transition = Transition {
            branches: vec![
                Branch {
                    operator: Operator::Equals,
                    when: Some("fast_path".to_string()),
                    goto: "fast".to_string(),
                    alert_on_match: false,
                },
                Branch {
                    operator: Operator::Default,
                    when: None,
                    goto: END.to_string(),
                    alert_on_match: false,
                },
            ],
            on_failure: None,
        };

        let chain = ChainDefinition {
            id: "c".into(),
            description: String::new(),
            debug: false,
            tasks: vec![hook_task, noop_task("fast", END)],
        };

        let execution = engine
            .execute(&chain, DataValue::String("fast_path".into()), CancellationToken::new())
            .await;
        assert!(execution.result.is_ok());
        assert_eq!(execution.trace[0].transition_taken, "fast");
        assert_eq!(execution.trace[1].task_id, "fast");
    }

    #[tokio::test]
    async fn hook_protocol_error_with_status_label_branches_before_on_failure() {
        struct NotFoundHook;
        #[async_trait]
        impl LocalHook for NotFoundHook {
            async fn call(&self, _call: &HookCall, _input: &serde_json::Value) -> Result<HookResult, CoreError> {
                Err(CoreError::HookProtocol {
                    hook: "flaky".to_string(),
                    message: "status 404 Not Found".to_string(),
                    transition: Some("404".to_string()),
                })
            }
        }

        let mut hooks = HookRegistry::new(None);
        hooks.register_local("flaky", Arc::new(NotFoundHook));
        let resolver = Arc::new(Resolver::new(Arc::new(SnapshotPublisher::new())));
        let engine = ChainEngine::new(resolver, Arc::new(hooks));

        let mut hook_task = noop_task("h", END);
        hook_task.task_type = TaskType::Hook;
        hook_task.hook = Some(HookConfig {
            name: "flaky".to_string(),
            hook_type: "flaky".to_string(),
            args: HashMap::new(),
        });
        hook_task.transition = Transition {
            branches: vec![Branch {
                operator: Operator::Equals,
                when: Some("404".to_string()),
                goto: "not_found".to_string(),
                alert_on_match: false,
            }],
            on_failure: Some("wrong_fallback".to_string()),
        };

        let chain = ChainDefinition {
            id: "c".into(),
            description: String::new(),
            debug: false,
            tasks: vec![hook_task, noop_task("not_found", END), noop_task("wrong_fallback", END)],
        };

        let execution = engine
            .execute(&chain, DataValue::String("x".into()), CancellationToken::new())
            .await;
        assert!(execution.result.is_ok());
        assert_eq!(execution.trace[0].transition_taken, "not_found");
        assert_eq!(execution.trace[1].task_id, "not_found");
    }

    #[tokio::test]
    async fn model_execution_without_a_satisfying_backend_surfaces_resolver_error() {
        let engine = test_engine();
        let mut model_task = noop_task("m", END);
        model_task.task_type = TaskType::ModelExecution;
        model_task.execute_config = Some(ExecuteConfig::default());

        let chain = ChainDefinition {
            id: "c".into(),
            description: String::new(),
            debug: false,
            tasks: vec![model_task],
        };

        let execution = engine
            .execute(&chain, DataValue::String("hi".into()), CancellationToken::new())
            .await;
        assert!(execution.result.is_err());
    }

    #[tokio::test]
    async fn step_cap_aborts_runaway_chains() {
        let engine = test_engine();
        let chain = ChainDefinition {
            id: "loop".into(),
            description: String::new(),
            debug: false,
            tasks: vec![noop_task("a", "b"), noop_task("b", "a")],
        };
        let execution = engine
            .execute(&chain, DataValue::String("x".into()), CancellationToken::new())
            .await;
        assert!(execution.result.is_err());
        assert_eq!(execution.trace.len(), MAX_STEPS);
    }
}
