//! Chain CRUD + default chain seeding (§4.I). Chains are persisted as
//! JSON under a `chain:` key prefix in the `kv` table — the same "chains
//! live in kv under prefix chain:<id>" scheme spec.md §6 describes, not a
//! dedicated SQL table.

use crate::error::StoreError;
use crate::exec::Exec;
use crate::kv;
use chainrt_core::chain::{
    Branch, ChainDefinition, ComposeConfig, ComposeStrategy, ExecuteConfig, HookConfig, Operator,
    Task, TaskType, Transition, END,
};

fn key_for(id: &str) -> String {
    format!("chain:{id}")
}

/// Upserts a chain definition, validating its transition graph first
/// (§9 "Chain graph validation").
pub async fn set(exec: &dyn Exec, chain: &ChainDefinition) -> Result<(), StoreError> {
    chain.validate().map_err(|e| StoreError::Other(e.to_string()))?;
    kv::set_json(exec, &key_for(&chain.id), chain).await
}

/// Upserts only if the chain already exists (§4.I "update must exist").
pub async fn update(exec: &dyn Exec, chain: &ChainDefinition) -> Result<(), StoreError> {
    chain.validate().map_err(|e| StoreError::Other(e.to_string()))?;
    let key = key_for(&chain.id);
    if kv::get_json::<ChainDefinition>(exec, &key).await?.is_none() {
        return Err(StoreError::NotFound(format!("chain {}", chain.id)));
    }
    kv::set_json(exec, &key, chain).await
}

pub async fn get(exec: &dyn Exec, id: &str) -> Result<Option<ChainDefinition>, StoreError> {
    kv::get_json(exec, &key_for(id)).await
}

pub async fn delete(exec: &dyn Exec, id: &str) -> Result<(), StoreError> {
    exec.delete(&key_for(id)).await
}

pub async fn list(exec: &dyn Exec) -> Result<Vec<ChainDefinition>, StoreError> {
    kv::list_prefix_json(exec, "chain:").await
}

/// Seeds the three default chains (§4.I) if absent. Idempotent: run on
/// every startup, each chain only written the first time it's missing.
pub async fn seed_defaults(exec: &dyn Exec) -> Result<(), StoreError> {
    for chain in [openai_chat_chain(), chat_chain(), code_review_chain()] {
        if get(exec, &chain.id).await?.is_none() {
            tracing::info!(chain = %chain.id, "seeding default chain");
            set(exec, &chain).await?;
        }
    }
    Ok(())
}

fn default_branch(goto: &str) -> Transition {
    Transition {
        branches: vec![Branch {
            operator: Operator::Default,
            when: None,
            goto: goto.to_string(),
            alert_on_match: false,
        }],
        on_failure: None,
    }
}

fn simple_task(id: &str, task_type: TaskType, goto: &str) -> Task {
    Task {
        id: id.to_string(),
        task_type,
        description: String::new(),
        prompt_template: None,
        input_var: None,
        system_instruction: None,
        execute_config: None,
        hook: None,
        compose: None,
        transition: default_branch(goto),
        timeout_ms: None,
        retry_on_failure: None,
    }
}

/// `openai_chat_chain`: convert OpenAI request to history, run the model,
/// convert the single-message response back to OpenAI shape (seed
/// scenario 3).
pub fn openai_chat_chain() -> ChainDefinition {
    let mut convert_in = simple_task(
        "convert_openai_to_history",
        TaskType::Noop,
        "execute_model_on_messages",
    );
    convert_in.input_var = Some("input".to_string());

    let mut execute = simple_task(
        "execute_model_on_messages",
        TaskType::ModelExecution,
        "convert_history_to_openai",
    );
    execute.input_var = Some("convert_openai_to_history".to_string());
    execute.execute_config = Some(ExecuteConfig::default());

    let mut convert_out = simple_task("convert_history_to_openai", TaskType::Noop, END);
    convert_out.input_var = Some("execute_model_on_messages".to_string());

    ChainDefinition {
        id: "openai_chat_chain".to_string(),
        description: "Adapts an OpenAI-shaped chat request into a model execution and back."
            .to_string(),
        debug: false,
        tasks: vec![convert_in, execute, convert_out],
    }
}

/// `chat_chain`: moderation gate, command mux (`/echo`, `/help`,
/// `/search`), falling through to a plain model execution (seed
/// scenarios 1 and 2).
pub fn chat_chain() -> ChainDefinition {
    let mut moderate = simple_task("moderate", TaskType::ParseNumber, "mux_input");
    moderate.prompt_template = Some("{{.input}}".to_string());
    moderate.transition = Transition {
        branches: vec![
            Branch {
                operator: Operator::GreaterThan,
                when: Some("5".to_string()),
                goto: "reject_request".to_string(),
                alert_on_match: true,
            },
            Branch {
                operator: Operator::Default,
                when: None,
                goto: "mux_input".to_string(),
                alert_on_match: false,
            },
        ],
        // moderate expects a pre-scored numeric moderation verdict; plain
        // chat text (commands, free-form messages) doesn't parse as a
        // number, so a coercion failure here falls through to command
        // dispatch rather than failing the whole chain.
        on_failure: Some("mux_input".to_string()),
    };

    let reject = simple_task("reject_request", TaskType::Noop, "raise_error");

    let mut raise = simple_task("raise_error", TaskType::RaiseError, END);
    raise.prompt_template = Some("request rejected by moderation".to_string());

    let mut mux = simple_task("mux_input", TaskType::ParseTransition, END);
    mux.input_var = Some("input".to_string());
    mux.transition = Transition {
        branches: vec![
            // Slash-commands route by prefix, not exact match, since
            // mux_input's output is the raw chat text ("/echo hi"), not
            // just the bare command word.
            Branch {
                operator: Operator::StartsWith,
                when: Some("/echo".to_string()),
                goto: "echo_message".to_string(),
                alert_on_match: false,
            },
            Branch {
                operator: Operator::StartsWith,
                when: Some("/help".to_string()),
                goto: "help_message".to_string(),
                alert_on_match: false,
            },
            Branch {
                operator: Operator::StartsWith,
                when: Some("/search".to_string()),
                goto: "search_hook".to_string(),
                alert_on_match: false,
            },
            Branch {
                operator: Operator::Default,
                when: None,
                goto: "execute_model".to_string(),
                alert_on_match: false,
            },
        ],
        on_failure: None,
    };

    let mut echo = simple_task("echo_message", TaskType::RawString, END);
    echo.prompt_template = Some("{{.input}}".to_string());

    let mut help = simple_task("help_message", TaskType::RawString, END);
    help.prompt_template =
        Some("available commands: /echo <text>, /help, /search <query>".to_string());

    let mut search = simple_task("search_hook", TaskType::Hook, END);
    search.hook = Some(HookConfig {
        name: "search".to_string(),
        hook_type: "search".to_string(),
        args: Default::default(),
    });

    let mut execute = simple_task("execute_model", TaskType::ModelExecution, END);
    execute.execute_config = Some(ExecuteConfig::default());
    execute.compose = Some(ComposeConfig {
        with_var: "input".to_string(),
        strategy: ComposeStrategy::AppendStringToChatHistory,
    });

    ChainDefinition {
        id: "chat_chain".to_string(),
        description: "Moderation gate, then command dispatch (/echo, /help, /search) or a plain model execution.".to_string(),
        debug: false,
        tasks: vec![moderate, reject, raise, mux, echo, help, search, execute],
    }
}

/// `code_review_chain`: single model step, fixed system instruction,
/// provider pinned to a named remote model.
pub fn code_review_chain() -> ChainDefinition {
    let mut review = simple_task("review", TaskType::ModelExecution, END);
    review.system_instruction = Some(
        "You are a meticulous code reviewer. Point out correctness bugs, security issues, \
         and missed edge cases. Be concise."
            .to_string(),
    );
    review.execute_config = Some(ExecuteConfig {
        models: vec!["code-review".to_string()],
        providers: vec![],
    });

    ChainDefinition {
        id: "code_review_chain".to_string(),
        description: "Single model step with a fixed review system instruction.".to_string(),
        debug: false,
        tasks: vec![review],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::SqliteExec;

    #[tokio::test]
    async fn set_then_get_returns_structurally_equal_chain() {
        let store = SqliteExec::connect("sqlite::memory:").await.unwrap();
        let chain = chat_chain();
        set(&store, &chain).await.unwrap();
        let got = get(&store, &chain.id).await.unwrap().unwrap();
        assert_eq!(got.id, chain.id);
        assert_eq!(got.tasks.len(), chain.tasks.len());
    }

    #[tokio::test]
    async fn update_on_missing_chain_fails() {
        let store = SqliteExec::connect("sqlite::memory:").await.unwrap();
        let chain = code_review_chain();
        let err = update(&store, &chain).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn seed_defaults_is_idempotent() {
        let store = SqliteExec::connect("sqlite::memory:").await.unwrap();
        seed_defaults(&store).await.unwrap();
        seed_defaults(&store).await.unwrap();
        let all = list(&store).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn all_default_chains_pass_validation() {
        for chain in [openai_chat_chain(), chat_chain(), code_review_chain()] {
            chain.validate().unwrap_or_else(|e| panic!("{}: {e}", chain.id));
        }
    }
}
