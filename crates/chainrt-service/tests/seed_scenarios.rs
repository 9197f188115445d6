//! End-to-end scenario tests (spec's "seed tests" §8) driven against an
//! in-memory sqlite store, the real `InProcessBus`, and the real chain
//! engine — no mocked collaborators except the remote LLM backend itself,
//! stood in by `wiremock`.

use chainrt_core::bus::InProcessBus;
use chainrt_core::chain::{ChainEngine, DataValue};
use chainrt_core::hooks::HookRegistry;
use chainrt_core::ids::BackendId;
use chainrt_core::model::{Backend, BackendType, Capability};
use chainrt_core::resolver::Resolver;
use chainrt_core::snapshot::{BackendSnapshotEntry, LlmStateSnapshot, PulledModel, SnapshotPublisher};
use chainrt_core::types::{OpenAiChatRequest, OpenAiMessage};
use chainrt_store::{chains, Store};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a handler needs, built the way `main.rs` builds it, minus
/// the axum router.
struct Harness {
    store: Store,
    engine: ChainEngine,
    snapshot: Arc<SnapshotPublisher>,
    #[allow(dead_code)]
    bus: Arc<InProcessBus>,
}

async fn harness() -> Harness {
    let store = Store::connect("sqlite::memory:").await.unwrap();
    let snapshot = Arc::new(SnapshotPublisher::new());
    let resolver = Arc::new(Resolver::new(snapshot.clone()));
    let hooks = Arc::new(HookRegistry::new(None));
    let engine = ChainEngine::new(resolver, hooks);
    let bus = Arc::new(InProcessBus::new());
    Harness { store, engine, snapshot, bus }
}

/// Publishes a single Ollama-type backend with one chat-capable model
/// pointed at `base_url`, satisfying `chat_chain`/`openai_chat_chain`'s
/// `ExecuteConfig::default()` (no model/provider name filter).
fn publish_single_chat_backend(snapshot: &SnapshotPublisher, base_url: &str) {
    let backend = Backend {
        id: BackendId::new(),
        name: "mock".to_string(),
        base_url: base_url.to_string(),
        backend_type: BackendType::Ollama,
        created_at: chrono::Utc::now(),
    };
    let mut caps = HashSet::new();
    caps.insert(Capability::Chat);
    let mut snap = LlmStateSnapshot::default();
    snap.backends.insert(
        backend.id.clone(),
        BackendSnapshotEntry {
            backend,
            declared_models: vec![],
            pulled_models: vec![PulledModel {
                name: "llama3".to_string(),
                context_length: None,
                capabilities: caps,
            }],
            error: None,
        },
    );
    snapshot.publish(snap);
}

/// Scenario 1: command dispatch. `chat_chain`, input `/echo hi` →
/// `mux_input → echo_message → end`, final output contains "hi".
#[tokio::test]
async fn command_dispatch_echoes_back_the_argument() {
    let h = harness().await;
    let chain = chains::get(&h.store.exec, "chat_chain").await.unwrap().unwrap();

    let execution = h
        .engine
        .execute(&chain, DataValue::String("/echo hi".to_string()), CancellationToken::new())
        .await;

    let (output, _ty) = execution.result.expect("chain should complete without error");
    assert!(output.as_template_string().contains("hi"));

    let task_ids: Vec<&str> = execution.trace.iter().map(|u| u.task_id.as_str()).collect();
    assert_eq!(task_ids.last(), Some(&"echo_message"));
    assert!(task_ids.contains(&"mux_input"));
}

/// Scenario 2: moderation reject. Input "10" → `moderate → reject_request
/// → raise_error`, chain error, trace length 3.
#[tokio::test]
async fn moderation_reject_raises_and_stops_the_chain() {
    let h = harness().await;
    let chain = chains::get(&h.store.exec, "chat_chain").await.unwrap().unwrap();

    let execution = h
        .engine
        .execute(&chain, DataValue::String("10".to_string()), CancellationToken::new())
        .await;

    assert!(execution.result.is_err());
    assert_eq!(execution.trace.len(), 3);
    let task_ids: Vec<&str> = execution.trace.iter().map(|u| u.task_id.as_str()).collect();
    assert_eq!(task_ids, vec!["moderate", "reject_request", "raise_error"]);

    let err = execution.result.unwrap_err();
    assert!(err.to_string().contains("request rejected by moderation"));
}

/// Scenario 3: OpenAI adapter round-trip. `openai_chat_chain` against a
/// mocked Ollama backend, traces show `convert_openai_to_history →
/// execute_model_on_messages → convert_history_to_openai → end`, and the
/// result is an `OpenaiChatResponse` with a non-empty assistant message.
#[tokio::test]
async fn openai_adapter_round_trip_returns_an_openai_chat_response() {
    let mock_server = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path("api/chat"))
        .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": {"role": "assistant", "content": "hello back"},
            "done": true,
            "prompt_eval_count": 3,
            "eval_count": 2
        })))
        .mount(&mock_server)
        .await;

    let h = harness().await;
    publish_single_chat_backend(&h.snapshot, &mock_server.uri());
    let chain = chains::get(&h.store.exec, "openai_chat_chain").await.unwrap().unwrap();

    let request = OpenAiChatRequest {
        model: "m".to_string(),
        messages: vec![OpenAiMessage { role: "user".to_string(), content: "hello".to_string() }],
    };

    let execution = h
        .engine
        .execute(&chain, DataValue::OpenaiChat(request), CancellationToken::new())
        .await;

    let (output, _ty) = execution.result.expect("chain should complete without error");
    let task_ids: Vec<&str> = execution.trace.iter().map(|u| u.task_id.as_str()).collect();
    assert_eq!(
        task_ids,
        vec!["convert_openai_to_history", "execute_model_on_messages", "convert_history_to_openai"]
    );

    match output {
        DataValue::OpenaiChatResponse(response) => {
            let message = &response.choices.first().expect("at least one choice").message;
            assert_eq!(message.role, "assistant");
            assert!(!message.content.is_empty());
            assert_eq!(message.content, "hello back");
        }
        other => panic!("expected an openai_chat_response, got {:?}", other.data_type()),
    }
}
