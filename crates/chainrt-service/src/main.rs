//! HTTP surface for chainrt (§6): wires `chainrt-core`'s chain engine,
//! resolver, hook registry, and routine group to `chainrt-store`'s
//! persistence, behind an `axum` `Router`/`State`/`Json` surface with a
//! single `ServerState` cloned into every handler.

mod error;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chainrt_core::bus::{InProcessBus, MessageBus};
use chainrt_core::chain::{ChainEngine, ChainDefinition, CapturedStateUnit, DataType, DataValue};
use chainrt_core::error::CoreError;
use chainrt_core::hooks::{HookCall, HookRegistry, HookResult, LocalHook, RemoteHook, RemoteHookLookup};
use chainrt_core::ids::{BackendId, ModelId, PoolId};
use chainrt_core::model::{Backend, BackendType, Capability, Model, Pool, ProviderConfig};
use chainrt_core::reconcile::{reconcile_tick, DeclaredBackendConfig};
use chainrt_core::resolver::Resolver;
use chainrt_core::routine::RoutineGroup;
use chainrt_core::snapshot::SnapshotPublisher;
use chainrt_core::tracker::{ActivityTracker, RequestContext, TracingActivityTracker};
use chainrt_store::chains;
use chainrt_store::kv;
use chainrt_store::Store;
use clap::Parser;
use error::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// KV key the chat service reads to pick the chain `/v1/chat/completions`
/// routes to (§6, §9 Open Question: "this spec adopts the KV-stored id
/// model for server configurability").
const OPENAI_CHAIN_ID_KEY: &str = "open-ai-chain-id";
const DEFAULT_OPENAI_CHAIN_ID: &str = "openai_chat_chain";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to bind the HTTP service to.
    #[arg(long, env = "CHAINRT_ADDR", default_value = "0.0.0.0:8080")]
    addr: String,

    /// sqlx connection string for the relational store.
    #[arg(long, env = "CHAINRT_DATABASE_URL", default_value = "sqlite://chainrt.db")]
    database_url: String,

    /// Optional path to a `chainrt.toml` config file (backend/pool/model
    /// seeds plus the default OpenAI chain id override).
    #[arg(long, env = "CHAINRT_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Bearer token required on every request if set.
    #[arg(long, env = "CHAINRT_AUTH_KEY")]
    auth_key: Option<String>,

    /// Overrides the default OpenAI chain id instead of reading it from KV.
    #[arg(long, env = "CHAINRT_OPENAI_CHAIN_ID")]
    openai_chain_id: Option<String>,
}

/// `chainrt.toml`: seed declarations loaded at startup via
/// `toml::from_str` over `fs::read_to_string`.
#[derive(Debug, Default, Deserialize)]
struct Config {
    #[serde(default)]
    backends: Vec<BackendSeed>,
    #[serde(default)]
    open_ai_chain_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BackendSeed {
    name: String,
    base_url: String,
    #[serde(rename = "type")]
    backend_type: BackendType,
}

impl Config {
    fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

#[derive(Clone)]
struct ServerState {
    store: Arc<Store>,
    resolver: Arc<Resolver>,
    hooks: Arc<HookRegistry>,
    engine: ChainEngine,
    snapshot: Arc<SnapshotPublisher>,
    routines: Arc<RoutineGroup>,
    bus: Arc<InProcessBus>,
    tracker: Arc<dyn ActivityTracker>,
    auth_key: Option<String>,
}

/// Delegates [`RemoteHookLookup`] to the store's `RemoteHookStore` without
/// exposing `chainrt-store` internals through `chainrt-core`'s hook
/// registry constructor.
struct StoreHookLookup(Arc<Store>);

#[async_trait::async_trait]
impl RemoteHookLookup for StoreHookLookup {
    async fn find_by_name(&self, name: &str) -> Result<Option<RemoteHook>, CoreError> {
        self.0.remote_hooks.find_by_name(name).await
    }

    async fn list_all(&self) -> Result<Vec<RemoteHook>, CoreError> {
        self.0.remote_hooks.list_all().await
    }
}

/// The only local hook the default chains reference (`chat_chain`'s
/// `search_hook`). A real deployment would back this with a search
/// provider; here it returns an empty result set rather than pretending
/// to have one, the way a stub collaborator should behave.
struct SearchHook;

#[async_trait::async_trait]
impl LocalHook for SearchHook {
    async fn call(&self, call: &HookCall, input: &Value) -> Result<HookResult, CoreError> {
        tracing::debug!(query = %input, "search hook invoked with no search backend configured");
        let _ = call;
        Ok(HookResult {
            output: serde_json::json!([]),
            data_type: "search_results".to_string(),
            transition: "end".to_string(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load(path).unwrap_or_else(|err| {
            tracing::warn!(path = %path.display(), error = %err, "failed to load config, using defaults");
            Config::default()
        }),
        None => Config::default(),
    };

    let store = Arc::new(
        Store::connect(&args.database_url)
            .await
            .map_err(|e| anyhow::anyhow!("failed to connect store: {e}"))?,
    );

    for seed in &config.backends {
        let backend = Backend {
            id: BackendId::new(),
            name: seed.name.clone(),
            base_url: seed.base_url.clone(),
            backend_type: seed.backend_type,
            created_at: chrono::Utc::now(),
        };
        match store.backends.create(backend).await {
            Ok(b) => tracing::info!(backend = %b.id, "seeded backend from config"),
            Err(chainrt_store::StoreError::AlreadyExists(_)) => {}
            Err(err) => tracing::warn!(error = %err, "failed to seed backend from config"),
        }
    }

    if let Some(id) = &config.open_ai_chain_id {
        kv::set_json(&store.exec, OPENAI_CHAIN_ID_KEY, id).await.ok();
    }

    let snapshot = Arc::new(SnapshotPublisher::new());
    let resolver = Arc::new(Resolver::new(snapshot.clone()));
    let mut hooks = HookRegistry::new(Some(Arc::new(StoreHookLookup(store.clone()))));
    hooks.register_local("search", Arc::new(SearchHook));
    let hooks = Arc::new(hooks);
    let engine = ChainEngine::new(resolver.clone(), hooks.clone());

    let routines = Arc::new(RoutineGroup::new());
    let bus = Arc::new(InProcessBus::new());
    let tracker: Arc<dyn ActivityTracker> = Arc::new(TracingActivityTracker);

    start_reconcile_loop(&routines, &store, &snapshot, &bus);
    start_dispatch_sweeper(&routines, &store);

    let state = ServerState {
        store,
        resolver,
        hooks,
        engine,
        snapshot,
        routines: routines.clone(),
        bus,
        tracker,
        auth_key: args.auth_key.clone(),
    };

    let app = Router::new()
        .route("/execute", post(execute_task))
        .route("/tasks", post(run_chain))
        .route("/supported", get(list_supported_hooks))
        .route("/v1/chat/completions", post(openai_chat_completions))
        .route("/backends", post(create_backend).get(list_backends))
        .route("/backends/:id", delete(delete_backend))
        .route("/pools", post(create_pool).get(list_pools))
        .route("/pools/:id", delete(delete_pool))
        .route("/models", post(create_model).get(list_models))
        .route("/models/:id", delete(delete_model))
        .route("/chains", post(create_chain).get(list_chains))
        .route("/chains/:id", get(get_chain).put(update_chain).delete(delete_chain))
        .route("/providers/:type/configure", post(configure_provider))
        .route("/providers/configs", get(list_provider_configs))
        .route("/hooks/remote", post(create_remote_hook).get(list_remote_hooks))
        .route("/hooks/remote/:id", delete(delete_remote_hook))
        .layer(CorsLayer::permissive())
        .with_state(state);

    tracing::info!(addr = %args.addr, "chainrt-service listening");
    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    let shutdown_routines = routines.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
            shutdown_routines.shutdown().await;
        })
        .await?;

    Ok(())
}

/// A single fanned reconciliation loop over every declared backend
/// (§4.D), keyed `reconcile:all`. Re-reads the backend list from the
/// store every tick, so backends created or removed after startup are
/// picked up on the next tick without restarting the loop; `create_backend`
/// calls `force_update("reconcile:all")` to avoid waiting out a full
/// interval for a newly created backend's first poll.
fn start_reconcile_loop(
    routines: &Arc<RoutineGroup>,
    store: &Arc<Store>,
    snapshot: &Arc<SnapshotPublisher>,
    bus: &Arc<InProcessBus>,
) {
    let routines = routines.clone();
    let store = store.clone();
    let snapshot = snapshot.clone();
    let bus = bus.clone();
    let http = chainrt_core::client::build_http_client();

    routines.start_loop(
        "reconcile:all",
        5,
        Duration::from_secs(30),
        Duration::from_secs(15),
        move || {
            let store = store.clone();
            let snapshot = snapshot.clone();
            let bus = bus.clone();
            let http = http.clone();
            async move {
                let backends = store.backends.list().await.map_err(|e| e.to_string())?;
                let pairs: Vec<_> = backends
                    .into_iter()
                    .map(|b| (b, DeclaredBackendConfig::default()))
                    .collect();
                reconcile_tick(&http, &pairs, &snapshot).await;
                let _ = bus
                    .publish("chainrt.snapshot.updated", Vec::new())
                    .await;
                Ok(())
            }
        },
    );
}

/// Sweeps expired leases back to pending (§4.H "Lease expiry").
fn start_dispatch_sweeper(routines: &Arc<RoutineGroup>, store: &Arc<Store>) {
    let store = store.clone();
    routines.start_loop(
        "dispatch:sweeper",
        5,
        Duration::from_secs(30),
        Duration::from_secs(10),
        move || {
            let store = store.clone();
            async move {
                let swept = store.dispatch.sweep_expired_leases().await.map_err(|e| e.to_string())?;
                if swept > 0 {
                    tracing::info!(count = swept, "swept expired job leases back to pending");
                }
                Ok(())
            }
        },
    );
}

fn check_auth(state: &ServerState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.auth_key else {
        return Ok(());
    };
    let provided = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(ApiError::Status(StatusCode::UNAUTHORIZED, "missing or invalid bearer token".to_string()))
    }
}

// ---------------------------------------------------------------------
// §6 "POST /execute" — the minimal single-shot prompt surface.
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct TaskRequest {
    prompt: String,
    #[serde(rename = "modelName")]
    model_name: Option<String>,
    #[serde(rename = "modelProvider")]
    model_provider: Option<String>,
}

#[derive(Serialize)]
struct TaskResponse {
    id: String,
    response: String,
}

async fn execute_task(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(req): Json<TaskRequest>,
) -> Result<Json<TaskResponse>, ApiError> {
    check_auth(&state, &headers)?;
    let mut handle = state.tracker.start(
        "execute_task",
        RequestContext {
            request_id: Some(uuid::Uuid::new_v4().to_string()),
            ..Default::default()
        },
    );

    let request = chainrt_core::resolver::ResolveRequest {
        model_names: req.model_name.into_iter().collect(),
        provider_types: req.model_provider.into_iter().collect(),
        context_length: None,
        capability: Some(Capability::Prompt),
    };
    let target = state
        .resolver
        .resolve(&request, chainrt_core::resolver::Strategy::Randomly)
        .map_err(|err| {
            handle.report_error(&err);
            CoreError::from(err)
        })?;

    let client = chainrt_core::client::BackendClient::new(
        chainrt_core::client::build_http_client(),
        target.base_url,
        target.model_name,
        target.backend_type,
    );
    let response = chainrt_core::prompt::PromptProvider::prompt(
        &client,
        &chainrt_core::prompt::PromptRequest::new(req.prompt),
    )
    .await
    .map_err(|err| {
        handle.report_error(&err);
        err
    })?;

    handle.end();
    Ok(Json(TaskResponse {
        id: uuid::Uuid::new_v4().to_string(),
        response: response.text,
    }))
}

// ---------------------------------------------------------------------
// §6 "POST /tasks" — the generic chain-execution surface.
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct RunChainRequest {
    input: Value,
    #[serde(rename = "inputType")]
    input_type: DataType,
    chain: String,
}

#[derive(Serialize)]
struct RunChainResponse {
    response: Value,
    state: Vec<CapturedStateUnit>,
}

fn decode_input(value: Value, data_type: DataType) -> Result<DataValue, ApiError> {
    let decoded = match data_type {
        DataType::String => DataValue::String(
            value
                .as_str()
                .ok_or_else(|| (StatusCode::BAD_REQUEST, "expected string input".to_string()))?
                .to_string(),
        ),
        DataType::Int => DataValue::Int(
            value
                .as_i64()
                .ok_or_else(|| (StatusCode::BAD_REQUEST, "expected int input".to_string()))?,
        ),
        DataType::Float => DataValue::Float(
            value
                .as_f64()
                .ok_or_else(|| (StatusCode::BAD_REQUEST, "expected float input".to_string()))?,
        ),
        DataType::Bool => DataValue::Bool(
            value
                .as_bool()
                .ok_or_else(|| (StatusCode::BAD_REQUEST, "expected bool input".to_string()))?,
        ),
        DataType::Json | DataType::Any => DataValue::Json(value),
        DataType::ChatHistory => DataValue::ChatHistory(serde_json::from_value(value)?),
        DataType::OpenaiChat => DataValue::OpenaiChat(serde_json::from_value(value)?),
        DataType::OpenaiChatResponse => DataValue::OpenaiChatResponse(serde_json::from_value(value)?),
        DataType::SearchResults => DataValue::SearchResults(serde_json::from_value(value)?),
    };
    Ok(decoded)
}

fn encode_output(value: &DataValue) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

async fn run_chain(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(req): Json<RunChainRequest>,
) -> Result<Json<RunChainResponse>, ApiError> {
    check_auth(&state, &headers)?;

    let chain = chains::get(&state.store.exec, &req.chain)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("chain {}", req.chain)))?;

    let input = decode_input(req.input, req.input_type)?;

    let mut handle = state.tracker.start(
        "run_chain",
        RequestContext {
            request_id: Some(uuid::Uuid::new_v4().to_string()),
            ..Default::default()
        },
    );

    let execution = state
        .engine
        .execute(&chain, input, CancellationToken::new())
        .await;

    match execution.result {
        Ok((value, _ty)) => {
            handle.end();
            Ok(Json(RunChainResponse {
                response: encode_output(&value),
                state: execution.trace,
            }))
        }
        Err(err) => {
            handle.report_error(&err);
            Err(ApiError::Core(CoreError::chain(err.to_string(), execution.trace)))
        }
    }
}

async fn list_supported_hooks(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<Json<Vec<String>>, ApiError> {
    check_auth(&state, &headers)?;
    Ok(Json(state.hooks.supports().await?))
}

// ---------------------------------------------------------------------
// §6 "POST /v1/chat/completions" — OpenAI-compatible surface routed to
// the chain id stored under KV key `open-ai-chain-id`.
// ---------------------------------------------------------------------

async fn openai_chat_completions(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(req): Json<chainrt_core::types::OpenAiChatRequest>,
) -> Result<Json<chainrt_core::types::OpenAiChatResponse>, ApiError> {
    check_auth(&state, &headers)?;

    let chain_id = kv::get_json::<String>(&state.store.exec, OPENAI_CHAIN_ID_KEY)
        .await?
        .unwrap_or_else(|| DEFAULT_OPENAI_CHAIN_ID.to_string());
    let chain = chains::get(&state.store.exec, &chain_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("chain {chain_id}")))?;

    let execution = state
        .engine
        .execute(&chain, DataValue::OpenaiChat(req), CancellationToken::new())
        .await;

    match execution.result {
        Ok((DataValue::OpenaiChatResponse(response), _)) => Ok(Json(response)),
        Ok((other, _)) => Err(ApiError::Core(CoreError::chain(
            format!("chain {chain_id} did not terminate with an openai_chat_response, got {:?}", other.data_type()),
            execution.trace,
        ))),
        Err(err) => Err(ApiError::Core(CoreError::chain(err.to_string(), execution.trace))),
    }
}

// ---------------------------------------------------------------------
// Backend / pool / model / provider / remote-hook CRUD (§6). Thin
// validation + persistence, delegating entirely to `chainrt-store`.
// ---------------------------------------------------------------------

#[derive(Deserialize)]
struct CreateBackendRequest {
    name: String,
    base_url: String,
    #[serde(rename = "type")]
    backend_type: BackendType,
}

async fn create_backend(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(req): Json<CreateBackendRequest>,
) -> Result<Json<Backend>, ApiError> {
    check_auth(&state, &headers)?;
    let backend = Backend {
        id: BackendId::new(),
        name: req.name,
        base_url: req.base_url,
        backend_type: req.backend_type,
        created_at: chrono::Utc::now(),
    };
    let created = state.store.backends.create(backend).await?;
    state.routines.force_update("reconcile:all");
    Ok(Json(created))
}

async fn list_backends(State(state): State<ServerState>, headers: HeaderMap) -> Result<Json<Vec<Backend>>, ApiError> {
    check_auth(&state, &headers)?;
    Ok(Json(state.store.backends.list().await?))
}

async fn delete_backend(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    check_auth(&state, &headers)?;
    state.store.backends.delete(&BackendId::from_str(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct CreatePoolRequest {
    name: String,
    purpose: String,
    #[serde(default)]
    backend_ids: std::collections::HashSet<BackendId>,
    #[serde(default)]
    model_ids: std::collections::HashSet<ModelId>,
}

async fn create_pool(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(req): Json<CreatePoolRequest>,
) -> Result<Json<Pool>, ApiError> {
    check_auth(&state, &headers)?;
    let pool = Pool {
        id: PoolId::new(),
        name: req.name,
        purpose: req.purpose,
        backend_ids: req.backend_ids,
        model_ids: req.model_ids,
    };
    Ok(Json(state.store.pools.create(pool).await?))
}

async fn list_pools(State(state): State<ServerState>, headers: HeaderMap) -> Result<Json<Vec<Pool>>, ApiError> {
    check_auth(&state, &headers)?;
    Ok(Json(state.store.pools.list().await?))
}

async fn delete_pool(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    check_auth(&state, &headers)?;
    state.store.pools.delete(&PoolId::from_str(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct CreateModelRequest {
    name: String,
    #[serde(default)]
    context_length: Option<u64>,
    #[serde(default)]
    capabilities: std::collections::HashSet<Capability>,
}

async fn create_model(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(req): Json<CreateModelRequest>,
) -> Result<Json<Model>, ApiError> {
    check_auth(&state, &headers)?;
    let model = Model {
        id: ModelId::new(),
        name: req.name,
        context_length: req.context_length,
        capabilities: req.capabilities,
    };
    Ok(Json(state.store.models.create(model).await?))
}

async fn list_models(State(state): State<ServerState>, headers: HeaderMap) -> Result<Json<Vec<Model>>, ApiError> {
    check_auth(&state, &headers)?;
    Ok(Json(state.store.models.list().await?))
}

async fn delete_model(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    check_auth(&state, &headers)?;
    state.store.models.delete(&ModelId::from_str(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_chain(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(chain): Json<ChainDefinition>,
) -> Result<StatusCode, ApiError> {
    check_auth(&state, &headers)?;
    chains::set(&state.store.exec, &chain).await?;
    Ok(StatusCode::CREATED)
}

async fn list_chains(State(state): State<ServerState>, headers: HeaderMap) -> Result<Json<Vec<ChainDefinition>>, ApiError> {
    check_auth(&state, &headers)?;
    Ok(Json(chains::list(&state.store.exec).await?))
}

async fn get_chain(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ChainDefinition>, ApiError> {
    check_auth(&state, &headers)?;
    let chain = chains::get(&state.store.exec, &id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("chain {id}")))?;
    Ok(Json(chain))
}

async fn update_chain(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(mut chain): Json<ChainDefinition>,
) -> Result<StatusCode, ApiError> {
    check_auth(&state, &headers)?;
    chain.id = id;
    chains::update(&state.store.exec, &chain).await?;
    Ok(StatusCode::OK)
}

async fn delete_chain(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    check_auth(&state, &headers)?;
    chains::delete(&state.store.exec, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ConfigureProviderRequest {
    api_key: String,
}

/// Never echoes `api_key` back over HTTP, even though `ProviderConfig`
/// itself derives `Serialize` for internal storage round-trips — the
/// type's `Debug` impl redacts the key for logs, this view redacts it
/// for responses.
#[derive(Serialize)]
struct ProviderConfigView {
    #[serde(rename = "type")]
    provider_type: String,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<ProviderConfig> for ProviderConfigView {
    fn from(config: ProviderConfig) -> Self {
        Self {
            provider_type: config.provider_type,
            updated_at: config.updated_at,
        }
    }
}

async fn configure_provider(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(provider_type): Path<String>,
    Json(req): Json<ConfigureProviderRequest>,
) -> Result<Json<ProviderConfigView>, ApiError> {
    check_auth(&state, &headers)?;
    let config = ProviderConfig {
        provider_type,
        api_key: req.api_key,
        updated_at: chrono::Utc::now(),
    };
    Ok(Json(state.store.providers.upsert(config).await?.into()))
}

async fn list_provider_configs(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ProviderConfigView>>, ApiError> {
    check_auth(&state, &headers)?;
    Ok(Json(state.store.providers.list().await?.into_iter().map(Into::into).collect()))
}

#[derive(Deserialize)]
struct CreateRemoteHookRequest {
    name: String,
    endpoint_url: String,
    #[serde(default = "default_method")]
    method: String,
    timeout_ms: u64,
    #[serde(default)]
    headers: HashMap<String, String>,
}

fn default_method() -> String {
    "POST".to_string()
}

async fn create_remote_hook(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(req): Json<CreateRemoteHookRequest>,
) -> Result<Json<RemoteHook>, ApiError> {
    check_auth(&state, &headers)?;
    let hook = RemoteHook {
        id: uuid::Uuid::new_v4().to_string(),
        name: req.name,
        endpoint_url: req.endpoint_url,
        method: req.method,
        timeout_ms: req.timeout_ms,
        headers: req.headers,
    };
    hook.validate().map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    Ok(Json(state.store.remote_hooks.create(hook).await?))
}

async fn list_remote_hooks(State(state): State<ServerState>, headers: HeaderMap) -> Result<Json<Vec<RemoteHook>>, ApiError> {
    check_auth(&state, &headers)?;
    Ok(Json(state.store.remote_hooks.list().await?))
}

async fn delete_remote_hook(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    check_auth(&state, &headers)?;
    state.store.remote_hooks.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
