//! Hook registry (§4.F): a local `name → handler` table, falling back to
//! remote HTTP hook dispatch via `reqwest::Client::post` with a per-hook
//! timeout.

use crate::error::CoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// `{name, type, args}` — what a `hook` task passes to `Exec`.
#[derive(Debug, Clone)]
pub struct HookCall {
    pub name: String,
    pub hook_type: String,
    pub args: HashMap<String, String>,
}

/// The result a hook (local or remote) produces for the chain engine.
#[derive(Debug, Clone)]
pub struct HookResult {
    pub output: Value,
    pub data_type: String,
    pub transition: String,
}

/// A locally registered hook implementation.
#[async_trait]
pub trait LocalHook: Send + Sync {
    async fn call(&self, call: &HookCall, input: &Value) -> Result<HookResult, CoreError>;
}

/// `{id, name, endpointURL, method, timeoutMs, headers?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteHook {
    pub id: String,
    pub name: String,
    pub endpoint_url: String,
    pub method: String,
    pub timeout_ms: u64,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl RemoteHook {
    /// Invariant 6: remote-hook endpoint URL is absolute.
    pub fn validate(&self) -> Result<(), String> {
        let parsed = url::Url::parse(&self.endpoint_url).map_err(|e| e.to_string())?;
        if parsed.cannot_be_a_base() {
            return Err(format!("remote hook {} endpoint must be absolute", self.name));
        }
        Ok(())
    }
}

/// Looks up a `RemoteHook` record by name. Implemented by `chainrt-store`
/// over the KV/SQL table; the core only depends on this trait.
#[async_trait]
pub trait RemoteHookLookup: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<RemoteHook>, CoreError>;
    /// Paginated listing, used by `Supports()`.
    async fn list_all(&self) -> Result<Vec<RemoteHook>, CoreError>;
}

/// Wire request body for a remote hook call (§6 "Remote hook wire
/// protocol").
#[derive(Debug, Serialize)]
struct RemoteHookRequest<'a> {
    #[serde(rename = "startingTime")]
    starting_time: DateTime<Utc>,
    input: &'a Value,
    #[serde(rename = "dataType")]
    data_type: &'a str,
    transition: &'a str,
    args: RemoteHookCallArgs<'a>,
}

#[derive(Debug, Serialize)]
struct RemoteHookCallArgs<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    hook_type: &'a str,
    args: &'a HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RemoteHookResponse {
    output: Value,
    #[serde(rename = "dataType")]
    data_type: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    transition: String,
}

/// Local table + remote dispatch. Lookup order on `exec`: local first,
/// then remote.
pub struct HookRegistry {
    local: HashMap<String, Arc<dyn LocalHook>>,
    remote_lookup: Option<Arc<dyn RemoteHookLookup>>,
    http: reqwest::Client,
}

impl HookRegistry {
    pub fn new(remote_lookup: Option<Arc<dyn RemoteHookLookup>>) -> Self {
        Self {
            local: HashMap::new(),
            remote_lookup,
            http: crate::client::build_http_client(),
        }
    }

    /// Registers a local hook. Local registration happens once at startup
    /// — "copy-on-start" per §5's shared-resource policy.
    pub fn register_local(&mut self, name: impl Into<String>, hook: Arc<dyn LocalHook>) {
        self.local.insert(name.into(), hook);
    }

    pub async fn exec(
        &self,
        call: HookCall,
        input: Value,
        input_data_type: &str,
        current_transition: &str,
    ) -> Result<HookResult, CoreError> {
        if let Some(hook) = self.local.get(&call.name) {
            return hook.call(&call, &input).await;
        }

        let Some(lookup) = &self.remote_lookup else {
            return Err(CoreError::NotFound(format!("hook {} not found", call.name)));
        };
        let Some(remote) = lookup.find_by_name(&call.name).await? else {
            return Err(CoreError::NotFound(format!("hook {} not found", call.name)));
        };

        self.call_remote(&remote, call, input, input_data_type, current_transition)
            .await
    }

    async fn call_remote(
        &self,
        remote: &RemoteHook,
        call: HookCall,
        input: Value,
        input_data_type: &str,
        current_transition: &str,
    ) -> Result<HookResult, CoreError> {
        let body = RemoteHookRequest {
            starting_time: Utc::now(),
            input: &input,
            data_type: input_data_type,
            transition: current_transition,
            args: RemoteHookCallArgs {
                name: &call.name,
                hook_type: &call.hook_type,
                args: &call.args,
            },
        };

        let mut request = self
            .http
            .request(
                method_from_str(&remote.method),
                &remote.endpoint_url,
            )
            .timeout(Duration::from_millis(remote.timeout_ms))
            .json(&body);
        for (key, value) in &remote.headers {
            request = request.header(key, value);
        }

        let started = Instant::now();
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CoreError::TransientUpstream(format!(
                    "hook {} timed out after {:?}",
                    remote.name,
                    started.elapsed()
                ))
            } else {
                CoreError::TransientUpstream(format!("hook {} request failed: {e}", remote.name))
            }
        })?;

        let status = response.status();
        // "Always parse the body even on non-2xx because well-behaved
        // remote hooks return a structured error body" (§9).
        let parsed: Result<RemoteHookResponse, _> = response.json().await;

        if !status.is_success() {
            let message = match &parsed {
                Ok(body) => body.error.clone().unwrap_or_else(|| format!("status {status}")),
                Err(_) => format!("status {status}"),
            };
            // Surfaced with `transition = <status code>` (§4.F) so a chain
            // can route an `equals` branch on the status instead of only
            // falling back to `transition.onFailure`.
            return Err(CoreError::HookProtocol {
                hook: remote.name.clone(),
                message,
                transition: Some(status.as_u16().to_string()),
            });
        }

        let parsed = parsed.map_err(|e| CoreError::HookProtocol {
            hook: remote.name.clone(),
            message: format!("malformed response: {e}"),
            transition: None,
        })?;

        if let Some(err) = parsed.error {
            return Err(CoreError::HookProtocol {
                hook: remote.name.clone(),
                message: err,
                transition: None,
            });
        }

        Ok(HookResult {
            output: parsed.output,
            data_type: parsed.data_type,
            transition: parsed.transition,
        })
    }

    /// Local hook names plus all remote names, per `Supports()`.
    pub async fn supports(&self) -> Result<Vec<String>, CoreError> {
        let mut names: Vec<String> = self.local.keys().cloned().collect();
        if let Some(lookup) = &self.remote_lookup {
            names.extend(lookup.list_all().await?.into_iter().map(|r| r.name));
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}

fn method_from_str(method: &str) -> reqwest::Method {
    method.parse().unwrap_or(reqwest::Method::POST)
}
