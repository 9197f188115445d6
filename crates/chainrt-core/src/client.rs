//! Generic HTTP clients bound to `(base_url, model_name, backend_type)`,
//! implementing [`ChatProvider`], [`PromptProvider`], and
//! [`EmbeddingProvider`] as one client selected by the resolver per
//! request (§4.E), rather than a dynamically loaded provider plugin.

use crate::chat::{ChatProvider, ChatRequest, ChatResponse, ChatRole, FinishReason, Usage};
use crate::embedding::EmbeddingProvider;
use crate::error::CoreError;
use crate::model::BackendType;
use crate::prompt::{PromptProvider, PromptRequest, PromptResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A client bound to one backend + model, selected by the resolver for a
/// single request. Cheap to clone (wraps a shared `reqwest::Client`).
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    backend_type: BackendType,
}

impl BackendClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, model: impl Into<String>, backend_type: BackendType) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
            backend_type,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct OllamaMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct VllmChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
}

#[derive(Deserialize)]
struct VllmChatResponse {
    choices: Vec<VllmChoice>,
    #[serde(default)]
    usage: Option<VllmUsage>,
}

#[derive(Deserialize)]
struct VllmChoice {
    message: OllamaResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct VllmUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Serialize)]
struct VllmCompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct VllmCompletionResponse {
    choices: Vec<VllmCompletionChoice>,
}

#[derive(Deserialize)]
struct VllmCompletionChoice {
    text: String,
}

#[derive(Serialize)]
struct VllmEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct VllmEmbedResponse {
    data: Vec<VllmEmbedDatum>,
}

#[derive(Deserialize)]
struct VllmEmbedDatum {
    embedding: Vec<f32>,
}

fn role_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

async fn handle_http_error(response: reqwest::Response) -> Result<reqwest::Response, CoreError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(CoreError::TransientUpstream(format!(
        "backend responded {status}: {body}"
    )))
}

#[async_trait]
impl ChatProvider for BackendClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, CoreError> {
        match self.backend_type {
            BackendType::Ollama => {
                let messages: Vec<OllamaMessage> = request
                    .messages
                    .iter()
                    .map(|m| OllamaMessage {
                        role: role_str(m.role),
                        content: &m.content,
                    })
                    .collect();
                let body = OllamaChatRequest {
                    model: &self.model,
                    messages,
                    stream: false,
                };
                let response = self
                    .http
                    .post(self.url("api/chat"))
                    .timeout(Duration::from_secs(120))
                    .json(&body)
                    .send()
                    .await?;
                let response = handle_http_error(response).await?;
                let parsed: OllamaChatResponse = response.json().await?;
                Ok(ChatResponse {
                    message: crate::chat::ChatMessage::assistant(parsed.message.content),
                    finish_reason: if parsed.done { FinishReason::Stop } else { FinishReason::Unknown },
                    usage: Some(Usage {
                        input_tokens: parsed.prompt_eval_count,
                        output_tokens: parsed.eval_count,
                    }),
                })
            }
            BackendType::Vllm => {
                let messages: Vec<OllamaMessage> = request
                    .messages
                    .iter()
                    .map(|m| OllamaMessage {
                        role: role_str(m.role),
                        content: &m.content,
                    })
                    .collect();
                let body = VllmChatRequest {
                    model: &self.model,
                    messages,
                };
                let response = self
                    .http
                    .post(self.url("v1/chat/completions"))
                    .timeout(Duration::from_secs(120))
                    .json(&body)
                    .send()
                    .await?;
                let response = handle_http_error(response).await?;
                let parsed: VllmChatResponse = response.json().await?;
                let choice = parsed
                    .choices
                    .into_iter()
                    .next()
                    .ok_or_else(|| CoreError::TransientUpstream("empty choices from vllm".to_string()))?;
                Ok(ChatResponse {
                    message: crate::chat::ChatMessage::assistant(choice.message.content),
                    finish_reason: match choice.finish_reason.as_deref() {
                        Some("stop") => FinishReason::Stop,
                        Some("length") => FinishReason::Length,
                        Some("content_filter") => FinishReason::ContentFilter,
                        _ => FinishReason::Unknown,
                    },
                    usage: parsed.usage.map(|u| Usage {
                        input_tokens: u.prompt_tokens,
                        output_tokens: u.completion_tokens,
                    }),
                })
            }
        }
    }
}

#[async_trait]
impl PromptProvider for BackendClient {
    async fn prompt(&self, request: &PromptRequest) -> Result<PromptResponse, CoreError> {
        match self.backend_type {
            BackendType::Ollama => {
                let body = OllamaGenerateRequest {
                    model: &self.model,
                    prompt: &request.prompt,
                    stream: false,
                };
                let response = self
                    .http
                    .post(self.url("api/generate"))
                    .timeout(Duration::from_secs(120))
                    .json(&body)
                    .send()
                    .await?;
                let response = handle_http_error(response).await?;
                let parsed: OllamaGenerateResponse = response.json().await?;
                Ok(PromptResponse { text: parsed.response })
            }
            BackendType::Vllm => {
                let body = VllmCompletionRequest {
                    model: &self.model,
                    prompt: &request.prompt,
                };
                let response = self
                    .http
                    .post(self.url("v1/completions"))
                    .timeout(Duration::from_secs(120))
                    .json(&body)
                    .send()
                    .await?;
                let response = handle_http_error(response).await?;
                let parsed: VllmCompletionResponse = response.json().await?;
                let text = parsed
                    .choices
                    .into_iter()
                    .next()
                    .map(|c| c.text)
                    .unwrap_or_default();
                Ok(PromptResponse { text })
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for BackendClient {
    async fn embed(&self, input: &[String]) -> Result<Vec<Vec<f32>>, CoreError> {
        match self.backend_type {
            BackendType::Ollama => {
                let body = OllamaEmbedRequest {
                    model: &self.model,
                    input,
                };
                let response = self
                    .http
                    .post(self.url("api/embed"))
                    .timeout(Duration::from_secs(60))
                    .json(&body)
                    .send()
                    .await?;
                let response = handle_http_error(response).await?;
                let parsed: OllamaEmbedResponse = response.json().await?;
                Ok(parsed.embeddings)
            }
            BackendType::Vllm => {
                let body = VllmEmbedRequest {
                    model: &self.model,
                    input,
                };
                let response = self
                    .http
                    .post(self.url("v1/embeddings"))
                    .timeout(Duration::from_secs(60))
                    .json(&body)
                    .send()
                    .await?;
                let response = handle_http_error(response).await?;
                let parsed: VllmEmbedResponse = response.json().await?;
                Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
            }
        }
    }
}

/// Lists the model names a backend actually serves, used by the
/// reconciler (§4.D) to populate `pulledModels`.
pub async fn list_models(
    http: &reqwest::Client,
    base_url: &str,
    backend_type: BackendType,
) -> Result<Vec<PulledModelInfo>, CoreError> {
    let url = match backend_type {
        BackendType::Ollama => format!("{}/api/tags", base_url.trim_end_matches('/')),
        BackendType::Vllm => format!("{}/v1/models", base_url.trim_end_matches('/')),
    };
    let response = http.get(&url).timeout(Duration::from_secs(10)).send().await?;
    let response = handle_http_error(response).await?;
    let body: serde_json::Value = response.json().await?;

    let models = match backend_type {
        BackendType::Ollama => body
            .get("models")
            .and_then(|m| m.as_array())
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| {
                let name = m.get("name")?.as_str()?.to_string();
                let context_length = m
                    .get("details")
                    .and_then(|d| d.get("context_length"))
                    .and_then(|c| c.as_u64());
                Some(PulledModelInfo { name, context_length })
            })
            .collect(),
        BackendType::Vllm => body
            .get("data")
            .and_then(|m| m.as_array())
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| {
                let name = m.get("id")?.as_str()?.to_string();
                let context_length = m.get("max_model_len").and_then(|c| c.as_u64());
                Some(PulledModelInfo { name, context_length })
            })
            .collect(),
    };
    Ok(models)
}

pub struct PulledModelInfo {
    pub name: String,
    pub context_length: Option<u64>,
}

pub fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
