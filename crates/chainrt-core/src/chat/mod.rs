//! Chat-based interactions with language models.

use crate::error::CoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role of a participant in a chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single message in a chat conversation. This is the `chat_history`
/// element type (§3 Data-Type tag).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Error,
    Unknown,
}

/// Token usage reported by the provider, when it reports one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    #[serde(alias = "prompt_tokens", alias = "prompt_eval_count")]
    pub input_tokens: u32,
    #[serde(alias = "completion_tokens", alias = "eval_count")]
    pub output_tokens: u32,
}

/// A chat conversation plus an optional leading system instruction, the
/// input the `model_execution` task assembles before dispatch (§4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: ChatMessage,
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
}

impl std::fmt::Display for ChatResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message.content)
    }
}

/// Capability trait a resolved backend client implements for the `chat`
/// capability. Providers that don't support chat simply aren't returned
/// by the resolver for chat requests.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, CoreError>;
}
