//! Plain text completion ("prompt") interactions, the `prompt` capability
//! (task type `parse_number`/`parse_bool`/model-execution against the
//! `prompt` capability all go through this trait).

use crate::error::CoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl PromptRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: None,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptResponse {
    pub text: String,
}

impl std::fmt::Display for PromptResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

#[async_trait]
pub trait PromptProvider: Send + Sync {
    async fn prompt(&self, request: &PromptRequest) -> Result<PromptResponse, CoreError>;
}
