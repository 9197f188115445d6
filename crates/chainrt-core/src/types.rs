//! OpenAI-wire-compatible types and search-result types — two more
//! members of the Data-Type tag closed set (§3) that aren't owned by the
//! chat/prompt/embedding provider traits themselves.

use crate::chat::{ChatMessage, ChatRole};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChatRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChoice {
    pub index: u32,
    pub message: OpenAiMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChatResponse {
    pub id: String,
    pub object: String,
    pub model: String,
    pub choices: Vec<OpenAiChoice>,
}

/// Flattens an OpenAI-shaped request into a plain `chat_history`
/// (coercion table entry `openai_chat → chat_history`, §4.G).
pub fn openai_to_history(req: &OpenAiChatRequest) -> Vec<ChatMessage> {
    req.messages
        .iter()
        .map(|m| ChatMessage {
            role: match m.role.as_str() {
                "system" => ChatRole::System,
                "assistant" => ChatRole::Assistant,
                _ => ChatRole::User,
            },
            content: m.content.clone(),
        })
        .collect()
}

/// Wraps a single assistant message as an `OpenAiChatResponse`, the
/// inverse conversion used by `openai_chat_chain`'s final task.
pub fn history_to_openai_response(model: &str, message: &ChatMessage) -> OpenAiChatResponse {
    OpenAiChatResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        object: "chat.completion".to_string(),
        model: model.to_string(),
        choices: vec![OpenAiChoice {
            index: 0,
            message: OpenAiMessage {
                role: "assistant".to_string(),
                content: message.content.clone(),
            },
            finish_reason: "stop".to_string(),
        }],
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResults(pub Vec<SearchResult>);
