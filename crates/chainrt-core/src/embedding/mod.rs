//! Vector embedding generation, the `embed` capability.

use crate::error::CoreError;
use async_trait::async_trait;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, input: &[String]) -> Result<Vec<Vec<f32>>, CoreError>;
}
