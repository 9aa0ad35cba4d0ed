//! Provider abstractions for embedding and GL inference services.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod hashing;
pub mod noop;
pub mod openai;
pub mod qdrant;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("not implemented")]
    NotImplemented,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub vectors: Vec<Vec<f32>>,
}

/// A GL/department suggestion returned by an inference model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferResponse {
    pub gl_code: String,
    pub department: String,
    pub confidence: f32,
    #[serde(default)]
    pub rationale: Option<String>,
}

#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError>;
}

#[async_trait::async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn infer(&self, prompt: &str) -> Result<InferResponse, ProviderError>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    embeddings: HashMap<String, Arc<dyn EmbeddingProvider>>,
    inference: HashMap<String, Arc<dyn InferenceProvider>>,
    pub preferred_embedding: Option<String>,
    pub preferred_inference: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_embedding(mut self, name: &str, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embeddings.insert(name.to_string(), provider);
        self
    }

    pub fn with_inference(mut self, name: &str, provider: Arc<dyn InferenceProvider>) -> Self {
        self.inference.insert(name.to_string(), provider);
        self
    }

    pub fn set_preferred_embedding(mut self, name: &str) -> Self {
        self.preferred_embedding = Some(name.to_string());
        self
    }

    pub fn set_preferred_inference(mut self, name: &str) -> Self {
        self.preferred_inference = Some(name.to_string());
        self
    }

    pub fn embedding(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<dyn EmbeddingProvider>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_embedding.clone())
            .ok_or_else(|| {
                ProviderError::UnknownProvider("no embedding provider configured".into())
            })?;
        self.embeddings
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }

    pub fn inference(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<dyn InferenceProvider>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_inference.clone())
            .ok_or_else(|| {
                ProviderError::UnknownProvider("no inference provider configured".into())
            })?;
        self.inference
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_preferred_and_named_providers() {
        let reg = ProviderRegistry::new()
            .with_embedding("noop", Arc::new(noop::NoopProvider))
            .with_embedding("hashing", Arc::new(hashing::HashingEmbedder::new(32)))
            .with_inference("noop", Arc::new(noop::NoopProvider))
            .set_preferred_embedding("hashing");

        assert!(reg.embedding(None).is_ok());
        assert!(reg.embedding(Some("noop")).is_ok());
        assert!(matches!(
            reg.embedding(Some("openai")),
            Err(ProviderError::UnknownProvider(name)) if name == "openai"
        ));
        // No preferred inference provider set.
        assert!(reg.inference(None).is_err());
        assert!(reg.inference(Some("noop")).is_ok());
    }
}
