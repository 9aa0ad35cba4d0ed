use crate::{EmbedResponse, EmbeddingProvider, InferResponse, InferenceProvider, ProviderError};

/// Disabled provider: empty vectors and no inference.
#[derive(Debug, Default)]
pub struct NoopProvider;

#[async_trait::async_trait]
impl EmbeddingProvider for NoopProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        Ok(EmbedResponse {
            vectors: vec![vec![]; texts.len()],
        })
    }
}

#[async_trait::async_trait]
impl InferenceProvider for NoopProvider {
    async fn infer(&self, _prompt: &str) -> Result<InferResponse, ProviderError> {
        Err(ProviderError::NotImplemented)
    }
}
