//! Tier 3: GL/department inference from an external model.
//!
//! Every failure mode (provider error, malformed answer, timeout) is a miss.
//! Suggestions from here are advisory and never applied without confirmation.

use crate::normalize::truncate_chars;
use providers::{InferResponse, InferenceProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct AiFallback {
    provider: Arc<dyn InferenceProvider>,
    timeout: Duration,
    max_chars: usize,
}

impl AiFallback {
    pub fn new(provider: Arc<dyn InferenceProvider>, timeout: Duration, max_chars: usize) -> Self {
        Self {
            provider,
            timeout,
            max_chars,
        }
    }

    pub async fn suggest(&self, description: &str) -> Option<InferResponse> {
        let prompt = build_prompt(truncate_chars(description, self.max_chars));
        match tokio::time::timeout(self.timeout, self.provider.infer(&prompt)).await {
            Ok(Ok(resp)) if !resp.gl_code.trim().is_empty() => {
                debug!(gl_code = %resp.gl_code, confidence = resp.confidence, "inference suggestion");
                Some(InferResponse {
                    confidence: resp.confidence.clamp(0.0, 1.0),
                    ..resp
                })
            }
            Ok(Ok(_)) => {
                warn!("inference returned an empty GL code; treating as miss");
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "inference provider failed; treating as miss");
                None
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "inference timed out; treating as miss");
                None
            }
        }
    }
}

fn build_prompt(description: &str) -> String {
    format!(
        "Suggest the general-ledger code and department for this expense transaction. \
         Answer with a JSON object containing gl_code, department, confidence (0 to 1) and rationale.\n\
         Transaction description: {description}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::ProviderError;

    struct Fixed(Result<InferResponse, ()>);

    #[async_trait::async_trait]
    impl InferenceProvider for Fixed {
        async fn infer(&self, _prompt: &str) -> Result<InferResponse, ProviderError> {
            self.0
                .clone()
                .map_err(|_| ProviderError::RequestFailed("status 503".into()))
        }
    }

    struct Slow;

    #[async_trait::async_trait]
    impl InferenceProvider for Slow {
        async fn infer(&self, _prompt: &str) -> Result<InferResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(ProviderError::NotImplemented)
        }
    }

    fn answer(gl: &str, confidence: f32) -> InferResponse {
        InferResponse {
            gl_code: gl.into(),
            department: "OPS".into(),
            confidence,
            rationale: None,
        }
    }

    fn fallback(provider: impl InferenceProvider + 'static) -> AiFallback {
        AiFallback::new(Arc::new(provider), Duration::from_millis(50), 500)
    }

    #[tokio::test]
    async fn returns_clamped_suggestion() {
        let got = fallback(Fixed(Ok(answer("6100", 1.4)))).suggest("UBER TRIP").await;
        assert_eq!(got.map(|r| (r.gl_code, r.confidence)), Some(("6100".into(), 1.0)));
    }

    #[tokio::test]
    async fn errors_and_empty_answers_are_misses() {
        assert!(fallback(Fixed(Err(()))).suggest("UBER TRIP").await.is_none());
        assert!(fallback(Fixed(Ok(answer(" ", 0.9)))).suggest("UBER TRIP").await.is_none());
    }

    #[tokio::test]
    async fn timeout_is_a_miss() {
        assert!(fallback(Slow).suggest("UBER TRIP").await.is_none());
    }

    #[test]
    fn prompt_carries_description() {
        assert!(build_prompt("DELTA AIR").contains("DELTA AIR"));
    }
}
