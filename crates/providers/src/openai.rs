use crate::{EmbedResponse, EmbeddingProvider, InferResponse, InferenceProvider, ProviderError};
use bytes::Bytes;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
}

#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    cfg: Arc<OpenAiConfig>,
}

impl OpenAiProvider {
    pub fn new(cfg: OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            cfg: Arc::new(cfg),
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Rate limits and outages surface as `RequestFailed` so callers can treat
/// them as a tier miss.
async fn ensure_success(resp: Response) -> Result<Response, ProviderError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.bytes().await.unwrap_or(Bytes::from_static(b""));
    Err(ProviderError::RequestFailed(format!(
        "status {} body {:?}",
        status, body
    )))
}

#[async_trait::async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        #[derive(serde::Serialize)]
        struct EmbedRequest<'a> {
            model: &'a str,
            input: &'a [String],
        }

        let body = EmbedRequest {
            model: &self.cfg.embedding_model,
            input: texts,
        };

        let resp = self
            .client
            .post(format!("{}/v1/embeddings", self.cfg.base_url))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        let resp = ensure_success(resp).await?;

        let parsed: EmbeddingApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Ok(EmbedResponse {
            vectors: parsed.data.into_iter().map(|d| d.embedding).collect(),
        })
    }
}

#[async_trait::async_trait]
impl InferenceProvider for OpenAiProvider {
    async fn infer(&self, prompt: &str) -> Result<InferResponse, ProviderError> {
        #[derive(serde::Serialize)]
        struct ChatMessage<'a> {
            role: &'static str,
            content: &'a str,
        }
        #[derive(serde::Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(serde::Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<ChatMessage<'a>>,
            response_format: ResponseFormat,
            temperature: f32,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChatMessageResp,
        }
        #[derive(Deserialize)]
        struct ChatMessageResp {
            content: String,
        }
        #[derive(Deserialize)]
        struct ChatApiResponse {
            choices: Vec<Choice>,
        }

        let body = ChatRequest {
            model: &self.cfg.chat_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You assign general-ledger codes to expense transactions. \
                              Reply with a JSON object with keys gl_code, department, \
                              confidence (0..1) and rationale.",
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
            temperature: 0.0,
        };

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.cfg.base_url))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        let resp = ensure_success(resp).await?;

        let parsed: ChatApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        parse_suggestion(&content)
    }
}

/// Parses the model's JSON reply, clamping the self-reported confidence.
pub fn parse_suggestion(content: &str) -> Result<InferResponse, ProviderError> {
    let mut suggestion: InferResponse = serde_json::from_str(content.trim())
        .map_err(|e| ProviderError::InvalidResponse(format!("{e}: {content}")))?;
    if suggestion.gl_code.trim().is_empty() {
        return Err(ProviderError::InvalidResponse("empty gl_code".into()));
    }
    if !suggestion.confidence.is_finite() {
        suggestion.confidence = 0.0;
    }
    suggestion.confidence = suggestion.confidence.clamp(0.0, 1.0);
    Ok(suggestion)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_clamps_model_reply() {
        let reply = r#"{"gl_code":"6100","department":"SALES","confidence":1.7,"rationale":"meal"}"#;
        let s = parse_suggestion(reply).unwrap();
        assert_eq!(s.gl_code, "6100");
        assert_eq!(s.department, "SALES");
        assert_eq!(s.confidence, 1.0);
    }

    #[test]
    fn rejects_non_json_and_blank_codes() {
        assert!(matches!(
            parse_suggestion("travel, probably"),
            Err(ProviderError::InvalidResponse(_))
        ));
        assert!(parse_suggestion(r#"{"gl_code":" ","department":"OPS","confidence":0.5}"#).is_err());
    }
}
