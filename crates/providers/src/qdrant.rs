use crate::ProviderError;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
    pub api_key: Option<String>,
}

#[derive(Clone)]
pub struct QdrantClient {
    client: Client,
    cfg: QdrantConfig,
}

impl QdrantClient {
    pub fn new(cfg: QdrantConfig) -> Self {
        Self {
            client: Client::new(),
            cfg,
        }
    }

    fn points_url(&self, suffix: &str) -> String {
        format!(
            "{}/collections/{}/points{}",
            self.cfg.url, self.cfg.collection, suffix
        )
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, ProviderError> {
        let builder = match &self.cfg.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        };
        let resp = builder
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.bytes().await.unwrap_or(Bytes::from_static(b""));
            return Err(ProviderError::RequestFailed(format!(
                "status {} body {:?}",
                status, body
            )));
        }
        Ok(resp)
    }

    pub async fn search(
        &self,
        vector: Vec<f32>,
        limit: u64,
        filter: Option<serde_json::Value>,
        score_threshold: Option<f32>,
    ) -> Result<QdrantSearchResponse, ProviderError> {
        #[derive(Serialize)]
        struct SearchRequest {
            vector: Vec<f32>,
            limit: u64,
            with_payload: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            filter: Option<serde_json::Value>,
            #[serde(skip_serializing_if = "Option::is_none")]
            score_threshold: Option<f32>,
        }
        let body = SearchRequest {
            vector,
            limit,
            with_payload: true,
            filter,
            score_threshold,
        };
        let resp = self
            .send(self.client.post(self.points_url("/search")).json(&body))
            .await?;
        resp.json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    pub async fn upsert(&self, points: Vec<QdrantPoint>) -> Result<(), ProviderError> {
        let req = QdrantUpsert { points };
        self.send(self.client.put(self.points_url("")).json(&req))
            .await?;
        Ok(())
    }

    /// Returns up to `limit` point ids matching `filter`, without payloads.
    pub async fn scroll_ids(
        &self,
        filter: serde_json::Value,
        limit: u64,
    ) -> Result<Vec<String>, ProviderError> {
        #[derive(Serialize)]
        struct ScrollRequest {
            filter: serde_json::Value,
            limit: u64,
            with_payload: bool,
            with_vector: bool,
        }
        #[derive(Deserialize)]
        struct ScrollPoint {
            id: serde_json::Value,
        }
        #[derive(Deserialize)]
        struct ScrollResult {
            points: Vec<ScrollPoint>,
        }
        #[derive(Deserialize)]
        struct ScrollResponse {
            result: ScrollResult,
        }
        let body = ScrollRequest {
            filter,
            limit,
            with_payload: false,
            with_vector: false,
        };
        let resp = self
            .send(self.client.post(self.points_url("/scroll")).json(&body))
            .await?;
        let parsed: ScrollResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(parsed
            .result
            .points
            .into_iter()
            .map(|p| point_id_string(&p.id))
            .collect())
    }

    pub async fn delete_points(&self, ids: &[String]) -> Result<(), ProviderError> {
        #[derive(Serialize)]
        struct DeletePoints<'a> {
            points: &'a [String],
        }
        let body = DeletePoints { points: ids };
        self.send(
            self.client
                .post(self.points_url("/delete?wait=true"))
                .json(&body),
        )
        .await?;
        Ok(())
    }
}

/// Point ids come back as either a UUID string or an integer.
pub fn point_id_string(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Serialize)]
pub struct QdrantUpsert {
    pub points: Vec<QdrantPoint>,
}

#[derive(Debug, Serialize)]
pub struct QdrantPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct QdrantSearchResponse {
    pub result: Vec<SearchResult>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SearchResult {
    pub id: serde_json::Value,
    pub score: f32,
    pub payload: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ids_render_without_quotes() {
        assert_eq!(
            point_id_string(&serde_json::json!("5c56c793-69f3-4fbf-87e6-c4bf54c28c26")),
            "5c56c793-69f3-4fbf-87e6-c4bf54c28c26"
        );
        assert_eq!(point_id_string(&serde_json::json!(42)), "42");
    }
}
