//! Tier 2 store: embeds description text and keeps categorization-tagged
//! vectors in a [`NearestNeighborIndex`].

use crate::error::Result;
use crate::normalize::truncate_chars;
use crate::vectorstore::{EmbeddingRecord, NearestNeighborIndex, Neighbor};
use chrono::{DateTime, Duration, Utc};
use providers::{EmbeddingProvider, ProviderError};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub similarity_threshold: f32,
    pub max_results: usize,
    pub max_embed_chars: usize,
    pub unverified_ttl: Duration,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.92,
            max_results: 5,
            max_embed_chars: 500,
            unverified_ttl: Duration::days(90),
        }
    }
}

#[derive(Clone)]
pub struct EmbeddingIndex {
    provider: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn NearestNeighborIndex>,
    settings: EmbeddingSettings,
}

impl EmbeddingIndex {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn NearestNeighborIndex>,
        settings: EmbeddingSettings,
    ) -> Self {
        Self {
            provider,
            index,
            settings,
        }
    }

    /// Embeds at most `max_embed_chars` of `text`. An empty vector from the
    /// provider means embedding is disabled and yields `None`.
    pub async fn embed(&self, text: &str) -> std::result::Result<Option<Vec<f32>>, ProviderError> {
        let input = truncate_chars(text, self.settings.max_embed_chars).to_string();
        if input.trim().is_empty() {
            return Ok(None);
        }
        let resp = self.provider.embed(&[input]).await?;
        Ok(resp.vectors.into_iter().next().filter(|v| !v.is_empty()))
    }

    /// Neighbors above the similarity threshold, best first.
    pub async fn search(
        &self,
        user_id: &str,
        vector: &[f32],
        now: DateTime<Utc>,
    ) -> Result<Vec<Neighbor>> {
        let neighbors = self
            .index
            .query(
                user_id,
                vector,
                self.settings.similarity_threshold,
                self.settings.max_results,
                now.timestamp(),
            )
            .await?;
        debug!(user = %user_id, hits = neighbors.len(), "similarity search");
        Ok(neighbors)
    }

    /// Stores a categorization for `text`. Verified records never expire;
    /// unverified ones expire after the configured horizon. Returns `false`
    /// when nothing could be embedded.
    pub async fn remember(
        &self,
        user_id: &str,
        text: &str,
        gl_code: &str,
        department: &str,
        verified: bool,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let vector = match self.embed(text).await {
            Ok(Some(v)) => v,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!(user = %user_id, error = %e, "embedding provider failed; not stored");
                return Ok(false);
            }
        };
        let stored_text = truncate_chars(text, self.settings.max_embed_chars);
        let created_at = now.timestamp();
        let record = if verified {
            EmbeddingRecord::verified(user_id, stored_text, gl_code, department, vector, created_at)
        } else {
            EmbeddingRecord::provisional(
                user_id,
                stored_text,
                gl_code,
                department,
                vector,
                created_at,
                (now + self.settings.unverified_ttl).timestamp(),
            )
        };
        self.index.insert(record).await?;
        Ok(true)
    }
}
