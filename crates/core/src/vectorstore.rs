//! Nearest-neighbor index over categorization-tagged vectors.
//!
//! The router only sees [`NearestNeighborIndex`]; the SQLite index does a
//! brute-force cosine scan per owner, the Qdrant index delegates to a remote
//! collection configured for cosine distance.

use crate::error::{EngineError, Result};
use providers::qdrant::{point_id_string, QdrantClient, QdrantPoint};
use sqlx::SqlitePool;
use std::collections::HashMap;
use storage::models::EmbeddingRow;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub id: String,
    pub user_id: String,
    pub description_text: String,
    pub gl_code: String,
    pub department: String,
    pub vector: Vec<f32>,
    pub verified: bool,
    /// Unix seconds; `None` exactly when `verified`.
    pub expires_at: Option<i64>,
    pub created_at: i64,
}

impl EmbeddingRecord {
    /// A permanent record from a user-confirmed categorization.
    pub fn verified(
        user_id: &str,
        description_text: &str,
        gl_code: &str,
        department: &str,
        vector: Vec<f32>,
        created_at: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            description_text: description_text.to_string(),
            gl_code: gl_code.to_string(),
            department: department.to_string(),
            vector,
            verified: true,
            expires_at: None,
            created_at,
        }
    }

    /// A provisional record that expires at `expires_at`.
    pub fn provisional(
        user_id: &str,
        description_text: &str,
        gl_code: &str,
        department: &str,
        vector: Vec<f32>,
        created_at: i64,
        expires_at: i64,
    ) -> Self {
        Self {
            verified: false,
            expires_at: Some(expires_at),
            ..Self::verified(
                user_id,
                description_text,
                gl_code,
                department,
                vector,
                created_at,
            )
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub description_text: String,
    pub gl_code: String,
    pub department: String,
    pub similarity: f32,
    pub verified: bool,
}

#[async_trait::async_trait]
pub trait NearestNeighborIndex: Send + Sync {
    async fn insert(&self, record: EmbeddingRecord) -> Result<()>;

    /// Owner-scoped neighbors with similarity at or above `min_similarity`,
    /// best first, at most `limit`. Records already past their expiry at
    /// `now` are not returned.
    async fn query(
        &self,
        user_id: &str,
        vector: &[f32],
        min_similarity: f32,
        limit: usize,
        now: i64,
    ) -> Result<Vec<Neighbor>>;

    /// Ids of records with `expires_at < now`, optionally for one owner.
    /// Verified records have no expiry and are never returned.
    async fn expired(&self, now: i64, user_id: Option<&str>, limit: usize)
        -> Result<Vec<String>>;

    async fn delete(&self, ids: &[String]) -> Result<usize>;
}

/// Cosine similarity, 0.0 for mismatched or zero-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        warn!(
            a_len = a.len(),
            b_len = b.len(),
            "embedding dimension mismatch; returning zero similarity"
        );
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl NearestNeighborIndex for SqliteVectorIndex {
    async fn insert(&self, record: EmbeddingRecord) -> Result<()> {
        if record.verified != record.expires_at.is_none() {
            return Err(EngineError::InvalidInput(
                "verified embeddings never expire; unverified ones must".into(),
            ));
        }
        let vector = serde_json::to_string(&record.vector)?;
        sqlx::query(
            r#"
            INSERT INTO embeddings (id, user_id, description_text, gl_code, department, vector, verified, expires_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.description_text)
        .bind(&record.gl_code)
        .bind(&record.department)
        .bind(vector)
        .bind(record.verified)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query(
        &self,
        user_id: &str,
        vector: &[f32],
        min_similarity: f32,
        limit: usize,
        now: i64,
    ) -> Result<Vec<Neighbor>> {
        let rows = sqlx::query_as::<_, EmbeddingRow>(
            "SELECT * FROM embeddings WHERE user_id = ?1 AND (expires_at IS NULL OR expires_at >= ?2)",
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut neighbors = Vec::new();
        for row in rows {
            let stored: Vec<f32> = match serde_json::from_str(&row.vector) {
                Ok(v) => v,
                Err(e) => {
                    warn!(id = %row.id, error = %e, "skipping unreadable embedding");
                    continue;
                }
            };
            let similarity = cosine_similarity(vector, &stored);
            if similarity >= min_similarity {
                neighbors.push(Neighbor {
                    id: row.id,
                    description_text: row.description_text,
                    gl_code: row.gl_code,
                    department: row.department,
                    similarity,
                    verified: row.verified,
                });
            }
        }
        // Verified rows win ties.
        neighbors.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| b.verified.cmp(&a.verified))
        });
        neighbors.truncate(limit);
        Ok(neighbors)
    }

    async fn expired(
        &self,
        now: i64,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let ids: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT id FROM embeddings
            WHERE expires_at IS NOT NULL AND expires_at < ?1
              AND (?2 IS NULL OR user_id = ?2)
            ORDER BY expires_at
            LIMIT ?3
            "#,
        )
        .bind(now)
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
            "DELETE FROM embeddings WHERE expires_at IS NOT NULL AND id IN (",
        );
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }
}

pub struct QdrantVectorIndex {
    client: QdrantClient,
}

impl QdrantVectorIndex {
    pub fn new(client: QdrantClient) -> Self {
        Self { client }
    }
}

fn index_error(err: providers::ProviderError) -> EngineError {
    EngineError::Index(err.to_string())
}

#[async_trait::async_trait]
impl NearestNeighborIndex for QdrantVectorIndex {
    async fn insert(&self, record: EmbeddingRecord) -> Result<()> {
        if record.verified != record.expires_at.is_none() {
            return Err(EngineError::InvalidInput(
                "verified embeddings never expire; unverified ones must".into(),
            ));
        }
        let mut payload = HashMap::new();
        payload.insert("user_id".to_string(), serde_json::json!(record.user_id));
        payload.insert(
            "description_text".to_string(),
            serde_json::json!(record.description_text),
        );
        payload.insert("gl_code".to_string(), serde_json::json!(record.gl_code));
        payload.insert("department".to_string(), serde_json::json!(record.department));
        payload.insert("verified".to_string(), serde_json::json!(record.verified));
        payload.insert("expires_at".to_string(), serde_json::json!(record.expires_at));
        payload.insert("created_at".to_string(), serde_json::json!(record.created_at));
        self.client
            .upsert(vec![QdrantPoint {
                id: record.id,
                vector: record.vector,
                payload,
            }])
            .await
            .map_err(index_error)
    }

    async fn query(
        &self,
        user_id: &str,
        vector: &[f32],
        min_similarity: f32,
        limit: usize,
        now: i64,
    ) -> Result<Vec<Neighbor>> {
        let filter = serde_json::json!({
            "must": [{ "key": "user_id", "match": { "value": user_id } }],
            "should": [
                { "is_null": { "key": "expires_at" } },
                { "key": "expires_at", "range": { "gte": now } }
            ]
        });
        let resp = self
            .client
            .search(vector.to_vec(), limit as u64, Some(filter), Some(min_similarity))
            .await
            .map_err(index_error)?;

        let neighbors = resp
            .result
            .into_iter()
            .filter(|r| r.score >= min_similarity)
            .filter_map(|r| {
                let payload = r.payload?;
                let text = |key: &str| {
                    payload
                        .get(key)
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                };
                Some(Neighbor {
                    id: point_id_string(&r.id),
                    description_text: text("description_text").unwrap_or_default(),
                    gl_code: text("gl_code")?,
                    department: text("department")?,
                    similarity: r.score,
                    verified: payload
                        .get("verified")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false),
                })
            })
            .collect();
        Ok(neighbors)
    }

    async fn expired(
        &self,
        now: i64,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let mut must = vec![serde_json::json!({ "key": "expires_at", "range": { "lt": now } })];
        if let Some(user) = user_id {
            must.push(serde_json::json!({ "key": "user_id", "match": { "value": user } }));
        }
        self.client
            .scroll_ids(serde_json::json!({ "must": must }), limit as u64)
            .await
            .map_err(index_error)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.client.delete_points(ids).await.map_err(index_error)?;
        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let sim = cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_handles_zero_and_mismatched_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn record_constructors_keep_expiry_invariant() {
        let v = EmbeddingRecord::verified("u", "desc", "6100", "OPS", vec![1.0], 10);
        assert!(v.verified && v.expires_at.is_none());
        let p = EmbeddingRecord::provisional("u", "desc", "6100", "OPS", vec![1.0], 10, 99);
        assert!(!p.verified && p.expires_at == Some(99));
        assert_ne!(v.id, p.id);
    }
}
