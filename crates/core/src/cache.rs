//! Tier 1 description cache: raw description hash to normalized text, plus
//! the categorization the user last confirmed for it.

use crate::error::Result;
use crate::normalize::{description_hash, normalize};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use storage::models::DescriptionCacheEntry;

#[derive(Clone)]
pub struct DescriptionCache {
    pool: SqlitePool,
}

impl DescriptionCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Read-through lookup: creates the entry on first sight of `raw`,
    /// otherwise bumps its hit count and access time.
    pub async fn lookup(
        &self,
        user_id: &str,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<DescriptionCacheEntry> {
        let hash = description_hash(raw);
        let ts = now.timestamp();
        let entry = sqlx::query_as::<_, DescriptionCacheEntry>(
            r#"
            INSERT INTO description_cache (user_id, raw_hash, normalized_description, hit_count, last_accessed_at, created_at)
            VALUES (?1, ?2, ?3, 0, ?4, ?4)
            ON CONFLICT(user_id, raw_hash) DO UPDATE SET
                hit_count = hit_count + 1,
                last_accessed_at = excluded.last_accessed_at
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&hash)
        .bind(normalize(raw))
        .bind(ts)
        .fetch_one(&self.pool)
        .await?;
        Ok(entry)
    }

    /// Most recently used confirmed categorization for a normalized key.
    pub async fn categorized(
        &self,
        user_id: &str,
        normalized: &str,
    ) -> Result<Option<DescriptionCacheEntry>> {
        let entry = sqlx::query_as::<_, DescriptionCacheEntry>(
            r#"
            SELECT * FROM description_cache
            WHERE user_id = ?1 AND normalized_description = ?2
              AND gl_code IS NOT NULL AND department IS NOT NULL
            ORDER BY last_accessed_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(normalized)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    /// Creates or refreshes the entry for `raw` with a confirmed categorization.
    pub async fn record_categorization(
        &self,
        user_id: &str,
        raw: &str,
        gl_code: &str,
        department: &str,
        now: DateTime<Utc>,
    ) -> Result<DescriptionCacheEntry> {
        let entry = sqlx::query_as::<_, DescriptionCacheEntry>(
            r#"
            INSERT INTO description_cache (user_id, raw_hash, normalized_description, gl_code, department, hit_count, last_accessed_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)
            ON CONFLICT(user_id, raw_hash) DO UPDATE SET
                gl_code = excluded.gl_code,
                department = excluded.department,
                last_accessed_at = excluded.last_accessed_at
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(description_hash(raw))
        .bind(normalize(raw))
        .bind(gl_code)
        .bind(department)
        .bind(now.timestamp())
        .fetch_one(&self.pool)
        .await?;
        Ok(entry)
    }
}
