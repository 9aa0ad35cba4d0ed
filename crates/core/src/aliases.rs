//! Vendor alias registry: canonical vendor identity with default GL code and
//! department, and a confidence that grows on confirmation and decays when
//! the alias goes unused.

use crate::config::AliasConfig;
use crate::error::{EngineError, Result};
use crate::normalize::{contains_tokens, normalize};
use chrono::{DateTime, Months, Utc};
use sqlx::SqlitePool;
use storage::models::VendorAlias;
use tracing::debug;

/// All aliases of one user, resolved in memory.
#[derive(Debug, Clone, Default)]
pub struct AliasSnapshot {
    aliases: Vec<VendorAlias>,
}

impl AliasSnapshot {
    pub fn new(aliases: Vec<VendorAlias>) -> Self {
        Self { aliases }
    }

    /// Exact pattern match first, otherwise the longest pattern whose tokens
    /// appear contiguously in `normalized`.
    pub fn resolve(&self, normalized: &str) -> Option<&VendorAlias> {
        if normalized.is_empty() {
            return None;
        }
        if let Some(exact) = self.aliases.iter().find(|a| a.alias_pattern == normalized) {
            return Some(exact);
        }
        self.aliases
            .iter()
            .filter(|a| !a.alias_pattern.is_empty() && contains_tokens(normalized, &a.alias_pattern))
            .max_by_key(|a| a.alias_pattern.len())
    }
}

#[derive(Debug, Clone)]
pub struct NewAlias {
    pub alias_pattern: String,
    pub canonical_name: String,
    pub default_gl_code: Option<String>,
    pub default_department: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecayBatch {
    pub scanned: usize,
    pub decayed: usize,
    /// Keyset cursor for the next batch.
    pub last_id: Option<i64>,
}

#[derive(Clone)]
pub struct VendorAliasRegistry {
    pool: SqlitePool,
    settings: AliasConfig,
}

impl VendorAliasRegistry {
    pub fn new(pool: SqlitePool, settings: AliasConfig) -> Self {
        Self { pool, settings }
    }

    pub async fn snapshot(&self, user_id: &str) -> Result<AliasSnapshot> {
        let aliases = sqlx::query_as::<_, VendorAlias>(
            "SELECT * FROM vendor_aliases WHERE user_id = ?1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(AliasSnapshot::new(aliases))
    }

    pub async fn find(&self, user_id: &str, normalized: &str) -> Result<Option<VendorAlias>> {
        Ok(self.snapshot(user_id).await?.resolve(normalized).cloned())
    }

    pub async fn get(&self, id: i64) -> Result<VendorAlias> {
        sqlx::query_as::<_, VendorAlias>("SELECT * FROM vendor_aliases WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("vendor alias {id}")))
    }

    /// Inserts an alias, or replaces the name/defaults of an existing one with
    /// the same pattern. Confidence is clamped to [0, 1].
    pub async fn register(
        &self,
        user_id: &str,
        alias: NewAlias,
        now: DateTime<Utc>,
    ) -> Result<VendorAlias> {
        let pattern = normalize(&alias.alias_pattern);
        if pattern.is_empty() {
            return Err(EngineError::InvalidInput("alias pattern is empty".into()));
        }
        let row = sqlx::query_as::<_, VendorAlias>(
            r#"
            INSERT INTO vendor_aliases (user_id, alias_pattern, canonical_name, default_gl_code, default_department, confidence, match_count, last_matched_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, NULL, ?7)
            ON CONFLICT(user_id, alias_pattern) DO UPDATE SET
                canonical_name = excluded.canonical_name,
                default_gl_code = excluded.default_gl_code,
                default_department = excluded.default_department,
                confidence = excluded.confidence
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&pattern)
        .bind(&alias.canonical_name)
        .bind(&alias.default_gl_code)
        .bind(&alias.default_department)
        .bind(alias.confidence.clamp(0.0, 1.0))
        .bind(now.timestamp())
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Records a confirmed categorization for `normalized`. The alias keyed
    /// exactly by `normalized` takes the confirmed codes (created if needed),
    /// gains the fixed increment capped at 1.0, and is marked as matched now.
    /// A broader alias that also resolves for `normalized` is reinforced the
    /// same way but keeps its own codes.
    pub async fn reinforce(
        &self,
        user_id: &str,
        normalized: &str,
        canonical_name: &str,
        gl_code: &str,
        department: &str,
        now: DateTime<Utc>,
    ) -> Result<VendorAlias> {
        if normalized.is_empty() {
            return Err(EngineError::InvalidInput("cannot alias an empty description".into()));
        }
        let broader = self
            .find(user_id, normalized)
            .await?
            .filter(|a| a.alias_pattern != normalized)
            .map(|a| a.id);

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, VendorAlias>(
            r#"
            INSERT INTO vendor_aliases (user_id, alias_pattern, canonical_name, default_gl_code, default_department, confidence, match_count, last_matched_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?8, ?8)
            ON CONFLICT(user_id, alias_pattern) DO UPDATE SET
                default_gl_code = excluded.default_gl_code,
                default_department = excluded.default_department,
                confidence = MIN(1.0, vendor_aliases.confidence + ?7),
                match_count = vendor_aliases.match_count + 1,
                last_matched_at = excluded.last_matched_at
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(normalized)
        .bind(canonical_name)
        .bind(gl_code)
        .bind(department)
        .bind(self.settings.initial_confidence.clamp(0.0, 1.0))
        .bind(self.settings.confirmation_increment)
        .bind(now.timestamp())
        .fetch_one(&mut *tx)
        .await?;
        if let Some(id) = broader {
            sqlx::query(
                r#"
                UPDATE vendor_aliases SET
                    confidence = MIN(1.0, confidence + ?1),
                    match_count = match_count + 1,
                    last_matched_at = ?2
                WHERE id = ?3
                "#,
            )
            .bind(self.settings.confirmation_increment)
            .bind(now.timestamp())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(user = %user_id, alias = %row.alias_pattern, confidence = row.confidence, broader = ?broader, "alias reinforced");
        Ok(row)
    }

    /// Aliases not matched since this instant are stale.
    pub fn stale_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_months(Months::new(self.settings.stale_after_months))
            .unwrap_or(now)
    }

    /// One keyset page of the decay pass. Every stale alias above the floor
    /// is scanned; only those whose decayed value stays above the floor are
    /// written, the rest are left as they are.
    pub async fn decay_batch(
        &self,
        user_id: Option<&str>,
        cutoff: DateTime<Utc>,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<DecayBatch> {
        let floor = self.settings.decay_floor;
        let factor = self.settings.decay_factor;
        let candidates: Vec<(i64, f64)> = sqlx::query_as(
            r#"
            SELECT id, confidence FROM vendor_aliases
            WHERE COALESCE(last_matched_at, created_at) < ?1
              AND confidence > ?2
              AND id > ?3
              AND (?4 IS NULL OR user_id = ?4)
            ORDER BY id
            LIMIT ?5
            "#,
        )
        .bind(cutoff.timestamp())
        .bind(floor)
        .bind(after_id.unwrap_or(0))
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut batch = DecayBatch {
            scanned: candidates.len(),
            decayed: 0,
            last_id: candidates.last().map(|(id, _)| *id),
        };
        let to_decay: Vec<i64> = candidates
            .iter()
            .filter(|(_, confidence)| confidence * factor > floor)
            .map(|(id, _)| *id)
            .collect();
        if to_decay.is_empty() {
            return Ok(batch);
        }

        let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new("UPDATE vendor_aliases SET confidence = confidence * ");
        qb.push_bind(factor);
        qb.push(" WHERE confidence * ");
        qb.push_bind(factor);
        qb.push(" > ");
        qb.push_bind(floor);
        qb.push(" AND id IN (");
        let mut separated = qb.separated(", ");
        for id in &to_decay {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        let result = qb.build().execute(&self.pool).await?;
        batch.decayed = result.rows_affected() as usize;
        Ok(batch)
    }
}
