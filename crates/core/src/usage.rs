//! Append-only record of which tier answered each categorization request.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use storage::models::TierUsageRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Cache,
    Similarity,
    Inference,
}

impl Tier {
    pub fn number(&self) -> u8 {
        match self {
            Tier::Cache => 1,
            Tier::Similarity => 2,
            Tier::Inference => 3,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.number())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TierUsageSummary {
    pub none: i64,
    pub tier1: i64,
    pub tier2: i64,
    pub tier3: i64,
    pub total: i64,
    pub avg_latency_ms: f64,
}

#[derive(Clone)]
pub struct TierUsageLog {
    pool: SqlitePool,
}

impl TierUsageLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// `tier` is `None` when every tier missed.
    pub async fn record(
        &self,
        user_id: &str,
        tier: Option<Tier>,
        confidence: Option<f64>,
        latency_ms: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO tier_usage_log (user_id, tier, confidence, latency_ms, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(user_id)
        .bind(tier.map(|t| t.number() as i64).unwrap_or(0))
        .bind(confidence)
        .bind(latency_ms)
        .bind(at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn entries(&self, user_id: &str) -> Result<Vec<TierUsageRow>> {
        let rows = sqlx::query_as::<_, TierUsageRow>(
            "SELECT * FROM tier_usage_log WHERE user_id = ?1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn summary(&self, user_id: &str) -> Result<TierUsageSummary> {
        let counts: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT tier, COUNT(*) FROM tier_usage_log WHERE user_id = ?1 GROUP BY tier",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        let (avg_latency,): (Option<f64>,) = sqlx::query_as(
            "SELECT AVG(latency_ms) FROM tier_usage_log WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let mut summary = TierUsageSummary {
            avg_latency_ms: avg_latency.unwrap_or(0.0),
            ..Default::default()
        };
        for (tier, count) in counts {
            match tier {
                1 => summary.tier1 = count,
                2 => summary.tier2 = count,
                3 => summary.tier3 = count,
                _ => summary.none += count,
            }
            summary.total += count;
        }
        Ok(summary)
    }
}
