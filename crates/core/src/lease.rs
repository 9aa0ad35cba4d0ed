//! Job-level leases so each maintenance job runs at most once at a time.

use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait::async_trait]
pub trait JobLease: Send + Sync {
    /// Takes the lease for `job` until `now + ttl` unless another holder
    /// has an unexpired one. Returns whether `holder` now owns it.
    async fn try_acquire(
        &self,
        job: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool>;

    async fn release(&self, job: &str, holder: &str) -> Result<()>;
}

/// Lease rows in the `job_leases` table, shared by every process using the
/// same database.
pub struct SqliteLease {
    pool: SqlitePool,
}

impl SqliteLease {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl JobLease for SqliteLease {
    async fn try_acquire(
        &self,
        job: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_leases (job_name, holder, expires_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(job_name) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE job_leases.expires_at < ?4 OR job_leases.holder = excluded.holder
            "#,
        )
        .bind(job)
        .bind(holder)
        .bind((now + ttl).timestamp())
        .bind(now.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, job: &str, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM job_leases WHERE job_name = ?1 AND holder = ?2")
            .bind(job)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Process-local leases.
#[derive(Debug, Default)]
pub struct InMemoryLease {
    held: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl InMemoryLease {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl JobLease for InMemoryLease {
    async fn try_acquire(
        &self,
        job: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool> {
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        if let Some((owner, expires)) = held.get(job) {
            if owner != holder && *expires >= now {
                return Ok(false);
            }
        }
        held.insert(job.to_string(), (holder.to_string(), now + ttl));
        Ok(true)
    }

    async fn release(&self, job: &str, holder: &str) -> Result<()> {
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        if held.get(job).is_some_and(|(owner, _)| owner == holder) {
            held.remove(job);
        }
        Ok(())
    }
}
