//! Maintenance jobs: vendor alias confidence decay and provisional
//! embedding cleanup.
//!
//! Each run holds a job lease, works in fixed-size batches with a pause in
//! between, and checks for cancellation only at batch boundaries. Committed
//! batches are never rolled back; a failed run is retried on the next tick.

use crate::aliases::VendorAliasRegistry;
use crate::clock::Clock;
use crate::config::JobConfig;
use crate::lease::JobLease;
use crate::vectorstore::NearestNeighborIndex;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const DECAY_JOB: &str = "vendor_alias_decay";
pub const CLEANUP_JOB: &str = "embedding_cleanup";

/// Consecutive failed runs after which failures are reported as errors.
const REPORT_AFTER_FAILURES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    Cancelled,
    /// Another holder owns the lease.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: &'static str,
    pub outcome: JobOutcome,
    pub batches: usize,
    pub scanned: usize,
    /// Aliases decayed or embeddings deleted.
    pub affected: usize,
    pub started_at: DateTime<Utc>,
}

impl JobReport {
    fn new(job: &'static str, started_at: DateTime<Utc>) -> Self {
        Self {
            job,
            outcome: JobOutcome::Completed,
            batches: 0,
            scanned: 0,
            affected: 0,
            started_at,
        }
    }

    pub fn failed(&self) -> bool {
        matches!(self.outcome, JobOutcome::Failed(_))
    }
}

pub struct JobCoordinator {
    lease: Arc<dyn JobLease>,
    clock: Arc<dyn Clock>,
    aliases: VendorAliasRegistry,
    index: Arc<dyn NearestNeighborIndex>,
    config: JobConfig,
    holder: String,
}

impl JobCoordinator {
    pub fn new(
        lease: Arc<dyn JobLease>,
        clock: Arc<dyn Clock>,
        aliases: VendorAliasRegistry,
        index: Arc<dyn NearestNeighborIndex>,
        config: JobConfig,
    ) -> Self {
        Self {
            lease,
            clock,
            aliases,
            index,
            config,
            holder: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Multiplies the confidence of every alias unused since the stale
    /// cutoff by the decay factor, once per run, never taking it to or
    /// below the floor.
    pub async fn run_decay(&self, user_id: Option<&str>, cancel: &CancellationToken) -> JobReport {
        let now = self.clock.now();
        let mut report = JobReport::new(DECAY_JOB, now);
        if !self.acquire(DECAY_JOB, now, &mut report).await {
            return report;
        }

        let cutoff = self.aliases.stale_cutoff(now);
        let mut after_id = None;
        loop {
            if cancel.is_cancelled() {
                report.outcome = JobOutcome::Cancelled;
                break;
            }
            let batch = match self
                .aliases
                .decay_batch(user_id, cutoff, after_id, self.config.batch_size)
                .await
            {
                Ok(b) => b,
                Err(e) => {
                    warn!(job = DECAY_JOB, batch = report.batches, error = %e, "batch failed");
                    report.outcome = JobOutcome::Failed(e.to_string());
                    break;
                }
            };
            report.batches += 1;
            report.scanned += batch.scanned;
            report.affected += batch.decayed;
            if batch.scanned < self.config.batch_size {
                break;
            }
            after_id = batch.last_id;
            self.pause(cancel).await;
        }

        self.release(DECAY_JOB).await;
        log_report(&report);
        report
    }

    /// Deletes embeddings whose expiry has passed. Verified embeddings carry
    /// no expiry and are never selected.
    pub async fn run_cleanup(&self, user_id: Option<&str>, cancel: &CancellationToken) -> JobReport {
        let now = self.clock.now();
        let mut report = JobReport::new(CLEANUP_JOB, now);
        if !self.acquire(CLEANUP_JOB, now, &mut report).await {
            return report;
        }

        let now_ts = now.timestamp();
        loop {
            if cancel.is_cancelled() {
                report.outcome = JobOutcome::Cancelled;
                break;
            }
            let step = async {
                let ids = self
                    .index
                    .expired(now_ts, user_id, self.config.batch_size)
                    .await?;
                let deleted = self.index.delete(&ids).await?;
                Ok::<_, crate::error::EngineError>((ids.len(), deleted))
            };
            let (selected, deleted) = match step.await {
                Ok(counts) => counts,
                Err(e) => {
                    warn!(job = CLEANUP_JOB, batch = report.batches, error = %e, "batch failed");
                    report.outcome = JobOutcome::Failed(e.to_string());
                    break;
                }
            };
            if selected == 0 {
                break;
            }
            report.batches += 1;
            report.scanned += selected;
            report.affected += deleted;
            if deleted == 0 {
                report.outcome = JobOutcome::Failed(format!(
                    "{selected} expired embeddings could not be deleted"
                ));
                break;
            }
            if selected < self.config.batch_size {
                break;
            }
            self.pause(cancel).await;
        }

        self.release(CLEANUP_JOB).await;
        log_report(&report);
        report
    }

    /// Runs decay and cleanup on their configured cadence until `cancel`
    /// fires. The first run of each job happens one interval after start.
    pub async fn run_scheduled(&self, cancel: CancellationToken) {
        let decay_every = Duration::from_secs(self.config.decay_interval_secs.max(1));
        let cleanup_every = Duration::from_secs(self.config.cleanup_interval_secs.max(1));
        let mut decay_tick = interval_at(Instant::now() + decay_every, decay_every);
        let mut cleanup_tick = interval_at(Instant::now() + cleanup_every, cleanup_every);
        decay_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        cleanup_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut decay_failures = 0u32;
        let mut cleanup_failures = 0u32;
        info!(
            decay_secs = decay_every.as_secs(),
            cleanup_secs = cleanup_every.as_secs(),
            "maintenance scheduler started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = decay_tick.tick() => {
                    let report = self.run_decay(None, &cancel).await;
                    track_failures(&report, &mut decay_failures);
                }
                _ = cleanup_tick.tick() => {
                    let report = self.run_cleanup(None, &cancel).await;
                    track_failures(&report, &mut cleanup_failures);
                }
            }
        }
        info!("maintenance scheduler stopped");
    }

    async fn acquire(&self, job: &'static str, now: DateTime<Utc>, report: &mut JobReport) -> bool {
        let ttl = chrono::Duration::seconds(self.config.lease_ttl_secs);
        match self.lease.try_acquire(job, &self.holder, now, ttl).await {
            Ok(true) => true,
            Ok(false) => {
                info!(job, "lease held elsewhere; skipping run");
                report.outcome = JobOutcome::Skipped;
                false
            }
            Err(e) => {
                warn!(job, error = %e, "could not take job lease");
                report.outcome = JobOutcome::Failed(e.to_string());
                false
            }
        }
    }

    async fn release(&self, job: &'static str) {
        if let Err(e) = self.lease.release(job, &self.holder).await {
            warn!(job, error = %e, "could not release job lease");
        }
    }

    async fn pause(&self, cancel: &CancellationToken) {
        if self.config.batch_pause_ms == 0 {
            return;
        }
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(Duration::from_millis(self.config.batch_pause_ms)) => {}
        }
    }
}

fn log_report(report: &JobReport) {
    info!(
        job = report.job,
        outcome = ?report.outcome,
        batches = report.batches,
        scanned = report.scanned,
        affected = report.affected,
        "maintenance run finished"
    );
}

fn track_failures(report: &JobReport, consecutive: &mut u32) {
    if !report.failed() {
        *consecutive = 0;
        return;
    }
    *consecutive += 1;
    if *consecutive >= REPORT_AFTER_FAILURES {
        error!(job = report.job, failures = *consecutive, "maintenance job keeps failing");
    }
}
