mod common;

use chrono::{Duration, Utc};
use common::{pool, start, USER};
use expense_core::aliases::{NewAlias, VendorAliasRegistry};
use expense_core::clock::{Clock, ManualClock};
use expense_core::config::{AliasConfig, JobConfig};
use expense_core::error::{EngineError, Result};
use expense_core::jobs::{JobCoordinator, JobOutcome, DECAY_JOB};
use expense_core::lease::{InMemoryLease, JobLease};
use expense_core::vectorstore::{EmbeddingRecord, NearestNeighborIndex, Neighbor, SqliteVectorIndex};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn job_config(batch_size: usize) -> JobConfig {
    JobConfig {
        batch_size,
        batch_pause_ms: 0,
        ..JobConfig::default()
    }
}

struct Jobs {
    pool: SqlitePool,
    clock: Arc<ManualClock>,
    aliases: VendorAliasRegistry,
    index: Arc<dyn NearestNeighborIndex>,
    lease: Arc<InMemoryLease>,
    coordinator: JobCoordinator,
}

async fn jobs(batch_size: usize) -> Jobs {
    let pool = pool().await;
    let clock = Arc::new(ManualClock::new(start()));
    let aliases = VendorAliasRegistry::new(pool.clone(), AliasConfig::default());
    let index: Arc<dyn NearestNeighborIndex> = Arc::new(SqliteVectorIndex::new(pool.clone()));
    let lease = Arc::new(InMemoryLease::new());
    let coordinator = JobCoordinator::new(
        lease.clone(),
        clock.clone(),
        aliases.clone(),
        index.clone(),
        job_config(batch_size),
    );
    Jobs {
        pool,
        clock,
        aliases,
        index,
        lease,
        coordinator,
    }
}

async fn alias(aliases: &VendorAliasRegistry, pattern: &str, confidence: f64, at: chrono::DateTime<Utc>) -> i64 {
    aliases
        .register(
            USER,
            NewAlias {
                alias_pattern: pattern.into(),
                canonical_name: pattern.into(),
                default_gl_code: Some("6100".into()),
                default_department: Some("OPS".into()),
                confidence,
            },
            at,
        )
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn weekly_decay_stops_above_the_floor() {
    let j = jobs(100).await;
    let long_ago = start() - Duration::days(365);
    let id = alias(&j.aliases, "DELTA AIR", 1.0, long_ago).await;

    let cancel = CancellationToken::new();
    let mut seen = Vec::new();
    for _ in 0..7 {
        let report = j.coordinator.run_decay(None, &cancel).await;
        assert_eq!(report.outcome, JobOutcome::Completed);
        seen.push(j.aliases.get(id).await.unwrap().confidence);
        j.clock.advance(Duration::weeks(1));
    }
    let expected = [0.9, 0.81, 0.729, 0.6561, 0.59049, 0.531441, 0.531441];
    for (got, want) in seen.iter().zip(expected) {
        assert!((got - want).abs() < 1e-9, "got {seen:?}");
    }
    assert!(seen.iter().all(|c| *c > 0.5 && *c <= 1.0));
}

#[tokio::test]
async fn recently_matched_aliases_do_not_decay() {
    let j = jobs(100).await;
    let fresh = alias(&j.aliases, "STARBUCKS", 0.8, start()).await;
    j.aliases
        .reinforce(USER, "STARBUCKS", "Starbucks", "6100", "OPS", start() - Duration::days(30))
        .await
        .unwrap();
    let report = j.coordinator.run_decay(Some(USER), &CancellationToken::new()).await;
    assert_eq!(report.affected, 0);
    let a = j.aliases.get(fresh).await.unwrap();
    assert!((a.confidence - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn decay_pages_through_every_stale_alias_once() {
    let j = jobs(100).await;
    let long_ago = start() - Duration::days(400);
    for i in 0..250 {
        alias(&j.aliases, &format!("VENDOR {}", alias_word(i)), 1.0, long_ago).await;
    }
    let report = j.coordinator.run_decay(None, &CancellationToken::new()).await;
    assert_eq!(report.outcome, JobOutcome::Completed);
    assert_eq!(report.batches, 3);
    assert_eq!(report.affected, 250);

    let (min, max): (f64, f64) =
        sqlx::query_as("SELECT MIN(confidence), MAX(confidence) FROM vendor_aliases")
            .fetch_one(&j.pool)
            .await
            .unwrap();
    assert!((min - 0.9).abs() < 1e-9 && (max - 0.9).abs() < 1e-9);
}

/// Letters only, so normalization keeps every pattern distinct.
fn alias_word(mut i: usize) -> String {
    let mut s = String::new();
    loop {
        s.push((b'A' + (i % 26) as u8) as char);
        i /= 26;
        if i == 0 {
            return s;
        }
    }
}

#[tokio::test]
async fn cleanup_deletes_only_expired_provisional_embeddings() {
    let j = jobs(2).await;
    let t = start().timestamp();
    let day = 86_400;
    j.index
        .insert(EmbeddingRecord::verified(USER, "kept", "6100", "OPS", vec![1.0, 0.0], t - 400 * day))
        .await
        .unwrap();
    for n in 0..3 {
        j.index
            .insert(EmbeddingRecord::provisional(
                USER,
                &format!("old {n}"),
                "6100",
                "OPS",
                vec![0.0, 1.0],
                t - 200 * day,
                t - 100 * day,
            ))
            .await
            .unwrap();
    }
    j.index
        .insert(EmbeddingRecord::provisional(USER, "fresh", "6100", "OPS", vec![0.5, 0.5], t, t + 90 * day))
        .await
        .unwrap();

    let report = j.coordinator.run_cleanup(None, &CancellationToken::new()).await;
    assert_eq!(report.outcome, JobOutcome::Completed);
    assert_eq!(report.affected, 3);
    assert_eq!(report.batches, 2);

    let left: Vec<(String, bool)> =
        sqlx::query_as("SELECT description_text, verified FROM embeddings ORDER BY description_text")
            .fetch_all(&j.pool)
            .await
            .unwrap();
    assert_eq!(left, vec![("fresh".to_string(), false), ("kept".to_string(), true)]);
}

#[tokio::test]
async fn held_lease_skips_the_run() {
    let j = jobs(100).await;
    let now = j.clock.now();
    assert!(j
        .lease
        .try_acquire(DECAY_JOB, "other-host", now, Duration::hours(1))
        .await
        .unwrap());
    alias(&j.aliases, "DELTA AIR", 1.0, now - Duration::days(365)).await;

    let report = j.coordinator.run_decay(None, &CancellationToken::new()).await;
    assert_eq!(report.outcome, JobOutcome::Skipped);
    assert_eq!(report.affected, 0);
}

#[tokio::test]
async fn cancelled_run_stops_at_the_batch_boundary() {
    let j = jobs(100).await;
    alias(&j.aliases, "DELTA AIR", 1.0, start() - Duration::days(365)).await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = j.coordinator.run_decay(None, &cancel).await;
    assert_eq!(report.outcome, JobOutcome::Cancelled);
    assert_eq!(report.batches, 0);
}

struct BrokenIndex;

#[async_trait::async_trait]
impl NearestNeighborIndex for BrokenIndex {
    async fn insert(&self, _record: EmbeddingRecord) -> Result<()> {
        Ok(())
    }

    async fn query(&self, _: &str, _: &[f32], _: f32, _: usize, _: i64) -> Result<Vec<Neighbor>> {
        Ok(Vec::new())
    }

    async fn expired(&self, _: i64, _: Option<&str>, _: usize) -> Result<Vec<String>> {
        Err(EngineError::Index("status 503".into()))
    }

    async fn delete(&self, _: &[String]) -> Result<usize> {
        Ok(0)
    }
}

#[tokio::test]
async fn batch_failure_is_reported_not_raised() {
    let pool = pool().await;
    let clock = Arc::new(ManualClock::new(start()));
    let coordinator = JobCoordinator::new(
        Arc::new(InMemoryLease::new()),
        clock,
        VendorAliasRegistry::new(pool, AliasConfig::default()),
        Arc::new(BrokenIndex),
        job_config(100),
    );
    let report = coordinator.run_cleanup(None, &CancellationToken::new()).await;
    assert!(report.failed());
}

#[tokio::test]
async fn scheduler_exits_on_cancel() {
    let j = jobs(100).await;
    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        stopper.cancel();
    });
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        j.coordinator.run_scheduled(cancel),
    )
    .await
    .expect("scheduler should stop once cancelled");
}

#[test]
fn alias_words_are_unique() {
    let words: std::collections::HashSet<_> = (0..250).map(alias_word).collect();
    assert_eq!(words.len(), 250);
}
