#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use expense_core::clock::ManualClock;
use expense_core::config::AppConfig;
use expense_core::vectorstore::{NearestNeighborIndex, SqliteVectorIndex};
use expense_core::Engine;
use providers::hashing::HashingEmbedder;
use providers::{
    EmbedResponse, EmbeddingProvider, InferResponse, InferenceProvider, ProviderError,
    ProviderRegistry,
};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const USER: &str = "user-1";

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 10, 9, 0, 0).unwrap()
}

pub async fn pool() -> SqlitePool {
    let pool = storage::connect("sqlite::memory:").await.unwrap();
    storage::migrate(&pool).await.unwrap();
    pool
}

/// Inference stub with a fixed answer, or a failure when `None`.
pub struct StubInference {
    pub answer: Option<InferResponse>,
    pub calls: AtomicUsize,
}

impl StubInference {
    pub fn answering(gl: &str, dept: &str, confidence: f32) -> Self {
        Self {
            answer: Some(InferResponse {
                gl_code: gl.into(),
                department: dept.into(),
                confidence,
                rationale: None,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl InferenceProvider for StubInference {
    async fn infer(&self, _prompt: &str) -> Result<InferResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer
            .clone()
            .ok_or_else(|| ProviderError::RequestFailed("status 503".into()))
    }
}

/// Embedding stub that always fails, like an unreachable service.
pub struct DownEmbedder;

#[async_trait::async_trait]
impl EmbeddingProvider for DownEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        Err(ProviderError::RequestFailed("connection refused".into()))
    }
}

pub struct Harness {
    pub engine: Engine,
    pub clock: Arc<ManualClock>,
    pub index: Arc<dyn NearestNeighborIndex>,
    pub pool: SqlitePool,
}

pub async fn harness_with(
    config: AppConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    inference: Arc<dyn InferenceProvider>,
) -> Harness {
    let pool = pool().await;
    let registry = ProviderRegistry::new()
        .with_embedding("test", embedder)
        .with_inference("test", inference)
        .set_preferred_embedding("test")
        .set_preferred_inference("test");
    let clock = Arc::new(ManualClock::new(start()));
    let index: Arc<dyn NearestNeighborIndex> = Arc::new(SqliteVectorIndex::new(pool.clone()));
    let engine =
        Engine::with_parts(config, pool.clone(), &registry, index.clone(), clock.clone()).unwrap();
    Harness {
        engine,
        clock,
        index,
        pool,
    }
}

pub async fn harness(inference: Arc<dyn InferenceProvider>) -> Harness {
    let mut config = AppConfig::default();
    config.jobs.batch_pause_ms = 0;
    harness_with(config, Arc::new(HashingEmbedder::new(256)), inference).await
}
