//! Wires configuration, storage and providers into the engine components.

use crate::aliases::VendorAliasRegistry;
use crate::cache::DescriptionCache;
use crate::classifier::AiFallback;
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::embeddings::{EmbeddingIndex, EmbeddingSettings};
use crate::error::{EngineError, Result};
use crate::jobs::JobCoordinator;
use crate::lease::SqliteLease;
use crate::ledger::Ledger;
use crate::matching::MatchProposalManager;
use crate::router::CategorizationRouter;
use crate::usage::TierUsageLog;
use crate::vectorstore::{NearestNeighborIndex, QdrantVectorIndex, SqliteVectorIndex};
use providers::hashing::HashingEmbedder;
use providers::noop::NoopProvider;
use providers::openai::{OpenAiConfig, OpenAiProvider};
use providers::qdrant::{QdrantClient, QdrantConfig};
use providers::ProviderRegistry;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use storage::{connect, migrate};
use tracing::{info, warn};

pub struct Engine {
    pub config: AppConfig,
    pub pool: SqlitePool,
    pub ledger: Ledger,
    pub aliases: VendorAliasRegistry,
    pub router: CategorizationRouter,
    pub matcher: MatchProposalManager,
    pub usage: TierUsageLog,
    pub jobs: JobCoordinator,
    pub clock: Arc<dyn Clock>,
}

impl Engine {
    /// Opens and migrates the configured database, then builds every
    /// component from the configured providers.
    pub async fn open(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let pool = connect(&config.database.path).await?;
        migrate(&pool).await?;
        let registry = build_registry(&config);
        let index = build_index(&config, &pool)?;
        Self::with_parts(config, pool, &registry, index, Arc::new(SystemClock))
    }

    /// Builds the engine over an already migrated pool.
    pub fn with_parts(
        config: AppConfig,
        pool: SqlitePool,
        registry: &ProviderRegistry,
        index: Arc<dyn NearestNeighborIndex>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let embedder = registry.embedding(None)?;
        let inference = registry.inference(None)?;

        let settings = EmbeddingSettings {
            similarity_threshold: config.vectors.similarity_threshold,
            max_results: config.vectors.max_results,
            max_embed_chars: config.categorization.max_embed_chars,
            unverified_ttl: chrono::Duration::days(config.vectors.unverified_ttl_days),
        };
        let embeddings = EmbeddingIndex::new(embedder, index.clone(), settings);
        let fallback = AiFallback::new(
            inference,
            Duration::from_millis(config.inference.timeout_ms),
            config.categorization.max_embed_chars,
        );

        let aliases = VendorAliasRegistry::new(pool.clone(), config.aliases.clone());
        let usage = TierUsageLog::new(pool.clone());
        let router = CategorizationRouter::new(
            DescriptionCache::new(pool.clone()),
            embeddings,
            fallback,
            aliases.clone(),
            usage.clone(),
            clock.clone(),
        );
        let matcher = MatchProposalManager::new(
            pool.clone(),
            config.matching.clone(),
            aliases.clone(),
            clock.clone(),
        );
        let jobs = JobCoordinator::new(
            Arc::new(SqliteLease::new(pool.clone())),
            clock.clone(),
            aliases.clone(),
            index,
            config.jobs.clone(),
        );

        Ok(Self {
            ledger: Ledger::new(pool.clone()),
            config,
            pool,
            aliases,
            router,
            matcher,
            usage,
            jobs,
            clock,
        })
    }
}

/// Registers the built-in providers plus the OpenAI-compatible one when
/// `OPENAI_API_KEY` and `OPENAI_BASE_URL` are set. An unavailable
/// configured provider falls back to the hashing embedder or the no-op
/// inference provider.
pub fn build_registry(config: &AppConfig) -> ProviderRegistry {
    let mut reg = ProviderRegistry::new()
        .with_embedding("noop", Arc::new(NoopProvider))
        .with_embedding(
            "hashing",
            Arc::new(HashingEmbedder::new(config.embeddings.dimension)),
        )
        .with_inference("noop", Arc::new(NoopProvider));

    if let (Some(key), Some(base)) = (
        std::env::var_os("OPENAI_API_KEY"),
        std::env::var_os("OPENAI_BASE_URL"),
    ) {
        let provider = OpenAiProvider::new(OpenAiConfig {
            api_key: key.to_string_lossy().into_owned(),
            base_url: base.to_string_lossy().into_owned(),
            embedding_model: config.embeddings.model.clone(),
            chat_model: config.inference.model.clone(),
        });
        reg = reg
            .with_embedding("openai", Arc::new(provider.clone()))
            .with_inference("openai", Arc::new(provider));
    }

    let embedding = if reg.embedding(Some(&config.embeddings.provider)).is_ok() {
        config.embeddings.provider.as_str()
    } else {
        warn!(provider = %config.embeddings.provider, "embedding provider unavailable; using hashing");
        "hashing"
    };
    let inference = if reg.inference(Some(&config.inference.provider)).is_ok() {
        config.inference.provider.as_str()
    } else {
        warn!(provider = %config.inference.provider, "inference provider unavailable; using noop");
        "noop"
    };
    info!(embedding, inference, "providers selected");
    reg.set_preferred_embedding(embedding)
        .set_preferred_inference(inference)
}

pub fn build_index(config: &AppConfig, pool: &SqlitePool) -> Result<Arc<dyn NearestNeighborIndex>> {
    match config.vectors.provider.as_str() {
        "sqlite" => Ok(Arc::new(SqliteVectorIndex::new(pool.clone()))),
        "qdrant" => {
            let url = config.vectors.url.clone().ok_or_else(|| {
                EngineError::Config("vectors.url is required for the qdrant provider".into())
            })?;
            let client = QdrantClient::new(QdrantConfig {
                url,
                collection: config.vectors.collection.clone(),
                api_key: std::env::var("QDRANT_API_KEY").ok(),
            });
            Ok(Arc::new(QdrantVectorIndex::new(client)))
        }
        other => Err(EngineError::Config(format!("unknown vector provider: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_providers_fall_back() {
        let mut cfg = AppConfig::default();
        cfg.embeddings.provider = "missing".into();
        cfg.inference.provider = "missing".into();
        let reg = build_registry(&cfg);
        assert!(reg.embedding(None).is_ok());
        assert_eq!(reg.preferred_embedding.as_deref(), Some("hashing"));
        assert_eq!(reg.preferred_inference.as_deref(), Some("noop"));
    }

    #[tokio::test]
    async fn qdrant_index_requires_url() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let mut cfg = AppConfig::default();
        cfg.vectors.provider = "qdrant".into();
        assert!(matches!(build_index(&cfg, &pool), Err(EngineError::Config(_))));
        cfg.vectors.provider = "faiss".into();
        assert!(build_index(&cfg, &pool).is_err());
    }
}
