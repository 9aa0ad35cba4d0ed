//! Three-tier categorization: exact cache, embedding similarity, inference.
//!
//! The router is a sequence of attempts over [`TierStrategy`] values and
//! stops at the first hit. Only storage failures surface as errors; a tier
//! whose external dependency fails reports a miss.

use crate::aliases::VendorAliasRegistry;
use crate::cache::DescriptionCache;
use crate::classifier::AiFallback;
use crate::clock::Clock;
use crate::embeddings::EmbeddingIndex;
use crate::error::{EngineError, Result};
use crate::normalize::{extract_vendor, normalize};
use crate::usage::{Tier, TierUsageLog};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use storage::models::VendorAlias;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub gl_code: String,
    pub department: String,
    pub tier: Tier,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TierResult {
    /// First element of `suggestions` is the answer.
    Hit { suggestions: Vec<Suggestion> },
    Miss,
}

impl TierResult {
    fn hit(suggestion: Suggestion) -> Self {
        TierResult::Hit {
            suggestions: vec![suggestion],
        }
    }
}

pub struct TierRequest<'a> {
    pub user_id: &'a str,
    pub description: &'a str,
    pub normalized: &'a str,
    pub now: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait TierStrategy: Send + Sync {
    fn tier(&self) -> Tier;
    async fn attempt(&self, request: &TierRequest<'_>) -> Result<TierResult>;
}

/// Tier 1: read-through cache entry. Answers from the alias keyed by the
/// exact normalized text, then a confirmed cache entry for that text, then
/// the broader alias that contains it.
pub struct CacheTier {
    cache: DescriptionCache,
    aliases: VendorAliasRegistry,
}

impl CacheTier {
    pub fn new(cache: DescriptionCache, aliases: VendorAliasRegistry) -> Self {
        Self { cache, aliases }
    }
}

#[async_trait::async_trait]
impl TierStrategy for CacheTier {
    fn tier(&self) -> Tier {
        Tier::Cache
    }

    async fn attempt(&self, req: &TierRequest<'_>) -> Result<TierResult> {
        let entry = self.cache.lookup(req.user_id, req.description, req.now).await?;
        let normalized = entry.normalized_description.as_str();
        debug!(user = %req.user_id, hits = entry.hit_count, "description cache lookup");

        let alias = self.aliases.find(req.user_id, normalized).await?;
        let alias_hit = |alias: &VendorAlias| {
            alias.default_codes().map(|(gl, dept)| {
                TierResult::hit(Suggestion {
                    gl_code: gl.to_string(),
                    department: dept.to_string(),
                    tier: Tier::Cache,
                    confidence: alias.confidence,
                })
            })
        };

        // Codes confirmed for this exact text outrank a broader alias.
        if let Some(hit) = alias
            .as_ref()
            .filter(|a| a.alias_pattern == normalized)
            .and_then(alias_hit)
        {
            return Ok(hit);
        }
        let confirmed = self
            .cache
            .categorized(req.user_id, normalized)
            .await?
            .and_then(|e| e.gl_code.zip(e.department));
        if let Some((gl_code, department)) = confirmed {
            return Ok(TierResult::hit(Suggestion {
                gl_code,
                department,
                tier: Tier::Cache,
                confidence: 1.0,
            }));
        }
        Ok(alias.as_ref().and_then(alias_hit).unwrap_or(TierResult::Miss))
    }
}

/// Tier 2: nearest neighbors of the description's embedding.
pub struct SimilarityTier {
    embeddings: EmbeddingIndex,
}

impl SimilarityTier {
    pub fn new(embeddings: EmbeddingIndex) -> Self {
        Self { embeddings }
    }
}

#[async_trait::async_trait]
impl TierStrategy for SimilarityTier {
    fn tier(&self) -> Tier {
        Tier::Similarity
    }

    async fn attempt(&self, req: &TierRequest<'_>) -> Result<TierResult> {
        let vector = match self.embeddings.embed(req.description).await {
            Ok(Some(v)) => v,
            Ok(None) => return Ok(TierResult::Miss),
            Err(e) => {
                warn!(user = %req.user_id, tier = 2, error = %e, "embedding failed; tier miss");
                return Ok(TierResult::Miss);
            }
        };
        let neighbors = match self.embeddings.search(req.user_id, &vector, req.now).await {
            Ok(n) => n,
            Err(EngineError::Index(e)) => {
                warn!(user = %req.user_id, tier = 2, error = %e, "vector index unavailable; tier miss");
                return Ok(TierResult::Miss);
            }
            Err(e) => return Err(e),
        };
        if neighbors.is_empty() {
            return Ok(TierResult::Miss);
        }
        Ok(TierResult::Hit {
            suggestions: neighbors
                .into_iter()
                .map(|n| Suggestion {
                    gl_code: n.gl_code,
                    department: n.department,
                    tier: Tier::Similarity,
                    confidence: n.similarity as f64,
                })
                .collect(),
        })
    }
}

/// Tier 3: model inference. A hit is also kept as a provisional embedding
/// that expires unless the user confirms it.
pub struct InferenceTier {
    fallback: AiFallback,
    embeddings: EmbeddingIndex,
}

impl InferenceTier {
    pub fn new(fallback: AiFallback, embeddings: EmbeddingIndex) -> Self {
        Self {
            fallback,
            embeddings,
        }
    }
}

#[async_trait::async_trait]
impl TierStrategy for InferenceTier {
    fn tier(&self) -> Tier {
        Tier::Inference
    }

    async fn attempt(&self, req: &TierRequest<'_>) -> Result<TierResult> {
        let Some(resp) = self.fallback.suggest(req.description).await else {
            return Ok(TierResult::Miss);
        };
        if let Err(e) = self
            .embeddings
            .remember(
                req.user_id,
                req.description,
                &resp.gl_code,
                &resp.department,
                false,
                req.now,
            )
            .await
        {
            warn!(user = %req.user_id, error = %e, "could not store provisional embedding");
        }
        Ok(TierResult::hit(Suggestion {
            gl_code: resp.gl_code,
            department: resp.department,
            tier: Tier::Inference,
            confidence: resp.confidence as f64,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Categorization {
    pub gl_code: String,
    pub department: String,
    pub tier: Tier,
    pub confidence: f64,
    pub suggestions: Vec<Suggestion>,
    pub normalized_description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CategorizationOutcome {
    Suggested(Categorization),
    NoSuggestion { normalized_description: String },
}

impl CategorizationOutcome {
    pub fn tier(&self) -> Option<Tier> {
        match self {
            CategorizationOutcome::Suggested(c) => Some(c.tier),
            CategorizationOutcome::NoSuggestion { .. } => None,
        }
    }
}

/// Which write-backs succeeded after a confirmation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteBackReport {
    pub cache: bool,
    pub embedding: bool,
    pub alias: bool,
}

pub struct CategorizationRouter {
    tiers: Vec<Arc<dyn TierStrategy>>,
    cache: DescriptionCache,
    embeddings: EmbeddingIndex,
    aliases: VendorAliasRegistry,
    usage: TierUsageLog,
    clock: Arc<dyn Clock>,
}

impl CategorizationRouter {
    /// Standard chain: cache, similarity, inference.
    pub fn new(
        cache: DescriptionCache,
        embeddings: EmbeddingIndex,
        fallback: AiFallback,
        aliases: VendorAliasRegistry,
        usage: TierUsageLog,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tiers: Vec<Arc<dyn TierStrategy>> = vec![
            Arc::new(CacheTier::new(cache.clone(), aliases.clone())),
            Arc::new(SimilarityTier::new(embeddings.clone())),
            Arc::new(InferenceTier::new(fallback, embeddings.clone())),
        ];
        Self::with_tiers(tiers, cache, embeddings, aliases, usage, clock)
    }

    /// Custom chain, tried in order.
    pub fn with_tiers(
        tiers: Vec<Arc<dyn TierStrategy>>,
        cache: DescriptionCache,
        embeddings: EmbeddingIndex,
        aliases: VendorAliasRegistry,
        usage: TierUsageLog,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tiers,
            cache,
            embeddings,
            aliases,
            usage,
            clock,
        }
    }

    pub fn embeddings(&self) -> &EmbeddingIndex {
        &self.embeddings
    }

    /// Returns the first tier's answer. With `ai_assist`, inference tiers are
    /// still consulted after a lower-tier hit and their answers are appended
    /// to the suggestions without replacing the primary answer.
    pub async fn categorize(
        &self,
        user_id: &str,
        description: &str,
        ai_assist: bool,
    ) -> Result<CategorizationOutcome> {
        let started = Instant::now();
        let normalized = normalize(description);
        let now = self.clock.now();
        let req = TierRequest {
            user_id,
            description,
            normalized: &normalized,
            now,
        };

        let mut primary: Option<(Tier, Vec<Suggestion>)> = None;
        if !normalized.is_empty() {
            for strategy in &self.tiers {
                let tier = strategy.tier();
                if primary.is_some() && !(ai_assist && tier == Tier::Inference) {
                    continue;
                }
                let TierResult::Hit { suggestions } = strategy.attempt(&req).await? else {
                    debug!(user = %user_id, tier = %tier, "tier miss");
                    continue;
                };
                match primary.as_mut() {
                    Some((_, existing)) => existing.extend(suggestions),
                    None => primary = Some((tier, suggestions)),
                }
                if !ai_assist {
                    break;
                }
            }
        }

        let outcome = match primary {
            Some((tier, suggestions)) if !suggestions.is_empty() => {
                let top = &suggestions[0];
                CategorizationOutcome::Suggested(Categorization {
                    gl_code: top.gl_code.clone(),
                    department: top.department.clone(),
                    tier,
                    confidence: top.confidence,
                    suggestions,
                    normalized_description: normalized,
                })
            }
            _ => CategorizationOutcome::NoSuggestion {
                normalized_description: normalized,
            },
        };

        let confidence = match &outcome {
            CategorizationOutcome::Suggested(c) => Some(c.confidence),
            CategorizationOutcome::NoSuggestion { .. } => None,
        };
        let latency_ms = started.elapsed().as_millis() as i64;
        if let Err(e) = self
            .usage
            .record(user_id, outcome.tier(), confidence, latency_ms, now)
            .await
        {
            warn!(user = %user_id, error = %e, "could not record tier usage");
        }
        info!(
            user = %user_id,
            tier = outcome.tier().map(|t| t.number()).unwrap_or(0),
            latency_ms,
            "categorized"
        );
        Ok(outcome)
    }

    /// Teaches every tier the confirmed codes for `description`. Each
    /// write-back is independent and a failure is only logged.
    pub async fn confirm_categorization(
        &self,
        user_id: &str,
        description: &str,
        gl_code: &str,
        department: &str,
    ) -> Result<WriteBackReport> {
        let gl_code = gl_code.trim();
        let department = department.trim();
        if gl_code.is_empty() || department.is_empty() {
            return Err(EngineError::InvalidInput(
                "GL code and department are required".into(),
            ));
        }
        let normalized = normalize(description);
        if normalized.is_empty() {
            return Err(EngineError::InvalidInput("description is empty".into()));
        }
        let now = self.clock.now();
        let mut report = WriteBackReport::default();

        match self
            .cache
            .record_categorization(user_id, description, gl_code, department, now)
            .await
        {
            Ok(_) => report.cache = true,
            Err(e) => warn!(user = %user_id, error = %e, "cache write-back failed"),
        }
        match self
            .embeddings
            .remember(user_id, description, gl_code, department, true, now)
            .await
        {
            Ok(stored) => report.embedding = stored,
            Err(e) => warn!(user = %user_id, error = %e, "embedding write-back failed"),
        }
        match self
            .aliases
            .reinforce(
                user_id,
                &normalized,
                &extract_vendor(description),
                gl_code,
                department,
                now,
            )
            .await
        {
            Ok(_) => report.alias = true,
            Err(e) => warn!(user = %user_id, error = %e, "alias write-back failed"),
        }

        info!(user = %user_id, gl_code, department, ?report, "categorization confirmed");
        Ok(report)
    }
}
