use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub embeddings: EmbeddingConfig,
    pub vectors: VectorConfig,
    pub inference: InferenceConfig,
    pub categorization: CategorizationConfig,
    pub matching: MatchingConfig,
    pub aliases: AliasConfig,
    pub jobs: JobConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        self.matching.validate()?;
        let threshold = self.vectors.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(EngineError::Config(format!(
                "vectors.similarity_threshold must be within [0, 1], got {threshold}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "sqlite://expense.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `hashing`, `openai` or `noop`.
    pub provider: String,
    pub model: String,
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hashing".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// `sqlite` or `qdrant`.
    pub provider: String,
    pub url: Option<String>,
    pub collection: String,
    pub similarity_threshold: f32,
    pub max_results: usize,
    pub unverified_ttl_days: i64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            provider: "sqlite".to_string(),
            url: None,
            collection: "categorizations".to_string(),
            similarity_threshold: 0.92,
            max_results: 5,
            unverified_ttl_days: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// `openai` or `noop`.
    pub provider: String,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            provider: "noop".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorizationConfig {
    pub max_embed_chars: usize,
}

impl Default for CategorizationConfig {
    fn default() -> Self {
        Self {
            max_embed_chars: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchWeights {
    pub amount: f64,
    pub date: f64,
    pub vendor: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            amount: 0.5,
            date: 0.2,
            vendor: 0.3,
        }
    }
}

impl MatchWeights {
    pub fn sum(&self) -> f64 {
        self.amount + self.date + self.vendor
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub weights: MatchWeights,
    pub auto_confirm_threshold: f64,
    pub review_threshold: f64,
    pub amount_tolerance_cents: i64,
    /// Relative difference at which the amount score reaches zero.
    pub amount_tolerance_ratio: f64,
    pub date_window_days: i64,
    pub allow_reproposal_after_reject: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            weights: MatchWeights::default(),
            auto_confirm_threshold: 0.90,
            review_threshold: 0.50,
            amount_tolerance_cents: 1,
            amount_tolerance_ratio: 0.20,
            date_window_days: 5,
            allow_reproposal_after_reject: false,
        }
    }
}

impl MatchingConfig {
    pub fn validate(&self) -> Result<()> {
        let w = &self.weights;
        if w.amount < 0.0 || w.date < 0.0 || w.vendor < 0.0 {
            return Err(EngineError::Config("match weights must be non-negative".into()));
        }
        if (w.sum() - 1.0).abs() > 1e-6 {
            return Err(EngineError::Config(format!(
                "match weights must sum to 1.0, got {}",
                w.sum()
            )));
        }
        for (name, value) in [
            ("auto_confirm_threshold", self.auto_confirm_threshold),
            ("review_threshold", self.review_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Config(format!(
                    "matching.{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.review_threshold > self.auto_confirm_threshold {
            return Err(EngineError::Config(
                "review_threshold must not exceed auto_confirm_threshold".into(),
            ));
        }
        if self.amount_tolerance_ratio <= 0.0 || self.date_window_days < 0 {
            return Err(EngineError::Config("tolerance bands must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AliasConfig {
    pub initial_confidence: f64,
    pub confirmation_increment: f64,
    pub decay_factor: f64,
    pub decay_floor: f64,
    pub stale_after_months: u32,
}

impl Default for AliasConfig {
    fn default() -> Self {
        Self {
            initial_confidence: 0.60,
            confirmation_increment: 0.10,
            decay_factor: 0.90,
            decay_floor: 0.50,
            stale_after_months: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub batch_size: usize,
    pub batch_pause_ms: u64,
    pub lease_ttl_secs: i64,
    pub decay_interval_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_pause_ms: 250,
            lease_ttl_secs: 3_600,
            decay_interval_secs: 7 * 24 * 3_600,
            cleanup_interval_secs: 30 * 24 * 3_600,
        }
    }
}

pub fn load(path: Option<&str>) -> Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("EXPENSE")
            .prefix_separator("__")
            .separator("__"),
    );
    let cfg: AppConfig = settings.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}
