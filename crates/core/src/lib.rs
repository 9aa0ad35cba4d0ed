//! Core library: receipt matching, tiered GL/department categorization,
//! vendor aliases and their maintenance jobs.

pub mod aliases;
pub mod cache;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod lease;
pub mod ledger;
pub mod matching;
pub mod normalize;
pub mod router;
pub mod scoring;
pub mod usage;
pub mod vectorstore;
pub mod warming;

pub use engine::Engine;
pub use error::{EngineError, Result};
