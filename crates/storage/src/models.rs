//! Row models for the engine tables. Timestamps are Unix seconds.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: i64,
    pub user_id: String,
    pub posted_on: NaiveDate,
    pub amount: f64,
    pub description: String,
    pub normalized_description: String,
    pub gl_code: Option<String>,
    pub department: Option<String>,
    pub matched_receipt_id: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Receipt {
    pub id: i64,
    pub user_id: String,
    pub vendor: String,
    pub receipt_date: NaiveDate,
    pub amount: f64,
    pub currency: String,
    pub vendor_confidence: f64,
    pub date_confidence: f64,
    pub amount_confidence: f64,
    pub matched_transaction_id: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Proposed,
    Confirmed,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Proposed => "proposed",
            ProposalStatus::Confirmed => "confirmed",
            ProposalStatus::Rejected => "rejected",
        }
    }

    /// Proposed and Confirmed proposals occupy their receipt and transaction.
    pub fn is_active(&self) -> bool {
        matches!(self, ProposalStatus::Proposed | ProposalStatus::Confirmed)
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MatchProposal {
    pub id: i64,
    pub user_id: String,
    pub receipt_id: i64,
    pub transaction_id: i64,
    pub amount_score: f64,
    pub date_score: f64,
    pub vendor_score: f64,
    pub confidence_score: f64,
    pub status: ProposalStatus,
    pub is_manual: bool,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct VendorAlias {
    pub id: i64,
    pub user_id: String,
    pub alias_pattern: String,
    pub canonical_name: String,
    pub default_gl_code: Option<String>,
    pub default_department: Option<String>,
    pub confidence: f64,
    pub match_count: i64,
    pub last_matched_at: Option<i64>,
    pub created_at: i64,
}

impl VendorAlias {
    /// Both default codes present and non-empty.
    pub fn default_codes(&self) -> Option<(&str, &str)> {
        match (
            self.default_gl_code.as_deref(),
            self.default_department.as_deref(),
        ) {
            (Some(gl), Some(dept)) if !gl.is_empty() && !dept.is_empty() => Some((gl, dept)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DescriptionCacheEntry {
    pub id: i64,
    pub user_id: String,
    pub raw_hash: String,
    pub normalized_description: String,
    pub gl_code: Option<String>,
    pub department: Option<String>,
    pub hit_count: i64,
    pub last_accessed_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct EmbeddingRow {
    pub id: String,
    pub user_id: String,
    pub description_text: String,
    pub gl_code: String,
    pub department: String,
    /// JSON array of f32.
    pub vector: String,
    pub verified: bool,
    pub expires_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TierUsageRow {
    pub id: i64,
    pub user_id: String,
    /// 0 when no tier answered.
    pub tier: i64,
    pub confidence: Option<f64>,
    pub latency_ms: i64,
    pub created_at: i64,
}
