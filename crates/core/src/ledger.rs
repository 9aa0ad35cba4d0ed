//! Landing tables for importer transactions and extracted receipts.

use crate::error::{EngineError, Result};
use crate::normalize::normalize;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use storage::models::{Receipt, Transaction};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub posted_on: NaiveDate,
    pub amount: f64,
    pub description: String,
}

/// Receipt fields as supplied by the extraction service, with its per-field
/// confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReceipt {
    pub vendor: String,
    pub receipt_date: NaiveDate,
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "full_confidence")]
    pub vendor_confidence: f64,
    #[serde(default = "full_confidence")]
    pub date_confidence: f64,
    #[serde(default = "full_confidence")]
    pub amount_confidence: f64,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn full_confidence() -> f64 {
    1.0
}

#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add_transaction(
        &self,
        user_id: &str,
        txn: NewTransaction,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        if !txn.amount.is_finite() {
            return Err(EngineError::InvalidInput("transaction amount is not a number".into()));
        }
        let row = sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions (user_id, posted_on, amount, description, normalized_description, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(txn.posted_on)
        .bind(txn.amount)
        .bind(&txn.description)
        .bind(normalize(&txn.description))
        .bind(now.timestamp())
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn add_receipt(
        &self,
        user_id: &str,
        receipt: NewReceipt,
        now: DateTime<Utc>,
    ) -> Result<Receipt> {
        if !receipt.amount.is_finite() {
            return Err(EngineError::InvalidInput("receipt amount is not a number".into()));
        }
        let row = sqlx::query_as::<_, Receipt>(
            r#"
            INSERT INTO receipts (user_id, vendor, receipt_date, amount, currency, vendor_confidence, date_confidence, amount_confidence, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&receipt.vendor)
        .bind(receipt.receipt_date)
        .bind(receipt.amount)
        .bind(&receipt.currency)
        .bind(receipt.vendor_confidence.clamp(0.0, 1.0))
        .bind(receipt.date_confidence.clamp(0.0, 1.0))
        .bind(receipt.amount_confidence.clamp(0.0, 1.0))
        .bind(now.timestamp())
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn transaction(&self, user_id: &str, id: i64) -> Result<Transaction> {
        sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = ?1 AND user_id = ?2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("transaction {id}")))
    }

    pub async fn receipt(&self, user_id: &str, id: i64) -> Result<Receipt> {
        sqlx::query_as::<_, Receipt>("SELECT * FROM receipts WHERE id = ?1 AND user_id = ?2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("receipt {id}")))
    }

    pub async fn unmatched_transactions(&self, user_id: &str) -> Result<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE user_id = ?1 AND matched_receipt_id IS NULL ORDER BY posted_on, id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn unmatched_receipts(&self, user_id: &str) -> Result<Vec<Receipt>> {
        let rows = sqlx::query_as::<_, Receipt>(
            "SELECT * FROM receipts WHERE user_id = ?1 AND matched_transaction_id IS NULL ORDER BY receipt_date, id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Stores a confirmed categorization on the transaction itself.
    pub async fn set_categorization(
        &self,
        user_id: &str,
        transaction_id: i64,
        gl_code: &str,
        department: &str,
    ) -> Result<Transaction> {
        sqlx::query_as::<_, Transaction>(
            "UPDATE transactions SET gl_code = ?1, department = ?2 WHERE id = ?3 AND user_id = ?4 RETURNING *",
        )
        .bind(gl_code)
        .bind(department)
        .bind(transaction_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("transaction {transaction_id}")))
    }
}
