//! Receipt to transaction proposals and their state machine.
//!
//! Every transition is a compare-and-swap on the proposal status, and the
//! database refuses a second active proposal for the same receipt or
//! transaction, so concurrent callers see a conflict instead of an overwrite.

use crate::aliases::VendorAliasRegistry;
use crate::clock::Clock;
use crate::config::MatchingConfig;
use crate::error::{is_unique_violation, EngineError, Result};
use crate::ledger::Ledger;
use crate::scoring::{MatchScore, MatchScorer};
use serde::Serialize;
use sqlx::{Sqlite, SqlitePool};
use std::collections::HashSet;
use std::sync::Arc;
use storage::models::{MatchProposal, ProposalStatus};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct AutoMatchSummary {
    pub receipts_considered: usize,
    pub confirmed: usize,
    pub proposed: usize,
    pub below_threshold: usize,
    /// Lost a race with a concurrent writer.
    pub conflicts: usize,
    pub proposals: Vec<MatchProposal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchingStatistics {
    pub total_receipts: i64,
    pub matched_receipts: i64,
    pub unmatched_receipts: i64,
    pub proposed: i64,
    pub confirmed: i64,
    pub rejected: i64,
    pub manual: i64,
    /// Mean confidence of confirmed proposals.
    pub average_confidence: f64,
    /// Share of confirmed proposals that were not manual links.
    pub auto_match_rate: f64,
}

pub struct MatchProposalManager {
    pool: SqlitePool,
    ledger: Ledger,
    scorer: MatchScorer,
    aliases: VendorAliasRegistry,
    clock: Arc<dyn Clock>,
}

impl MatchProposalManager {
    pub fn new(
        pool: SqlitePool,
        config: MatchingConfig,
        aliases: VendorAliasRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger: Ledger::new(pool.clone()),
            pool,
            scorer: MatchScorer::new(config),
            aliases,
            clock,
        }
    }

    /// Scores each unmatched receipt (optionally only `receipt_ids`) against
    /// the user's unmatched transactions and keeps the best candidate.
    /// Candidates at or above the auto-confirm threshold are confirmed
    /// directly, those at or above the review threshold are proposed.
    pub async fn auto_match(
        &self,
        user_id: &str,
        receipt_ids: Option<&[i64]>,
    ) -> Result<AutoMatchSummary> {
        let config = self.scorer.config();
        let (busy_receipts, mut busy_transactions) = self.active_sides(user_id).await?;
        let rejected = if config.allow_reproposal_after_reject {
            HashSet::new()
        } else {
            self.rejected_pairs(user_id).await?
        };
        let aliases = self.aliases.snapshot(user_id).await?;
        let transactions = self.ledger.unmatched_transactions(user_id).await?;
        let receipts: Vec<_> = self
            .ledger
            .unmatched_receipts(user_id)
            .await?
            .into_iter()
            .filter(|r| !busy_receipts.contains(&r.id))
            .filter(|r| receipt_ids.map_or(true, |ids| ids.contains(&r.id)))
            .collect();

        let mut summary = AutoMatchSummary {
            receipts_considered: receipts.len(),
            ..Default::default()
        };
        for receipt in &receipts {
            let best = transactions
                .iter()
                .filter(|t| !busy_transactions.contains(&t.id))
                .filter(|t| !rejected.contains(&(receipt.id, t.id)))
                .map(|t| (t.id, self.scorer.score(receipt, t, &aliases)))
                .min_by(|(_, a), (_, b)| a.rank(b));

            let Some((transaction_id, score)) = best else {
                summary.below_threshold += 1;
                continue;
            };
            let status = if score.confidence_score >= config.auto_confirm_threshold {
                ProposalStatus::Confirmed
            } else if score.confidence_score >= config.review_threshold {
                ProposalStatus::Proposed
            } else {
                debug!(user = %user_id, receipt = receipt.id, confidence = score.confidence_score, "no candidate above review threshold");
                summary.below_threshold += 1;
                continue;
            };

            match self
                .create(user_id, receipt.id, transaction_id, &score, status, false)
                .await
            {
                Ok(proposal) => {
                    busy_transactions.insert(transaction_id);
                    match status {
                        ProposalStatus::Confirmed => summary.confirmed += 1,
                        _ => summary.proposed += 1,
                    }
                    summary.proposals.push(proposal);
                }
                Err(EngineError::Conflict(reason)) => {
                    warn!(user = %user_id, receipt = receipt.id, transaction = transaction_id, %reason, "skipped contested pair");
                    busy_transactions.insert(transaction_id);
                    summary.conflicts += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            user = %user_id,
            considered = summary.receipts_considered,
            confirmed = summary.confirmed,
            proposed = summary.proposed,
            "auto-match finished"
        );
        Ok(summary)
    }

    /// `Proposed` to `Confirmed`, linking both sides.
    pub async fn confirm(&self, user_id: &str, proposal_id: i64) -> Result<MatchProposal> {
        let now = self.clock.now().timestamp();
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query_as::<_, MatchProposal>(
            r#"
            UPDATE match_proposals SET status = 'confirmed', resolved_at = ?1
            WHERE id = ?2 AND user_id = ?3 AND status = 'proposed'
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(proposal_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(proposal) = updated else {
            tx.rollback().await?;
            return Err(self.transition_failure(user_id, proposal_id).await);
        };
        link(&mut tx, proposal.receipt_id, proposal.transaction_id).await?;
        tx.commit().await?;
        info!(user = %user_id, proposal_id, "proposal confirmed");
        Ok(proposal)
    }

    /// `Proposed` to `Rejected`. Both sides stay unmatched and eligible for
    /// other pairings.
    pub async fn reject(&self, user_id: &str, proposal_id: i64) -> Result<MatchProposal> {
        let updated = sqlx::query_as::<_, MatchProposal>(
            r#"
            UPDATE match_proposals SET status = 'rejected', resolved_at = ?1
            WHERE id = ?2 AND user_id = ?3 AND status = 'proposed'
            RETURNING *
            "#,
        )
        .bind(self.clock.now().timestamp())
        .bind(proposal_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        match updated {
            Some(proposal) => {
                info!(user = %user_id, proposal_id, "proposal rejected");
                Ok(proposal)
            }
            None => Err(self.transition_failure(user_id, proposal_id).await),
        }
    }

    /// Links a receipt and transaction chosen by the user. Scores are kept
    /// for audit but do not gate the link. A previously rejected pair may be
    /// linked this way.
    pub async fn manual_match(
        &self,
        user_id: &str,
        receipt_id: i64,
        transaction_id: i64,
    ) -> Result<MatchProposal> {
        let receipt = self.ledger.receipt(user_id, receipt_id).await?;
        let transaction = self.ledger.transaction(user_id, transaction_id).await?;
        if receipt.matched_transaction_id.is_some() {
            return Err(EngineError::InvalidInput(format!(
                "receipt {receipt_id} is already matched"
            )));
        }
        if transaction.matched_receipt_id.is_some() {
            return Err(EngineError::InvalidInput(format!(
                "transaction {transaction_id} is already matched"
            )));
        }
        let (busy_receipts, busy_transactions) = self.active_sides(user_id).await?;
        if busy_receipts.contains(&receipt_id) {
            return Err(EngineError::InvalidInput(format!(
                "receipt {receipt_id} already has an active proposal"
            )));
        }
        if busy_transactions.contains(&transaction_id) {
            return Err(EngineError::InvalidInput(format!(
                "transaction {transaction_id} already has an active proposal"
            )));
        }

        let aliases = self.aliases.snapshot(user_id).await?;
        let score = self.scorer.score(&receipt, &transaction, &aliases);
        self.create(
            user_id,
            receipt_id,
            transaction_id,
            &score,
            ProposalStatus::Confirmed,
            true,
        )
        .await
    }

    /// Removes a proposed or confirmed proposal and returns both sides to
    /// unmatched. The pair is not remembered as rejected.
    pub async fn unmatch(&self, user_id: &str, proposal_id: i64) -> Result<MatchProposal> {
        let mut tx = self.pool.begin().await?;
        let proposal = sqlx::query_as::<_, MatchProposal>(
            "SELECT * FROM match_proposals WHERE id = ?1 AND user_id = ?2",
        )
        .bind(proposal_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("proposal {proposal_id}")))?;
        if !proposal.status.is_active() {
            return Err(EngineError::InvalidInput(format!(
                "proposal {proposal_id} is {} and cannot be unmatched",
                proposal.status
            )));
        }

        let deleted = sqlx::query("DELETE FROM match_proposals WHERE id = ?1 AND status = ?2")
            .bind(proposal_id)
            .bind(proposal.status)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(EngineError::Conflict(format!(
                "proposal {proposal_id} changed concurrently"
            )));
        }
        sqlx::query(
            "UPDATE receipts SET matched_transaction_id = NULL WHERE id = ?1 AND matched_transaction_id = ?2",
        )
        .bind(proposal.receipt_id)
        .bind(proposal.transaction_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE transactions SET matched_receipt_id = NULL WHERE id = ?1 AND matched_receipt_id = ?2",
        )
        .bind(proposal.transaction_id)
        .bind(proposal.receipt_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        info!(user = %user_id, proposal_id, "proposal unmatched");
        Ok(proposal)
    }

    pub async fn proposal(&self, user_id: &str, proposal_id: i64) -> Result<MatchProposal> {
        sqlx::query_as::<_, MatchProposal>(
            "SELECT * FROM match_proposals WHERE id = ?1 AND user_id = ?2",
        )
        .bind(proposal_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("proposal {proposal_id}")))
    }

    /// Proposals for a user, newest first. `Proposed` is the review queue.
    pub async fn list_proposals(
        &self,
        user_id: &str,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<MatchProposal>> {
        let rows = sqlx::query_as::<_, MatchProposal>(
            r#"
            SELECT * FROM match_proposals
            WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn statistics(&self, user_id: &str) -> Result<MatchingStatistics> {
        let (total_receipts, matched_receipts): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COUNT(matched_transaction_id)
            FROM receipts WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        let (proposed, confirmed, rejected, manual, average): (
            Option<i64>,
            Option<i64>,
            Option<i64>,
            Option<i64>,
            Option<f64>,
        ) = sqlx::query_as(
            r#"
            SELECT
                SUM(status = 'proposed'),
                SUM(status = 'confirmed'),
                SUM(status = 'rejected'),
                SUM(status = 'confirmed' AND is_manual = 1),
                AVG(CASE WHEN status = 'confirmed' THEN confidence_score END)
            FROM match_proposals WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let confirmed = confirmed.unwrap_or(0);
        let manual = manual.unwrap_or(0);
        Ok(MatchingStatistics {
            total_receipts,
            matched_receipts,
            unmatched_receipts: total_receipts - matched_receipts,
            proposed: proposed.unwrap_or(0),
            confirmed,
            rejected: rejected.unwrap_or(0),
            manual,
            average_confidence: average.unwrap_or(0.0),
            auto_match_rate: if confirmed > 0 {
                (confirmed - manual) as f64 / confirmed as f64
            } else {
                0.0
            },
        })
    }

    async fn create(
        &self,
        user_id: &str,
        receipt_id: i64,
        transaction_id: i64,
        score: &MatchScore,
        status: ProposalStatus,
        is_manual: bool,
    ) -> Result<MatchProposal> {
        let now = self.clock.now().timestamp();
        let resolved_at = (status == ProposalStatus::Confirmed).then_some(now);
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query_as::<_, MatchProposal>(
            r#"
            INSERT INTO match_proposals (user_id, receipt_id, transaction_id, amount_score, date_score, vendor_score, confidence_score, status, is_manual, created_at, resolved_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(receipt_id)
        .bind(transaction_id)
        .bind(score.amount_score)
        .bind(score.date_score)
        .bind(score.vendor_score)
        .bind(score.confidence_score)
        .bind(status)
        .bind(is_manual)
        .bind(now)
        .bind(resolved_at)
        .fetch_one(&mut *tx)
        .await;
        let proposal = match inserted {
            Ok(p) => p,
            Err(e) if is_unique_violation(&e) => {
                return Err(EngineError::Conflict(format!(
                    "receipt {receipt_id} or transaction {transaction_id} already has an active proposal"
                )));
            }
            Err(e) => return Err(e.into()),
        };
        if status == ProposalStatus::Confirmed {
            link(&mut tx, receipt_id, transaction_id).await?;
        }
        tx.commit().await?;
        debug!(
            user = %user_id,
            proposal_id = proposal.id,
            %status,
            confidence = score.confidence_score,
            manual = is_manual,
            "proposal created"
        );
        Ok(proposal)
    }

    /// Receipt and transaction ids held by a proposed or confirmed proposal.
    async fn active_sides(&self, user_id: &str) -> Result<(HashSet<i64>, HashSet<i64>)> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT receipt_id, transaction_id FROM match_proposals WHERE user_id = ?1 AND status IN ('proposed', 'confirmed')",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().unzip())
    }

    async fn rejected_pairs(&self, user_id: &str) -> Result<HashSet<(i64, i64)>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT receipt_id, transaction_id FROM match_proposals WHERE user_id = ?1 AND status = 'rejected'",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// Why a `WHERE status = 'proposed'` update touched nothing.
    async fn transition_failure(&self, user_id: &str, proposal_id: i64) -> EngineError {
        match self.proposal(user_id, proposal_id).await {
            Ok(p) => EngineError::Conflict(format!("proposal {proposal_id} is already {}", p.status)),
            Err(e) => e,
        }
    }
}

async fn link(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    receipt_id: i64,
    transaction_id: i64,
) -> Result<()> {
    sqlx::query("UPDATE receipts SET matched_transaction_id = ?1 WHERE id = ?2")
        .bind(transaction_id)
        .bind(receipt_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("UPDATE transactions SET matched_receipt_id = ?1 WHERE id = ?2")
        .bind(receipt_id)
        .bind(transaction_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
