//! Receipt to transaction scoring.
//!
//! Three sub-scores in [0, 1] combined with non-negative weights that sum to
//! one, so the total is bounded and non-decreasing in every sub-score.

use crate::aliases::AliasSnapshot;
use crate::config::{MatchWeights, MatchingConfig};
use crate::normalize::{contains_tokens, normalize, tokens};
use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;
use storage::models::{Receipt, Transaction};
use strsim::jaro_winkler;

/// Token similarity at which two vendor words count as the same word.
const TOKEN_MATCH_SIMILARITY: f64 = 0.9;
const CONTAINMENT_SCORE: f64 = 0.9;
const OVERLAP_CEILING: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchScore {
    pub amount_score: f64,
    pub date_score: f64,
    pub vendor_score: f64,
    pub confidence_score: f64,
    /// Absolute day gap between receipt and posting date.
    pub date_gap_days: i64,
    /// Absolute difference of the amounts.
    pub amount_gap: f64,
}

impl MatchScore {
    /// Higher confidence first; ties go to the smaller date gap, then the
    /// smaller amount gap.
    pub fn rank(&self, other: &MatchScore) -> Ordering {
        other
            .confidence_score
            .total_cmp(&self.confidence_score)
            .then_with(|| self.date_gap_days.cmp(&other.date_gap_days))
            .then_with(|| self.amount_gap.total_cmp(&other.amount_gap))
    }
}

#[derive(Debug, Clone)]
pub struct MatchScorer {
    config: MatchingConfig,
}

impl MatchScorer {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    pub fn score(
        &self,
        receipt: &Receipt,
        transaction: &Transaction,
        aliases: &AliasSnapshot,
    ) -> MatchScore {
        let description = if transaction.normalized_description.is_empty() {
            normalize(&transaction.description)
        } else {
            transaction.normalized_description.clone()
        };
        let amount_score = self.amount_score(receipt.amount, transaction.amount);
        let date_score = self.date_score(receipt.receipt_date, transaction.posted_on);
        let vendor_score = vendor_score(&normalize(&receipt.vendor), &description, aliases);
        MatchScore {
            amount_score,
            date_score,
            vendor_score,
            confidence_score: combine(&self.config.weights, amount_score, date_score, vendor_score),
            date_gap_days: (receipt.receipt_date - transaction.posted_on).num_days().abs(),
            amount_gap: (receipt.amount.abs() - transaction.amount.abs()).abs(),
        }
    }

    /// 1.0 within the cent tolerance, then linear in the relative difference,
    /// reaching 0.0 at `amount_tolerance_ratio`. Signs are ignored since
    /// statements record spending as negative amounts.
    pub fn amount_score(&self, receipt_amount: f64, transaction_amount: f64) -> f64 {
        let (r, t) = (receipt_amount.abs(), transaction_amount.abs());
        let diff = (r - t).abs();
        let diff_cents = (diff * 100.0).round() as i64;
        if diff_cents <= self.config.amount_tolerance_cents {
            return 1.0;
        }
        let relative = diff / r.max(t);
        (1.0 - relative / self.config.amount_tolerance_ratio).clamp(0.0, 1.0)
    }

    /// Linear in the absolute day gap, zero beyond `date_window_days` in
    /// either direction.
    pub fn date_score(&self, receipt_date: NaiveDate, posted_on: NaiveDate) -> f64 {
        let gap = (receipt_date - posted_on).num_days().abs() as f64;
        let window = self.config.date_window_days as f64;
        (1.0 - gap / (window + 1.0)).clamp(0.0, 1.0)
    }
}

/// Weighted sum, clamped against rounding drift.
pub fn combine(weights: &MatchWeights, amount: f64, date: f64, vendor: f64) -> f64 {
    (weights.amount * amount + weights.date * date + weights.vendor * vendor).clamp(0.0, 1.0)
}

/// Both arguments are normalized keys.
///
/// 1.0 for an identical key or the same canonical alias on both sides, 0.9
/// when one side's tokens appear in the other, otherwise up to 0.8 for the
/// share of vendor tokens with a close counterpart in the description.
pub fn vendor_score(vendor: &str, description: &str, aliases: &AliasSnapshot) -> f64 {
    if vendor.is_empty() || description.is_empty() {
        return 0.0;
    }
    if vendor == description || same_canonical(vendor, description, aliases) {
        return 1.0;
    }
    if contains_tokens(description, vendor) || contains_tokens(vendor, description) {
        return CONTAINMENT_SCORE;
    }

    let vendor_tokens = tokens(vendor);
    let description_tokens = tokens(description);
    let matched = vendor_tokens
        .iter()
        .filter(|v| {
            description_tokens
                .iter()
                .any(|d| jaro_winkler(v, d) >= TOKEN_MATCH_SIMILARITY)
        })
        .count();
    OVERLAP_CEILING * matched as f64 / vendor_tokens.len() as f64
}

fn same_canonical(vendor: &str, description: &str, aliases: &AliasSnapshot) -> bool {
    let Some(described) = aliases.resolve(description) else {
        return false;
    };
    let canonical = normalize(&described.canonical_name);
    if canonical == vendor {
        return true;
    }
    aliases
        .resolve(vendor)
        .map(|a| normalize(&a.canonical_name) == canonical)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::models::VendorAlias;

    fn receipt(vendor: &str, date: &str, amount: f64) -> Receipt {
        Receipt {
            id: 1,
            user_id: "u".into(),
            vendor: vendor.into(),
            receipt_date: date.parse().unwrap(),
            amount,
            currency: "USD".into(),
            vendor_confidence: 1.0,
            date_confidence: 1.0,
            amount_confidence: 1.0,
            matched_transaction_id: None,
            created_at: 0,
        }
    }

    fn transaction(description: &str, date: &str, amount: f64) -> Transaction {
        Transaction {
            id: 1,
            user_id: "u".into(),
            posted_on: date.parse().unwrap(),
            amount,
            description: description.into(),
            normalized_description: normalize(description),
            gl_code: None,
            department: None,
            matched_receipt_id: None,
            created_at: 0,
        }
    }

    fn scorer() -> MatchScorer {
        MatchScorer::new(MatchingConfig::default())
    }

    #[test]
    fn identical_starbucks_pair_clears_auto_confirm() {
        let s = scorer().score(
            &receipt("STARBUCKS", "2025-06-10", 5.75),
            &transaction("STARBUCKS STORE 123", "2025-06-10", 5.75),
            &AliasSnapshot::default(),
        );
        assert_eq!(s.amount_score, 1.0);
        assert_eq!(s.date_score, 1.0);
        assert!(s.vendor_score >= 0.8);
        assert!(s.confidence_score > MatchingConfig::default().auto_confirm_threshold);
    }

    #[test]
    fn off_amount_and_late_date_lands_in_review_band() {
        let cfg = MatchingConfig::default();
        let s = scorer().score(
            &receipt("STARBUCKS", "2025-06-10", 5.75),
            &transaction("STARBUCKS STORE 123", "2025-06-14", 6.25),
            &AliasSnapshot::default(),
        );
        assert!(s.amount_score > 0.0 && s.amount_score < 1.0);
        assert!(s.date_score > 0.0 && s.date_score < 1.0);
        assert!(s.confidence_score > cfg.review_threshold);
        assert!(s.confidence_score < cfg.auto_confirm_threshold);
        assert_eq!(s.date_gap_days, 4);
    }

    #[test]
    fn amount_score_tolerates_a_cent_and_sign() {
        let sc = scorer();
        assert_eq!(sc.amount_score(10.00, 10.01), 1.0);
        assert_eq!(sc.amount_score(10.00, -10.00), 1.0);
        assert_eq!(sc.amount_score(10.00, 20.00), 0.0);
        assert_eq!(sc.amount_score(0.0, 0.0), 1.0);
    }

    #[test]
    fn date_score_is_symmetric_and_zero_past_window() {
        let sc = scorer();
        let d = |s: &str| s.parse::<NaiveDate>().unwrap();
        assert_eq!(
            sc.date_score(d("2025-06-10"), d("2025-06-12")),
            sc.date_score(d("2025-06-12"), d("2025-06-10"))
        );
        assert!(sc.date_score(d("2025-06-10"), d("2025-06-15")) > 0.0);
        assert_eq!(sc.date_score(d("2025-06-10"), d("2025-06-16")), 0.0);
    }

    #[test]
    fn vendor_score_levels() {
        let none = AliasSnapshot::default();
        assert_eq!(vendor_score("STARBUCKS", "STARBUCKS", &none), 1.0);
        assert_eq!(vendor_score("STARBUCKS", "STARBUCKS STORE", &none), 0.9);
        let fuzzy = vendor_score("STARBUKS COFFEE", "STARBUCKS SEATTLE WA", &none);
        assert!(fuzzy > 0.0 && fuzzy < 0.9, "got {fuzzy}");
        assert_eq!(vendor_score("HERTZ", "DELTA AIR", &none), 0.0);
        assert_eq!(vendor_score("", "DELTA AIR", &none), 0.0);
    }

    #[test]
    fn alias_canonical_match_scores_full() {
        let aliases = AliasSnapshot::new(vec![VendorAlias {
            id: 1,
            user_id: "u".into(),
            alias_pattern: "SQ BLUE BOTTLE".into(),
            canonical_name: "Blue Bottle Coffee".into(),
            default_gl_code: None,
            default_department: None,
            confidence: 0.7,
            match_count: 0,
            last_matched_at: None,
            created_at: 0,
        }]);
        assert_eq!(
            vendor_score("BLUE BOTTLE COFFEE", "SQ BLUE BOTTLE OAKLAND", &aliases),
            1.0
        );
    }

    #[test]
    fn combined_score_is_bounded_and_monotonic() {
        let w = MatchWeights::default();
        let grid = [0.0, 0.25, 0.5, 0.75, 1.0];
        for &a in &grid {
            for &d in &grid {
                for &v in &grid {
                    let base = combine(&w, a, d, v);
                    assert!((0.0..=1.0).contains(&base));
                    let bump = |x: f64| (x + 0.25).min(1.0);
                    assert!(combine(&w, bump(a), d, v) >= base);
                    assert!(combine(&w, a, bump(d), v) >= base);
                    assert!(combine(&w, a, d, bump(v)) >= base);
                }
            }
        }
    }

    #[test]
    fn rank_breaks_ties_on_date_then_amount_gap() {
        let base = MatchScore {
            amount_score: 1.0,
            date_score: 1.0,
            vendor_score: 1.0,
            confidence_score: 0.8,
            date_gap_days: 2,
            amount_gap: 0.5,
        };
        let closer_date = MatchScore { date_gap_days: 1, ..base };
        let closer_amount = MatchScore { amount_gap: 0.1, ..base };
        let higher = MatchScore { confidence_score: 0.9, date_gap_days: 5, ..base };
        assert_eq!(closer_date.rank(&base), Ordering::Less);
        assert_eq!(closer_amount.rank(&base), Ordering::Less);
        assert_eq!(higher.rank(&closer_date), Ordering::Less);
    }
}
