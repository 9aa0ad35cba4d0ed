//! Plain-text renderings of command results. `--json` prints the serialized
//! value instead.

use anyhow::Result;
use expense_core::jobs::{JobOutcome, JobReport};
use expense_core::matching::{AutoMatchSummary, MatchingStatistics};
use expense_core::router::{CategorizationOutcome, WriteBackReport};
use expense_core::usage::TierUsageSummary;
use expense_core::warming::WarmingReport;
use serde::Serialize;
use storage::models::{MatchProposal, Receipt, Transaction};

pub fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce(&T) -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text(value));
    }
    Ok(())
}

pub fn transaction(t: &Transaction) -> String {
    format!(
        "transaction {}: {} {:.2} {}",
        t.id, t.posted_on, t.amount, t.description
    )
}

pub fn receipt(r: &Receipt) -> String {
    format!(
        "receipt {}: {} {:.2} {} {}",
        r.id, r.receipt_date, r.amount, r.currency, r.vendor
    )
}

pub fn categorization(outcome: &CategorizationOutcome) -> String {
    match outcome {
        CategorizationOutcome::Suggested(c) => {
            let mut out = format!(
                "{} / {} (tier {}, confidence {:.2})",
                c.gl_code,
                c.department,
                c.tier.number(),
                c.confidence
            );
            for s in c.suggestions.iter().skip(1) {
                out.push_str(&format!(
                    "\n  also: {} / {} (tier {}, {:.2})",
                    s.gl_code,
                    s.department,
                    s.tier.number(),
                    s.confidence
                ));
            }
            out
        }
        CategorizationOutcome::NoSuggestion {
            normalized_description,
        } => format!("no suggestion for \"{normalized_description}\""),
    }
}

pub fn write_back(report: &WriteBackReport) -> String {
    let flag = |ok: bool| if ok { "ok" } else { "failed" };
    format!(
        "confirmed: cache {}, embedding {}, alias {}",
        flag(report.cache),
        flag(report.embedding),
        flag(report.alias)
    )
}

pub fn proposal(p: &MatchProposal) -> String {
    format!(
        "proposal {}: receipt {} <-> transaction {} [{}{}] confidence {:.3} (amount {:.2}, date {:.2}, vendor {:.2})",
        p.id,
        p.receipt_id,
        p.transaction_id,
        p.status,
        if p.is_manual { ", manual" } else { "" },
        p.confidence_score,
        p.amount_score,
        p.date_score,
        p.vendor_score
    )
}

pub fn proposals(list: &[MatchProposal]) -> String {
    if list.is_empty() {
        return "no proposals".to_string();
    }
    list.iter().map(proposal).collect::<Vec<_>>().join("\n")
}

pub fn auto_match(s: &AutoMatchSummary) -> String {
    let mut out = format!(
        "auto-match: {} receipts, {} confirmed, {} proposed, {} below threshold, {} conflicts",
        s.receipts_considered, s.confirmed, s.proposed, s.below_threshold, s.conflicts
    );
    for p in &s.proposals {
        out.push('\n');
        out.push_str(&proposal(p));
    }
    out
}

pub fn statistics(s: &MatchingStatistics) -> String {
    format!(
        "receipts: {} total, {} matched, {} unmatched\nproposals: {} proposed, {} confirmed ({} manual), {} rejected\naverage confidence {:.3}, auto-match rate {:.1}%",
        s.total_receipts,
        s.matched_receipts,
        s.unmatched_receipts,
        s.proposed,
        s.confirmed,
        s.manual,
        s.rejected,
        s.average_confidence,
        s.auto_match_rate * 100.0
    )
}

pub fn usage(s: &TierUsageSummary) -> String {
    format!(
        "categorizations: {} (tier1 {}, tier2 {}, tier3 {}, none {}), avg latency {:.1} ms",
        s.total, s.tier1, s.tier2, s.tier3, s.none, s.avg_latency_ms
    )
}

pub fn job(r: &JobReport) -> String {
    let outcome = match &r.outcome {
        JobOutcome::Completed => "completed".to_string(),
        JobOutcome::Cancelled => "cancelled".to_string(),
        JobOutcome::Skipped => "skipped (lease held elsewhere)".to_string(),
        JobOutcome::Failed(reason) => format!("failed: {reason}"),
    };
    format!(
        "{}: {}, {} batches, {} scanned, {} affected",
        r.job, outcome, r.batches, r.scanned, r.affected
    )
}

pub fn warming(r: &WarmingReport) -> String {
    format!(
        "warmed from {} rows: {} seeded, {} skipped; {} vendors, {} GL codes, {} departments, total ${:.2}",
        r.rows_read,
        r.seeded,
        r.skipped,
        r.unique_vendors,
        r.unique_gl_codes,
        r.unique_departments,
        r.total_amount
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use expense_core::router::{Categorization, Suggestion};
    use expense_core::usage::Tier;

    #[test]
    fn categorization_lists_extra_suggestions() {
        let outcome = CategorizationOutcome::Suggested(Categorization {
            gl_code: "6410".into(),
            department: "TRAVEL".into(),
            tier: Tier::Cache,
            confidence: 1.0,
            suggestions: vec![
                Suggestion {
                    gl_code: "6410".into(),
                    department: "TRAVEL".into(),
                    tier: Tier::Cache,
                    confidence: 1.0,
                },
                Suggestion {
                    gl_code: "6900".into(),
                    department: "ADMIN".into(),
                    tier: Tier::Inference,
                    confidence: 0.55,
                },
            ],
            normalized_description: "DELTA AIR".into(),
        });
        let text = categorization(&outcome);
        assert!(text.starts_with("6410 / TRAVEL (tier 1, confidence 1.00)"));
        assert!(text.contains("also: 6900 / ADMIN (tier 3, 0.55)"));
    }

    #[test]
    fn failed_job_shows_reason() {
        let report = JobReport {
            job: "embedding_cleanup",
            outcome: JobOutcome::Failed("status 503".into()),
            batches: 1,
            scanned: 10,
            affected: 0,
            started_at: chrono::Utc::now(),
        };
        assert_eq!(
            job(&report),
            "embedding_cleanup: failed: status 503, 1 batches, 10 scanned, 0 affected"
        );
    }
}
