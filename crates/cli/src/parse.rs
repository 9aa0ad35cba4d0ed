use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use storage::models::ProposalStatus;

/// Accepts `YYYY-MM-DD` and `MM/DD/YYYY`, the two forms bank and card
/// exports use.
pub fn date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .with_context(|| format!("unrecognized date: {raw}"))
}

/// Accepts `$1,234.56` as well as plain numbers.
pub fn amount(raw: &str) -> Result<f64> {
    let cleaned = raw.trim().replace(['$', ','], "");
    let value: f64 = cleaned
        .parse()
        .with_context(|| format!("unrecognized amount: {raw}"))?;
    if !value.is_finite() {
        bail!("amount must be finite: {raw}");
    }
    Ok(value)
}

pub fn status(raw: &str) -> Result<ProposalStatus> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "proposed" => Ok(ProposalStatus::Proposed),
        "confirmed" => Ok(ProposalStatus::Confirmed),
        "rejected" => Ok(ProposalStatus::Rejected),
        other => bail!("unknown proposal status: {other} (proposed|confirmed|rejected)"),
    }
}

/// Comma-separated ids, e.g. `3,7,12`.
pub fn ids(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i64>().with_context(|| format!("bad id: {s}")))
        .collect()
}
