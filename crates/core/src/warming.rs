//! Seeds the categorization tiers from a historical expense export with the
//! columns `Date, Description, Vendor, Amount, GL Code, Department`.

use crate::error::{EngineError, Result};
use crate::normalize::extract_vendor;
use crate::router::CategorizationRouter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct ExpenseRow {
    #[serde(rename = "Date", default)]
    _date: String,
    #[serde(rename = "Description", default)]
    description: String,
    #[serde(rename = "Vendor", default)]
    vendor: String,
    #[serde(rename = "Amount", default)]
    amount: String,
    #[serde(rename = "GL Code", default)]
    gl_code: String,
    #[serde(rename = "Department", default)]
    department: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WarmingReport {
    pub rows_read: usize,
    pub seeded: usize,
    pub skipped: usize,
    pub unique_vendors: usize,
    pub unique_gl_codes: usize,
    pub unique_departments: usize,
    pub total_amount: f64,
}

/// `"$1,234.56"` to `1234.56`; unparseable text is zero.
pub fn parse_amount(raw: &str) -> f64 {
    raw.replace(['$', ','], "").trim().parse().unwrap_or(0.0)
}

/// GL codes are exported with trailing dots (`6100.`).
pub fn clean_gl_code(raw: &str) -> String {
    raw.replace('.', "").trim().to_string()
}

pub async fn warm_from_path(
    router: &CategorizationRouter,
    user_id: &str,
    path: &Path,
) -> Result<WarmingReport> {
    let file = std::fs::File::open(path)
        .map_err(|e| EngineError::InvalidInput(format!("{}: {e}", path.display())))?;
    warm_from_reader(router, user_id, std::io::BufReader::new(file)).await
}

pub async fn warm_from_reader<R: Read>(
    router: &CategorizationRouter,
    user_id: &str,
    reader: R,
) -> Result<WarmingReport> {
    let rows = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader)
        .deserialize::<ExpenseRow>()
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut report = WarmingReport::default();
    let mut vendors = HashSet::new();
    let mut gl_codes = HashSet::new();
    let mut departments = HashSet::new();
    for row in rows {
        report.rows_read += 1;
        let gl_code = clean_gl_code(&row.gl_code);
        if row.description.is_empty() || gl_code.is_empty() || row.department.is_empty() {
            debug!(description = %row.description, "skipping uncategorized row");
            report.skipped += 1;
            continue;
        }
        router
            .confirm_categorization(user_id, &row.description, &gl_code, &row.department)
            .await?;
        report.seeded += 1;
        report.total_amount += parse_amount(&row.amount);
        vendors.insert(if row.vendor.is_empty() {
            extract_vendor(&row.description)
        } else {
            row.vendor
        });
        gl_codes.insert(gl_code);
        departments.insert(row.department);
    }
    report.unique_vendors = vendors.len();
    report.unique_gl_codes = gl_codes.len();
    report.unique_departments = departments.len();

    info!(
        user = %user_id,
        rows = report.rows_read,
        seeded = report.seeded,
        skipped = report.skipped,
        "description cache warmed"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_export_amounts() {
        assert_eq!(parse_amount("$1,234.56"), 1234.56);
        assert_eq!(parse_amount(" 12 "), 12.0);
        assert_eq!(parse_amount("n/a"), 0.0);
    }

    #[test]
    fn strips_gl_code_dots() {
        assert_eq!(clean_gl_code("6100."), "6100");
        assert_eq!(clean_gl_code(" 64.10 "), "6410");
    }
}
