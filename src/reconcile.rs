//! Local reconciliation checks over an extracted record.
//!
//! Only rules that can be decided from the extracted fields run here; the
//! cross-document rules stay with the model and arrive through `issues`.
use crate::schema::{BordereauxRow, ClaimExtraction, Finding, FindingKind, FindingSource};
use crate::util::{format_amount, parse_amount};
use serde_json::Value;
use std::collections::BTreeMap;

/// Absolute tolerance when comparing monetary totals.
pub const AMOUNT_TOLERANCE: f64 = 0.01;

pub const CHECK_MODEL: &str = "model";
pub const CHECK_EXTRACTION_FAILED: &str = "extraction_failed";
pub const CHECK_IDENTITY: &str = "missing_identity";
pub const CHECK_PERCENTAGE_RANGE: &str = "percentage_range";
pub const CHECK_PREMIUM_TOTAL: &str = "premium_total";
pub const CHECK_DOUBLE_RECOVERY: &str = "double_recovery";
pub const CHECK_BOOKING_READY: &str = "booking_ready";

pub const BOOKING_READY: &str = "Booking Ready";

/// Claims Paid = (Commission% x Total Income) + (Premium Tax x Total Income).
pub fn calculate_claims_paid(commission: f64, total_income: f64, premium_tax: f64) -> f64 {
    (commission * total_income) + (premium_tax * total_income)
}

pub fn reconcile(extraction: &ClaimExtraction) -> Vec<Finding> {
    let mut findings: Vec<Finding> = extraction
        .issues
        .iter()
        .map(|issue| model_finding(issue.as_str()))
        .collect();
    check_identity(extraction, &mut findings);
    check_percentages(extraction, &mut findings);
    check_premium_total(extraction, &mut findings);
    check_double_recovery(&extraction.bordereaux, &mut findings);

    if !findings.iter().any(|finding| finding.kind == FindingKind::Flag) {
        findings.push(notice(CHECK_BOOKING_READY, BOOKING_READY.to_string()));
    }
    findings
}

/// Findings for an attachment whose extraction failed outright.
pub fn failure_findings(extraction: &ClaimExtraction) -> Vec<Finding> {
    extraction
        .issues
        .iter()
        .map(|issue| Finding {
            source: FindingSource::Local,
            kind: FindingKind::Flag,
            check: CHECK_EXTRACTION_FAILED.to_string(),
            message: issue.clone(),
            suggested_action: Some(
                "Re-run extraction or review the attachment manually".to_string(),
            ),
        })
        .collect()
}

fn model_finding(issue: &str) -> Finding {
    // Models sometimes echo the pass message into `issues`.
    let kind = if is_booking_ready_echo(issue) {
        FindingKind::Notice
    } else {
        FindingKind::Flag
    };
    Finding {
        source: FindingSource::Model,
        kind,
        check: CHECK_MODEL.to_string(),
        message: issue.trim().to_string(),
        suggested_action: None,
    }
}

fn is_booking_ready_echo(issue: &str) -> bool {
    let folded = issue
        .trim()
        .trim_end_matches(|ch: char| ch.is_ascii_punctuation())
        .trim()
        .to_lowercase();
    folded == BOOKING_READY.to_lowercase()
}

fn flag(check: &str, message: String, action: &str) -> Finding {
    Finding {
        source: FindingSource::Local,
        kind: FindingKind::Flag,
        check: check.to_string(),
        message,
        suggested_action: Some(action.to_string()),
    }
}

fn notice(check: &str, message: String) -> Finding {
    Finding {
        source: FindingSource::Local,
        kind: FindingKind::Notice,
        check: check.to_string(),
        message,
        suggested_action: None,
    }
}

fn check_identity(extraction: &ClaimExtraction, findings: &mut Vec<Finding>) {
    let mut missing = Vec::new();
    if extraction.insurance_company.trim().is_empty() {
        missing.push("insurance company");
    }
    if extraction.quarter.trim().is_empty() {
        missing.push("quarter");
    }
    if !missing.is_empty() {
        findings.push(flag(
            CHECK_IDENTITY,
            format!("Statement is missing {}", missing.join(" and ")),
            "Confirm the cedant and period from the Account Statement header",
        ));
    }
}

fn check_percentages(extraction: &ClaimExtraction, findings: &mut Vec<Finding>) {
    for (label, value) in [
        ("Commission", extraction.commission),
        ("Premium tax", extraction.premium_tax),
    ] {
        if !(0.0..=1.0).contains(&value) {
            findings.push(flag(
                CHECK_PERCENTAGE_RANGE,
                format!("{label} {value} is outside 0-1; expected a fraction of total income"),
                "Check whether the statement printed an amount instead of a rate",
            ));
        }
    }
}

fn is_premium_column(column: &str) -> bool {
    let folded = column.to_lowercase();
    folded.contains("premium") && !folded.contains("tax")
}

fn cell_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => parse_amount(raw),
        _ => None,
    }
}

/// Sum of all premium columns, or `None` when the table has none.
pub fn bordereaux_premium_total(rows: &[BordereauxRow]) -> Option<f64> {
    let mut seen_column = false;
    let mut total = 0.0;
    for row in rows {
        for (column, value) in row {
            if !is_premium_column(column) {
                continue;
            }
            seen_column = true;
            total += cell_amount(value).unwrap_or(0.0);
        }
    }
    seen_column.then_some(total)
}

fn check_premium_total(extraction: &ClaimExtraction, findings: &mut Vec<Finding>) {
    let Some(total) = bordereaux_premium_total(&extraction.bordereaux) else {
        return;
    };
    if (total - extraction.total_income).abs() > AMOUNT_TOLERANCE {
        findings.push(flag(
            CHECK_PREMIUM_TOTAL,
            format!(
                "Bordereaux premium total {} does not match Account Statement total income {}",
                format_amount(total),
                format_amount(extraction.total_income)
            ),
            "Reconcile the bordereaux against the Account Statement before booking",
        ));
    } else {
        findings.push(notice(
            CHECK_PREMIUM_TOTAL,
            format!("{BOOKING_READY}: bordereaux premium total matches total income"),
        ));
    }
}

fn check_double_recovery(rows: &[BordereauxRow], findings: &mut Vec<Finding>) {
    let mut first_seen: BTreeMap<String, usize> = BTreeMap::new();
    for (index, row) in rows.iter().enumerate() {
        if row.values().all(|value| matches!(value, Value::Null)) {
            continue;
        }
        let key = row_identity(row);
        match first_seen.get(&key) {
            Some(first) => findings.push(flag(
                CHECK_DOUBLE_RECOVERY,
                format!(
                    "Bordereaux row {} repeats row {} (double recovery)",
                    index + 1,
                    first + 1
                ),
                "Remove the duplicate claim before booking",
            )),
            None => {
                first_seen.insert(key, index);
            }
        }
    }
}

/// Column order is not part of a row's identity.
fn row_identity(row: &BordereauxRow) -> String {
    let sorted: BTreeMap<&str, &Value> = row
        .iter()
        .map(|(column, value)| (column.as_str(), value))
        .collect();
    sorted
        .iter()
        .map(|(column, value)| format!("{column:?}:{value}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> BordereauxRow {
        match value {
            Value::Object(map) => map,
            _ => panic!("row fixture must be an object"),
        }
    }

    fn extraction(bordereaux: Vec<BordereauxRow>, issues: Vec<&str>) -> ClaimExtraction {
        ClaimExtraction {
            insurance_company: "Acme Re".to_string(),
            quarter: "Q2 2024".to_string(),
            total_income: 1500.0,
            commission: 0.1,
            premium_tax: 0.02,
            bordereaux,
            issues: issues.into_iter().map(str::to_string).collect(),
        }
    }

    fn checks(findings: &[Finding], kind: FindingKind) -> Vec<&str> {
        findings
            .iter()
            .filter(|finding| finding.kind == kind)
            .map(|finding| finding.check.as_str())
            .collect()
    }

    #[test]
    fn claims_paid_formula() {
        let paid = calculate_claims_paid(0.1, 1000.0, 0.02);
        assert!((paid - 120.0).abs() < 1e-9);
        assert_eq!(calculate_claims_paid(0.1, 0.0, 0.02), 0.0);
    }

    #[test]
    fn clean_record_is_booking_ready() {
        let rows = vec![
            row(json!({"Insured": "MV Horizon", "Premium": 1000.0})),
            row(json!({"Insured": "MV Coral", "Gross Premium": "500.00", "Premium Tax": 10})),
        ];
        let findings = reconcile(&extraction(rows, Vec::new()));
        assert!(checks(&findings, FindingKind::Flag).is_empty());
        assert_eq!(
            checks(&findings, FindingKind::Notice),
            vec![CHECK_PREMIUM_TOTAL, CHECK_BOOKING_READY]
        );
    }

    #[test]
    fn premium_total_mismatch_is_flagged() {
        let rows = vec![row(json!({"Premium": "1,400.00"}))];
        let findings = reconcile(&extraction(rows, Vec::new()));
        assert_eq!(checks(&findings, FindingKind::Flag), vec![CHECK_PREMIUM_TOTAL]);
        assert!(findings[0].message.contains("1400.00"));
        assert!(findings[0].message.contains("1500.00"));
    }

    #[test]
    fn table_without_premium_column_skips_total_check() {
        let rows = vec![row(json!({"Insured": "MV Horizon", "Fac Out": 20}))];
        assert_eq!(bordereaux_premium_total(&rows), None);
        let findings = reconcile(&extraction(rows, Vec::new()));
        assert_eq!(checks(&findings, FindingKind::Notice), vec![CHECK_BOOKING_READY]);
    }

    #[test]
    fn duplicate_rows_are_double_recovery() {
        let claim = json!({"Insured": "MV Horizon", "Date of Loss": "2024-04-02", "Premium": 750});
        let rows = vec![row(claim.clone()), row(claim), row(json!({"Insured": null}))];
        let findings = reconcile(&extraction(rows, Vec::new()));
        let flags = checks(&findings, FindingKind::Flag);
        assert_eq!(flags, vec![CHECK_DOUBLE_RECOVERY]);
        let message = &findings
            .iter()
            .find(|finding| finding.check == CHECK_DOUBLE_RECOVERY)
            .expect("double recovery finding")
            .message;
        assert_eq!(message, "Bordereaux row 2 repeats row 1 (double recovery)");
    }

    #[test]
    fn model_issues_are_carried_through() {
        let findings = reconcile(&extraction(
            Vec::new(),
            vec!["Commission 12% differs from treaty slip 10%", "Booking Ready"],
        ));
        let model: Vec<(&FindingKind, &str)> = findings
            .iter()
            .filter(|finding| finding.source == FindingSource::Model)
            .map(|finding| (&finding.kind, finding.message.as_str()))
            .collect();
        assert_eq!(
            model,
            vec![
                (&FindingKind::Flag, "Commission 12% differs from treaty slip 10%"),
                (&FindingKind::Notice, "Booking Ready"),
            ]
        );
        assert!(!findings.iter().any(|finding| finding.check == CHECK_BOOKING_READY));
    }

    #[test]
    fn negated_booking_ready_issue_stays_a_flag() {
        let findings = reconcile(&extraction(
            Vec::new(),
            vec![
                "Not Booking Ready: commission 12% on statement vs 10% on treaty slip",
                "  booking ready. ",
            ],
        ));
        let model: Vec<&FindingKind> = findings
            .iter()
            .filter(|finding| finding.source == FindingSource::Model)
            .map(|finding| &finding.kind)
            .collect();
        assert_eq!(model, vec![&FindingKind::Flag, &FindingKind::Notice]);
        assert!(!findings.iter().any(|finding| finding.check == CHECK_BOOKING_READY));
    }

    #[test]
    fn reordered_duplicate_rows_are_double_recovery() {
        let rows = vec![
            row(json!({"Insured": "MV Horizon", "Premium": 750})),
            row(json!({"Premium": 750, "Insured": "MV Horizon"})),
        ];
        let findings = reconcile(&extraction(rows, Vec::new()));
        assert!(checks(&findings, FindingKind::Flag).contains(&CHECK_DOUBLE_RECOVERY));
    }

    #[test]
    fn identity_and_range_problems_are_flagged() {
        let mut record = extraction(Vec::new(), Vec::new());
        record.quarter = " ".to_string();
        record.commission = 12.5;
        let findings = reconcile(&record);
        assert_eq!(
            checks(&findings, FindingKind::Flag),
            vec![CHECK_IDENTITY, CHECK_PERCENTAGE_RANGE]
        );
        assert_eq!(findings[0].message, "Statement is missing quarter");
    }

    #[test]
    fn failed_extraction_findings_flag_each_issue() {
        let failed =
            ClaimExtraction::failed("Error processing attachment a.pdf: timeout".to_string());
        let findings = failure_findings(&failed);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].check, CHECK_EXTRACTION_FAILED);
        assert_eq!(findings[0].kind, FindingKind::Flag);
    }
}
