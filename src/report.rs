//! Aggregated report over a run: summary rows, exception queue, and
//! per-attachment detail, rendered as plain-text tables or JSON.
use crate::reconcile::BOOKING_READY;
use crate::schema::{ExtractionRecord, ExtractionRun, FindingKind, FindingSource, RecordStatus};
use crate::util::format_amount;
use serde::Serialize;
use serde_json::Value;

pub const NO_ISSUES: &str = "No issues detected in the ingested documents.";
pub const NO_DATA: &str = "No extracted data available.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub attachment: String,
    pub insurance_company: String,
    pub quarter: String,
    pub total_income: f64,
    pub commission: f64,
    pub premium_tax: f64,
    pub claims_paid: f64,
    pub booking_ready: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExceptionRow {
    pub attachment: String,
    pub source: FindingSource,
    pub check: String,
    pub issue: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub summary: Vec<SummaryRow>,
    pub exceptions: Vec<ExceptionRow>,
}

pub fn build_report(run: &ExtractionRun) -> Report {
    Report {
        source: run.source.clone(),
        subject: run.subject.clone(),
        summary: run.records.iter().map(summary_row).collect(),
        exceptions: exception_queue(&run.records),
    }
}

fn summary_row(record: &ExtractionRecord) -> SummaryRow {
    let extraction = &record.extraction;
    SummaryRow {
        attachment: record.attachment.clone(),
        insurance_company: extraction.insurance_company.clone(),
        quarter: extraction.quarter.clone(),
        total_income: extraction.total_income,
        commission: extraction.commission,
        premium_tax: extraction.premium_tax,
        claims_paid: record.claims_paid,
        booking_ready: record.booking_ready(),
    }
}

/// Every flag across all records, in record order.
pub fn exception_queue(records: &[ExtractionRecord]) -> Vec<ExceptionRow> {
    records
        .iter()
        .flat_map(|record| {
            record.flags().map(move |finding| ExceptionRow {
                attachment: record.attachment.clone(),
                source: finding.source,
                check: finding.check.clone(),
                issue: finding.message.clone(),
                suggested_action: finding.suggested_action.clone(),
            })
        })
        .collect()
}

/// Align rows under headers with two-space column gaps.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|header| header.chars().count()).collect();
    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(idx) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let mut out = String::new();
    let header_cells: Vec<String> = headers.iter().map(|header| header.to_string()).collect();
    push_row(&mut out, &header_cells, &widths);
    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    push_row(&mut out, &rule, &widths);
    for row in rows {
        push_row(&mut out, row, &widths);
    }
    out
}

fn push_row(out: &mut String, cells: &[String], widths: &[usize]) {
    let mut line = String::new();
    for (idx, width) in widths.iter().enumerate() {
        let cell = cells.get(idx).map(String::as_str).unwrap_or("");
        if idx > 0 {
            line.push_str("  ");
        }
        line.push_str(cell);
        let pad = width.saturating_sub(cell.chars().count());
        line.push_str(&" ".repeat(pad));
    }
    out.push_str(line.trim_end());
    out.push('\n');
}

pub fn render_summary_text(report: &Report) -> String {
    let mut out = String::from("Summary Data\n");
    if report.summary.is_empty() {
        out.push_str(NO_DATA);
        out.push('\n');
        return out;
    }
    let rows: Vec<Vec<String>> = report
        .summary
        .iter()
        .map(|row| {
            vec![
                row.attachment.clone(),
                row.insurance_company.clone(),
                row.quarter.clone(),
                format_amount(row.total_income),
                format_rate(row.commission),
                format_rate(row.premium_tax),
                format_amount(row.claims_paid),
                if row.booking_ready { BOOKING_READY } else { "Flagged" }.to_string(),
            ]
        })
        .collect();
    out.push_str(&render_table(
        &[
            "Attachment",
            "Insurance Company",
            "Quarter",
            "Total Income",
            "Commission",
            "Premium Tax",
            "Claims Paid",
            "Status",
        ],
        &rows,
    ));
    out
}

pub fn render_exceptions_text(exceptions: &[ExceptionRow]) -> String {
    if exceptions.is_empty() {
        return format!("{NO_ISSUES}\n");
    }
    let rows: Vec<Vec<String>> = exceptions
        .iter()
        .map(|row| {
            vec![
                row.attachment.clone(),
                row.check.clone(),
                row.issue.clone(),
                row.suggested_action.clone().unwrap_or_default(),
            ]
        })
        .collect();
    let mut out = String::from("Exception Queue\n");
    out.push_str(&render_table(
        &["Attachment", "Check", "Issue", "Suggested Action"],
        &rows,
    ));
    out
}

pub fn render_report_text(report: &Report) -> String {
    let mut out = String::new();
    out.push_str(&format!("Source: {}\n", report.source));
    if let Some(subject) = &report.subject {
        out.push_str(&format!("Subject: {subject}\n"));
    }
    out.push('\n');
    out.push_str(&render_summary_text(report));
    out.push('\n');
    out.push_str(&render_exceptions_text(&report.exceptions));
    out
}

/// Detail block for one attachment.
pub fn render_record_text(index: usize, record: &ExtractionRecord) -> String {
    let extraction = &record.extraction;
    let mut out = format!("Attachment {}: {}\n", index + 1, record.attachment);
    if record.status == RecordStatus::Failed {
        out.push_str("Status: extraction failed\n");
    }
    out.push_str(&format!("Insurance Company: {}\n", extraction.insurance_company));
    out.push_str(&format!("Quarter: {}\n", extraction.quarter));
    out.push_str(&format!("Total Income: {}\n", format_amount(extraction.total_income)));
    out.push_str(&format!("Commission: {}\n", format_rate(extraction.commission)));
    out.push_str(&format!("Premium Tax: {}\n", format_rate(extraction.premium_tax)));
    out.push_str(&format!("Claims Paid: {}\n", format_amount(record.claims_paid)));

    out.push_str("Bordereaux Table:\n");
    if extraction.bordereaux.is_empty() {
        out.push_str("No bordereaux table found.\n");
    } else {
        let columns = bordereaux_columns(record);
        let headers: Vec<&str> = columns.iter().map(String::as_str).collect();
        let rows: Vec<Vec<String>> = extraction
            .bordereaux
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|column| row.get(column).map(cell_text).unwrap_or_default())
                    .collect()
            })
            .collect();
        out.push_str(&render_table(&headers, &rows));
    }

    out.push_str("Issues:\n");
    let mut any = false;
    for finding in &record.findings {
        let marker = match finding.kind {
            FindingKind::Flag => {
                any = true;
                "!"
            }
            FindingKind::Notice => "-",
        };
        out.push_str(&format!("  {marker} {}\n", finding.message));
    }
    if !any {
        out.push_str("No issues found.\n");
    }
    out
}

/// Union of row keys in first-seen order.
fn bordereaux_columns(record: &ExtractionRecord) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in &record.extraction.bordereaux {
        for key in row.keys() {
            if !columns.iter().any(|column| column == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn format_rate(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}
