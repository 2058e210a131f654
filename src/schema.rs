//! Schema types for extracted claim records and saved runs.

use crate::util::parse_amount;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Schema version for saved run files.
pub const RUN_SCHEMA_VERSION: u32 = 1;

/// One bordereaux table row as returned by the model (column -> cell).
pub type BordereauxRow = Map<String, Value>;

/// Fields the model extracts from a single statement attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimExtraction {
    pub insurance_company: String,
    pub quarter: String,
    #[serde(deserialize_with = "lenient_amount")]
    pub total_income: f64,
    #[serde(alias = "commision", deserialize_with = "lenient_amount")]
    pub commission: f64,
    #[serde(deserialize_with = "lenient_amount")]
    pub premium_tax: f64,
    #[serde(default, alias = "borderaux", deserialize_with = "null_as_empty")]
    pub bordereaux: Vec<BordereauxRow>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub issues: Vec<String>,
}

impl ClaimExtraction {
    /// Placeholder record for an attachment the model could not process.
    pub fn failed(issue: String) -> Self {
        Self {
            insurance_company: String::new(),
            quarter: String::new(),
            total_income: 0.0,
            commission: 0.0,
            premium_tax: 0.0,
            bordereaux: Vec::new(),
            issues: vec![issue],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Extracted,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSource {
    /// Reported by the model in its `issues` list.
    Model,
    /// Computed locally from the extracted fields.
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Flag,
    Notice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub source: FindingSource,
    pub kind: FindingKind,
    pub check: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub attachment: String,
    pub status: RecordStatus,
    pub extraction: ClaimExtraction,
    pub claims_paid: f64,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl ExtractionRecord {
    pub fn flags(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|finding| finding.kind == FindingKind::Flag)
    }

    pub fn booking_ready(&self) -> bool {
        self.status == RecordStatus::Extracted && self.flags().next().is_none()
    }
}

/// Saved result of one extraction run over a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRun {
    pub schema_version: u32,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Label of the model backend that produced the records.
    pub model: String,
    pub generated_at_epoch_ms: u64,
    pub records: Vec<ExtractionRecord>,
}

fn lenient_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0.0),
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| de::Error::custom("amount out of range")),
        Value::String(raw) => {
            parse_amount(&raw).ok_or_else(|| de::Error::custom(format!("invalid amount {raw:?}")))
        }
        other => Err(de::Error::custom(format!("expected an amount, got {other}"))),
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
