//! Model invocation logging.
//!
//! When `lm_log_path` is configured, every model call appends one JSON line:
//!
//! ```jsonl
//! {"schema_version":1,"ts":1707900000000,"attachment":"Marine_Q2.pdf","backend":"gemini:gemini-2.0-flash","attempt":1,"duration_ms":4200,"outcome":"success",...}
//! ```
use crate::util::{now_epoch_ms, truncate_string};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Current schema version for log entries.
pub const LM_LOG_SCHEMA_VERSION: u32 = 1;

const PREVIEW_BYTES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LmOutcome {
    /// Reply decoded into a record.
    Success,
    /// Model answered but the reply could not be used.
    Unparseable,
    /// Transport or command failure.
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmLogEntry {
    pub schema_version: u32,

    /// Unix timestamp in milliseconds when the call finished.
    pub ts: u64,

    pub attachment: String,

    pub backend: String,

    /// 1-based attempt number for this attachment.
    pub attempt: u32,

    pub duration_ms: u64,

    pub outcome: LmOutcome,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_preview: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_preview: Option<String>,
}

/// Times one call and produces its entry.
pub struct LmLogBuilder {
    start: Instant,
    attachment: String,
    backend: String,
    attempt: u32,
    prompt_preview: Option<String>,
    response_preview: Option<String>,
}

impl LmLogBuilder {
    pub fn start(attachment: &str, backend: &str, attempt: u32) -> Self {
        Self {
            start: Instant::now(),
            attachment: attachment.to_string(),
            backend: backend.to_string(),
            attempt,
            prompt_preview: None,
            response_preview: None,
        }
    }

    pub fn with_prompt(mut self, prompt: &str) -> Self {
        self.prompt_preview = Some(preview(prompt));
        self
    }

    pub fn with_response(mut self, response: &str) -> Self {
        self.response_preview = Some(preview(response));
        self
    }

    pub fn success(self) -> LmLogEntry {
        self.build(LmOutcome::Success, None)
    }

    pub fn unparseable(self, error: impl Into<String>) -> LmLogEntry {
        self.build(LmOutcome::Unparseable, Some(error.into()))
    }

    pub fn failed(self, error: impl Into<String>) -> LmLogEntry {
        self.build(LmOutcome::Failed, Some(error.into()))
    }

    fn build(self, outcome: LmOutcome, error: Option<String>) -> LmLogEntry {
        LmLogEntry {
            schema_version: LM_LOG_SCHEMA_VERSION,
            ts: now_epoch_ms(),
            attachment: self.attachment,
            backend: self.backend,
            attempt: self.attempt,
            duration_ms: self.start.elapsed().as_millis() as u64,
            outcome,
            error,
            prompt_preview: self.prompt_preview,
            response_preview: self.response_preview,
        }
    }
}

fn preview(text: &str) -> String {
    let truncated = truncate_string(text, PREVIEW_BYTES);
    if truncated.len() < text.len() {
        format!("{truncated}...")
    } else {
        truncated
    }
}

/// Append-only JSONL sink.
#[derive(Debug, Clone)]
pub struct LmLog {
    path: PathBuf,
}

impl LmLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &LmLogEntry) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open lm log for append: {}", self.path.display()))?;
        let line = serde_json::to_string(entry).context("serialize lm log entry")?;
        writeln!(file, "{line}").context("write lm log entry")?;
        Ok(())
    }

    #[cfg(test)]
    pub fn load(&self) -> Result<Vec<LmLogEntry>> {
        use std::fs::File;
        use std::io::{BufRead, BufReader};

        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)
            .with_context(|| format!("open lm log: {}", self.path.display()))?;
        let mut entries = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("read line {} of lm log", line_num + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LmLogEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(err) => tracing::warn!(line = line_num + 1, %err, "skip corrupt lm log entry"),
            }
        }
        Ok(entries)
    }
}
