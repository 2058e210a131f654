//! Attachment selection by name.
use crate::msg::Attachment;
use anyhow::{anyhow, Context, Result};
use regex::{Regex, RegexBuilder};
use serde::Serialize;

pub const DEFAULT_ATTACHMENT_PATTERN: &str = "marine";
pub const DEFAULT_ATTACHMENT_EXTENSIONS: &[&str] = &["pdf"];

/// Keeps attachments whose name matches a case-insensitive pattern and ends
/// with one of the accepted extensions.
#[derive(Debug, Clone)]
pub struct AttachmentFilter {
    pattern: Regex,
    extensions: Vec<String>,
}

impl AttachmentFilter {
    pub fn new(pattern: &str, extensions: &[String]) -> Result<Self> {
        if pattern.trim().is_empty() {
            return Err(anyhow!("attachment pattern must be non-empty"));
        }
        let pattern = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("compile attachment pattern {pattern:?}"))?;
        let extensions: Vec<String> = extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        if extensions.is_empty() {
            return Err(anyhow!("at least one attachment extension is required"));
        }
        Ok(Self {
            pattern,
            extensions,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        if !self.pattern.is_match(name) {
            return false;
        }
        let folded = name.to_lowercase();
        self.extensions.iter().any(|ext| {
            folded
                .strip_suffix(ext.as_str())
                .is_some_and(|stem| stem.ends_with('.'))
        })
    }

    pub fn select(&self, attachments: Vec<Attachment>) -> Vec<Attachment> {
        attachments
            .into_iter()
            .filter(|attachment| {
                let keep = self.matches(&attachment.name);
                tracing::debug!(attachment = %attachment.name, keep, "attachment filter");
                keep
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub attachment_count: usize,
    pub attachment_names: Vec<String>,
}

impl IngestSummary {
    pub fn from_attachments(attachments: &[Attachment]) -> Self {
        Self {
            attachment_count: attachments.len(),
            attachment_names: attachments
                .iter()
                .map(|attachment| attachment.name.clone())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_filter() -> AttachmentFilter {
        let extensions: Vec<String> = DEFAULT_ATTACHMENT_EXTENSIONS
            .iter()
            .map(|ext| ext.to_string())
            .collect();
        AttachmentFilter::new(DEFAULT_ATTACHMENT_PATTERN, &extensions).expect("default filter")
    }

    fn attachment(name: &str) -> Attachment {
        Attachment {
            name: name.to_string(),
            data: Vec::new(),
        }
    }

    #[test]
    fn default_filter_requires_keyword_and_pdf_extension() {
        let filter = default_filter();
        assert!(filter.matches("Q2_MARINE_statement.PDF"));
        assert!(filter.matches("submarine report.pdf"));
        assert!(!filter.matches("marine.xlsx"));
        assert!(!filter.matches("fire_q2.pdf"));
        assert!(!filter.matches("marinepdf"));
    }

    #[test]
    fn select_preserves_order() {
        let filter = default_filter();
        let selected = filter.select(vec![
            attachment("b_marine.pdf"),
            attachment("notes.txt"),
            attachment("a_Marine.pdf"),
        ]);
        let summary = IngestSummary::from_attachments(&selected);
        assert_eq!(summary.attachment_count, 2);
        assert_eq!(summary.attachment_names, vec!["b_marine.pdf", "a_Marine.pdf"]);
    }

    #[test]
    fn extensions_are_normalized() {
        let filter =
            AttachmentFilter::new("bordereaux|statement", &[".XLSX".to_string(), "pdf".to_string()])
                .expect("filter");
        assert!(filter.matches("Statement Q3.xlsx"));
        assert!(filter.matches("bordereaux.pdf"));
        assert!(!filter.matches("treaty.pdf"));
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(AttachmentFilter::new("", &["pdf".to_string()]).is_err());
        assert!(AttachmentFilter::new("(", &["pdf".to_string()]).is_err());
        assert!(AttachmentFilter::new("marine", &[" . ".to_string()]).is_err());
    }
}
