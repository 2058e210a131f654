//! Prompt assembly for attachment extraction.
use crate::config::ReconConfig;
use crate::util::truncate_string;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::fs;

// Prompt templates loaded at compile time
const SYSTEM_PROMPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/extraction_system.md"
));
const INSTRUCTION: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/extraction_instruction.md"
));
const RETRY: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/extraction_retry.md"
));

const RETRY_SNIPPET_BYTES: usize = 1000;

#[derive(Debug, Clone)]
pub struct PromptSet {
    pub system: String,
    pub schema: Value,
}

impl PromptSet {
    pub fn bundled() -> Self {
        Self {
            system: SYSTEM_PROMPT.to_string(),
            schema: response_schema(),
        }
    }

    /// Bundled prompts, with the system prompt replaced when configured.
    pub fn from_config(config: &ReconConfig) -> Result<Self> {
        let mut prompts = Self::bundled();
        if let Some(path) = &config.system_prompt_path {
            prompts.system = fs::read_to_string(path)
                .with_context(|| format!("read system prompt {}", path.display()))?;
        }
        Ok(prompts)
    }

    pub fn schema_text(&self) -> String {
        serde_json::to_string_pretty(&self.schema).unwrap_or_else(|_| self.schema.to_string())
    }

    pub fn instruction(&self, attachment: &str) -> String {
        INSTRUCTION
            .replace("{attachment}", attachment)
            .replace("{schema}", &self.schema_text())
    }

    /// Instruction for a repeat attempt after an unusable reply.
    pub fn retry_instruction(&self, attachment: &str, error: &str, previous: &str) -> String {
        let mut snippet = truncate_string(previous, RETRY_SNIPPET_BYTES);
        if snippet.len() < previous.len() {
            snippet.push_str("...(truncated)");
        }
        let retry = RETRY
            .replace("{error}", error)
            .replace("{previous}", &snippet);
        format!("{retry}\n{}", self.instruction(attachment))
    }
}

/// JSON schema of the reply object.
pub fn response_schema() -> Value {
    json!({
        "type": "object",
        "required": ["insurance_company", "quarter", "total_income", "commission", "premium_tax"],
        "properties": {
            "insurance_company": {"type": "string", "description": "Name of the insurance company"},
            "quarter": {"type": "string", "description": "Quarter for the report, e.g. 'Q2 2024'"},
            "total_income": {"type": "number", "description": "Total income for the period"},
            "commission": {"type": "number", "description": "Commission as a fraction of total income"},
            "premium_tax": {"type": "number", "description": "Premium tax as a fraction of total income"},
            "bordereaux": {
                "type": "array",
                "description": "Bordereaux table rows keyed by column heading",
                "items": {"type": "object"}
            },
            "issues": {
                "type": "array",
                "description": "Discrepancies found during validation",
                "items": {"type": "string"}
            }
        }
    })
}
