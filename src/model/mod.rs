//! Extraction model backends.
//!
//! Every backend receives the same request (system prompt, instruction,
//! schema, and the raw document) and returns the model's reply text. Parsing
//! the reply into a record is shared in [`response`].
pub mod command;
pub mod gemini;
pub mod response;

use crate::config::{BackendKind, ReconConfig};
use anyhow::{anyhow, Result};
use serde_json::Value;

pub use command::CommandModel;
pub use gemini::GeminiModel;

pub const PDF_MEDIA_TYPE: &str = "application/pdf";
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

pub struct ExtractionRequest<'a> {
    pub system_prompt: &'a str,
    pub instruction: &'a str,
    pub schema: &'a Value,
    pub document: &'a [u8],
    pub media_type: &'a str,
    pub document_name: &'a str,
}

pub trait ExtractionModel {
    /// Short label recorded in run files and logs.
    fn label(&self) -> String;

    fn extract(&self, request: &ExtractionRequest<'_>) -> Result<String>;
}

/// Build the configured backend. `lookup` resolves secrets from the environment.
pub fn build_model<F>(config: &ReconConfig, lookup: F) -> Result<Box<dyn ExtractionModel>>
where
    F: Fn(&str) -> Option<String>,
{
    match config.backend {
        BackendKind::Gemini => {
            let api_key = lookup(GEMINI_API_KEY_ENV)
                .filter(|key| !key.trim().is_empty())
                .ok_or_else(|| {
                    anyhow!("{GEMINI_API_KEY_ENV} is not set (export it or add it to .env)")
                })?;
            Ok(Box::new(GeminiModel::new(
                &config.gemini_base_url,
                &config.model,
                api_key.trim(),
                config.timeout_secs,
            )))
        }
        BackendKind::Command => {
            let command = config
                .lm_command
                .as_deref()
                .ok_or_else(|| anyhow!("the command backend needs lm_command"))?;
            Ok(Box::new(CommandModel::new(command)?))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;

    #[test]
    fn gemini_backend_requires_api_key() {
        let config = default_config();
        let err = build_model(&config, |_| None).err().expect("missing key error");
        assert!(err.to_string().contains(GEMINI_API_KEY_ENV));

        let model = build_model(&config, |_| Some("key".to_string())).expect("build gemini");
        assert_eq!(model.label(), "gemini:gemini-2.0-flash");
    }

    #[test]
    fn command_backend_uses_configured_command() {
        let mut config = default_config();
        config.backend = BackendKind::Command;
        config.lm_command = Some("llm --json".to_string());
        let model = build_model(&config, |_| None).expect("build command");
        assert_eq!(model.label(), "command:llm");
    }
}
