//! Run configuration.
//!
//! Settings come from an optional JSON file, then `CRECON_*` environment
//! variables, then CLI flags. Secrets are never stored in the file.
use crate::attachments::{
    AttachmentFilter, DEFAULT_ATTACHMENT_EXTENSIONS, DEFAULT_ATTACHMENT_PATTERN,
};
use anyhow::{anyhow, Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_PARSE_RETRIES: usize = 1;

pub const ENV_BACKEND: &str = "CRECON_BACKEND";
pub const ENV_MODEL: &str = "CRECON_MODEL";
pub const ENV_LM_COMMAND: &str = "CRECON_LM_COMMAND";

const CONFIG_DIR_NAME: &str = "claims-recon";
const CONFIG_FILE_NAME: &str = "config.json";

/// Which model backend handles extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Hosted Gemini `generateContent` API
    #[default]
    Gemini,
    /// Local command reading the prompt on stdin
    Command,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::Command => write!(f, "command"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "command" => Ok(Self::Command),
            other => Err(anyhow!("unknown backend {other:?} (expected gemini or command)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconConfig {
    pub schema_version: u32,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub gemini_base_url: String,
    /// Local LM command, parsed with shell quoting rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lm_command: Option<String>,
    #[serde(default = "default_pattern")]
    pub attachment_pattern: String,
    #[serde(default = "default_extensions")]
    pub attachment_extensions: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_parse_retries")]
    pub max_parse_retries: usize,
    /// Replaces the bundled system prompt when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_path: Option<PathBuf>,
    /// JSONL file receiving one entry per model call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lm_log_path: Option<PathBuf>,
}

impl Default for ReconConfig {
    fn default() -> Self {
        default_config()
    }
}

/// CLI-level overrides, applied last.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub backend: Option<BackendKind>,
    pub model: Option<String>,
    pub lm_command: Option<String>,
    pub attachment_pattern: Option<String>,
}

fn default_model() -> String {
    DEFAULT_GEMINI_MODEL.to_string()
}

fn default_base_url() -> String {
    DEFAULT_GEMINI_BASE_URL.to_string()
}

fn default_pattern() -> String {
    DEFAULT_ATTACHMENT_PATTERN.to_string()
}

fn default_extensions() -> Vec<String> {
    DEFAULT_ATTACHMENT_EXTENSIONS
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_parse_retries() -> usize {
    DEFAULT_MAX_PARSE_RETRIES
}

pub fn default_config() -> ReconConfig {
    ReconConfig {
        schema_version: CONFIG_SCHEMA_VERSION,
        backend: BackendKind::default(),
        model: default_model(),
        gemini_base_url: default_base_url(),
        lm_command: None,
        attachment_pattern: default_pattern(),
        attachment_extensions: default_extensions(),
        timeout_secs: DEFAULT_TIMEOUT_SECS,
        max_parse_retries: DEFAULT_MAX_PARSE_RETRIES,
        system_prompt_path: None,
        lm_log_path: None,
    }
}

/// `--config` if given, else `<config dir>/claims-recon/config.json`.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let base = dirs::config_dir().ok_or_else(|| anyhow!("cannot determine config directory"))?;
    Ok(base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Load a config file; a missing file yields defaults.
pub fn load_config(path: &Path) -> Result<ReconConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config not found, using defaults");
        return Ok(default_config());
    }
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: ReconConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    Ok(config)
}

pub fn write_config(path: &Path, config: &ReconConfig) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(config).context("serialize config")?;
    fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Apply `CRECON_*` variables through `lookup` (usually `std::env::var`).
pub fn apply_env<F>(config: &mut ReconConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(ENV_BACKEND).filter(|raw| !raw.trim().is_empty()) {
        config.backend = raw.parse().with_context(|| format!("parse {ENV_BACKEND}"))?;
    }
    if let Some(model) = lookup(ENV_MODEL).filter(|raw| !raw.trim().is_empty()) {
        config.model = model.trim().to_string();
    }
    if let Some(command) = lookup(ENV_LM_COMMAND).filter(|raw| !raw.trim().is_empty()) {
        config.lm_command = Some(command);
    }
    Ok(())
}

pub fn apply_overrides(config: &mut ReconConfig, overrides: &ConfigOverrides) {
    if let Some(backend) = overrides.backend {
        config.backend = backend;
    }
    if let Some(model) = &overrides.model {
        config.model = model.clone();
    }
    if let Some(command) = &overrides.lm_command {
        config.lm_command = Some(command.clone());
        // An explicit command implies the command backend unless one was named.
        if overrides.backend.is_none() {
            config.backend = BackendKind::Command;
        }
    }
    if let Some(pattern) = &overrides.attachment_pattern {
        config.attachment_pattern = pattern.clone();
    }
}

/// Checks shared by every command that reads a message.
pub fn validate_source_config(config: &ReconConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {} (expected {CONFIG_SCHEMA_VERSION})",
            config.schema_version
        ));
    }
    attachment_filter(config)?;
    Ok(())
}

pub fn validate_config(config: &ReconConfig) -> Result<()> {
    validate_source_config(config)?;
    if config.timeout_secs == 0 {
        return Err(anyhow!("timeout_secs must be greater than zero"));
    }
    match config.backend {
        BackendKind::Gemini => {
            if config.model.trim().is_empty() {
                return Err(anyhow!("model must be non-empty for the gemini backend"));
            }
        }
        BackendKind::Command => {
            let has_command = config
                .lm_command
                .as_deref()
                .is_some_and(|command| !command.trim().is_empty());
            if !has_command {
                return Err(anyhow!(
                    "the command backend needs lm_command (config, {ENV_LM_COMMAND}, or --lm)"
                ));
            }
        }
    }
    Ok(())
}

pub fn attachment_filter(config: &ReconConfig) -> Result<AttachmentFilter> {
    AttachmentFilter::new(&config.attachment_pattern, &config.attachment_extensions)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
