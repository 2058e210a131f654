use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value).context("serialize JSON")?;
    fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value =
        serde_json::from_str(&content).with_context(|| format!("parse {}", path.display()))?;
    Ok(value)
}

pub fn truncate_string(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut truncated = String::new();
    for ch in text.chars() {
        if truncated.len() + ch.len_utf8() > max_bytes {
            break;
        }
        truncated.push(ch);
    }
    truncated
}

pub fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Parse a monetary or percentage figure as printed in statements.
///
/// Accepts thousands separators, currency prefixes, accounting negatives
/// (`(1,200.00)`) and a trailing `%`, which is converted to a fraction.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (negative, body) = match trimmed
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
    {
        Some(inner) => (true, inner.trim()),
        None => (false, trimmed),
    };
    let (percent, body) = match body.strip_suffix('%') {
        Some(inner) => (true, inner.trim()),
        None => (false, body),
    };
    let cleaned: String = body
        .chars()
        .filter(|ch| ch.is_ascii_digit() || matches!(ch, '.' | '-'))
        .collect();
    if !cleaned.chars().any(|ch| ch.is_ascii_digit()) {
        return None;
    }
    let mut value: f64 = cleaned.parse().ok()?;
    if percent {
        value /= 100.0;
    }
    if negative {
        value = -value;
    }
    Some(value)
}

pub fn format_amount(value: f64) -> String {
    format!("{value:.2}")
}
