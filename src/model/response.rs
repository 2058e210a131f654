//! Reply parsing shared by all backends.
//!
//! Models wrap JSON in code fences, prose, or CLI envelopes
//! (`structured_output` / `result`); all of those are unwrapped here before
//! the object is decoded into a [`ClaimExtraction`].
use crate::schema::ClaimExtraction;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;

/// Decode a model reply into extracted fields.
pub fn parse_extraction(text: &str) -> Result<ClaimExtraction> {
    let value = extract_json_value(text)?;
    serde_json::from_value(value).context("decode extraction fields")
}

/// Locate the JSON object carried by a reply.
pub fn extract_json_value(text: &str) -> Result<Value> {
    let cleaned = strip_code_fences(text);
    if cleaned.is_empty() {
        return Err(anyhow!("empty model response"));
    }
    let value = match serde_json::from_str::<Value>(&cleaned) {
        Ok(value) => value,
        Err(err) => match extract_json_from_text(&cleaned) {
            Some(value) => value,
            None => return Err(anyhow!("response JSON failed to parse: {err}")),
        },
    };
    unwrap_envelope(value)
}

fn unwrap_envelope(value: Value) -> Result<Value> {
    if let Some(structured) = value.get("structured_output") {
        return Ok(structured.clone());
    }
    if let Some(result) = value.get("result").and_then(Value::as_str) {
        return extract_json_value(result).context("parse envelope result");
    }
    if value.is_object() {
        return Ok(value);
    }
    Err(anyhow!("expected a JSON object, got {}", json_kind(&value)))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut lines: Vec<&str> = trimmed.lines().collect();
    if lines
        .first()
        .is_some_and(|first| first.trim_start().starts_with("```"))
    {
        lines.remove(0);
    }
    if lines
        .last()
        .is_some_and(|last| last.trim_start().starts_with("```"))
    {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

fn extract_json_from_text(raw: &str) -> Option<Value> {
    for (idx, ch) in raw.char_indices() {
        if ch != '{' {
            continue;
        }
        let slice = &raw[idx..];
        let mut deserializer = serde_json::Deserializer::from_str(slice);
        if let Ok(value) = Value::deserialize(&mut deserializer) {
            return Some(value);
        }
    }
    None
}
