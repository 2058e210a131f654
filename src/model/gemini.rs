//! Gemini `generateContent` client.
//!
//! The document goes inline as base64 next to the instruction text; the reply
//! is requested as `application/json`.
use super::{ExtractionModel, ExtractionRequest};
use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use ureq::Agent;

pub struct GeminiModel {
    agent: Agent,
    base_url: String,
    model: String,
    api_key: String,
    timeout_secs: u64,
}

impl GeminiModel {
    pub fn new(base_url: &str, model: &str, api_key: &str, timeout_secs: u64) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(timeout_secs)))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            timeout_secs,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    response_mime_type: &'static str,
    temperature: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

fn build_request<'a>(request: &'a ExtractionRequest<'a>) -> GenerateRequest<'a> {
    GenerateRequest {
        system_instruction: Content {
            role: None,
            parts: vec![Part::Text {
                text: request.system_prompt,
            }],
        },
        contents: vec![Content {
            role: Some("user"),
            parts: vec![
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: request.media_type,
                        data: STANDARD.encode(request.document),
                    },
                },
                Part::Text {
                    text: request.instruction,
                },
            ],
        }],
        generation_config: GenerationConfig {
            response_mime_type: "application/json",
            temperature: 0.0,
        },
    }
}

fn reply_text(response: GenerateResponse) -> Result<String> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason)
            .unwrap_or_else(|| "no candidates returned".to_string());
        return Err(anyhow!("gemini returned no reply: {reason}"));
    };
    let text: String = candidate
        .content
        .map(|content| content.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|part| part.text)
        .collect();
    if text.trim().is_empty() {
        let reason = candidate
            .finish_reason
            .unwrap_or_else(|| "unknown".to_string());
        return Err(anyhow!("gemini reply had no text (finish reason {reason})"));
    }
    Ok(text)
}

impl ExtractionModel for GeminiModel {
    fn label(&self) -> String {
        format!("gemini:{}", self.model)
    }

    fn extract(&self, request: &ExtractionRequest<'_>) -> Result<String> {
        let body = build_request(request);
        let start = Instant::now();
        let mut response = self
            .agent
            .post(&self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .send_json(&body)
            .map_err(|err| match err {
                ureq::Error::Timeout(_) => {
                    anyhow!("gemini request timed out after {}s", self.timeout_secs)
                }
                other => anyhow!("gemini request failed: {other}"),
            })?;
        let elapsed_ms = start.elapsed().as_millis();

        let status = response.status();
        tracing::info!(
            elapsed_ms,
            status = status.as_u16(),
            document = request.document_name,
            document_bytes = request.document.len(),
            "gemini generateContent complete"
        );
        if !status.is_success() {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(anyhow!(
                "gemini returned status {}: {}",
                status.as_u16(),
                body.trim()
            ));
        }

        let parsed: GenerateResponse = response
            .body_mut()
            .read_json()
            .context("decode gemini response")?;
        reply_text(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_trims_trailing_slash() {
        let model = GeminiModel::new("http://localhost:8080/", "gemini-2.0-flash", "k", 30);
        assert_eq!(
            model.endpoint(),
            "http://localhost:8080/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(model.label(), "gemini:gemini-2.0-flash");
    }

    #[test]
    fn request_inlines_document_as_base64() {
        let schema = json!({});
        let request = ExtractionRequest {
            system_prompt: "system",
            instruction: "extract",
            schema: &schema,
            document: b"%PDF",
            media_type: "application/pdf",
            document_name: "marine.pdf",
        };
        let body = serde_json::to_value(build_request(&request)).expect("serialize body");
        assert_eq!(body["system_instruction"]["parts"][0]["text"], "system");
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["inline_data"]["mime_type"], "application/pdf");
        assert_eq!(parts[0]["inline_data"]["data"], "JVBERg==");
        assert_eq!(parts[1]["text"], "extract");
        assert_eq!(
            body["generation_config"]["response_mime_type"],
            "application/json"
        );
    }

    #[test]
    fn reply_text_joins_parts() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [{"text": "{\"a\":"}, {"text": "1}"}]},
                "finishReason": "STOP"
            }]
        }))
        .expect("decode response");
        assert_eq!(reply_text(response).expect("text"), "{\"a\":1}");
    }

    #[test]
    fn blocked_prompt_is_an_error() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .expect("decode response");
        let err = reply_text(response).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn empty_candidate_reports_finish_reason() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{"finishReason": "MAX_TOKENS"}]
        }))
        .expect("decode response");
        let err = reply_text(response).unwrap_err();
        assert!(err.to_string().contains("MAX_TOKENS"));
    }
}
