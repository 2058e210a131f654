//! Local LM command backend.
//!
//! The command is any tool that reads a prompt on stdin and prints a reply on
//! stdout (`llm`, a wrapper script, a CLI agent). The document is written to a
//! temporary file so the command can attach it.
//!
//! Argument placeholders:
//!
//! - `{pdf}`: path of the temporary document file
//! - `{name}`: attachment name
//! - `{schema}`: JSON schema of the expected reply
//!
//! The document path and name are also exported as `CRECON_DOCUMENT` and
//! `CRECON_ATTACHMENT`.
use super::{ExtractionModel, ExtractionRequest};
use anyhow::{anyhow, Context, Result};
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Instant;

pub const DOCUMENT_ENV: &str = "CRECON_DOCUMENT";
pub const ATTACHMENT_ENV: &str = "CRECON_ATTACHMENT";

#[derive(Debug, Clone)]
pub struct CommandModel {
    argv: Vec<String>,
}

impl CommandModel {
    pub fn new(command: &str) -> Result<Self> {
        let argv =
            shell_words::split(command).with_context(|| format!("parse LM command: {command}"))?;
        if argv.is_empty() {
            return Err(anyhow!("LM command is empty"));
        }
        Ok(Self { argv })
    }

    fn render_argv(&self, document_path: &str, request: &ExtractionRequest<'_>) -> Vec<String> {
        let schema = request.schema.to_string();
        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{pdf}", document_path)
                    .replace("{name}", request.document_name)
                    .replace("{schema}", &schema)
            })
            .collect()
    }
}

/// System prompt and instruction, concatenated for stdin.
fn render_stdin(request: &ExtractionRequest<'_>) -> String {
    format!(
        "{}\n\n---\n\n{}",
        request.system_prompt.trim_end(),
        request.instruction
    )
}

fn document_suffix(media_type: &str) -> &'static str {
    match media_type {
        "application/pdf" => ".pdf",
        _ => ".bin",
    }
}

impl ExtractionModel for CommandModel {
    fn label(&self) -> String {
        format!("command:{}", self.argv[0])
    }

    fn extract(&self, request: &ExtractionRequest<'_>) -> Result<String> {
        let mut document = tempfile::Builder::new()
            .prefix("crecon-")
            .suffix(document_suffix(request.media_type))
            .tempfile()
            .context("create temporary document file")?;
        document
            .write_all(request.document)
            .context("write temporary document file")?;
        document.flush().context("flush temporary document file")?;
        let document_path = document.path().display().to_string();

        let args = self.render_argv(&document_path, request);
        let prompt = render_stdin(request);

        let start = Instant::now();
        let mut child = Command::new(&args[0])
            .args(&args[1..])
            .env(DOCUMENT_ENV, &document_path)
            .env(ATTACHMENT_ENV, request.document_name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn LM command: {}", args[0]))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .context("write prompt to LM stdin")?;
        }

        let output = child.wait_with_output().context("wait for LM command")?;
        let elapsed_ms = start.elapsed().as_millis();

        tracing::info!(
            elapsed_ms,
            prompt_bytes = prompt.len(),
            response_bytes = output.stdout.len(),
            document = request.document_name,
            "lm invoke complete"
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "LM command failed with status {}: {}",
                output.status,
                stderr.trim()
            ));
        }

        String::from_utf8(output.stdout).context("decode LM stdout as UTF-8")
    }
}
