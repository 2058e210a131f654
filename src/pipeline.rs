//! Ingestion and extraction pipeline.
//!
//! `ingest` parses a message and keeps the attachments that pass the filter;
//! `process` sends each one to the model in order. A failing attachment never
//! aborts the run: it becomes a failed record carrying the error as an issue.
use crate::attachments::{AttachmentFilter, IngestSummary};
use crate::config::DEFAULT_MAX_PARSE_RETRIES;
use crate::lm_log::{LmLog, LmLogBuilder, LmLogEntry};
use crate::model::response::parse_extraction;
use crate::model::{ExtractionModel, ExtractionRequest, PDF_MEDIA_TYPE};
use crate::msg::{self, Attachment, MailMessage};
use crate::prompt::PromptSet;
use crate::reconcile::{calculate_claims_paid, failure_findings, reconcile};
use crate::schema::{
    ClaimExtraction, ExtractionRecord, ExtractionRun, RecordStatus, RUN_SCHEMA_VERSION,
};
use crate::util::now_epoch_ms;
use anyhow::{anyhow, Result};
use std::path::Path;
use std::time::Instant;

pub struct ClaimsPipeline {
    filter: AttachmentFilter,
    prompts: PromptSet,
    max_parse_retries: usize,
    lm_log: Option<LmLog>,
    subject: Option<String>,
    attachments: Vec<Attachment>,
}

impl ClaimsPipeline {
    pub fn new(filter: AttachmentFilter, prompts: PromptSet) -> Self {
        Self {
            filter,
            prompts,
            max_parse_retries: DEFAULT_MAX_PARSE_RETRIES,
            lm_log: None,
            subject: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_max_parse_retries(mut self, retries: usize) -> Self {
        self.max_parse_retries = retries;
        self
    }

    pub fn with_lm_log(mut self, lm_log: Option<LmLog>) -> Self {
        self.lm_log = lm_log;
        self
    }

    /// Parse a `.msg` file and keep its matching attachments.
    pub fn ingest_file(&mut self, path: &Path) -> Result<IngestSummary> {
        let message = msg::open(path)?;
        tracing::info!(
            path = %path.display(),
            attachments = message.attachments.len(),
            "message parsed"
        );
        Ok(self.ingest_message(message))
    }

    pub fn ingest_message(&mut self, message: MailMessage) -> IngestSummary {
        self.subject = message.subject;
        self.attachments = self.filter.select(message.attachments);
        IngestSummary::from_attachments(&self.attachments)
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// One record per ingested attachment, in ingestion order.
    pub fn process(&self, model: &dyn ExtractionModel) -> Vec<ExtractionRecord> {
        self.attachments
            .iter()
            .map(|attachment| self.process_attachment(model, attachment))
            .collect()
    }

    fn process_attachment(
        &self,
        model: &dyn ExtractionModel,
        attachment: &Attachment,
    ) -> ExtractionRecord {
        let start = Instant::now();
        let (status, extraction, findings) = match self.extract_with_retries(model, attachment) {
            Ok(extraction) => {
                let findings = reconcile(&extraction);
                (RecordStatus::Extracted, extraction, findings)
            }
            Err(err) => {
                let error = format!("{err:#}");
                tracing::warn!(attachment = %attachment.name, %error, "extraction failed");
                let extraction = ClaimExtraction::failed(format!(
                    "Error processing attachment {}: {error}",
                    attachment.name
                ));
                let findings = failure_findings(&extraction);
                (RecordStatus::Failed, extraction, findings)
            }
        };
        let claims_paid = calculate_claims_paid(
            extraction.commission,
            extraction.total_income,
            extraction.premium_tax,
        );
        ExtractionRecord {
            attachment: attachment.name.clone(),
            status,
            extraction,
            claims_paid,
            findings,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Call the model, retrying only when the reply cannot be parsed.
    fn extract_with_retries(
        &self,
        model: &dyn ExtractionModel,
        attachment: &Attachment,
    ) -> Result<ClaimExtraction> {
        let label = model.label();
        let mut last_error: Option<String> = None;
        let mut last_response: Option<String> = None;

        for attempt in 0..=self.max_parse_retries {
            let instruction = match (&last_error, &last_response) {
                (Some(error), Some(previous)) => {
                    tracing::warn!(
                        attachment = %attachment.name,
                        attempt,
                        max = self.max_parse_retries,
                        "retrying after unusable reply"
                    );
                    self.prompts
                        .retry_instruction(&attachment.name, error, previous)
                }
                _ => self.prompts.instruction(&attachment.name),
            };
            let entry = LmLogBuilder::start(&attachment.name, &label, attempt as u32 + 1)
                .with_prompt(&instruction);
            let request = ExtractionRequest {
                system_prompt: &self.prompts.system,
                instruction: &instruction,
                schema: &self.prompts.schema,
                document: &attachment.data,
                media_type: PDF_MEDIA_TYPE,
                document_name: &attachment.name,
            };

            // Transport and command errors are not retried.
            let reply = match model.extract(&request) {
                Ok(reply) => reply,
                Err(err) => {
                    self.log(entry.failed(format!("{err:#}")));
                    return Err(err);
                }
            };

            match parse_extraction(&reply) {
                Ok(extraction) => {
                    self.log(entry.with_response(&reply).success());
                    return Ok(extraction);
                }
                Err(err) => {
                    let error = format!("{err:#}");
                    self.log(entry.with_response(&reply).unparseable(error.clone()));
                    last_error = Some(error);
                    last_response = Some(reply);
                }
            }
        }

        Err(anyhow!(
            "model reply unusable after {} attempt(s): {}",
            self.max_parse_retries + 1,
            last_error.unwrap_or_else(|| "unknown".to_string())
        ))
    }

    fn log(&self, entry: LmLogEntry) {
        let Some(lm_log) = &self.lm_log else {
            return;
        };
        if let Err(err) = lm_log.append(&entry) {
            tracing::warn!(
                path = %lm_log.path().display(),
                error = %format!("{err:#}"),
                "lm log append failed"
            );
        }
    }
}

pub fn build_run(
    source: &Path,
    subject: Option<&str>,
    model: &str,
    records: Vec<ExtractionRecord>,
) -> ExtractionRun {
    ExtractionRun {
        schema_version: RUN_SCHEMA_VERSION,
        source: source.display().to_string(),
        subject: subject.map(str::to_string),
        model: model.to_string(),
        generated_at_epoch_ms: now_epoch_ms(),
        records,
    }
}
