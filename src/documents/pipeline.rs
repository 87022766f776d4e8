//! End-to-end generation: validate, prepare, render, embellish, store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;

use crate::application::ApplicationRecord;
use crate::config::PipelineConfig;
use crate::render::{RenderError, Renderer};

use super::metadata::{validate_generation_record, MetadataEmbedder};
use super::preparer::{prepare_data, stamp_generated_at, validate_template_data, PreparedDocumentData};
use super::security::{sanitize_map, scan_for_dangerous_content, SecurityApplicator};
use super::storage::{DocumentStorage, StorageError};
use super::templates::{resolve_for_form_data, TemplateId};
use super::validation::{ReadinessValidator, ValidationErrors};
use super::{GeneratedDocument, GenerationOptions};

pub const AUDIT_TARGET: &str = "loan_docs_server::audit";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("application is not ready for document generation")]
    NotReady(ValidationErrors),
    #[error("form data failed validation")]
    InvalidForm(ValidationErrors),
    #[error("prepared data is incomplete for template '{}'", .template.file_stem())]
    IncompleteData {
        template: TemplateId,
        errors: ValidationErrors,
    },
    #[error("a document is already being generated for session {0}")]
    AlreadyInProgress(String),
    #[error("document generation exceeded the {}s deadline", .0.as_secs())]
    DeadlineExceeded(Duration),
    #[error("rendering failed: {0}")]
    Render(#[from] RenderError),
    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),
}

impl PipelineError {
    /// Itemised validation messages, empty for non-validation errors.
    pub fn messages(&self) -> Vec<String> {
        match self {
            Self::NotReady(errors)
            | Self::InvalidForm(errors)
            | Self::IncompleteData { errors, .. } => errors.messages(),
            _ => Vec::new(),
        }
    }
}

/// Holds a session's slot in the in-flight set until dropped.
struct InFlightGuard<'a> {
    sessions: &'a Mutex<HashSet<String>>,
    session_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.sessions.lock().remove(&self.session_id);
    }
}

pub struct DocumentPipeline {
    config: Arc<PipelineConfig>,
    renderer: Arc<dyn Renderer>,
    validator: ReadinessValidator,
    embedder: MetadataEmbedder,
    security: SecurityApplicator,
    storage: DocumentStorage,
    in_flight: Mutex<HashSet<String>>,
}

impl DocumentPipeline {
    pub fn new(config: Arc<PipelineConfig>, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            validator: ReadinessValidator::new(config.clone()),
            embedder: MetadataEmbedder::new(config.clone()),
            security: SecurityApplicator::new(config.clone()),
            storage: DocumentStorage::new(&config),
            in_flight: Mutex::new(HashSet::new()),
            renderer,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn storage(&self) -> &DocumentStorage {
        &self.storage
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    /// Deployment pre-flight for the configured renderer and storage root.
    pub fn validate_environment(&self) -> ValidationErrors {
        self.validator.validate_environment(self.renderer.as_ref())
    }

    fn acquire(&self, session_id: &str) -> Result<Option<InFlightGuard<'_>>, PipelineError> {
        if !self.config.single_flight {
            return Ok(None);
        }
        if !self.in_flight.lock().insert(session_id.to_string()) {
            log::warn!(
                "Rejected concurrent PDF generation for session {}",
                session_id
            );
            return Err(PipelineError::AlreadyInProgress(session_id.to_string()));
        }
        Ok(Some(InFlightGuard {
            sessions: &self.in_flight,
            session_id: session_id.to_string(),
        }))
    }

    fn check_deadline(&self, deadline: Option<Instant>, session_id: &str) -> Result<(), PipelineError> {
        match deadline {
            Some(deadline) if Instant::now() > deadline => {
                log::error!(
                    "PDF generation for session {} passed its {}s deadline",
                    session_id,
                    self.config.generation_timeout.as_secs()
                );
                Err(PipelineError::DeadlineExceeded(self.config.generation_timeout))
            }
            _ => Ok(()),
        }
    }

    /// Run every stage for one record. Only validation, render, deadline and
    /// storage failures abort; metadata, watermark and encryption degrade.
    pub fn generate(
        &self,
        record: &ApplicationRecord,
        options: &GenerationOptions,
    ) -> Result<GeneratedDocument, PipelineError> {
        let started = Instant::now();
        let timeout = self.config.generation_timeout;
        let deadline = (!timeout.is_zero()).then(|| started + timeout);
        let session_id = record.session_id.as_str();

        let _guard = self.acquire(session_id)?;
        log::info!("Starting PDF generation for session {}", session_id);

        let readiness = self.validator.validate_application_readiness(Some(record));
        if !readiness.is_empty() {
            log::warn!(
                "Session {} not ready for PDF generation:\n{}",
                session_id,
                readiness.to_report()
            );
            return Err(PipelineError::NotReady(readiness));
        }

        let form_errors = self
            .validator
            .validate_form_data(&record.form_data, record.form_data.form_id());
        if !form_errors.is_empty() {
            log::warn!(
                "Form data for session {} failed validation:\n{}",
                session_id,
                form_errors.to_report()
            );
            return Err(PipelineError::InvalidForm(form_errors));
        }

        let template = resolve_for_form_data(&record.form_data);
        let generated_at = Utc::now();
        let mut data = prepare_data(record);
        stamp_generated_at(&mut data, generated_at);

        let template_errors = validate_template_data(&data, template);
        if !template_errors.is_empty() {
            log::warn!(
                "Prepared data for session {} incomplete for template {}:\n{}",
                session_id,
                template.file_stem(),
                template_errors.to_report()
            );
            return Err(PipelineError::IncompleteData {
                template,
                errors: template_errors,
            });
        }

        let content_findings = scan_for_dangerous_content(data.as_map());
        for finding in &content_findings {
            log::warn!("Session {}: {}", session_id, finding);
        }
        let data = PreparedDocumentData::new(sanitize_map(data.as_map()));

        self.check_deadline(deadline, session_id)?;
        let mut canvas = self.renderer.render(template, &data).map_err(|e| {
            log::error!("Rendering failed for session {}: {}", session_id, e);
            e
        })?;
        log::info!(
            "Rendered template {} for session {} ({} page(s))",
            template.file_stem(),
            session_id,
            canvas.page_count()
        );

        let mut warnings = Vec::new();
        let block = self.embedder.build_provenance_block(record, &data, generated_at);
        if let Err(degraded) = self.embedder.attach_metadata(canvas.as_mut(), &block) {
            warnings.push(degraded);
        }
        if let Err(degraded) = self.security.apply_watermark(
            canvas.as_mut(),
            record,
            options.watermark_text.as_deref(),
        ) {
            warnings.push(degraded);
        }
        if let Err(degraded) = self.security.apply_encryption(canvas.as_mut(), record) {
            warnings.push(degraded);
        }

        let pdf = canvas.finish()?;
        self.check_deadline(deadline, session_id)?;

        let caller_metadata = options
            .metadata
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()));
        let file = self.storage.store_document(&pdf, record, caller_metadata)?;

        let generation = self.embedder.build_generation_record(
            record,
            options,
            self.renderer.name(),
            generated_at,
        );
        let gaps = validate_generation_record(&generation);
        if !gaps.is_empty() {
            log::warn!(
                "Generation record for session {} incomplete: {:?}",
                session_id,
                gaps.messages()
            );
        }
        match serde_json::to_string(&generation) {
            Ok(line) => log::info!(target: AUDIT_TARGET, "{}", line),
            Err(e) => log::warn!("Failed to serialize generation record: {}", e),
        }

        let elapsed = started.elapsed();
        if elapsed > self.config.slow_threshold {
            log::warn!(
                "Slow PDF generation for session {}: {:.2}s (threshold {}s)",
                session_id,
                elapsed.as_secs_f64(),
                self.config.slow_threshold.as_secs()
            );
        } else {
            log::info!(
                "PDF generated for session {} in {:.2}s ({} bytes, {} warning(s))",
                session_id,
                elapsed.as_secs_f64(),
                file.size,
                warnings.len()
            );
        }

        Ok(GeneratedDocument {
            file,
            generation,
            template,
            warnings,
            content_findings,
            pdf,
        })
    }
}
