//! Documents module - generation and secure distribution of application PDFs.
//!
//! Stages, in the order a request passes through them:
//! - `validation` - readiness, form and environment checks
//! - `templates` / `preparer` - template choice and render data
//! - `metadata` - provenance info dictionary and XMP packet
//! - `security` - encryption, watermark, sanitization
//! - `storage` / `token` - persistence and signed access
//!
//! `pipeline` drives them; `handlers` exposes them over HTTP.

pub mod fields;
pub mod handlers;
pub mod metadata;
pub mod pipeline;
pub mod preparer;
pub mod security;
pub mod storage;
pub mod templates;
pub mod token;
pub mod validation;

pub use metadata::{GenerationRecord, MetadataEmbedder, ProvenanceBlock};
pub use pipeline::{DocumentPipeline, PipelineError};
pub use preparer::PreparedDocumentData;
pub use security::SecurityApplicator;
pub use storage::{DocumentStorage, FileInfo, FileStatistics, StorageError, StorageStatistics};
pub use templates::TemplateId;
pub use token::{AccessTokenPayload, TokenSigner};
pub use validation::{ReadinessValidator, ValidationError, ValidationErrors};

use std::fmt;

use actix_web::web;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Stage that can fail without aborting delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DegradedStage {
    Metadata,
    Watermark,
    Encryption,
}

impl fmt::Display for DegradedStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Metadata => "metadata",
            Self::Watermark => "watermark",
            Self::Encryption => "encryption",
        })
    }
}

/// A document was produced, but without one of its enhancements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Degraded {
    pub stage: DegradedStage,
    pub reason: String,
}

impl Degraded {
    pub fn new(stage: DegradedStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Degraded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} skipped: {}", self.stage, self.reason)
    }
}

/// Per-request options supplied by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct GenerationOptions {
    /// Overrides the default watermark text.
    #[serde(default)]
    pub watermark_text: Option<String>,
    /// Free-form caller metadata echoed back in the file info.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Option<Value>,
}

/// Outcome of a successful generation.
#[derive(Debug)]
pub struct GeneratedDocument {
    pub file: FileInfo,
    pub generation: GenerationRecord,
    pub template: TemplateId,
    pub warnings: Vec<Degraded>,
    pub content_findings: Vec<String>,
    pub pdf: Vec<u8>,
}

/// Register the document routes under the caller's scope.
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/documents")
            .route(web::post().to(handlers::generate_document))
            .route(web::delete().to(handlers::delete_document)),
    )
    .service(web::resource("/documents/download").route(web::get().to(handlers::download_document)))
    .service(web::resource("/documents/info").route(web::get().to(handlers::document_info)))
    .service(web::resource("/documents/stats").route(web::get().to(handlers::storage_stats)))
    .service(web::resource("/documents/cleanup").route(web::post().to(handlers::cleanup_documents)))
    .service(web::resource("/documents/form-types").route(web::get().to(handlers::form_types)))
    .service(
        web::resource("/health/environment").route(web::get().to(handlers::environment_health)),
    );
}
