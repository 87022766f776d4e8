use std::path::Path;
use std::time::Duration;

use actix_web::{http::header, web, HttpResponse, Responder};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::application::ApplicationRecord;
use crate::state::AppState;
use crate::ErrorResponse;

use super::storage::{FileStatistics, StorageStatistics};
use super::templates::{supported_form_types, SupportedFormType};
use super::{Degraded, FileInfo, GeneratedDocument, GenerationOptions, PipelineError, TemplateId};

/// Slack on top of the pipeline deadline before the HTTP layer gives up.
const HANDLER_GRACE: Duration = Duration::from_secs(5);
const DEFAULT_CLEANUP_DAYS: u32 = 30;
const LINK_UNAVAILABLE: &str = "Document link invalid or expired";

#[derive(Debug, Deserialize, ToSchema)]
pub struct GenerateDocumentRequest {
    /// Application record as produced by the intake workflow.
    #[schema(value_type = Object)]
    pub application: ApplicationRecord,
    #[serde(default)]
    pub options: GenerationOptions,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GenerateDocumentResponse {
    pub file: FileInfo,
    pub generation_id: Uuid,
    pub template: TemplateId,
    /// Enhancements that were skipped; the document is still delivered.
    pub warnings: Vec<Degraded>,
    /// Suspicious content found (and neutralised) in the submission.
    pub content_findings: Vec<String>,
}

impl From<GeneratedDocument> for GenerateDocumentResponse {
    fn from(document: GeneratedDocument) -> Self {
        Self {
            generation_id: document.generation.generation_id,
            file: document.file,
            template: document.template,
            warnings: document.warnings,
            content_findings: document.content_findings,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct TokenQuery {
    /// Signed access token from the file info.
    pub token: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteDocumentResponse {
    pub deleted: bool,
    pub path: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CleanupRequest {
    /// Documents last modified more than this many days ago are removed.
    #[serde(default = "default_cleanup_days")]
    pub days: u32,
}

fn default_cleanup_days() -> u32 {
    DEFAULT_CLEANUP_DAYS
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CleanupResponse {
    pub deleted: usize,
    pub days: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EnvironmentHealthResponse {
    pub ok: bool,
    pub renderer: String,
    pub errors: Vec<String>,
}

fn pipeline_error_response(session_id: &str, err: PipelineError) -> HttpResponse {
    match err {
        PipelineError::NotReady(_)
        | PipelineError::InvalidForm(_)
        | PipelineError::IncompleteData { .. } => {
            let messages = err.messages();
            HttpResponse::UnprocessableEntity()
                .json(ErrorResponse::validation(&err.to_string(), messages))
        }
        PipelineError::AlreadyInProgress(_) => {
            HttpResponse::Conflict().json(ErrorResponse::new("Conflict", &err.to_string()))
        }
        PipelineError::DeadlineExceeded(_) => HttpResponse::GatewayTimeout()
            .json(ErrorResponse::new("GatewayTimeout", &err.to_string())),
        PipelineError::Render(_) | PipelineError::Storage(_) => {
            error!("PDF generation failed for session {}: {}", session_id, err);
            HttpResponse::InternalServerError().json(ErrorResponse::internal_error(
                "Document generation failed, please retry",
            ))
        }
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Documents",
    post,
    path = "/documents",
    request_body = GenerateDocumentRequest,
    responses(
        (status = 201, description = "Document generated and stored", body = GenerateDocumentResponse),
        (status = 409, description = "Generation already in progress for this session", body = ErrorResponse),
        (status = 422, description = "Application not ready or data invalid", body = ErrorResponse),
        (status = 500, description = "Rendering or storage failed; retryable", body = ErrorResponse),
        (status = 504, description = "Generation deadline exceeded", body = ErrorResponse)
    )
)]
pub async fn generate_document(
    state: web::Data<AppState>,
    body: web::Json<GenerateDocumentRequest>,
) -> impl Responder {
    let GenerateDocumentRequest {
        application,
        options,
    } = body.into_inner();
    let session_id = application.session_id.clone();
    info!("Executing generate_document handler for session {}", session_id);

    let pipeline = state.pipeline.clone();
    let job = web::block(move || pipeline.generate(&application, &options));

    let timeout = state.config.generation_timeout;
    let outcome = if timeout.is_zero() {
        job.await
    } else {
        match tokio::time::timeout(timeout + HANDLER_GRACE, job).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(
                    "PDF generation for session {} timed out after {}s",
                    session_id,
                    timeout.as_secs()
                );
                return HttpResponse::GatewayTimeout().json(ErrorResponse::new(
                    "GatewayTimeout",
                    "Document generation took too long",
                ));
            }
        }
    };

    match outcome {
        Ok(Ok(document)) => HttpResponse::Created().json(GenerateDocumentResponse::from(document)),
        Ok(Err(e)) => pipeline_error_response(&session_id, e),
        Err(e) => {
            error!("Generation worker failed for session {}: {}", session_id, e);
            HttpResponse::InternalServerError().json(ErrorResponse::internal_error(
                "Document generation failed, please retry",
            ))
        }
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Documents",
    get,
    path = "/documents/download",
    params(TokenQuery),
    responses(
        (status = 200, description = "PDF document", content_type = "application/pdf"),
        (status = 404, description = "Link invalid or expired", body = ErrorResponse)
    )
)]
pub async fn download_document(
    state: web::Data<AppState>,
    query: web::Query<TokenQuery>,
) -> impl Responder {
    let storage = state.pipeline.storage();
    let Some(payload) = query
        .token
        .as_deref()
        .and_then(|token| storage.validate_access_token(token))
    else {
        warn!("Rejected document download: invalid or expired token");
        return HttpResponse::NotFound().json(ErrorResponse::not_found(LINK_UNAVAILABLE));
    };

    let Some(bytes) = storage.retrieve_document(&payload.path) else {
        warn!(
            "Document {} for session {} is no longer available",
            payload.path, payload.session_id
        );
        return HttpResponse::NotFound().json(ErrorResponse::not_found(LINK_UNAVAILABLE));
    };

    let filename = Path::new(&payload.path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());
    let mime = mime_guess::from_path(&filename).first_or_octet_stream();

    info!(
        "Serving {} ({} bytes) for session {}",
        payload.path,
        bytes.len(),
        payload.session_id
    );
    HttpResponse::Ok()
        .content_type(mime.as_ref())
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{}\"", filename),
        ))
        .body(bytes)
}

#[utoipa::path(
    context_path = "/api",
    tag = "Documents",
    get,
    path = "/documents/info",
    params(TokenQuery),
    responses(
        (status = 200, description = "Size, timestamps and permissions of one document", body = FileStatistics),
        (status = 404, description = "Link invalid or expired", body = ErrorResponse)
    )
)]
pub async fn document_info(
    state: web::Data<AppState>,
    query: web::Query<TokenQuery>,
) -> impl Responder {
    let storage = state.pipeline.storage();
    let stats = query
        .token
        .as_deref()
        .and_then(|token| storage.validate_access_token(token))
        .and_then(|payload| storage.file_statistics(&payload.path));

    match stats {
        Some(stats) => HttpResponse::Ok().json(stats),
        None => HttpResponse::NotFound().json(ErrorResponse::not_found(LINK_UNAVAILABLE)),
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Documents",
    delete,
    path = "/documents",
    params(TokenQuery),
    responses(
        (status = 200, description = "Document deleted (or already absent)", body = DeleteDocumentResponse),
        (status = 404, description = "Link invalid or expired", body = ErrorResponse),
        (status = 500, description = "Internal Server Error", body = ErrorResponse)
    )
)]
pub async fn delete_document(
    state: web::Data<AppState>,
    query: web::Query<TokenQuery>,
) -> impl Responder {
    let storage = state.pipeline.storage();
    let Some(payload) = query
        .token
        .as_deref()
        .and_then(|token| storage.validate_access_token(token))
    else {
        return HttpResponse::NotFound().json(ErrorResponse::not_found(LINK_UNAVAILABLE));
    };

    if storage.delete_document(&payload.path) {
        HttpResponse::Ok().json(DeleteDocumentResponse {
            deleted: true,
            path: payload.path,
        })
    } else {
        HttpResponse::InternalServerError()
            .json(ErrorResponse::internal_error("Failed to delete document"))
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Documents",
    get,
    path = "/documents/stats",
    responses(
        (status = 200, description = "Storage statistics", body = StorageStatistics)
    )
)]
pub async fn storage_stats(state: web::Data<AppState>) -> impl Responder {
    let pipeline = state.pipeline.clone();
    match web::block(move || pipeline.storage().storage_statistics()).await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            error!("Storage statistics worker failed: {}", e);
            HttpResponse::InternalServerError()
                .json(ErrorResponse::internal_error("Failed to read storage statistics"))
        }
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Documents",
    post,
    path = "/documents/cleanup",
    request_body = CleanupRequest,
    responses(
        (status = 200, description = "Old documents removed", body = CleanupResponse),
        (status = 500, description = "Internal Server Error", body = ErrorResponse)
    )
)]
pub async fn cleanup_documents(
    state: web::Data<AppState>,
    body: web::Json<CleanupRequest>,
) -> impl Responder {
    let days = body.days;
    info!("Executing cleanup_documents handler ({} days)", days);

    let pipeline = state.pipeline.clone();
    match web::block(move || pipeline.storage().cleanup_older_than(days)).await {
        Ok(deleted) => HttpResponse::Ok().json(CleanupResponse { deleted, days }),
        Err(e) => {
            error!("Cleanup worker failed: {}", e);
            HttpResponse::InternalServerError()
                .json(ErrorResponse::internal_error("Failed to clean up documents"))
        }
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Documents",
    get,
    path = "/documents/form-types",
    responses(
        (status = 200, description = "Supported application forms", body = Vec<SupportedFormType>)
    )
)]
pub async fn form_types() -> impl Responder {
    HttpResponse::Ok().json(supported_form_types())
}

#[utoipa::path(
    context_path = "/api",
    tag = "Health",
    get,
    path = "/health/environment",
    responses(
        (status = 200, description = "Environment can generate documents", body = EnvironmentHealthResponse),
        (status = 503, description = "Environment problems found", body = EnvironmentHealthResponse)
    )
)]
pub async fn environment_health(state: web::Data<AppState>) -> impl Responder {
    let pipeline = state.pipeline.clone();
    let renderer = pipeline.renderer().name().to_string();

    let errors = match web::block(move || pipeline.validate_environment()).await {
        Ok(errors) => errors.messages(),
        Err(e) => vec![format!("Environment check failed: {}", e)],
    };

    let response = EnvironmentHealthResponse {
        ok: errors.is_empty(),
        renderer,
        errors,
    };
    if response.ok {
        HttpResponse::Ok().json(response)
    } else {
        warn!("Environment check reported {} problem(s)", response.errors.len());
        HttpResponse::ServiceUnavailable().json(response)
    }
}
