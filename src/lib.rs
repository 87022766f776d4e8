use actix_cors::Cors;
use actix_web::middleware::Compress;
use actix_web::{http::header, web, App, HttpServer};
use actix_web_prometheus::PrometheusMetricsBuilder;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

pub mod application;
pub mod config;
pub mod documents;
pub mod render;
pub mod state;

pub use crate::config::PipelineConfig;
pub use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub timestamp: String,
    /// Itemised validation failures, in the order they were found.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: &str) -> Self {
        Self {
            error: error_type.to_string(),
            message: message.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            errors: Vec::new(),
        }
    }

    pub fn not_found(message: &str) -> Self {
        Self::new("NotFound", message)
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new("BadRequest", message)
    }

    pub fn internal_error(message: &str) -> Self {
        Self::new("InternalServerError", message)
    }

    pub fn validation(message: &str, errors: Vec<String>) -> Self {
        Self {
            errors,
            ..Self::new("ValidationFailed", message)
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::documents::handlers::generate_document,
        crate::documents::handlers::download_document,
        crate::documents::handlers::document_info,
        crate::documents::handlers::delete_document,
        crate::documents::handlers::storage_stats,
        crate::documents::handlers::cleanup_documents,
        crate::documents::handlers::form_types,
        crate::documents::handlers::environment_health
    ),
    components(
        schemas(
            documents::handlers::GenerateDocumentRequest,
            documents::handlers::GenerateDocumentResponse,
            documents::handlers::DeleteDocumentResponse,
            documents::handlers::CleanupRequest,
            documents::handlers::CleanupResponse,
            documents::handlers::EnvironmentHealthResponse,
            documents::GenerationOptions,
            documents::Degraded,
            documents::DegradedStage,
            documents::FileInfo,
            documents::FileStatistics,
            documents::StorageStatistics,
            documents::TemplateId,
            documents::templates::SupportedFormType,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Documents", description = "Loan document generation and secure retrieval."),
        (name = "Health", description = "Deployment pre-flight checks.")
    ),
    servers(
        (url = "http://127.0.0.1:8080", description = "Localhost server")
    )
)]
pub struct ApiDoc;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    let (host, port) = (config.server.host.clone(), config.server.port);
    let allowed_origin = config.public_base_url.clone();

    let app_state = web::Data::new(AppState::new(config));

    let preflight = app_state.pipeline.validate_environment();
    if preflight.is_empty() {
        log::info!("Environment check passed");
    } else {
        log::warn!(
            "Environment check found problems; generation may fail:\n{}",
            preflight.to_report()
        );
    }

    let prometheus = PrometheusMetricsBuilder::new("loan_docs_server")
        .endpoint("/metrics")
        .build()
        .map_err(|e| anyhow::anyhow!("failed to create Prometheus metrics middleware: {}", e))?;

    log::info!("Starting server at http://{}:{}", host, port);

    HttpServer::new(move || {
        let app_state = app_state.clone();
        let prometheus = prometheus.clone();
        let cors = Cors::default()
            .allowed_origin(&allowed_origin)
            .allowed_origin("http://localhost:5173")
            .allowed_origin("http://localhost:3000")
            .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
            .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
            .max_age(3600);

        App::new()
            .wrap(Compress::default())
            .wrap(prometheus)
            .wrap(cors)
            .app_data(app_state)
            .service(web::scope("/api").configure(documents::config))
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
    })
    .keep_alive(actix_web::http::KeepAlive::Os)
    .bind((host.as_str(), port))
    .with_context(|| format!("failed to bind {}:{}", host, port))?
    .run()
    .await
    .context("server error")
}
