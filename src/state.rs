use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::documents::DocumentPipeline;
use crate::render::{Renderer, TypstRenderer};

/// Shared application state handed to every handler via `web::Data`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PipelineConfig>,
    pub pipeline: Arc<DocumentPipeline>,
}

impl AppState {
    pub fn new(config: PipelineConfig) -> Self {
        let renderer = Arc::new(TypstRenderer::from_config(&config));
        Self::with_renderer(config, renderer)
    }

    /// State with an explicit renderer; lets tests swap in a double.
    pub fn with_renderer(config: PipelineConfig, renderer: Arc<dyn Renderer>) -> Self {
        let config = Arc::new(config);
        let pipeline = Arc::new(DocumentPipeline::new(config.clone(), renderer));
        Self { config, pipeline }
    }
}
