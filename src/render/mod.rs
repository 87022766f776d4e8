//! Rendering seam: the pipeline's view of the PDF engine.
//!
//! - `Renderer` turns a template plus prepared data into a page-addressable
//!   [`DocumentCanvas`].
//! - `typst` renders templates through the Typst CLI.
//! - `pdf` post-processes the compiled bytes with lopdf.
//! - `standard_security` seals a finished document with 128-bit RC4.

pub mod pdf;
pub mod standard_security;
pub mod typst;

pub use pdf::PdfCanvas;
pub use typst::TypstRenderer;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::documents::preparer::PreparedDocumentData;
use crate::documents::templates::TemplateId;

/// Errors raised by a renderer or canvas.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to load template '{template}': {source}")]
    TemplateIo {
        template: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create temporary directory: {0}")]
    TempDir(#[source] std::io::Error),
    #[error("failed to write render input: {0}")]
    WriteInput(#[source] std::io::Error),
    #[error("failed to serialize template data: {0}")]
    Data(#[from] serde_json::Error),
    #[error("Typst CLI execution failed: {0}")]
    TypstIo(#[source] std::io::Error),
    #[error("Typst CLI exited with status {code}: {stderr}")]
    TypstExit { code: i32, stderr: String },
    #[error("failed to read generated PDF: {0}")]
    ReadPdf(#[source] std::io::Error),
    #[error("PDF structure error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("failed to serialize PDF: {0}")]
    Serialize(String),
    #[error("page {page} is out of range (document has {count} pages)")]
    PageOutOfRange { page: usize, count: usize },
    #[error("{0} is not supported by this renderer")]
    Unsupported(&'static str),
}

/// Permissions granted to holders of the open (user) password.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Print,
    Copy,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::Copy => "copy",
        }
    }
}

/// A run of text placed on one page.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStamp {
    pub x: f32,
    pub y: f32,
    pub text: String,
    /// Base font name; renderer default when `None`.
    pub font: Option<String>,
    pub size: f32,
    /// RGB components in `0.0..=1.0`.
    pub color: [f32; 3],
    /// Rotation in degrees, counter-clockwise.
    pub angle: f32,
}

/// Low-level handle on a rendered document.
pub trait DocumentCanvas: Send {
    fn attach_info_dictionary(&mut self, info: &BTreeMap<String, String>) -> Result<(), RenderError>;

    fn attach_xmp_block(&mut self, xml: &str) -> Result<(), RenderError>;

    fn set_encryption(
        &mut self,
        open_password: Option<&str>,
        owner_password: &str,
        permissions: &[Permission],
        strength: u32,
    ) -> Result<(), RenderError>;

    fn page_count(&self) -> usize;

    /// Draw on 1-based `page`.
    fn draw_text(&mut self, page: usize, stamp: &TextStamp) -> Result<(), RenderError>;

    /// Serialize the document.
    fn finish(self: Box<Self>) -> Result<Vec<u8>, RenderError>;
}

/// Template engine producing canvases.
pub trait Renderer: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the engine can be invoked at all (binary present, etc.).
    fn is_available(&self) -> bool;

    fn render(
        &self,
        template: TemplateId,
        data: &PreparedDocumentData,
    ) -> Result<Box<dyn DocumentCanvas>, RenderError>;
}
