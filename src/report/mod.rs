//! Report module - template compilation and the PDF render pipeline.
//!
//! - `helpers` - the closed set of template helpers
//! - `compiler` - binds helpers and data into markup
//! - `footer` - per-page header/footer generators evaluated by the engine
//! - `naming` - collision-free output paths
//! - `pipeline` - one request end-to-end

pub mod compiler;
pub mod footer;
pub mod helpers;
pub mod models;
pub mod naming;
pub mod pipeline;

pub use compiler::TemplateCompiler;
pub use footer::FooterGenerator;
pub use models::{
    Orientation, PageBand, PageFormat, PageOptions, PaperSize, RenderOptions, RenderRequest,
    RenderedReport, TemplateOptions, Viewport,
};
pub use naming::{next_path, OutputNamer};
pub use pipeline::ReportRenderer;

use thiserror::Error;

use crate::engine::EngineError;

/// Errors surfaced by a render request.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid render request: {0}")]
    Validation(String),
    #[error("template error: {0}")]
    Template(String),
    #[error("rendering engine failed to start: {0}")]
    EngineStart(#[source] EngineError),
    #[error("failed to open a page session: {0}")]
    Session(#[source] EngineError),
    #[error("failed to configure page: {0}")]
    RenderConfig(#[source] EngineError),
    #[error("failed to export document: {0}")]
    Export(String),
}

impl RenderError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Template(_) => "TemplateError",
            Self::EngineStart(_) => "EngineStartError",
            Self::Session(_) => "SessionError",
            Self::RenderConfig(_) => "RenderConfigError",
            Self::Export(_) => "ExportError",
        }
    }

    /// Whether the caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EngineStart(_) | Self::Session(_))
    }
}

impl From<handlebars::RenderError> for RenderError {
    fn from(err: handlebars::RenderError) -> Self {
        RenderError::Template(err.to_string())
    }
}
