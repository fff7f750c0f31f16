//! Rendering engine boundary.
//!
//! The engine is an external process that paints markup and exports paginated PDF files.
//! The render pipeline only talks to it through the traits below, so tests can swap in a
//! fake engine.

pub mod manager;
pub mod process;
pub mod protocol;

pub use manager::{EngineManager, EngineStatus};
pub use process::{ProcessEngine, ProcessLauncher};

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::report::{PaperSize, Viewport};

/// Errors at the engine boundary.
///
/// `Clone` because a failed start is handed to every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("failed to spawn engine process: {0}")]
    Spawn(String),
    #[error("engine process is not running")]
    Disconnected,
    #[error("engine call '{0}' timed out")]
    Timeout(String),
    #[error("engine rejected '{method}': {message}")]
    Remote { method: String, message: String },
    #[error("malformed engine message: {0}")]
    Protocol(String),
}

/// A live engine able to open independent pages concurrently.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn create_page(&self) -> Result<Box<dyn PageSession>, EngineError>;

    /// False once the engine has crashed or its connection was lost.
    fn is_alive(&self) -> bool;
}

/// One engine-side rendering context scoped to a single document.
///
/// The configuration calls take `&self` so they can be issued concurrently.
#[async_trait]
pub trait PageSession: Send + Sync {
    fn id(&self) -> &str;

    async fn set_paper_size(&self, paper: &PaperSize) -> Result<(), EngineError>;

    async fn set_viewport(&self, viewport: &Viewport) -> Result<(), EngineError>;

    async fn set_content(&self, html: &str) -> Result<(), EngineError>;

    async fn render(&self, path: &Path) -> Result<(), EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}

/// Starts a new engine instance.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn RenderEngine>, EngineError>;
}
