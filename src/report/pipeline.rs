//! Render pipeline: validate, compile, paint on an engine page, export, close.

use chrono::Utc;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::RendererConfig;
use crate::engine::{EngineManager, PageSession};

use super::compiler::TemplateCompiler;
use super::footer::{make_footer_generator, FooterGenerator};
use super::models::{
    PageBand, PagePresets, PaperSize, RenderOptions, RenderRequest, RenderedReport, Viewport,
};
use super::naming::OutputNamer;
use super::RenderError;

/// Turns render requests into PDF files on the shared engine.
///
/// Cheap to clone; clones share the compiler and the engine.
#[derive(Clone)]
pub struct ReportRenderer {
    compiler: Arc<TemplateCompiler>,
    engine: Arc<EngineManager>,
    namer: OutputNamer,
    presets: PagePresets,
}

impl ReportRenderer {
    pub fn new(config: &RendererConfig, engine: Arc<EngineManager>) -> Self {
        Self {
            compiler: Arc::new(TemplateCompiler::new()),
            engine,
            namer: OutputNamer::new(config.temp_dir.clone()),
            presets: config.presets.clone(),
        }
    }

    pub fn engine(&self) -> &EngineManager {
        &self.engine
    }

    /// Callback-style entry point.
    ///
    /// An invalid request is reported synchronously, before any engine interaction; anything
    /// else runs on a spawned task and reports through `callback` exactly once.
    pub fn render_document<F>(&self, options: RenderOptions, callback: F)
    where
        F: FnOnce(Result<RenderedReport, RenderError>) + Send + 'static,
    {
        let request = match RenderRequest::from_options(options, &self.presets) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("Rejected render request: {}", e);
                callback(Err(e));
                return;
            }
        };

        let renderer = self.clone();
        tokio::spawn(async move {
            let result = renderer.render(request).await;
            if let Err(e) = &result {
                log::warn!("Render failed ({}): {}", e.kind(), e);
            }
            callback(result);
        });
    }

    /// Render one request. The page session is closed on every path once it is open.
    pub async fn render(&self, request: RenderRequest) -> Result<RenderedReport, RenderError> {
        request.validate()?;

        let paper = self.paper_size(&request)?;
        let html = match &request.rendered_html {
            Some(html) => html.clone(),
            None => {
                let template = request.template_content.as_deref().unwrap_or_default();
                self.compiler.compile(template, &request.data_context)?
            }
        };

        let page = self.engine.acquire_page().await?;
        log::debug!("Rendering on page {}", page.id());

        let outcome = self
            .paint_and_export(page.as_ref(), &paper, &request.page_options.viewport(), &html)
            .await;

        if let Err(e) = page.close().await {
            log::warn!("Failed to close page {}: {}", page.id(), e);
        }

        let path = outcome?;
        log::debug!("Rendered {}", path.display());
        Ok(RenderedReport {
            path,
            html,
            created_at: Utc::now(),
        })
    }

    /// Geometry from the resolved page options plus the header/footer bands.
    fn paper_size(&self, request: &RenderRequest) -> Result<PaperSize, RenderError> {
        let page = &request.page_options;

        let footer = if page.disable_footer {
            None
        } else {
            Some(PageBand {
                height: page.footer_height.clone(),
                contents: make_footer_generator(
                    &self.compiler,
                    request.footer_template.as_deref(),
                    &request.data_context,
                    request.page_number_offset,
                )?,
            })
        };

        let header = match request.header_template.as_deref() {
            Some(template) => {
                let fragment = self.compiler.compile(template, &request.data_context)?;
                Some(PageBand {
                    height: self.presets.footer_height.clone(),
                    contents: FooterGenerator::from_fragment(&fragment, request.page_number_offset),
                })
            }
            None => None,
        };

        Ok(PaperSize {
            format: page.page_size,
            orientation: page.orientation,
            margin: page.margin.clone(),
            header,
            footer,
        })
    }

    async fn paint_and_export(
        &self,
        page: &dyn PageSession,
        paper: &PaperSize,
        viewport: &Viewport,
        html: &str,
    ) -> Result<PathBuf, RenderError> {
        futures::try_join!(
            page.set_paper_size(paper),
            page.set_viewport(viewport),
            page.set_content(html),
        )
        .map_err(RenderError::RenderConfig)?;

        tokio::fs::create_dir_all(self.namer.base_dir())
            .await
            .map_err(|e| RenderError::Export(format!("cannot create output directory: {e}")))?;

        let path = self.namer.next_path();
        if let Err(e) = page.render(&path).await {
            discard_partial_file(&path).await;
            return Err(RenderError::Export(e.to_string()));
        }

        if tokio::fs::metadata(&path).await.is_err() {
            return Err(RenderError::Export(format!(
                "engine reported success but wrote no file at {}",
                path.display()
            )));
        }
        Ok(path)
    }
}

async fn discard_partial_file(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            log::warn!("Failed to remove partial output {}: {}", path.display(), e);
        }
    }
}
