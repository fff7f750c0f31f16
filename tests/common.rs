#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use report_renderer_server::config::RendererConfig;
use report_renderer_server::engine::{
    EngineError, EngineLauncher, EngineManager, PageSession, RenderEngine,
};
use report_renderer_server::report::{PaperSize, ReportRenderer, Viewport};

pub const FAKE_PDF: &[u8] = b"%PDF-1.4\n% fake\n%%EOF\n";

/// Shared record of everything the fake engine was asked to do, plus failure switches.
#[derive(Default)]
pub struct EngineProbe {
    pub launches: AtomicUsize,
    pub pages_opened: AtomicUsize,
    pub close_calls: Mutex<HashMap<String, usize>>,
    pub papers: Mutex<Vec<PaperSize>>,
    pub viewports: Mutex<Vec<Viewport>>,
    pub contents: Mutex<Vec<String>>,
    pub exported: Mutex<Vec<PathBuf>>,
    pub fail_launch: AtomicBool,
    pub fail_create_page: AtomicBool,
    pub fail_config: AtomicBool,
    pub fail_export: AtomicBool,
    pub dead: AtomicBool,
    pub launch_delay: Mutex<Option<Duration>>,
}

impl EngineProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn pages_opened(&self) -> usize {
        self.pages_opened.load(Ordering::SeqCst)
    }

    /// Number of pages closed at least once.
    pub fn pages_closed(&self) -> usize {
        self.close_calls.lock().len()
    }

    pub fn close_count(&self, page_id: &str) -> usize {
        self.close_calls.lock().get(page_id).copied().unwrap_or(0)
    }

    pub fn set(&self, switch: &AtomicBool, value: bool) {
        switch.store(value, Ordering::SeqCst);
    }

    pub fn last_paper(&self) -> Option<PaperSize> {
        self.papers.lock().last().cloned()
    }
}

pub struct FakeLauncher {
    pub probe: Arc<EngineProbe>,
}

#[async_trait]
impl EngineLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Arc<dyn RenderEngine>, EngineError> {
        self.probe.launches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.probe.launch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.probe.fail_launch.load(Ordering::SeqCst) {
            return Err(EngineError::Spawn("fake engine refused to start".to_string()));
        }
        self.probe.dead.store(false, Ordering::SeqCst);
        Ok(Arc::new(FakeEngine {
            probe: self.probe.clone(),
        }))
    }
}

pub struct FakeEngine {
    probe: Arc<EngineProbe>,
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn create_page(&self) -> Result<Box<dyn PageSession>, EngineError> {
        if self.probe.fail_create_page.load(Ordering::SeqCst) {
            return Err(EngineError::Remote {
                method: "createPage".to_string(),
                message: "no more pages".to_string(),
            });
        }
        let n = self.probe.pages_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePage {
            id: format!("page-{}", n + 1),
            probe: self.probe.clone(),
        }))
    }

    fn is_alive(&self) -> bool {
        !self.probe.dead.load(Ordering::SeqCst)
    }
}

pub struct FakePage {
    id: String,
    probe: Arc<EngineProbe>,
}

impl FakePage {
    fn config_result(&self, method: &str) -> Result<(), EngineError> {
        if self.probe.fail_config.load(Ordering::SeqCst) {
            Err(EngineError::Remote {
                method: method.to_string(),
                message: "rejected".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PageSession for FakePage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn set_paper_size(&self, paper: &PaperSize) -> Result<(), EngineError> {
        self.probe.papers.lock().push(paper.clone());
        self.config_result("setPaperSize")
    }

    async fn set_viewport(&self, viewport: &Viewport) -> Result<(), EngineError> {
        self.probe.viewports.lock().push(*viewport);
        self.config_result("setViewport")
    }

    async fn set_content(&self, html: &str) -> Result<(), EngineError> {
        self.probe.contents.lock().push(html.to_string());
        self.config_result("setContent")
    }

    async fn render(&self, path: &Path) -> Result<(), EngineError> {
        if self.probe.fail_export.load(Ordering::SeqCst) {
            // Leave a truncated file behind, as a crashing exporter would.
            let _ = std::fs::write(path, b"%PDF-1.4\n");
            return Err(EngineError::Remote {
                method: "render".to_string(),
                message: "export failed".to_string(),
            });
        }
        std::fs::write(path, FAKE_PDF).map_err(|e| EngineError::Remote {
            method: "render".to_string(),
            message: e.to_string(),
        })?;
        self.probe.exported.lock().push(path.to_path_buf());
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        *self.probe.close_calls.lock().entry(self.id.clone()).or_insert(0) += 1;
        Ok(())
    }
}

pub fn fake_manager(probe: &Arc<EngineProbe>) -> Arc<EngineManager> {
    Arc::new(EngineManager::new(Arc::new(FakeLauncher {
        probe: probe.clone(),
    })))
}

pub fn test_config(temp_dir: &Path) -> RendererConfig {
    RendererConfig {
        temp_dir: temp_dir.to_path_buf(),
        request_timeout: Duration::from_secs(5),
        ..RendererConfig::default()
    }
}

/// A renderer over the fake engine writing into `temp_dir`.
pub fn fake_renderer(probe: &Arc<EngineProbe>, temp_dir: &Path) -> ReportRenderer {
    ReportRenderer::new(&test_config(temp_dir), fake_manager(probe))
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    }
}
