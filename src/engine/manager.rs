//! Lifecycle of the shared rendering engine.
//!
//! The engine is created lazily by the first request that needs it. Requests arriving while
//! it starts wait on the same launch instead of starting their own process. A failed start
//! leaves the manager uninitialized so a later request can retry, and an engine found dead
//! (or failing to open pages) is dropped and relaunched on the next acquisition.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

use crate::report::RenderError;

use super::{EngineError, EngineLauncher, PageSession, RenderEngine};

type Launch = Shared<BoxFuture<'static, Result<Arc<dyn RenderEngine>, EngineError>>>;

enum EngineState {
    Uninitialized,
    Initializing { generation: u64, launch: Launch },
    Ready { generation: u64, engine: Arc<dyn RenderEngine> },
}

/// Externally visible engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Uninitialized,
    Initializing,
    Ready,
}

pub struct EngineManager {
    launcher: Arc<dyn EngineLauncher>,
    state: Mutex<EngineState>,
    generation: Mutex<u64>,
}

impl EngineManager {
    pub fn new(launcher: Arc<dyn EngineLauncher>) -> Self {
        Self {
            launcher,
            state: Mutex::new(EngineState::Uninitialized),
            generation: Mutex::new(0),
        }
    }

    pub fn status(&self) -> EngineStatus {
        match &*self.state.lock() {
            EngineState::Uninitialized => EngineStatus::Uninitialized,
            EngineState::Initializing { .. } => EngineStatus::Initializing,
            EngineState::Ready { .. } => EngineStatus::Ready,
        }
    }

    /// Open a fresh page on the shared engine, starting the engine first if needed.
    pub async fn acquire_page(&self) -> Result<Box<dyn PageSession>, RenderError> {
        let (generation, engine) = self
            .ensure_engine()
            .await
            .map_err(RenderError::EngineStart)?;

        match engine.create_page().await {
            Ok(page) => Ok(page),
            Err(e) => {
                log::warn!("Engine failed to open a page ({}); recycling it", e);
                self.recycle(generation);
                Err(RenderError::Session(e))
            }
        }
    }

    async fn ensure_engine(&self) -> Result<(u64, Arc<dyn RenderEngine>), EngineError> {
        let (generation, launch) = {
            let mut state = self.state.lock();
            match &*state {
                EngineState::Ready { generation, engine } if engine.is_alive() => {
                    return Ok((*generation, engine.clone()));
                }
                EngineState::Ready { .. } => {
                    log::warn!("Rendering engine is no longer alive; restarting it");
                    self.begin_launch(&mut state)
                }
                EngineState::Initializing { generation, launch } => (*generation, launch.clone()),
                EngineState::Uninitialized => self.begin_launch(&mut state),
            }
        };

        let result = launch.await;

        let mut state = self.state.lock();
        let current = matches!(
            &*state,
            EngineState::Initializing { generation: g, .. } if *g == generation
        );
        match result {
            Ok(engine) => {
                if current {
                    log::info!("Rendering engine ready (generation {})", generation);
                    *state = EngineState::Ready {
                        generation,
                        engine: engine.clone(),
                    };
                }
                Ok((generation, engine))
            }
            Err(e) => {
                if current {
                    log::error!("Rendering engine failed to start: {}", e);
                    *state = EngineState::Uninitialized;
                }
                Err(e)
            }
        }
    }

    fn begin_launch(&self, state: &mut EngineState) -> (u64, Launch) {
        let generation = {
            let mut counter = self.generation.lock();
            *counter += 1;
            *counter
        };

        let launcher = self.launcher.clone();
        let launch: Launch = async move { launcher.launch().await }.boxed().shared();
        *state = EngineState::Initializing {
            generation,
            launch: launch.clone(),
        };
        (generation, launch)
    }

    /// Forget the engine of `generation` so the next acquisition starts a new one.
    fn recycle(&self, generation: u64) {
        let mut state = self.state.lock();
        if let EngineState::Ready { generation: g, .. } = &*state {
            if *g == generation {
                *state = EngineState::Uninitialized;
            }
        }
    }
}
