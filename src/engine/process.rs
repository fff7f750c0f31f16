//! The rendering engine as a child process.
//!
//! The process is started once with fixed parameters and then shared by every request. Calls
//! are multiplexed over its stdin/stdout, so independent pages render concurrently.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use crate::config::EngineConfig;
use crate::report::{FooterGenerator, PaperSize, Viewport};

use super::protocol::{
    paper_size_params, BandCallback, CallbackReply, EngineCall, Inbound, InboundMessage,
    CALLBACK_FOOTER, CALLBACK_HEADER, METHOD_CLOSE_PAGE, METHOD_CREATE_PAGE, METHOD_PING,
    METHOD_RENDER, METHOD_SET_CONTENT, METHOD_SET_PAPER_SIZE, METHOD_SET_VIEWPORT,
};
use super::{EngineError, EngineLauncher, PageSession, RenderEngine};

/// Starts `ProcessEngine`s from the configured command line.
pub struct ProcessLauncher {
    config: EngineConfig,
}

impl ProcessLauncher {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EngineLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<Arc<dyn RenderEngine>, EngineError> {
        let engine = ProcessEngine::spawn(&self.config).await?;
        Ok(Arc::new(engine))
    }
}

#[derive(Default)]
struct PageBands {
    header: Option<FooterGenerator>,
    footer: Option<FooterGenerator>,
}

type PendingCalls = HashMap<u64, oneshot::Sender<Result<Value, String>>>;
type EngineWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Forgets a pending call when its caller stops waiting, answered or not.
struct PendingGuard<'a> {
    pending: &'a Mutex<PendingCalls>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

struct Connection {
    writer: AsyncMutex<FramedWrite<EngineWriter, LinesCodec>>,
    pending: Mutex<PendingCalls>,
    bands: Mutex<HashMap<String, PageBands>>,
    next_id: AtomicU64,
    alive: AtomicBool,
    call_timeout: Duration,
}

impl Connection {
    fn new(writer: EngineWriter, call_timeout: Duration) -> Self {
        Self {
            writer: AsyncMutex::new(FramedWrite::new(writer, LinesCodec::new())),
            pending: Mutex::new(HashMap::new()),
            bands: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
            call_timeout,
        }
    }

    async fn send_line(&self, line: String) -> Result<(), EngineError> {
        let mut writer = self.writer.lock().await;
        writer.send(line).await.map_err(|e| {
            log::error!("Failed to write to rendering engine: {}", e);
            self.alive.store(false, Ordering::SeqCst);
            EngineError::Disconnected
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, EngineError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(EngineError::Disconnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&EngineCall { id, method, params })
            .map_err(|e| EngineError::Protocol(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        self.send_line(line).await?;

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(message))) => Err(EngineError::Remote {
                method: method.to_string(),
                message,
            }),
            Ok(Err(_)) => Err(EngineError::Disconnected),
            Err(_) => Err(EngineError::Timeout(method.to_string())),
        }
    }

    fn band_contents(&self, method: &str, callback: &BandCallback) -> String {
        let bands = self.bands.lock();
        let generator = bands.get(&callback.page_id).and_then(|b| match method {
            CALLBACK_HEADER => b.header.as_ref(),
            CALLBACK_FOOTER => b.footer.as_ref(),
            _ => None,
        });
        generator
            .map(|g| g.render(callback.page_num, callback.num_pages))
            .unwrap_or_default()
    }

    fn disconnect(&self) {
        self.alive.store(false, Ordering::SeqCst);
        // Dropping the senders fails every waiting call with `Disconnected`.
        self.pending.lock().clear();
        self.bands.lock().clear();
    }
}

/// A running engine process.
pub struct ProcessEngine {
    connection: Arc<Connection>,
    _child: Mutex<Child>,
}

impl ProcessEngine {
    /// Spawn the engine and wait for it to answer a `ping`.
    pub async fn spawn(config: &EngineConfig) -> Result<Self, EngineError> {
        log::info!(
            "Starting rendering engine: {} {}",
            config.program.display(),
            config.args.join(" ")
        );

        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Spawn("engine stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Spawn("engine stdout is not piped".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        let connection = Arc::new(Connection::new(Box::new(stdin), config.call_timeout));
        tokio::spawn(read_loop(connection.clone(), stdout));

        connection
            .call(METHOD_PING, json!({}))
            .await
            .map_err(|e| EngineError::Spawn(format!("engine did not answer handshake: {e}")))?;

        Ok(Self {
            connection,
            _child: Mutex::new(child),
        })
    }
}

#[async_trait]
impl RenderEngine for ProcessEngine {
    async fn create_page(&self) -> Result<Box<dyn PageSession>, EngineError> {
        let result = self.connection.call(METHOD_CREATE_PAGE, json!({})).await?;
        let id = result
            .get("pageId")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Protocol("createPage answered without pageId".to_string()))?
            .to_string();

        Ok(Box::new(ProcessPage {
            id,
            connection: self.connection.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn is_alive(&self) -> bool {
        self.connection.alive.load(Ordering::SeqCst)
    }
}

struct ProcessPage {
    id: String,
    connection: Arc<Connection>,
    closed: AtomicBool,
}

#[async_trait]
impl PageSession for ProcessPage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn set_paper_size(&self, paper: &PaperSize) -> Result<(), EngineError> {
        self.connection.bands.lock().insert(
            self.id.clone(),
            PageBands {
                header: paper.header.as_ref().map(|b| b.contents.clone()),
                footer: paper.footer.as_ref().map(|b| b.contents.clone()),
            },
        );
        self.connection
            .call(METHOD_SET_PAPER_SIZE, paper_size_params(&self.id, paper))
            .await
            .map(|_| ())
    }

    async fn set_viewport(&self, viewport: &Viewport) -> Result<(), EngineError> {
        let params = json!({
            "pageId": self.id,
            "width": viewport.width,
            "height": viewport.height,
        });
        self.connection
            .call(METHOD_SET_VIEWPORT, params)
            .await
            .map(|_| ())
    }

    async fn set_content(&self, html: &str) -> Result<(), EngineError> {
        let params = json!({ "pageId": self.id, "html": html });
        self.connection
            .call(METHOD_SET_CONTENT, params)
            .await
            .map(|_| ())
    }

    async fn render(&self, path: &Path) -> Result<(), EngineError> {
        let params = json!({ "pageId": self.id, "path": path.to_string_lossy() });
        self.connection.call(METHOD_RENDER, params).await.map(|_| ())
    }

    async fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.connection.bands.lock().remove(&self.id);
        self.connection
            .call(METHOD_CLOSE_PAGE, json!({ "pageId": self.id }))
            .await
            .map(|_| ())
    }
}

impl Drop for ProcessPage {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.connection.bands.lock().remove(&self.id);
        log::warn!("Page {} dropped without being closed", self.id);

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let connection = self.connection.clone();
            let id = self.id.clone();
            handle.spawn(async move {
                if let Err(e) = connection
                    .call(METHOD_CLOSE_PAGE, json!({ "pageId": id }))
                    .await
                {
                    log::debug!("Background close of page {} failed: {}", id, e);
                }
            });
        }
    }
}

async fn read_loop(connection: Arc<Connection>, stdout: ChildStdout) {
    let mut lines = FramedRead::new(stdout, LinesCodec::new());

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to read from rendering engine: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match InboundMessage::parse(&line) {
            Ok(Inbound::Response { id, outcome }) => {
                match connection.pending.lock().remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    }
                    None => log::debug!("Dropping late engine response {}", id),
                }
            }
            Ok(Inbound::Callback { id, method, params }) => {
                let reply = CallbackReply {
                    id,
                    result: connection.band_contents(&method, &params),
                };
                let connection = connection.clone();
                tokio::spawn(async move {
                    match serde_json::to_string(&reply) {
                        Ok(line) => {
                            if let Err(e) = connection.send_line(line).await {
                                log::warn!("Failed to answer engine callback {}: {}", reply.id, e);
                            }
                        }
                        Err(e) => log::error!("Failed to encode engine callback reply: {}", e),
                    }
                });
            }
            Err(e) => log::warn!("Ignoring engine output: {}", e),
        }
    }

    log::warn!("Rendering engine closed its output; marking it as crashed");
    connection.disconnect();
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log::debug!("engine: {}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silent_connection(call_timeout: Duration) -> Connection {
        Connection::new(Box::new(tokio::io::sink()), call_timeout)
    }

    #[tokio::test]
    async fn test_abandoned_call_is_forgotten() {
        let connection = silent_connection(Duration::from_secs(30));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            connection.call(METHOD_SET_VIEWPORT, json!({ "pageId": "p1" })),
        )
        .await;

        assert!(abandoned.is_err());
        assert!(connection.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_call_is_forgotten() {
        let connection = silent_connection(Duration::from_millis(20));

        let result = connection
            .call(METHOD_SET_CONTENT, json!({ "pageId": "p1", "html": "" }))
            .await;

        assert!(matches!(result, Err(EngineError::Timeout(_))));
        assert!(connection.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_fails_waiting_calls() {
        let connection = Arc::new(silent_connection(Duration::from_secs(30)));

        let waiting = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.call(METHOD_PING, json!({})).await })
        };
        while connection.pending.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        connection.disconnect();

        assert!(matches!(
            waiting.await.unwrap(),
            Err(EngineError::Disconnected)
        ));
        assert!(!connection.alive.load(Ordering::SeqCst));
        assert!(matches!(
            connection.call(METHOD_PING, json!({})).await,
            Err(EngineError::Disconnected)
        ));
    }
}
