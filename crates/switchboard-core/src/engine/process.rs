//! Subprocess-backed engine.
//!
//! Every session runs its own agent process. The protocol is newline
//! delimited JSON in both directions:
//!
//! - stdin receives `{"type":"prompt","prompt":"..."}` and, when a caller
//!   cancels, `{"type":"abort"}`
//! - stdout emits one [`EngineEvent`] per line (`{"kind":"contentDelta",...}`)
//!
//! Lines on stdout that do not parse as events are logged and skipped. When
//! stdout closes the session receives a final `error` event.
//!
//! The process is started as `<command> <args..> --session-id <id> --model
//! <model>`, with `--resume` appended when reattaching to an existing id.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{Engine, EngineConnection, EngineError, EngineEvent, EngineSession, SessionOptions};
use crate::logging::{log_line, open_log_file, LogHandle};

/// How long a disposed process gets to exit after stdin closes.
const EXIT_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct ProcessEngineConfig {
    /// Agent executable.
    pub command: String,
    /// Extra arguments placed before the session arguments.
    pub args: Vec<String>,
    /// Directory for per-session transcript logs.
    pub log_dir: Option<PathBuf>,
}

impl ProcessEngineConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            log_dir: None,
        }
    }

    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    fn session_args(&self, session_id: &str, model: &str, resume: bool) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("--session-id".to_string());
        args.push(session_id.to_string());
        if !model.is_empty() {
            args.push("--model".to_string());
            args.push(model.to_string());
        }
        if resume {
            args.push("--resume".to_string());
        }
        args
    }
}

pub struct ProcessEngine {
    config: ProcessEngineConfig,
    ready: AtomicBool,
}

impl ProcessEngine {
    pub fn new(config: ProcessEngineConfig) -> Self {
        Self {
            config,
            ready: AtomicBool::new(false),
        }
    }

    /// Complete startup. Sessions cannot be created before this succeeds.
    pub async fn start(&self) -> Result<(), EngineError> {
        if self.config.command.trim().is_empty() {
            return Err(EngineError::SpawnFailed(
                "No agent command configured".to_string(),
            ));
        }
        self.ready.store(true, Ordering::SeqCst);
        log::info!("Process engine ready (command: {})", self.config.command);
        Ok(())
    }

    async fn spawn(
        &self,
        session_id: String,
        options: SessionOptions,
        resume: bool,
    ) -> Result<EngineConnection, EngineError> {
        if !self.is_ready() {
            return Err(EngineError::NotStarted);
        }

        let args = self.config.session_args(&session_id, &options.model, resume);
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = options.working_directory {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::SpawnFailed(format!("{}: {}", self.config.command, e)))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::SpawnFailed("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::SpawnFailed("Failed to capture stderr".to_string()))?;

        let log = open_log_file(self.config.log_dir.as_deref(), &session_id);
        log_line(&log, "SPAWN", &format!("{} {}", self.config.command, args.join(" ")));
        log::info!(
            "Spawned agent process for session {} (resume: {})",
            session_id,
            resume
        );

        let (tx, rx) = mpsc::unbounded_channel();

        let stdout_tx = tx.clone();
        let stdout_log = Arc::clone(&log);
        let stdout_id = session_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log_line(&stdout_log, "STDOUT", &line);
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<EngineEvent>(&line) {
                    Ok(event) => {
                        if stdout_tx.send(event).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        log::debug!("Skipping agent output [{}]: {} ({})", stdout_id, line, e);
                    }
                }
            }
            let _ = stdout_tx.send(EngineEvent::Error {
                message: "Agent process exited".to_string(),
            });
        });

        let stderr_log = Arc::clone(&log);
        let stderr_id = session_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::warn!("agent stderr [{}]: {}", stderr_id, line);
                log_line(&stderr_log, "STDERR", &line);
            }
        });

        let session = ProcessSession {
            id: session_id,
            stdin: Arc::new(Mutex::new(stdin)),
            child: Mutex::new(Some(child)),
            log,
            abort_watcher: std::sync::Mutex::new(None),
            disposed: AtomicBool::new(false),
        };

        Ok(EngineConnection {
            handle: Arc::new(session),
            events: rx,
        })
    }
}

#[async_trait]
impl Engine for ProcessEngine {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn create_session(
        &self,
        options: SessionOptions,
    ) -> Result<EngineConnection, EngineError> {
        self.spawn(Uuid::new_v4().to_string(), options, false).await
    }

    async fn resume_session(
        &self,
        session_id: &str,
        options: SessionOptions,
    ) -> Result<EngineConnection, EngineError> {
        self.spawn(session_id.to_string(), options, true).await
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        self.ready.store(false, Ordering::SeqCst);
        log::info!("Process engine stopped");
        Ok(())
    }
}

struct ProcessSession {
    id: String,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    child: Mutex<Option<Child>>,
    log: LogHandle,
    /// Forwards cancellation of the latest prompt as an abort request.
    abort_watcher: std::sync::Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl ProcessSession {
    fn replace_abort_watcher(&self, watcher: Option<JoinHandle<()>>) {
        let previous = std::mem::replace(
            &mut *self
                .abort_watcher
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
            watcher,
        );
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

async fn write_line(
    stdin: &Mutex<Option<ChildStdin>>,
    log: &LogHandle,
    line: &str,
) -> Result<(), EngineError> {
    let mut guard = stdin.lock().await;
    let pipe = guard.as_mut().ok_or(EngineError::Closed)?;
    log_line(log, "STDIN", line);
    pipe.write_all(format!("{}\n", line).as_bytes())
        .await
        .map_err(|e| EngineError::SendFailed(e.to_string()))?;
    pipe.flush()
        .await
        .map_err(|e| EngineError::SendFailed(e.to_string()))
}

#[async_trait]
impl EngineSession for ProcessSession {
    fn session_id(&self) -> &str {
        &self.id
    }

    async fn send(&self, prompt: &str, cancel: CancellationToken) -> Result<(), EngineError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        let line = serde_json::json!({ "type": "prompt", "prompt": prompt }).to_string();
        write_line(&self.stdin, &self.log, &line).await?;

        let stdin = Arc::clone(&self.stdin);
        let log = Arc::clone(&self.log);
        let watcher = tokio::spawn(async move {
            cancel.cancelled().await;
            let abort = serde_json::json!({ "type": "abort" }).to_string();
            let _ = write_line(&stdin, &log, &abort).await;
        });
        self.replace_abort_watcher(Some(watcher));
        Ok(())
    }

    async fn dispose(&self) -> Result<(), EngineError> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.replace_abort_watcher(None);
        // Closing stdin asks the agent to exit.
        self.stdin.lock().await.take();

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                log_line(&self.log, "EXIT", &status.to_string());
            }
            _ => {
                log::warn!("Agent process for {} did not exit, killing", self.id);
                let _ = child.kill().await;
            }
        }
        Ok(())
    }
}
