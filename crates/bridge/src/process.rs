//! A spawned helper process and its request/response plumbing.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{oneshot, Mutex};

use pl_domain::config::BridgeConfig;
use pl_sessions::{EventSink, HandleEvent, ProviderError};

use crate::protocol::{BridgeOp, BridgeRequest, Inbound};

/// Maximum number of non-JSON lines to skip before declaring the helper broken.
const MAX_SKIP_LINES: usize = 1000;

type Pending = Arc<parking_lot::Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>>;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no bridge command configured")]
    NotConfigured,

    #[error("helper process has exited")]
    ProcessExited,

    #[error("timeout waiting for {0} response")]
    Timeout(&'static str),

    #[error("helper rejected {op}: {message}")]
    Remote { op: &'static str, message: String },
}

impl From<BridgeError> for ProviderError {
    fn from(e: BridgeError) -> Self {
        ProviderError::new(e.to_string())
    }
}

/// One helper process serving one session.
///
/// A reader task owns stdout: responses are routed to the waiting request
/// by id, events are forwarded to the session's [`EventSink`].
pub struct HelperProcess {
    session_key: String,
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    pending: Pending,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    /// Set once `destroy` starts so the exit is not reported as a disconnect.
    closing: Arc<AtomicBool>,
    request_timeout: Duration,
}

impl HelperProcess {
    /// Spawn the helper for `session_key` with its data directory.
    pub fn spawn(
        config: &BridgeConfig,
        session_key: &str,
        data_dir: &Path,
        events: EventSink,
    ) -> Result<Self, BridgeError> {
        if config.command.is_empty() {
            return Err(BridgeError::NotConfigured);
        }

        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args)
            .arg("--session")
            .arg(session_key)
            .arg("--data-dir")
            .arg(data_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| {
            BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture helper stdin",
            ))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture helper stdout",
            ))
        })?;

        let pending: Pending = Arc::default();
        let alive = Arc::new(AtomicBool::new(true));
        let closing = Arc::new(AtomicBool::new(false));
        tokio::spawn(read_loop(
            BufReader::new(stdout),
            pending.clone(),
            events,
            alive.clone(),
            closing.clone(),
        ));

        tracing::debug!(session_key = %session_key, command = %config.command, "helper process spawned");
        Ok(Self {
            session_key: session_key.to_owned(),
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            pending,
            next_id: AtomicU64::new(1),
            alive,
            closing,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Send one request and wait for its response.
    pub async fn request(&self, op: BridgeOp) -> Result<Value, BridgeError> {
        if !self.is_alive() {
            return Err(BridgeError::ProcessExited);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = op.name();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let json = serde_json::to_string(&BridgeRequest { id, op })?;
        tracing::debug!(session_key = %self.session_key, id, op = name, "sending bridge request");
        if let Err(e) = self.write_line(&json).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(BridgeError::Remote { op: name, message }),
            Ok(Err(_)) => Err(BridgeError::ProcessExited),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(BridgeError::Timeout(name))
            }
        }
    }

    async fn write_line(&self, json: &str) -> Result<(), BridgeError> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Ask the helper to log out and exit, then reap it.
    pub async fn shutdown(&self) -> Result<(), BridgeError> {
        self.closing.store(true, Ordering::SeqCst);
        let farewell = if self.is_alive() {
            self.request(BridgeOp::Destroy).await.map(|_| ())
        } else {
            Ok(())
        };

        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.shutdown().await {
                tracing::debug!(session_key = %self.session_key, error = %e, "error closing helper stdin");
            }
        }

        let mut child = self.child.lock().await;
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(session_key = %self.session_key, ?status, "helper process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(session_key = %self.session_key, error = %e, "error waiting for helper process");
            }
            Err(_) => {
                tracing::warn!(session_key = %self.session_key, "helper did not exit within timeout, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(session_key = %self.session_key, error = %e, "failed to kill helper process");
                }
            }
        }
        self.alive.store(false, Ordering::SeqCst);
        farewell
    }
}

async fn read_loop(
    mut stdout: BufReader<ChildStdout>,
    pending: Pending,
    events: EventSink,
    alive: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
) {
    let session_key = events.session_key().to_owned();
    let mut skipped = 0usize;
    let mut line = String::new();

    let exit_reason = loop {
        line.clear();
        match stdout.read_line(&mut line).await {
            Ok(0) => break "helper process exited".to_string(),
            Ok(_) => {}
            Err(e) => break format!("helper stdout error: {e}"),
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        // Helpers may leak logging onto stdout.
        if !trimmed.starts_with('{') {
            skipped += 1;
            if skipped >= MAX_SKIP_LINES {
                break "helper produced too many non-JSON lines on stdout".to_string();
            }
            tracing::debug!(session_key = %session_key, line = %trimmed, "skipping non-JSON line from helper");
            continue;
        }

        match serde_json::from_str::<Inbound>(trimmed) {
            Ok(Inbound::Response(resp)) => {
                let waiter = pending.lock().remove(&resp.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(resp.into_result());
                    }
                    None => {
                        tracing::debug!(session_key = %session_key, id = resp.id, "response for unknown request");
                    }
                }
            }
            Ok(Inbound::Event { event }) => {
                tracing::debug!(session_key = %session_key, ?event, "helper event");
                events.emit(event);
            }
            Err(e) => {
                tracing::debug!(session_key = %session_key, error = %e, "unparseable helper line");
            }
        }
    };

    alive.store(false, Ordering::SeqCst);
    // Dropping the senders fails every outstanding request.
    pending.lock().clear();
    if !closing.load(Ordering::SeqCst) {
        tracing::warn!(session_key = %session_key, reason = %exit_reason, "helper stopped unexpectedly");
        events.emit(HandleEvent::Disconnected(exit_reason));
    }
}
