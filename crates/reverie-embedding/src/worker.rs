//! Child-process host for the embedding model.
//!
//! The model (BGE-small-en-v1.5, 384 dims) runs in a dedicated worker
//! process. We speak newline-delimited JSON over stdin/stdout with
//! request-id correlation, so concurrent callers multiplex over one child.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};

use reverie_core::config::EmbeddingConfig;

use crate::error::{EmbeddingError, Result};

/// Request sent to the worker process.
#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    id: u64,
    op: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

/// Reply from the worker process. `id = 0` is reserved for unsolicited
/// events (the initial `ready` notification).
#[derive(Debug, Clone, Deserialize)]
pub struct WireReply {
    pub id: u64,
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub model_loaded: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<WireReply>>>>>;

/// Handle to the spawned worker. Cloned via `Arc` by callers.
pub struct EmbeddingWorker {
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: tokio::sync::Mutex<Child>,
    pending: PendingMap,
    next_id: AtomicU64,
    ready: Arc<AtomicBool>,
    embed_timeout: Duration,
}

impl EmbeddingWorker {
    /// Spawn the worker process and wait for its `ready` event.
    ///
    /// Fails with `NotReady` when the model does not load within the
    /// configured load timeout.
    pub async fn spawn(cfg: &EmbeddingConfig) -> Result<Self> {
        let mut child = Command::new(&cfg.worker_command)
            .args(&cfg.worker_args)
            .env("EMBED_MODEL", &cfg.model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EmbeddingError::Protocol("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EmbeddingError::Protocol("worker stdout unavailable".to_string()))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let ready = Arc::new(AtomicBool::new(false));
        let (ready_tx, mut ready_rx) = watch::channel(false);

        tokio::spawn(reader_loop(
            stdout,
            Arc::clone(&pending),
            Arc::clone(&ready),
            ready_tx,
        ));

        let worker = Self {
            stdin: tokio::sync::Mutex::new(stdin),
            child: tokio::sync::Mutex::new(child),
            pending,
            next_id: AtomicU64::new(1),
            ready,
            embed_timeout: Duration::from_secs(cfg.embed_timeout_secs),
        };

        // Block until the model reports loaded, bounded by the load timeout.
        let load_timeout = Duration::from_secs(cfg.load_timeout_secs);
        let loaded = tokio::time::timeout(load_timeout, async {
            loop {
                if *ready_rx.borrow() {
                    return true;
                }
                if ready_rx.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await;

        match loaded {
            Ok(true) => {
                info!(model = %cfg.model, "embedding worker ready");
                Ok(worker)
            }
            Ok(false) => Err(EmbeddingError::WorkerCrashed),
            Err(_) => {
                warn!(
                    timeout_secs = cfg.load_timeout_secs,
                    "embedding worker did not become ready in time"
                );
                Err(EmbeddingError::NotReady)
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Embed one text. Times out per the configured embed timeout; a timed
    /// out request is dropped from the pending map so a late reply is
    /// discarded instead of leaking.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if !self.is_ready() {
            return Err(EmbeddingError::NotReady);
        }
        let reply = self.request("embed", Some(text)).await?;
        if !reply.ok {
            return Err(EmbeddingError::Protocol(
                reply.error.unwrap_or_else(|| "embed failed".to_string()),
            ));
        }
        reply
            .vector
            .ok_or_else(|| EmbeddingError::Protocol("embed reply missing vector".to_string()))
    }

    /// Ask the worker whether its model is loaded.
    pub async fn health(&self) -> Result<bool> {
        let reply = self.request("health", None).await?;
        Ok(reply.model_loaded.unwrap_or(false))
    }

    /// Kill the child process. Pending requests are rejected by the reader
    /// loop when stdout closes.
    pub async fn shutdown(&self) {
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            warn!(err = %e, "failed to kill embedding worker");
        }
    }

    async fn request(&self, op: &str, text: Option<&str>) -> Result<WireReply> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        let line = serde_json::to_string(&WireRequest { id, op, text })
            .map_err(|e| EmbeddingError::Protocol(e.to_string()))?;

        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                self.pending.lock().unwrap().remove(&id);
                return Err(e.into());
            }
            if let Err(e) = stdin.write_all(b"\n").await {
                self.pending.lock().unwrap().remove(&id);
                return Err(e.into());
            }
            stdin.flush().await?;
        }

        match tokio::time::timeout(self.embed_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(EmbeddingError::WorkerCrashed),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(EmbeddingError::Timeout {
                    ms: self.embed_timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// Reads worker stdout until EOF. On crash every pending request rejects
/// with `Worker crashed` and the service marks itself not-ready; the caller
/// decides whether to degrade.
async fn reader_loop(
    stdout: tokio::process::ChildStdout,
    pending: PendingMap,
    ready: Arc<AtomicBool>,
    ready_tx: watch::Sender<bool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let reply: WireReply = match serde_json::from_str(&line) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(err = %e, raw = %line, "unparseable worker reply");
                        continue;
                    }
                };

                if reply.id == 0 {
                    if reply.event.as_deref() == Some("ready") {
                        ready.store(true, Ordering::SeqCst);
                        let _ = ready_tx.send(true);
                    }
                    continue;
                }

                let tx = pending.lock().unwrap().remove(&reply.id);
                match tx {
                    Some(tx) => {
                        let _ = tx.send(Ok(reply));
                    }
                    // Late reply for a timed-out request.
                    None => {}
                }
            }
            Ok(None) | Err(_) => break,
        }
    }

    error!("embedding worker stdout closed; rejecting pending requests");
    ready.store(false, Ordering::SeqCst);
    let mut map = pending.lock().unwrap();
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(EmbeddingError::WorkerCrashed));
    }
}
