//! Append-only event logs.
//!
//! Handlers never touch files. They get a [`Journal`] holding two
//! [`LogSink`]s: the chat transcript and the command/audit trail. Recording
//! is fire-and-forget; a failing sink is reported on the console and
//! otherwise ignored.
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;

/// Write-only destination for log events.
pub trait LogSink: Send + Sync {
    fn record(&self, event: &str);
}

/// `[2025-01-31T12:00:00.000Z] text\n`
pub fn format_record(at: DateTime<Utc>, text: &str) -> String {
    format!("[{}] {text}\n", at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Appends timestamped records to a file from a background task.
///
/// The task exits once every handle to the sink is dropped and the queue is
/// drained.
#[derive(Debug, Clone)]
pub struct FileSink {
    tx: mpsc::UnboundedSender<String>,
}

impl FileSink {
    /// Start the writer task for `path`. Must be called inside a runtime.
    pub fn spawn(path: impl Into<PathBuf>) -> (Self, JoinHandle<()>) {
        let path = path.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(write_loop(path, rx));
        (Self { tx }, handle)
    }
}

impl LogSink for FileSink {
    fn record(&self, event: &str) {
        let _ = self.tx.send(format_record(Utc::now(), event));
    }
}

async fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}

async fn write_loop(path: PathBuf, mut rx: mpsc::UnboundedReceiver<String>) {
    let mut file: Option<File> = None;
    while let Some(record) = rx.recv().await {
        if file.is_none() {
            match open_append(&path).await {
                Ok(f) => file = Some(f),
                Err(e) => {
                    error!(path = %path.display(), "log open failed: {e}");
                    continue;
                }
            }
        }
        if let Some(f) = file.as_mut() {
            let written = match f.write_all(record.as_bytes()).await {
                Ok(()) => f.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                error!(path = %path.display(), "log write failed: {e}");
                // Reopen on the next record.
                file = None;
            }
        }
    }
}

/// Keeps records in memory. Records are stored without timestamps.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl LogSink for MemorySink {
    fn record(&self, event: &str) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.to_owned());
    }
}

/// The two sinks every handler writes to.
#[derive(Clone)]
pub struct Journal {
    chat: Arc<dyn LogSink>,
    audit: Arc<dyn LogSink>,
}

impl Journal {
    pub fn new(chat: Arc<dyn LogSink>, audit: Arc<dyn LogSink>) -> Self {
        Self { chat, audit }
    }

    /// A journal over two fresh in-memory sinks, returned alongside it.
    pub fn in_memory() -> (Self, Arc<MemorySink>, Arc<MemorySink>) {
        let chat = Arc::new(MemorySink::new());
        let audit = Arc::new(MemorySink::new());
        let journal = Self::new(chat.clone(), audit.clone());
        (journal, chat, audit)
    }

    /// Chat transcript: joins, leaves, relayed lines.
    pub fn chat(&self, event: &str) {
        self.chat.record(event);
    }

    /// Command outcomes.
    pub fn audit(&self, event: &str) {
        self.audit.record(event);
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").finish_non_exhaustive()
    }
}
