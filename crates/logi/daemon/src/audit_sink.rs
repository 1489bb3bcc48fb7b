//! Audit sinks backed by the filesystem

use async_trait::async_trait;
use logi_ledger::{AuditError, AuditLine, AuditSink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// Append-only JSON-lines audit file
pub struct FileAuditSink {
    path: PathBuf,
    // serializes appends so lines never interleave
    write_lock: Mutex<()>,
}

impl FileAuditSink {
    /// Create a new file sink
    pub async fn new(path: PathBuf) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all lines from file
    pub async fn read_all(&self) -> Result<Vec<AuditLine>, AuditError> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut entries = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let entry: AuditLine = serde_json::from_str(&line)
                .map_err(|e| AuditError::Unavailable(format!("corrupt audit line: {}", e)))?;
            entries.push(entry);
        }

        Ok(entries)
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn write(&self, line: &AuditLine) -> Result<(), AuditError> {
        let json = serde_json::to_string(line)
            .map_err(|e| AuditError::Unavailable(e.to_string()))?;

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

/// Sink that writes to multiple sinks
pub struct CompositeSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl CompositeSink {
    /// Create a new composite sink
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AuditSink for CompositeSink {
    /// Deliver to every sink; report the first failure after trying all
    async fn write(&self, line: &AuditLine) -> Result<(), AuditError> {
        if self.sinks.is_empty() {
            return Err(AuditError::Unavailable("No sinks configured".into()));
        }

        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.write(line).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
