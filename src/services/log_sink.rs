//! C4 Log Sink — an append-only structured text log alongside `tracing`,
//! matching the on-disk `logs.txt`/`wiki-search.log` layout spec §6.1
//! expects a caller to be able to read back (spec §4.2).
//!
//! A write failure here must never crash whatever else the caller was
//! doing, so every I/O error is logged through `tracing` and swallowed
//! rather than propagated.

use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

pub struct LogSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LogSink {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    /// Appends one `[timestamp] line` entry.
    pub async fn append(&self, line: &str) {
        let _guard = self.lock.lock().await;
        let entry = format!("[{}] {line}\n", crate::domain::now_unix());

        if let Some(parent) = self.path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %parent.display(), error = %e, "log sink could not create parent directory");
                return;
            }
        }

        match tokio::fs::OpenOptions::new().create(true).append(true).open(&self.path).await {
            Ok(mut file) => {
                if let Err(e) = file.write_all(entry.as_bytes()).await {
                    warn!(path = %self.path.display(), error = %e, "log sink write failed");
                }
            }
            Err(e) => warn!(path = %self.path.display(), error = %e, "log sink open failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_writes_and_accumulates_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new(dir.path().join("logs.txt"));
        sink.append("ENRICH_SWEEP removed=2").await;
        sink.append("SCAN_STARTED library=/lib").await;

        let contents = tokio::fs::read_to_string(dir.path().join("logs.txt")).await.unwrap();
        assert!(contents.contains("ENRICH_SWEEP removed=2"));
        assert!(contents.contains("SCAN_STARTED library=/lib"));
        assert_eq!(contents.lines().count(), 2);
    }
}
