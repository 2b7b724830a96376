//! C6 Filesystem Watcher — a recursive `notify` watch per library that
//! debounces bursts of filesystem events into a single incremental scan
//! (spec §4.7 "Watcher").
//!
//! Grounded on the teacher's background-polling idiom (a `tokio::spawn`
//! loop owned by the caller), generalized to a `notify` event stream with
//! the spec's stability threshold / debounce / restart timers.

use crate::models::scan::ScanDiff;
use crate::services::scanner::{ScanEngine, ScanLockRegistry};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// How long the watcher waits after the last event in a burst before
/// considering the filesystem "stable" enough to scan.
const STABILITY_THRESHOLD: Duration = Duration::from_secs(2);
/// How long a burst of events is allowed to keep extending before the
/// debounce window closes regardless.
const DEBOUNCE_WINDOW: Duration = Duration::from_secs(3);
/// Delay before re-establishing the watch after it errors out.
const RESTART_DELAY: Duration = Duration::from_secs(5);

pub struct LibraryWatcher {
    scanner: Arc<ScanEngine>,
    scan_locks: ScanLockRegistry,
}

impl LibraryWatcher {
    #[must_use]
    pub fn new(scanner: Arc<ScanEngine>, scan_locks: ScanLockRegistry) -> Self {
        Self { scanner, scan_locks }
    }

    /// Runs forever, restarting the underlying watch 5s after any error
    /// (spec §4.7 "restart after 5s on error").
    pub async fn watch_forever(&self, library_root: PathBuf, on_rescan: impl Fn(ScanDiff) + Send + Sync) {
        loop {
            if let Err(err) = self.watch_once(&library_root, &on_rescan).await {
                warn!(library = %library_root.display(), error = %err, "watcher failed, restarting in 5s");
                tokio::time::sleep(RESTART_DELAY).await;
            }
        }
    }

    async fn watch_once(
        &self,
        library_root: &Path,
        on_rescan: &(impl Fn(ScanDiff) + Send + Sync),
    ) -> notify::Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;
        watcher.watch(library_root, RecursiveMode::Recursive)?;

        loop {
            let Some(first) = rx.recv().await else { return Ok(()) };
            first?;

            loop {
                match tokio::time::timeout(DEBOUNCE_WINDOW, rx.recv()).await {
                    Ok(Some(next)) => next?,
                    Ok(None) => return Ok(()),
                    Err(_elapsed) => break,
                }
            }

            tokio::time::sleep(STABILITY_THRESHOLD).await;

            let lock_key = format!("scanPath:{}", library_root.display());
            let Some(_guard) = self.scan_locks.try_acquire(&lock_key) else {
                continue;
            };
            let diff = self.scanner.incremental_scan(library_root.to_path_buf()).await;
            on_rescan(diff);
        }
    }
}
