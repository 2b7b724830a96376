//! Reconciliation events pushed whenever the scan/apply/unapprove pipeline
//! changes what should be visible to a polling client.
//!
//! Mirrors the shape of an SSE notification bus, but the transport itself is
//! out of scope here — this module only owns the bounded ring buffer and the
//! event payloads; a caller wraps the ring in whatever delivery mechanism it
//! wants (polling, websockets, SSE).

use crate::domain::CanonicalPath;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

const HIDE_EVENT_RING_CAPACITY: usize = 200;

/// One record of a path leaving (or re-entering) the visible scan view.
#[derive(Debug, Clone, Serialize)]
pub struct HideEvent {
    pub ts: i64,
    pub path: CanonicalPath,
    pub original_path: CanonicalPath,
    pub modified_scan_ids: Vec<String>,
}

/// Bounded ring buffer of [`HideEvent`]s, capped at 200 entries (spec §3).
pub struct HideEventRing {
    events: Mutex<VecDeque<HideEvent>>,
}

impl Default for HideEventRing {
    fn default() -> Self {
        Self::new()
    }
}

impl HideEventRing {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(HIDE_EVENT_RING_CAPACITY)),
        }
    }

    pub fn push(&self, event: HideEvent) {
        let mut events = self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if events.len() == HIDE_EVENT_RING_CAPACITY {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Returns every event recorded with `ts > since`, oldest first.
    #[must_use]
    pub fn since(&self, since: i64) -> Vec<HideEvent> {
        let events = self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        events.iter().filter(|e| e.ts > since).cloned().collect()
    }
}

/// Lifecycle events emitted by the background services (scan, resolve,
/// apply, watcher, image worker). Consumed by the log sink (C4) and can be
/// fanned out to any transport a caller builds on top.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum PipelineEvent {
    ScanStarted { library: String },
    ScanFinished { library: String, found: usize },
    ScanProgress { library: String, processed: usize, total: usize },
    WatchTriggered { library: String },
    EnrichStarted { path: String },
    EnrichFinished { path: String, matched: bool, provider: Option<String> },
    ApplyStarted { count: usize },
    ApplyFinished { hardlinked: usize, noop: usize, failed: usize },
    UnapplyStarted { count: usize },
    UnapplyFinished { restored: usize, failed: usize },
    SweepFinished { removed: usize },
    ImageFetched { output_key: String, series: String, provider: String },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(ts: i64) -> HideEvent {
        HideEvent {
            ts,
            path: CanonicalPath::new_lexical("/out/a.mkv"),
            original_path: CanonicalPath::new_lexical("/in/a.mkv"),
            modified_scan_ids: vec!["scan-1".to_string()],
        }
    }

    #[test]
    fn ring_bounds_to_capacity() {
        let ring = HideEventRing::new();
        for i in 0..250 {
            ring.push(event(i));
        }
        assert_eq!(ring.since(-1).len(), HIDE_EVENT_RING_CAPACITY);
    }

    #[test]
    fn since_filters_strictly_greater() {
        let ring = HideEventRing::new();
        ring.push(event(10));
        ring.push(event(20));
        let recent = ring.since(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].ts, 20);
    }
}
