//! C7 Rate-Paced Client: per-host request pacing shared by every provider
//! adapter in this module.
//!
//! Generalizes a single-key `Mutex<Instant>` (one rate limit per process) to
//! a `DashMap<String, Mutex<Instant>>` keyed by hostname, so AniList and
//! AniDB pace independently instead of sharing one clock.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

pub struct HostPacer {
    last_request_at: DashMap<String, Mutex<Instant>>,
    min_spacing: DashMap<String, Duration>,
}

impl HostPacer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_request_at: DashMap::new(),
            min_spacing: DashMap::new(),
        }
    }

    /// Registers (or overrides) the minimum spacing for a host. Adapters call
    /// this once at construction with their provider's configured interval.
    pub fn set_min_spacing(&self, host: &str, spacing: Duration) {
        self.min_spacing.insert(host.to_string(), spacing);
    }

    /// Blocks until at least `min_spacing[host]` has elapsed since the last
    /// call for that host, then records the new timestamp. A host with no
    /// registered spacing passes through immediately.
    pub async fn wait(&self, host: &str) {
        let Some(spacing) = self.min_spacing.get(host).map(|s| *s) else {
            return;
        };
        if spacing.is_zero() {
            return;
        }

        let entry = self
            .last_request_at
            .entry(host.to_string())
            .or_insert_with(|| Mutex::new(Instant::now() - spacing));
        let mut last = entry.lock().await;

        let elapsed = last.elapsed();
        if elapsed < spacing {
            sleep(spacing - elapsed).await;
        }
        *last = Instant::now();
    }
}

impl Default for HostPacer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unregistered_host_never_waits() {
        let pacer = HostPacer::new();
        let start = Instant::now();
        pacer.wait("unregistered.example").await;
        pacer.wait("unregistered.example").await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn registered_host_enforces_spacing() {
        let pacer = HostPacer::new();
        pacer.set_min_spacing("graphql.anilist.co", Duration::from_millis(80));

        let start = Instant::now();
        pacer.wait("graphql.anilist.co").await;
        pacer.wait("graphql.anilist.co").await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn distinct_hosts_pace_independently() {
        let pacer = HostPacer::new();
        pacer.set_min_spacing("a.example", Duration::from_millis(200));
        pacer.set_min_spacing("b.example", Duration::from_millis(0));

        pacer.wait("a.example").await;
        let start = Instant::now();
        pacer.wait("b.example").await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
