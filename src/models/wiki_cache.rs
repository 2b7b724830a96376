//! Wikipedia episode-title cache — spec §3 `WikiEpisodeCacheEntry`.
//!
//! TTL 30 days; a 7-day revalidation window re-parses the page and evicts
//! the entry if the max observed episode number is lower than requested
//! (spec §4.4 Wikipedia, scenario S6).

use serde::{Deserialize, Serialize};

pub const TTL_DAYS: i64 = 30;
pub const REVALIDATE_AFTER_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiRawSnapshot {
    pub page: String,
    pub original: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiEpisodeCacheEntry {
    pub name: String,
    pub raw: WikiRawSnapshot,
    pub ts: i64,
}

/// Builds the `"<normalizedSeries>|s<season>|e<episode>"` cache key.
#[must_use]
pub fn cache_key(normalized_series: &str, season: i32, episode: i32) -> String {
    format!("{normalized_series}|s{season}|e{episode}")
}

impl WikiEpisodeCacheEntry {
    #[must_use]
    pub fn age_days(&self, now: i64) -> i64 {
        (now - self.ts) / 86_400
    }

    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.age_days(now) >= TTL_DAYS
    }

    #[must_use]
    pub fn needs_revalidation(&self, now: i64) -> bool {
        self.age_days(now) >= REVALIDATE_AFTER_DAYS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ts: i64) -> WikiEpisodeCacheEntry {
        WikiEpisodeCacheEntry {
            name: "Sea Beast".into(),
            raw: WikiRawSnapshot {
                page: "List of One Piece episodes (seasons 1–8)".into(),
                original: "\"Sea Beast\"".into(),
            },
            ts,
        }
    }

    #[test]
    fn cache_key_format() {
        assert_eq!(cache_key("one piece", 1, 1100), "one piece|s1|e1100");
    }

    #[test]
    fn revalidation_window_before_ttl() {
        let now = 10 * 86_400;
        let e = entry(0);
        assert!(e.needs_revalidation(now));
        assert!(!e.is_expired(now));
    }

    #[test]
    fn expires_after_thirty_days() {
        let now = 31 * 86_400;
        let e = entry(0);
        assert!(e.is_expired(now));
    }
}
