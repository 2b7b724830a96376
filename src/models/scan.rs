//! Scan-side records: `ScanArtifact` (a snapshot shown to a client) and
//! `ScanCache` (bookkeeping that makes subsequent walks incremental).

use crate::domain::CanonicalPath;
use crate::models::EnrichEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanItem {
    pub id: String,
    pub canonical_path: CanonicalPath,
    pub scanned_at: i64,
    pub enrichment: Option<EnrichEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanArtifact {
    pub id: String,
    pub library_id: String,
    pub items: Vec<ScanItem>,
    pub total_count: usize,
    pub generated_at: i64,
    pub username: Option<String>,
    pub incremental_scan_path: Option<String>,
}

impl ScanArtifact {
    #[must_use]
    pub fn new(id: String, library_id: String, items: Vec<ScanItem>, generated_at: i64) -> Self {
        let total_count = items.len();
        Self {
            id,
            library_id,
            items,
            total_count,
            generated_at,
            username: None,
            incremental_scan_path: None,
        }
    }

    /// Drops items whose path is no longer visible (applied or hidden) —
    /// spec §3 invariant: "no item in `s.items` has an enrich entry with
    /// `applied || hidden`".
    pub fn retain_visible(&mut self, is_visible: impl Fn(&CanonicalPath) -> bool) {
        self.items.retain(|item| is_visible(&item.canonical_path));
        self.total_count = self.items.len();
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachedFileStat {
    pub mtime: i64,
    pub size: u64,
    pub id: String,
}

/// Incremental-scan bookkeeping — spec §3 `ScanCache`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanCache {
    pub files: HashMap<String, CachedFileStat>,
    pub dirs: HashMap<String, i64>,
    pub initial_scan_at: Option<i64>,
}

/// Result of diffing a directory tree against a `ScanCache`.
#[derive(Debug, Default)]
pub struct ScanDiff {
    pub to_process: Vec<CanonicalPath>,
    pub removed: Vec<CanonicalPath>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(path: &str) -> ScanItem {
        ScanItem {
            id: path.to_string(),
            canonical_path: CanonicalPath::new_lexical(path),
            scanned_at: 0,
            enrichment: None,
        }
    }

    #[test]
    fn retain_visible_drops_hidden_paths() {
        let mut artifact = ScanArtifact::new(
            "scan-1".into(),
            "lib-1".into(),
            vec![item("/lib/a.mkv"), item("/lib/b.mkv")],
            0,
        );
        artifact.retain_visible(|p| p.as_str() != "/lib/a.mkv");
        assert_eq!(artifact.items.len(), 1);
        assert_eq!(artifact.total_count, 1);
        assert_eq!(artifact.items[0].canonical_path.as_str(), "/lib/b.mkv");
    }
}
