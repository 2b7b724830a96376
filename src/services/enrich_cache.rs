//! C10 Enrichment Cache Manager — the write path into the enrich store.
//! Every resolver result passes through [`EnrichCache::update`], which
//! normalizes denormalized display fields before merging, and the sweep
//! pass (spec §4.6) reconciles the cache against what the scanner currently
//! sees on disk.
//!
//! Grounded on the teacher's `services::library_service_impl` normalize-
//! then-persist pattern, generalized from quality-profile bookkeeping to
//! the title/season normalization rules in spec §4.6.

use crate::domain::CanonicalPath;
use crate::models::provider::{FailureReason, ProviderFailure};
use crate::models::EnrichEntry;
use crate::parser::filename::strip_season_suffix;
use crate::store::CacheStore;
use tracing::info;

pub struct EnrichCache {
    store: CacheStore,
}

impl EnrichCache {
    #[must_use]
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }

    #[must_use]
    pub async fn get(&self, key: &CanonicalPath) -> Option<EnrichEntry> {
        self.store.enrich.read().await.get(key.as_str()).cloned()
    }

    /// Merges `patch` into the entry at `key`, normalizing display fields
    /// first and always carrying the prior apply/hide state forward (spec
    /// §4.6 "update").
    pub async fn update(&self, key: &CanonicalPath, mut patch: EnrichEntry) -> EnrichEntry {
        normalize(&mut patch);
        self.store
            .enrich
            .write_with(|map| {
                let entry = map.entry(key.as_str().to_string()).or_default();
                entry.merge_preserving_apply_state(patch);
                entry.clone()
            })
            .await
    }

    /// Records a failed resolution attempt, replacing any prior failure
    /// (spec §4.6 "record failure").
    pub async fn record_failure(&self, key: &CanonicalPath, reason: FailureReason, code: Option<String>, error: Option<String>, now: i64) {
        self.store
            .enrich
            .write_with(|map| {
                let entry = map.entry(key.as_str().to_string()).or_default();
                match &mut entry.provider_failure {
                    Some(existing) if existing.reason == reason => existing.record_retry(error, now),
                    _ => entry.provider_failure = Some(ProviderFailure::new(entry_provider(entry), reason, code, error, now)),
                }
            })
            .await;
    }

    /// Bumps the skip counter on a cached failure without attempting the
    /// provider call again (spec §4.5 "short-circuit on cached failure").
    pub async fn mark_failure_skip(&self, key: &CanonicalPath, now: i64) {
        self.store
            .enrich
            .write_with(|map| {
                if let Some(entry) = map.get_mut(key.as_str()) {
                    if let Some(failure) = entry.provider_failure.as_mut() {
                        failure.record_skip(now);
                    }
                }
            })
            .await;
    }

    pub async fn clear_failure(&self, key: &CanonicalPath) {
        self.store
            .enrich
            .write_with(|map| {
                if let Some(entry) = map.get_mut(key.as_str()) {
                    entry.provider_failure = None;
                }
            })
            .await;
    }

    /// Drops enrich entries (and their rendered-index rows) whose source
    /// file no longer exists on disk, as long as they were never applied or
    /// hidden — those two states must survive file deletion so unapprove
    /// can still restore them (spec §4.6 "sweep").
    pub async fn sweep(&self, exists: impl Fn(&str) -> bool) -> usize {
        let removed = self
            .store
            .enrich
            .write_with(|map| {
                let dead: Vec<String> = map
                    .iter()
                    .filter(|(path, entry)| !exists(path) && !entry.applied && !entry.hidden)
                    .map(|(path, _)| path.clone())
                    .collect();
                for path in &dead {
                    map.remove(path);
                }
                dead
            })
            .await;

        if !removed.is_empty() {
            self.store
                .rendered_index
                .write_with(|rows| {
                    rows.retain(|_, row| !removed.contains(&row.source.as_str().to_string()));
                })
                .await;
            self.store.enrich.persist_now().await.ok();
            self.store.rendered_index.persist_now().await.ok();
        }

        info!(removed = removed.len(), "ENRICH_SWEEP");
        removed.len()
    }

    pub async fn persist_now(&self) -> Result<(), crate::store::StoreError> {
        self.store.enrich.persist_now().await?;
        self.store.rendered_index.persist_now().await
    }
}

fn entry_provider(entry: &EnrichEntry) -> crate::domain::ProviderId {
    entry
        .provider
        .as_ref()
        .map_or(crate::domain::ProviderId::Anilist, |p| p.provider)
}

/// Applies the denormalization rules spec §4.6 requires on every write:
/// strip a stray colon before `Part N`, strip season suffixes from the
/// series title for non-movies, normalize curly quotes to ASCII, and
/// title-case an all-caps title rather than trusting the source verbatim.
fn normalize(entry: &mut EnrichEntry) {
    if let Some(title) = &entry.title {
        entry.title = Some(normalize_title(title, entry.is_movie.unwrap_or(false)));
    }
    if let Some(series_title) = &entry.series_title {
        entry.series_title = Some(normalize_title(series_title, entry.is_movie.unwrap_or(false)));
    }
}

fn normalize_title(title: &str, is_movie: bool) -> String {
    let mut out = strip_colon_before_part(title);
    if !is_movie {
        out = strip_season_suffix(&out);
    }
    out = normalize_quotes(&out);
    if is_all_caps(&out) {
        out = title_case(&out);
    }
    out
}

fn strip_colon_before_part(title: &str) -> String {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = PATTERN.get_or_init(|| regex::Regex::new(r"(?i):\s*(Part\s+\d+)").unwrap());
    re.replace(title, " $1").trim().to_string()
}

fn normalize_quotes(title: &str) -> String {
    title
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
}

fn is_all_caps(title: &str) -> bool {
    let letters: Vec<char> = title.chars().filter(|c| c.is_alphabetic()).collect();
    !letters.is_empty() && letters.iter().all(|c| c.is_uppercase())
}

fn title_case(title: &str) -> String {
    title
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_merges_and_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&dir.path().join("data")).await.unwrap();
        let cache = EnrichCache::new(store);
        let key = CanonicalPath::new_lexical("/lib/Show/ep.mkv");

        let patch = EnrichEntry {
            title: Some("FRIEREN: BEYOND JOURNEY'S END".into()),
            series_title: Some("FRIEREN SEASON 2".into()),
            is_movie: Some(false),
            ..EnrichEntry::default()
        };

        let merged = cache.update(&key, patch).await;
        assert_eq!(merged.title.as_deref(), Some("Frieren: Beyond Journey's End"));
        assert_eq!(merged.series_title.as_deref(), Some("Frieren"));
    }

    #[tokio::test]
    async fn merge_preserves_apply_state_across_updates() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&dir.path().join("data")).await.unwrap();
        let cache = EnrichCache::new(store);
        let key = CanonicalPath::new_lexical("/lib/Show/ep.mkv");

        cache
            .update(
                &key,
                EnrichEntry { applied: true, applied_at: Some(10), ..EnrichEntry::default() },
            )
            .await;
        let merged = cache
            .update(&key, EnrichEntry { title: Some("Updated".into()), ..EnrichEntry::default() })
            .await;

        assert!(merged.applied);
        assert_eq!(merged.applied_at, Some(10));
    }

    #[tokio::test]
    async fn sweep_removes_only_untouched_missing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&dir.path().join("data")).await.unwrap();
        let cache = EnrichCache::new(store);

        let gone = CanonicalPath::new_lexical("/lib/gone.mkv");
        let applied = CanonicalPath::new_lexical("/lib/applied.mkv");
        cache.update(&gone, EnrichEntry::default()).await;
        cache.update(&applied, EnrichEntry { applied: true, ..EnrichEntry::default() }).await;

        let removed = cache.sweep(|_| false).await;
        assert_eq!(removed, 1);
        assert!(cache.get(&gone).await.is_none());
        assert!(cache.get(&applied).await.is_some());
    }

    #[test]
    fn strips_colon_before_part() {
        assert_eq!(strip_colon_before_part("Show: Part 2"), "Show Part 2");
    }

    #[test]
    fn title_case_normalizes_all_caps() {
        assert_eq!(title_case("FRIEREN BEYOND"), "Frieren Beyond");
    }
}
