//! C3 Persistent KV Store: a single `CacheStore` value owning every named
//! on-disk map, behind per-map locks, with debounced atomic persistence.
//! Request handlers and background services hold a cheap `Clone` of it and
//! call typed methods rather than reaching for module-scope globals (spec
//! §9 "Global mutable caches").

pub mod error;
mod persisted;

pub use error::StoreError;
pub use persisted::PersistedMap;

use crate::domain::events::HideEventRing;
use crate::models::{
    ApprovedSeriesImage, EnrichEntry, PathManualIds, RenderedIndexRow, ScanArtifact, ScanCache,
    SeriesManualIds, WikiEpisodeCacheEntry,
};
use crate::models::ParsedEntry;
use rand::RngCore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const ENRICH_DEBOUNCE: Duration = Duration::from_millis(100);
const OTHER_DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Clone)]
pub struct CacheStore {
    pub enrich: PersistedMap<HashMap<String, EnrichEntry>>,
    pub parsed: PersistedMap<HashMap<String, ParsedEntry>>,
    pub rendered_index: PersistedMap<HashMap<String, RenderedIndexRow>>,
    pub scans: PersistedMap<HashMap<String, ScanArtifact>>,
    pub scan_cache: PersistedMap<ScanCache>,
    pub manual_ids_by_series: PersistedMap<HashMap<String, SeriesManualIds>>,
    pub manual_ids_by_path: PersistedMap<HashMap<String, PathManualIds>>,
    pub approved_images: PersistedMap<HashMap<String, ApprovedSeriesImage>>,
    pub wiki_cache: PersistedMap<HashMap<String, WikiEpisodeCacheEntry>>,
    pub hide_events: Arc<HideEventRing>,
    session_key_path: PathBuf,
}

impl CacheStore {
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|source| StoreError::Io { path: data_dir.to_path_buf(), source })?;

        Ok(Self {
            enrich: PersistedMap::load(data_dir.join("enrich-store.json"), ENRICH_DEBOUNCE).await?,
            parsed: PersistedMap::load(data_dir.join("parsed-cache.json"), OTHER_DEBOUNCE).await?,
            rendered_index: PersistedMap::load(data_dir.join("rendered-index.json"), OTHER_DEBOUNCE)
                .await?,
            scans: PersistedMap::load(data_dir.join("scans.json"), OTHER_DEBOUNCE).await?,
            scan_cache: PersistedMap::load(data_dir.join("scan-cache.json"), OTHER_DEBOUNCE).await?,
            manual_ids_by_series: PersistedMap::load(
                data_dir.join("manual-ids-series.json"),
                OTHER_DEBOUNCE,
            )
            .await?,
            manual_ids_by_path: PersistedMap::load(
                data_dir.join("manual-ids-paths.json"),
                OTHER_DEBOUNCE,
            )
            .await?,
            approved_images: PersistedMap::load(
                data_dir.join("approved-series-images.json"),
                OTHER_DEBOUNCE,
            )
            .await?,
            wiki_cache: PersistedMap::load(data_dir.join("wiki-episode-cache.json"), OTHER_DEBOUNCE)
                .await?,
            hide_events: Arc::new(HideEventRing::new()),
            session_key_path: data_dir.join("session.key"),
        })
    }

    /// Flushes every map to disk, bypassing the debounce timers. Called on
    /// graceful shutdown (spec §7).
    pub async fn persist_now(&self) -> Result<(), StoreError> {
        self.enrich.persist_now().await?;
        self.parsed.persist_now().await?;
        self.rendered_index.persist_now().await?;
        self.scans.persist_now().await?;
        self.scan_cache.persist_now().await?;
        self.manual_ids_by_series.persist_now().await?;
        self.manual_ids_by_path.persist_now().await?;
        self.approved_images.persist_now().await?;
        self.wiki_cache.persist_now().await?;
        Ok(())
    }

    /// Loads the persistent 32-byte session secret, generating and saving a
    /// fresh one on first run. Raw bytes on disk, not JSON, per spec §6.1.
    pub async fn ensure_session_secret(&self) -> Result<Vec<u8>, StoreError> {
        match tokio::fs::read(&self.session_key_path).await {
            Ok(bytes) if bytes.len() == 32 => Ok(bytes),
            _ => {
                let mut bytes = vec![0u8; 32];
                rand::rng().fill_bytes(&mut bytes);
                tokio::fs::write(&self.session_key_path, &bytes)
                    .await
                    .map_err(|source| StoreError::Io { path: self.session_key_path.clone(), source })?;
                Ok(bytes)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_data_dir_and_empty_maps() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let store = CacheStore::open(&data_dir).await.unwrap();
        assert!(store.enrich.read().await.is_empty());
        assert!(data_dir.exists());
    }

    #[tokio::test]
    async fn session_secret_is_stable_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let store = CacheStore::open(&data_dir).await.unwrap();
        let first = store.ensure_session_secret().await.unwrap();
        let second = store.ensure_session_secret().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
    }
}
