//! C14 Approved-Series Image Worker — periodically fetches cover artwork
//! for series a user has marked "approved" in a given output folder, so the
//! UI never makes a live provider call on a page load (spec §4.11).
//!
//! Grounded on the teacher's background-polling idiom from the scheduler,
//! generalized from a fixed download-check loop to a per-(output root,
//! series) job queue with its own lock + cooldown.

use crate::clients::anidb::AniDbClient;
use crate::clients::anilist::AnilistClient;
use crate::clients::tmdb::TmdbClient;
use crate::domain::now_unix;
use crate::models::approved_image::{cache_key, ApprovedSeriesImage};
use crate::store::CacheStore;
use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_secs(25);
const MAX_FETCHES_PER_CYCLE: usize = 3;
const COOLDOWN: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageProvider {
    Anilist,
    Tmdb,
    Anidb,
}

#[derive(Debug, Clone)]
pub struct SeriesImageRequest {
    pub username: String,
    pub output_root: String,
    pub series_key: String,
    pub series_title: String,
    pub provider: ImageProvider,
}

pub struct ImageWorker {
    store: CacheStore,
    anilist: AnilistClient,
    tmdb: Option<TmdbClient>,
    anidb: Option<AniDbClient>,
    cooldowns: Arc<DashMap<String, Instant>>,
}

impl ImageWorker {
    #[must_use]
    pub fn new(store: CacheStore, anilist: AnilistClient, tmdb: Option<TmdbClient>, anidb: Option<AniDbClient>) -> Self {
        Self { store, anilist, tmdb, anidb, cooldowns: Arc::new(DashMap::new()) }
    }

    /// Background loop: every 25s, fetches up to 3 pending images (spec
    /// §4.11 "Run loop").
    pub async fn run_forever(&self, pending: impl Fn() -> Vec<SeriesImageRequest> + Send + Sync) {
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            for request in pending().into_iter().take(MAX_FETCHES_PER_CYCLE) {
                if let Err(err) = self.fetch_one(&request).await {
                    warn!(series = %request.series_title, error = %err, "approved-series image fetch failed");
                }
            }
        }
    }

    /// Fetches and caches artwork for one series, honoring the per-(output
    /// root, series) lock and the 3s cooldown (spec §4.11).
    pub async fn fetch_one(&self, request: &SeriesImageRequest) -> Result<()> {
        let lock_key = format!("{}::{}::{}", request.username, request.output_root, request.series_key);
        if let Some(last) = self.cooldowns.get(&lock_key) {
            if last.elapsed() < COOLDOWN {
                return Ok(());
            }
        }
        self.cooldowns.insert(lock_key, Instant::now());

        let Some((provider, url, media_id)) = self.fetch_image(request).await? else {
            return Ok(());
        };

        let key = cache_key(&request.output_root, &request.series_key);
        let fetched_at = now_unix();
        self.store
            .approved_images
            .write_with(|map| {
                map.insert(key, ApprovedSeriesImage { provider, image_url: url, summary: None, media_id, fetched_at });
            })
            .await;

        Ok(())
    }

    async fn fetch_image(&self, request: &SeriesImageRequest) -> Result<Option<(String, String, Option<String>)>> {
        match request.provider {
            ImageProvider::Anilist => self.fetch_anilist(&request.series_title).await,
            ImageProvider::Tmdb => self.fetch_tmdb(&request.series_title).await,
            ImageProvider::Anidb => self.fetch_anidb(&request.series_title).await,
        }
    }

    async fn fetch_anilist(&self, title: &str) -> Result<Option<(String, String, Option<String>)>> {
        let Some(candidate) = self.anilist.search_series(title, None, false).await? else { return Ok(None) };
        let Some(url) = self.anilist.fetch_cover_image(candidate.raw.id).await? else { return Ok(None) };
        Ok(Some(("anilist".to_string(), url, Some(candidate.raw.id.to_string()))))
    }

    async fn fetch_tmdb(&self, title: &str) -> Result<Option<(String, String, Option<String>)>> {
        let Some(tmdb) = &self.tmdb else { return Ok(None) };
        let Some(candidate) = tmdb.search_tv(title).await? else { return Ok(None) };
        let Some(url) = tmdb.fetch_tv_poster(candidate.id).await? else { return Ok(None) };
        Ok(Some(("tmdb".to_string(), url, Some(candidate.id.to_string()))))
    }

    /// AniDB lookup by series title, falling back to AniList artwork
    /// (keyed by the same resolved AID) when AniDB has no picture on file
    /// (spec §4.11 "AniDB").
    async fn fetch_anidb(&self, title: &str) -> Result<Option<(String, String, Option<String>)>> {
        let Some(anidb) = &self.anidb else { return Ok(None) };
        let Some(aid) = anidb.find_anime_id(title).await? else { return Ok(None) };

        if let Some(url) = anidb.fetch_picture_url(aid).await? {
            return Ok(Some(("anidb".to_string(), url, Some(aid.to_string()))));
        }
        if let Some(url) = self.anilist.fetch_cover_image(aid).await? {
            return Ok(Some(("anilist".to_string(), url, Some(aid.to_string()))));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cooldown_blocks_a_second_immediate_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&dir.path().join("data")).await.unwrap();
        let pacer = Arc::new(crate::clients::rate_limiter::HostPacer::new());
        let worker = ImageWorker::new(store, AnilistClient::new(pacer, None), None, None);

        let key = "demo::root::series".to_string();
        worker.cooldowns.insert(key, Instant::now());

        let request = SeriesImageRequest {
            username: "demo".into(),
            output_root: "root".into(),
            series_key: "series".into(),
            series_title: "Frieren".into(),
            provider: ImageProvider::Tmdb,
        };
        // tmdb client is None, so a cache-miss fetch_image would return
        // Ok(None) regardless; this only proves the cooldown short-circuits
        // before any provider call is attempted.
        worker.fetch_one(&request).await.unwrap();
        assert!(worker.cooldowns.get("demo::root::series").unwrap().elapsed() < COOLDOWN);
    }
}
