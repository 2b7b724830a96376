//! Shared application state — the one value every CLI command and
//! background worker holds a handle to (spec §9 "Global mutable caches":
//! "model as a single `CacheStore` value that owns all maps behind a
//! writer; request handlers hold a handle and call typed methods").
//!
//! Provider clients are built per call from the caller's resolved
//! credentials rather than held fixed on `AppState`, since spec §6.2
//! settings (API keys, provider order) are per-user and can change between
//! invocations without restarting the process.

use crate::clients::anidb::AniDbClient;
use crate::clients::anilist::AnilistClient;
use crate::clients::kitsu::KitsuClient;
use crate::clients::rate_limiter::HostPacer;
use crate::clients::tmdb::TmdbClient;
use crate::clients::tvdb::TvdbClient;
use crate::clients::wikipedia::WikipediaClient;
use crate::config::{Config, ResolvedProviderSettings};
use crate::services::enrich_cache::EnrichCache;
use crate::services::image_worker::ImageWorker;
use crate::services::log_sink::LogSink;
use crate::services::resolver::MetadataResolver;
use crate::services::scanner::{ScanEngine, ScanLockRegistry};
use crate::store::CacheStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Everything a CLI command or background worker needs, wrapped for cheap
/// cloning across `tokio::spawn` boundaries.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<Config>>,
    pub store: CacheStore,
    pub pacer: Arc<HostPacer>,
    pub scan_locks: ScanLockRegistry,
    pub log_sink: Arc<LogSink>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        let data_dir = config.general.data_dir.clone();
        let store = CacheStore::open(&data_dir)
            .await
            .with_context(|| format!("opening cache store at {}", data_dir.display()))?;

        let pacer = Arc::new(HostPacer::new());
        crate::clients::configure_default_pacing(&pacer);

        let log_sink = Arc::new(LogSink::new(data_dir.join("logs.txt")));

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            store,
            pacer,
            scan_locks: ScanLockRegistry::new(),
            log_sink,
        })
    }

    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }

    #[must_use]
    pub fn enrich_cache(&self) -> EnrichCache {
        EnrichCache::new(self.store.clone())
    }

    #[must_use]
    pub fn scan_engine(&self) -> ScanEngine {
        ScanEngine::new(self.store.clone())
    }

    /// Builds a resolver wired to whichever providers the caller has
    /// credentials for. Providers without a configured key are simply
    /// absent from the resolver rather than erroring (spec §6.2: each
    /// setting "enables" its segment, it doesn't gate startup).
    #[must_use]
    pub fn build_resolver(&self, resolved: &ResolvedProviderSettings) -> MetadataResolver {
        let anilist = AnilistClient::new(Arc::clone(&self.pacer), resolved.anilist_api_key.clone());
        let tvdb = resolved
            .tvdb_v4_api_key
            .clone()
            .map(|key| TvdbClient::new(Arc::clone(&self.pacer), key, resolved.tvdb_v4_user_pin.clone()));
        let tmdb = resolved.tmdb_api_key.clone().map(|key| TmdbClient::new(Arc::clone(&self.pacer), key));
        let wikipedia = WikipediaClient::new(Arc::clone(&self.pacer));
        let kitsu = KitsuClient::new(Arc::clone(&self.pacer));
        let anidb = self.build_anidb_client(resolved);

        MetadataResolver::new(anilist, tvdb, tmdb, wikipedia, kitsu, anidb)
            .with_wiki_cache(self.store.wiki_cache.clone())
    }

    /// Builds the image worker's provider handles the same way the
    /// resolver's are built, so artwork lookups respect the same
    /// credential precedence (spec §4.11).
    #[must_use]
    pub fn build_image_worker(&self, resolved: &ResolvedProviderSettings) -> ImageWorker {
        let anilist = AnilistClient::new(Arc::clone(&self.pacer), resolved.anilist_api_key.clone());
        let tmdb = resolved.tmdb_api_key.clone().map(|key| TmdbClient::new(Arc::clone(&self.pacer), key));
        let anidb = self.build_anidb_client(resolved);
        ImageWorker::new(self.store.clone(), anilist, tmdb, anidb)
    }

    fn build_anidb_client(&self, resolved: &ResolvedProviderSettings) -> Option<AniDbClient> {
        let username = resolved.anidb_username.clone()?;
        let password = resolved.anidb_password.clone()?;
        Some(AniDbClient::new(
            Arc::clone(&self.pacer),
            username,
            password,
            resolved.anidb_client_name.clone().unwrap_or_else(|| "renamarr".to_string()),
            resolved.anidb_client_version.clone().unwrap_or_else(|| "1".to_string()),
        ))
    }

    /// Flushes every debounced map to disk immediately — called on graceful
    /// shutdown (spec §7).
    pub async fn persist_now(&self) -> Result<()> {
        self.store.persist_now().await.context("flushing cache store")
    }
}
