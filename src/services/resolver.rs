//! C9 Metadata Resolver — the pipeline's orchestration core. Fixes a series
//! against AniList (or manual IDs), then fills in an episode title by
//! walking the provider fallback chain, merging everything into an
//! `EnrichEntry` (spec §4.5).

use crate::clients::anidb::AniDbClient;
use crate::clients::anilist::{infer_season_number, AnilistClient};
use crate::clients::kitsu::KitsuClient;
use crate::clients::tmdb::TmdbClient;
use crate::clients::tvdb::TvdbClient;
use crate::clients::wikipedia::WikipediaClient;
use crate::domain::ProviderId;
use crate::models::provider::{
    FailureReason, ProviderBlock, ProviderFailure, ProviderRaw, ProviderSources, ProviderTitleSource, TmdbMediaKind,
    TmdbRaw,
};
use crate::models::wiki_cache::{cache_key, WikiEpisodeCacheEntry, WikiRawSnapshot};
use crate::models::{EnrichEntry, ParsedEntry, PathManualIds, SeriesManualIds};
use crate::parser::filename::{parse_filename, strip_season_suffix};
use crate::store::PersistedMap;
use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

const SEASON_FOLDER_TOKENS: &[&str] = &["season", "specials", "extras"];
const EXTRAS_FOLDER_TOKENS: &[&str] = &["featurettes", "extras", "bonus", "ova", "specials"];

/// A normalized view of [`crate::models::manual_ids`] lookups, passed in by
/// the caller (the resolver itself does not touch the store).
#[derive(Debug, Clone, Default)]
pub struct ManualIds {
    pub anilist: Option<i32>,
    pub tmdb: Option<i64>,
    pub tvdb: Option<i64>,
    pub anidb_episode: Option<i32>,
}

pub struct ResolveRequest<'a> {
    pub canonical_path: &'a Path,
    pub library_root: &'a Path,
    pub provider_order: Vec<ProviderId>,
    pub manual_ids: ManualIds,
    pub force: bool,
    pub force_hash: bool,
    pub skip_anime_providers: bool,
    pub now: i64,
}

pub struct MetadataResolver {
    anilist: AnilistClient,
    tvdb: Option<TvdbClient>,
    tmdb: Option<TmdbClient>,
    wikipedia: WikipediaClient,
    kitsu: KitsuClient,
    anidb: Option<AniDbClient>,
    wiki_cache: Option<PersistedMap<HashMap<String, WikiEpisodeCacheEntry>>>,
}

impl MetadataResolver {
    #[must_use]
    pub fn new(
        anilist: AnilistClient,
        tvdb: Option<TvdbClient>,
        tmdb: Option<TmdbClient>,
        wikipedia: WikipediaClient,
        kitsu: KitsuClient,
        anidb: Option<AniDbClient>,
    ) -> Self {
        Self { anilist, tvdb, tmdb, wikipedia, kitsu, anidb, wiki_cache: None }
    }

    /// Attaches the persistent Wikipedia episode-title cache (spec §3
    /// `WikiEpisodeCacheEntry`, scenario S6). Without one, the Wikipedia
    /// fallback step just fetches live every time.
    #[must_use]
    pub fn with_wiki_cache(mut self, cache: PersistedMap<HashMap<String, WikiEpisodeCacheEntry>>) -> Self {
        self.wiki_cache = Some(cache);
        self
    }

    /// Resolves a single file, returning the merged entry to fold into the
    /// enrich cache. `cached` is the entry's current state, consulted for
    /// the short-circuit rules (spec §4.5 "Short-circuit rules").
    pub async fn resolve(&self, request: ResolveRequest<'_>, cached: Option<&EnrichEntry>) -> Result<EnrichEntry> {
        if !request.force {
            if let Some(cached) = cached {
                if let Some(failure) = &cached.provider_failure {
                    debug!(path = %request.canonical_path.display(), "resolver short-circuit: cached provider failure");
                    let mut entry = cached.clone();
                    if let Some(f) = entry.provider_failure.as_mut() {
                        let _ = failure;
                        f.record_skip(request.now);
                    }
                    return Ok(entry);
                }
                if cached.provider.as_ref().is_some_and(ProviderBlock::is_complete) {
                    return Ok(cached.clone());
                }
            }
        }

        let relative = strip_library_root(request.canonical_path, request.library_root);
        let basename = relative
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let parsed = parse_filename(basename, request.now);

        let candidates = candidate_series_names(&relative, &parsed);
        let Some(primary_candidate) = candidates.first().cloned() else {
            return Ok(Self::parser_only_entry(parsed, request.now));
        };

        let segments = split_provider_segments(&request.provider_order, &request.manual_ids);
        // spec §4.4 "AniDB": expensive ED2K hashing only runs when AniDB is
        // the user's first-choice provider, or when explicitly forced.
        let anidb_is_first_choice = request.provider_order.first() == Some(&crate::domain::ProviderId::Anidb);
        let should_hash = request.force_hash || anidb_is_first_choice;

        let mut provider_block: Option<ProviderBlock> = None;
        let mut last_error: Option<String> = None;

        for segment in segments {
            match segment {
                Segment::Anidb => {
                    if request.skip_anime_providers {
                        continue;
                    }
                    match self.try_anidb(request.canonical_path, should_hash).await {
                        Ok(Some(block)) => {
                            provider_block = Some(block);
                            break;
                        }
                        Ok(None) => {}
                        Err(err) => last_error = Some(err.to_string()),
                    }
                }
                Segment::MetaLookup(providers) => {
                    match self
                        .try_meta_lookup(&primary_candidate, &candidates, &parsed, &providers, &request)
                        .await
                    {
                        Ok(Some(block)) => {
                            provider_block = Some(block);
                            break;
                        }
                        Ok(None) => {}
                        Err(err) => last_error = Some(err.to_string()),
                    }
                }
            }
        }

        let mut entry = EnrichEntry {
            parsed: Some(parsed.clone()),
            timestamp: request.now,
            cached_at: request.now,
            ..EnrichEntry::default()
        };

        match provider_block {
            Some(block) => {
                if let Some(raw) = &block.raw {
                    let (is_movie, media_format) = infer_media_format(raw);
                    entry.is_movie = is_movie;
                    entry.media_format = media_format;
                }
                entry.title = Some(block.title.clone());
                entry.series_title = Some(block.title.clone());
                entry.series_title_english = block.series_title_english.clone();
                entry.series_title_romaji = block.series_title_romaji.clone();
                entry.series_title_exact = block.series_title_exact.clone();
                entry.original_series_title = block.original_series_title.clone();
                entry.year = block.year.clone();
                entry.season = block.season;
                entry.episode = block.episode;
                entry.episode_title = block.episode_title.clone();
                entry.rendered_name = block.rendered_name.clone();
                entry.provider = Some(block);
                entry.provider_failure = None;
            }
            None => {
                let reason = if last_error.is_some() { FailureReason::Error } else { FailureReason::NoMatch };
                entry.provider_failure = Some(match cached.and_then(|c| c.provider_failure.clone()) {
                    Some(mut existing) => {
                        existing.record_retry(last_error, request.now);
                        existing
                    }
                    None => ProviderFailure::new(ProviderId::Anilist, reason, None, last_error, request.now),
                });
            }
        }

        Ok(entry)
    }

    fn parser_only_entry(parsed: ParsedEntry, now: i64) -> EnrichEntry {
        EnrichEntry {
            title: Some(parsed.title.clone()),
            series_title: Some(parsed.title.clone()),
            year: parsed.year.clone(),
            season: parsed.season,
            episode: parsed.episode,
            episode_title: parsed.episode_title.clone(),
            parsed: Some(parsed),
            timestamp: now,
            cached_at: now,
            ..EnrichEntry::default()
        }
    }

    async fn try_anidb(&self, path: &Path, should_hash: bool) -> Result<Option<ProviderBlock>> {
        let Some(anidb) = &self.anidb else { return Ok(None) };
        if !should_hash {
            return Ok(None);
        }
        let hash = AniDbClient::hash_file(path).await?;
        let Some(hit) = anidb.fetch_episode_by_hash(&hash).await? else {
            return Ok(None);
        };
        Ok(Some(ProviderBlock {
            provider: ProviderId::Anidb,
            id: hit.raw.aid.to_string(),
            title: hit.title.clone(),
            year: None,
            season: None,
            episode: hit.raw.eid,
            episode_title: Some(hit.title.clone()),
            rendered_name: None,
            matched: true,
            source: "AniDB".to_string(),
            raw: Some(ProviderRaw::Anidb(hit.raw)),
            series_title_english: None,
            series_title_romaji: None,
            series_title_exact: None,
            original_series_title: None,
            sources: None,
        }))
    }

    /// Drives series matching through whichever providers the caller
    /// actually asked for (spec §4.5 "Provider ordering"): AniList when it's
    /// in the caller's order (anime episode-title fallback driver), TMDB as
    /// an order-driven movie/series path otherwise — AniList alone can never
    /// resolve a movie, which is exactly scenario S2 (`providerOrder =
    /// [tmdb]`).
    async fn try_meta_lookup(
        &self,
        primary: &str,
        candidates: &[String],
        parsed: &ParsedEntry,
        providers: &[ProviderId],
        request: &ResolveRequest<'_>,
    ) -> Result<Option<ProviderBlock>> {
        if providers.contains(&ProviderId::Anilist) || request.manual_ids.anilist.is_some() {
            if let Some(block) = self.try_anilist_series(primary, candidates, parsed, providers, request).await? {
                return Ok(Some(block));
            }
        }

        if providers.contains(&ProviderId::Tmdb) {
            if let Some(block) = self.try_tmdb_series_or_movie(candidates, parsed).await? {
                return Ok(Some(block));
            }
        }

        Ok(None)
    }

    async fn try_anilist_series(
        &self,
        primary: &str,
        candidates: &[String],
        parsed: &ParsedEntry,
        providers: &[ProviderId],
        request: &ResolveRequest<'_>,
    ) -> Result<Option<ProviderBlock>> {
        let from_parent = primary != parsed.title;

        let anilist_hit = if let Some(manual_id) = request.manual_ids.anilist {
            self.anilist.fetch_by_id(manual_id).await?
        } else {
            let mut found = None;
            for candidate in candidates {
                if let Some(hit) = self.anilist.search_series(candidate, parsed.season, from_parent).await? {
                    found = Some(hit);
                    break;
                }
            }
            found
        };

        let Some(mut anilist) = anilist_hit else {
            return Ok(None);
        };

        // spec §4.5 step 5 / scenario S3: a matched sequel that hasn't aired
        // the requested episode yet collapses to its PARENT/PREQUEL/SOURCE
        // relation, with the season number inferred from the sequel's own
        // title before we discard it.
        let mut detected_season_number = None;
        if let Some(episode) = parsed.episode {
            if anilist.episode_not_yet_aired(episode) {
                if let Some(parent) = anilist.parent_relation.clone() {
                    detected_season_number = infer_season_number(&anilist.raw.title_romaji)
                        .or_else(|| infer_season_number(&anilist.resolved_title));
                    if let Some(parent_hit) = self.anilist.fetch_by_id(parent.related_id).await? {
                        debug!(
                            child = anilist.resolved_title,
                            parent = parent_hit.resolved_title,
                            "anilist sequel has not aired requested episode, collapsing to parent"
                        );
                        anilist = parent_hit;
                    }
                }
            }
        }

        let series_title = anilist.resolved_title.clone();
        let mut episode_title = None;
        let mut episode_raw: Option<ProviderRaw> = None;

        if let (Some(season), Some(episode)) = (parsed.season, parsed.episode) {
            let (title, raw) = self
                .episode_fallback_chain(&series_title, season, episode, providers, request)
                .await?;
            episode_title = title;
            episode_raw = raw;
        }

        let season = detected_season_number.or(parsed.season);
        let year = anilist.raw.season_year.map(|y| y.to_string()).or_else(|| parsed.year.clone());

        Ok(Some(ProviderBlock {
            provider: ProviderId::Anilist,
            id: anilist.raw.id.to_string(),
            title: series_title.clone(),
            year,
            season,
            episode: parsed.episode,
            episode_title,
            rendered_name: None,
            matched: true,
            source: "AniList".to_string(),
            raw: episode_raw.or(Some(ProviderRaw::Anilist(anilist.raw.clone()))),
            series_title_english: Some(series_title.clone()),
            series_title_romaji: Some(anilist.raw.title_romaji.clone()),
            series_title_exact: Some(series_title.clone()),
            original_series_title: anilist.raw.title_native.clone(),
            sources: Some(ProviderSources {
                series: Some(ProviderTitleSource {
                    id: "anilist".into(),
                    display: series_title,
                    detail: anilist.parent_relation.map(|r| r.related_title),
                }),
                episode: None,
            }),
        }))
    }

    /// TMDB-driven series/movie resolution for when AniList isn't in the
    /// caller's provider order, or didn't match (spec §4.4 "TMDB", scenario
    /// S2). A filename with neither a parsed season nor episode is treated
    /// as a movie candidate and goes through `/search/movie`; otherwise it's
    /// a TV candidate resolved via `/search/tv` + the per-episode endpoint.
    async fn try_tmdb_series_or_movie(
        &self,
        candidates: &[String],
        parsed: &ParsedEntry,
    ) -> Result<Option<ProviderBlock>> {
        let Some(tmdb) = &self.tmdb else { return Ok(None) };

        if parsed.season.is_none() && parsed.episode.is_none() {
            for candidate in candidates {
                let Some(hit) = tmdb.search_movie(candidate).await? else { continue };
                let year = hit.year.clone().or_else(|| parsed.year.clone());
                return Ok(Some(ProviderBlock {
                    provider: ProviderId::Tmdb,
                    id: hit.id.to_string(),
                    title: hit.title.clone(),
                    year: year.clone(),
                    season: None,
                    episode: None,
                    episode_title: None,
                    rendered_name: None,
                    matched: true,
                    source: "TMDB".to_string(),
                    raw: Some(ProviderRaw::Tmdb(TmdbRaw {
                        id: hit.id,
                        media_kind: TmdbMediaKind::Movie,
                        release_date: year,
                        used_translation: false,
                    })),
                    series_title_english: Some(hit.title.clone()),
                    series_title_romaji: None,
                    series_title_exact: Some(hit.title.clone()),
                    original_series_title: None,
                    sources: Some(ProviderSources {
                        series: Some(ProviderTitleSource { id: "tmdb".into(), display: hit.title, detail: None }),
                        episode: None,
                    }),
                }));
            }
            return Ok(None);
        }

        let season = parsed.season.unwrap_or(1);
        let Some(episode) = parsed.episode else { return Ok(None) };

        for candidate in candidates {
            let Some(series) = tmdb.search_tv(candidate).await? else { continue };
            let episode_hit = tmdb.fetch_episode(series.id, season, episode).await?;

            let (episode_title, raw) = match episode_hit {
                Some(hit) => (Some(hit.title), ProviderRaw::Tmdb(hit.raw)),
                None => (
                    None,
                    ProviderRaw::Tmdb(TmdbRaw {
                        id: series.id,
                        media_kind: TmdbMediaKind::Tv,
                        release_date: series.year.clone(),
                        used_translation: false,
                    }),
                ),
            };

            let year = series.year.clone().or_else(|| parsed.year.clone());
            return Ok(Some(ProviderBlock {
                provider: ProviderId::Tmdb,
                id: series.id.to_string(),
                title: series.title.clone(),
                year,
                season: Some(season),
                episode: Some(episode),
                episode_title,
                rendered_name: None,
                matched: true,
                source: "TMDB".to_string(),
                raw: Some(raw),
                series_title_english: Some(series.title.clone()),
                series_title_romaji: None,
                series_title_exact: Some(series.title.clone()),
                original_series_title: None,
                sources: Some(ProviderSources {
                    series: Some(ProviderTitleSource { id: "tmdb".into(), display: series.title, detail: None }),
                    episode: None,
                }),
            }));
        }

        Ok(None)
    }

    /// `manual AniDB episode ID → TVDB → TMDB → Wikipedia → Kitsu`, rejecting
    /// placeholders at every step (spec §4.5 "Episode-title fallback chain").
    async fn episode_fallback_chain(
        &self,
        series_title: &str,
        season: i32,
        episode: i32,
        providers: &[ProviderId],
        request: &ResolveRequest<'_>,
    ) -> Result<(Option<String>, Option<ProviderRaw>)> {
        if let Some(eid) = request.manual_ids.anidb_episode {
            if let Some(anidb) = &self.anidb {
                if let Some(hit) = anidb.fetch_episode_by_id(eid).await? {
                    return Ok((Some(hit.title), Some(ProviderRaw::Anidb(hit.raw))));
                }
            }
        }

        if providers.contains(&ProviderId::Tvdb) {
            if let Some(tvdb) = &self.tvdb {
                if let Some(series) = tvdb.search_series(series_title).await? {
                    if let Some(hit) = tvdb.fetch_episode(series.id, season, episode).await? {
                        return Ok((Some(hit.title), Some(ProviderRaw::Tvdb(hit.raw))));
                    }
                }
            }
        }

        if providers.contains(&ProviderId::Tmdb) {
            if let Some(tmdb) = &self.tmdb {
                if let Some(series) = tmdb.search_tv(series_title).await? {
                    if let Some(hit) = tmdb.fetch_episode(series.id, season, episode).await? {
                        return Ok((Some(hit.title), Some(ProviderRaw::Tmdb(hit.raw))));
                    }
                }
            }
        }

        if providers.contains(&ProviderId::Wikipedia) {
            if let Some((title, raw)) = self.wikipedia_lookup(series_title, season, episode, request.now).await? {
                return Ok((Some(title), Some(raw)));
            }
        }

        if providers.contains(&ProviderId::Kitsu) {
            if let Some(series) = self.kitsu.search_series(series_title).await? {
                if let Some(hit) = self.kitsu.fetch_episode(&series.id, episode).await? {
                    return Ok((Some(hit.title), Some(ProviderRaw::Kitsu(hit.raw))));
                }
            }
        }

        warn!(series = series_title, season, episode, "no episode title found in fallback chain");
        Ok((None, None))
    }

    /// Consults the 30-day-TTL / 7-day-revalidation Wikipedia cache before
    /// hitting the network (spec §4.4 Wikipedia, §3 `WikiEpisodeCacheEntry`,
    /// scenario S6): a fresh hit returns immediately; an entry past its
    /// revalidation window is re-fetched and evicted if the page's observed
    /// max episode number has fallen behind what was requested.
    async fn wikipedia_lookup(
        &self,
        series_title: &str,
        season: i32,
        episode: i32,
        now: i64,
    ) -> Result<Option<(String, ProviderRaw)>> {
        let key = cache_key(&series_title.to_lowercase(), season, episode);

        if let Some(cache) = &self.wiki_cache {
            if let Some(entry) = cache.read().await.get(&key).cloned() {
                if !entry.is_expired(now) && !entry.needs_revalidation(now) {
                    return Ok(Some((
                        entry.name,
                        ProviderRaw::Wikipedia(crate::models::provider::WikiRaw {
                            page_title: entry.raw.page,
                            season_heading: entry.raw.original,
                        }),
                    )));
                }
            }
        }

        let Some(hit) = self.wikipedia.fetch_episode(series_title, season, episode).await? else {
            return Ok(None);
        };

        if hit.max_episode_seen < episode {
            // Page hasn't caught up to the requested episode yet; evict any
            // stale cached entry and report no hit rather than a stale one.
            if let Some(cache) = &self.wiki_cache {
                cache.write_with(|map| { map.remove(&key); }).await;
            }
            return Ok(None);
        }

        if let Some(cache) = &self.wiki_cache {
            let entry = WikiEpisodeCacheEntry {
                name: hit.title.clone(),
                raw: WikiRawSnapshot { page: hit.raw.page_title.clone(), original: hit.raw.season_heading.clone() },
                ts: now,
            };
            cache.write_with(|map| { map.insert(key, entry); }).await;
        }

        Ok(Some((hit.title.clone(), ProviderRaw::Wikipedia(hit.raw))))
    }
}

enum Segment {
    Anidb,
    MetaLookup(Vec<ProviderId>),
}

/// Splits the caller's provider order into AniDB-alone segments plus
/// batched "metaLookup" segments, and reorders manual-ID providers first
/// (spec §4.5 "Provider ordering").
fn split_provider_segments(order: &[ProviderId], manual: &ManualIds) -> Vec<Segment> {
    let mut ordered = order.to_vec();
    if manual.anidb_episode.is_some() {
        ordered.retain(|p| *p != ProviderId::Anidb);
        ordered.insert(0, ProviderId::Anidb);
    }

    let mut segments = Vec::new();
    let mut batch = Vec::new();
    for provider in ordered {
        if provider == ProviderId::Anidb {
            if !batch.is_empty() {
                segments.push(Segment::MetaLookup(std::mem::take(&mut batch)));
            }
            segments.push(Segment::Anidb);
        } else {
            batch.push(provider);
        }
    }
    if !batch.is_empty() {
        segments.push(Segment::MetaLookup(batch));
    }
    segments
}

/// Strips the configured library-root prefix so series-folder heuristics
/// never see host mount points like `/mnt/Tor/` (spec §4.5 precondition 1).
fn strip_library_root(path: &Path, library_root: &Path) -> std::path::PathBuf {
    path.strip_prefix(library_root).map(Path::to_path_buf).unwrap_or_else(|_| path.to_path_buf())
}

fn is_season_folder(name: &str) -> bool {
    let lower = name.to_lowercase();
    SEASON_FOLDER_TOKENS.iter().any(|t| lower.contains(t))
        || lower.starts_with('s') && lower.chars().skip(1).all(|c| c.is_ascii_digit())
}

fn is_extras_folder(name: &str) -> bool {
    let lower = name.to_lowercase();
    EXTRAS_FOLDER_TOKENS.iter().any(|t| lower.contains(t))
}

fn looks_episode_like(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-' || c == ' ')
}

/// Candidate series names in priority order: parsed title, then the
/// nearest parent-folder segment that isn't a season/extras folder and
/// doesn't look episode-like, then a season-suffix-stripped variant of
/// each (spec §4.5 precondition 2-3).
fn candidate_series_names(relative_path: &Path, parsed: &ParsedEntry) -> Vec<String> {
    let mut candidates = Vec::new();

    let parsed_looks_episode_like = parsed.title_looks_episode_like();
    if !parsed_looks_episode_like && !parsed.title.trim().is_empty() {
        candidates.push(parsed.title.clone());
    }

    let parent_candidate = relative_path
        .parent()
        .into_iter()
        .flat_map(Path::components)
        .filter_map(|c| c.as_os_str().to_str())
        .rev()
        .find(|segment| !is_season_folder(segment) && !is_extras_folder(segment) && !looks_episode_like(segment));

    if let Some(parent) = parent_candidate {
        let elevate = parsed.starts_with_episode || parsed_looks_episode_like;
        if elevate {
            candidates.insert(0, parent.to_string());
        } else {
            candidates.push(parent.to_string());
        }
    }

    let stripped: Vec<String> = candidates.iter().map(|c| strip_season_suffix(c)).filter(|s| !s.is_empty()).collect();
    for s in stripped {
        if !candidates.contains(&s) {
            candidates.push(s);
        }
    }

    if candidates.is_empty() {
        candidates.push(parsed.title.clone());
    }
    candidates
}

/// Builds [`ManualIds`] from the store's two manual-ID maps (series-title
/// keyed and canonical-path keyed) for a single file (spec §9 "single flat
/// namespace" resolved into two maps; see [`crate::models::manual_ids`]).
#[must_use]
pub fn manual_ids_for(
    series_map: Option<&SeriesManualIds>,
    path_map: Option<&PathManualIds>,
) -> ManualIds {
    ManualIds {
        anilist: series_map.and_then(|s| s.anilist),
        tmdb: series_map.and_then(|s| s.tmdb),
        tvdb: series_map.and_then(|s| s.tvdb),
        anidb_episode: path_map.and_then(|p| p.anidb_episode),
    }
}

/// Spec §4.5 "Media-format inference": scans a matched provider's raw
/// payload for format tokens (`MOVIE`, `TV`, `OVA`, `ONA`, `SPECIAL`, TMDB's
/// movie-vs-tv endpoint split, …). A movie signal without an opposing
/// series signal sets `is_movie = true`; a series signal sets it `false`;
/// providers that carry no type information at all (AniDB) leave it
/// unknown rather than guessing.
fn infer_media_format(raw: &ProviderRaw) -> (Option<bool>, Option<String>) {
    match raw {
        ProviderRaw::Anilist(r) => (r.format.as_deref().and_then(movie_signal_from_token), r.format.clone()),
        ProviderRaw::Tmdb(r) => {
            let is_movie = matches!(r.media_kind, TmdbMediaKind::Movie);
            let format = if is_movie { "MOVIE" } else { "TV" };
            (Some(is_movie), Some(format.to_string()))
        }
        ProviderRaw::Tvdb(_) | ProviderRaw::Wikipedia(_) | ProviderRaw::Kitsu(_) => (Some(false), Some("TV".to_string())),
        ProviderRaw::Anidb(_) => (None, None),
    }
}

fn movie_signal_from_token(token: &str) -> Option<bool> {
    match token.to_uppercase().as_str() {
        "MOVIE" | "FILM" => Some(true),
        "TV" | "TV_SHORT" | "OVA" | "ONA" | "SPECIAL" | "MUSIC" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parsed(title: &str, season: Option<i32>, episode: Option<i32>, starts_with_episode: bool) -> ParsedEntry {
        ParsedEntry {
            title: title.to_string(),
            season,
            episode,
            starts_with_episode,
            ..ParsedEntry::default()
        }
    }

    #[test]
    fn candidate_names_prefer_parsed_title_then_parent_folder() {
        let relative = PathBuf::from("Frieren/Season 01/S01E05 - Orejihanki.mkv");
        let p = parsed("Frieren", Some(1), Some(5), false);
        let candidates = candidate_series_names(&relative, &p);
        assert_eq!(candidates[0], "Frieren");
    }

    #[test]
    fn elevates_parent_folder_when_basename_starts_with_episode() {
        let relative = PathBuf::from("Frieren/Season 01/S01E05 - Orejihanki.mkv");
        let p = parsed("", Some(1), Some(5), true);
        let candidates = candidate_series_names(&relative, &p);
        assert_eq!(candidates[0], "Frieren");
    }

    #[test]
    fn skips_extras_and_season_folders_for_parent_candidate() {
        let relative = PathBuf::from("One Piece/Specials/Featurettes/special.mkv");
        let p = parsed("", None, None, true);
        let candidates = candidate_series_names(&relative, &p);
        assert_eq!(candidates[0], "One Piece");
    }

    #[test]
    fn split_segments_batches_non_anidb_providers_together() {
        let order = vec![ProviderId::Anidb, ProviderId::Anilist, ProviderId::Tvdb, ProviderId::Tmdb];
        let segments = split_provider_segments(&order, &ManualIds::default());
        assert_eq!(segments.len(), 2);
        assert!(matches!(segments[0], Segment::Anidb));
        assert!(matches!(&segments[1], Segment::MetaLookup(p) if p.len() == 3));
    }

    #[test]
    fn manual_anidb_episode_reorders_anidb_first() {
        let order = vec![ProviderId::Anilist, ProviderId::Tvdb, ProviderId::Anidb];
        let manual = ManualIds { anidb_episode: Some(5), ..ManualIds::default() };
        let segments = split_provider_segments(&order, &manual);
        assert!(matches!(segments[0], Segment::Anidb));
    }

    #[test]
    fn strip_library_root_removes_configured_prefix() {
        let stripped = strip_library_root(Path::new("/mnt/Tor/Frieren/ep.mkv"), Path::new("/mnt/Tor"));
        assert_eq!(stripped, PathBuf::from("Frieren/ep.mkv"));
    }

    fn bare_resolver() -> MetadataResolver {
        let pacer = std::sync::Arc::new(crate::clients::rate_limiter::HostPacer::new());
        MetadataResolver::new(
            AnilistClient::new(pacer.clone(), None),
            None,
            None,
            WikipediaClient::new(pacer.clone()),
            KitsuClient::new(pacer),
            None,
        )
    }

    /// Scenario S6 (fresh branch): a cache entry within the revalidation
    /// window is returned without touching the network.
    #[tokio::test]
    async fn wikipedia_lookup_returns_fresh_cache_hit_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistedMap::<HashMap<String, WikiEpisodeCacheEntry>>::load(
            dir.path().join("wiki-episode-cache.json"),
            std::time::Duration::from_millis(50),
        )
        .await
        .unwrap();

        let now = 10 * 86_400;
        let key = cache_key("one piece", 1, 1100);
        cache
            .write_with(|map| {
                map.insert(
                    key,
                    WikiEpisodeCacheEntry {
                        name: "Sea Beast".into(),
                        raw: WikiRawSnapshot { page: "List of One Piece episodes".into(), original: "Season 1".into() },
                        ts: now - 86_400, // 1 day old: fresh, no revalidation needed
                    },
                );
            })
            .await;

        let resolver = bare_resolver().with_wiki_cache(cache);
        let (title, raw) = resolver.wikipedia_lookup("One Piece", 1, 1100, now).await.unwrap().unwrap();
        assert_eq!(title, "Sea Beast");
        assert!(matches!(raw, ProviderRaw::Wikipedia(_)));
    }

    /// Scenario S2: a TMDB movie hit sets `is_movie = true` via the generic
    /// raw-payload format scan, not a dedicated movie-only field.
    #[test]
    fn tmdb_movie_raw_infers_is_movie_true() {
        let raw = ProviderRaw::Tmdb(TmdbRaw {
            id: 1,
            media_kind: TmdbMediaKind::Movie,
            release_date: Some("2010".into()),
            used_translation: false,
        });
        assert_eq!(infer_media_format(&raw), (Some(true), Some("MOVIE".to_string())));
    }

    #[test]
    fn tmdb_tv_raw_infers_is_movie_false() {
        let raw = ProviderRaw::Tmdb(TmdbRaw {
            id: 1,
            media_kind: TmdbMediaKind::Tv,
            release_date: None,
            used_translation: false,
        });
        assert_eq!(infer_media_format(&raw), (Some(false), Some("TV".to_string())));
    }

    #[test]
    fn anilist_raw_format_token_drives_is_movie() {
        let mut raw = crate::models::provider::AniListRaw { format: Some("MOVIE".into()), ..Default::default() };
        assert_eq!(infer_media_format(&ProviderRaw::Anilist(raw.clone())), (Some(true), Some("MOVIE".to_string())));
        raw.format = Some("TV".into());
        assert_eq!(infer_media_format(&ProviderRaw::Anilist(raw.clone())), (Some(false), Some("TV".to_string())));
        raw.format = None;
        assert_eq!(infer_media_format(&ProviderRaw::Anilist(raw)), (None, None));
    }

    #[test]
    fn anidb_raw_leaves_media_format_unknown() {
        let raw = ProviderRaw::Anidb(crate::models::provider::AniDbRaw::default());
        assert_eq!(infer_media_format(&raw), (None, None));
    }
}
