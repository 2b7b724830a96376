//! Provider-derived data — spec §3 `ProviderBlock`/`ProviderFailure`, and
//! the `ProviderRaw` sum type called for in spec §9 ("Dynamic provider
//! payloads"): each adapter returns its own typed payload instead of opaque
//! object soup, tagged by `source` so the resolver can merge by pattern
//! matching instead of stringly-typed field access.

use crate::domain::ProviderId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderTitleSource {
    pub id: String,
    pub display: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSources {
    pub series: Option<ProviderTitleSource>,
    pub episode: Option<ProviderTitleSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderBlock {
    pub provider: ProviderId,
    pub id: String,
    pub title: String,
    pub year: Option<String>,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub episode_title: Option<String>,
    pub rendered_name: Option<String>,
    pub matched: bool,
    pub source: String,

    pub raw: Option<ProviderRaw>,

    pub series_title_english: Option<String>,
    pub series_title_romaji: Option<String>,
    pub series_title_exact: Option<String>,
    pub original_series_title: Option<String>,

    pub sources: Option<ProviderSources>,
}

impl ProviderBlock {
    /// A block is "complete" when matched, has a rendered name, and (if an
    /// episode is present) also has an episode title — spec §3 invariant.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        if !self.matched || self.rendered_name.is_none() {
            return false;
        }
        if self.episode.is_some() {
            return self
                .episode_title
                .as_ref()
                .is_some_and(|t| !t.trim().is_empty());
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    NoMatch,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: ProviderId,
    pub reason: FailureReason,
    pub code: Option<String>,
    pub attempt_count: u32,
    pub first_attempt_at: i64,
    pub last_attempt_at: i64,
    pub last_error: Option<String>,
    pub skip_count: u32,
    pub last_skip_at: Option<i64>,
}

impl ProviderFailure {
    #[must_use]
    pub fn new(provider: ProviderId, reason: FailureReason, code: Option<String>, error: Option<String>, now: i64) -> Self {
        Self {
            provider,
            reason,
            code,
            attempt_count: 1,
            first_attempt_at: now,
            last_attempt_at: now,
            last_error: error,
            skip_count: 0,
            last_skip_at: None,
        }
    }

    pub fn record_skip(&mut self, now: i64) {
        self.skip_count += 1;
        self.last_skip_at = Some(now);
    }

    pub fn record_retry(&mut self, error: Option<String>, now: i64) {
        self.attempt_count += 1;
        self.last_attempt_at = now;
        self.last_error = error;
    }
}

/// Relation kind from AniList's `relations.edges` (spec §9 "Cyclic graphs").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    Parent,
    Prequel,
    Sequel,
    Source,
    SideStory,
    Other,
}

/// A related-media edge pointing at another entry by its AniList id — an
/// integer handle into a separately stored media arena rather than a
/// pointer/`Rc` cycle, per spec §9.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationEdge {
    pub kind: RelationKind,
    pub related_id: i32,
    pub related_title: String,
    pub related_format: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AniListRaw {
    pub id: i32,
    pub title_romaji: String,
    pub title_english: Option<String>,
    pub title_native: Option<String>,
    pub format: Option<String>,
    pub season_year: Option<i32>,
    pub next_airing_episode: Option<i32>,
    pub relations: Vec<RelationEdge>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TvdbRaw {
    pub series_id: i64,
    pub episode_id: Option<i64>,
    pub episode_air_date: Option<String>,
    pub series_first_aired: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TmdbRaw {
    pub id: i64,
    pub media_kind: TmdbMediaKind,
    pub release_date: Option<String>,
    pub used_translation: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TmdbMediaKind {
    #[default]
    Tv,
    Movie,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AniDbRaw {
    pub aid: i32,
    pub eid: Option<i32>,
    pub raw_episode_code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WikiRaw {
    pub page_title: String,
    pub season_heading: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KitsuRaw {
    pub series_id: String,
    pub episode_id: Option<String>,
}

/// Per-provider payload, tagged by `source` — the sum type called for in
/// spec §9 in place of opaque `raw` object soup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum ProviderRaw {
    Anilist(AniListRaw),
    Tvdb(TvdbRaw),
    Tmdb(TmdbRaw),
    Anidb(AniDbRaw),
    Wikipedia(WikiRaw),
    Kitsu(KitsuRaw),
}

impl ProviderRaw {
    #[must_use]
    pub const fn provider_id(&self) -> ProviderId {
        match self {
            Self::Anilist(_) => ProviderId::Anilist,
            Self::Tvdb(_) => ProviderId::Tvdb,
            Self::Tmdb(_) => ProviderId::Tmdb,
            Self::Anidb(_) => ProviderId::Anidb,
            Self::Wikipedia(_) => ProviderId::Wikipedia,
            Self::Kitsu(_) => ProviderId::Kitsu,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_incomplete_without_rendered_name() {
        let block = ProviderBlock {
            provider: ProviderId::Anilist,
            id: "1".into(),
            title: "Frieren".into(),
            year: None,
            season: Some(1),
            episode: Some(5),
            episode_title: Some("Journey's End".into()),
            rendered_name: None,
            matched: true,
            source: "AniList".into(),
            raw: None,
            series_title_english: None,
            series_title_romaji: None,
            series_title_exact: None,
            original_series_title: None,
            sources: None,
        };
        assert!(!block.is_complete());
    }

    #[test]
    fn block_incomplete_without_episode_title_when_episode_present() {
        let mut block = ProviderBlock {
            provider: ProviderId::Anilist,
            id: "1".into(),
            title: "Frieren".into(),
            year: None,
            season: Some(1),
            episode: Some(5),
            episode_title: None,
            rendered_name: Some("Frieren - S01E05".into()),
            matched: true,
            source: "AniList".into(),
            raw: None,
            series_title_english: None,
            series_title_romaji: None,
            series_title_exact: None,
            original_series_title: None,
            sources: None,
        };
        assert!(!block.is_complete());
        block.episode_title = Some("Journey's End".into());
        assert!(block.is_complete());
    }

    #[test]
    fn failure_skip_and_retry_bookkeeping() {
        let mut f = ProviderFailure::new(ProviderId::Tmdb, FailureReason::NoMatch, None, None, 100);
        assert_eq!(f.skip_count, 0);
        f.record_skip(110);
        assert_eq!(f.skip_count, 1);
        assert_eq!(f.last_skip_at, Some(110));
        f.record_retry(Some("timeout".into()), 120);
        assert_eq!(f.attempt_count, 2);
        assert_eq!(f.last_attempt_at, 120);
    }
}
