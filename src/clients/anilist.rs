//! AniList GraphQL adapter — the resolver's primary series/episode source
//! and the hardest candidate-matching logic in the whole provider stack
//! (season-aware search, word-overlap scoring, relation-based parent
//! detection).

use crate::clients::rate_limiter::HostPacer;
use crate::models::provider::{AniListRaw, RelationEdge, RelationKind};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub(crate) const ANILIST_HOST: &str = "graphql.anilist.co";
const ANILIST_API: &str = "https://graphql.anilist.co";
const MIN_SPACING_MS: u64 = 250;

const SEARCH_QUERY: &str = r"
    query ($search: String) {
        Page(page: 1, perPage: 10) {
            media(search: $search, type: ANIME) {
                id
                title { romaji english native }
                format
                seasonYear
                nextAiringEpisode { episode }
                relations {
                    edges {
                        relationType
                        node { id title { romaji english native } format }
                    }
                }
            }
        }
    }
";

const BY_ID_QUERY: &str = r"
    query ($id: Int) {
        Media(id: $id, type: ANIME) {
            id
            title { romaji english native }
            format
            seasonYear
            nextAiringEpisode { episode }
            relations {
                edges {
                    relationType
                    node { id title { romaji english native } format }
                }
            }
        }
    }
";

#[derive(Serialize)]
struct SearchVars<'a> {
    search: &'a str,
}

#[derive(Serialize)]
struct IdVars {
    id: i32,
}

#[derive(Serialize)]
struct GraphQlRequest<V> {
    query: &'static str,
    variables: V,
}

#[derive(Deserialize)]
struct SearchResponse {
    data: Option<SearchData>,
}

#[derive(Deserialize)]
struct SearchData {
    #[serde(rename = "Page")]
    page: SearchPage,
}

#[derive(Deserialize)]
struct SearchPage {
    media: Vec<MediaPayload>,
}

#[derive(Deserialize)]
struct ByIdResponse {
    data: Option<ByIdData>,
}

#[derive(Deserialize)]
struct ByIdData {
    #[serde(rename = "Media")]
    media: Option<MediaPayload>,
}

#[derive(Deserialize)]
struct MediaPayload {
    id: i32,
    title: TitlePayload,
    format: Option<String>,
    #[serde(rename = "seasonYear")]
    season_year: Option<i32>,
    #[serde(rename = "nextAiringEpisode")]
    next_airing_episode: Option<NextAiringPayload>,
    relations: Option<RelationsPayload>,
}

#[derive(Deserialize)]
struct NextAiringPayload {
    episode: i32,
}

#[derive(Deserialize)]
struct TitlePayload {
    romaji: Option<String>,
    english: Option<String>,
    native: Option<String>,
}

#[derive(Deserialize)]
struct RelationsPayload {
    edges: Vec<RelationEdgePayload>,
}

#[derive(Deserialize)]
struct RelationEdgePayload {
    #[serde(rename = "relationType")]
    relation_type: Option<String>,
    node: RelationNodePayload,
}

#[derive(Deserialize)]
struct RelationNodePayload {
    id: i32,
    title: TitlePayload,
    format: Option<String>,
}

const COVER_IMAGE_QUERY: &str = r"
    query ($id: Int) {
        Media(id: $id, type: ANIME) {
            coverImage { large medium }
            bannerImage
        }
    }
";

#[derive(Deserialize)]
struct CoverImageResponse {
    data: Option<CoverImageData>,
}

#[derive(Deserialize)]
struct CoverImageData {
    #[serde(rename = "Media")]
    media: Option<CoverImageMedia>,
}

#[derive(Deserialize)]
struct CoverImageMedia {
    #[serde(rename = "coverImage")]
    cover_image: Option<CoverImagePayload>,
    #[serde(rename = "bannerImage")]
    banner_image: Option<String>,
}

#[derive(Deserialize)]
struct CoverImagePayload {
    large: Option<String>,
    medium: Option<String>,
}

/// A scored AniList search result, ready for the resolver to accept or
/// reject before it commits to an id.
#[derive(Debug, Clone)]
pub struct SeriesCandidate {
    pub raw: AniListRaw,
    pub resolved_title: String,
    pub score: f64,
    pub parent_relation: Option<RelationEdge>,
}

impl SeriesCandidate {
    /// Episode `n` (1-based) hasn't aired yet if the media tracks a next
    /// airing episode and `n` is at or past it (spec §4.4 "has not aired").
    #[must_use]
    pub fn episode_not_yet_aired(&self, episode: i32) -> bool {
        self.raw
            .next_airing_episode
            .is_some_and(|next| episode >= next)
    }
}

#[derive(Clone)]
pub struct AnilistClient {
    client: Client,
    pacer: Arc<HostPacer>,
    api_key: Option<String>,
}

impl AnilistClient {
    #[must_use]
    pub fn new(pacer: Arc<HostPacer>, api_key: Option<String>) -> Self {
        pacer.set_min_spacing(ANILIST_HOST, Duration::from_millis(MIN_SPACING_MS));
        Self {
            client: Client::builder()
                .user_agent("renamarr/1.0")
                .build()
                .unwrap_or_else(|_| Client::new()),
            pacer,
            api_key,
        }
    }

    /// Runs the three-variant search ladder (step 1 of the AniList
    /// candidate-selection procedure), then scores the surviving result set
    /// (step 2-5). `from_parent_folder` tightens the acceptance threshold
    /// from 0.2 to 0.35 since folder-derived queries are noisier.
    pub async fn search_series(
        &self,
        title: &str,
        season_hint: Option<i32>,
        from_parent_folder: bool,
    ) -> Result<Option<SeriesCandidate>> {
        let mut query_variants = vec![title.to_string()];
        if let Some(season) = season_hint {
            query_variants.push(format!("{title} Season {season}"));
            query_variants.push(format!("{title} (Season {season})"));
        }

        let mut chosen: Option<Vec<MediaPayload>> = None;
        for variant in &query_variants {
            let media = self.raw_search(variant).await?;
            let best = media
                .iter()
                .map(|m| word_overlap_score(variant, best_title(&m.title)).0)
                .fold(0.0_f64, f64::max);
            if best >= 0.6 && !media.is_empty() {
                chosen = Some(media);
                break;
            }
            if chosen.is_none() {
                chosen = Some(media);
            }
        }

        let Some(media) = chosen else {
            return Ok(None);
        };

        let threshold = if from_parent_folder { 0.35 } else { 0.2 };
        let looks_like_special = season_hint == Some(0);

        let mut best: Option<(f64, MediaPayload)> = None;
        for m in media {
            let candidate_title = best_title(&m.title);
            let (score, _recall, _precision) = word_overlap_score(title, candidate_title);
            if score < threshold {
                continue;
            }

            let is_special = m
                .format
                .as_deref()
                .is_some_and(|f| f.eq_ignore_ascii_case("special"));
            if is_special && !looks_like_special {
                continue;
            }

            let season_specific = title_mentions_season_number(candidate_title);
            let adjusted = match (season_hint, season_specific) {
                (None, true) => score - 0.05,
                (Some(n), true) if candidate_title.contains(&n.to_string()) => score + 0.1,
                _ => score,
            };

            if best.as_ref().is_none_or(|(best_score, _)| adjusted > *best_score) {
                best = Some((adjusted, m));
            }
        }

        Ok(best.map(|(score, m)| to_series_candidate(m, score)))
    }

    pub async fn fetch_by_id(&self, id: i32) -> Result<Option<SeriesCandidate>> {
        let request = GraphQlRequest {
            query: BY_ID_QUERY,
            variables: IdVars { id },
        };

        self.pacer.wait(ANILIST_HOST).await;
        let mut req = self.client.post(ANILIST_API).json(&request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response: ByIdResponse = req
            .send()
            .await
            .context("anilist fetch_by_id request failed")?
            .json()
            .await
            .context("anilist fetch_by_id response was not valid json")?;

        Ok(response
            .data
            .and_then(|d| d.media)
            .map(|m| to_series_candidate(m, 1.0)))
    }

    /// Fetches `coverImage`/`bannerImage` for the approved-series image
    /// worker, preferring `large` > `medium` > banner (spec §4.11 "AniList").
    pub async fn fetch_cover_image(&self, id: i32) -> Result<Option<String>> {
        let request = GraphQlRequest {
            query: COVER_IMAGE_QUERY,
            variables: IdVars { id },
        };

        self.pacer.wait(ANILIST_HOST).await;
        let mut req = self.client.post(ANILIST_API).json(&request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response: CoverImageResponse = req
            .send()
            .await
            .context("anilist fetch_cover_image request failed")?
            .json()
            .await
            .context("anilist fetch_cover_image response was not valid json")?;

        let Some(media) = response.data.and_then(|d| d.media) else {
            return Ok(None);
        };
        Ok(media
            .cover_image
            .and_then(|c| c.large.or(c.medium))
            .or(media.banner_image))
    }

    async fn raw_search(&self, query: &str) -> Result<Vec<MediaPayload>> {
        let request = GraphQlRequest {
            query: SEARCH_QUERY,
            variables: SearchVars { search: query },
        };

        self.pacer.wait(ANILIST_HOST).await;
        let mut req = self.client.post(ANILIST_API).json(&request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response: SearchResponse = req
            .send()
            .await
            .context("anilist search request failed")?
            .json()
            .await
            .context("anilist search response was not valid json")?;

        Ok(response.data.map(|d| d.page.media).unwrap_or_default())
    }
}

fn to_series_candidate(m: MediaPayload, score: f64) -> SeriesCandidate {
    let relations: Vec<RelationEdge> = m
        .relations
        .map(|r| {
            r.edges
                .into_iter()
                .filter_map(|e| {
                    let kind = parse_relation_kind(e.relation_type.as_deref()?)?;
                    Some(RelationEdge {
                        kind,
                        related_id: e.node.id,
                        related_title: best_title(&e.node.title).to_string(),
                        related_format: e.node.format,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let parent_relation = [RelationKind::Parent, RelationKind::Prequel, RelationKind::Source]
        .into_iter()
        .find_map(|wanted| relations.iter().find(|r| r.kind == wanted).cloned());

    let resolved_title = resolve_title(&m.title);

    let raw = AniListRaw {
        id: m.id,
        title_romaji: m.title.romaji.clone().unwrap_or_default(),
        title_english: m.title.english.clone(),
        title_native: m.title.native.clone(),
        format: m.format,
        season_year: m.season_year,
        next_airing_episode: m.next_airing_episode.map(|n| n.episode),
        relations,
    };

    SeriesCandidate {
        raw,
        resolved_title,
        score,
        parent_relation,
    }
}

fn parse_relation_kind(relation_type: &str) -> Option<RelationKind> {
    match relation_type {
        "PARENT" => Some(RelationKind::Parent),
        "PREQUEL" => Some(RelationKind::Prequel),
        "SEQUEL" => Some(RelationKind::Sequel),
        "SOURCE" => Some(RelationKind::Source),
        "SIDE_STORY" => Some(RelationKind::SideStory),
        _ => None,
    }
}

fn best_title(title: &TitlePayload) -> &str {
    title
        .english
        .as_deref()
        .or(title.romaji.as_deref())
        .or(title.native.as_deref())
        .unwrap_or_default()
}

/// Step 4 of AniList candidate selection: prefer `english` unless it is
/// ALL-CAPS, in which case fall back to romaji (if equal ignoring case) or
/// a title-cased version of the English string. Trailing season suffixes
/// are stripped for the canonical series name.
fn resolve_title(title: &TitlePayload) -> String {
    let chosen = match &title.english {
        Some(english) if !is_all_caps(english) => english.clone(),
        Some(english) => {
            let romaji = title.romaji.as_deref().unwrap_or_default();
            if romaji.eq_ignore_ascii_case(english) {
                romaji.to_string()
            } else {
                title_case(english)
            }
        }
        None => title
            .romaji
            .clone()
            .or_else(|| title.native.clone())
            .unwrap_or_default(),
    };
    strip_trailing_season_suffix(&chosen)
}

fn is_all_caps(s: &str) -> bool {
    let letters: Vec<char> = s.chars().filter(|c| c.is_alphabetic()).collect();
    !letters.is_empty() && letters.iter().all(|c| c.is_uppercase())
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_trailing_season_suffix(title: &str) -> String {
    static PATTERNS: std::sync::OnceLock<Vec<regex::Regex>> = std::sync::OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        vec![
            regex::Regex::new(r"(?i)\s*\d+(?:st|nd|rd|th)\s+Season\s*$").unwrap(),
            regex::Regex::new(r"(?i)\s*Second\s+Season\s*$").unwrap(),
            regex::Regex::new(r"(?i)\s*Season\s*\d+\s*$").unwrap(),
            regex::Regex::new(r"(?i)\s*S0*\d+\s*$").unwrap(),
            regex::Regex::new(r"\s*\(\s*Season\s*\d+\s*\)\s*$").unwrap(),
        ]
    });

    let mut result = title.to_string();
    for pattern in patterns {
        result = pattern.replace(&result, "").to_string();
    }
    result.trim().to_string()
}

/// Infers a season number from ordinal ("2nd Season") or numeric ("Season 2",
/// "S02") tokens in a title — used when a sequel collapses to its parent so
/// the renderer still gets the right season (spec §4.5 step 5, scenario S3).
#[must_use]
pub fn infer_season_number(title: &str) -> Option<i32> {
    static PATTERNS: std::sync::OnceLock<Vec<regex::Regex>> = std::sync::OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        vec![
            regex::Regex::new(r"(?i)(\d+)(?:st|nd|rd|th)\s+Season").unwrap(),
            regex::Regex::new(r"(?i)Season\s*(\d+)").unwrap(),
            regex::Regex::new(r"(?i)\bS0*(\d+)\b").unwrap(),
        ]
    });

    for pattern in patterns {
        if let Some(caps) = pattern.captures(title) {
            if let Some(n) = caps.get(1).and_then(|m| m.as_str().parse::<i32>().ok()) {
                return Some(n);
            }
        }
    }
    if title.to_lowercase().contains("second season") {
        return Some(2);
    }
    None
}

fn title_mentions_season_number(title: &str) -> bool {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"(?i)season\s*\d+|\bS0*\d+\b").unwrap());
    re.is_match(title)
}

fn tokenize(s: &str) -> HashSet<String> {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Word-overlap score `0.75·recall + 0.25·precision` between a query and a
/// candidate title, plus the component values for diagnostics.
fn word_overlap_score(query: &str, candidate: &str) -> (f64, f64, f64) {
    let query_tokens = tokenize(query);
    let candidate_tokens = tokenize(candidate);
    if query_tokens.is_empty() || candidate_tokens.is_empty() {
        return (0.0, 0.0, 0.0);
    }

    let overlap = query_tokens.intersection(&candidate_tokens).count() as f64;
    let recall = overlap / query_tokens.len() as f64;
    let precision = overlap / candidate_tokens.len() as f64;
    (0.75 * recall + 0.25 * precision, recall, precision)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_scores_exact_match_as_one() {
        let (score, recall, precision) = word_overlap_score("Frieren", "Frieren");
        assert!((score - 1.0).abs() < f64::EPSILON);
        assert!((recall - 1.0).abs() < f64::EPSILON);
        assert!((precision - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn overlap_favors_recall_over_precision() {
        let (score, ..) = word_overlap_score(
            "attack on titan",
            "attack on titan the final season part 2",
        );
        // recall = 3/3 = 1.0, precision = 3/7 ~= 0.43
        assert!(score > 0.75);
    }

    #[test]
    fn strips_numeric_and_ordinal_season_suffixes() {
        assert_eq!(strip_trailing_season_suffix("Oshi no Ko Season 2"), "Oshi no Ko");
        assert_eq!(strip_trailing_season_suffix("My Hero Academia 2nd Season"), "My Hero Academia");
        assert_eq!(strip_trailing_season_suffix("Demon Slayer S03"), "Demon Slayer");
    }

    #[test]
    fn all_caps_english_falls_back_to_romaji_or_title_case() {
        let t = TitlePayload {
            romaji: Some("Oshi no Ko".into()),
            english: Some("OSHI NO KO".into()),
            native: None,
        };
        assert_eq!(resolve_title(&t), "Oshi no Ko");

        let t2 = TitlePayload {
            romaji: Some("Completely Different".into()),
            english: Some("SOME TITLE".into()),
            native: None,
        };
        assert_eq!(resolve_title(&t2), "Some Title");
    }

    #[test]
    fn infers_season_number_from_ordinal_and_numeric_tokens() {
        assert_eq!(infer_season_number("Bleach: Thousand-Year Blood War 2nd Season"), Some(2));
        assert_eq!(infer_season_number("Oshi no Ko Season 2"), Some(2));
        assert_eq!(infer_season_number("Demon Slayer S03"), Some(3));
        assert_eq!(infer_season_number("My Hero Academia Second Season"), Some(2));
        assert_eq!(infer_season_number("Frieren"), None);
    }

    #[test]
    fn relation_priority_prefers_parent_over_prequel() {
        let relations = vec![
            RelationEdge {
                kind: RelationKind::Prequel,
                related_id: 0,
                related_title: "Prequel Show".into(),
                related_format: None,
            },
            RelationEdge {
                kind: RelationKind::Parent,
                related_id: 0,
                related_title: "Parent Show".into(),
                related_format: None,
            },
        ];
        let chosen = [RelationKind::Parent, RelationKind::Prequel, RelationKind::Source]
            .into_iter()
            .find_map(|wanted| relations.iter().find(|r| r.kind == wanted).cloned());
        assert_eq!(chosen.unwrap().related_title, "Parent Show");
    }
}
