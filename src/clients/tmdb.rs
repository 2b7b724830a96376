//! TMDB adapter (C8) — `/search/tv` and `/search/movie`, then
//! `/tv/{id}/season/{s}/episode/{e}`, falling back to `/translations` when
//! the episode name is non-Latin or a placeholder like "Episode 13" (spec
//! §4.4). Supports the Philosopher's/Sorcerer's Stone title-swap alias.

use crate::models::provider::{TmdbMediaKind, TmdbRaw};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::clients::rate_limiter::HostPacer;

pub(crate) const TMDB_HOST: &str = "api.themoviedb.org";
const TMDB_API: &str = "https://api.themoviedb.org/3";
const MIN_SPACING_MS: u64 = 300;

/// Philosopher's Stone (UK/international) <-> Sorcerer's Stone (US) alias,
/// since providers disagree on which is canonical (spec §4.4 TMDB).
const TITLE_ALIASES: &[(&str, &str)] = &[(
    "Harry Potter and the Sorcerer's Stone",
    "Harry Potter and the Philosopher's Stone",
)];

#[derive(Deserialize)]
struct SearchResponse<T> {
    results: Vec<T>,
}

#[derive(Deserialize)]
struct TvHit {
    id: i64,
    name: Option<String>,
    #[serde(rename = "first_air_date")]
    first_air_date: Option<String>,
}

#[derive(Deserialize)]
struct MovieHit {
    id: i64,
    title: Option<String>,
    #[serde(rename = "release_date")]
    release_date: Option<String>,
}

#[derive(Deserialize)]
struct EpisodeDetail {
    name: Option<String>,
}

#[derive(Deserialize)]
struct PosterDetail {
    poster_path: Option<String>,
}

#[derive(Deserialize)]
struct TranslationsResponse {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct Translation {
    #[serde(rename = "iso_639_1")]
    iso_639_1: String,
    data: TranslationData,
}

#[derive(Deserialize)]
struct TranslationData {
    name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SeriesCandidate {
    pub id: i64,
    pub title: String,
    pub year: Option<String>,
    pub kind: TmdbMediaKind,
}

#[derive(Debug, Clone)]
pub struct EpisodeHit {
    pub title: String,
    pub raw: TmdbRaw,
}

#[derive(Clone)]
pub struct TmdbClient {
    client: Client,
    pacer: Arc<HostPacer>,
    api_key: String,
}

impl TmdbClient {
    #[must_use]
    pub fn new(pacer: Arc<HostPacer>, api_key: String) -> Self {
        pacer.set_min_spacing(TMDB_HOST, Duration::from_millis(MIN_SPACING_MS));
        Self {
            client: Client::builder()
                .user_agent("renamarr/1.0")
                .build()
                .unwrap_or_else(|_| Client::new()),
            pacer,
            api_key,
        }
    }

    fn aliased(query: &str) -> String {
        TITLE_ALIASES
            .iter()
            .find_map(|(a, b)| {
                if query.eq_ignore_ascii_case(a) {
                    Some((*b).to_string())
                } else if query.eq_ignore_ascii_case(b) {
                    Some((*a).to_string())
                } else {
                    None
                }
            })
            .unwrap_or_else(|| query.to_string())
    }

    pub async fn search_tv(&self, query: &str) -> Result<Option<SeriesCandidate>> {
        self.pacer.wait(TMDB_HOST).await;
        let url = format!(
            "{TMDB_API}/search/tv?api_key={}&query={}",
            self.api_key,
            urlencoding::encode(query)
        );
        let response: SearchResponse<TvHit> = self
            .client
            .get(&url)
            .send()
            .await
            .context("tmdb tv search request failed")?
            .json()
            .await
            .context("tmdb tv search response was not valid json")?;

        if let Some(hit) = response.results.into_iter().next() {
            return Ok(Some(SeriesCandidate {
                id: hit.id,
                title: hit.name.unwrap_or_default(),
                year: hit.first_air_date.and_then(|d| d.get(0..4).map(str::to_string)),
                kind: TmdbMediaKind::Tv,
            }));
        }

        let alias = Self::aliased(query);
        if alias != query {
            return Box::pin(self.search_tv(&alias)).await;
        }
        Ok(None)
    }

    pub async fn search_movie(&self, query: &str) -> Result<Option<SeriesCandidate>> {
        self.pacer.wait(TMDB_HOST).await;
        let url = format!(
            "{TMDB_API}/search/movie?api_key={}&query={}",
            self.api_key,
            urlencoding::encode(query)
        );
        let response: SearchResponse<MovieHit> = self
            .client
            .get(&url)
            .send()
            .await
            .context("tmdb movie search request failed")?
            .json()
            .await
            .context("tmdb movie search response was not valid json")?;

        if let Some(hit) = response.results.into_iter().next() {
            return Ok(Some(SeriesCandidate {
                id: hit.id,
                title: hit.title.unwrap_or_default(),
                year: hit.release_date.and_then(|d| d.get(0..4).map(str::to_string)),
                kind: TmdbMediaKind::Movie,
            }));
        }

        let alias = Self::aliased(query);
        if alias != query {
            return Box::pin(self.search_movie(&alias)).await;
        }
        Ok(None)
    }

    pub async fn fetch_episode(
        &self,
        tv_id: i64,
        season: i32,
        episode: i32,
    ) -> Result<Option<EpisodeHit>> {
        self.pacer.wait(TMDB_HOST).await;
        let url = format!(
            "{TMDB_API}/tv/{tv_id}/season/{season}/episode/{episode}?api_key={}",
            self.api_key
        );
        let detail: EpisodeDetail = self
            .client
            .get(&url)
            .send()
            .await
            .context("tmdb episode request failed")?
            .json()
            .await
            .context("tmdb episode response was not valid json")?;

        let Some(name) = detail.name.filter(|n| !n.trim().is_empty()) else {
            return Ok(None);
        };

        if is_placeholder_name(&name) || !is_mostly_latin(&name) {
            if let Some(translated) = self.fetch_translation(tv_id, season, episode).await? {
                return Ok(Some(EpisodeHit {
                    title: translated,
                    raw: TmdbRaw {
                        id: tv_id,
                        media_kind: TmdbMediaKind::Tv,
                        release_date: None,
                        used_translation: true,
                    },
                }));
            }
        }

        Ok(Some(EpisodeHit {
            title: name,
            raw: TmdbRaw {
                id: tv_id,
                media_kind: TmdbMediaKind::Tv,
                release_date: None,
                used_translation: false,
            },
        }))
    }

    /// Fetches the series' poster path and composes the CDN URL the
    /// approved-series image worker caches (spec §4.11 "TMDB").
    pub async fn fetch_tv_poster(&self, tv_id: i64) -> Result<Option<String>> {
        self.pacer.wait(TMDB_HOST).await;
        let url = format!("{TMDB_API}/tv/{tv_id}?api_key={}", self.api_key);
        let detail: PosterDetail = self
            .client
            .get(&url)
            .send()
            .await
            .context("tmdb series detail request failed")?
            .json()
            .await
            .context("tmdb series detail response was not valid json")?;

        Ok(detail
            .poster_path
            .map(|p| format!("https://image.tmdb.org/t/p/w500{p}")))
    }

    async fn fetch_translation(&self, tv_id: i64, season: i32, episode: i32) -> Result<Option<String>> {
        self.pacer.wait(TMDB_HOST).await;
        let url = format!(
            "{TMDB_API}/tv/{tv_id}/season/{season}/episode/{episode}/translations?api_key={}",
            self.api_key
        );
        let response: TranslationsResponse = self
            .client
            .get(&url)
            .send()
            .await
            .context("tmdb translations request failed")?
            .json()
            .await
            .context("tmdb translations response was not valid json")?;

        Ok(response
            .translations
            .into_iter()
            .find(|t| t.iso_639_1 == "en")
            .and_then(|t| t.data.name)
            .filter(|n| !n.trim().is_empty() && !is_placeholder_name(n)))
    }
}

fn is_placeholder_name(name: &str) -> bool {
    let lower = name.trim().to_lowercase();
    if lower.starts_with("episode ") || lower.starts_with("ep. ") || lower.starts_with("ep ") {
        return true;
    }
    lower.chars().all(|c| c.is_ascii_digit() || c.is_whitespace())
}

fn is_mostly_latin(name: &str) -> bool {
    let letters: Vec<char> = name.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return true;
    }
    let latin = letters.iter().filter(|c| c.is_ascii_alphabetic()).count();
    (latin as f64 / letters.len() as f64) > 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_detection() {
        assert!(is_placeholder_name("Episode 13"));
        assert!(is_placeholder_name("Ep. 3"));
        assert!(is_placeholder_name("42"));
        assert!(!is_placeholder_name("Journey's End"));
    }

    #[test]
    fn latin_detection() {
        assert!(is_mostly_latin("Journey's End"));
        assert!(!is_mostly_latin("第1話"));
    }
}
