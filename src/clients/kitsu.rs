//! Kitsu adapter (C8) — JSON:API search-then-episodes fallback, last in the
//! episode-title fallback chain (spec §4.5). Chooses the English-language
//! title when available, per spec §4.4.

use crate::clients::rate_limiter::HostPacer;
use crate::models::provider::KitsuRaw;
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub(crate) const KITSU_HOST: &str = "kitsu.io";
const KITSU_API: &str = "https://kitsu.io/api/edge";
const MIN_SPACING_MS: u64 = 250;

#[derive(Debug, Deserialize)]
struct JsonApiList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct AnimeResource {
    id: String,
    attributes: AnimeAttributes,
}

#[derive(Debug, Deserialize)]
struct AnimeAttributes {
    #[serde(rename = "canonicalTitle")]
    canonical_title: Option<String>,
    titles: Option<TitlesPayload>,
    #[serde(rename = "startDate")]
    start_date: Option<String>,
    #[serde(rename = "subtype")]
    subtype: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TitlesPayload {
    en: Option<String>,
    en_jp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EpisodeResource {
    id: String,
    attributes: EpisodeAttributes,
}

#[derive(Debug, Deserialize)]
struct EpisodeAttributes {
    #[serde(rename = "canonicalTitle")]
    canonical_title: Option<String>,
    titles: Option<TitlesPayload>,
    number: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct SeriesCandidate {
    pub id: String,
    pub title: String,
    pub year: Option<String>,
    pub is_movie: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct EpisodeHit {
    pub title: String,
    pub raw: KitsuRaw,
}

#[derive(Clone)]
pub struct KitsuClient {
    client: Client,
    pacer: Arc<HostPacer>,
}

impl KitsuClient {
    #[must_use]
    pub fn new(pacer: Arc<HostPacer>) -> Self {
        pacer.set_min_spacing(KITSU_HOST, Duration::from_millis(MIN_SPACING_MS));
        Self {
            client: Client::builder()
                .user_agent("renamarr/1.0")
                .build()
                .unwrap_or_else(|_| Client::new()),
            pacer,
        }
    }

    pub async fn search_series(&self, query: &str) -> Result<Option<SeriesCandidate>> {
        self.pacer.wait(KITSU_HOST).await;
        let url = format!("{KITSU_API}/anime?filter[text]={}&page[limit]=5", urlencoding::encode(query));
        let response: JsonApiList<AnimeResource> = self
            .client
            .get(&url)
            .send()
            .await
            .context("kitsu search request failed")?
            .json()
            .await
            .context("kitsu search response was not valid json")?;

        Ok(response.data.into_iter().next().map(|a| SeriesCandidate {
            id: a.id,
            title: best_title(&a.attributes.titles, a.attributes.canonical_title.as_deref()),
            year: a.attributes.start_date.and_then(|d| d.get(0..4).map(str::to_string)),
            is_movie: a.attributes.subtype.map(|s| s.eq_ignore_ascii_case("movie")),
        }))
    }

    pub async fn fetch_episode(&self, series_id: &str, episode: i32) -> Result<Option<EpisodeHit>> {
        self.pacer.wait(KITSU_HOST).await;
        let url = format!(
            "{KITSU_API}/anime/{series_id}/episodes?filter[number]={episode}&page[limit]=1"
        );
        let response: JsonApiList<EpisodeResource> = self
            .client
            .get(&url)
            .send()
            .await
            .context("kitsu episode request failed")?
            .json()
            .await
            .context("kitsu episode response was not valid json")?;

        Ok(response.data.into_iter().next().map(|e| EpisodeHit {
            title: best_title(&e.attributes.titles, e.attributes.canonical_title.as_deref()),
            raw: KitsuRaw {
                series_id: series_id.to_string(),
                episode_id: Some(e.id),
            },
        }))
    }
}

fn best_title(titles: &Option<TitlesPayload>, canonical: Option<&str>) -> String {
    titles
        .as_ref()
        .and_then(|t| t.en.clone().or_else(|| t.en_jp.clone()))
        .or_else(|| canonical.map(str::to_string))
        .unwrap_or_default()
}
