//! TVDB v4 adapter (C8) — authenticated by API key (+ optional user PIN).
//! Episode records carry an air date used as a year fallback, preferring
//! the episode's date over the series' (spec §4.4).

use crate::clients::rate_limiter::HostPacer;
use crate::models::provider::TvdbRaw;
use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub(crate) const TVDB_HOST: &str = "api4.thetvdb.com";
const TVDB_API: &str = "https://api4.thetvdb.com/v4";
const MIN_SPACING_MS: u64 = 300;

#[derive(Serialize)]
struct LoginBody<'a> {
    apikey: &'a str,
    pin: Option<&'a str>,
}

#[derive(Deserialize)]
struct LoginResponse {
    data: LoginData,
}

#[derive(Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Deserialize)]
struct SearchHit {
    tvdb_id: Option<String>,
    id: Option<String>,
    name: Option<String>,
    year: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Deserialize)]
struct EpisodeRecord {
    name: Option<String>,
    aired: Option<String>,
}

#[derive(Deserialize)]
struct EpisodesPage {
    episodes: Vec<EpisodeRecord>,
}

#[derive(Deserialize)]
struct SeriesExtended {
    #[serde(rename = "firstAired")]
    first_aired: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SeriesCandidate {
    pub id: i64,
    pub title: String,
    pub year: Option<String>,
    pub is_movie: bool,
}

#[derive(Debug, Clone)]
pub struct EpisodeHit {
    pub title: String,
    pub raw: TvdbRaw,
}

pub struct TvdbClient {
    client: Client,
    pacer: Arc<HostPacer>,
    api_key: String,
    pin: Option<String>,
    token: RwLock<Option<String>>,
}

impl TvdbClient {
    #[must_use]
    pub fn new(pacer: Arc<HostPacer>, api_key: String, pin: Option<String>) -> Self {
        pacer.set_min_spacing(TVDB_HOST, Duration::from_millis(MIN_SPACING_MS));
        Self {
            client: Client::builder()
                .user_agent("renamarr/1.0")
                .build()
                .unwrap_or_else(|_| Client::new()),
            pacer,
            api_key,
            pin,
            token: RwLock::new(None),
        }
    }

    async fn ensure_token(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.pacer.wait(TVDB_HOST).await;
        let body = LoginBody {
            apikey: &self.api_key,
            pin: self.pin.as_deref(),
        };
        let response: LoginResponse = self
            .client
            .post(format!("{TVDB_API}/login"))
            .json(&body)
            .send()
            .await
            .context("tvdb login request failed")?
            .json()
            .await
            .context("tvdb login response was not valid json")?;
        *self.token.write().await = Some(response.data.token.clone());
        Ok(response.data.token)
    }

    pub async fn search_series(&self, query: &str) -> Result<Option<SeriesCandidate>> {
        let token = self.ensure_token().await?;
        self.pacer.wait(TVDB_HOST).await;
        let url = format!("{TVDB_API}/search?query={}&type=series", urlencoding::encode(query));
        let response: Envelope<Vec<SearchHit>> = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .context("tvdb search request failed")?
            .json()
            .await
            .context("tvdb search response was not valid json")?;

        let Some(hit) = response.data.unwrap_or_default().into_iter().next() else {
            return Ok(None);
        };
        let id_str = hit.tvdb_id.or(hit.id).ok_or_else(|| anyhow!("tvdb hit missing id"))?;
        let id: i64 = id_str.trim_start_matches("series-").parse().unwrap_or_default();

        Ok(Some(SeriesCandidate {
            id,
            title: hit.name.unwrap_or_default(),
            year: hit.year,
            is_movie: hit.kind.as_deref() == Some("movie"),
        }))
    }

    pub async fn fetch_episode(
        &self,
        series_id: i64,
        season: i32,
        episode: i32,
    ) -> Result<Option<EpisodeHit>> {
        let token = self.ensure_token().await?;
        self.pacer.wait(TVDB_HOST).await;
        let url =
            format!("{TVDB_API}/series/{series_id}/episodes/default?season={season}&episodeNumber={episode}");
        let response: Envelope<EpisodesPage> = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .context("tvdb episode request failed")?
            .json()
            .await
            .context("tvdb episode response was not valid json")?;

        let episode_record = response
            .data
            .and_then(|p| p.episodes.into_iter().next());

        let Some(record) = episode_record else {
            return Ok(None);
        };
        let Some(name) = record.name.filter(|n| !n.trim().is_empty()) else {
            return Ok(None);
        };

        Ok(Some(EpisodeHit {
            title: name,
            raw: TvdbRaw {
                series_id,
                episode_id: None,
                episode_air_date: record.aired,
                series_first_aired: None,
            },
        }))
    }

    /// Year fallback: episode air date preferred over series first-aired
    /// date (spec §4.4 TVDB, §4.5 year resolution order).
    pub async fn series_first_aired_year(&self, series_id: i64) -> Result<Option<String>> {
        let token = self.ensure_token().await?;
        self.pacer.wait(TVDB_HOST).await;
        let url = format!("{TVDB_API}/series/{series_id}/extended");
        let response: Envelope<SeriesExtended> = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .context("tvdb series-extended request failed")?
            .json()
            .await
            .context("tvdb series-extended response was not valid json")?;

        Ok(response
            .data
            .and_then(|d| d.first_aired)
            .and_then(|d| d.get(0..4).map(str::to_string)))
    }
}
