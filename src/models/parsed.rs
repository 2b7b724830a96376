//! Output of the filename parser (C2) — see spec §3 `ParsedEntry`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedEntry {
    pub title: String,
    pub parsed_name: String,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub episode_range: Option<String>,
    pub episode_title: Option<String>,
    pub year: Option<String>,
    pub timestamp: i64,

    /// True when the basename itself begins with an episode marker
    /// (`S01E05 - ...`, `05 - ...`), which the resolver uses to elevate the
    /// parent-folder candidate to primary series title (spec §4.5 step 3).
    #[serde(default)]
    pub starts_with_episode: bool,
}

impl ParsedEntry {
    /// Season to use for *display* purposes only; the cached value stays
    /// `None` per spec §3 invariant 1 — this does not mutate the entry.
    #[must_use]
    pub fn display_season(&self) -> i32 {
        if self.episode.is_some() {
            self.season.unwrap_or(1)
        } else {
            self.season.unwrap_or(0)
        }
    }

    /// True when the parsed title looks like an episode-ish fragment rather
    /// than a series name (all-numeric, or bare "Episode N"-shaped string).
    #[must_use]
    pub fn title_looks_episode_like(&self) -> bool {
        let t = self.title.trim();
        if t.is_empty() {
            return true;
        }
        if t.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-') {
            return true;
        }
        let lower = t.to_lowercase();
        lower.starts_with("episode ") || lower.starts_with("ep ") || lower.starts_with("ep.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_season_defaults_to_one_when_episode_present() {
        let p = ParsedEntry {
            episode: Some(5),
            season: None,
            ..Default::default()
        };
        assert_eq!(p.display_season(), 1);
    }

    #[test]
    fn title_looks_episode_like_detects_numeric_titles() {
        let p = ParsedEntry {
            title: "05".to_string(),
            ..Default::default()
        };
        assert!(p.title_looks_episode_like());

        let p2 = ParsedEntry {
            title: "Frieren".to_string(),
            ..Default::default()
        };
        assert!(!p2.title_looks_episode_like());
    }
}
