//! C11 Render Engine — expands the naming template into a concrete
//! filename and folder layout for an `EnrichEntry` (spec §4.8).
//!
//! Grounded on the teacher's `library::LibraryService::format_path`/
//! `cleanup_path` token-replace-then-collapse idiom, generalized for
//! movies vs TV, AniDB raw episode codes, and OS-aware truncation.

use crate::domain::ProviderId;
use crate::models::EnrichEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_TEMPLATE: &str = "{title} ({year}) - {epLabel} - {episodeTitle}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOs {
    Windows,
    MacOs,
    Linux,
}

impl TargetOs {
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }

    /// Max basename length in bytes (spec §4.8 step 8).
    #[must_use]
    pub const fn basename_byte_limit(self) -> usize {
        match self {
            Self::Windows => 200,
            Self::MacOs | Self::Linux => 240,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub template: Option<String>,
    pub series_aliases: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct RenderedName {
    pub series_folder: String,
    /// `None` for movies.
    pub season_folder: Option<String>,
    pub filename_stem: String,
}

impl RenderedName {
    #[must_use]
    pub fn relative_path(&self, extension: &str) -> PathBuf {
        let mut path = PathBuf::from(&self.series_folder);
        if let Some(season) = &self.season_folder {
            path.push(season);
        }
        path.push(format!("{}.{extension}", self.filename_stem));
        path
    }
}

/// Expands the naming template against `entry`, then computes the series
/// and (for TV) season folder names. Returns `None` when the entry has no
/// title at all (parser-only fallback with nothing to name).
#[must_use]
pub fn render(entry: &EnrichEntry, options: &RenderOptions, os: TargetOs) -> Option<RenderedName> {
    let title = entry.series_title.as_deref().or(entry.title.as_deref())?;
    let is_movie = entry.is_movie.unwrap_or(false);

    let clean_title = clean_base_title(title);
    let template = options.template.as_deref().unwrap_or(DEFAULT_TEMPLATE);

    let ep_label = episode_label(entry);
    let episode_title = entry.episode_title.clone().unwrap_or_default();
    let year = entry.year.clone().unwrap_or_default();

    let mut rendered = template
        .replace("{title}", &clean_title)
        .replace("{basename}", &clean_title)
        .replace("{year}", &year)
        .replace("{epLabel}", &ep_label)
        .replace("{episodeTitle}", &episode_title)
        .replace("{season}", &entry.season.map(|s| s.to_string()).unwrap_or_default())
        .replace("{episode}", &entry.episode.map(|e| e.to_string()).unwrap_or_default())
        .replace("{episodeRange}", &entry.episode_range.clone().unwrap_or_default())
        .replace("{tmdbId}", &tmdb_id(entry).unwrap_or_default());

    if is_movie {
        // Movies carry no episode marker/title; drop those template slots
        // entirely rather than leaving dangling separators for cleanup to
        // chew through alone (spec §4.8 step 2).
        rendered = rendered.replace(&ep_label, "").replace(&episode_title, "");
    }

    let mut cleaned = cleanup_rendered(&rendered);
    cleaned = ensure_year_position(&cleaned, &year, &ep_label);

    let sanitized = sanitize_filename(&cleaned);
    let truncated = truncate_preserving_prefix(&sanitized, &ep_label, os.basename_byte_limit());

    let alias = options.series_aliases.get(&clean_title.to_lowercase()).map(|a| sanitize_filename(a));
    let series_folder = alias.unwrap_or_else(|| {
        if is_movie {
            let year_suffix = if year.is_empty() { String::new() } else { format!(" ({year})") };
            sanitize_filename(&format!("{clean_title}{year_suffix}"))
        } else {
            sanitize_filename(&clean_title)
        }
    });

    let season_folder = if is_movie {
        None
    } else {
        Some(format!("Season {:02}", entry.season.unwrap_or(1)))
    };

    Some(RenderedName { series_folder, season_folder, filename_stem: truncated })
}

fn tmdb_id(entry: &EnrichEntry) -> Option<String> {
    let block = entry.provider.as_ref()?;
    (block.provider == ProviderId::Tmdb).then(|| block.id.clone())
}

/// `S{ss}E{ee}`, `E{ee}`, an episode range, or a preserved AniDB raw code
/// (`S2`, `C1`, `T1`) (spec §4.8 steps 3 and 7).
fn episode_label(entry: &EnrichEntry) -> String {
    if let Some(crate::models::provider::ProviderRaw::Anidb(raw)) = entry.provider.as_ref().and_then(|p| p.raw.as_ref()) {
        if let Some(code) = &raw.raw_episode_code {
            return code.clone();
        }
    }

    if let Some(range) = &entry.episode_range {
        return format!("E{range}");
    }

    match (entry.season, entry.episode) {
        (Some(season), Some(episode)) => format!("S{season:02}E{episode:02}"),
        (None, Some(episode)) => format!("E{episode:02}"),
        _ => String::new(),
    }
}

/// Strips existing episode markers/titles but preserves colon-joined
/// subtitles (spec §4.8 step 4).
fn clean_base_title(title: &str) -> String {
    static EPISODE_MARKER: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = EPISODE_MARKER.get_or_init(|| regex::Regex::new(r"(?i)\s*-?\s*S\d{1,2}E\d{1,4}.*$").unwrap());
    re.replace(title, "").trim().to_string()
}

fn cleanup_rendered(input: &str) -> String {
    let mut p = input.to_string();
    let mut prev_len = usize::MAX;
    while p.len() != prev_len {
        prev_len = p.len();
        p = p
            .replace("()", "")
            .replace("[]", "")
            .replace("  ", " ")
            .replace(" - - ", " - ")
            .replace(" .", ".");
    }
    let p = p.trim();
    let p = p.trim_start_matches(['-', ' ']);
    let p = p.trim_end_matches(['-', ' ']);
    p.trim().to_string()
}

/// If `year` is present but not already parenthesized next to the title,
/// inserts `(year)` before the first episode marker, else before the first
/// `" - "`, else at the end (spec §4.8 step 6).
fn ensure_year_position(rendered: &str, year: &str, ep_label: &str) -> String {
    if year.is_empty() || rendered.contains(&format!("({year})")) {
        return rendered.to_string();
    }

    let marker = format!("({year})");
    if !ep_label.is_empty() {
        if let Some(pos) = rendered.find(ep_label) {
            let mut out = rendered[..pos].trim_end().to_string();
            out.push(' ');
            out.push_str(&marker);
            out.push_str(" - ");
            out.push_str(&rendered[pos..]);
            return out;
        }
    }
    if let Some(pos) = rendered.find(" - ") {
        let mut out = rendered[..pos].trim_end().to_string();
        out.push(' ');
        out.push_str(&marker);
        out.push_str(&rendered[pos..]);
        return out;
    }
    format!("{} {marker}", rendered.trim_end())
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if r#"\/:*?"<>|"#.contains(c) { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncates only the episode-title suffix with an ellipsis, preserving
/// the `Title (Year) - SxxEyy` prefix (spec §4.8 step 8).
fn truncate_preserving_prefix(name: &str, ep_label: &str, byte_limit: usize) -> String {
    if name.len() <= byte_limit {
        return name.to_string();
    }

    let prefix_end = if ep_label.is_empty() {
        0
    } else {
        name.find(ep_label).map(|p| p + ep_label.len()).unwrap_or(0)
    };

    let ellipsis = "...";
    let available = byte_limit.saturating_sub(ellipsis.len());
    if prefix_end >= available {
        return truncate_at_char_boundary(name, available.max(1)) + ellipsis;
    }

    let mut truncated = truncate_at_char_boundary(name, available);
    if truncated.len() < prefix_end {
        truncated = name[..prefix_end].to_string();
    }
    truncated + ellipsis
}

fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tv_entry() -> EnrichEntry {
        EnrichEntry {
            series_title: Some("Frieren".into()),
            title: Some("Frieren".into()),
            year: Some("2023".into()),
            season: Some(1),
            episode: Some(5),
            episode_title: Some("The Hero's Party".into()),
            ..EnrichEntry::default()
        }
    }

    #[test]
    fn renders_default_tv_template() {
        let rendered = render(&tv_entry(), &RenderOptions::default(), TargetOs::Linux).unwrap();
        assert_eq!(rendered.series_folder, "Frieren");
        assert_eq!(rendered.season_folder.as_deref(), Some("Season 01"));
        assert!(rendered.filename_stem.contains("S01E05"));
        assert!(rendered.filename_stem.contains("The Hero's Party"));
        assert!(rendered.filename_stem.contains("(2023)"));
    }

    #[test]
    fn movie_has_no_season_folder_or_episode_marker() {
        let mut entry = tv_entry();
        entry.is_movie = Some(true);
        entry.season = None;
        entry.episode = None;
        entry.episode_title = None;

        let rendered = render(&entry, &RenderOptions::default(), TargetOs::Linux).unwrap();
        assert!(rendered.season_folder.is_none());
        assert_eq!(rendered.series_folder, "Frieren (2023)");
        assert!(!rendered.filename_stem.contains("S0"));
    }

    #[test]
    fn alias_overrides_series_folder() {
        let mut options = RenderOptions::default();
        options.series_aliases.insert("frieren".into(), "Frieren: Beyond Journey's End".into());
        let rendered = render(&tv_entry(), &options, TargetOs::Linux).unwrap();
        // sanitized per spec §8 property 6, which binds every render output
        assert_eq!(rendered.series_folder, "Frieren Beyond Journey's End");
    }

    #[test]
    fn truncation_preserves_episode_marker_prefix() {
        let mut entry = tv_entry();
        entry.episode_title = Some("A".repeat(400));
        let rendered = render(&entry, &RenderOptions::default(), TargetOs::Linux).unwrap();
        assert!(rendered.filename_stem.len() <= TargetOs::Linux.basename_byte_limit());
        assert!(rendered.filename_stem.contains("S01E05"));
        assert!(rendered.filename_stem.ends_with("..."));
    }

    #[test]
    fn sanitize_strips_reserved_characters() {
        assert_eq!(sanitize_filename("Title: Part/One?"), "Title Part One");
    }

    #[test]
    fn cleanup_collapses_empty_brackets_and_double_dashes() {
        assert_eq!(cleanup_rendered("Title - [] - - End"), "Title - End");
    }
}
