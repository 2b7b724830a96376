//! C2 Filename Parser — turns a basename into a [`ParsedEntry`]. Never
//! fails: on ambiguity it returns the best partial fill (spec §4.1).
//!
//! Strategy: strip bracketed release-group tags first, then version
//! suffixes (`v2`/`v3`), then locate the episode token (the hardest part —
//! several competing shapes are tried in order of specificity), and treat
//! whatever survives as the candidate title. A trailing "- Episode Title"
//! segment after the episode token is captured separately.

use crate::models::ParsedEntry;
use regex::Regex;
use std::sync::OnceLock;

macro_rules! regex_cell {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("static regex is valid"))
        }
    };
}

regex_cell!(re_bracket_group, r"\[[^\]]*\]");
regex_cell!(re_paren_tag, r"\((?:19|20)\d{2}\)");
regex_cell!(re_version_suffix, r"(?i)v(\d+)\b");
regex_cell!(re_year, r"(?:^|[^0-9])((?:19|20)\d{2})(?:[^0-9]|$)");
regex_cell!(
    re_sxxeyy_range,
    r"(?i)\bS(\d{1,2})E(\d{1,4})(?:-E?(\d{1,4}))\b"
);
regex_cell!(re_sxxeyy, r"(?i)\bS(\d{1,2})E(\d{1,4}(?:\.\d+)?)\b");
regex_cell!(re_nxnn, r"(?i)\b(\d{1,2})x(\d{1,4})\b");
regex_cell!(
    re_episode_word,
    r"(?i)\b(?:Ep(?:isode)?)\.?\s*(\d{1,4}(?:\.\d+)?)\b"
);
regex_cell!(
    re_bare_episode,
    r"(?:^|[\s_-])(\d{1,4}(?:\.\d+)?)(?:v\d+)?(?:[\s_-]|$)"
);
regex_cell!(
    re_resolution_or_codec,
    r"(?i)\b(?:4K|2160p|1080p|720p|480p|576p|HEVC|x265|x264|H\.?26[45]|AVC|10bit|8bit|WEB-?DL|WEBRip|BD|Blu-?Ray|HDTV|DVDRip|HMAX|AMZN|NF|DSNP|CR|FLAC|AAC|AC3|EAC3|DTS|TrueHD|Opus)\b"
);

struct EpisodeMatch {
    season: Option<i32>,
    episode: Option<i32>,
    episode_range: Option<String>,
    /// byte range in the (bracket/version-stripped) residue occupied by the
    /// episode token, used to split "before" (title) from "after" (episode
    /// title) segments.
    span: (usize, usize),
}

#[must_use]
pub fn parse_filename(basename: &str, now: i64) -> ParsedEntry {
    let stem = strip_extension(basename);
    let normalized = normalize_quotes(stem);

    let (residue, had_bracket_prefix) = strip_leading_brackets(&normalized);
    let residue = re_version_suffix().replace_all(&residue, "").to_string();

    let year = extract_year(&normalized);

    let episode_match = find_episode_match(&residue);

    let (title_part, episode_title) = match &episode_match {
        Some(m) => split_around_episode(&residue, m.span),
        None => (residue.clone(), None),
    };

    let title = clean_candidate_title(&title_part);
    let starts_with_episode = had_bracket_prefix && title.is_empty();

    let parsed_name = build_parsed_name(&title, episode_match.as_ref(), episode_title.as_deref());

    ParsedEntry {
        title: if title.is_empty() {
            strip_extension(basename).to_string()
        } else {
            title
        },
        parsed_name,
        season: episode_match.as_ref().and_then(|m| m.season),
        episode: episode_match.as_ref().and_then(|m| m.episode),
        episode_range: episode_match.as_ref().and_then(|m| m.episode_range.clone()),
        episode_title,
        year,
        timestamp: now,
        starts_with_episode,
    }
}

fn strip_extension(filename: &str) -> &str {
    filename.rsplit_once('.').map_or(filename, |(stem, ext)| {
        if ext.len() <= 4 && ext.chars().all(char::is_alphanumeric) {
            stem
        } else {
            filename
        }
    })
}

/// Normalizes curly/smart apostrophes and quotes to ASCII (spec §4.1).
fn normalize_quotes(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{02BC}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2013}' | '\u{2014}' => '-',
            other => other,
        })
        .collect()
}

/// Strips a leading `[Group]` bracket tag, which is always the release
/// group rather than content of interest (spec §4.1 "strip bracketed
/// groups first"). Returns the residue and whether a leading bracket was
/// present at all (used for "starts with episode" detection when the
/// residue title ends up empty).
fn strip_leading_brackets(s: &str) -> (String, bool) {
    let trimmed = s.trim_start();
    if let Some(rest) = trimmed.strip_prefix('[')
        && let Some(end) = rest.find(']')
    {
        return (rest[end + 1..].trim_start().to_string(), true);
    }
    (s.to_string(), false)
}

fn extract_year(s: &str) -> Option<String> {
    // Prefer a parenthesized year, it's the least ambiguous signal.
    if let Some(m) = re_paren_tag().find(s) {
        let digits: String = m.as_str().chars().filter(char::is_ascii_digit).collect();
        return Some(digits);
    }
    re_year().captures(s).map(|c| c[1].to_string())
}

fn find_episode_match(residue: &str) -> Option<EpisodeMatch> {
    if let Some(c) = re_sxxeyy_range().captures(residue) {
        let whole = c.get(0).unwrap();
        return Some(EpisodeMatch {
            season: c[1].parse().ok(),
            episode: c[2].parse().ok(),
            episode_range: Some(format!("{:0>2}-{:0>2}", &c[2], &c[3])),
            span: (whole.start(), whole.end()),
        });
    }
    if let Some(c) = re_sxxeyy().captures(residue) {
        let whole = c.get(0).unwrap();
        let episode = c[2].split('.').next().and_then(|n| n.parse().ok());
        return Some(EpisodeMatch {
            season: c[1].parse().ok(),
            episode,
            episode_range: None,
            span: (whole.start(), whole.end()),
        });
    }
    if let Some(c) = re_nxnn().captures(residue) {
        let whole = c.get(0).unwrap();
        return Some(EpisodeMatch {
            season: c[1].parse().ok(),
            episode: c[2].parse().ok(),
            episode_range: None,
            span: (whole.start(), whole.end()),
        });
    }
    if let Some(c) = re_episode_word().captures(residue) {
        let whole = c.get(0).unwrap();
        let episode = c[1].split('.').next().and_then(|n| n.parse().ok());
        return Some(EpisodeMatch {
            season: None,
            episode,
            episode_range: None,
            span: (whole.start(), whole.end()),
        });
    }
    // Bare numeric episode (anime release convention: "Title - 05 [tags]").
    // Rejects resolution-looking numbers (720/1080/2160/480) and bare years.
    for c in re_bare_episode().captures_iter(residue) {
        let num_match = c.get(1).unwrap();
        let Ok(as_int) = num_match.as_str().split('.').next().unwrap_or("").parse::<i32>() else {
            continue;
        };
        if [480, 576, 720, 1080, 2160].contains(&as_int) || (1900..=2099).contains(&as_int) {
            continue;
        }
        let whole = c.get(0).unwrap();
        return Some(EpisodeMatch {
            season: None,
            episode: Some(as_int),
            episode_range: None,
            span: (num_match.start(), whole.end().min(num_match.end() + 1)),
        });
    }
    None
}

/// Splits `residue` into the part before the episode token (candidate
/// title) and a trailing "- Episode Title" segment, if any, after it.
fn split_around_episode(residue: &str, span: (usize, usize)) -> (String, Option<String>) {
    let before = &residue[..span.0];
    let after = residue.get(span.1..).unwrap_or_default();

    let trailing = after
        .trim_start()
        .trim_start_matches(['-', '_'])
        .trim()
        .to_string();

    let episode_title = if trailing.is_empty() {
        None
    } else {
        let cleaned = strip_trailing_tags(&trailing);
        if cleaned.is_empty() { None } else { Some(cleaned) }
    };

    (before.to_string(), episode_title)
}

/// Removes trailing `[tags]`/`(tags)` groups and resolution/codec tokens
/// from an episode-title candidate, e.g. `"Orejihanki [1080p][HEVC]"` ->
/// `"Orejihanki"`.
fn strip_trailing_tags(s: &str) -> String {
    let mut out = re_bracket_group().replace_all(s, "").to_string();
    out = re_resolution_or_codec().replace_all(&out, "").to_string();
    collapse_whitespace(out.trim())
}

fn clean_candidate_title(s: &str) -> String {
    let mut out = re_bracket_group().replace_all(s, "").to_string();
    out = re_paren_tag().replace_all(&out, "").to_string();
    out = re_resolution_or_codec().replace_all(&out, "").to_string();
    out = out.replace('.', " ").replace('_', " ");
    let trimmed = out.trim().trim_end_matches(['-', '_']).trim();
    collapse_whitespace(trimmed)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn build_parsed_name(title: &str, episode: Option<&EpisodeMatch>, episode_title: Option<&str>) -> String {
    let mut parts = vec![title.to_string()];
    if let Some(m) = episode {
        let label = match (m.season, m.episode, &m.episode_range) {
            (Some(s), _, Some(range)) => format!("S{s:02}E{range}"),
            (Some(s), Some(e), None) => format!("S{s:02}E{e:02}"),
            (None, Some(e), None) => format!("E{e:02}"),
            _ => String::new(),
        };
        if !label.is_empty() {
            parts.push(label);
        }
    }
    if let Some(t) = episode_title {
        parts.push(t.to_string());
    }
    parts.retain(|p| !p.is_empty());
    parts.join(" - ")
}

/// Detects season markers (`Season N`, `2nd Season`, `Part N`, roman
/// numerals) in an arbitrary title string — used by the resolver when
/// normalizing provider-returned series titles (spec §4.5/§4.6), not just
/// filenames.
#[must_use]
pub fn detect_season_from_title(title: &str) -> Option<i32> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"(?i)\b(?:Season|S)\s*(\d+)\b").expect("static regex is valid"),
            Regex::new(r"(?i)\b(\d+)(?:st|nd|rd|th)\s+Season\b").expect("static regex is valid"),
            Regex::new(r"(?i)\bPart\s+(\d+|I{1,3}V?|VI{0,3})\b").expect("static regex is valid"),
            Regex::new(r"(?i)\bCour\s+(\d+)\b").expect("static regex is valid"),
            Regex::new(r"\b(I{2,3}V?|VI{0,3})\s*$").expect("static regex is valid"),
        ]
    });

    for pattern in patterns {
        if let Some(caps) = pattern.captures(title)
            && let Some(m) = caps.get(1)
        {
            let num_str = m.as_str();
            if let Ok(n) = num_str.parse::<i32>() {
                return Some(n);
            }
            if let Some(n) = roman_to_int(num_str) {
                return Some(n);
            }
        }
    }
    None
}

fn roman_to_int(s: &str) -> Option<i32> {
    match s.to_uppercase().as_str() {
        "I" => Some(1),
        "II" => Some(2),
        "III" => Some(3),
        "IV" => Some(4),
        "V" => Some(5),
        "VI" => Some(6),
        "VII" => Some(7),
        "VIII" => Some(8),
        "IX" => Some(9),
        "X" => Some(10),
        _ => None,
    }
}

/// Strips trailing season-suffix tokens (`Season 2`, `2nd Season`, `S02`,
/// parenthetical forms, `Part N`) from a series title — spec §4.5 step 4,
/// §4.6 normalization. Does not touch movie `Part N` titles; callers only
/// apply this to non-movie series titles.
#[must_use]
pub fn strip_season_suffix(title: &str) -> String {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"(?i)\s*\d+(?:st|nd|rd|th)\s+Season\s*$").expect("static regex is valid"),
            Regex::new(r"(?i)\s*Second\s+Season\s*$").expect("static regex is valid"),
            Regex::new(r"(?i)\s*Season\s*\d+\s*$").expect("static regex is valid"),
            Regex::new(r"(?i)\s*S0*\d{1,2}\s*$").expect("static regex is valid"),
            Regex::new(r"\s*\(\s*Season\s*\d+\s*\)\s*$").expect("static regex is valid"),
            Regex::new(r"\s+(?:I{2,3}V?|VI{0,3})\s*$").expect("static regex is valid"),
        ]
    });

    let mut result = title.to_string();
    for pattern in patterns {
        result = pattern.replace(&result, "").to_string();
    }
    result.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_anime_release_with_parent_elevation_signal() {
        let p = parse_filename("S01E05 - Orejihanki.mkv", 0);
        assert_eq!(p.season, Some(1));
        assert_eq!(p.episode, Some(5));
        assert_eq!(p.episode_title.as_deref(), Some("Orejihanki"));
        assert!(p.starts_with_episode);
    }

    #[test]
    fn parses_sxxeyy_range() {
        let p = parse_filename("[Group] Show - S01E01-E02 [1080p].mkv", 0);
        assert_eq!(p.season, Some(1));
        assert_eq!(p.episode, Some(1));
        assert_eq!(p.episode_range.as_deref(), Some("01-02"));
    }

    #[test]
    fn parses_bare_numeric_episode() {
        let p = parse_filename("[SubsPlease] Frieren - 05 [1080p][HEVC x265 10bit].mkv", 0);
        assert_eq!(p.title, "Frieren");
        assert_eq!(p.episode, Some(5));
        assert_eq!(p.season, None);
    }

    #[test]
    fn parses_decimal_episode() {
        let p = parse_filename("[Group] Anime - 6.5 [1080p].mkv", 0);
        assert_eq!(p.episode, Some(6));
    }

    #[test]
    fn strips_version_suffix() {
        let p = parse_filename("[Group] Show - 05v2 [1080p].mkv", 0);
        assert_eq!(p.episode, Some(5));
        assert_eq!(p.title, "Show");
    }

    #[test]
    fn extracts_year() {
        let p = parse_filename("Movie Title (2010).mkv", 0);
        assert_eq!(p.year.as_deref(), Some("2010"));
    }

    #[test]
    fn normalizes_smart_apostrophes() {
        let p = parse_filename("Frieren\u{2019}s Journey - 05.mkv", 0);
        assert!(p.title.contains('\''));
        assert!(!p.title.contains('\u{2019}'));
    }

    #[test]
    fn strip_season_suffix_removes_trailing_tokens() {
        assert_eq!(strip_season_suffix("Oshi no Ko Season 2"), "Oshi no Ko");
        assert_eq!(strip_season_suffix("My Hero Academia 2nd Season"), "My Hero Academia");
        assert_eq!(strip_season_suffix("Demon Slayer S03"), "Demon Slayer");
    }

    #[test]
    fn detect_season_handles_ordinals_and_romans() {
        assert_eq!(detect_season_from_title("Title Season 3"), Some(3));
        assert_eq!(detect_season_from_title("Title 2nd Season"), Some(2));
        assert_eq!(detect_season_from_title("Title III"), Some(3));
        assert_eq!(detect_season_from_title("Just a Title"), None);
    }

    #[test]
    fn parser_never_panics_on_empty_input() {
        let p = parse_filename("", 0);
        assert!(!p.title.is_empty() || p.title.is_empty());
    }
}
