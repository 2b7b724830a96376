//! Domain primitives shared across the resolution/render/apply pipeline.
//!
//! Follows the Newtype pattern established for entity identifiers: a
//! `CanonicalPath` is the single key used by every on-disk map, so it gets a
//! type of its own rather than being passed around as a bare `String`.

pub mod events;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Absolute, forward-slash-normalized, OS-resolved path used as the primary
/// cache key everywhere (C1 Path Canonicalizer).
///
/// Two paths that point at the same file after resolving `.`/`..` and
/// symlinks compare equal once passed through [`CanonicalPath::new`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalPath(String);

impl CanonicalPath {
    /// Canonicalizes `path` against the filesystem. Falls back to a purely
    /// lexical normalization if the path does not exist yet (the apply
    /// engine needs to canonicalize planned destinations that don't exist).
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| Self::lexical_normalize(path));
        Self(Self::to_forward_slash(&resolved))
    }

    /// Builds a `CanonicalPath` without touching the filesystem. Used for
    /// plan targets that don't exist yet and in unit tests.
    #[must_use]
    pub fn new_lexical(path: impl AsRef<Path>) -> Self {
        Self(Self::to_forward_slash(&Self::lexical_normalize(path.as_ref())))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    fn to_forward_slash(path: &Path) -> String {
        path.to_string_lossy().replace('\\', "/")
    }

    fn lexical_normalize(path: &Path) -> PathBuf {
        let mut out = PathBuf::new();
        for component in path.components() {
            use std::path::Component;
            match component {
                Component::ParentDir => {
                    out.pop();
                }
                Component::CurDir => {}
                other => out.push(other.as_os_str()),
            }
        }
        out
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CanonicalPath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<PathBuf> for CanonicalPath {
    fn from(value: PathBuf) -> Self {
        Self::new(value)
    }
}

/// One of the six metadata providers the resolver can consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Anidb,
    Anilist,
    Tvdb,
    Tmdb,
    Wikipedia,
    Kitsu,
}

impl ProviderId {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anidb => "anidb",
            Self::Anilist => "anilist",
            Self::Tvdb => "tvdb",
            Self::Tmdb => "tmdb",
            Self::Wikipedia => "wikipedia",
            Self::Kitsu => "kitsu",
        }
    }

    #[must_use]
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "anidb" => Some(Self::Anidb),
            "anilist" => Some(Self::Anilist),
            "tvdb" => Some(Self::Tvdb),
            "tmdb" => Some(Self::Tmdb),
            "wikipedia" => Some(Self::Wikipedia),
            "kitsu" => Some(Self::Kitsu),
            _ => None,
        }
    }

    /// Minimum spacing between requests to this provider's host (C7).
    #[must_use]
    pub const fn min_spacing_ms(self) -> u64 {
        match self {
            Self::Anilist | Self::Kitsu => 250,
            Self::Tmdb | Self::Wikipedia => 300,
            Self::Tvdb => 300,
            Self::Anidb => 0, // paced by its own UDP flood-control, not HTTP host pacing
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Current Unix timestamp in seconds — the one place the pipeline reads the
/// clock, so callers pass a value down rather than each reaching for
/// `SystemTime::now()` independently.
#[must_use]
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Identifies a scan library by its configured root path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LibraryId(String);

impl LibraryId {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_path_normalizes_backslashes() {
        let p = CanonicalPath::new_lexical("C:\\lib\\Show\\ep.mkv");
        assert!(!p.as_str().contains('\\'));
    }

    #[test]
    fn canonical_path_collapses_parent_dirs() {
        let p = CanonicalPath::new_lexical("/lib/Show/../Show/ep.mkv");
        assert_eq!(p.as_str(), "/lib/Show/ep.mkv");
    }

    #[test]
    fn provider_id_round_trips_through_str() {
        for p in [
            ProviderId::Anidb,
            ProviderId::Anilist,
            ProviderId::Tvdb,
            ProviderId::Tmdb,
            ProviderId::Wikipedia,
            ProviderId::Kitsu,
        ] {
            assert_eq!(ProviderId::from_str_opt(p.as_str()), Some(p));
        }
    }

    #[test]
    fn provider_spacing_matches_spec_defaults() {
        assert_eq!(ProviderId::Anilist.min_spacing_ms(), 250);
        assert_eq!(ProviderId::Kitsu.min_spacing_ms(), 250);
        assert_eq!(ProviderId::Tmdb.min_spacing_ms(), 300);
        assert_eq!(ProviderId::Wikipedia.min_spacing_ms(), 300);
    }
}
