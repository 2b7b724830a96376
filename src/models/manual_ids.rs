//! Manual provider-ID overrides. Spec §9 flags the source's single
//! flat namespace (series-title keys and file-path keys mixed together) as a
//! collision risk; per DESIGN.md this is resolved by splitting it into two
//! maps, one keyed by normalized series title and one by canonical path.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeriesManualIds {
    pub anilist: Option<i32>,
    pub tmdb: Option<i64>,
    pub tvdb: Option<i64>,
}

impl SeriesManualIds {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.anilist.is_none() && self.tmdb.is_none() && self.tvdb.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathManualIds {
    pub anidb_episode: Option<i32>,
}

impl PathManualIds {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.anidb_episode.is_none()
    }
}
