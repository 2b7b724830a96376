//! `EnrichEntry` — the per-file aggregated record (spec §3), the thing every
//! other component ultimately reads and writes.

use crate::models::{ParsedEntry, ProviderBlock, ProviderFailure};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichEntry {
    pub parsed: Option<ParsedEntry>,
    pub provider: Option<ProviderBlock>,
    pub provider_failure: Option<ProviderFailure>,

    // Denormalized display fields, kept in sync by the enrich cache
    // manager's normalization pass (C10).
    pub title: Option<String>,
    pub series_title: Option<String>,
    pub series_title_exact: Option<String>,
    pub series_title_english: Option<String>,
    pub series_title_romaji: Option<String>,
    pub original_series_title: Option<String>,
    pub parent_candidate: Option<String>,
    pub series_lookup_title: Option<String>,
    pub year: Option<String>,
    pub is_movie: Option<bool>,
    pub media_format: Option<String>,
    pub episode_title: Option<String>,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub episode_range: Option<String>,

    pub applied: bool,
    pub hidden: bool,
    pub applied_at: Option<i64>,
    pub applied_to: Vec<String>,
    pub metadata_filename: Option<String>,
    pub rendered_name: Option<String>,
    pub extra_guess: Option<String>,
    pub source_id: Option<String>,
    pub timestamp: i64,
    pub cached_at: i64,
}

impl EnrichEntry {
    /// Applies `patch` onto `self`, always carrying forward the
    /// applied/hidden bookkeeping fields unless the caller is the Unapprove
    /// Engine (spec §3 `EnrichEntry` invariant 2, spec §4.6 `update`).
    ///
    /// `patch` should already have its own applied/hidden/etc. fields unset
    /// (the caller never knows better than the prior state for those).
    pub fn merge_preserving_apply_state(&mut self, patch: EnrichEntry) {
        let EnrichEntry {
            applied,
            hidden,
            applied_at,
            applied_to,
            metadata_filename,
            rendered_name,
            ..
        } = std::mem::take(self);

        *self = patch;
        self.applied = applied;
        self.hidden = hidden;
        self.applied_at = applied_at;
        self.applied_to = applied_to;
        self.metadata_filename = metadata_filename;
        self.rendered_name = rendered_name;

        if self
            .provider
            .as_ref()
            .is_some_and(|p| p.matched)
        {
            self.provider_failure = None;
        }
    }

    /// Clears apply/hide bookkeeping — only the Unapprove Engine calls this.
    pub fn clear_apply_state(&mut self) {
        self.applied = false;
        self.hidden = false;
        self.applied_at = None;
        self.applied_to.clear();
    }

    #[must_use]
    pub fn is_visible_in_scans(&self) -> bool {
        !(self.applied || self.hidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_preserves_apply_state_by_default() {
        let mut entry = EnrichEntry {
            applied: true,
            hidden: true,
            applied_at: Some(100),
            applied_to: vec!["/out/a.mkv".into()],
            rendered_name: Some("a.mkv".into()),
            ..Default::default()
        };

        let patch = EnrichEntry {
            title: Some("New Title".into()),
            ..Default::default()
        };

        entry.merge_preserving_apply_state(patch);

        assert!(entry.applied);
        assert!(entry.hidden);
        assert_eq!(entry.applied_at, Some(100));
        assert_eq!(entry.applied_to, vec!["/out/a.mkv".to_string()]);
        assert_eq!(entry.title.as_deref(), Some("New Title"));
    }

    #[test]
    fn clear_apply_state_resets_flags() {
        let mut entry = EnrichEntry {
            applied: true,
            hidden: true,
            applied_at: Some(1),
            applied_to: vec!["/out/a.mkv".into()],
            ..Default::default()
        };
        entry.clear_apply_state();
        assert!(!entry.applied);
        assert!(!entry.hidden);
        assert!(entry.applied_at.is_none());
        assert!(entry.applied_to.is_empty());
    }

    #[test]
    fn matched_provider_clears_failure() {
        use crate::domain::ProviderId;
        use crate::models::provider::{FailureReason, ProviderFailure};
        use crate::models::ProviderBlock;

        let mut entry = EnrichEntry {
            provider_failure: Some(ProviderFailure::new(
                ProviderId::Tmdb,
                FailureReason::NoMatch,
                None,
                None,
                0,
            )),
            ..Default::default()
        };

        let patch = EnrichEntry {
            provider: Some(ProviderBlock {
                provider: ProviderId::Tmdb,
                id: "1".into(),
                title: "Show".into(),
                year: None,
                season: None,
                episode: None,
                episode_title: None,
                rendered_name: Some("Show".into()),
                matched: true,
                source: "TMDB".into(),
                raw: None,
                series_title_english: None,
                series_title_romaji: None,
                series_title_exact: None,
                original_series_title: None,
                sources: None,
            }),
            ..Default::default()
        };

        entry.merge_preserving_apply_state(patch);
        assert!(entry.provider_failure.is_none());
    }
}
