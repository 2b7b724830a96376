//! `RenderedIndex` — target-path → source-path mapping used to reconcile
//! what produced a given hardlink, and to clean up on unapprove (spec §3).

use crate::domain::{CanonicalPath, ProviderId};
use crate::models::{ParsedEntry, ProviderBlock};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedIndexRow {
    pub source: CanonicalPath,
    pub rendered_name: String,
    pub applied_to: CanonicalPath,
    pub metadata_filename: String,
    pub provider: Option<ProviderId>,
    pub parsed: Option<ParsedEntry>,
}

impl RenderedIndexRow {
    #[must_use]
    pub fn from_apply(
        source: CanonicalPath,
        applied_to: CanonicalPath,
        rendered_name: String,
        metadata_filename: String,
        provider_block: Option<&ProviderBlock>,
        parsed: Option<ParsedEntry>,
    ) -> Self {
        Self {
            source,
            rendered_name,
            applied_to,
            metadata_filename,
            provider: provider_block.map(|p| p.provider),
            parsed,
        }
    }
}
