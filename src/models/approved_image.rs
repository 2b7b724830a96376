//! Approved-series artwork cache (C14) — spec §3 `ApprovedSeriesImage`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovedSeriesImage {
    pub provider: String,
    pub image_url: String,
    pub summary: Option<String>,
    pub media_id: Option<String>,
    pub fetched_at: i64,
}

/// Builds the `"<outputRoot>::<normalizedSeriesName>"` cache key (spec §3).
#[must_use]
pub fn cache_key(output_root: &str, normalized_series: &str) -> String {
    format!("{output_root}::{normalized_series}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_joins_with_double_colon() {
        assert_eq!(cache_key("/out/anime", "frieren"), "/out/anime::frieren");
    }
}
