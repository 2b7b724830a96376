//! Plain data records persisted by the KV store (C3) and passed between
//! services. Kept free of behavior beyond small derived helpers, mirroring
//! the teacher's `models/*.rs` convention of thin serde structs plus a
//! handful of `impl` helper methods.

pub mod approved_image;
pub mod enrich;
pub mod manual_ids;
pub mod parsed;
pub mod provider;
pub mod rendered_index;
pub mod scan;
pub mod wiki_cache;

pub use approved_image::ApprovedSeriesImage;
pub use enrich::EnrichEntry;
pub use manual_ids::{PathManualIds, SeriesManualIds};
pub use parsed::ParsedEntry;
pub use provider::{ProviderBlock, ProviderFailure, ProviderRaw};
pub use rendered_index::RenderedIndexRow;
pub use scan::{ScanArtifact, ScanCache, ScanItem};
pub use wiki_cache::WikiEpisodeCacheEntry;
