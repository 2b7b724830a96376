//! C8 Provider Adapters — one module per provider, each returning its own
//! typed candidate/hit structs and a `ProviderRaw` variant (spec §9).

pub mod anidb;
pub mod anilist;
pub mod kitsu;
pub mod rate_limiter;
pub mod tmdb;
pub mod tvdb;
pub mod wikipedia;

use rate_limiter::HostPacer;
use std::time::Duration;

/// Registers the spec §4.3 default per-host spacings on a fresh pacer. Each
/// adapter constructor takes the same shared `HostPacer`, so this only needs
/// to run once at startup.
pub fn configure_default_pacing(pacer: &HostPacer) {
    pacer.set_min_spacing(anilist::ANILIST_HOST, Duration::from_millis(250));
    pacer.set_min_spacing(kitsu::KITSU_HOST, Duration::from_millis(250));
    pacer.set_min_spacing(tmdb::TMDB_HOST, Duration::from_millis(300));
    pacer.set_min_spacing(wikipedia::WIKIPEDIA_HOST, Duration::from_millis(300));
    pacer.set_min_spacing(tvdb::TVDB_HOST, Duration::from_millis(300));
    pacer.set_min_spacing(anidb::ANIDB_HTTP_HOST, Duration::from_millis(2000));
}
