//! CLI module — the command-line surface over the core renaming pipeline.
//!
//! Every subcommand prints its result as JSON to stdout; there is no HTTP
//! layer here (spec §1 Non-goals), so this doubles as the reference caller
//! for every public operation the pipeline exposes.

mod commands;

use crate::state::AppState;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

#[derive(Parser)]
#[command(name = "renamarr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Username whose per-user settings (provider keys, output paths,
    /// naming template) this invocation runs under (spec §6.2).
    #[arg(long, global = true, default_value = "default")]
    pub user: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a default config file if one doesn't already exist
    Init,

    /// Walk a whole library and resolve metadata for every video file
    Scan {
        /// Configured library id
        library: String,
    },

    /// Walk only the directories that changed since the last scan
    IncrementalScan {
        library: String,
    },

    /// Run a full scan against every configured library
    ForceFullScan,

    /// Resolve metadata for a single file
    Enrich {
        path: PathBuf,
        /// Library id to resolve relative paths against (defaults to the
        /// file's parent directory)
        #[arg(long)]
        library: Option<String>,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        force_hash: bool,
        #[arg(long)]
        skip_anime_providers: bool,
    },

    /// Resolve metadata for a batch of files
    EnrichBulk {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long)]
        library: Option<String>,
        #[arg(long)]
        force: bool,
    },

    /// Write a manual metadata entry for a file, bypassing every provider
    EnrichCustom {
        path: PathBuf,
        #[arg(long)]
        title: String,
        #[arg(long)]
        year: Option<String>,
        #[arg(long)]
        season: Option<i32>,
        #[arg(long)]
        episode: Option<i32>,
        #[arg(long)]
        episode_title: Option<String>,
        #[arg(long)]
        is_movie: Option<bool>,
    },

    /// Show what `apply` would do without touching the filesystem
    Preview {
        library: String,
        #[arg(long)]
        template: Option<String>,
        #[arg(long)]
        use_filename_as_title: bool,
    },

    /// Hardlink the latest scan's rendered plans into the output library
    Apply {
        library: String,
        #[arg(long)]
        template: Option<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        output_folder: Option<PathBuf>,
    },

    /// Reverse an apply, restoring the source file to the visible scan set
    Unapprove {
        /// Explicit source paths to unapprove (otherwise the most recently
        /// applied `count` entries are selected)
        paths: Vec<PathBuf>,
        #[arg(long)]
        count: Option<usize>,
    },

    /// Drop enrich entries whose source file no longer exists on disk
    Sweep,

    /// List every entry currently hidden from scans (applied or hidden)
    ListHidden,

    /// List groups of entries that would render to the same filename
    ListDuplicates,

    /// List hide/unhide reconciliation events since a given timestamp
    HideEventsSince {
        since: i64,
    },

    /// Per-series and per-path metadata ID overrides
    ManualIds {
        #[command(subcommand)]
        command: ManualIdsCommands,
    },

    /// Cached cover artwork for applied series
    ApprovedSeries {
        #[command(subcommand)]
        command: ApprovedSeriesCommands,
    },

    /// Watch a library for filesystem changes and incrementally rescan it
    Watch {
        library: String,
    },
}

#[derive(Subcommand)]
pub enum ManualIdsCommands {
    /// Show the manual provider IDs pinned to a series name
    GetSeries { name: String },
    /// Pin a series name to explicit provider IDs
    SetSeries {
        name: String,
        #[arg(long)]
        anilist: Option<i32>,
        #[arg(long)]
        tmdb: Option<i64>,
        #[arg(long)]
        tvdb: Option<i64>,
    },
    /// Show the manual AniDB episode override pinned to a file
    GetPath { path: PathBuf },
    /// Pin a file to an explicit AniDB episode id
    SetPath {
        path: PathBuf,
        #[arg(long)]
        anidb_episode: Option<i32>,
    },
}

#[derive(Subcommand)]
pub enum ApprovedSeriesCommands {
    /// List every cached approved-series image
    List,
    /// Re-fetch a series' artwork from a specific provider
    SetSource {
        #[arg(long)]
        output_root: String,
        #[arg(long)]
        series: String,
        #[arg(long)]
        provider: String,
    },
    /// Fetch artwork for a single series
    FetchImage {
        #[arg(long)]
        output_root: String,
        #[arg(long)]
        series: String,
        #[arg(long, default_value = "anilist")]
        provider: String,
    },
    /// Fetch artwork for every currently-applied series missing it
    FetchAll,
    /// Clear the entire approved-series image cache
    ClearCache,
}

/// Dispatches a parsed [`Cli`] invocation against `state`.
pub async fn run_command(cli: Cli, state: &AppState) -> anyhow::Result<()> {
    let Some(command) = cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let user = cli.user.as_str();

    match command {
        Commands::Init => {
            crate::config::Config::create_default_if_missing()?;
            println!("Config file created. Edit config.toml and run again.");
            Ok(())
        }

        Commands::Scan { library } => commands::cmd_scan(state, user, &library).await,
        Commands::IncrementalScan { library } => commands::cmd_incremental_scan(state, user, &library).await,
        Commands::ForceFullScan => commands::cmd_force_full_scan(state, user).await,

        Commands::Enrich { path, library, force, force_hash, skip_anime_providers } => {
            commands::cmd_enrich(state, user, &path, library.as_deref(), force, force_hash, skip_anime_providers).await
        }
        Commands::EnrichBulk { paths, library, force } => {
            commands::cmd_enrich_bulk(state, user, &paths, library.as_deref(), force).await
        }
        Commands::EnrichCustom { path, title, year, season, episode, episode_title, is_movie } => {
            commands::cmd_enrich_custom(state, &path, title, year, season, episode, episode_title, is_movie).await
        }

        Commands::Preview { library, template, use_filename_as_title } => {
            commands::cmd_preview(state, user, &library, template, use_filename_as_title).await
        }
        Commands::Apply { library, template, dry_run, output_folder } => {
            commands::cmd_apply(state, user, &library, template, dry_run, output_folder).await
        }
        Commands::Unapprove { paths, count } => commands::cmd_unapprove(state, user, &paths, count).await,

        Commands::Sweep => commands::cmd_sweep(state).await,
        Commands::ListHidden => commands::cmd_list_hidden_or_applied(state).await,
        Commands::ListDuplicates => commands::cmd_list_duplicates(state).await,
        Commands::HideEventsSince { since } => commands::cmd_hide_events_since(state, since).await,

        Commands::ManualIds { command } => match command {
            ManualIdsCommands::GetSeries { name } => commands::cmd_manual_ids_get_series(state, &name).await,
            ManualIdsCommands::SetSeries { name, anilist, tmdb, tvdb } => {
                commands::cmd_manual_ids_set_series(state, &name, anilist, tmdb, tvdb).await
            }
            ManualIdsCommands::GetPath { path } => commands::cmd_manual_ids_get_path(state, &path).await,
            ManualIdsCommands::SetPath { path, anidb_episode } => {
                commands::cmd_manual_ids_set_path(state, &path, anidb_episode).await
            }
        },

        Commands::ApprovedSeries { command } => match command {
            ApprovedSeriesCommands::List => commands::cmd_approved_series_list(state).await,
            ApprovedSeriesCommands::SetSource { output_root, series, provider } => {
                commands::cmd_approved_series_set_source(state, user, &output_root, &series, &provider).await
            }
            ApprovedSeriesCommands::FetchImage { output_root, series, provider } => {
                commands::cmd_approved_series_fetch_image(state, user, &output_root, &series, &provider).await
            }
            ApprovedSeriesCommands::FetchAll => commands::cmd_approved_series_fetch_all(state, user).await,
            ApprovedSeriesCommands::ClearCache => commands::cmd_approved_series_clear_cache(state).await,
        },

        Commands::Watch { library } => commands::cmd_watch(state, user, &library).await,
    }
}
