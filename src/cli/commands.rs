//! Implementations of the logical command surface (spec §6.3), wrapped by
//! the CLI defined in `cli::mod`. Every command reads/writes through
//! [`AppState`] and prints its result as JSON to stdout, standing in for
//! the HTTP surface the spec treats as an external, out-of-scope collaborator.

use crate::config::{Config, RequestOverrides};
use crate::domain::{now_unix, CanonicalPath};
use crate::models::manual_ids::{PathManualIds, SeriesManualIds};
use crate::models::EnrichEntry;
use crate::parser::filename::parse_filename;
use crate::services::apply::{self, ApplyOptions, Plan};
use crate::services::image_worker::{ImageProvider, SeriesImageRequest};
use crate::services::render::{self, RenderOptions, TargetOs};
use crate::services::resolver::{manual_ids_for, ManualIds, ResolveRequest};
use crate::state::AppState;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn library_path(config: &Config, library_id: &str) -> Result<PathBuf> {
    config
        .server
        .libraries
        .iter()
        .find(|l| l.id == library_id)
        .map(|l| l.path.clone())
        .ok_or_else(|| anyhow!("no library configured with id '{library_id}'"))
}

fn normalize_series_key(title: &str) -> String {
    title.trim().to_lowercase()
}

fn series_aliases(config: &Config) -> HashMap<String, String> {
    let Some(path) = dirs::config_dir().map(|d| d.join("renamarr").join("series-aliases.json")) else {
        return HashMap::new();
    };
    std::fs::read(&path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default()
}

async fn manual_ids_for_candidate(state: &AppState, canonical: &CanonicalPath, series_guess: &str) -> ManualIds {
    let series_key = normalize_series_key(series_guess);
    let series_map = state.store.manual_ids_by_series.read().await;
    let path_map = state.store.manual_ids_by_path.read().await;
    manual_ids_for(series_map.get(&series_key), path_map.get(canonical.as_str()))
}

/// Runs the parser + resolver + enrich-cache-write pipeline for a single
/// canonical path (spec §4.5, §4.6). Shared by `scan`, `enrich`, and
/// `enrich-bulk`.
async fn resolve_and_store(
    state: &AppState,
    username: &str,
    canonical: &CanonicalPath,
    library_root: &Path,
    force: bool,
    force_hash: bool,
    skip_anime_providers: bool,
) -> Result<EnrichEntry> {
    let config = state.config().await;
    let user_settings = config.user_settings(username);
    let resolved = config.resolve_provider_settings(username, &RequestOverrides::default());
    let resolver = state.build_resolver(&resolved);
    let enrich = state.enrich_cache();

    let cached = enrich.get(canonical).await;
    let now = now_unix();

    let basename = canonical.as_path().file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let series_guess = parse_filename(basename, now).title;
    let manual_ids = manual_ids_for_candidate(state, canonical, &series_guess).await;

    let request = ResolveRequest {
        canonical_path: canonical.as_path(),
        library_root,
        provider_order: user_settings.metadata_provider_order.clone(),
        manual_ids,
        force,
        force_hash,
        skip_anime_providers,
        now,
    };

    let resolved_entry = resolver.resolve(request, cached.as_ref()).await?;

    if let Some(parsed) = &resolved_entry.parsed {
        let parsed = parsed.clone();
        state.store.parsed.write_with(|m| { m.insert(canonical.as_str().to_string(), parsed); }).await;
    }

    let merged = enrich.update(canonical, resolved_entry).await;
    Ok(merged)
}

fn scan_lock_key(root: &Path) -> String {
    format!("scanPath:{}", root.display())
}

async fn run_scan(state: &AppState, username: &str, library_id: &str, incremental: bool) -> Result<crate::models::ScanArtifact> {
    let config = state.config().await;
    let root = library_path(&config, library_id)?;

    let _guard = state
        .scan_locks
        .try_acquire(&scan_lock_key(&root))
        .ok_or_else(|| anyhow!("a scan is already in progress for library '{library_id}'"))?;

    let scan_engine = state.scan_engine();
    let diff = if incremental {
        scan_engine.incremental_scan(root.clone()).await
    } else {
        scan_engine.full_scan(root.clone()).await
    };

    for path in &diff.to_process {
        if let Err(err) = resolve_and_store(state, username, path, &root, false, false, false).await {
            warn!(path = %path, error = %err, "scan: resolve failed for item");
        }
    }

    for path in &diff.removed {
        state.store.parsed.write_with(|m| { m.remove(path.as_str()); }).await;
        let keep = state
            .enrich_cache()
            .get(path)
            .await
            .is_some_and(|e| e.applied || e.hidden);
        if !keep {
            state.store.enrich.write_with(|m| { m.remove(path.as_str()); }).await;
        }
    }

    let now = now_unix();
    let root_str = CanonicalPath::new(&root).as_str().to_string();
    let mut items = Vec::new();
    {
        let files = state.store.scan_cache.read().await.files.clone();
        let enrich_map = state.store.enrich.read().await;
        for file_path in files.keys() {
            if !file_path.starts_with(&root_str) {
                continue;
            }
            let canonical = CanonicalPath::new_lexical(file_path);
            let entry = enrich_map.get(canonical.as_str()).cloned();
            if entry.as_ref().is_some_and(|e| !e.is_visible_in_scans()) {
                continue;
            }
            items.push(crate::models::scan::ScanItem {
                id: canonical.as_str().to_string(),
                canonical_path: canonical,
                scanned_at: now,
                enrichment: entry,
            });
        }
    }

    let artifact_id = format!("{library_id}-{now}");
    let artifact = crate::models::ScanArtifact::new(artifact_id.clone(), library_id.to_string(), items, now);

    state
        .store
        .scans
        .write_with(|scans| {
            scans.insert(artifact_id.clone(), artifact.clone());
            prune_retention(scans, library_id, 2);
        })
        .await;

    state.store.scans.persist_now().await.ok();
    state.store.parsed.persist_now().await.ok();
    state.enrich_cache().persist_now().await.ok();

    Ok(artifact)
}

/// Keeps only the two most recent scan artifacts per library (spec §3
/// `ScanArtifact` retention).
fn prune_retention(scans: &mut HashMap<String, crate::models::ScanArtifact>, library_id: &str, keep: usize) {
    let mut ids: Vec<(String, i64)> = scans
        .iter()
        .filter(|(_, a)| a.library_id == library_id)
        .map(|(id, a)| (id.clone(), a.generated_at))
        .collect();
    ids.sort_by(|a, b| b.1.cmp(&a.1));
    for (id, _) in ids.into_iter().skip(keep) {
        scans.remove(&id);
    }
}

pub async fn cmd_scan(state: &AppState, username: &str, library: &str) -> Result<()> {
    let artifact = run_scan(state, username, library, false).await?;
    print_json(&artifact)
}

pub async fn cmd_incremental_scan(state: &AppState, username: &str, library: &str) -> Result<()> {
    let artifact = run_scan(state, username, library, true).await?;
    print_json(&artifact)
}

pub async fn cmd_force_full_scan(state: &AppState, username: &str) -> Result<()> {
    let config = state.config().await;
    let mut artifacts = Vec::new();
    for lib in &config.server.libraries {
        artifacts.push(run_scan(state, username, &lib.id, false).await?);
    }
    print_json(&artifacts)
}

#[allow(clippy::too_many_arguments)]
pub async fn cmd_enrich(
    state: &AppState,
    username: &str,
    path: &Path,
    library: Option<&str>,
    force: bool,
    force_hash: bool,
    skip_anime_providers: bool,
) -> Result<()> {
    let config = state.config().await;
    let canonical = CanonicalPath::new(path);
    let root = match library {
        Some(id) => library_path(&config, id)?,
        None => path.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    let entry = resolve_and_store(state, username, &canonical, &root, force, force_hash, skip_anime_providers).await?;
    state.enrich_cache().persist_now().await.ok();
    print_json(&entry)
}

pub async fn cmd_enrich_bulk(state: &AppState, username: &str, paths: &[PathBuf], library: Option<&str>, force: bool) -> Result<()> {
    let config = state.config().await;
    let mut results = Vec::with_capacity(paths.len());
    for path in paths {
        let canonical = CanonicalPath::new(path);
        let root = match library {
            Some(id) => library_path(&config, id)?,
            None => path.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        match resolve_and_store(state, username, &canonical, &root, force, false, false).await {
            Ok(entry) => results.push(json!({"path": canonical.as_str(), "entry": entry})),
            Err(err) => results.push(json!({"path": canonical.as_str(), "error": err.to_string()})),
        }
    }
    state.enrich_cache().persist_now().await.ok();
    print_json(&results)
}

#[allow(clippy::too_many_arguments)]
pub async fn cmd_enrich_custom(
    state: &AppState,
    path: &Path,
    title: String,
    year: Option<String>,
    season: Option<i32>,
    episode: Option<i32>,
    episode_title: Option<String>,
    is_movie: Option<bool>,
) -> Result<()> {
    let canonical = CanonicalPath::new(path);
    let now = now_unix();
    let patch = EnrichEntry {
        title: Some(title.clone()),
        series_title: Some(title),
        year,
        season,
        episode,
        episode_title,
        is_movie,
        source_id: Some("custom".to_string()),
        timestamp: now,
        cached_at: now,
        ..EnrichEntry::default()
    };
    let merged = state.enrich_cache().update(&canonical, patch).await;
    state.enrich_cache().persist_now().await.ok();
    print_json(&merged)
}

#[derive(Serialize)]
struct PreviewPlan {
    item_id: String,
    from_path: String,
    to_path: String,
    rendered_name: String,
}

async fn build_plans(
    state: &AppState,
    username: &str,
    library: &str,
    template_override: Option<String>,
    use_filename_as_title: bool,
) -> Result<(Vec<Plan>, PathBuf)> {
    let config = state.config().await;
    let user_settings = config.user_settings(username);
    let output_root = user_settings
        .scan_output_path
        .clone()
        .ok_or_else(|| anyhow!("no scan_output_path configured for user '{username}'"))?;

    let scans = state.store.scans.read().await;
    let artifact = scans
        .values()
        .filter(|a| a.library_id == library)
        .max_by_key(|a| a.generated_at)
        .cloned()
        .ok_or_else(|| anyhow!("no scan found for library '{library}'; run `scan` first"))?;
    drop(scans);

    let os = user_settings.client_os.map(Into::into).unwrap_or_else(TargetOs::current);
    let options = RenderOptions {
        template: template_override.or(user_settings.rename_template.clone()),
        series_aliases: series_aliases(&config),
    };

    let mut plans = Vec::new();
    for item in &artifact.items {
        let Some(mut entry) = item.enrichment.clone() else { continue };
        if use_filename_as_title {
            if let Some(parsed) = &entry.parsed {
                entry.series_title = Some(parsed.title.clone());
                entry.title = Some(parsed.title.clone());
            }
        }
        let Some(rendered) = render::render(&entry, &options, os) else { continue };
        let extension = Path::new(item.canonical_path.as_str())
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mkv");
        let relative = rendered.relative_path(extension);
        let to_path = output_root.join(&relative);
        let metadata_filename = relative
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(rendered.filename_stem.as_str())
            .to_string();

        plans.push(Plan {
            item_id: item.id.clone(),
            from_path: item.canonical_path.clone(),
            to_path,
            rendered_name: format!("{}.{extension}", rendered.filename_stem),
            metadata_filename,
        });
    }

    Ok((plans, output_root))
}

pub async fn cmd_preview(
    state: &AppState,
    username: &str,
    library: &str,
    template: Option<String>,
    use_filename_as_title: bool,
) -> Result<()> {
    let (plans, _) = build_plans(state, username, library, template, use_filename_as_title).await?;
    let preview: Vec<PreviewPlan> = plans
        .into_iter()
        .map(|p| PreviewPlan {
            item_id: p.item_id,
            from_path: p.from_path.as_str().to_string(),
            to_path: p.to_path.display().to_string(),
            rendered_name: p.rendered_name,
        })
        .collect();
    print_json(&preview)
}

pub async fn cmd_apply(
    state: &AppState,
    username: &str,
    library: &str,
    template: Option<String>,
    dry_run: bool,
    output_folder: Option<PathBuf>,
) -> Result<()> {
    let (plans, configured_root) = build_plans(state, username, library, template, false).await?;
    let options = ApplyOptions {
        output_folder_override: output_folder,
        configured_output_root: Some(configured_root),
        dry_run,
    };
    let enrich = state.enrich_cache();
    let outcomes = apply::apply(plans, &options, &enrich, &state.store).await;
    print_json(&outcomes)
}

pub async fn cmd_unapprove(state: &AppState, username: &str, paths: &[PathBuf], count: Option<usize>) -> Result<()> {
    let config = state.config().await;
    let delete_hardlinks = config.user_settings(username).delete_hardlinks_on_unapprove;

    let targets: Vec<CanonicalPath> = if !paths.is_empty() {
        paths.iter().map(CanonicalPath::new).collect()
    } else {
        let n = count.unwrap_or(10);
        let enrich = state.store.enrich.read().await;
        let mut applied: Vec<(String, i64)> = enrich
            .iter()
            .filter(|(_, e)| e.applied)
            .map(|(k, e)| (k.clone(), e.applied_at.unwrap_or(0)))
            .collect();
        applied.sort_by(|a, b| b.1.cmp(&a.1));
        applied.into_iter().take(n).map(|(path, _)| CanonicalPath::new_lexical(path)).collect()
    };

    let outcomes = apply::unapprove(targets, delete_hardlinks, &state.store).await;
    print_json(&outcomes)
}

pub async fn cmd_sweep(state: &AppState) -> Result<()> {
    let removed = state.enrich_cache().sweep(|p| Path::new(p).exists()).await;
    print_json(&json!({ "removed": removed }))
}

pub async fn cmd_list_hidden_or_applied(state: &AppState) -> Result<()> {
    let enrich = state.store.enrich.read().await;
    let items: Vec<_> = enrich
        .iter()
        .filter(|(_, e)| e.applied || e.hidden)
        .map(|(path, e)| json!({ "path": path, "applied": e.applied, "hidden": e.hidden, "appliedTo": e.applied_to }))
        .collect();
    print_json(&items)
}

pub async fn cmd_list_duplicates(state: &AppState) -> Result<()> {
    let enrich = state.store.enrich.read().await;
    let mut by_name: HashMap<String, Vec<String>> = HashMap::new();
    for (path, entry) in enrich.iter() {
        if let Some(name) = &entry.rendered_name {
            by_name.entry(name.clone()).or_default().push(path.clone());
        }
    }
    let duplicates: Vec<_> = by_name
        .into_iter()
        .filter(|(_, paths)| paths.len() > 1)
        .map(|(rendered_name, paths)| json!({ "renderedName": rendered_name, "paths": paths }))
        .collect();
    print_json(&duplicates)
}

pub async fn cmd_hide_events_since(state: &AppState, since: i64) -> Result<()> {
    let events = state.store.hide_events.since(since);
    print_json(&events)
}

pub async fn cmd_manual_ids_get_series(state: &AppState, name: &str) -> Result<()> {
    let key = normalize_series_key(name);
    let map = state.store.manual_ids_by_series.read().await;
    print_json(&map.get(&key).cloned().unwrap_or_default())
}

pub async fn cmd_manual_ids_set_series(
    state: &AppState,
    name: &str,
    anilist: Option<i32>,
    tmdb: Option<i64>,
    tvdb: Option<i64>,
) -> Result<()> {
    let key = normalize_series_key(name);
    state
        .store
        .manual_ids_by_series
        .write_with(|map| {
            let entry = map.entry(key).or_insert_with(SeriesManualIds::default);
            if anilist.is_some() {
                entry.anilist = anilist;
            }
            if tmdb.is_some() {
                entry.tmdb = tmdb;
            }
            if tvdb.is_some() {
                entry.tvdb = tvdb;
            }
        })
        .await;
    state.store.manual_ids_by_series.persist_now().await.ok();
    Ok(())
}

pub async fn cmd_manual_ids_get_path(state: &AppState, path: &Path) -> Result<()> {
    let canonical = CanonicalPath::new(path);
    let map = state.store.manual_ids_by_path.read().await;
    print_json(&map.get(canonical.as_str()).cloned().unwrap_or_default())
}

pub async fn cmd_manual_ids_set_path(state: &AppState, path: &Path, anidb_episode: Option<i32>) -> Result<()> {
    let canonical = CanonicalPath::new(path);
    state
        .store
        .manual_ids_by_path
        .write_with(|map| {
            let entry = map.entry(canonical.as_str().to_string()).or_insert_with(PathManualIds::default);
            if anidb_episode.is_some() {
                entry.anidb_episode = anidb_episode;
            }
        })
        .await;
    state.store.manual_ids_by_path.persist_now().await.ok();
    Ok(())
}

pub async fn cmd_approved_series_list(state: &AppState) -> Result<()> {
    let map = state.store.approved_images.read().await;
    print_json(&*map)
}

fn parse_provider(name: &str) -> Result<ImageProvider> {
    match name.to_ascii_lowercase().as_str() {
        "anilist" => Ok(ImageProvider::Anilist),
        "tmdb" => Ok(ImageProvider::Tmdb),
        "anidb" => Ok(ImageProvider::Anidb),
        other => Err(anyhow!("unknown image provider '{other}'")),
    }
}

pub async fn cmd_approved_series_fetch_image(
    state: &AppState,
    username: &str,
    output_root: &str,
    series: &str,
    provider: &str,
) -> Result<()> {
    let config = state.config().await;
    let resolved = config.resolve_provider_settings(username, &RequestOverrides::default());
    let worker = state.build_image_worker(&resolved);
    let request = SeriesImageRequest {
        username: username.to_string(),
        output_root: output_root.to_string(),
        series_key: normalize_series_key(series),
        series_title: series.to_string(),
        provider: parse_provider(provider)?,
    };
    worker.fetch_one(&request).await.context("fetching approved-series image")?;

    let key = crate::models::approved_image::cache_key(output_root, &normalize_series_key(series));
    let map = state.store.approved_images.read().await;
    print_json(&map.get(&key))
}

/// `approvedSeries.setSource` (spec §6.3): re-fetches a series' artwork from
/// the given provider, overriding whatever it last cached.
pub async fn cmd_approved_series_set_source(state: &AppState, username: &str, output_root: &str, series: &str, provider: &str) -> Result<()> {
    cmd_approved_series_fetch_image(state, username, output_root, series, provider).await
}

pub async fn cmd_approved_series_fetch_all(state: &AppState, username: &str) -> Result<()> {
    let config = state.config().await;
    let user_settings = config.user_settings(username);
    let resolved = config.resolve_provider_settings(username, &RequestOverrides::default());
    let worker = state.build_image_worker(&resolved);

    let enrich_snapshot = state.store.enrich.read().await.clone();
    let mut seen = std::collections::HashSet::new();
    let mut requests = Vec::new();

    for entry in enrich_snapshot.values() {
        if !entry.applied {
            continue;
        }
        let Some(series) = entry.series_title.clone() else { continue };
        for applied_to in &entry.applied_to {
            let Some(folder) = user_settings
                .output_folders
                .iter()
                .find(|f| applied_to.starts_with(&f.path.to_string_lossy().to_string()))
            else {
                continue;
            };
            let key = (folder.id.clone(), normalize_series_key(&series));
            if seen.insert(key.clone()) {
                requests.push(SeriesImageRequest {
                    username: username.to_string(),
                    output_root: folder.id.clone(),
                    series_key: key.1,
                    series_title: series.clone(),
                    provider: ImageProvider::Anilist,
                });
            }
        }
    }

    let total = requests.len();
    for request in &requests {
        if let Err(err) = worker.fetch_one(request).await {
            warn!(series = %request.series_title, error = %err, "approved-series fetch-all: fetch failed");
        }
    }
    print_json(&json!({ "fetched": total }))
}

pub async fn cmd_approved_series_clear_cache(state: &AppState) -> Result<()> {
    state.store.approved_images.write_with(std::collections::HashMap::clear).await;
    state.store.approved_images.persist_now().await.ok();
    Ok(())
}

pub async fn cmd_watch(state: &AppState, username: &str, library: &str) -> Result<()> {
    use crate::services::watcher::LibraryWatcher;
    use std::sync::Arc;

    let config = state.config().await;
    let root = library_path(&config, library)?;

    let scanner = Arc::new(state.scan_engine());
    let watcher = LibraryWatcher::new(Arc::clone(&scanner), state.scan_locks.clone());

    let state = state.clone();
    let username = username.to_string();
    let library = library.to_string();
    watcher
        .watch_forever(root, move |diff| {
            let state = state.clone();
            let username = username.clone();
            let library = library.clone();
            tokio::spawn(async move {
                for path in &diff.to_process {
                    let root = library_path(&state.config().await, &library).unwrap_or_default();
                    if let Err(err) = resolve_and_store(&state, &username, path, &root, false, false, false).await {
                        warn!(path = %path, error = %err, "watch: resolve failed for item");
                    }
                }
                state.enrich_cache().persist_now().await.ok();
            });
        })
        .await;
    Ok(())
}

