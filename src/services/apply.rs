//! C12 Apply Engine and C13 Unapprove Engine — the only code in the pipeline
//! that touches the output library on disk (spec §4.9, §4.10).
//!
//! Grounded on the teacher's `library::recycle`/`repro_duplication` hardlink
//! retry idiom: create parent dirs, hardlink with a short retry loop, treat
//! `EEXIST` as success rather than failure.

use crate::domain::events::HideEvent;
use crate::domain::{now_unix, CanonicalPath};
use crate::models::rendered_index::RenderedIndexRow;
use crate::models::EnrichEntry;
use crate::services::enrich_cache::EnrichCache;
use crate::store::CacheStore;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const HARDLINK_RETRIES: u32 = 3;
const HARDLINK_RETRY_DELAY: Duration = Duration::from_millis(50);

/// One unit of work: hardlink `from_path` to `to_path`.
#[derive(Debug, Clone)]
pub struct Plan {
    pub item_id: String,
    pub from_path: CanonicalPath,
    pub to_path: PathBuf,
    pub rendered_name: String,
    pub metadata_filename: String,
}

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Rebases every plan's target beneath this folder instead of the
    /// originally configured output root (spec §4.9 "output folder
    /// override").
    pub output_folder_override: Option<PathBuf>,
    pub configured_output_root: Option<PathBuf>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStatus {
    Hardlinked,
    Noop,
    Exists,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub item_id: String,
    pub status: ApplyStatus,
    pub to_path: PathBuf,
    pub error: Option<String>,
}

/// Applies every plan, hardlinking sources to their rendered destinations
/// and recording the outcome in the enrich cache and rendered index (spec
/// §4.9).
pub async fn apply(
    plans: Vec<Plan>,
    options: &ApplyOptions,
    enrich: &EnrichCache,
    store: &CacheStore,
) -> Vec<ApplyOutcome> {
    let now = now_unix();
    let mut outcomes = Vec::with_capacity(plans.len());
    let mut applied_sources = Vec::new();

    for plan in plans {
        let to_path = rebase_target(&plan.to_path, options);

        if plan.from_path.as_path() == to_path {
            outcomes.push(ApplyOutcome { item_id: plan.item_id, status: ApplyStatus::Noop, to_path, error: None });
            continue;
        }

        if options.dry_run {
            outcomes.push(ApplyOutcome { item_id: plan.item_id, status: ApplyStatus::Noop, to_path, error: None });
            continue;
        }

        match apply_one(&plan, &to_path).await {
            Ok(status) => {
                if matches!(status, ApplyStatus::Hardlinked | ApplyStatus::Exists) {
                    record_applied(enrich, store, &plan, &to_path, now).await;
                    applied_sources.push(plan.from_path.clone());
                }
                outcomes.push(ApplyOutcome { item_id: plan.item_id, status, to_path, error: None });
            }
            Err(err) => {
                warn!(path = %plan.from_path, error = %err, "apply failed");
                outcomes.push(ApplyOutcome {
                    item_id: plan.item_id,
                    status: ApplyStatus::Failed,
                    to_path,
                    error: Some(err.to_string()),
                });
            }
        }
    }

    if !applied_sources.is_empty() {
        filter_visible_scans(store, &applied_sources).await;
        push_hide_events(store, &applied_sources, now);
        enrich.persist_now().await.ok();
        store.scans.persist_now().await.ok();
    }

    outcomes
}

fn rebase_target(to_path: &Path, options: &ApplyOptions) -> PathBuf {
    let (Some(override_root), Some(configured_root)) =
        (&options.output_folder_override, &options.configured_output_root)
    else {
        return to_path.to_path_buf();
    };
    match to_path.strip_prefix(configured_root) {
        Ok(relative) => override_root.join(relative),
        Err(_) => to_path.to_path_buf(),
    }
}

async fn apply_one(plan: &Plan, to_path: &Path) -> Result<ApplyStatus, std::io::Error> {
    if tokio::fs::metadata(to_path).await.is_ok() {
        return Ok(ApplyStatus::Exists);
    }

    if let Some(parent) = to_path.parent() {
        create_dir_with_retry(parent).await?;
    }

    let mut last_err = None;
    for attempt in 0..HARDLINK_RETRIES {
        match tokio::fs::hard_link(plan.from_path.as_path(), to_path).await {
            Ok(()) => return Ok(ApplyStatus::Hardlinked),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(ApplyStatus::Exists),
            Err(e) => {
                last_err = Some(e);
                if attempt + 1 < HARDLINK_RETRIES {
                    tokio::time::sleep(HARDLINK_RETRY_DELAY).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| std::io::Error::other("hardlink failed with no recorded error")))
}

async fn create_dir_with_retry(parent: &Path) -> Result<(), std::io::Error> {
    for attempt in 0..HARDLINK_RETRIES {
        match tokio::fs::create_dir_all(parent).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt + 1 < HARDLINK_RETRIES => {
                tokio::time::sleep(HARDLINK_RETRY_DELAY).await;
                let _ = e;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn record_applied(enrich: &EnrichCache, store: &CacheStore, plan: &Plan, to_path: &Path, now: i64) {
    let to_canonical = CanonicalPath::new(to_path);
    let current = enrich.get(&plan.from_path).await.unwrap_or_default();

    let mut patch = current.clone();
    patch.applied = true;
    patch.hidden = true;
    patch.applied_at = Some(now);
    if !patch.applied_to.contains(&to_canonical.as_str().to_string()) {
        patch.applied_to.push(to_canonical.as_str().to_string());
    }
    patch.metadata_filename = Some(plan.metadata_filename.clone());
    patch.rendered_name = Some(plan.rendered_name.clone());

    store
        .enrich
        .write_with(|map| {
            map.insert(plan.from_path.as_str().to_string(), patch);
        })
        .await;

    let row = RenderedIndexRow::from_apply(
        plan.from_path.clone(),
        to_canonical,
        plan.rendered_name.clone(),
        plan.metadata_filename.clone(),
        current.provider.as_ref(),
        current.parsed.clone(),
    );
    store
        .rendered_index
        .write_with(|rows| {
            rows.insert(plan.item_id.clone(), row);
        })
        .await;
}

async fn filter_visible_scans(store: &CacheStore, applied: &[CanonicalPath]) {
    let enrich = store.enrich.read().await;
    store
        .scans
        .write_with(|scans| {
            for artifact in scans.values_mut() {
                artifact.retain_visible(|path| {
                    !applied.contains(path) || enrich.get(path.as_str()).is_none_or(EnrichEntry::is_visible_in_scans)
                });
            }
        })
        .await;
}

fn push_hide_events(store: &CacheStore, applied: &[CanonicalPath], now: i64) {
    for path in applied {
        store.hide_events.push(HideEvent {
            ts: now,
            path: path.clone(),
            original_path: path.clone(),
            modified_scan_ids: Vec::new(),
        });
    }
}

#[derive(Debug, Clone)]
pub struct UnapproveOutcome {
    pub item_id: String,
    pub restored: bool,
    pub error: Option<String>,
}

/// Reverses an apply: optionally unlinks the output hardlinks, clears
/// applied/hidden bookkeeping, and re-injects the source back into its
/// scan's visible set (spec §4.10).
pub async fn unapprove(
    source_paths: Vec<CanonicalPath>,
    delete_hardlinks: bool,
    store: &CacheStore,
) -> Vec<UnapproveOutcome> {
    let now = now_unix();
    let mut outcomes = Vec::with_capacity(source_paths.len());

    for source in &source_paths {
        let entry = store.enrich.read().await.get(source.as_str()).cloned();
        let Some(mut entry) = entry else {
            outcomes.push(UnapproveOutcome {
                item_id: source.as_str().to_string(),
                restored: false,
                error: Some("no enrich entry for path".to_string()),
            });
            continue;
        };

        if delete_hardlinks {
            for target in &entry.applied_to {
                match tokio::fs::remove_file(target).await {
                    Ok(()) => {
                        let remaining = remaining_link_count(Path::new(target)).await;
                        info!(target = %target, remaining_links = remaining, "unapprove: unlinked hardlink");
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(target = %target, error = %e, "unapprove: failed to unlink hardlink"),
                }
            }
        }

        if tokio::fs::metadata(source.as_path()).await.is_err() {
            if let Some(first_target) = entry.applied_to.first() {
                if tokio::fs::metadata(first_target).await.is_ok() {
                    let _ = tokio::fs::rename(first_target, source.as_path()).await;
                }
            }
        }

        entry.clear_apply_state();
        store
            .enrich
            .write_with(|map| {
                map.insert(source.as_str().to_string(), entry);
            })
            .await;

        store
            .rendered_index
            .write_with(|rows| {
                rows.retain(|_, row| row.source.as_str() != source.as_str());
            })
            .await;

        outcomes.push(UnapproveOutcome { item_id: source.as_str().to_string(), restored: true, error: None });
    }

    store.enrich.persist_now().await.ok();
    store.rendered_index.persist_now().await.ok();

    for source in &source_paths {
        store.hide_events.push(HideEvent {
            ts: now,
            path: source.clone(),
            original_path: source.clone(),
            modified_scan_ids: Vec::new(),
        });
    }

    outcomes
}

/// Reads the post-unlink hardlink count purely for the log line — per spec
/// §9 Open Question 4, no behavior branches on this value.
#[cfg(unix)]
async fn remaining_link_count(path: &Path) -> u64 {
    use std::os::unix::fs::MetadataExt;
    tokio::fs::metadata(path).await.map(|m| m.nlink()).unwrap_or(0)
}

#[cfg(not(unix))]
async fn remaining_link_count(_path: &Path) -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::enrich_cache::EnrichCache;

    async fn fixture() -> (tempfile::TempDir, CacheStore, EnrichCache) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&dir.path().join("data")).await.unwrap();
        let enrich = EnrichCache::new(store.clone());
        (dir, store, enrich)
    }

    #[tokio::test]
    async fn apply_hardlinks_and_records_state() {
        let (dir, store, enrich) = fixture().await;
        let source = dir.path().join("in.mkv");
        tokio::fs::write(&source, b"data").await.unwrap();
        let target = dir.path().join("out").join("Show").join("Show - S01E01.mkv");

        let plan = Plan {
            item_id: "item-1".into(),
            from_path: CanonicalPath::new(&source),
            to_path: target.clone(),
            rendered_name: "Show - S01E01.mkv".into(),
            metadata_filename: "Show - S01E01.mkv".into(),
        };

        let outcomes = apply(vec![plan], &ApplyOptions::default(), &enrich, &store).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, ApplyStatus::Hardlinked);
        assert!(target.exists());

        let canonical = CanonicalPath::new(&source);
        let entry = enrich.get(&canonical).await.unwrap();
        assert!(entry.applied);
        // spec §4.9 step 6: a successful hardlink marks the entry hidden too,
        // so it drops out of subsequent scan artifacts (spec §3 invariant 3).
        assert!(entry.hidden);
        assert_eq!(entry.applied_to.len(), 1);
    }

    #[tokio::test]
    async fn apply_is_idempotent_when_target_exists() {
        let (dir, store, enrich) = fixture().await;
        let source = dir.path().join("in.mkv");
        tokio::fs::write(&source, b"data").await.unwrap();
        let target = dir.path().join("out.mkv");
        tokio::fs::write(&target, b"data").await.unwrap();

        let plan = Plan {
            item_id: "item-1".into(),
            from_path: CanonicalPath::new(&source),
            to_path: target.clone(),
            rendered_name: "out.mkv".into(),
            metadata_filename: "out.mkv".into(),
        };

        let outcomes = apply(vec![plan], &ApplyOptions::default(), &enrich, &store).await;
        assert_eq!(outcomes[0].status, ApplyStatus::Exists);
    }

    #[tokio::test]
    async fn unapprove_restores_source_when_missing() {
        let (dir, store, enrich) = fixture().await;
        let source = dir.path().join("in.mkv");
        tokio::fs::write(&source, b"data").await.unwrap();
        let target = dir.path().join("out.mkv");

        let plan = Plan {
            item_id: "item-1".into(),
            from_path: CanonicalPath::new(&source),
            to_path: target.clone(),
            rendered_name: "out.mkv".into(),
            metadata_filename: "out.mkv".into(),
        };
        apply(vec![plan], &ApplyOptions::default(), &enrich, &store).await;

        let canonical_source = CanonicalPath::new(&source);
        tokio::fs::remove_file(&source).await.unwrap();
        let outcomes = unapprove(vec![canonical_source.clone()], false, &store).await;
        assert!(outcomes[0].restored);
        assert!(source.exists());

        let entry = enrich.get(&canonical_source).await.unwrap();
        assert!(!entry.applied);
    }
}
