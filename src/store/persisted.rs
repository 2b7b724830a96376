use super::error::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

/// One named map/value from the on-disk layout (spec §6.1), held in memory
/// behind a lock and written back atomically on a debounced timer.
///
/// Writes go: caller mutates in memory -> `dirty` flag set -> a background
/// task wakes up every `debounce` interval, and if dirty, serializes the
/// current value to a temp file and renames it into place. `persist_now`
/// bypasses the timer for graceful shutdown and other critical operations
/// (spec §4.2).
pub struct PersistedMap<T> {
    data: Arc<RwLock<T>>,
    path: PathBuf,
    dirty: Arc<AtomicBool>,
}

impl<T> Clone for PersistedMap<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            path: self.path.clone(),
            dirty: Arc::clone(&self.dirty),
        }
    }
}

impl<T> PersistedMap<T>
where
    T: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
{
    pub async fn load(path: PathBuf, debounce: Duration) -> Result<Self, StoreError> {
        let value = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => T::default(),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.clone(),
                    source,
                });
            }
        };

        let this = Self {
            data: Arc::new(RwLock::new(value)),
            path,
            dirty: Arc::new(AtomicBool::new(false)),
        };
        this.spawn_debounce_task(debounce);
        Ok(this)
    }

    fn spawn_debounce_task(&self, debounce: Duration) {
        let data = Arc::clone(&self.data);
        let path = self.path.clone();
        let dirty = Arc::clone(&self.dirty);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(debounce).await;
                if dirty.swap(false, Ordering::AcqRel) {
                    let snapshot = data.read().await;
                    if let Err(e) = write_atomic(&path, &*snapshot).await {
                        warn!(path = %path.display(), error = %e, "debounced cache persist failed, will retry");
                        dirty.store(true, Ordering::Release);
                    }
                }
            }
        });
    }

    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, T> {
        self.data.read().await
    }

    /// Mutates the in-memory value and marks it dirty for the next debounce
    /// tick. Does not block on disk I/O.
    pub async fn write_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.data.write().await;
        let result = f(&mut guard);
        drop(guard);
        self.dirty.store(true, Ordering::Release);
        result
    }

    /// Flushes the current value to disk immediately, independent of the
    /// debounce timer. Used on graceful shutdown (spec §7).
    pub async fn persist_now(&self) -> Result<(), StoreError> {
        self.dirty.store(false, Ordering::Release);
        let snapshot = self.data.read().await;
        write_atomic(&self.path, &*snapshot).await
    }
}

async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| StoreError::Io { path: parent.to_path_buf(), source })?;
    }
    let tmp_path = path.with_extension("tmp");
    let json = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(&tmp_path, json)
        .await
        .map_err(|source| StoreError::Io { path: tmp_path.clone(), source })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|source| StoreError::Io { path: path.to_path_buf(), source })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn persist_now_writes_current_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("map.json");

        let map: PersistedMap<HashMap<String, i32>> =
            PersistedMap::load(path.clone(), Duration::from_secs(60)).await.unwrap();
        map.write_with(|m| m.insert("a".to_string(), 1)).await;
        map.persist_now().await.unwrap();

        let reloaded: PersistedMap<HashMap<String, i32>> =
            PersistedMap::load(path, Duration::from_secs(60)).await.unwrap();
        assert_eq!(*reloaded.read().await.get("a").unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let map: PersistedMap<HashMap<String, i32>> =
            PersistedMap::load(path, Duration::from_secs(60)).await.unwrap();
        assert!(map.read().await.is_empty());
    }
}
