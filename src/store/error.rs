use thiserror::Error;

/// Errors surfaced by the persistent KV store (C3). Per spec §7's
/// `io-persist` kind: a failure to persist is logged by the caller, never a
/// crash — this type exists so callers *can* log it, not so they must
/// propagate it everywhere.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to (de)serialize store contents: {0}")]
    Serialize(#[from] serde_json::Error),
}
