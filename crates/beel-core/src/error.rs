use thiserror::Error;

/// Failures of the underlying offline store. Read/write errors are
/// surfaced to the caller, never retried or swallowed internally.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open offline store at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("storage read/write failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to decode stored '{key}' data: {source}")]
    Decode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode '{key}' data: {source}")]
    Encode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("offline store schema version {found} is newer than supported version {supported}")]
    SchemaVersion { found: u32, supported: u32 },

    #[error("offline store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by the remote survey API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed server response: {0}")]
    InvalidResponse(String),

    #[error("failed to read photo file {path}: {source}")]
    Photo {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Declared, non-fatal outcomes of a sync request. Pass preconditions
/// short-circuit the whole pass; per-item remote failures never surface
/// here, they are folded into the pass report instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync already in progress")]
    AlreadySyncing,

    #[error("device is offline")]
    Offline,

    #[error("authentication token required")]
    MissingToken,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Declared outcomes of a tile cache operation. Individual tile download
/// failures are logged and counted, never raised through this type.
#[derive(Debug, Error)]
pub enum TileError {
    #[error("tile download already in progress")]
    AlreadyDownloading,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("tile fetch failed: {0}")]
    Fetch(#[from] ApiError),

    #[error("tile cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}
