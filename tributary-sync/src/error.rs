//! Error types for tributary-sync.

use std::path::PathBuf;

use thiserror::Error;

use tributary_core::error::ConfigError;
use tributary_core::types::{StreamName, TxId};
use tributary_feed::FeedError;

/// All errors that can arise from collecting, patching or promoting.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error reported by the backend boundary.
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid range: from {from} is after to {to}")]
    InvalidRange { from: TxId, to: TxId },

    #[error("inconsistent stream hierarchy: {0}")]
    InconsistentHierarchy(String),

    /// A promote call failed. `log` holds every backend report gathered
    /// during the call, oldest first.
    #[error("promotion from {stream} failed\n{log}")]
    PromotionFailed {
        stream: StreamName,
        log: String,
        #[source]
        source: Option<FeedError>,
    },

    /// A patch operation pointed outside the target directory.
    #[error("refusing to apply {operation} outside the target: {path}")]
    UnsafePath {
        operation: &'static str,
        path: PathBuf,
    },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (watermark store).
    #[error("watermark JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// `true` for failures the backend attributed to credentials.
    pub fn is_authentication(&self) -> bool {
        match self {
            SyncError::Feed(e) => e.is_authentication(),
            SyncError::PromotionFailed {
                source: Some(e), ..
            } => e.is_authentication(),
            _ => false,
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
