//! Error types for tributary-feed.

use std::path::PathBuf;

use thiserror::Error;

/// All errors a backend round trip can produce.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The backend process could not be started, or exited with a status
    /// that is not tolerated for the command.
    #[error("'{command}' failed: {detail}")]
    BackendUnavailable { command: String, detail: String },

    /// The backend rejected the session or the credentials.
    #[error("'{command}' was not authenticated: {detail}\nlog in again or check the root's username and password")]
    AuthenticationFailed { command: String, detail: String },

    /// The backend answered, but not in a shape we understand.
    #[error("malformed response ({context})\nresponse data: {raw}")]
    MalformedResponse { context: String, raw: String },

    /// An unknown stream id in a version identifier, or a parent cycle.
    #[error("inconsistent stream hierarchy: {0}")]
    InconsistentHierarchy(String),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FeedError {
    pub(crate) fn malformed(context: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::MalformedResponse {
            context: context.into(),
            raw: raw.into(),
        }
    }

    /// Whether this error should be reported as a credentials problem.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }
}

/// Convenience constructor for [`FeedError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> FeedError {
    FeedError::Io {
        path: path.into(),
        source,
    }
}
