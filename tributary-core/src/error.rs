//! Error types for tributary-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::settings::InvalidProperty;

/// All errors that can arise from root configuration and the root registry.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse root settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.tributary/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The root YAML file did not exist at the expected path.
    #[error("root not found at {path}")]
    RootNotFound { path: PathBuf },

    /// Settings failed validation; every offending property is listed.
    #[error("invalid settings for root '{root}': {}", summarize(.problems))]
    Invalid {
        root: String,
        problems: Vec<InvalidProperty>,
    },
}

fn summarize(problems: &[InvalidProperty]) -> String {
    problems
        .iter()
        .map(|p| format!("{}: {}", p.property, p.reason))
        .collect::<Vec<_>>()
        .join("; ")
}
