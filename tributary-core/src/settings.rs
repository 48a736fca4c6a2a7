//! Per-root settings: which depot and stream to watch, how to check out, and
//! what to do after a successful build.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{DepotName, StreamName, VersionRoot};

pub const DEFAULT_SERVER_PORT: u16 = 5050;
pub const DEFAULT_VERBOSITY: u8 = 1;
pub const EXECUTABLE_NAME: &str = "accurev";

/// Settings for one version-control root, as stored in the root registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSettings {
    pub name: String,
    pub depot: String,
    /// The stream whose history is collected and which gets promoted.
    pub watch_stream: String,
    /// Stream checked out by builds; defaults to `watch_stream`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub populate_stream: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_directory: Option<PathBuf>,
    #[serde(default)]
    pub hide_changes: bool,
    #[serde(default)]
    pub promote_on_success: bool,
    #[serde(default)]
    pub promote_separately: bool,
    #[serde(default = "default_true")]
    pub use_ref_tree: bool,
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,
    #[serde(default)]
    pub server_name: String,
    #[serde(default = "default_port")]
    pub server_port: u32,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Directory holding the backend executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_dir: Option<PathBuf>,
}

/// One rejected property and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidProperty {
    pub property: &'static str,
    pub reason: String,
}

impl InvalidProperty {
    fn new(property: &'static str, reason: impl Into<String>) -> Self {
        Self {
            property,
            reason: reason.into(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_verbosity() -> u8 {
    DEFAULT_VERBOSITY
}

fn default_port() -> u32 {
    u32::from(DEFAULT_SERVER_PORT)
}

impl RootSettings {
    /// Settings with defaults for everything but the identifying fields.
    pub fn new(name: impl Into<String>, depot: impl Into<String>, watch_stream: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depot: depot.into(),
            watch_stream: watch_stream.into(),
            populate_stream: None,
            sub_directory: None,
            hide_changes: false,
            promote_on_success: false,
            promote_separately: false,
            use_ref_tree: true,
            verbosity: DEFAULT_VERBOSITY,
            server_name: String::new(),
            server_port: default_port(),
            username: String::new(),
            password: None,
            command_dir: None,
        }
    }

    /// Check every property and report all problems at once.
    pub fn validate(&self) -> Vec<InvalidProperty> {
        let mut problems = Vec::new();
        if self.depot.trim().is_empty() {
            problems.push(InvalidProperty::new("depot", "Depot must be specified"));
        }
        if self.watch_stream.trim().is_empty() {
            problems.push(InvalidProperty::new("watch_stream", "Stream must be specified"));
        }
        if self.username.trim().is_empty() {
            problems.push(InvalidProperty::new("username", "User name must be specified"));
        }
        if self.server_name.trim().is_empty() {
            problems.push(InvalidProperty::new(
                "server_name",
                "Server name must be specified",
            ));
        }
        if self.server_port == 0 || self.server_port > u32::from(u16::MAX) {
            problems.push(InvalidProperty::new(
                "server_port",
                format!("Port must be between 1 and 65535, got {}", self.server_port),
            ));
        }
        if let Some(dir) = &self.command_dir {
            if !dir.is_dir() {
                problems.push(InvalidProperty::new(
                    "command_dir",
                    format!("Directory {} does not exist", dir.display()),
                ));
            }
        }
        problems
    }

    /// [`validate`](Self::validate) as a `Result`.
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        let problems = self.validate();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid {
                root: self.name.clone(),
                problems,
            })
        }
    }

    pub fn version_root(&self) -> VersionRoot {
        VersionRoot {
            name: self.name.clone(),
            depot: DepotName::from(self.depot.trim()),
            stream: StreamName::from(self.watch_stream.trim()),
            populate_stream: self
                .populate_stream
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(StreamName::from),
            sub_directory: self.sub_directory.clone(),
            hide_changes: self.hide_changes,
        }
    }

    /// Path to the backend executable; bare `accurev` resolves through `$PATH`.
    pub fn executable_path(&self) -> PathBuf {
        match &self.command_dir {
            Some(dir) => dir.join(executable_file_name()),
            None => PathBuf::from(executable_file_name()),
        }
    }

    /// `host:port`, as the backend expects it.
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_name, self.server_port)
    }
}

#[cfg(windows)]
fn executable_file_name() -> String {
    format!("{EXECUTABLE_NAME}.exe")
}

#[cfg(not(windows))]
fn executable_file_name() -> String {
    EXECUTABLE_NAME.to_string()
}
