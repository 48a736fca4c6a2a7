//! Per-root YAML registry.
//!
//! # Storage layout
//!
//! ```text
//! ~/.tributary/
//!   roots/
//!     <root_name>.yaml   (one file per root: mode 0600, may hold a password)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::settings::RootSettings;

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.tributary`
pub fn tributary_root(home: &Path) -> PathBuf {
    home.join(".tributary")
}

/// `<home>/.tributary/roots/`
///
/// Creates the directory (mode `0700`) if it does not yet exist.
pub fn roots_dir_at(home: &Path) -> Result<PathBuf, ConfigError> {
    let dir = tributary_root(home).join("roots");
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

/// `<home>/.tributary/roots/<name>.yaml`: pure, no I/O.
pub fn root_path_at(home: &Path, name: &str) -> PathBuf {
    tributary_root(home)
        .join("roots")
        .join(format!("{name}.yaml"))
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load a single root from `<home>/.tributary/roots/<name>.yaml`.
///
/// Returns `ConfigError::RootNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_root_at(home: &Path, name: &str) -> Result<RootSettings, ConfigError> {
    let path = root_path_at(home, name);
    if !path.exists() {
        return Err(ConfigError::RootNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_root_at` convenience wrapper.
pub fn load_root(name: &str) -> Result<RootSettings, ConfigError> {
    load_root_at(&home()?, name)
}

/// Every registered root, sorted by name.
pub fn list_roots_at(home: &Path) -> Result<Vec<RootSettings>, ConfigError> {
    let dir = tributary_root(home).join("roots");
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut entries: Vec<_> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut roots = Vec::new();
    for entry in entries {
        let fname = entry.file_name();
        if !fname.to_string_lossy().ends_with(".yaml") {
            continue;
        }
        let contents = std::fs::read_to_string(entry.path())?;
        let settings: RootSettings = serde_yaml::from_str(&contents).map_err(|e| {
            ConfigError::Parse {
                path: entry.path(),
                source: e,
            }
        })?;
        roots.push(settings);
    }
    Ok(roots)
}

/// `list_roots_at` convenience wrapper.
pub fn list_roots() -> Result<Vec<RootSettings>, ConfigError> {
    list_roots_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save a root to `<home>/.tributary/roots/<name>.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_root_at(home: &Path, settings: &RootSettings) -> Result<PathBuf, ConfigError> {
    roots_dir_at(home)?;
    let path = root_path_at(home, &settings.name);
    let tmp_path = path.with_file_name(format!("{}.yaml.tmp", settings.name));

    let yaml = serde_yaml::to_string(settings)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(path)
}

/// `save_root_at` convenience wrapper.
pub fn save_root(settings: &RootSettings) -> Result<PathBuf, ConfigError> {
    save_root_at(&home()?, settings)
}

/// Remove a root. Missing roots are reported as `RootNotFound`.
pub fn remove_root_at(home: &Path, name: &str) -> Result<(), ConfigError> {
    let path = root_path_at(home, name);
    if !path.exists() {
        return Err(ConfigError::RootNotFound { path });
    }
    std::fs::remove_file(&path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
