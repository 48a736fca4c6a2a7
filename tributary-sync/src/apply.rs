//! Applying a patch to a directory on disk.
//!
//! ## File writes
//!
//! 1. SHA-256 hash the new content.
//! 2. Hash whatever is already at the target path.
//! 3. Equal digests → skip, the file (and its mtime) is left alone.
//! 4. Write to `<path>.tributary.tmp`.
//! 5. Rename to the final path (atomic on POSIX).
//!
//! Operations are applied in the order they arrive.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

use tributary_core::types::PatchOperation;

use crate::error::{io_err, SyncError};
use crate::patch::PatchSink;

// ---------------------------------------------------------------------------
// Apply result
// ---------------------------------------------------------------------------

/// Outcome of one applied operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyResult {
    /// A file was written (content changed or did not previously exist).
    Written { path: PathBuf },
    /// The file already held exactly this content.
    Unchanged { path: PathBuf },
    Created { path: PathBuf },
    Deleted { path: PathBuf },
    Renamed { from: PathBuf, to: PathBuf },
    /// `--dry-run` mode: the operation *would* have been applied.
    WouldApply {
        operation: &'static str,
        path: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// DirectorySink
// ---------------------------------------------------------------------------

/// A [`PatchSink`] that applies each operation under `root`.
#[derive(Debug)]
pub struct DirectorySink {
    root: PathBuf,
    dry_run: bool,
    results: Vec<ApplyResult>,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            root: root.into(),
            dry_run,
            results: Vec::new(),
        }
    }

    pub fn results(&self) -> &[ApplyResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ApplyResult> {
        self.results
    }

    fn target(&self, operation: &'static str, relative: &Path) -> Result<PathBuf, SyncError> {
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || relative.as_os_str().is_empty() {
            return Err(SyncError::UnsafePath {
                operation,
                path: relative.to_path_buf(),
            });
        }
        Ok(self.root.join(relative))
    }

    fn apply_one(&self, operation: &PatchOperation) -> Result<ApplyResult, SyncError> {
        let label = operation.label();
        match operation {
            PatchOperation::CreateFile { path, content }
            | PatchOperation::ChangeFile { path, content } => {
                let target = self.target(label, path)?;
                if self.dry_run {
                    return Ok(would(label, target));
                }
                atomic_write(&target, content)
            }
            PatchOperation::CreateDir { path } => {
                let target = self.target(label, path)?;
                if self.dry_run {
                    return Ok(would(label, target));
                }
                std::fs::create_dir_all(&target).map_err(|e| io_err(&target, e))?;
                Ok(ApplyResult::Created { path: target })
            }
            PatchOperation::DeleteFile { path } => {
                let target = self.target(label, path)?;
                if self.dry_run {
                    return Ok(would(label, target));
                }
                match std::fs::remove_file(&target) {
                    Ok(()) => Ok(ApplyResult::Deleted { path: target }),
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        tracing::debug!("already absent: {}", target.display());
                        Ok(ApplyResult::Unchanged { path: target })
                    }
                    Err(e) => Err(io_err(&target, e)),
                }
            }
            PatchOperation::DeleteDir { path } => {
                let target = self.target(label, path)?;
                if self.dry_run {
                    return Ok(would(label, target));
                }
                match std::fs::remove_dir_all(&target) {
                    Ok(()) => Ok(ApplyResult::Deleted { path: target }),
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        tracing::debug!("already absent: {}", target.display());
                        Ok(ApplyResult::Unchanged { path: target })
                    }
                    Err(e) => Err(io_err(&target, e)),
                }
            }
            PatchOperation::RenameFile { from, to } | PatchOperation::RenameDir { from, to } => {
                let source = self.target(label, from)?;
                let dest = self.target(label, to)?;
                if self.dry_run {
                    return Ok(would(label, dest));
                }
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
                }
                std::fs::rename(&source, &dest).map_err(|e| io_err(&source, e))?;
                Ok(ApplyResult::Renamed {
                    from: source,
                    to: dest,
                })
            }
        }
    }
}

impl PatchSink for DirectorySink {
    fn apply(&mut self, operation: PatchOperation) -> Result<(), SyncError> {
        let result = self.apply_one(&operation)?;
        self.results.push(result);
        Ok(())
    }
}

fn would(operation: &'static str, path: PathBuf) -> ApplyResult {
    tracing::info!("[dry-run] would {operation}: {}", path.display());
    ApplyResult::WouldApply { operation, path }
}

// ---------------------------------------------------------------------------
// atomic_write
// ---------------------------------------------------------------------------

pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> Result<ApplyResult, SyncError> {
    let tmp = PathBuf::from(format!("{}.tributary.tmp", path.display()));
    atomic_write_with_tmp(path, content, &tmp)
}

fn atomic_write_with_tmp(path: &Path, content: &[u8], tmp: &Path) -> Result<ApplyResult, SyncError> {
    let digest = sha256_hex(content);

    match std::fs::read(path) {
        Ok(existing) if sha256_hex(&existing) == digest => {
            tracing::debug!("unchanged: {}", path.display());
            return Ok(ApplyResult::Unchanged {
                path: path.to_path_buf(),
            });
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(path, e)),
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    if let Some(tmp_parent) = tmp.parent() {
        std::fs::create_dir_all(tmp_parent).map_err(|e| io_err(tmp_parent, e))?;
    }
    std::fs::write(tmp, content).map_err(|e| io_err(tmp, e))?;

    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }

    tracing::info!("wrote: {}", path.display());
    Ok(ApplyResult::Written {
        path: path.to_path_buf(),
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
