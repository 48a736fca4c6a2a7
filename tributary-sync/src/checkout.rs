//! Agent-side checkout through a time-locked stream and a workspace.
//!
//! The checkout directory gets its own stream, locked at the build's
//! version, and a workspace (or reference tree) on that stream which the
//! backend then updates in place.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use tributary_core::settings::RootSettings;
use tributary_core::types::{DepotName, StreamName, TxId};
use tributary_feed::{Provisioned, Provisioner, WorkspaceKind};

use crate::error::{io_err, SyncError};

/// Names and paths for one checkout, derived from the agent and settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutPlan {
    pub depot: DepotName,
    /// `<host>_<dir>_timelock`
    pub stream: StreamName,
    /// The stream the time-locked stream follows.
    pub basis: StreamName,
    /// `<host>_<dir>_<user>`
    pub workspace: String,
    pub kind: WorkspaceKind,
    pub working_dir: PathBuf,
    /// `working_dir`, or the configured sub-directory inside it.
    pub checkout_dir: PathBuf,
    pub at: TxId,
    pub clean: bool,
}

impl CheckoutPlan {
    pub fn new(
        settings: &RootSettings,
        host: &str,
        working_dir: &Path,
        at: TxId,
        clean: bool,
    ) -> Self {
        let dir = working_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let prefix = format!("{}_{dir}", host.to_lowercase());
        let root = settings.version_root();

        Self {
            depot: root.depot.clone(),
            stream: StreamName::from(format!("{prefix}_timelock")),
            basis: root.working_stream().clone(),
            workspace: format!("{prefix}_{}", settings.username),
            kind: if settings.use_ref_tree {
                WorkspaceKind::ReferenceTree
            } else {
                WorkspaceKind::Workspace
            },
            working_dir: working_dir.to_path_buf(),
            checkout_dir: match &settings.sub_directory {
                Some(sub) => working_dir.join(sub),
                None => working_dir.to_path_buf(),
            },
            at,
            clean,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutReport {
    pub stream: Provisioned,
    pub workspace: Provisioned,
    /// Entries a clean checkout could not delete.
    pub warnings: Vec<String>,
}

/// Provision and update the checkout described by `plan`.
pub fn run_checkout<P>(provisioner: &P, plan: &CheckoutPlan) -> Result<CheckoutReport, SyncError>
where
    P: Provisioner + ?Sized,
{
    info!(stream = %plan.stream, basis = %plan.basis, at = %plan.at, "time-locking stream");
    let stream = provisioner.ensure_stream(&plan.depot, &plan.stream, &plan.basis, plan.at)?;

    std::fs::create_dir_all(&plan.checkout_dir).map_err(|e| io_err(&plan.checkout_dir, e))?;

    let warnings = if plan.clean {
        clean_directory(&plan.checkout_dir)?
    } else {
        Vec::new()
    };

    info!(kind = %plan.kind, workspace = %plan.workspace, dir = %plan.checkout_dir.display(), "preparing checkout");
    let workspace = provisioner.ensure_workspace(
        &plan.depot,
        plan.kind,
        &plan.workspace,
        &plan.stream,
        &plan.checkout_dir,
    )?;
    provisioner.sync_workspace(&plan.checkout_dir, plan.clean)?;

    Ok(CheckoutReport {
        stream,
        workspace,
        warnings,
    })
}

/// Delete everything inside `dir`, keeping `dir` itself.
///
/// Entries that cannot be deleted are logged and returned; the rest of the
/// directory is still cleaned.
pub fn clean_directory(dir: &Path) -> Result<Vec<String>, SyncError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    let mut warnings = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let removed = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        if let Err(e) = removed {
            let message = format!("could not delete {}: {e}", path.display());
            warn!("{message}");
            warnings.push(message);
        }
    }
    Ok(warnings)
}

/// `1`, `true`, `yes` and `on` (any case) request a clean checkout.
pub fn clean_requested(value: Option<&str>) -> bool {
    value.is_some_and(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}
