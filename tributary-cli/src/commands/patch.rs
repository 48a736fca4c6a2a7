//! `tributary patch <root>`: build a patch and list or apply it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use tributary_core::types::{PatchOperation, TxId};
use tributary_sync::{build_patch, ApplyResult, DirectorySink};

use super::{connect, load_settings, version_or_latest};

/// Arguments for `tributary patch`.
#[derive(Args, Debug)]
pub struct PatchArgs {
    /// Root name.
    pub root: String,

    /// Build an incremental patch from this transaction; omit for a full tree.
    #[arg(long)]
    pub from: Option<u64>,

    /// Target transaction; defaults to the depot's latest.
    #[arg(long)]
    pub to: Option<u64>,

    /// Apply the patch to this directory instead of listing it.
    #[arg(long, value_name = "DIR")]
    pub apply: Option<PathBuf>,

    /// With --apply, show what would change without touching the directory.
    #[arg(long, requires = "apply")]
    pub dry_run: bool,
}

#[derive(Tabled)]
struct OperationRow {
    #[tabled(rename = "operation")]
    operation: &'static str,
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "bytes")]
    bytes: String,
}

impl PatchArgs {
    pub fn run(self) -> Result<()> {
        let settings = load_settings(&self.root)?;
        let feed = connect(&settings)?;
        let root = settings.version_root();
        let to = version_or_latest(&feed, &settings, self.to)?;
        let from = self.from.map(TxId);

        match &self.apply {
            Some(dir) => {
                let mut sink = DirectorySink::new(dir, self.dry_run);
                build_patch(&feed, &root, from, to, &mut sink)
                    .with_context(|| format!("failed to apply patch to {}", dir.display()))?;
                print_applied(&self.root, sink.results(), self.dry_run);
            }
            None => {
                let mut operations: Vec<PatchOperation> = Vec::new();
                build_patch(&feed, &root, from, to, &mut operations)
                    .with_context(|| format!("failed to build patch for '{}'", self.root))?;
                print_operations(&operations);
            }
        }
        Ok(())
    }
}

fn print_operations(operations: &[PatchOperation]) {
    if operations.is_empty() {
        println!("✓ Nothing to patch");
        return;
    }
    let rows: Vec<OperationRow> = operations
        .iter()
        .map(|op| OperationRow {
            operation: op.label(),
            path: match op {
                PatchOperation::RenameFile { from, to } | PatchOperation::RenameDir { from, to } => {
                    format!("{} → {}", from.display(), to.display())
                }
                other => other.path().display().to_string(),
            },
            bytes: op.content_len().map(|n| n.to_string()).unwrap_or_default(),
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
}

fn print_applied(root: &str, results: &[ApplyResult], dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    let changed = results
        .iter()
        .filter(|r| !matches!(r, ApplyResult::Unchanged { .. }))
        .count();
    let unchanged = results.len() - changed;

    if changed == 0 {
        println!("{prefix}✓ '{root}': nothing to do");
        return;
    }
    println!("{prefix}✓ '{root}' patched ({changed} applied, {unchanged} unchanged)");
    for result in results {
        match result {
            ApplyResult::Written { path } => println!("  wrote   {}", path.display()),
            ApplyResult::Created { path } => println!("  mkdir   {}", path.display()),
            ApplyResult::Deleted { path } => println!("  deleted {}", path.display()),
            ApplyResult::Renamed { from, to } => {
                println!("  moved   {} → {}", from.display(), to.display())
            }
            ApplyResult::WouldApply { operation, path } => {
                println!("  would {operation}: {}", path.display())
            }
            ApplyResult::Unchanged { .. } => {}
        }
    }
}
