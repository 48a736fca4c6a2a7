//! `tributary diff <root> --from N`: content diffs of collected changes.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use tributary_core::types::TxId;
use tributary_sync::{collect_changes, content};

use super::{connect, load_settings, version_or_latest};

/// Arguments for `tributary diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Root name.
    pub root: String,

    /// Transaction the diff starts after.
    #[arg(long)]
    pub from: u64,

    /// Last transaction to include; defaults to the depot's latest.
    #[arg(long)]
    pub to: Option<u64>,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let settings = load_settings(&self.root)?;
        let feed = connect(&settings)?;
        let root = settings.version_root();
        let to = version_or_latest(&feed, &settings, self.to)?;

        let batches = collect_changes(&feed, &root, TxId(self.from), to)
            .with_context(|| format!("collect failed for '{}'", self.root))?;

        let mut shown = 0;
        for batch in &batches {
            for change in &batch.changes {
                let Some(diff) = content::change_diff(&feed, &root, change)
                    .with_context(|| format!("failed to diff '{}'", change.path))?
                else {
                    continue;
                };
                println!("{}", format!("# {} ({})", batch.display_version, batch.author).dimmed());
                print_colored(&diff.unified_diff);
                shown += 1;
            }
        }

        if shown == 0 {
            println!("✓ No content changes in {}..{}", self.from, to);
        }
        Ok(())
    }
}

fn print_colored(unified: &str) {
    for line in unified.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            println!("{}", line.bold());
        } else if line.starts_with('+') {
            println!("{}", line.green());
        } else if line.starts_with('-') {
            println!("{}", line.red());
        } else if line.starts_with("@@") {
            println!("{}", line.cyan());
        } else {
            println!("{line}");
        }
    }
}
