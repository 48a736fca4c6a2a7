//! `tributary collect <root>`: changes since the root's watermark.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use tributary_core::types::{ModificationBatch, TxId};
use tributary_sync::pipeline;

use super::{connect, home, load_settings};

/// Arguments for `tributary collect`.
#[derive(Args, Debug)]
pub struct CollectArgs {
    /// Root name.
    pub root: String,

    /// Start after this transaction instead of the stored watermark.
    #[arg(long)]
    pub from: Option<u64>,

    /// Stop at this transaction instead of the depot's latest.
    #[arg(long)]
    pub to: Option<u64>,

    /// Report changes without advancing the watermark.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl CollectArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let settings = load_settings(&self.root)?;
        let feed = connect(&settings)?;

        let collection = pipeline::collect(
            &home,
            &feed,
            &settings.version_root(),
            self.from.map(TxId),
            self.to.map(TxId),
            self.dry_run,
        )
        .with_context(|| format!("collect failed for '{}'", self.root))?;

        if self.json {
            let report = CollectReport {
                root: &collection.root,
                from: collection.from,
                to: collection.to,
                watermark_recorded: collection.recorded,
                batches: &collection.batches,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        let prefix = if self.dry_run { "[dry-run] " } else { "" };
        if collection.batches.is_empty() {
            println!(
                "{prefix}✓ '{}': no changes in {}..{}",
                collection.root, collection.from, collection.to
            );
        } else {
            for batch in &collection.batches {
                print_batch(batch);
            }
            println!(
                "{prefix}✓ '{}': {} transaction(s) in {}..{}",
                collection.root,
                collection.batches.len(),
                collection.from,
                collection.to
            );
        }
        if collection.recorded {
            println!("  watermark: {}", collection.to);
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct CollectReport<'a> {
    root: &'a str,
    from: TxId,
    to: TxId,
    watermark_recorded: bool,
    batches: &'a [ModificationBatch],
}

fn print_batch(batch: &ModificationBatch) {
    println!(
        "{} {} {} {}",
        format!("#{}", batch.display_version).yellow(),
        batch.date.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
        batch.author.bold(),
        batch.comment.trim()
    );
    for change in &batch.changes {
        println!("    {:<12} {}", change.kind.to_string(), change.path);
    }
}
