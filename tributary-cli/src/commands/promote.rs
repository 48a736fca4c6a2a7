//! `tributary pending <root>`, `tributary promote <root> --through N` and
//! `tributary after-build --revision <root>=N ...`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use tributary_core::{registry, types::TxId};
use tributary_feed::AccuRevCli;
use tributary_sync::promote::{
    plan_promotion, promote, promote_after_build, BuildRevision, PromoteMode, PromoteOutcome,
};
use tributary_sync::SyncError;

use super::{connect, home, load_settings, version_or_latest};

/// Arguments for `tributary pending`.
#[derive(Args, Debug)]
pub struct PendingArgs {
    /// Root name.
    pub root: String,

    /// Only list transactions up to this id; defaults to the depot's latest.
    #[arg(long)]
    pub through: Option<u64>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct PendingRow {
    #[tabled(rename = "id")]
    id: u64,
    #[tabled(rename = "author")]
    author: String,
    #[tabled(rename = "comment")]
    comment: String,
}

impl PendingArgs {
    pub fn run(self) -> Result<()> {
        let settings = load_settings(&self.root)?;
        let feed = connect(&settings)?;
        let through = version_or_latest(&feed, &settings, self.through)?;

        let plan = plan_promotion(&feed, &settings.version_root(), through)
            .with_context(|| format!("failed to read pending transactions for '{}'", self.root))?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
            return Ok(());
        }

        let Some(plan) = plan else {
            println!("✓ Nothing pending on '{}' through {through}", settings.watch_stream);
            return Ok(());
        };
        let rows: Vec<PendingRow> = plan
            .transactions
            .iter()
            .map(|t| PendingRow {
                id: t.id.0,
                author: t.author.clone(),
                comment: t.comment.trim().to_string(),
            })
            .collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
        Ok(())
    }
}

/// Arguments for `tributary promote`.
#[derive(Args, Debug)]
pub struct PromoteArgs {
    /// Root name.
    pub root: String,

    /// Highest transaction to promote.
    #[arg(long)]
    pub through: u64,

    /// Promote one transaction at a time, overriding the root's setting.
    #[arg(long, conflicts_with = "batch")]
    pub separately: bool,

    /// Promote in one call, overriding the root's setting.
    #[arg(long)]
    pub batch: bool,

    /// Where comment and id-list files are written.
    #[arg(long, value_name = "DIR")]
    pub scratch_dir: Option<PathBuf>,
}

impl PromoteArgs {
    pub fn run(self) -> Result<()> {
        let settings = load_settings(&self.root)?;
        let feed = connect(&settings)?;
        let mode = if self.separately {
            PromoteMode::Separate
        } else if self.batch {
            PromoteMode::Batch
        } else {
            PromoteMode::from_settings(&settings)
        };
        let scratch = self.scratch_dir.unwrap_or_else(std::env::temp_dir);

        let outcome = promote(
            &feed,
            &settings.version_root(),
            TxId(self.through),
            mode,
            &scratch,
        )
        .with_context(|| format!("promotion failed for '{}'", self.root))?;

        match outcome {
            PromoteOutcome::NothingToPromote => {
                println!("✓ Nothing to promote on '{}' through {}", settings.watch_stream, self.through);
            }
            PromoteOutcome::Promoted { promotion, .. } => {
                let ids: Vec<String> = promotion.transactions.iter().map(|t| t.id.to_string()).collect();
                println!(
                    "✓ Promoted {} transaction(s) from '{}': {}",
                    ids.len(),
                    promotion.stream,
                    ids.join(", ")
                );
            }
        }
        Ok(())
    }
}

/// Arguments for `tributary after-build`.
#[derive(Args, Debug)]
pub struct AfterBuildArgs {
    /// A root version the build consumed, as `<root>=<transaction>`. Repeatable.
    #[arg(long = "revision", value_name = "ROOT=ID", value_parser = parse_revision)]
    pub revisions: Vec<BuildRevision>,

    /// The build failed; nothing is promoted.
    #[arg(long)]
    pub failed: bool,

    /// Where comment and id-list files are written.
    #[arg(long, value_name = "DIR")]
    pub scratch_dir: Option<PathBuf>,
}

impl AfterBuildArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let roots = registry::list_roots_at(&home).context("failed to read the root registry")?;
        let scratch = self.scratch_dir.unwrap_or_else(std::env::temp_dir);

        let reports = promote_after_build(&roots, &self.revisions, !self.failed, &scratch, |settings| {
            settings.ensure_valid()?;
            let cli = AccuRevCli::from_settings(settings);
            cli.login()?;
            Ok::<_, SyncError>(Box::new(cli))
        });

        if reports.is_empty() {
            println!("✓ Nothing to promote");
            return Ok(());
        }

        let mut failures = 0;
        for report in &reports {
            match &report.outcome {
                Ok(PromoteOutcome::NothingToPromote) => {
                    println!("✓ '{}': nothing pending", report.root);
                }
                Ok(PromoteOutcome::Promoted { promotion, .. }) => {
                    println!(
                        "✓ '{}': promoted {} transaction(s) from '{}'",
                        report.root,
                        promotion.transactions.len(),
                        promotion.stream
                    );
                }
                Err(err) => {
                    failures += 1;
                    println!("{} '{}': {err}", "✗".red(), report.root);
                }
            }
        }
        if failures > 0 {
            bail!("promotion failed for {failures} root(s)");
        }
        Ok(())
    }
}

fn parse_revision(raw: &str) -> Result<BuildRevision, String> {
    let (root, id) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <root>=<transaction>, got '{raw}'"))?;
    let version = id
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid transaction '{id}': {e}"))?;
    Ok(BuildRevision {
        root: root.trim().to_string(),
        version: TxId(version),
    })
}
