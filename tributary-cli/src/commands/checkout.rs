//! `tributary checkout <root> <dir>`: agent-side checkout.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use tributary_feed::Provisioned;
use tributary_sync::checkout::{clean_requested, run_checkout, CheckoutPlan};

use super::{connect, load_settings, version_or_latest};

/// Set to `true` to make every checkout clean.
const CLEAN_ENV: &str = "TRIBUTARY_CLEAN_CHECKOUT";

/// Arguments for `tributary checkout`.
#[derive(Args, Debug)]
pub struct CheckoutArgs {
    /// Root name.
    pub root: String,

    /// Working directory of the build.
    pub dir: PathBuf,

    /// Transaction to check out; defaults to the depot's latest.
    #[arg(long)]
    pub at: Option<u64>,

    /// Empty the checkout directory and repopulate it from scratch.
    #[arg(long)]
    pub clean: bool,

    /// Agent name used in stream and workspace names; defaults to $HOSTNAME.
    #[arg(long)]
    pub host: Option<String>,
}

impl CheckoutArgs {
    pub fn run(self) -> Result<()> {
        let settings = load_settings(&self.root)?;
        let backend = connect(&settings)?;
        let at = version_or_latest(&backend, &settings, self.at)?;

        let dir = if self.dir.is_absolute() {
            self.dir.clone()
        } else {
            std::env::current_dir()
                .context("cannot resolve the current directory")?
                .join(&self.dir)
        };
        let host = self
            .host
            .or_else(|| std::env::var("HOSTNAME").ok())
            .or_else(|| std::env::var("COMPUTERNAME").ok())
            .unwrap_or_else(|| "localhost".to_string());
        let clean = self.clean || clean_requested(std::env::var(CLEAN_ENV).ok().as_deref());

        let plan = CheckoutPlan::new(&settings, &host, &dir, at, clean);
        let report = run_checkout(&backend, &plan)
            .with_context(|| format!("checkout failed in {}", dir.display()))?;

        println!(
            "✓ {} stream '{}' at {at}",
            verb(report.stream),
            plan.stream
        );
        println!(
            "✓ {} {} '{}' in {}",
            verb(report.workspace),
            plan.kind,
            plan.workspace,
            plan.checkout_dir.display()
        );
        for warning in &report.warnings {
            println!("{} {warning}", "⚠".yellow());
        }
        Ok(())
    }
}

fn verb(outcome: Provisioned) -> &'static str {
    match outcome {
        Provisioned::Created => "Created",
        Provisioned::Changed => "Updated",
    }
}
