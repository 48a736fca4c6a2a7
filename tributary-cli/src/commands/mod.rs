//! Subcommands, plus the helpers they share for loading roots and reaching
//! the backend.

pub mod checkout;
pub mod collect;
pub mod diff;
pub mod label;
pub mod patch;
pub mod promote;
pub mod root;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use tributary_core::{registry, types::TxId, RootSettings};
use tributary_feed::{AccuRevCli, TransactionFeed};

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Load and validate a registered root.
pub(crate) fn load_settings(name: &str) -> Result<RootSettings> {
    let home = home()?;
    let settings = registry::load_root_at(&home, name)
        .with_context(|| format!("failed to load root '{name}': run `tributary root add` first"))?;
    settings
        .ensure_valid()
        .with_context(|| format!("root '{name}' is not usable"))?;
    debug!(root = name, location = %settings.version_root().describe(), "loaded root");
    Ok(settings)
}

/// A logged-in backend client for `settings`.
pub(crate) fn connect(settings: &RootSettings) -> Result<AccuRevCli> {
    let cli = AccuRevCli::from_settings(settings);
    cli.login()
        .with_context(|| format!("login to {} failed", settings.server_address()))?;
    Ok(cli)
}

/// `explicit`, or the depot's newest transaction.
pub(crate) fn version_or_latest(
    feed: &impl TransactionFeed,
    settings: &RootSettings,
    explicit: Option<u64>,
) -> Result<TxId> {
    match explicit {
        Some(id) => Ok(TxId(id)),
        None => feed
            .last_transaction(&settings.version_root().depot)
            .context("failed to read the depot's latest transaction"),
    }
}
