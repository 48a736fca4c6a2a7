//! `tributary label <root> <label>`: snapshot the watched stream.

use anyhow::{Context, Result};
use clap::Args;

use tributary_sync::label;

use super::{connect, load_settings, version_or_latest};

/// Arguments for `tributary label`.
#[derive(Args, Debug)]
pub struct LabelArgs {
    /// Root name.
    pub root: String,

    /// Label text; invalid characters are replaced.
    pub label: String,

    /// Transaction to snapshot; defaults to the depot's latest.
    #[arg(long)]
    pub at: Option<u64>,
}

impl LabelArgs {
    pub fn run(self) -> Result<()> {
        let settings = load_settings(&self.root)?;
        let feed = connect(&settings)?;
        let at = version_or_latest(&feed, &settings, self.at)?;

        let name = label::label(&feed, &settings.version_root(), &self.label, at)
            .with_context(|| format!("failed to label '{}'", self.root))?;
        println!("✓ Created snapshot '{name}' of '{}' at {at}", settings.watch_stream);
        Ok(())
    }
}
