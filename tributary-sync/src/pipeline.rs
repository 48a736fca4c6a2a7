//! Watermark-driven collection used by the CLI.

use std::path::Path;

use tracing::info;

use tributary_core::types::{ModificationBatch, TxId, VersionRoot};
use tributary_feed::TransactionFeed;

use crate::error::SyncError;
use crate::walker::collect_changes;
use crate::watermark::{self, Watermark};

/// The range a collection covered and what it found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub root: String,
    pub from: TxId,
    pub to: TxId,
    pub batches: Vec<ModificationBatch>,
    /// Whether the watermark was moved to `to`.
    pub recorded: bool,
}

/// Collect changes for `root` since its watermark.
///
/// `from` defaults to the stored watermark and `to` to the depot's latest
/// transaction. Without either a `from` or a watermark the range starts at
/// `to`, so a first collection only establishes the watermark. With
/// `dry_run` the watermark is left alone.
pub fn collect<F>(
    home: &Path,
    feed: &F,
    root: &VersionRoot,
    from: Option<TxId>,
    to: Option<TxId>,
    dry_run: bool,
) -> Result<Collection, SyncError>
where
    F: TransactionFeed + ?Sized,
{
    let to = match to {
        Some(to) => to,
        None => feed.last_transaction(&root.depot)?,
    };
    let from = match from {
        Some(from) => from,
        None => watermark::load_at(home, &root.name)?
            .map(|w| w.consumed)
            .unwrap_or(to),
    };

    let batches = collect_changes(feed, root, from, to)?;

    let recorded = !dry_run;
    if recorded {
        watermark::save_at(home, &root.name, &Watermark::now(to))?;
        info!(root = %root.name, consumed = %to, "watermark advanced");
    }

    Ok(Collection {
        root: root.name.clone(),
        from,
        to,
        batches,
        recorded,
    })
}
