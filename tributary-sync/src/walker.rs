//! Change collection across the stream hierarchy.
//!
//! Starting at the watched stream, history for the requested range is read
//! stream by stream up the basis chain. Every transaction with at least one
//! real change becomes one [`ModificationBatch`]. The parent chain is fetched
//! fresh on every call and walked iteratively.

use std::collections::HashSet;

use tracing::{debug, info};

use tributary_core::types::{ChangeRecord, ModificationBatch, StreamName, TxId, VersionRoot};
use tributary_feed::{FeedError, History, TransactionFeed};

use crate::ancestry::AncestorResolver;
use crate::error::SyncError;

/// Logical changes that bring `root` from `from` to `to`, oldest first.
///
/// `from == to` is an empty range. A transaction whose id equals `from` was
/// consumed by the previous collection and is skipped.
pub fn collect_changes<F>(
    feed: &F,
    root: &VersionRoot,
    from: TxId,
    to: TxId,
) -> Result<Vec<ModificationBatch>, SyncError>
where
    F: TransactionFeed + ?Sized,
{
    if from == to {
        return Ok(Vec::new());
    }
    if from > to {
        return Err(SyncError::InvalidRange { from, to });
    }

    let mut resolver = AncestorResolver::new(feed);
    let mut visited: HashSet<StreamName> = HashSet::new();
    let mut attributed: HashSet<(String, String)> = HashSet::new();
    let mut batches = Vec::new();

    let mut next = Some(root.stream.clone());
    while let Some(stream) = next {
        if !visited.insert(stream.clone()) {
            return Err(SyncError::InconsistentHierarchy(format!(
                "stream {stream} is its own ancestor"
            )));
        }

        let history = feed.history(&root.depot, &stream, from, to)?;
        debug!(%stream, transactions = history.transactions.len(), "fetched history");
        collect_stream(
            &history,
            from,
            to,
            &mut resolver,
            &mut attributed,
            &mut batches,
        )
        .map_err(hierarchy)?;

        next = feed
            .parent_stream(&root.depot, &stream)?
            .map(|parent| StreamName::from(parent.as_str().trim()))
            .filter(|parent| !parent.as_str().is_empty());
    }

    // Stable: batches from one transaction id keep their walk order.
    batches.sort_by_key(|b| b.display_version);

    if root.hide_changes {
        return Ok(hide(root, batches, to));
    }

    info!(
        root = %root.name,
        %from,
        %to,
        batches = batches.len(),
        "collected changes"
    );
    Ok(batches)
}

fn collect_stream<F>(
    history: &History,
    from: TxId,
    to: TxId,
    resolver: &mut AncestorResolver<'_, F>,
    attributed: &mut HashSet<(String, String)>,
    batches: &mut Vec<ModificationBatch>,
) -> Result<(), FeedError>
where
    F: TransactionFeed + ?Sized,
{
    for tx in &history.transactions {
        if tx.id == from {
            continue;
        }

        let mut changes = Vec::new();
        for version in &tx.versions {
            let virtual_named = history.streams.resolve(&version.virtual_version)?;
            let real_named = history.streams.resolve(&version.real_version)?;
            let path = version.normalized_path();

            if !attributed.insert((path.clone(), real_named)) {
                debug!(tx = %tx.id, %path, "already attributed by a descendant stream");
                continue;
            }

            let before = resolver.before_of(
                version.ancestor.as_deref(),
                &virtual_named,
                &version.element_path,
            )?;

            let record = if tx.is_defunct() {
                Some(ChangeRecord::removed(path, version.is_directory, before))
            } else {
                ChangeRecord::classify(
                    path,
                    version.is_directory,
                    before,
                    version.virtual_version.clone(),
                )
            };
            match record {
                Some(record) => changes.push(record),
                None => debug!(tx = %tx.id, path = %version.element_path, "version unchanged"),
            }
        }

        if changes.is_empty() {
            continue;
        }
        batches.push(ModificationBatch {
            date: tx.date(),
            author: tx.author.clone(),
            comment: tx.comment.clone(),
            changes,
            consumed_version: to,
            display_version: tx.id,
        });
    }
    Ok(())
}

/// Collapse everything into one opaque batch carrying the newest file list.
fn hide(root: &VersionRoot, batches: Vec<ModificationBatch>, to: TxId) -> Vec<ModificationBatch> {
    let Some(latest) = batches.into_iter().max_by_key(|b| (b.display_version, b.date)) else {
        return Vec::new();
    };
    info!(root = %root.name, tx = %latest.display_version, "changes hidden");
    vec![ModificationBatch {
        comment: format!("Changes from Ignored Stream ({})", root.stream),
        consumed_version: to,
        ..latest
    }]
}

fn hierarchy(err: FeedError) -> SyncError {
    match err {
        FeedError::InconsistentHierarchy(detail) => SyncError::InconsistentHierarchy(detail),
        other => SyncError::Feed(other),
    }
}
