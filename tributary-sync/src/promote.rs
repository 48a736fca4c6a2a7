//! Promotion of a stream's outstanding transactions to its basis.
//!
//! ```text
//! Start → FetchPending → NoPendingWork                → Done (nothing to promote)
//!                      → HasPendingWork → Separate    → Done
//!                                       → Batch       → Done
//! ```
//!
//! Promotion is idempotent from the caller's side: once an id has reached the
//! basis it no longer appears as pending, so a repeated call with the same
//! bound finds nothing to do.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use uuid::Uuid;

use tributary_core::settings::RootSettings;
use tributary_core::types::{PendingPromotion, PendingTransaction, TxId, VersionRoot};
use tributary_feed::{FeedError, PromoteOutput, TransactionFeed};

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoteMode {
    /// One promote call per transaction, newest first.
    Separate,
    /// One promote call for every qualifying transaction.
    Batch,
}

impl PromoteMode {
    pub fn from_settings(settings: &RootSettings) -> Self {
        if settings.promote_separately {
            Self::Separate
        } else {
            Self::Batch
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromoteOutcome {
    /// No pending transaction at or below the requested bound.
    NothingToPromote,
    Promoted {
        promotion: PendingPromotion,
        /// Backend reports for every promote call made, oldest first.
        log: String,
    },
}

impl PromoteOutcome {
    pub fn promoted(&self) -> bool {
        matches!(self, Self::Promoted { .. })
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// The work a promotion through `through` would submit, without submitting it.
pub fn plan_promotion<F>(
    feed: &F,
    root: &VersionRoot,
    through: TxId,
) -> Result<Option<PendingPromotion>, SyncError>
where
    F: TransactionFeed + ?Sized,
{
    let mut pending: Vec<TxId> = feed
        .pending_transactions(&root.stream)?
        .into_iter()
        .map(|t| t.id)
        .collect();
    pending.sort();

    let Some(&lowest) = pending.first() else {
        info!(stream = %root.stream, "no pending transactions");
        return Ok(None);
    };
    if through < lowest {
        info!(stream = %root.stream, %through, %lowest, "nothing pending at or below the bound");
        return Ok(None);
    }

    let history = feed.history(&root.depot, &root.stream, lowest, through)?;
    let details: HashMap<TxId, (String, String)> = history
        .transactions
        .into_iter()
        .map(|tx| (tx.id, (tx.author, tx.comment)))
        .collect();

    let transactions = pending
        .into_iter()
        .filter(|id| *id <= through)
        .map(|id| {
            let (author, comment) = details.get(&id).cloned().unwrap_or_else(|| {
                warn!(%id, "pending transaction missing from history; promoting without a comment");
                (String::new(), String::new())
            });
            PendingTransaction {
                id,
                author,
                comment,
            }
        })
        .collect();

    Ok(Some(PendingPromotion {
        stream: root.stream.clone(),
        lowest_outstanding: lowest,
        highest_requested: through,
        transactions,
    }))
}

// ---------------------------------------------------------------------------
// Promotion
// ---------------------------------------------------------------------------

/// Promote every pending transaction of `root`'s stream with id ≤ `through`.
///
/// Scratch files are written to `scratch_dir`, removed after success and kept
/// for inspection after a failure.
pub fn promote<F>(
    feed: &F,
    root: &VersionRoot,
    through: TxId,
    mode: PromoteMode,
    scratch_dir: &Path,
) -> Result<PromoteOutcome, SyncError>
where
    F: TransactionFeed + ?Sized,
{
    let Some(promotion) = plan_promotion(feed, root, through)? else {
        return Ok(PromoteOutcome::NothingToPromote);
    };

    info!(
        stream = %promotion.stream,
        count = promotion.transactions.len(),
        ?mode,
        "promoting"
    );
    let log = match mode {
        PromoteMode::Separate => promote_separately(feed, &promotion, scratch_dir)?,
        PromoteMode::Batch => promote_batch(feed, &promotion, scratch_dir)?,
    };
    Ok(PromoteOutcome::Promoted { promotion, log })
}

fn promote_separately<F>(
    feed: &F,
    promotion: &PendingPromotion,
    scratch_dir: &Path,
) -> Result<String, SyncError>
where
    F: TransactionFeed + ?Sized,
{
    let token = Uuid::new_v4().simple().to_string();
    let mut log = String::new();

    for tx in promotion.transactions.iter().rev() {
        let comment_file = scratch_dir.join(format!("tributary-promote-{token}-{}.txt", tx.id));
        write_scratch_files(&[(comment_file.as_path(), comment_line(tx).as_str())])
            .map_err(|(path, e)| scratch_failed(promotion, &mut log, path, e))?;

        let result = feed.promote_one(&promotion.stream, &comment_file, tx.id);
        let output = checked(result, promotion, &mut log, &[comment_file.as_path()])?;
        info!(id = %tx.id, exit_code = output.exit_code, "promoted transaction");
        remove_scratch(&comment_file);
    }
    Ok(log)
}

fn promote_batch<F>(
    feed: &F,
    promotion: &PendingPromotion,
    scratch_dir: &Path,
) -> Result<String, SyncError>
where
    F: TransactionFeed + ?Sized,
{
    let token = Uuid::new_v4().simple().to_string();
    let comment_file = scratch_dir.join(format!("tributary-promote-{token}-comments.txt"));
    let id_file = scratch_dir.join(format!("tributary-promote-{token}-ids.xml"));

    let comments: String = promotion.transactions.iter().map(comment_line).collect();
    let ids = id_list(&promotion.transactions);

    let mut log = String::new();
    write_scratch_files(&[
        (comment_file.as_path(), comments.as_str()),
        (id_file.as_path(), ids.as_str()),
    ])
    .map_err(|(path, e)| scratch_failed(promotion, &mut log, path, e))?;

    let result = feed.promote_batch(&promotion.stream, &comment_file, &id_file);
    checked(result, promotion, &mut log, &[comment_file.as_path(), id_file.as_path()])?;

    remove_scratch(&comment_file);
    remove_scratch(&id_file);
    Ok(log)
}

/// Append the backend's report to `log` and fail unless it exited cleanly.
fn checked(
    result: Result<PromoteOutput, FeedError>,
    promotion: &PendingPromotion,
    log: &mut String,
    scratch: &[&Path],
) -> Result<PromoteOutput, SyncError> {
    let kept = || {
        scratch
            .iter()
            .map(|p| format!("scratch file kept: {}", p.display()))
            .collect::<Vec<_>>()
            .join("\n")
    };
    match result {
        Ok(output) if output.succeeded() => {
            let _ = writeln!(log, "{output}");
            Ok(output)
        }
        Ok(output) => {
            let _ = writeln!(log, "{output}");
            log.push_str(&kept());
            Err(SyncError::PromotionFailed {
                stream: promotion.stream.clone(),
                log: log.clone(),
                source: None,
            })
        }
        Err(err) => {
            let _ = writeln!(log, "{err}");
            log.push_str(&kept());
            Err(SyncError::PromotionFailed {
                stream: promotion.stream.clone(),
                log: log.clone(),
                source: Some(err),
            })
        }
    }
}

/// `author: comment`, one line per transaction.
fn comment_line(tx: &PendingTransaction) -> String {
    let comment = tx.comment.trim().replace(['\r', '\n'], " ");
    format!("{}: {}\n", tx.author, comment)
}

/// The backend's id-list document, ascending.
fn id_list(transactions: &[PendingTransaction]) -> String {
    let mut xml = String::from("<transactions>\n");
    for tx in transactions {
        let _ = writeln!(xml, "\t<id>{}</id>", tx.id);
    }
    xml.push_str("</transactions>\n");
    xml
}

/// Write all of `files` or none of them: on failure the files already
/// written are removed again.
fn write_scratch_files(files: &[(&Path, &str)]) -> Result<(), (PathBuf, std::io::Error)> {
    for (i, (path, content)) in files.iter().enumerate() {
        if let Err(e) = std::fs::write(path, content) {
            for (written, _) in &files[..i] {
                remove_scratch(written);
            }
            return Err((path.to_path_buf(), e));
        }
    }
    Ok(())
}

/// Nothing was submitted; report the write failure the way a failed promote
/// is reported.
fn scratch_failed(
    promotion: &PendingPromotion,
    log: &mut String,
    path: PathBuf,
    source: std::io::Error,
) -> SyncError {
    let _ = writeln!(log, "could not write scratch file {}: {source}", path.display());
    SyncError::PromotionFailed {
        stream: promotion.stream.clone(),
        log: log.clone(),
        source: Some(FeedError::Io { path, source }),
    }
}

fn remove_scratch(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "could not remove scratch file");
    }
}

// ---------------------------------------------------------------------------
// After a build
// ---------------------------------------------------------------------------

/// One root version a build consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRevision {
    pub root: String,
    pub version: TxId,
}

/// Highest consumed id per root name.
pub fn highest_per_root(revisions: &[BuildRevision]) -> BTreeMap<String, TxId> {
    let mut highest: BTreeMap<String, TxId> = BTreeMap::new();
    for rev in revisions {
        highest
            .entry(rev.root.clone())
            .and_modify(|v| *v = (*v).max(rev.version))
            .or_insert(rev.version);
    }
    highest
}

/// What happened to one root after a build.
#[derive(Debug)]
pub struct RootPromotion {
    pub root: String,
    pub outcome: Result<PromoteOutcome, SyncError>,
}

/// Promote every root that asks for it, once a build has succeeded.
///
/// Roots without promote-on-success, or without a revision in the build,
/// are skipped. A failing root does not stop the others.
pub fn promote_after_build<F, C>(
    roots: &[RootSettings],
    revisions: &[BuildRevision],
    build_succeeded: bool,
    scratch_dir: &Path,
    mut connect: C,
) -> Vec<RootPromotion>
where
    F: Deref,
    F::Target: TransactionFeed,
    C: FnMut(&RootSettings) -> Result<F, SyncError>,
{
    if !build_succeeded {
        info!("build failed; nothing promoted");
        return Vec::new();
    }
    let highest = highest_per_root(revisions);

    roots
        .iter()
        .filter(|settings| settings.promote_on_success)
        .filter_map(|settings| {
            let through = *highest.get(&settings.name)?;
            let outcome = connect(settings).and_then(|feed| {
                promote(
                    &*feed,
                    &settings.version_root(),
                    through,
                    PromoteMode::from_settings(settings),
                    scratch_dir,
                )
            });
            if let Err(err) = &outcome {
                warn!(root = %settings.name, error = %err, "promotion after build failed");
            }
            Some(RootPromotion {
                root: settings.name.clone(),
                outcome,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tributary_core::types::Transaction;
    use tributary_feed::MemoryFeed;
    use tempfile::TempDir;

    fn root() -> VersionRoot {
        VersionRoot::new("acme", "acme".into(), "dev".into())
    }

    fn feed_with_pending(ids: &[u64]) -> MemoryFeed {
        let feed = MemoryFeed::new();
        for &id in ids {
            feed.add_transaction(
                "dev",
                Transaction {
                    id: TxId(id),
                    timestamp: 1_300_000_000,
                    author: format!("user{id}"),
                    comment: format!("fix {id}"),
                    kind: "keep".into(),
                    versions: vec![],
                },
            );
        }
        feed.set_pending("dev", ids.iter().copied());
        feed
    }

    #[test]
    fn plan_collects_comments_from_history() {
        let feed = feed_with_pending(&[100, 101, 105]);
        let plan = plan_promotion(&feed, &root(), TxId(102)).unwrap().unwrap();
        assert_eq!(plan.lowest_outstanding, TxId(100));
        assert_eq!(plan.highest_requested, TxId(102));
        let ids: Vec<u64> = plan.transactions.iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![100, 101]);
        assert_eq!(plan.transactions[1].author, "user101");
        assert_eq!(plan.transactions[1].comment, "fix 101");
    }

    #[test]
    fn batch_writes_id_list_and_comments() {
        let feed = feed_with_pending(&[100, 101]);
        let scratch = TempDir::new().unwrap();

        let outcome = promote(&feed, &root(), TxId(101), PromoteMode::Batch, scratch.path()).unwrap();
        assert!(outcome.promoted());

        let calls = feed.promotions();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].batch);
        assert_eq!(calls[0].ids, vec![TxId(100), TxId(101)]);
        assert_eq!(calls[0].comments, "user100: fix 100\nuser101: fix 101\n");
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_batch_keeps_scratch_files_and_reports_log() {
        let feed = feed_with_pending(&[100, 101]);
        feed.fail_promote(101);
        let scratch = TempDir::new().unwrap();

        let err = promote(&feed, &root(), TxId(101), PromoteMode::Batch, scratch.path()).unwrap_err();
        match err {
            SyncError::PromotionFailed { log, source, .. } => {
                assert!(log.contains("return code : 1"), "log: {log}");
                assert!(log.contains("scratch file kept"), "log: {log}");
                assert!(source.is_none());
            }
            other => panic!("unexpected {other}"),
        }
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 2);
        assert_eq!(feed.pending("dev"), vec![TxId(100), TxId(101)]);
    }

    #[test]
    fn separate_failure_stops_and_keeps_earlier_reports() {
        let feed = feed_with_pending(&[100, 101, 102]);
        feed.fail_promote(101);
        let scratch = TempDir::new().unwrap();

        let err =
            promote(&feed, &root(), TxId(102), PromoteMode::Separate, scratch.path()).unwrap_err();
        let SyncError::PromotionFailed { log, .. } = err else {
            panic!("expected PromotionFailed");
        };
        assert_eq!(log.matches("command     :").count(), 2);
        let ids: Vec<Vec<TxId>> = feed.promotions().into_iter().map(|c| c.ids).collect();
        assert_eq!(ids, vec![vec![TxId(102)], vec![TxId(101)]]);
        assert_eq!(feed.pending("dev"), vec![TxId(100), TxId(101)]);
    }

    #[test]
    fn backend_error_is_wrapped_with_the_log() {
        let feed = feed_with_pending(&[100]);
        feed.fail_next(
            "promote_batch",
            FeedError::BackendUnavailable {
                command: "promote".into(),
                detail: "connection refused".into(),
            },
        );
        let scratch = TempDir::new().unwrap();

        let err = promote(&feed, &root(), TxId(100), PromoteMode::Batch, scratch.path()).unwrap_err();
        assert!(matches!(
            err,
            SyncError::PromotionFailed {
                source: Some(FeedError::BackendUnavailable { .. }),
                ..
            }
        ));
    }

    #[test]
    fn unwritable_scratch_dir_fails_before_submitting() {
        let feed = feed_with_pending(&[100, 101]);
        let scratch = TempDir::new().unwrap();
        let missing = scratch.path().join("missing");

        for mode in [PromoteMode::Batch, PromoteMode::Separate] {
            let err = promote(&feed, &root(), TxId(101), mode, &missing).unwrap_err();
            match err {
                SyncError::PromotionFailed { log, source, .. } => {
                    assert!(log.contains("could not write scratch file"), "log: {log}");
                    assert!(matches!(source, Some(FeedError::Io { .. })));
                }
                other => panic!("unexpected {other}"),
            }
        }
        assert!(feed.promotions().is_empty());
        assert_eq!(feed.pending("dev"), vec![TxId(100), TxId(101)]);
    }

    #[test]
    fn partial_scratch_writes_are_removed() {
        let scratch = TempDir::new().unwrap();
        let comments = scratch.path().join("comments.txt");
        let ids = scratch.path().join("missing/ids.xml");

        let (failed, _) =
            write_scratch_files(&[(comments.as_path(), "a: b\n"), (ids.as_path(), "<transactions/>")])
                .unwrap_err();

        assert_eq!(failed, ids);
        assert!(!comments.exists());
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn highest_per_root_takes_the_max() {
        let revisions = vec![
            BuildRevision {
                root: "acme".into(),
                version: TxId(9),
            },
            BuildRevision {
                root: "acme".into(),
                version: TxId(12),
            },
            BuildRevision {
                root: "tools".into(),
                version: TxId(3),
            },
        ];
        let highest = highest_per_root(&revisions);
        assert_eq!(highest.get("acme"), Some(&TxId(12)));
        assert_eq!(highest.get("tools"), Some(&TxId(3)));
    }

    #[test]
    fn after_build_promotes_only_opted_in_roots() {
        let feed = feed_with_pending(&[100, 101]);
        let scratch = TempDir::new().unwrap();
        let mut opted_in = RootSettings::new("acme", "acme", "dev");
        opted_in.promote_on_success = true;
        let mut manual = RootSettings::new("tools", "acme", "tools");
        manual.promote_on_success = false;
        let revisions = vec![
            BuildRevision {
                root: "acme".into(),
                version: TxId(101),
            },
            BuildRevision {
                root: "tools".into(),
                version: TxId(101),
            },
        ];

        let failed_build = promote_after_build(
            &[opted_in.clone(), manual.clone()],
            &revisions,
            false,
            scratch.path(),
            |_| Ok(&feed),
        );
        assert!(failed_build.is_empty());

        let report = promote_after_build(
            &[opted_in, manual],
            &revisions,
            true,
            scratch.path(),
            |_| Ok(&feed),
        );
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].root, "acme");
        assert!(matches!(&report[0].outcome, Ok(o) if o.promoted()));
        assert!(feed.pending("dev").is_empty());
    }

    #[test]
    fn comment_lines_stay_on_one_line() {
        let tx = PendingTransaction {
            id: TxId(1),
            author: "ops".into(),
            comment: "first\nsecond\n".into(),
        };
        assert_eq!(comment_line(&tx), "ops: first second\n");
    }
}
