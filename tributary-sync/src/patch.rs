//! Patch synthesis.
//!
//! A full patch materializes the stream into a scratch directory and replays
//! it as `CreateDir`/`CreateFile` operations. An incremental patch maps the
//! backend's change feed onto operations one entry at a time. Both stream
//! into a [`PatchSink`] in emission order.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use tributary_core::types::{
    normalize_element_path, FeedChange, FeedEntry, FeedSide, PatchOperation, TxId, VersionRoot,
};
use tributary_feed::{FeedError, TransactionFeed};

use crate::error::{io_err, SyncError};

/// Receives patch operations strictly in the order they are produced.
pub trait PatchSink {
    fn apply(&mut self, operation: PatchOperation) -> Result<(), SyncError>;
}

impl PatchSink for Vec<PatchOperation> {
    fn apply(&mut self, operation: PatchOperation) -> Result<(), SyncError> {
        self.push(operation);
        Ok(())
    }
}

/// Full patch when `from` is `None`, incremental otherwise. Returns the
/// number of operations emitted.
pub fn build_patch<F, S>(
    feed: &F,
    root: &VersionRoot,
    from: Option<TxId>,
    to: TxId,
    sink: &mut S,
) -> Result<usize, SyncError>
where
    F: TransactionFeed + ?Sized,
    S: PatchSink + ?Sized,
{
    match from {
        None => build_full_patch(feed, root, to, sink),
        Some(from) => build_incremental_patch(feed, root, from, to, sink),
    }
}

// ---------------------------------------------------------------------------
// Full patch
// ---------------------------------------------------------------------------

/// Recreate the whole tree of `root` as of `to`.
///
/// Paths are relative to the scratch root, so a configured sub-directory
/// shows up as a leading `CreateDir`. The scratch directory is removed on
/// every exit path.
pub fn build_full_patch<F, S>(
    feed: &F,
    root: &VersionRoot,
    to: TxId,
    sink: &mut S,
) -> Result<usize, SyncError>
where
    F: TransactionFeed + ?Sized,
    S: PatchSink + ?Sized,
{
    build_full_patch_in(feed, root, to, &std::env::temp_dir(), sink)
}

/// [`build_full_patch`] with the scratch directory created under
/// `scratch_parent`. The scratch directory is gone when this returns, whether
/// or not the patch succeeded.
pub fn build_full_patch_in<F, S>(
    feed: &F,
    root: &VersionRoot,
    to: TxId,
    scratch_parent: &Path,
    sink: &mut S,
) -> Result<usize, SyncError>
where
    F: TransactionFeed + ?Sized,
    S: PatchSink + ?Sized,
{
    let scratch = tempfile::Builder::new()
        .prefix("tributary-full-")
        .tempdir_in(scratch_parent)
        .map_err(|e| io_err(scratch_parent, e))?;

    let dest = match &root.sub_directory {
        Some(sub) => {
            let dest = scratch.path().join(sub);
            fs::create_dir_all(&dest).map_err(|e| io_err(&dest, e))?;
            dest
        }
        None => scratch.path().to_path_buf(),
    };

    let stream = root.working_stream();
    info!(root = %root.name, %stream, %to, "materializing full tree");
    feed.materialize(&root.depot, stream, to, &dest)?;

    let mut emitted = 0;
    walk_tree(scratch.path(), Path::new(""), sink, &mut emitted)?;

    let scratch_path = scratch.path().to_path_buf();
    scratch.close().map_err(|e| io_err(scratch_path, e))?;
    debug!(operations = emitted, "full patch done");
    Ok(emitted)
}

/// Depth-first, entries in name order, a directory before its contents.
fn walk_tree<S>(
    base: &Path,
    relative: &Path,
    sink: &mut S,
    emitted: &mut usize,
) -> Result<(), SyncError>
where
    S: PatchSink + ?Sized,
{
    let dir = base.join(relative);
    let mut entries = fs::read_dir(&dir)
        .map_err(|e| io_err(&dir, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| io_err(&dir, e))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = relative.join(entry.file_name());
        let full = entry.path();
        let file_type = entry.file_type().map_err(|e| io_err(&full, e))?;

        if file_type.is_symlink() {
            // Links to files become copies; links to directories are never
            // followed, so a link to an ancestor cannot loop.
            match fs::metadata(&full) {
                Ok(target) if target.is_file() => {}
                Ok(_) => {
                    warn!(path = %path.display(), "skipping link to a directory");
                    continue;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping dangling link");
                    continue;
                }
            }
        } else if file_type.is_dir() {
            sink.apply(PatchOperation::CreateDir { path: path.clone() })?;
            *emitted += 1;
            walk_tree(base, &path, sink, emitted)?;
            continue;
        }

        let content = fs::read(&full).map_err(|e| io_err(&full, e))?;
        sink.apply(PatchOperation::CreateFile { path, content })?;
        *emitted += 1;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Incremental patch
// ---------------------------------------------------------------------------

/// Operations that bring a checkout of `root` at `from` up to `to`.
pub fn build_incremental_patch<F, S>(
    feed: &F,
    root: &VersionRoot,
    from: TxId,
    to: TxId,
    sink: &mut S,
) -> Result<usize, SyncError>
where
    F: TransactionFeed + ?Sized,
    S: PatchSink + ?Sized,
{
    if to < from {
        return Err(SyncError::InvalidRange { from, to });
    }

    let entries = feed.change_feed(&root.stream, from, to)?;
    info!(root = %root.name, %from, %to, entries = entries.len(), "building incremental patch");

    let mut emitted = 0;
    for entry in &entries {
        let Some(operation) = operation_for(feed, root, entry)? else {
            continue;
        };
        debug!(operation = operation.label(), path = %operation.path().display(), "patch");
        sink.apply(operation)?;
        emitted += 1;
    }
    Ok(emitted)
}

fn operation_for<F>(
    feed: &F,
    root: &VersionRoot,
    entry: &FeedEntry,
) -> Result<Option<PatchOperation>, SyncError>
where
    F: TransactionFeed + ?Sized,
{
    let operation = match &entry.change {
        FeedChange::Version => {
            let side = required(entry, entry.new.as_ref(), "new")?;
            PatchOperation::ChangeFile {
                path: relative(&side.name),
                content: feed.element_content(&root.depot, &side.version, &side.name)?,
            }
        }
        FeedChange::NowVisible => {
            let side = required(entry, entry.new.as_ref(), "new")?;
            let path = relative(&side.name);
            if is_directory(feed, root, side)? {
                PatchOperation::CreateDir { path }
            } else {
                PatchOperation::CreateFile {
                    path,
                    content: feed.element_content(&root.depot, &side.version, &side.name)?,
                }
            }
        }
        FeedChange::NoLongerVisible => {
            let side = required(entry, entry.new.as_ref().or(entry.old.as_ref()), "new")?;
            let path = relative(&side.name);
            if is_directory(feed, root, side)? {
                PatchOperation::DeleteDir { path }
            } else {
                PatchOperation::DeleteFile { path }
            }
        }
        FeedChange::Moved => {
            let old = required(entry, entry.old.as_ref(), "old")?;
            let new = required(entry, entry.new.as_ref(), "new")?;
            let from = relative(&old.name);
            let to = relative(&new.name);
            if is_directory(feed, root, new)? {
                PatchOperation::RenameDir { from, to }
            } else {
                PatchOperation::RenameFile { from, to }
            }
        }
        FeedChange::Unrecognized(tag) => {
            error!(%tag, "unrecognized change type in feed; entry skipped");
            return Ok(None);
        }
    };
    Ok(Some(operation))
}

fn required<'a>(
    entry: &FeedEntry,
    side: Option<&'a FeedSide>,
    which: &str,
) -> Result<&'a FeedSide, SyncError> {
    side.ok_or_else(|| {
        SyncError::Feed(FeedError::MalformedResponse {
            context: format!("'{}' change without its {which} element", entry.change.tag()),
            raw: format!("{entry:?}"),
        })
    })
}

/// Directory-ness from the entry itself, else from the element's status.
fn is_directory<F>(feed: &F, root: &VersionRoot, side: &FeedSide) -> Result<bool, SyncError>
where
    F: TransactionFeed + ?Sized,
{
    if let Some(flag) = side.is_directory {
        return Ok(flag);
    }
    match feed.element_status(&root.stream, &side.name)? {
        Some(status) => Ok(status.is_directory),
        None => {
            warn!(element = %side.name, "no status for element; treating it as a file");
            Ok(false)
        }
    }
}

fn relative(element_path: &str) -> PathBuf {
    PathBuf::from(normalize_element_path(element_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tributary_feed::MemoryFeed;

    fn root() -> VersionRoot {
        VersionRoot::new("acme", "acme".into(), "dev".into())
    }

    fn side(name: &str, version: &str, is_directory: Option<bool>) -> FeedSide {
        FeedSide {
            name: name.into(),
            version: version.into(),
            is_directory,
        }
    }

    fn entry(change: FeedChange, old: Option<FeedSide>, new: Option<FeedSide>) -> FeedEntry {
        FeedEntry { change, old, new }
    }

    #[test]
    fn full_patch_lists_tree_in_name_order() {
        let feed = MemoryFeed::new();
        feed.add_file("dev", "/./src/b.rs", "b");
        feed.add_file("dev", "/./src/a.rs", "a");
        feed.add_file("dev", "/./README", "readme");
        feed.add_dir("dev", "/./empty");

        let mut ops = Vec::new();
        let count = build_full_patch(&feed, &root(), TxId(7), &mut ops).unwrap();

        assert_eq!(count, ops.len());
        assert_eq!(
            ops,
            vec![
                PatchOperation::CreateFile {
                    path: "README".into(),
                    content: b"readme".to_vec()
                },
                PatchOperation::CreateDir {
                    path: "empty".into()
                },
                PatchOperation::CreateDir { path: "src".into() },
                PatchOperation::CreateFile {
                    path: PathBuf::from("src").join("a.rs"),
                    content: b"a".to_vec()
                },
                PatchOperation::CreateFile {
                    path: PathBuf::from("src").join("b.rs"),
                    content: b"b".to_vec()
                },
            ]
        );
    }

    #[test]
    fn full_patch_uses_populate_stream_and_sub_directory() {
        let feed = MemoryFeed::new();
        feed.add_file("release", "/./a.txt", "from release");
        feed.add_file("dev", "/./a.txt", "from dev");
        let mut root = root();
        root.populate_stream = Some("release".into());
        root.sub_directory = Some("checkout".into());

        let mut ops = Vec::new();
        build_full_patch(&feed, &root, TxId(7), &mut ops).unwrap();
        assert_eq!(
            ops,
            vec![
                PatchOperation::CreateDir {
                    path: "checkout".into()
                },
                PatchOperation::CreateFile {
                    path: PathBuf::from("checkout").join("a.txt"),
                    content: b"from release".to_vec()
                },
            ]
        );
    }

    #[test]
    fn version_entry_fetches_new_content() {
        let feed = MemoryFeed::new();
        feed.add_feed_entry(
            "dev",
            entry(FeedChange::Version, None, Some(side("/./a.txt", "dev/3", Some(false)))),
        );
        feed.set_content("dev/3", "/./a.txt", "v3");

        let mut ops = Vec::new();
        build_incremental_patch(&feed, &root(), TxId(1), TxId(3), &mut ops).unwrap();
        assert_eq!(
            ops,
            vec![PatchOperation::ChangeFile {
                path: "a.txt".into(),
                content: b"v3".to_vec()
            }]
        );
    }

    #[test]
    fn directory_flag_falls_back_to_status() {
        let feed = MemoryFeed::new();
        feed.add_feed_entry(
            "dev",
            entry(FeedChange::NowVisible, None, Some(side("/./docs", "dev/1", None))),
        );
        feed.add_feed_entry(
            "dev",
            entry(FeedChange::NoLongerVisible, None, Some(side("/./old", "dev/2", None))),
        );
        feed.set_status("dev", "/./docs", true);
        feed.set_status("dev", "/./old", false);

        let mut ops = Vec::new();
        build_incremental_patch(&feed, &root(), TxId(1), TxId(3), &mut ops).unwrap();
        assert_eq!(
            ops,
            vec![
                PatchOperation::CreateDir { path: "docs".into() },
                PatchOperation::DeleteFile { path: "old".into() },
            ]
        );
        assert_eq!(feed.call_count("element_status"), 2);
    }

    #[test]
    fn unrecognized_tag_is_skipped() {
        let feed = MemoryFeed::new();
        feed.add_feed_entry(
            "dev",
            entry(
                FeedChange::Unrecognized("stranded".into()),
                None,
                Some(side("/./x", "dev/1", Some(false))),
            ),
        );
        feed.add_feed_entry(
            "dev",
            entry(FeedChange::NoLongerVisible, None, Some(side("/./y", "dev/1", Some(true)))),
        );

        let mut ops = Vec::new();
        let count = build_incremental_patch(&feed, &root(), TxId(1), TxId(2), &mut ops).unwrap();
        assert_eq!(count, 1);
        assert_eq!(ops, vec![PatchOperation::DeleteDir { path: "y".into() }]);
    }

    #[test]
    fn moved_without_old_side_is_malformed() {
        let feed = MemoryFeed::new();
        feed.add_feed_entry(
            "dev",
            entry(FeedChange::Moved, None, Some(side("/./b.txt", "dev/2", Some(false)))),
        );

        let mut ops = Vec::new();
        let err = build_incremental_patch(&feed, &root(), TxId(1), TxId(2), &mut ops).unwrap_err();
        assert!(
            matches!(err, SyncError::Feed(FeedError::MalformedResponse { .. })),
            "got {err}"
        );
    }

    #[test]
    fn dispatch_picks_contract_by_from() {
        let feed = MemoryFeed::new();
        feed.add_file("dev", "/./a.txt", "a");

        let mut full = Vec::new();
        build_patch(&feed, &root(), None, TxId(2), &mut full).unwrap();
        assert_eq!(feed.call_count("materialize"), 1);

        let mut delta = Vec::new();
        build_patch(&feed, &root(), Some(TxId(2)), TxId(2), &mut delta).unwrap();
        assert_eq!(feed.call_count("change_feed"), 1);
        assert!(delta.is_empty());
    }

    #[test]
    fn incremental_rejects_reversed_range() {
        let feed = MemoryFeed::new();
        let mut ops = Vec::new();
        let err = build_incremental_patch(&feed, &root(), TxId(5), TxId(4), &mut ops).unwrap_err();
        assert!(matches!(err, SyncError::InvalidRange { .. }));
        assert_eq!(feed.call_count("change_feed"), 0);
    }

    #[cfg(unix)]
    #[test]
    fn tree_walk_copies_file_links_and_skips_directory_links() {
        use std::os::unix::fs::symlink;

        let tree = TempDir::new().unwrap();
        fs::create_dir(tree.path().join("a")).unwrap();
        fs::write(tree.path().join("a/file.txt"), "payload").unwrap();
        symlink("file.txt", tree.path().join("a/link.txt")).unwrap();
        symlink("..", tree.path().join("a/loop")).unwrap();
        symlink("missing", tree.path().join("a/dangling")).unwrap();

        let mut ops = Vec::new();
        let mut emitted = 0;
        walk_tree(tree.path(), Path::new(""), &mut ops, &mut emitted).unwrap();

        assert_eq!(
            ops,
            vec![
                PatchOperation::CreateDir { path: "a".into() },
                PatchOperation::CreateFile {
                    path: "a/file.txt".into(),
                    content: b"payload".to_vec(),
                },
                PatchOperation::CreateFile {
                    path: "a/link.txt".into(),
                    content: b"payload".to_vec(),
                },
            ]
        );
        assert_eq!(emitted, 3);
    }
}
