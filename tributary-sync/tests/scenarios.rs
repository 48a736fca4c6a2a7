//! End-to-end behaviour of collection, patching and promotion against the
//! in-memory backend.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use tributary_core::types::{
    DepotName, FeedChange, FeedEntry, FeedSide, PatchOperation, StreamName, Transaction, TxId,
    VersionRecord, VersionRoot,
};
use tributary_feed::{FeedError, MemoryFeed, TransactionFeed};
use tributary_sync::{
    build_full_patch, build_full_patch_in, build_incremental_patch, collect_changes, promote,
    DirectorySink, PromoteMode, PromoteOutcome,
};

fn root() -> VersionRoot {
    VersionRoot::new("acme", "acme".into(), "dev".into())
}

fn record(path: &str, virtual_version: &str, real_version: &str) -> VersionRecord {
    VersionRecord {
        element_path: path.into(),
        is_directory: false,
        virtual_version: virtual_version.into(),
        real_version: real_version.into(),
        ancestor: None,
    }
}

fn tx(id: u64, author: &str, versions: Vec<VersionRecord>) -> Transaction {
    Transaction {
        id: TxId(id),
        timestamp: 1_300_000_000 + id as i64,
        author: author.into(),
        comment: format!("change {id}"),
        kind: "promote".into(),
        versions,
    }
}

fn backend() -> MemoryFeed {
    let feed = MemoryFeed::new();
    feed.add_stream("1", "acme", None);
    feed.add_stream("2", "dev", Some("acme"));
    feed.add_stream("3", "dev_alice", Some("dev"));
    feed
}

fn pending_backend(ids: &[u64]) -> MemoryFeed {
    let feed = backend();
    for &id in ids {
        feed.add_transaction("dev", tx(id, "alice", vec![]));
    }
    feed.set_pending("dev", ids.iter().copied());
    feed
}

fn listing(dir: &Path) -> BTreeSet<(PathBuf, Option<Vec<u8>>)> {
    fn walk(base: &Path, dir: &Path, out: &mut BTreeSet<(PathBuf, Option<Vec<u8>>)>) {
        for entry in fs::read_dir(dir).expect("read_dir") {
            let path = entry.expect("entry").path();
            let rel = path.strip_prefix(base).expect("relative").to_path_buf();
            if path.is_dir() {
                out.insert((rel, None));
                walk(base, &path, out);
            } else {
                out.insert((rel, Some(fs::read(&path).expect("read"))));
            }
        }
    }
    let mut out = BTreeSet::new();
    walk(dir, dir, &mut out);
    out
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

#[test]
fn empty_range_yields_nothing_without_asking_the_backend() {
    let feed = backend();
    feed.add_transaction("dev", tx(5, "alice", vec![record("/./a.txt", "2/1", "3/1")]));

    let batches = collect_changes(&feed, &root(), TxId(5), TxId(5)).expect("collect");
    assert!(batches.is_empty());
    assert_eq!(feed.call_count("history"), 0);
}

#[test]
fn two_transactions_after_the_watermark() {
    let feed = backend();
    feed.add_transaction("dev", tx(99, "alice", vec![record("/./old.txt", "2/1", "3/1")]));
    feed.add_transaction("dev", tx(100, "alice", vec![record("/./a.txt", "2/2", "3/2")]));
    feed.add_transaction("dev", tx(101, "bob", vec![record("/./a.txt", "2/3", "3/3")]));
    feed.set_ancestor("dev/3", "/./a.txt", "2/2");

    let batches = collect_changes(&feed, &root(), TxId(99), TxId(101)).expect("collect");

    let shown: Vec<TxId> = batches.iter().map(|b| b.display_version).collect();
    assert_eq!(shown, vec![TxId(100), TxId(101)]);
    assert!(batches.iter().all(|b| b.consumed_version == TxId(101)));
    assert_eq!(batches[1].author, "bob");
}

#[test]
fn every_collected_record_is_consistent() {
    let feed = backend();
    feed.add_transaction("dev", tx(10, "alice", vec![record("/./a.txt", "2/1", "3/1")]));
    feed.add_transaction("dev", tx(11, "alice", vec![record("/./a.txt", "2/2", "3/2")]));
    let mut gone = tx(12, "alice", vec![record("/./a.txt", "2/3", "3/3")]);
    gone.kind = "defunct".into();
    feed.add_transaction("dev", gone);
    feed.add_transaction("acme", tx(13, "carol", vec![record("/./b.txt", "1/1", "3/4")]));
    feed.set_ancestor("dev/2", "/./a.txt", "2/1");
    feed.set_ancestor("dev/3", "/./a.txt", "2/2");

    let batches = collect_changes(&feed, &root(), TxId(9), TxId(13)).expect("collect");
    assert_eq!(batches.len(), 4);
    for change in batches.iter().flat_map(|b| &b.changes) {
        assert!(change.is_consistent(), "inconsistent record {change:?}");
    }
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

#[test]
fn full_patch_recreates_the_backend_tree() {
    let feed = backend();
    feed.add_file("dev", "/./README.md", "# acme\n");
    feed.add_file("dev", "/./src/lib.rs", "pub fn acme() {}\n");
    feed.add_file("dev", "/./src/bin/main.rs", "fn main() {}\n");
    feed.add_dir("dev", "/./docs");

    let expected = TempDir::new().expect("expected");
    feed.materialize(
        &DepotName::from("acme"),
        &StreamName::from("dev"),
        TxId(9),
        expected.path(),
    )
    .expect("materialize");

    let target = TempDir::new().expect("target");
    let mut sink = DirectorySink::new(target.path(), false);
    build_full_patch(&feed, &root(), TxId(9), &mut sink).expect("patch");

    assert_eq!(listing(target.path()), listing(expected.path()));
}

fn scratch_entries(parent: &Path) -> Vec<String> {
    fs::read_dir(parent)
        .expect("read scratch parent")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("tributary-full-"))
        .collect()
}

#[test]
fn full_patch_scratch_is_removed_after_success() {
    let feed = backend();
    feed.add_file("dev", "/./src/lib.rs", "pub fn acme() {}\n");
    let parent = TempDir::new().expect("scratch parent");

    let mut ops = Vec::new();
    let emitted = build_full_patch_in(&feed, &root(), TxId(9), parent.path(), &mut ops)
        .expect("patch");

    assert_eq!(emitted, 2);
    assert!(scratch_entries(parent.path()).is_empty());
}

#[test]
fn full_patch_scratch_is_removed_when_materialize_fails() {
    let feed = backend();
    feed.add_file("dev", "/./src/lib.rs", "pub fn acme() {}\n");
    feed.fail_next(
        "materialize",
        FeedError::BackendUnavailable {
            command: "accurev pop".into(),
            detail: "exit code 1".into(),
        },
    );
    let parent = TempDir::new().expect("scratch parent");

    let mut ops = Vec::new();
    let result = build_full_patch_in(&feed, &root(), TxId(9), parent.path(), &mut ops);

    assert!(result.is_err());
    assert!(ops.is_empty());
    assert!(scratch_entries(parent.path()).is_empty());
}

#[test]
fn moved_file_becomes_a_rename() {
    let feed = backend();
    feed.add_feed_entry(
        "dev",
        FeedEntry {
            change: FeedChange::Moved,
            old: Some(FeedSide {
                name: "/a.txt".into(),
                version: "2/4".into(),
                is_directory: Some(false),
            }),
            new: Some(FeedSide {
                name: "/b.txt".into(),
                version: "2/5".into(),
                is_directory: Some(false),
            }),
        },
    );

    let mut ops = Vec::new();
    build_incremental_patch(&feed, &root(), TxId(4), TxId(5), &mut ops).expect("patch");
    assert_eq!(
        ops,
        vec![PatchOperation::RenameFile {
            from: "a.txt".into(),
            to: "b.txt".into(),
        }]
    );

    let checkout = TempDir::new().expect("checkout");
    fs::write(checkout.path().join("a.txt"), "payload").expect("seed");
    let mut sink = DirectorySink::new(checkout.path(), false);
    build_incremental_patch(&feed, &root(), TxId(4), TxId(5), &mut sink).expect("apply");
    assert_eq!(
        fs::read_to_string(checkout.path().join("b.txt")).expect("moved"),
        "payload"
    );
    assert!(!checkout.path().join("a.txt").exists());
}

// ---------------------------------------------------------------------------
// Promotion
// ---------------------------------------------------------------------------

#[test]
fn promotion_is_idempotent() {
    let feed = pending_backend(&[100, 101]);
    let scratch = TempDir::new().expect("scratch");

    let first = promote(&feed, &root(), TxId(101), PromoteMode::Batch, scratch.path()).expect("first");
    let second =
        promote(&feed, &root(), TxId(101), PromoteMode::Batch, scratch.path()).expect("second");

    assert!(first.promoted());
    assert!(!second.promoted());
    assert_eq!(feed.promotions().len(), 1);
}

#[test]
fn separate_mode_promotes_newest_first() {
    let feed = pending_backend(&[100, 101, 102]);
    let scratch = TempDir::new().expect("scratch");

    promote(&feed, &root(), TxId(102), PromoteMode::Separate, scratch.path()).expect("promote");

    let order: Vec<TxId> = feed
        .promotions()
        .iter()
        .inspect(|call| assert!(!call.batch))
        .flat_map(|call| call.ids.clone())
        .collect();
    assert_eq!(order, vec![TxId(102), TxId(101), TxId(100)]);
    assert_eq!(feed.promotions()[0].comments, "alice: change 102\n");
    assert!(feed.pending("dev").is_empty());
}

#[test]
fn only_transactions_up_to_the_bound_are_promoted() {
    let feed = pending_backend(&[100, 101, 105]);
    let scratch = TempDir::new().expect("scratch");

    let outcome =
        promote(&feed, &root(), TxId(102), PromoteMode::Batch, scratch.path()).expect("promote");
    let PromoteOutcome::Promoted { promotion, .. } = outcome else {
        panic!("expected a promotion");
    };
    let ids: Vec<TxId> = promotion.transactions.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![TxId(100), TxId(101)]);
    assert_eq!(feed.promotions()[0].ids, vec![TxId(100), TxId(101)]);
    assert_eq!(feed.pending("dev"), vec![TxId(105)]);
}

#[test]
fn bound_below_the_lowest_pending_is_not_an_error() {
    let feed = pending_backend(&[100, 101, 105]);
    let scratch = TempDir::new().expect("scratch");

    let outcome =
        promote(&feed, &root(), TxId(99), PromoteMode::Batch, scratch.path()).expect("promote");
    assert_eq!(outcome, PromoteOutcome::NothingToPromote);
    assert!(feed.promotions().is_empty());
    assert_eq!(feed.call_count("history"), 0);
}
