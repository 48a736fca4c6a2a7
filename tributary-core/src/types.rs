//! Domain types shared by the feed client, the change walker, the patch
//! synthesizer and the promotion batcher.
//!
//! Backend projections ([`Transaction`], [`VersionRecord`], [`FeedEntry`])
//! are fetched per call and never cached. Results ([`ModificationBatch`],
//! [`PatchOperation`], [`PendingPromotion`]) are built fresh per invocation.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A globally numbered backend transaction. Ordering is numeric, so `10 > 9`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct TxId(pub u64);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for TxId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl FromStr for TxId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

/// A depot: the isolated namespace streams live in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DepotName(pub String);

impl fmt::Display for DepotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DepotName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DepotName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A named stream inside a depot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamName(pub String);

impl StreamName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for StreamName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StreamName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Roots
// ---------------------------------------------------------------------------

/// A depot plus the watched stream within it, with the per-root switches the
/// walker and synthesizer honour. Immutable for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRoot {
    pub name: String,
    pub depot: DepotName,
    pub stream: StreamName,
    /// Stream to materialize for full patches; falls back to `stream`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub populate_stream: Option<StreamName>,
    /// Directory inside the scratch tree that the backend populates into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_directory: Option<PathBuf>,
    /// Collapse collected changes into one opaque batch.
    #[serde(default)]
    pub hide_changes: bool,
}

impl VersionRoot {
    pub fn new(name: impl Into<String>, depot: DepotName, stream: StreamName) -> Self {
        Self {
            name: name.into(),
            depot,
            stream,
            populate_stream: None,
            sub_directory: None,
            hide_changes: false,
        }
    }

    /// The stream a full checkout is materialized from.
    pub fn working_stream(&self) -> &StreamName {
        self.populate_stream.as_ref().unwrap_or(&self.stream)
    }

    /// Human-readable description, e.g. `AccuRev:depot/stream`.
    pub fn describe(&self) -> String {
        format!("AccuRev:{}/{}", self.depot, self.stream)
    }
}

// ---------------------------------------------------------------------------
// History projections
// ---------------------------------------------------------------------------

/// One file or directory version touched by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Raw element path as reported by the backend, e.g. `/./src/main.c`.
    pub element_path: String,
    pub is_directory: bool,
    /// Stream-relative `streamId/versionNum`.
    pub virtual_version: String,
    /// Backing physical `streamId/versionNum`.
    pub real_version: String,
    /// Direct ancestor when the backend supplies it inline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ancestor: Option<String>,
}

impl VersionRecord {
    /// Path used for "same file" comparisons and change reporting.
    pub fn normalized_path(&self) -> String {
        normalize_element_path(&self.element_path)
    }
}

/// A single atomic backend mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub timestamp: i64,
    pub author: String,
    pub comment: String,
    /// Backend transaction type (`promote`, `defunct`, ...).
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub versions: Vec<VersionRecord>,
}

impl Transaction {
    pub fn date(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.timestamp, 0).unwrap_or_default()
    }

    pub fn is_defunct(&self) -> bool {
        self.kind.eq_ignore_ascii_case("defunct")
    }
}

/// A transaction id as listed by the backend's not-yet-promoted query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionRef {
    pub id: TxId,
}

/// Status of a single element in a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementStatus {
    pub path: String,
    pub is_directory: bool,
}

// ---------------------------------------------------------------------------
// Change feed
// ---------------------------------------------------------------------------

/// The fixed set of change-feed tags, plus whatever else the backend sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedChange {
    Version,
    NowVisible,
    NoLongerVisible,
    Moved,
    Unrecognized(String),
}

impl FeedChange {
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim() {
            "version" => Self::Version,
            "now visible" => Self::NowVisible,
            "no longer visible" => Self::NoLongerVisible,
            "moved" => Self::Moved,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Version => "version",
            Self::NowVisible => "now visible",
            Self::NoLongerVisible => "no longer visible",
            Self::Moved => "moved",
            Self::Unrecognized(tag) => tag,
        }
    }
}

/// One side (old or new state) of a change-feed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSide {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_directory: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub change: FeedChange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<FeedSide>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<FeedSide>,
}

// ---------------------------------------------------------------------------
// Collected changes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
    Renamed,
    DirAdded,
    DirChanged,
    DirRemoved,
}

impl ChangeKind {
    pub fn is_directory(self) -> bool {
        matches!(self, Self::DirAdded | Self::DirChanged | Self::DirRemoved)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeKind::Added => "added",
            ChangeKind::Changed => "changed",
            ChangeKind::Removed => "removed",
            ChangeKind::Renamed => "renamed",
            ChangeKind::DirAdded => "dir added",
            ChangeKind::DirChanged => "dir changed",
            ChangeKind::DirRemoved => "dir removed",
        };
        f.write_str(label)
    }
}

/// A logical change to one path.
///
/// Build through [`ChangeRecord::classify`] or [`ChangeRecord::removed`] so
/// that `Added` never has a before version, `Removed` never has an after
/// version, and `Changed` always has two distinct versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub path: String,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

impl ChangeRecord {
    /// Classify an element that exists after the change.
    ///
    /// Returns `None` when before and after name the same version.
    pub fn classify(
        path: impl Into<String>,
        is_directory: bool,
        before: Option<String>,
        after: String,
    ) -> Option<Self> {
        let kind = match (&before, is_directory) {
            (None, false) => ChangeKind::Added,
            (None, true) => ChangeKind::DirAdded,
            (Some(b), _) if *b == after => return None,
            (Some(_), false) => ChangeKind::Changed,
            (Some(_), true) => ChangeKind::DirChanged,
        };
        Some(Self {
            path: path.into(),
            kind,
            before,
            after: Some(after),
        })
    }

    /// An element that no longer exists after the change.
    pub fn removed(path: impl Into<String>, is_directory: bool, before: Option<String>) -> Self {
        Self {
            path: path.into(),
            kind: if is_directory {
                ChangeKind::DirRemoved
            } else {
                ChangeKind::Removed
            },
            before,
            after: None,
        }
    }

    /// Whether the version fields agree with `kind`.
    pub fn is_consistent(&self) -> bool {
        match self.kind {
            ChangeKind::Removed | ChangeKind::DirRemoved => self.after.is_none(),
            ChangeKind::Added | ChangeKind::DirAdded => self.before.is_none(),
            ChangeKind::Changed => match (&self.before, &self.after) {
                (Some(b), Some(a)) => b != a,
                _ => false,
            },
            ChangeKind::DirChanged | ChangeKind::Renamed => true,
        }
    }
}

/// All changes attributed to one backend transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationBatch {
    pub date: DateTime<Utc>,
    pub author: String,
    pub comment: String,
    pub changes: Vec<ChangeRecord>,
    /// High-watermark the caller records after consuming this batch.
    pub consumed_version: TxId,
    /// Originating transaction, for display.
    pub display_version: TxId,
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

/// One step of a patch. Paths are relative to the checkout root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOperation {
    CreateFile { path: PathBuf, content: Vec<u8> },
    ChangeFile { path: PathBuf, content: Vec<u8> },
    DeleteFile { path: PathBuf },
    CreateDir { path: PathBuf },
    DeleteDir { path: PathBuf },
    RenameFile { from: PathBuf, to: PathBuf },
    RenameDir { from: PathBuf, to: PathBuf },
}

impl PatchOperation {
    /// The path the operation leaves behind (the destination for renames).
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::CreateFile { path, .. }
            | Self::ChangeFile { path, .. }
            | Self::DeleteFile { path }
            | Self::CreateDir { path }
            | Self::DeleteDir { path } => path,
            Self::RenameFile { to, .. } | Self::RenameDir { to, .. } => to,
        }
    }

    /// Content length for file-writing operations.
    pub fn content_len(&self) -> Option<u64> {
        match self {
            Self::CreateFile { content, .. } | Self::ChangeFile { content, .. } => {
                Some(content.len() as u64)
            }
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::CreateFile { .. } => "create file",
            Self::ChangeFile { .. } => "change file",
            Self::DeleteFile { .. } => "delete file",
            Self::CreateDir { .. } => "create dir",
            Self::DeleteDir { .. } => "delete dir",
            Self::RenameFile { .. } => "rename file",
            Self::RenameDir { .. } => "rename dir",
        }
    }
}

// ---------------------------------------------------------------------------
// Promotion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub id: TxId,
    pub author: String,
    pub comment: String,
}

/// Work a promotion call is about to submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPromotion {
    pub stream: StreamName,
    pub lowest_outstanding: TxId,
    pub highest_requested: TxId,
    /// Ascending by id.
    pub transactions: Vec<PendingTransaction>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Strip the backend's depot-relative marker (`/./` or `\.\`) and normalize
/// separators to `/`.
pub fn normalize_element_path(raw: &str) -> String {
    let unified = raw.replace('\\', "/");
    let trimmed = unified
        .strip_prefix("/./")
        .or_else(|| unified.strip_prefix("./"))
        .or_else(|| unified.strip_prefix('/'))
        .unwrap_or(&unified);
    trimmed.trim_end_matches('/').to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_id_orders_numerically() {
        let nine: TxId = "9".parse().unwrap();
        let ten: TxId = "10".parse().unwrap();
        assert!(ten > nine);
        assert_eq!(ten.to_string(), "10");
    }

    #[test]
    fn tx_id_rejects_garbage() {
        assert!("highest".parse::<TxId>().is_err());
    }

    #[test]
    fn normalize_strips_depot_marker() {
        assert_eq!(normalize_element_path("/./src/a.txt"), "src/a.txt");
        assert_eq!(normalize_element_path("\\.\\src\\a.txt"), "src/a.txt");
        assert_eq!(normalize_element_path("/a.txt"), "a.txt");
        assert_eq!(normalize_element_path("/./docs/"), "docs");
    }

    #[test]
    fn classify_without_before_is_added() {
        let rec = ChangeRecord::classify("a.txt", false, None, "2/1".into()).unwrap();
        assert_eq!(rec.kind, ChangeKind::Added);
        assert!(rec.is_consistent());

        let dir = ChangeRecord::classify("src", true, None, "2/1".into()).unwrap();
        assert_eq!(dir.kind, ChangeKind::DirAdded);
    }

    #[test]
    fn classify_same_versions_is_not_a_change() {
        assert!(ChangeRecord::classify("a.txt", false, Some("2/1".into()), "2/1".into()).is_none());
    }

    #[test]
    fn classify_distinct_versions_is_changed() {
        let rec =
            ChangeRecord::classify("a.txt", false, Some("2/1".into()), "2/2".into()).unwrap();
        assert_eq!(rec.kind, ChangeKind::Changed);
        assert!(rec.is_consistent());
    }

    #[test]
    fn removed_has_no_after() {
        let rec = ChangeRecord::removed("a.txt", false, Some("2/1".into()));
        assert_eq!(rec.kind, ChangeKind::Removed);
        assert!(rec.after.is_none());
        assert!(rec.is_consistent());
    }

    #[test]
    fn feed_change_tags_roundtrip() {
        for tag in ["version", "now visible", "no longer visible", "moved"] {
            assert_eq!(FeedChange::from_tag(tag).tag(), tag);
        }
        assert_eq!(
            FeedChange::from_tag("eid"),
            FeedChange::Unrecognized("eid".into())
        );
    }

    #[test]
    fn working_stream_falls_back_to_watch_stream() {
        let mut root = VersionRoot::new("main", "depot".into(), "dev".into());
        assert_eq!(root.working_stream().as_str(), "dev");
        root.populate_stream = Some("dev_pop".into());
        assert_eq!(root.working_stream().as_str(), "dev_pop");
        assert_eq!(root.describe(), "AccuRev:depot/dev");
    }

    #[test]
    fn patch_operation_reports_length() {
        let op = PatchOperation::CreateFile {
            path: "a.txt".into(),
            content: b"hello".to_vec(),
        };
        assert_eq!(op.content_len(), Some(5));
        assert_eq!(op.label(), "create file");
    }
}
