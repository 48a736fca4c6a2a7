//! The two backend boundaries the core consumes.
//!
//! [`TransactionFeed`] answers history, ancestry, content and promotion
//! requests. [`Provisioner`] prepares streams and workspaces for an agent
//! checkout. Every call is one blocking round trip; nothing is cached.

use std::fmt;
use std::path::Path;

use tributary_core::types::{
    DepotName, ElementStatus, FeedEntry, StreamName, Transaction, TransactionRef, TxId,
};

use crate::error::FeedError;
use crate::stream_table::StreamTable;

/// Transactions for one stream and range, plus the id → name table needed to
/// read their version identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    pub transactions: Vec<Transaction>,
    pub streams: StreamTable,
}

/// What a promote command reported back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoteOutput {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl PromoteOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

impl fmt::Display for PromoteOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "command     : {}", self.command)?;
        writeln!(f, "return code : {}", self.exit_code)?;
        writeln!(f, "stdout      : {}", self.stdout.trim_end())?;
        write!(f, "stderr      : {}", self.stderr.trim_end())
    }
}

pub trait TransactionFeed {
    /// Transactions recorded on `stream` with ids in `from..=to`.
    fn history(
        &self,
        depot: &DepotName,
        stream: &StreamName,
        from: TxId,
        to: TxId,
    ) -> Result<History, FeedError>;

    /// Direct ancestor of a named version (`streamName/versionNum`) of an
    /// element, as the backend reports it. `"0/0"` is passed through.
    fn direct_ancestor(&self, version: &str, element_path: &str)
        -> Result<Option<String>, FeedError>;

    /// Basis of `stream`, or `None` for a root stream or an unknown stream.
    fn parent_stream(
        &self,
        depot: &DepotName,
        stream: &StreamName,
    ) -> Result<Option<StreamName>, FeedError>;

    /// Element-level changes that bring `stream` from `from` to `to`.
    fn change_feed(
        &self,
        stream: &StreamName,
        from: TxId,
        to: TxId,
    ) -> Result<Vec<FeedEntry>, FeedError>;

    fn element_content(
        &self,
        depot: &DepotName,
        version: &str,
        element_path: &str,
    ) -> Result<Vec<u8>, FeedError>;

    fn element_status(
        &self,
        stream: &StreamName,
        element_path: &str,
    ) -> Result<Option<ElementStatus>, FeedError>;

    /// Transactions on `stream` not yet promoted to its basis, ascending.
    fn pending_transactions(&self, stream: &StreamName) -> Result<Vec<TransactionRef>, FeedError>;

    /// Promote every id listed in `id_list_file` in one backend call.
    fn promote_batch(
        &self,
        stream: &StreamName,
        comment_file: &Path,
        id_list_file: &Path,
    ) -> Result<PromoteOutput, FeedError>;

    fn promote_one(
        &self,
        stream: &StreamName,
        comment_file: &Path,
        id: TxId,
    ) -> Result<PromoteOutput, FeedError>;

    /// Write the tree of `stream` as of `at` into `dest`.
    fn materialize(
        &self,
        depot: &DepotName,
        stream: &StreamName,
        at: TxId,
        dest: &Path,
    ) -> Result<(), FeedError>;

    /// Highest transaction id in the depot.
    fn last_transaction(&self, depot: &DepotName) -> Result<TxId, FeedError>;

    fn create_snapshot(&self, name: &str, basis: &StreamName, at: TxId)
        -> Result<(), FeedError>;
}

/// Whether a provisioning call found something to reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    Changed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceKind {
    Workspace,
    ReferenceTree,
}

impl fmt::Display for WorkspaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkspaceKind::Workspace => f.write_str("workspace"),
            WorkspaceKind::ReferenceTree => f.write_str("reference tree"),
        }
    }
}

pub trait Provisioner {
    /// Create `name` on `basis` time-locked at `at`, or re-lock it if it exists.
    fn ensure_stream(
        &self,
        depot: &DepotName,
        name: &StreamName,
        basis: &StreamName,
        at: TxId,
    ) -> Result<Provisioned, FeedError>;

    /// Create or re-point a workspace/reference tree at `path`.
    fn ensure_workspace(
        &self,
        depot: &DepotName,
        kind: WorkspaceKind,
        name: &str,
        basis: &StreamName,
        path: &Path,
    ) -> Result<Provisioned, FeedError>;

    /// Bring the files under `path` up to date with the workspace's stream.
    fn sync_workspace(&self, path: &Path, clean: bool) -> Result<(), FeedError>;
}
