//! A scripted, in-process backend.
//!
//! [`MemoryFeed`] holds streams, history, change feeds, element contents and
//! pending lists in memory and answers both [`TransactionFeed`] and
//! [`Provisioner`] calls from them. Promotion removes the promoted ids from
//! the pending list, so repeated calls behave like the real backend.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use tributary_core::types::{
    normalize_element_path, DepotName, ElementStatus, FeedEntry, StreamName, Transaction,
    TransactionRef, TxId,
};

use crate::client::{History, PromoteOutput, Provisioned, Provisioner, TransactionFeed, WorkspaceKind};
use crate::error::{io_err, FeedError};
use crate::stream_table::StreamTable;

/// One promote call as the backend received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoteCall {
    pub stream: StreamName,
    pub ids: Vec<TxId>,
    /// Contents of the comment file at the time of the call.
    pub comments: String,
    pub batch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub name: String,
    pub basis: StreamName,
    pub at: TxId,
}

#[derive(Debug, Default)]
pub struct MemoryFeed {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    stream_ids: StreamTable,
    parents: BTreeMap<StreamName, Option<StreamName>>,
    history: BTreeMap<StreamName, Vec<Transaction>>,
    ancestors: HashMap<(String, String), String>,
    feed: BTreeMap<StreamName, Vec<FeedEntry>>,
    contents: HashMap<(String, String), Vec<u8>>,
    statuses: HashMap<(StreamName, String), bool>,
    pending: BTreeMap<StreamName, BTreeSet<TxId>>,
    /// Path → file content, or `None` for a directory.
    trees: BTreeMap<StreamName, BTreeMap<String, Option<Vec<u8>>>>,
    last_tx: TxId,
    snapshots: Vec<Snapshot>,
    promotions: Vec<PromoteCall>,
    failing_promotes: BTreeSet<TxId>,
    failures: HashMap<&'static str, FeedError>,
    trees_provisioned: BTreeSet<(&'static str, String)>,
    provisioning: Vec<String>,
    calls: HashMap<&'static str, usize>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and hand back an injected failure, if any.
    fn enter(&self, operation: &'static str) -> Result<MutexGuard<'_, State>, FeedError> {
        let mut state = self.state();
        *state.calls.entry(operation).or_default() += 1;
        match state.failures.remove(operation) {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }

    // -----------------------------------------------------------------------
    // Scripting
    // -----------------------------------------------------------------------

    /// Register a stream with its numeric id and optional basis.
    pub fn add_stream(&self, id: &str, name: &str, basis: Option<&str>) {
        let mut state = self.state();
        state.stream_ids.insert(id, name);
        state
            .parents
            .insert(StreamName::from(name), basis.map(StreamName::from));
    }

    /// Record `tx` on `stream`; the depot's last transaction follows along.
    pub fn add_transaction(&self, stream: &str, tx: Transaction) {
        let mut state = self.state();
        state.last_tx = state.last_tx.max(tx.id);
        state
            .history
            .entry(StreamName::from(stream))
            .or_default()
            .push(tx);
    }

    pub fn set_last_transaction(&self, id: u64) {
        self.state().last_tx = TxId(id);
    }

    pub fn set_ancestor(&self, named_version: &str, element_path: &str, ancestor: &str) {
        self.state().ancestors.insert(
            (named_version.to_string(), normalize_element_path(element_path)),
            ancestor.to_string(),
        );
    }

    pub fn add_feed_entry(&self, stream: &str, entry: FeedEntry) {
        self.state()
            .feed
            .entry(StreamName::from(stream))
            .or_default()
            .push(entry);
    }

    pub fn set_content(&self, version: &str, element_path: &str, content: impl Into<Vec<u8>>) {
        self.state().contents.insert(
            (version.to_string(), normalize_element_path(element_path)),
            content.into(),
        );
    }

    pub fn set_status(&self, stream: &str, element_path: &str, is_directory: bool) {
        self.state().statuses.insert(
            (StreamName::from(stream), normalize_element_path(element_path)),
            is_directory,
        );
    }

    pub fn set_pending(&self, stream: &str, ids: impl IntoIterator<Item = u64>) {
        self.state()
            .pending
            .insert(StreamName::from(stream), ids.into_iter().map(TxId).collect());
    }

    /// Add a file to the tree `materialize` writes for `stream`.
    pub fn add_file(&self, stream: &str, path: &str, content: impl Into<Vec<u8>>) {
        self.state()
            .trees
            .entry(StreamName::from(stream))
            .or_default()
            .insert(normalize_element_path(path), Some(content.into()));
    }

    pub fn add_dir(&self, stream: &str, path: &str) {
        self.state()
            .trees
            .entry(StreamName::from(stream))
            .or_default()
            .insert(normalize_element_path(path), None);
    }

    /// Make every promote that includes `id` exit non-zero.
    pub fn fail_promote(&self, id: u64) {
        self.state().failing_promotes.insert(TxId(id));
    }

    /// Fail the next call to `operation` (a trait method name) with `error`.
    pub fn fail_next(&self, operation: &'static str, error: FeedError) {
        self.state().failures.insert(operation, error);
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn promotions(&self) -> Vec<PromoteCall> {
        self.state().promotions.clone()
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.state().snapshots.clone()
    }

    /// Provisioning commands in the order they ran, e.g. `mkstream h_w_timelock acme 42`.
    pub fn provisioning_log(&self) -> Vec<String> {
        self.state().provisioning.clone()
    }

    pub fn pending(&self, stream: &str) -> Vec<TxId> {
        self.state()
            .pending
            .get(&StreamName::from(stream))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.state().calls.get(operation).copied().unwrap_or(0)
    }
}

fn read_file(path: &Path) -> Result<String, FeedError> {
    std::fs::read_to_string(path).map_err(|e| io_err(path, e))
}

/// Ids from a `<transactions><id>N</id>...</transactions>` list.
fn read_id_list(path: &Path) -> Result<Vec<TxId>, FeedError> {
    let raw = read_file(path)?;
    let doc = roxmltree::Document::parse(&raw)
        .map_err(|e| FeedError::malformed(format!("id list: {e}"), raw.as_str()))?;
    let ids = doc
        .descendants()
        .filter(|n| n.has_tag_name("id"))
        .map(|n| {
            n.text()
                .and_then(|t| t.parse::<TxId>().ok())
                .ok_or_else(|| FeedError::malformed("id list entry is not a number", raw.as_str()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn promote_output(command: String, failed: Option<TxId>) -> PromoteOutput {
    match failed {
        Some(id) => PromoteOutput {
            command,
            exit_code: 1,
            stdout: String::new(),
            stderr: format!("Promote of transaction {id} failed: merge required"),
        },
        None => PromoteOutput {
            command,
            exit_code: 0,
            stdout: "Promoted.".to_string(),
            stderr: String::new(),
        },
    }
}

// ---------------------------------------------------------------------------
// TransactionFeed
// ---------------------------------------------------------------------------

impl TransactionFeed for MemoryFeed {
    fn history(
        &self,
        _depot: &DepotName,
        stream: &StreamName,
        from: TxId,
        to: TxId,
    ) -> Result<History, FeedError> {
        let state = self.enter("history")?;
        let mut transactions: Vec<Transaction> = state
            .history
            .get(stream)
            .map(|txs| {
                txs.iter()
                    .filter(|tx| tx.id >= from && tx.id <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // The backend lists newest first.
        transactions.sort_by(|a, b| b.id.cmp(&a.id));
        debug!(%stream, count = transactions.len(), "memory history");
        Ok(History {
            transactions,
            streams: state.stream_ids.clone(),
        })
    }

    fn direct_ancestor(
        &self,
        version: &str,
        element_path: &str,
    ) -> Result<Option<String>, FeedError> {
        let state = self.enter("direct_ancestor")?;
        Ok(state
            .ancestors
            .get(&(version.to_string(), normalize_element_path(element_path)))
            .cloned())
    }

    fn parent_stream(
        &self,
        _depot: &DepotName,
        stream: &StreamName,
    ) -> Result<Option<StreamName>, FeedError> {
        let state = self.enter("parent_stream")?;
        Ok(state.parents.get(stream).cloned().flatten())
    }

    fn change_feed(
        &self,
        stream: &StreamName,
        _from: TxId,
        _to: TxId,
    ) -> Result<Vec<FeedEntry>, FeedError> {
        let state = self.enter("change_feed")?;
        Ok(state.feed.get(stream).cloned().unwrap_or_default())
    }

    fn element_content(
        &self,
        _depot: &DepotName,
        version: &str,
        element_path: &str,
    ) -> Result<Vec<u8>, FeedError> {
        let state = self.enter("element_content")?;
        state
            .contents
            .get(&(version.to_string(), normalize_element_path(element_path)))
            .cloned()
            .ok_or_else(|| FeedError::BackendUnavailable {
                command: format!("cat -v {version} {element_path}"),
                detail: "element not found at that version".to_string(),
            })
    }

    fn element_status(
        &self,
        stream: &StreamName,
        element_path: &str,
    ) -> Result<Option<ElementStatus>, FeedError> {
        let state = self.enter("element_status")?;
        let path = normalize_element_path(element_path);
        Ok(state
            .statuses
            .get(&(stream.clone(), path.clone()))
            .map(|&is_directory| ElementStatus { path, is_directory }))
    }

    fn pending_transactions(&self, stream: &StreamName) -> Result<Vec<TransactionRef>, FeedError> {
        let state = self.enter("pending_transactions")?;
        Ok(state
            .pending
            .get(stream)
            .map(|ids| ids.iter().map(|&id| TransactionRef { id }).collect())
            .unwrap_or_default())
    }

    fn promote_batch(
        &self,
        stream: &StreamName,
        comment_file: &Path,
        id_list_file: &Path,
    ) -> Result<PromoteOutput, FeedError> {
        let mut state = self.enter("promote_batch")?;
        let ids = read_id_list(id_list_file)?;
        let comments = read_file(comment_file)?;
        let failed = ids
            .iter()
            .copied()
            .find(|id| state.failing_promotes.contains(id));

        if failed.is_none() {
            if let Some(pending) = state.pending.get_mut(stream) {
                for id in &ids {
                    pending.remove(id);
                }
            }
        }
        state.promotions.push(PromoteCall {
            stream: stream.clone(),
            ids,
            comments,
            batch: true,
        });
        Ok(promote_output(
            format!("promote -Fx -Z -s {stream} -l {}", id_list_file.display()),
            failed,
        ))
    }

    fn promote_one(
        &self,
        stream: &StreamName,
        comment_file: &Path,
        id: TxId,
    ) -> Result<PromoteOutput, FeedError> {
        let mut state = self.enter("promote_one")?;
        let comments = read_file(comment_file)?;
        let failed = state.failing_promotes.contains(&id).then_some(id);

        if failed.is_none() {
            if let Some(pending) = state.pending.get_mut(stream) {
                pending.remove(&id);
            }
        }
        state.promotions.push(PromoteCall {
            stream: stream.clone(),
            ids: vec![id],
            comments,
            batch: false,
        });
        Ok(promote_output(format!("promote -s {stream} -t {id}"), failed))
    }

    fn materialize(
        &self,
        _depot: &DepotName,
        stream: &StreamName,
        at: TxId,
        dest: &Path,
    ) -> Result<(), FeedError> {
        let state = self.enter("materialize")?;
        debug!(%stream, %at, dest = %dest.display(), "memory populate");
        let Some(tree) = state.trees.get(stream) else {
            return Ok(());
        };
        for (path, content) in tree {
            let target: PathBuf = dest.join(path);
            match content {
                None => std::fs::create_dir_all(&target).map_err(|e| io_err(&target, e))?,
                Some(bytes) => {
                    if let Some(parent) = target.parent() {
                        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
                    }
                    std::fs::write(&target, bytes).map_err(|e| io_err(&target, e))?;
                }
            }
        }
        Ok(())
    }

    fn last_transaction(&self, _depot: &DepotName) -> Result<TxId, FeedError> {
        Ok(self.enter("last_transaction")?.last_tx)
    }

    fn create_snapshot(&self, name: &str, basis: &StreamName, at: TxId) -> Result<(), FeedError> {
        let mut state = self.enter("create_snapshot")?;
        state.snapshots.push(Snapshot {
            name: name.to_string(),
            basis: basis.clone(),
            at,
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Provisioner
// ---------------------------------------------------------------------------

impl Provisioner for MemoryFeed {
    fn ensure_stream(
        &self,
        _depot: &DepotName,
        name: &StreamName,
        basis: &StreamName,
        at: TxId,
    ) -> Result<Provisioned, FeedError> {
        let mut state = self.enter("ensure_stream")?;
        let outcome = if state.parents.contains_key(name) {
            Provisioned::Changed
        } else {
            Provisioned::Created
        };
        let verb = match outcome {
            Provisioned::Created => "mkstream",
            Provisioned::Changed => "chstream",
        };
        state.parents.insert(name.clone(), Some(basis.clone()));
        state.provisioning.push(format!("{verb} {name} {basis} {at}"));
        Ok(outcome)
    }

    fn ensure_workspace(
        &self,
        _depot: &DepotName,
        kind: WorkspaceKind,
        name: &str,
        basis: &StreamName,
        path: &Path,
    ) -> Result<Provisioned, FeedError> {
        let mut state = self.enter("ensure_workspace")?;
        let prefix = match kind {
            WorkspaceKind::Workspace => "ws",
            WorkspaceKind::ReferenceTree => "ref",
        };
        let key = (prefix, name.to_ascii_lowercase());
        let outcome = if state.trees_provisioned.insert(key) {
            Provisioned::Created
        } else {
            Provisioned::Changed
        };
        let verb = match outcome {
            Provisioned::Created => "mk",
            Provisioned::Changed => "ch",
        };
        state
            .provisioning
            .push(format!("{verb}{prefix} {name} {basis} {}", path.display()));
        Ok(outcome)
    }

    fn sync_workspace(&self, path: &Path, clean: bool) -> Result<(), FeedError> {
        let mut state = self.enter("sync_workspace")?;
        let mode = if clean { "clean" } else { "incremental" };
        state
            .provisioning
            .push(format!("sync {} {mode}", path.display()));
        Ok(())
    }
}
