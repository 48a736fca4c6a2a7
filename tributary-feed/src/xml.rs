//! Parsers for the backend's `-fx` XML responses.
//!
//! Every parser escapes bare `&` first (see [`crate::sanitize`]) and reports
//! anything it cannot read as [`FeedError::MalformedResponse`] carrying the
//! raw response text.

use roxmltree::{Document, Node};
use tracing::debug;

use tributary_core::types::{
    ElementStatus, FeedChange, FeedEntry, FeedSide, StreamName, Transaction, TransactionRef,
    TxId, VersionRecord,
};

use crate::client::History;
use crate::error::FeedError;
use crate::sanitize::escape_bare_ampersands;
use crate::stream_table::StreamTable;

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// `hist -fvx`: transactions with their versions, and the stream table.
pub fn parse_history(raw: &str) -> Result<History, FeedError> {
    with_document(raw, "hist", |doc| {
        let mut history = History::default();
        for node in elements(doc.root_element(), "stream") {
            if let (Some(id), Some(name)) = (node.attribute("id"), node.attribute("name")) {
                history.streams.insert(id, name);
            }
        }
        for node in elements(doc.root_element(), "transaction") {
            history.transactions.push(transaction(node, raw)?);
        }
        debug!(
            transactions = history.transactions.len(),
            streams = history.streams.len(),
            "parsed history"
        );
        Ok(history)
    })
}

/// `anc -fx`: the direct ancestor as `streamId/versionNum`, if any.
pub fn parse_ancestor(raw: &str) -> Result<Option<String>, FeedError> {
    with_document(raw, "anc", |doc| {
        let Some(element) = elements(doc.root_element(), "element").next() else {
            return Ok(None);
        };
        match (element.attribute("stream"), element.attribute("version")) {
            (Some(stream), Some(version)) => Ok(Some(format!("{}/{}", stream.trim(), version.trim()))),
            _ => Err(FeedError::malformed("anc element without stream/version", raw)),
        }
    })
}

/// `show -fx -s <stream> streams`: the basis attribute of the single stream.
///
/// `None` when the stream does not exist or has no basis.
pub fn parse_parent_stream(raw: &str) -> Result<Option<StreamName>, FeedError> {
    with_document(raw, "show streams", |doc| {
        let root = doc.root_element();
        if !root.has_tag_name("streams") {
            return Err(FeedError::malformed("show streams returned a non-streams root", raw));
        }
        let streams: Vec<_> = elements(root, "stream").collect();
        match streams.as_slice() {
            [] => Ok(None),
            [stream] => Ok(stream
                .attribute("basis")
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(StreamName::from)),
            _ => Err(FeedError::malformed("show streams returned more than one stream", raw)),
        }
    })
}

/// `update -fx -i`: one [`FeedEntry`] per `Change` element.
pub fn parse_change_feed(raw: &str) -> Result<Vec<FeedEntry>, FeedError> {
    with_document(raw, "update -i", |doc| {
        elements(doc.root_element(), "Change")
            .map(|change| {
                let what = change
                    .attribute("What")
                    .ok_or_else(|| FeedError::malformed("Change without a What attribute", raw))?;
                Ok(FeedEntry {
                    change: FeedChange::from_tag(what),
                    old: feed_side(change, "Stream1"),
                    new: feed_side(change, "Stream2"),
                })
            })
            .collect()
    })
}

/// `stat -fx`: the first element's location and directory flag.
pub fn parse_element_status(raw: &str) -> Result<Option<ElementStatus>, FeedError> {
    with_document(raw, "stat", |doc| {
        Ok(elements(doc.root_element(), "element")
            .next()
            .and_then(|element| {
                let path = element.attribute("location")?;
                Some(ElementStatus {
                    path: path.to_string(),
                    is_directory: is_yes(element.attribute("dir")),
                })
            }))
    })
}

/// `translist -fx`: ids of transactions not yet promoted, ascending.
pub fn parse_pending(raw: &str) -> Result<Vec<TransactionRef>, FeedError> {
    with_document(raw, "translist", |doc| {
        let mut refs = elements(doc.root_element(), "transaction")
            .map(|node| tx_id(node, raw).map(|id| TransactionRef { id }))
            .collect::<Result<Vec<_>, _>>()?;
        refs.sort();
        Ok(refs)
    })
}

/// `hist -fx -t now.1`: id of the newest transaction.
pub fn parse_last_transaction(raw: &str) -> Result<TxId, FeedError> {
    with_document(raw, "hist now.1", |doc| {
        let node = elements(doc.root_element(), "transaction")
            .next()
            .ok_or_else(|| FeedError::malformed("no transaction in response", raw))?;
        tx_id(node, raw)
    })
}

/// `show -fx wspaces` / `show -fx refs`: names of existing trees.
pub fn parse_workspace_names(raw: &str) -> Result<Vec<String>, FeedError> {
    with_document(raw, "show wspaces", |doc| {
        Ok(elements(doc.root_element(), "Element")
            .filter_map(|node| node.attribute("Name"))
            .map(str::to_string)
            .collect())
    })
}

/// `show -fx streams`: whether the response names exactly one stream.
pub fn parse_stream_exists(raw: &str) -> Result<bool, FeedError> {
    with_document(raw, "show streams", |doc| {
        Ok(elements(doc.root_element(), "stream").next().is_some())
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn with_document<T>(
    raw: &str,
    context: &str,
    f: impl FnOnce(&Document<'_>) -> Result<T, FeedError>,
) -> Result<T, FeedError> {
    let text = escape_bare_ampersands(raw);
    let doc = Document::parse(&text)
        .map_err(|e| FeedError::malformed(format!("{context}: {e}"), raw))?;
    f(&doc)
}

fn elements<'a, 'input: 'a>(
    root: Node<'a, 'input>,
    tag: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    root.descendants().filter(move |n| n.has_tag_name(tag))
}

fn transaction(node: Node<'_, '_>, raw: &str) -> Result<Transaction, FeedError> {
    let id = tx_id(node, raw)?;
    let timestamp = node
        .attribute("time")
        .and_then(|t| t.trim().parse::<i64>().ok())
        .ok_or_else(|| FeedError::malformed(format!("transaction {id} has no time"), raw))?;
    let comment = node
        .children()
        .find(|n| n.has_tag_name("comment"))
        .and_then(|n| n.text())
        .unwrap_or_default()
        .to_string();

    let versions = node
        .children()
        .filter(|n| n.has_tag_name("version"))
        .map(|v| version(v, id, raw))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Transaction {
        id,
        timestamp,
        author: node.attribute("user").unwrap_or_default().to_string(),
        comment,
        kind: node.attribute("type").unwrap_or_default().to_string(),
        versions,
    })
}

fn version(node: Node<'_, '_>, tx: TxId, raw: &str) -> Result<VersionRecord, FeedError> {
    let attr = |name: &str| {
        node.attribute(name)
            .map(str::to_string)
            .ok_or_else(|| FeedError::malformed(format!("version in transaction {tx} has no {name}"), raw))
    };
    Ok(VersionRecord {
        element_path: attr("path")?,
        is_directory: is_yes(node.attribute("dir"))
            || node.attribute("elem_type") == Some("dir"),
        virtual_version: attr("virtual")?,
        real_version: attr("real")?,
        ancestor: None,
    })
}

fn feed_side(change: Node<'_, '_>, tag: &'static str) -> Option<FeedSide> {
    let side = change.children().find(|n| n.has_tag_name(tag))?;
    let name = side.attribute("Name").or_else(|| side.attribute("name"))?;
    Some(FeedSide {
        name: name.to_string(),
        version: side.attribute("Version").unwrap_or_default().to_string(),
        is_directory: side.attribute("IsDir").map(|v| is_yes(Some(v))),
    })
}

fn tx_id(node: Node<'_, '_>, raw: &str) -> Result<TxId, FeedError> {
    node.attribute("id")
        .and_then(|id| id.parse::<TxId>().ok())
        .ok_or_else(|| FeedError::malformed("transaction without a numeric id", raw))
}

fn is_yes(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some("yes") | Some("true"))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
