//! "Before" version lookup for a changed element.

use std::collections::HashMap;

use tracing::debug;

use tributary_feed::{FeedError, TransactionFeed};

/// The backend's answer for an element with no ancestor.
const NO_ANCESTOR: &str = "0/0";

/// Direct ancestor of `version` of `element_path`, or `None` for an element
/// that did not exist before.
///
/// `version` is a named version (`streamName/versionNum`).
pub fn resolve_before<F>(
    feed: &F,
    version: &str,
    element_path: &str,
) -> Result<Option<String>, FeedError>
where
    F: TransactionFeed + ?Sized,
{
    Ok(normalize(feed.direct_ancestor(version, element_path)?))
}

fn normalize(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != NO_ANCESTOR)
}

/// Ancestor lookups for one collection call.
///
/// Answers are remembered for the lifetime of the resolver only; a new
/// collection starts from an empty memo.
pub struct AncestorResolver<'a, F: ?Sized> {
    feed: &'a F,
    memo: HashMap<(String, String), Option<String>>,
}

impl<'a, F> AncestorResolver<'a, F>
where
    F: TransactionFeed + ?Sized,
{
    pub fn new(feed: &'a F) -> Self {
        Self {
            feed,
            memo: HashMap::new(),
        }
    }

    pub fn resolve_before(
        &mut self,
        version: &str,
        element_path: &str,
    ) -> Result<Option<String>, FeedError> {
        let key = (version.to_string(), element_path.to_string());
        if let Some(known) = self.memo.get(&key) {
            return Ok(known.clone());
        }
        let before = resolve_before(self.feed, version, element_path)?;
        debug!(version, element_path, before = ?before, "resolved ancestor");
        self.memo.insert(key, before.clone());
        Ok(before)
    }

    /// Prefer an ancestor the feed already supplied, else look it up.
    pub fn before_of(
        &mut self,
        supplied: Option<&str>,
        version: &str,
        element_path: &str,
    ) -> Result<Option<String>, FeedError> {
        match supplied {
            Some(raw) => Ok(normalize(Some(raw.to_string()))),
            None => self.resolve_before(version, element_path),
        }
    }
}
