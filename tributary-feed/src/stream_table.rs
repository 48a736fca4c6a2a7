//! Stream id → stream name lookup, as shipped alongside a history response.

use std::collections::BTreeMap;

use tributary_core::types::StreamName;

use crate::error::FeedError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamTable {
    names: BTreeMap<String, StreamName>,
}

impl StreamTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, name: impl Into<StreamName>) {
        self.names.insert(id.into(), name.into());
    }

    pub fn name_of(&self, id: &str) -> Option<&StreamName> {
        self.names.get(id.trim())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Rewrite `streamId/versionNum` as `streamName/versionNum`.
    pub fn resolve(&self, version: &str) -> Result<String, FeedError> {
        let (id, number) = version.split_once('/').ok_or_else(|| {
            FeedError::malformed("version identifier without a stream id", version)
        })?;
        let name = self.name_of(id).ok_or_else(|| {
            FeedError::InconsistentHierarchy(format!(
                "stream id {id} in version {version} is not in the stream table"
            ))
        })?;
        Ok(format!("{name}/{number}"))
    }
}

impl<I, N> FromIterator<(I, N)> for StreamTable
where
    I: Into<String>,
    N: Into<StreamName>,
{
    fn from_iter<T: IntoIterator<Item = (I, N)>>(iter: T) -> Self {
        let mut table = Self::new();
        for (id, name) in iter {
            table.insert(id, name);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> StreamTable {
        [("1", "acme"), ("3", "acme_dev")].into_iter().collect()
    }

    #[test]
    fn resolves_known_stream() {
        assert_eq!(table().resolve("3/12").unwrap(), "acme_dev/12");
    }

    #[test]
    fn unknown_stream_is_inconsistent() {
        let err = table().resolve("9/1").unwrap_err();
        assert!(matches!(err, FeedError::InconsistentHierarchy(_)), "got {err}");
    }

    #[test]
    fn missing_separator_is_malformed() {
        assert!(matches!(
            table().resolve("12"),
            Err(FeedError::MalformedResponse { .. })
        ));
    }
}
