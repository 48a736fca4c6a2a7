//! Element content and unified diffs of collected changes.

use similar::TextDiff;

use tributary_core::types::{ChangeRecord, VersionRoot};
use tributary_feed::TransactionFeed;

use crate::error::SyncError;

/// A rendered diff for one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDiff {
    pub path: String,
    pub unified_diff: String,
}

/// Bytes of `element_path` at `version`.
pub fn fetch_content<F>(
    feed: &F,
    root: &VersionRoot,
    version: &str,
    element_path: &str,
) -> Result<Vec<u8>, SyncError>
where
    F: TransactionFeed + ?Sized,
{
    Ok(feed.element_content(&root.depot, version, element_path)?)
}

/// Unified diff between the before and after content of `change`.
///
/// A missing side diffs as empty. Directories have no content and yield
/// `None`, as do changes whose sides are identical once line endings are
/// normalized.
pub fn change_diff<F>(
    feed: &F,
    root: &VersionRoot,
    change: &ChangeRecord,
) -> Result<Option<ChangeDiff>, SyncError>
where
    F: TransactionFeed + ?Sized,
{
    if change.kind.is_directory() {
        return Ok(None);
    }
    let element = format!("/./{}", change.path);
    let side = |version: &Option<String>| -> Result<Vec<u8>, SyncError> {
        match version {
            Some(v) => fetch_content(feed, root, v, &element),
            None => Ok(Vec::new()),
        }
    };
    let old = side(&change.before)?;
    let new = side(&change.after)?;

    let (Ok(old), Ok(new)) = (std::str::from_utf8(&old), std::str::from_utf8(&new)) else {
        return Ok((old != new).then(|| ChangeDiff {
            path: change.path.clone(),
            unified_diff: format!("Binary files a/{0} and b/{0} differ\n", change.path),
        }));
    };
    let old = normalize_line_endings(old);
    let new = normalize_line_endings(new);
    if old == new {
        return Ok(None);
    }

    let old_header = format!("a/{}", change.path);
    let new_header = format!("b/{}", change.path);
    let unified = TextDiff::from_lines(&old, &new)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string();

    Ok(Some(ChangeDiff {
        path: change.path.clone(),
        unified_diff: unified,
    }))
}

fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tributary_core::types::ChangeKind;
    use tributary_feed::MemoryFeed;

    fn root() -> VersionRoot {
        VersionRoot::new("acme", "acme".into(), "dev".into())
    }

    #[test]
    fn changed_file_produces_unified_diff() {
        let feed = MemoryFeed::new();
        feed.set_content("3/1", "/./src/a.txt", "one\ntwo\n");
        feed.set_content("3/2", "/./src/a.txt", "one\nthree\n");
        let change =
            ChangeRecord::classify("src/a.txt", false, Some("3/1".into()), "3/2".into()).unwrap();

        let diff = change_diff(&feed, &root(), &change).unwrap().expect("diff");
        assert!(diff.unified_diff.contains("--- a/src/a.txt"));
        assert!(diff.unified_diff.contains("+++ b/src/a.txt"));
        assert!(diff.unified_diff.contains("-two"));
        assert!(diff.unified_diff.contains("+three"));
    }

    #[test]
    fn added_file_diffs_against_empty() {
        let feed = MemoryFeed::new();
        feed.set_content("3/1", "/./new.txt", "hello\n");
        let change = ChangeRecord::classify("new.txt", false, None, "3/1".into()).unwrap();

        let diff = change_diff(&feed, &root(), &change).unwrap().expect("diff");
        assert!(diff.unified_diff.contains("+hello"));
        assert_eq!(feed.call_count("element_content"), 1);
    }

    #[test]
    fn directories_have_no_diff() {
        let feed = MemoryFeed::new();
        let change = ChangeRecord::classify("src", true, None, "3/1".into()).unwrap();
        assert_eq!(change.kind, ChangeKind::DirAdded);
        assert!(change_diff(&feed, &root(), &change).unwrap().is_none());
        assert_eq!(feed.call_count("element_content"), 0);
    }

    #[test]
    fn line_ending_only_changes_are_silent() {
        let feed = MemoryFeed::new();
        feed.set_content("3/1", "/./a.txt", "x\r\ny\r\n");
        feed.set_content("3/2", "/./a.txt", "x\ny\n");
        let change =
            ChangeRecord::classify("a.txt", false, Some("3/1".into()), "3/2".into()).unwrap();
        assert!(change_diff(&feed, &root(), &change).unwrap().is_none());
    }

    #[test]
    fn binary_content_is_summarized() {
        let feed = MemoryFeed::new();
        feed.set_content("3/1", "/./logo.png", vec![0xff, 0x00]);
        feed.set_content("3/2", "/./logo.png", vec![0xff, 0x01]);
        let change =
            ChangeRecord::classify("logo.png", false, Some("3/1".into()), "3/2".into()).unwrap();
        let diff = change_diff(&feed, &root(), &change).unwrap().expect("diff");
        assert_eq!(diff.unified_diff, "Binary files a/logo.png and b/logo.png differ\n");
    }
}
