//! Labeling a root at a version with a snapshot stream.

use tracing::info;

use tributary_core::types::{TxId, VersionRoot};
use tributary_feed::TransactionFeed;

use crate::error::SyncError;

/// Longest snapshot name the backend accepts.
pub const MAX_SNAPSHOT_NAME: usize = 79;

const ALLOWED_SYMBOLS: &str = "-_.+@ ";

/// Turn a free-form label into a valid snapshot name.
///
/// Replaces anything outside letters, digits and `-_.+@ ` with `_`, never
/// starts with `.` or a digit, and is at most 79 characters long.
pub fn snapshot_name(label: &str) -> String {
    let mut name: String = label
        .chars()
        .take(MAX_SNAPSHOT_NAME)
        .map(|c| {
            if c.is_alphanumeric() || ALLOWED_SYMBOLS.contains(c) {
                c
            } else {
                '_'
            }
        })
        .collect();

    if name.starts_with('.') {
        name.replace_range(..1, "_");
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
        if let Some((cut, _)) = name.char_indices().nth(MAX_SNAPSHOT_NAME) {
            name.truncate(cut);
        }
    }
    name
}

/// Create a snapshot of the watched stream at `at`. Returns the name used.
pub fn label<F>(feed: &F, root: &VersionRoot, label: &str, at: TxId) -> Result<String, SyncError>
where
    F: TransactionFeed + ?Sized,
{
    let name = snapshot_name(label);
    info!(label, snapshot = %name, stream = %root.stream, %at, "labeling");
    feed.create_snapshot(&name, &root.stream, at)?;
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tributary_feed::MemoryFeed;

    #[rstest]
    #[case("release-1.2", "release-1.2")]
    #[case("build #42 (nightly)", "build _42 _nightly_")]
    #[case("feature/login", "feature_login")]
    #[case(".hidden", "_hidden")]
    #[case("2024 build", "_2024 build")]
    #[case("ops@host+1", "ops@host+1")]
    #[case("", "")]
    fn sanitizes_labels(#[case] label: &str, #[case] expected: &str) {
        assert_eq!(snapshot_name(label), expected);
    }

    #[test]
    fn long_labels_stay_within_the_limit_after_the_digit_prefix() {
        let name = snapshot_name(&"9".repeat(100));
        assert_eq!(name.chars().count(), MAX_SNAPSHOT_NAME);
        assert!(name.starts_with('_'));
        assert!(name[1..].chars().all(|c| c == '9'));

        let letters = snapshot_name(&"é".repeat(100));
        assert_eq!(letters.chars().count(), MAX_SNAPSHOT_NAME);
    }

    #[test]
    fn label_creates_a_snapshot_of_the_watched_stream() {
        let feed = MemoryFeed::new();
        let root = VersionRoot::new("acme", "acme".into(), "dev".into());

        let name = label(&feed, &root, "nightly/42", TxId(4411)).unwrap();
        assert_eq!(name, "nightly_42");

        let snaps = feed.snapshots();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].name, "nightly_42");
        assert_eq!(snaps[0].basis.as_str(), "dev");
        assert_eq!(snaps[0].at, TxId(4411));
    }
}
