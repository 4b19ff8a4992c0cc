//! Data model for repository harvesting.
//!
//! Wire-facing types (`BranchRef`, `TreeEntry`, `BlobContent`) derive
//! `serde` so client implementations can deserialize API payloads into
//! them directly; `RepoFile` is the harvester's output record.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// One file matched by the filters, with successfully decoded text content.
///
/// Immutable once created; a harvest run yields at most one `RepoFile`
/// per distinct path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoFile {
    /// Path relative to the repository root, e.g. `"src/lib.rs"`.
    pub path: String,

    /// Decoded UTF-8 text content.
    pub content: String,
}

/// Branch metadata: the sha of the branch's root tree.
///
/// Fetched once per harvest to seed traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRef {
    /// Root tree sha for the branch head commit.
    pub tree_sha: String,
}

/// Kind of a tree entry, as reported by the remote listing.
///
/// Deserializes from the wire markers `"blob"` (file) and `"tree"`
/// (directory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// A file (wire: `"blob"`).
    #[serde(rename = "blob")]
    File,

    /// A directory (wire: `"tree"`).
    #[serde(rename = "tree")]
    Directory,
}

/// One entry of a tree listing.
///
/// Transient: produced by a single listing call and consumed immediately
/// to decide fetch-vs-recurse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Entry name relative to the listed tree (not the repository root).
    pub path: String,

    /// File or directory.
    #[serde(rename = "type")]
    pub kind: EntryKind,

    /// Content identifier of the blob or subtree.
    pub sha: String,
}

/// Raw blob content as returned by the remote.
///
/// The harvester only accepts blobs whose `encoding` is `"base64"` and
/// whose `content` is present; anything else is discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobContent {
    /// Transport encoding marker, expected to be `"base64"`.
    pub encoding: String,

    /// Encoded payload; `None` for blobs the remote refuses to inline.
    pub content: Option<String>,
}

/// Identifies the repository and branch to harvest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLocator {
    /// Repository owner (user or organization).
    pub owner: String,

    /// Repository name.
    pub repo: String,

    /// Branch to harvest.
    pub branch: String,
}

/// Errors from parsing a repository URL.
#[derive(Debug, Error)]
pub enum LocatorError {
    /// The string is not a parseable URL.
    #[error("invalid repository URL '{url}': {source}")]
    Malformed {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The URL does not point at github.com.
    #[error("unsupported repository host in '{0}', expected github.com")]
    UnsupportedHost(String),

    /// The URL path is missing the owner or repository segment.
    #[error("repository URL '{0}' must be https://github.com/{{owner}}/{{repo}}")]
    MissingSegments(String),
}

impl RepoLocator {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
        }
    }

    /// Parses `https://github.com/{owner}/{repo}` into a locator.
    ///
    /// A trailing `.git` on the repository segment is trimmed. Extra path
    /// segments after owner/repo are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`LocatorError`] if the URL is malformed, points at a host
    /// other than github.com, or lacks owner/repo segments.
    pub fn from_url(repo_url: &str, branch: impl Into<String>) -> Result<Self, LocatorError> {
        let parsed = Url::parse(repo_url).map_err(|source| LocatorError::Malformed {
            url: repo_url.to_string(),
            source,
        })?;

        if parsed.host_str() != Some("github.com") {
            return Err(LocatorError::UnsupportedHost(repo_url.to_string()));
        }

        let mut segments = parsed
            .path_segments()
            .ok_or_else(|| LocatorError::MissingSegments(repo_url.to_string()))?
            .filter(|s| !s.is_empty());

        let owner = segments
            .next()
            .ok_or_else(|| LocatorError::MissingSegments(repo_url.to_string()))?;
        let repo = segments
            .next()
            .ok_or_else(|| LocatorError::MissingSegments(repo_url.to_string()))?;
        let repo = repo.strip_suffix(".git").unwrap_or(repo);

        Ok(Self::new(owner, repo, branch))
    }
}

impl std::fmt::Display for RepoLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.repo, self.branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_entry_wire_format() {
        let entry: TreeEntry =
            serde_json::from_str(r#"{"path": "src", "type": "tree", "sha": "abc123"}"#).unwrap();
        assert_eq!(entry.path, "src");
        assert_eq!(entry.kind, EntryKind::Directory);
        assert_eq!(entry.sha, "abc123");

        let entry: TreeEntry =
            serde_json::from_str(r#"{"path": "main.rs", "type": "blob", "sha": "def456"}"#)
                .unwrap();
        assert_eq!(entry.kind, EntryKind::File);
    }

    #[test]
    fn test_blob_content_wire_format() {
        let blob: BlobContent =
            serde_json::from_str(r#"{"encoding": "base64", "content": "aGVsbG8="}"#).unwrap();
        assert_eq!(blob.encoding, "base64");
        assert_eq!(blob.content.as_deref(), Some("aGVsbG8="));

        let blob: BlobContent =
            serde_json::from_str(r#"{"encoding": "none", "content": null}"#).unwrap();
        assert!(blob.content.is_none());
    }

    #[test]
    fn test_locator_from_url() {
        let loc = RepoLocator::from_url("https://github.com/rust-lang/regex", "main").unwrap();
        assert_eq!(loc.owner, "rust-lang");
        assert_eq!(loc.repo, "regex");
        assert_eq!(loc.branch, "main");
    }

    #[test]
    fn test_locator_trims_git_suffix() {
        let loc = RepoLocator::from_url("https://github.com/rust-lang/regex.git", "main").unwrap();
        assert_eq!(loc.repo, "regex");
    }

    #[test]
    fn test_locator_rejects_foreign_host() {
        let err = RepoLocator::from_url("https://gitlab.com/owner/repo", "main").unwrap_err();
        assert!(matches!(err, LocatorError::UnsupportedHost(_)));
    }

    #[test]
    fn test_locator_rejects_short_path() {
        let err = RepoLocator::from_url("https://github.com/only-owner", "main").unwrap_err();
        assert!(matches!(err, LocatorError::MissingSegments(_)));
    }

    #[test]
    fn test_locator_rejects_garbage() {
        let err = RepoLocator::from_url("not a url", "main").unwrap_err();
        assert!(matches!(err, LocatorError::Malformed { .. }));
    }

    #[test]
    fn test_locator_display() {
        let loc = RepoLocator::new("owner", "repo", "main");
        assert_eq!(loc.to_string(), "owner/repo@main");
    }
}
