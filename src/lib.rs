//! Concurrent repository tree harvester.
//!
//! Walks a remote repository's branch → tree → blob object graph,
//! applying independent include/exclude regex filters to files and
//! directories, and returns the decoded text of every matching file.
//! Remote calls run under a bounded concurrency limit and are retried
//! with backoff, with rate-limit responses handled by waiting for the
//! advertised reset window.
//!
//! The network itself lives behind the [`RepoTreeClient`] trait, so the
//! harvester works against any tree/blob API backend and is fully
//! testable with in-memory doubles.

pub mod client;
pub mod filter;
pub mod model;
pub mod retry;
pub mod walker;

// Re-export common types for convenience
pub use client::{ClientError, RepoTreeClient};
pub use filter::{Filter, FilterError, FilterKind, ObjectKind, PathFilter};
pub use model::{BlobContent, BranchRef, EntryKind, LocatorError, RepoFile, RepoLocator, TreeEntry};
pub use retry::{RetryError, RetryPolicy};
pub use walker::{HarvestError, HarvestStats, RepoWalker};
