//! Concurrent repository tree traversal.
//!
//! [`RepoWalker`] resolves a branch to its root tree, then recursively
//! walks the tree with:
//! - Fan-out/fan-in per directory level via `tokio::spawn`
//! - A shared `tokio::sync::Semaphore` bounding outstanding remote calls
//! - Per-call retries through [`crate::retry`]
//! - Path pruning through [`PathFilter`] before any remote call is issued
//!
//! Failure scoping: a branch-resolution failure aborts the whole harvest;
//! a tree-listing failure abandons only that subtree; a blob failure or
//! decode rejection drops only that one file.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{ClientError, RepoTreeClient};
use crate::filter::{ObjectKind, PathFilter};
use crate::model::{EntryKind, RepoFile, RepoLocator, TreeEntry};
use crate::retry::{self, RetryError, RetryPolicy};

/// Blobs must arrive with this transport encoding marker to be decoded.
const BASE64_ENCODING: &str = "base64";

/// Default cap on simultaneously outstanding remote calls.
const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// Default per-call timeout handed to the client.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Errors & Stats
// ============================================================================

/// Errors that abort an entire harvest.
///
/// Everything below branch resolution is absorbed internally and only
/// affects completeness of the result set.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The branch could not be resolved to a root tree; with no root
    /// there is nothing to traverse.
    #[error("failed to resolve branch {locator}: {source}")]
    BranchResolution {
        locator: RepoLocator,
        #[source]
        source: RetryError,
    },
}

/// Counters describing one harvest run.
#[derive(Debug, Default, Clone)]
pub struct HarvestStats {
    /// Files fetched, decoded, and added to the result.
    pub files_harvested: u64,

    /// Files dropped after retry exhaustion or decode rejection.
    pub files_dropped: u64,

    /// Tree listings successfully fetched.
    pub trees_listed: u64,

    /// Subtrees abandoned after a listing failed all retries.
    pub subtrees_failed: u64,

    /// Wall-clock duration of the harvest (milliseconds).
    pub duration_ms: u64,
}

// ============================================================================
// Walker
// ============================================================================

/// Recursively walks a remote repository tree and collects matching files.
///
/// The walker owns no network code; it drives a [`RepoTreeClient`] through
/// the retry executor and consults a [`PathFilter`] before descending into
/// a directory or fetching a blob, so rejected directories cost zero
/// remote calls.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use repo_harvester::{Filter, PathFilter, RepoLocator, RepoWalker};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let locator = RepoLocator::from_url("https://github.com/owner/repo", "main")?;
///     let walker = RepoWalker::new(Arc::new(client), locator).with_max_in_flight(4);
///
///     let filter = PathFilter::new(&[Filter::include(r"\.rs$")], &[])?;
///     let files = walker.scrape(&filter).await?;
///     println!("harvested {} files", files.len());
///     Ok(())
/// }
/// ```
pub struct RepoWalker<C> {
    client: Arc<C>,
    locator: RepoLocator,
    max_in_flight: usize,
    call_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl<C> RepoWalker<C>
where
    C: RepoTreeClient + 'static,
{
    /// Creates a walker for one repository branch.
    ///
    /// Default configuration: at most 4 remote calls in flight, 30 s
    /// per-call timeout, default [`RetryPolicy`].
    pub fn new(client: Arc<C>, locator: RepoLocator) -> Self {
        Self {
            client,
            locator,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Sets the cap on simultaneously outstanding remote calls.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Sets the timeout handed to the client for each remote call.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Replaces the retry policy applied to every remote call.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Traverses the repository and returns all files passing the filter.
    ///
    /// Result order is nondeterministic across concurrent branches; only
    /// set membership is stable for a given tree and filter.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::BranchResolution`] if the branch cannot be
    /// resolved after retries. All other failures shrink the result set
    /// instead of surfacing here.
    pub async fn scrape(&self, filter: &PathFilter) -> Result<Vec<RepoFile>, HarvestError> {
        let (files, _stats) = self.scrape_with_stats(filter).await?;
        Ok(files)
    }

    /// Like [`scrape`](Self::scrape), also returning run statistics.
    ///
    /// The stats are the only record of silently dropped files and
    /// abandoned subtrees, so callers diagnosing incomplete harvests
    /// should prefer this entry point.
    pub async fn scrape_with_stats(
        &self,
        filter: &PathFilter,
    ) -> Result<(Vec<RepoFile>, HarvestStats), HarvestError> {
        let started = std::time::Instant::now();
        info!(repo = %self.locator, "starting harvest");

        let desc = format!("get_branch({})", self.locator);
        let branch = retry::execute(&self.retry_policy, &desc, || {
            self.client.get_branch(
                &self.locator.owner,
                &self.locator.repo,
                &self.locator.branch,
                self.call_timeout,
            )
        })
        .await
        .map_err(|source| HarvestError::BranchResolution {
            locator: self.locator.clone(),
            source,
        })?;

        let state = Arc::new(WalkState {
            client: Arc::clone(&self.client),
            locator: self.locator.clone(),
            filter: filter.clone(),
            bucket: Mutex::new(Vec::new()),
            gate: Semaphore::new(self.max_in_flight),
            call_timeout: self.call_timeout,
            retry_policy: self.retry_policy.clone(),
            files_harvested: AtomicU64::new(0),
            files_dropped: AtomicU64::new(0),
            trees_listed: AtomicU64::new(0),
            subtrees_failed: AtomicU64::new(0),
        });

        walk(Arc::clone(&state), branch.tree_sha, String::new()).await;

        let files = std::mem::take(&mut *lock(&state.bucket));
        let stats = HarvestStats {
            files_harvested: state.files_harvested.load(Ordering::Relaxed),
            files_dropped: state.files_dropped.load(Ordering::Relaxed),
            trees_listed: state.trees_listed.load(Ordering::Relaxed),
            subtrees_failed: state.subtrees_failed.load(Ordering::Relaxed),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            repo = %self.locator,
            files = stats.files_harvested,
            dropped = stats.files_dropped,
            subtrees_failed = stats.subtrees_failed,
            duration_ms = stats.duration_ms,
            "harvest completed"
        );
        Ok((files, stats))
    }
}

// ============================================================================
// Traversal internals
// ============================================================================

/// State shared by every task of one harvest run.
///
/// The bucket and counters are touched from many spawned tasks on a
/// multi-threaded runtime, hence the mutex and atomics.
struct WalkState<C> {
    client: Arc<C>,
    locator: RepoLocator,
    filter: PathFilter,
    bucket: Mutex<Vec<RepoFile>>,
    gate: Semaphore,
    call_timeout: Duration,
    retry_policy: RetryPolicy,
    files_harvested: AtomicU64,
    files_dropped: AtomicU64,
    trees_listed: AtomicU64,
    subtrees_failed: AtomicU64,
}

/// Locks a mutex, recovering the data if a panicked task poisoned it.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<C: RepoTreeClient> WalkState<C> {
    /// Fetches one tree listing; each attempt holds a limiter permit for
    /// the duration of the remote call only, so backoff sleeps do not
    /// starve sibling tasks.
    async fn fetch_tree(&self, tree_sha: &str) -> Result<Vec<TreeEntry>, RetryError> {
        let desc = format!("get_tree({}, sha={tree_sha})", self.locator);
        retry::execute(&self.retry_policy, &desc, || async move {
            let _permit = self.acquire_permit().await?;
            self.client
                .get_tree(
                    &self.locator.owner,
                    &self.locator.repo,
                    tree_sha,
                    self.call_timeout,
                )
                .await
        })
        .await
    }

    /// Fetches and decodes one blob, or `None` if the file must be
    /// dropped (retry exhaustion, wrong encoding marker, absent or
    /// undecodable content). Every drop is logged with the path.
    async fn decode_blob(&self, sha: &str, path: &str) -> Option<String> {
        let desc = format!("get_blob({}, sha={sha})", self.locator);
        let blob = retry::execute(&self.retry_policy, &desc, || async move {
            let _permit = self.acquire_permit().await?;
            self.client
                .get_blob(
                    &self.locator.owner,
                    &self.locator.repo,
                    sha,
                    self.call_timeout,
                )
                .await
        })
        .await;

        let blob = match blob {
            Ok(blob) => blob,
            Err(err) => {
                warn!(path = %path, error = %err, "dropping file after fetch failure");
                return None;
            }
        };

        if blob.encoding != BASE64_ENCODING {
            warn!(path = %path, encoding = %blob.encoding, "dropping file with unexpected encoding");
            return None;
        }
        let Some(content) = blob.content else {
            warn!(path = %path, "dropping file with empty blob content");
            return None;
        };

        // Transport base64 is line-wrapped; strip whitespace before decoding.
        let compact: Vec<u8> = content
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        match BASE64.decode(&compact) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(err) => {
                warn!(path = %path, error = %err, "dropping file with undecodable content");
                None
            }
        }
    }

    async fn acquire_permit(&self) -> Result<tokio::sync::SemaphorePermit<'_>, ClientError> {
        self.gate
            .acquire()
            .await
            .map_err(|_| ClientError::Network("concurrency limiter closed".to_string()))
    }
}

/// Walks one tree node: lists it, prunes entries through the filter, and
/// fans out one task per surviving entry, joining them all before
/// returning.
///
/// A listing failure abandons this subtree only; sibling tasks already
/// scheduled by the parent keep running.
fn walk<C>(
    state: Arc<WalkState<C>>,
    tree_sha: String,
    prefix: String,
) -> Pin<Box<dyn Future<Output = ()> + Send>>
where
    C: RepoTreeClient + 'static,
{
    Box::pin(async move {
        let entries = match state.fetch_tree(&tree_sha).await {
            Ok(entries) => {
                state.trees_listed.fetch_add(1, Ordering::Relaxed);
                entries
            }
            Err(err) => {
                state.subtrees_failed.fetch_add(1, Ordering::Relaxed);
                warn!(prefix = %prefix, error = %err, "abandoning subtree after listing failure");
                return;
            }
        };

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        for entry in entries {
            let full_path = format!("{prefix}{}", entry.path);
            match entry.kind {
                EntryKind::File => {
                    if !state.filter.matches(&full_path, ObjectKind::File) {
                        continue;
                    }
                    let state = Arc::clone(&state);
                    tasks.push(tokio::spawn(handle_blob(state, entry.sha, full_path)));
                }
                EntryKind::Directory => {
                    if !state.filter.matches(&full_path, ObjectKind::Directory) {
                        debug!(path = %full_path, "pruned directory");
                        continue;
                    }
                    let state = Arc::clone(&state);
                    tasks.push(tokio::spawn(walk(state, entry.sha, format!("{full_path}/"))));
                }
            }
        }

        // Fan-in: this level is complete only once every child file and
        // subdirectory task has finished or failed.
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "walker task failed to join");
            }
        }
    })
}

/// Fetches and decodes one matched file, appending it to the bucket on
/// success and counting a drop otherwise.
async fn handle_blob<C>(state: Arc<WalkState<C>>, sha: String, path: String)
where
    C: RepoTreeClient + 'static,
{
    let Some(content) = state.decode_blob(&sha, &path).await else {
        state.files_dropped.fetch_add(1, Ordering::Relaxed);
        return;
    };

    let total = state.files_harvested.fetch_add(1, Ordering::Relaxed) + 1;
    debug!(path = %path, total, "file harvested");
    lock(&state.bucket).push(RepoFile { path, content });
}

// ============================================================================
// Tests
// ============================================================================
