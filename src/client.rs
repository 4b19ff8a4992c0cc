//! Remote tree client seam.
//!
//! The harvester consumes a branch/tree/blob API through [`RepoTreeClient`]
//! and never talks to the network itself, so any backend (an HTTP client,
//! a proxy, a test double) can drive a harvest.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{BlobContent, BranchRef, TreeEntry};

/// Failure of a single remote call.
///
/// The variants carry enough signal for the retry layer to classify the
/// failure: rate limiting is reported as an HTTP status (403 or 429)
/// together with the reset header value, rather than as a separate
/// variant, because that is what the wire actually says.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The remote answered with a non-success HTTP status.
    #[error("HTTP status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,

        /// Epoch seconds at which the caller's rate-limit quota resets,
        /// if the response carried a reset header.
        rate_limit_reset: Option<u64>,

        /// Response detail for logs.
        message: String,
    },

    /// The call failed before an HTTP status was obtained.
    #[error("network error: {0}")]
    Network(String),

    /// The call did not complete within the requested timeout.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
}

impl ClientError {
    /// Shorthand for a plain status failure with no rate-limit header.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            rate_limit_reset: None,
            message: message.into(),
        }
    }

    /// Shorthand for a rate-limit failure carrying a reset time.
    pub fn rate_limited(status: u16, reset_epoch: u64) -> Self {
        Self::Status {
            status,
            rate_limit_reset: Some(reset_epoch),
            message: "rate limit exceeded".to_string(),
        }
    }
}

/// Read-only access to a remote repository's tree/blob object graph.
///
/// Every operation takes a per-call timeout that implementations must
/// enforce, surfacing expiry as [`ClientError::Timeout`].
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the walker shares one client
/// across many concurrent tasks.
#[async_trait]
pub trait RepoTreeClient: Send + Sync {
    /// Resolves a branch to its root tree sha.
    async fn get_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        timeout: Duration,
    ) -> Result<BranchRef, ClientError>;

    /// Lists the entries of one tree object.
    async fn get_tree(
        &self,
        owner: &str,
        repo: &str,
        tree_sha: &str,
        timeout: Duration,
    ) -> Result<Vec<TreeEntry>, ClientError>;

    /// Fetches the encoded content of one blob object.
    async fn get_blob(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        timeout: Duration,
    ) -> Result<BlobContent, ClientError>;
}
