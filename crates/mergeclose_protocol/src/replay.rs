//! Replay identity keys.
//!
//! `{owner}/{repo}#{pr_number}#{merge_sha}` is the only deduplication key the
//! daemon uses. The same merge SHA in two repositories, or a re-merge of the
//! same PR under a new SHA, are distinct keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayKeyError {
    #[error("invalid pull request url: '{0}'")]
    InvalidPrUrl(String),

    #[error("merge sha must be non-empty")]
    EmptyMergeSha,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplayKey(String);

impl ReplayKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ReplayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `owner/repo` from the first two path segments of a PR URL.
pub fn repo_slug_from_pr_url(pr_url: &str) -> Result<String, ReplayKeyError> {
    let parsed =
        Url::parse(pr_url.trim()).map_err(|_| ReplayKeyError::InvalidPrUrl(pr_url.to_string()))?;
    let mut parts = parsed
        .path_segments()
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty());
    match (parts.next(), parts.next()) {
        (Some(owner), Some(repo)) => Ok(format!("{}/{}", owner, repo)),
        _ => Err(ReplayKeyError::InvalidPrUrl(pr_url.to_string())),
    }
}

pub fn replay_identity_key(
    pr_url: &str,
    pr_number: u64,
    merge_sha: &str,
) -> Result<ReplayKey, ReplayKeyError> {
    let merge_sha = merge_sha.trim();
    if merge_sha.is_empty() {
        return Err(ReplayKeyError::EmptyMergeSha);
    }
    let slug = repo_slug_from_pr_url(pr_url)?;
    Ok(ReplayKey(format!("{}#{}#{}", slug, pr_number, merge_sha)))
}
