#![doc = "HTTP client for a GitHub-compatible contents API: per-file writes and recursive tree listing."]
//
//! # GitHub contents client
//!
//! Implements [`FileWriter`] (used by the direct transport) and
//! [`RemoteLister`] (used by the verifier) against the REST endpoints:
//!
//! - `GET  /repos/{owner}/{repo}/contents/{path}?ref={branch}` to find an existing blob sha
//! - `PUT  /repos/{owner}/{repo}/contents/{path}` with base64 content
//! - `GET  /repos/{owner}/{repo}/git/trees/{branch}?recursive=1` to list the remote tree
//!
//! Tree-relative paths are placed under `remote_root` on the remote side.
//!
//! Before writing, the remote blob sha is compared with the git blob sha of
//! the local bytes: identical content is a no-op success, different content is
//! a conflict unless `overwrite` is enabled. Writes are serialized per client
//! because every PUT advances the branch ref.
//!
//! Status mapping for writes: 409/422 are conflicts, except a branch ref race
//! ("is at ... but expected ...") which is transient like 408/429/5xx and
//! connection failures. Request timeouts are timeouts, anything else is a
//! non-retryable rejection.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use reqwest::{header, StatusCode, Url};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::DestinationConfig;
use crate::contract::{FileWriter, RemoteLister};
use crate::error::TransportError;
use crate::model::ErrorKind;

pub struct GithubClient {
    http: reqwest::Client,
    api_base: Url,
    owner: String,
    repo: String,
    branch: String,
    remote_root: String,
    /// Update files that already exist with different content instead of
    /// reporting a conflict.
    overwrite: bool,
    /// One write at a time: concurrent PUTs race on the branch ref.
    write_permit: Semaphore,
}

/// What `put_file` does for one path, given the remote state.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WriteAction {
    Unchanged,
    Create,
    Update { sha: String },
}

#[derive(Serialize)]
struct PutContents<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

#[derive(Deserialize)]
struct ExistingContent {
    sha: String,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

impl GithubClient {
    pub fn new(
        destination: &DestinationConfig,
        token: &str,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let api_base = Url::parse(&destination.api_base).map_err(|e| {
            error!(error = %e, api_base = %destination.api_base, "Invalid API base URL");
            TransportError::Http(format!("invalid api_base {:?}: {e}", destination.api_base))
        })?;

        let mut headers = header::HeaderMap::new();
        let auth = header::HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| TransportError::Http(format!("invalid token: {e}")))?;
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );

        let http = reqwest::Client::builder()
            .user_agent(concat!("tree-publish/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;

        info!(
            owner = %destination.owner,
            repo = %destination.repo,
            branch = %destination.branch,
            remote_root = %destination.remote_root,
            "Initialized GitHub client"
        );
        Ok(Self {
            http,
            api_base,
            owner: destination.owner.clone(),
            repo: destination.repo.clone(),
            branch: destination.branch.clone(),
            remote_root: destination.remote_root.trim_matches('/').to_string(),
            overwrite: destination.overwrite,
            write_permit: Semaphore::new(1),
        })
    }

    fn remote_path(&self, path: &str) -> String {
        join_remote(&self.remote_root, path)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Http(format!("{} cannot be a base URL", self.api_base)))?
            .pop_if_empty()
            .extend(["repos", self.owner.as_str(), self.repo.as_str()])
            .extend(segments.iter().flat_map(|s| s.split('/')));
        Ok(url)
    }

    async fn existing_sha(&self, url: &Url) -> Result<Option<String>, ErrorKind> {
        let response = self
            .http
            .get(url.clone())
            .query(&[("ref", self.branch.as_str())])
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        let existing: ExistingContent = response
            .json()
            .await
            .map_err(|e| ErrorKind::Network(format!("malformed contents response: {e}")))?;
        Ok(Some(existing.sha))
    }
}

/// `root/path`, or just `path` when there is no root.
pub fn join_remote(root: &str, path: &str) -> String {
    let root = root.trim_matches('/');
    if root.is_empty() {
        path.to_string()
    } else {
        format!("{root}/{path}")
    }
}

/// Git blob id of `content`: SHA-1 over `"blob {len}\0"` followed by the bytes.
pub fn git_blob_sha(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", content.len()).as_bytes());
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

fn decide_write(
    remote_sha: Option<String>,
    local_sha: &str,
    overwrite: bool,
    path: &str,
) -> Result<WriteAction, ErrorKind> {
    match remote_sha {
        None => Ok(WriteAction::Create),
        Some(sha) if sha == local_sha => Ok(WriteAction::Unchanged),
        Some(sha) if overwrite => Ok(WriteAction::Update { sha }),
        Some(sha) => Err(ErrorKind::Conflict(format!(
            "{path} already exists with different content (remote blob {sha})"
        ))),
    }
}

/// Map a non-success HTTP status to a per-file error.
pub fn classify_status(status: StatusCode, body: &str) -> ErrorKind {
    let detail = format!("{status}: {}", body.trim());
    match status.as_u16() {
        409 if body.contains("but expected") => ErrorKind::Network(detail),
        409 | 422 => ErrorKind::Conflict(detail),
        408 | 429 => ErrorKind::Network(detail),
        s if s >= 500 => ErrorKind::Network(detail),
        _ => ErrorKind::Rejected(detail),
    }
}

fn request_error(e: reqwest::Error) -> ErrorKind {
    if e.is_timeout() {
        ErrorKind::Timeout
    } else {
        ErrorKind::Network(e.to_string())
    }
}

#[async_trait]
impl FileWriter for GithubClient {
    async fn put_file(&self, path: &str, content: Vec<u8>, message: &str) -> Result<(), ErrorKind> {
        let remote = self.remote_path(path);
        let url = self
            .endpoint(&["contents", remote.as_str()])
            .map_err(|e| ErrorKind::Rejected(e.to_string()))?;

        let _permit = self
            .write_permit
            .acquire()
            .await
            .map_err(|e| ErrorKind::Network(e.to_string()))?;

        let local_sha = git_blob_sha(&content);
        let sha = match decide_write(self.existing_sha(&url).await?, &local_sha, self.overwrite, &remote)? {
            WriteAction::Unchanged => {
                debug!(path = %remote, "Remote content already identical, skipping write");
                return Ok(());
            }
            WriteAction::Create => None,
            WriteAction::Update { sha } => Some(sha),
        };
        debug!(path = %remote, update = sha.is_some(), bytes = content.len(), "Writing file");

        let body = PutContents {
            message,
            content: general_purpose::STANDARD.encode(&content),
            branch: &self.branch,
            sha,
        };
        let response = self
            .http
            .put(url)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if status.is_success() {
            debug!(path = %remote, %status, "File written");
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        let kind = classify_status(status, &text);
        warn!(path = %remote, %status, error = %kind, "File write refused");
        Err(kind)
    }
}

#[async_trait]
impl RemoteLister for GithubClient {
    async fn list(&self, prefix: &str) -> Result<BTreeSet<String>, TransportError> {
        let url = self.endpoint(&["git", "trees", self.branch.as_str()])?;
        info!(prefix, branch = %self.branch, "Listing remote tree");
        let response = self
            .http
            .get(url)
            .query(&[("recursive", "1")])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Http(format!("tree listing timed out: {e}"))
                } else {
                    TransportError::Http(e.to_string())
                }
            })?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::CONFLICT {
            // Missing branch or empty repository: nothing is published yet.
            return Ok(BTreeSet::new());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, body = %body, "Remote tree listing failed");
            return Err(TransportError::Http(format!("{status}: {}", body.trim())));
        }
        let tree: TreeResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Http(format!("malformed tree response: {e}")))?;
        let paths = listed_paths(tree, prefix)?;
        info!(count = paths.len(), "Listed remote tree");
        Ok(paths)
    }
}

/// A truncated listing is incomplete and must not be compared against a plan.
fn listed_paths(tree: TreeResponse, prefix: &str) -> Result<BTreeSet<String>, TransportError> {
    if tree.truncated {
        warn!(entries = tree.tree.len(), "Remote tree listing was truncated by the server");
        return Err(TransportError::Unavailable(format!(
            "remote tree listing truncated after {} entries",
            tree.tree.len()
        )));
    }
    Ok(filter_blobs(tree.tree, prefix))
}

fn filter_blobs(items: Vec<TreeItem>, prefix: &str) -> BTreeSet<String> {
    let prefix = prefix.trim_matches('/');
    items
        .into_iter()
        .filter(|item| item.kind == "blob")
        .filter(|item| {
            prefix.is_empty()
                || item
                    .path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
        .map(|item| item.path)
        .collect()
}
