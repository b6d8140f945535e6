//! Data model shared by the analyzer, planner, engine and verifier.
//!
//! Everything here is plain data: serializable, comparable, and free of I/O.
//! Paths are always tree-relative and `/`-separated.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Classification label driving batch priority.
///
/// The declaration order is the canonical order used for categories that a
/// priority policy does not mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    RootCritical,
    Module,
    Config,
    Asset,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::RootCritical,
        Category::Module,
        Category::Config,
        Category::Asset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::RootCritical => "root-critical",
            Category::Module => "module",
            Category::Config => "config",
            Category::Asset => "asset",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category {s:?}"))
    }
}

/// One file of the tree, as computed by a single scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub size_bytes: u64,
    pub category: Category,
    /// Lowercase hex SHA-256 of the file bytes.
    pub content_hash: String,
}

/// Per-batch transport limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLimits {
    pub max_files_per_batch: usize,
    pub max_bytes_per_batch: u64,
}

/// A bounded group of files submitted together in one transport operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: u32,
    pub files: Vec<FileEntry>,
    /// Lower is earlier.
    pub priority: u32,
    pub category: Category,
    pub commit_message: String,
    /// Deepest directory shared by every file in the batch; empty for the tree root.
    pub target_prefix: String,
    pub oversize_single_file: bool,
}

impl Batch {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.path.as_str())
    }

    /// Same batch restricted to `paths`, preserving file order.
    ///
    /// Used to resubmit only the failed subset on retry.
    pub fn subset(&self, paths: &BTreeSet<String>) -> Batch {
        Batch {
            files: self
                .files
                .iter()
                .filter(|f| paths.contains(&f.path))
                .cloned()
                .collect(),
            ..self.clone()
        }
    }
}

/// Non-fatal observations made while planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanWarning {
    OversizeSingleFile {
        batch_id: u32,
        path: String,
        size_bytes: u64,
        limit: u64,
    },
}

/// The complete, ordered set of batches computed before any network I/O.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishPlan {
    pub batches: Vec<Batch>,
    /// Every planned file, keyed by path.
    pub manifest: BTreeMap<String, FileEntry>,
    pub warnings: Vec<PlanWarning>,
    pub limits: BatchLimits,
    /// Effective priority order, including categories appended after the policy.
    pub priority_policy: Vec<Category>,
}

impl PublishPlan {
    pub fn batch(&self, id: u32) -> Option<&Batch> {
        self.batches.iter().find(|b| b.id == id)
    }

    pub fn total_files(&self) -> usize {
        self.manifest.len()
    }
}

/// Why a single file failed to upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ErrorKind {
    /// A UI step could not be completed in time; the interactive session may recover.
    TransientUi(String),
    /// A UI step failed and interactive fallback is disabled.
    FatalUi(String),
    /// The destination already holds different content for this path.
    Conflict(String),
    /// The destination refused the write for a reason other than a conflict.
    Rejected(String),
    Network(String),
    Timeout,
    /// The batch's destination directory could not be confirmed.
    PrefixUnavailable(String),
    /// The local file no longer matches the scanned entry (unreadable or different hash).
    SourceChanged(String),
    Cancelled,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransientUi(_) | ErrorKind::Network(_) | ErrorKind::Timeout
        )
    }

    /// Non-retryable failures that terminate their batch and trip `abort_on_fatal`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::FatalUi(_)
                | ErrorKind::Conflict(_)
                | ErrorKind::Rejected(_)
                | ErrorKind::PrefixUnavailable(_)
                | ErrorKind::SourceChanged(_)
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TransientUi(d) => write!(f, "transient UI error: {d}"),
            ErrorKind::FatalUi(d) => write!(f, "fatal UI error: {d}"),
            ErrorKind::Conflict(d) => write!(f, "conflict: {d}"),
            ErrorKind::Rejected(d) => write!(f, "rejected: {d}"),
            ErrorKind::Network(d) => write!(f, "network error: {d}"),
            ErrorKind::Timeout => f.write_str("timed out"),
            ErrorKind::PrefixUnavailable(d) => write!(f, "destination prefix unavailable: {d}"),
            ErrorKind::SourceChanged(d) => write!(f, "local file changed since scan: {d}"),
            ErrorKind::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Result of one transport invocation. Accounts for every submitted file exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub batch_id: u32,
    pub succeeded: BTreeSet<String>,
    pub failed: BTreeMap<String, ErrorKind>,
    pub attempt: u32,
}

impl UploadOutcome {
    pub fn new(batch_id: u32, attempt: u32) -> Self {
        Self {
            batch_id,
            attempt,
            ..Default::default()
        }
    }

    /// Every file of `batch` failed with the same error.
    pub fn all_failed(batch: &Batch, attempt: u32, kind: ErrorKind) -> Self {
        Self {
            batch_id: batch.id,
            succeeded: BTreeSet::new(),
            failed: batch.paths().map(|p| (p.to_string(), kind.clone())).collect(),
            attempt,
        }
    }

    pub fn record(&mut self, path: impl Into<String>, result: Result<(), ErrorKind>) {
        let path = path.into();
        match result {
            Ok(()) => {
                self.failed.remove(&path);
                self.succeeded.insert(path);
            }
            Err(kind) => {
                self.succeeded.remove(&path);
                self.failed.insert(path, kind);
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Which transport variant executed a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// One stateful session; submissions strictly sequential.
    Interactive,
    /// Stateless per-file writes with bounded concurrency.
    Direct,
}
