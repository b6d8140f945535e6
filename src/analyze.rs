//! Tree analyzer: turns a [`TreeSource`] listing into classified, hashed
//! [`FileEntry`] values plus per-category statistics.
//!
//! Classification is a pure function of the path, evaluated independently for
//! every file. The scan is all-or-nothing: any unreadable file fails the whole
//! analysis.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info};

use crate::contract::TreeSource;
use crate::error::{ConfigError, ScanError};
use crate::model::{Category, FileEntry};

/// One `pattern → category` rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRule {
    pub pattern: String,
    pub category: Category,
}

impl ClassificationRule {
    pub fn new(pattern: impl Into<String>, category: Category) -> Self {
        Self {
            pattern: pattern.into(),
            category,
        }
    }
}

/// Built-in rules, evaluated in order.
pub fn default_rules() -> Vec<ClassificationRule> {
    vec![
        ClassificationRule::new(
            r"(?i)\.(png|jpe?g|gif|svg|ico|webp|bmp|woff2?|ttf|otf|eot|mp3|mp4|wav|webm|pdf|zip)$",
            Category::Asset,
        ),
        ClassificationRule::new(r"^[^/]+$", Category::RootCritical),
        ClassificationRule::new(
            r"(?i)((^|/)\.[^/]+$|^(config|\.github)/|\.(toml|ya?ml|json|ini|cfg|conf|env|lock)$)",
            Category::Config,
        ),
    ]
}

/// Ordered path-pattern classifier. First matching rule wins; unmatched paths
/// are [`Category::Module`].
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<(Regex, Category)>,
}

impl Classifier {
    pub fn from_rules(rules: &[ClassificationRule]) -> Result<Self, ConfigError> {
        let compiled = rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|re| (re, rule.category))
                    .map_err(|source| ConfigError::Pattern {
                        pattern: rule.pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules: compiled })
    }

    pub fn classify(&self, path: &str) -> Category {
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(path))
            .map(|(_, category)| *category)
            .unwrap_or(Category::Module)
    }
}

impl Default for Classifier {
    fn default() -> Self {
        // The built-in patterns are constant and known to compile.
        let rules = default_rules()
            .into_iter()
            .filter_map(|rule| Regex::new(&rule.pattern).ok().map(|re| (re, rule.category)))
            .collect();
        Self { rules }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub count: usize,
    pub total_bytes: u64,
}

/// Result of one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeAnalysis {
    /// Sorted by path.
    pub entries: Vec<FileEntry>,
    pub summary: BTreeMap<Category, CategoryStats>,
    pub total_files: usize,
    pub total_bytes: u64,
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Scan `source`, classify and hash every file.
pub fn analyze(source: &dyn TreeSource, classifier: &Classifier) -> Result<TreeAnalysis, ScanError> {
    info!("[ANALYZE] Starting tree scan");
    let listed = source.list().map_err(|e| {
        error!(error = %e, "[ANALYZE] Tree source listing failed");
        e
    })?;

    let mut seen = BTreeSet::new();
    let mut entries = Vec::with_capacity(listed.len());
    for file in listed {
        if !seen.insert(file.path.clone()) {
            error!(path = %file.path, "[ANALYZE] Tree source listed a path twice");
            return Err(ScanError::DuplicatePath(file.path));
        }
        let bytes = source.read(&file.path).map_err(|e| {
            error!(path = %file.path, error = %e, "[ANALYZE] Failed to read file");
            e
        })?;
        let category = classifier.classify(&file.path);
        debug!(path = %file.path, %category, size = bytes.len(), "[ANALYZE] Classified file");
        entries.push(FileEntry {
            content_hash: content_hash(&bytes),
            size_bytes: bytes.len() as u64,
            path: file.path,
            category,
        });
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let mut summary: BTreeMap<Category, CategoryStats> = BTreeMap::new();
    for entry in &entries {
        let stats = summary.entry(entry.category).or_default();
        stats.count += 1;
        stats.total_bytes += entry.size_bytes;
    }
    let total_bytes = entries.iter().map(|e| e.size_bytes).sum();

    info!(
        files = entries.len(),
        total_bytes,
        categories = summary.len(),
        "[ANALYZE] Tree scan complete"
    );
    Ok(TreeAnalysis {
        total_files: entries.len(),
        entries,
        summary,
        total_bytes,
    })
}
