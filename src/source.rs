//! Filesystem-backed [`TreeSource`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::contract::{SourceFile, TreeSource};
use crate::error::{io_err, ScanError};

/// Directories never published, whatever the configuration says.
pub const ALWAYS_EXCLUDED: [&str; 3] = [".git", "target", "node_modules"];

/// Walks a local directory. Paths are reported relative to the root with `/`
/// separators, sorted.
#[derive(Debug, Clone)]
pub struct FsTreeSource {
    root: PathBuf,
    exclude: BTreeSet<String>,
}

impl FsTreeSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exclude: ALWAYS_EXCLUDED.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Also skip directories or files with any of these names.
    pub fn with_excludes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn visit_dir(&self, dir: &Path, results: &mut Vec<SourceFile>) -> Result<(), ScanError> {
        let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
        for entry_res in entries {
            let entry = entry_res.map_err(|e| io_err(dir, e))?;
            let path = entry.path();
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if self.exclude.contains(file_name.as_ref()) {
                debug!(path = %path.display(), "Skipping excluded entry");
                continue;
            }
            let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
            if file_type.is_dir() {
                self.visit_dir(&path, results)?;
            } else if file_type.is_file() {
                let meta = entry.metadata().map_err(|e| io_err(&path, e))?;
                results.push(SourceFile {
                    path: self.relative(&path)?,
                    size_bytes: meta.len(),
                });
            } else {
                debug!(path = %path.display(), "Skipping non-regular file");
            }
        }
        Ok(())
    }

    fn relative(&self, path: &Path) -> Result<String, ScanError> {
        let rel = path
            .strip_prefix(&self.root)
            .map_err(|_| ScanError::UnknownFile(path.display().to_string()))?;
        let mut segments = Vec::new();
        for comp in rel.components() {
            let seg = comp
                .as_os_str()
                .to_str()
                .ok_or_else(|| ScanError::NonUtf8Path(path.to_path_buf()))?;
            segments.push(seg);
        }
        Ok(segments.join("/"))
    }

    /// Reject anything that could escape the root.
    fn resolve(&self, rel: &str) -> Result<PathBuf, ScanError> {
        if rel.is_empty()
            || rel.starts_with('/')
            || rel.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
        {
            return Err(ScanError::UnknownFile(rel.to_string()));
        }
        Ok(rel.split('/').fold(self.root.clone(), |acc, seg| acc.join(seg)))
    }
}

impl TreeSource for FsTreeSource {
    fn list(&self) -> Result<Vec<SourceFile>, ScanError> {
        info!(root = %self.root.display(), "[SCAN] Listing tree");
        if !self.root.is_dir() {
            error!(root = %self.root.display(), "[SCAN] Root is not a directory");
            return Err(ScanError::NotADirectory(self.root.clone()));
        }
        let mut files = Vec::new();
        if let Err(e) = self.visit_dir(&self.root, &mut files) {
            error!(error = %e, "[SCAN] Walking the tree failed");
            return Err(e);
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        info!(count = files.len(), "[SCAN] Tree listed");
        Ok(files)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, ScanError> {
        let full = self.resolve(path)?;
        std::fs::read(&full).map_err(|e| io_err(full, e))
    }
}
