//! Strategy planner: packs classified entries into an ordered list of batches.
//!
//! The plan is a pure function of `(entries, limits, policy)`. Re-running it
//! after a partial failure yields the same partitioning, which is what makes
//! re-runs idempotent.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::error::{ConfigError, PlanError};
use crate::model::{Batch, BatchLimits, Category, FileEntry, PlanWarning, PublishPlan};

/// The policy as given, followed by every category it does not mention in
/// canonical order. Duplicates are rejected.
pub fn effective_policy(policy: &[Category]) -> Result<Vec<Category>, ConfigError> {
    let mut seen = BTreeSet::new();
    for category in policy {
        if !seen.insert(*category) {
            return Err(ConfigError::Invalid(format!(
                "priority_policy lists {category} more than once"
            )));
        }
    }
    let mut effective = policy.to_vec();
    effective.extend(Category::ALL.iter().filter(|c| !seen.contains(*c)));
    Ok(effective)
}

/// Compute the publish plan.
pub fn plan(
    entries: &[FileEntry],
    limits: BatchLimits,
    priority_policy: &[Category],
) -> Result<PublishPlan, PlanError> {
    if entries.is_empty() {
        return Err(PlanError::EmptyTree);
    }
    if limits.max_files_per_batch == 0 || limits.max_bytes_per_batch == 0 {
        return Err(PlanError::InvalidLimits {
            max_files: limits.max_files_per_batch,
            max_bytes: limits.max_bytes_per_batch,
        });
    }
    let policy = effective_policy(priority_policy)?;

    let mut manifest = BTreeMap::new();
    let mut by_category: BTreeMap<Category, Vec<&FileEntry>> = BTreeMap::new();
    for entry in entries {
        if manifest.insert(entry.path.clone(), entry.clone()).is_some() {
            return Err(PlanError::DuplicatePath(entry.path.clone()));
        }
        by_category.entry(entry.category).or_default().push(entry);
    }

    let mut batches = Vec::new();
    let mut warnings = Vec::new();
    for (priority, category) in policy.iter().enumerate() {
        let Some(files) = by_category.get_mut(category) else {
            continue;
        };
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let groups = pack(files, limits);
        let total = groups.len();
        for (seq, (files, oversize)) in groups.into_iter().enumerate() {
            let id = batches.len() as u32 + 1;
            if oversize {
                let file = &files[0];
                warn!(
                    batch_id = id,
                    path = %file.path,
                    size = file.size_bytes,
                    limit = limits.max_bytes_per_batch,
                    "[PLAN] File exceeds the batch payload limit on its own"
                );
                warnings.push(PlanWarning::OversizeSingleFile {
                    batch_id: id,
                    path: file.path.clone(),
                    size_bytes: file.size_bytes,
                    limit: limits.max_bytes_per_batch,
                });
            }
            batches.push(Batch {
                id,
                target_prefix: common_directory(files.iter().map(|f| f.path.as_str())),
                commit_message: format!("Publish {category} files ({}/{total})", seq + 1),
                priority: priority as u32,
                category: *category,
                oversize_single_file: oversize,
                files,
            });
        }
    }

    info!(
        batches = batches.len(),
        files = manifest.len(),
        warnings = warnings.len(),
        "[PLAN] Publish plan computed"
    );
    Ok(PublishPlan {
        batches,
        manifest,
        warnings,
        limits,
        priority_policy: policy,
    })
}

/// Greedy packing of one category's path-sorted files. The flag marks a lone
/// file larger than the payload limit.
fn pack(files: &[&FileEntry], limits: BatchLimits) -> Vec<(Vec<FileEntry>, bool)> {
    let mut groups = Vec::new();
    let mut current: Vec<FileEntry> = Vec::new();
    let mut current_bytes = 0u64;

    for file in files {
        if file.size_bytes > limits.max_bytes_per_batch {
            if !current.is_empty() {
                groups.push((std::mem::take(&mut current), false));
                current_bytes = 0;
            }
            groups.push((vec![(*file).clone()], true));
            continue;
        }
        let would_overflow = current.len() + 1 > limits.max_files_per_batch
            || current_bytes + file.size_bytes > limits.max_bytes_per_batch;
        if !current.is_empty() && would_overflow {
            groups.push((std::mem::take(&mut current), false));
            current_bytes = 0;
        }
        current_bytes += file.size_bytes;
        current.push((*file).clone());
    }
    if !current.is_empty() {
        groups.push((current, false));
    }
    groups
}

/// Deepest directory containing every path, `""` when they only share the root.
pub fn common_directory<'a>(paths: impl IntoIterator<Item = &'a str>) -> String {
    let mut common: Option<Vec<&str>> = None;
    for path in paths {
        let mut dirs: Vec<&str> = path.split('/').collect();
        dirs.pop();
        common = Some(match common {
            None => dirs,
            Some(prev) => prev
                .into_iter()
                .zip(dirs)
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a)
                .collect(),
        });
    }
    common.unwrap_or_default().join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_directory_of_siblings_is_their_parent() {
        assert_eq!(common_directory(["src/a/x.rs", "src/a/y.rs"]), "src/a");
        assert_eq!(common_directory(["src/a/x.rs", "src/b/y.rs"]), "src");
        assert_eq!(common_directory(["src/x.rs", "lib/y.rs"]), "");
        assert_eq!(common_directory(["README.md"]), "");
        assert_eq!(common_directory(["srcx/a.rs", "src/b.rs"]), "");
    }

    #[test]
    fn policy_duplicates_are_rejected() {
        let err = effective_policy(&[Category::Module, Category::Module]).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn unlisted_categories_follow_in_canonical_order() {
        let policy = effective_policy(&[Category::Asset]).unwrap();
        assert_eq!(
            policy,
            vec![
                Category::Asset,
                Category::RootCritical,
                Category::Module,
                Category::Config
            ]
        );
    }
}
