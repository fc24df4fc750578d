//! Resolution of per-project index directories.
//!
//! Persisted indices live in versioned directories under the embeddings
//! root, named `<project>_<integer>`. The integer is a generation counter:
//! a rebuilt index can land in `<project>_2` while `<project>_1` is torn
//! down, and the resolver picks up whichever generation exists.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Returns the existing versioned directory for `project`, or `None` if
/// no generation directory exists yet.
pub fn resolve_index_dir(embeddings_root: &Path, project: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(embeddings_root).ok()?;
    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if is_generation_dir(name, project) {
            return Some(entry.path());
        }
    }
    None
}

/// Returns the project's versioned directory, creating generation 1 if
/// none exists.
pub fn ensure_index_dir(embeddings_root: &Path, project: &str) -> Result<PathBuf> {
    if let Some(dir) = resolve_index_dir(embeddings_root, project) {
        return Ok(dir);
    }
    let dir = embeddings_root.join(format!("{}_1", project));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create index directory {}", dir.display()))?;
    Ok(dir)
}

/// True when a directory is non-existent or holds no entries.
pub fn dir_is_empty(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

fn is_generation_dir(dir_name: &str, project: &str) -> bool {
    match dir_name.strip_prefix(project) {
        Some(rest) => match rest.strip_prefix('_') {
            Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
            None => false,
        },
        None => false,
    }
}
