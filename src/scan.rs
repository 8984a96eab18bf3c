//! File discovery for ingestion.
//!
//! A directory is walked recursively in sorted order; hidden entries and
//! `.git` are always skipped, and configured exclude globs are matched
//! against the root-relative path. A single file is returned as-is.
//!
//! Units are identified by file name only, see
//! [`source_file_for`](crate::identity::source_file_for).

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::error::{IndexError, Result};
use crate::identity::source_file_for;

/// Files found under an ingestion root.
#[derive(Debug, Clone)]
pub struct Scan {
    pub root: PathBuf,
    pub files: Vec<PathBuf>,
}

impl Scan {
    pub fn source_file(&self, path: &Path) -> String {
        source_file_for(path)
    }

    /// Path of `path` below the scan root, with `/` separators.
    pub fn relative(&self, path: &Path) -> String {
        relative_path(&self.root, path)
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    let parts: Vec<String> = path
        .strip_prefix(root)
        .map(|rel| {
            rel.components()
                .filter_map(|c| match c {
                    Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    if parts.is_empty() {
        source_file_for(path)
    } else {
        parts.join("/")
    }
}

pub fn build_excludes(patterns: &[String]) -> Result<GlobSet> {
    let mut default_excludes = vec!["**/.git/**".to_string()];
    default_excludes.extend(patterns.iter().cloned());

    let mut builder = GlobSetBuilder::new();
    for pattern in &default_excludes {
        let glob = Glob::new(pattern)
            .map_err(|e| IndexError::Config(format!("exclude glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| IndexError::Config(e.to_string()))
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

/// Lists the files to ingest under `path`.
///
/// Fails with `NotFound` when `path` does not exist. Unreadable directory
/// entries are logged and skipped.
pub fn scan_path(path: &Path, excludes: &GlobSet) -> Result<Scan> {
    if !path.exists() {
        return Err(IndexError::NotFound(path.display().to_string()));
    }
    if path.is_file() {
        return Ok(Scan {
            root: path.to_path_buf(),
            files: vec![path.to_path_buf()],
        });
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let rel_str = relative_path(path, entry.path());
        if excludes.is_match(&rel_str) {
            continue;
        }
        files.push(entry.into_path());
    }

    // Sort for deterministic ordering
    files.sort_by_key(|f| relative_path(path, f));

    Ok(Scan {
        root: path.to_path_buf(),
        files,
    })
}
