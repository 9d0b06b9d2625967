//! Input discovery.
//!
//! Walks the input directory for files with a decodable image extension.
//! Hidden entries (dot-prefixed) are skipped, as is the output directory when
//! it lives inside the input tree. Results are sorted by path so runs are
//! deterministic.

use crate::imaging::supported_input_extensions;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// A source image found under the input root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path as used for reading (input root joined with the relative path).
    pub path: PathBuf,
    /// Forward-slash path relative to the input root, e.g. `marketing/hero.png`.
    pub relative_path: String,
}

impl DiscoveredFile {
    pub fn new(root: &Path, relative_path: impl Into<String>) -> Self {
        let relative_path = relative_path.into();
        Self {
            path: root.join(&relative_path),
            relative_path,
        }
    }

    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }

    /// Directory part of the relative path; empty at the root.
    pub fn relative_dir(&self) -> &str {
        self.relative_path
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .unwrap_or("")
    }

    /// Key under which this file's outcome is stored.
    pub fn key(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| {
            supported_input_extensions()
                .iter()
                .any(|s| s.eq_ignore_ascii_case(e))
        })
}

/// `path` without `.` components, so `./images/out` and `images/out` compare equal.
fn without_cur_dir(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// List every supported image under `root`.
pub fn discover(root: &Path, exclude: &Path) -> Result<Vec<DiscoveredFile>, walkdir::Error> {
    let exclude_lexical = without_cur_dir(exclude);
    let exclude_canonical = exclude.canonicalize().ok();
    let is_excluded = |entry: &walkdir::DirEntry| {
        if !entry.file_type().is_dir() {
            return false;
        }
        without_cur_dir(entry.path()) == exclude_lexical
            || exclude_canonical
                .as_deref()
                .is_some_and(|c| entry.path().canonicalize().is_ok_and(|p| p == c))
    };

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            !hidden && !is_excluded(entry)
        });

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() || !is_supported(entry.path()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push(DiscoveredFile {
            path: entry.path().to_path_buf(),
            relative_path,
        });
    }

    tracing::debug!(root = %root.display(), count = files.len(), "discovered images");
    Ok(files)
}
