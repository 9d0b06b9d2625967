//! Git LFS pointer detection and retrieval.
//!
//! Repositories that store images in Git LFS check out small text
//! placeholders until the real content is pulled:
//!
//! ```text
//! version https://git-lfs.github.com/spec/v1
//! oid sha256:4d7a214614ab2935c943f9e0ff69d22eadbb8f32b1258daaa5e2ca24d17e2393
//! size 12345
//! ```
//!
//! Feeding one of these to the decoder would produce a confusing decode
//! error, so the pipeline checks for pointers first and optionally asks
//! `git lfs` to fetch the object.

use crate::retry::{Classify, ErrorKind};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// First line of every LFS pointer file.
const POINTER_HEADER: &[u8] = b"version https://git-lfs.github.com/spec/v1";

/// Pointer files are tiny; anything larger is real content.
const MAX_POINTER_SIZE: u64 = 1024;

#[derive(Error, Debug)]
pub enum LfsError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("git-lfs is not available: {0}")]
    Unavailable(io::Error),
    #[error("git lfs pull failed for {path}: {stderr}")]
    PullFailed { path: PathBuf, stderr: String },
    #[error("another git-lfs operation is in progress for {0}")]
    InProgress(PathBuf),
    #[error("{0} is still an LFS pointer after pull")]
    StillPointer(PathBuf),
}

impl Classify for LfsError {
    fn kind(&self) -> ErrorKind {
        match self {
            LfsError::Io(e) => Classify::kind(e),
            LfsError::Unavailable(_) => ErrorKind::Other,
            LfsError::PullFailed { .. } | LfsError::StillPointer(_) => ErrorKind::LfsFailed,
            LfsError::InProgress(_) => ErrorKind::LfsInProgress,
        }
    }
}

/// Pointer detection and object retrieval.
pub trait LfsClient {
    fn is_pointer(&self, path: &Path) -> Result<bool, LfsError>;
    fn pull(&self, path: &Path) -> Result<(), LfsError>;
}

/// Check whether `path` is an LFS pointer rather than real content.
pub fn is_lfs_pointer(path: &Path) -> io::Result<bool> {
    let file = File::open(path)?;
    if file.metadata()?.len() > MAX_POINTER_SIZE {
        return Ok(false);
    }
    let mut head = Vec::with_capacity(POINTER_HEADER.len());
    file.take(POINTER_HEADER.len() as u64).read_to_end(&mut head)?;
    Ok(head == POINTER_HEADER)
}

/// Shells out to `git lfs pull --include <path>` from a working directory.
#[derive(Debug, Clone)]
pub struct GitLfs {
    workdir: PathBuf,
}

impl GitLfs {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

impl LfsClient for GitLfs {
    fn is_pointer(&self, path: &Path) -> Result<bool, LfsError> {
        Ok(is_lfs_pointer(path)?)
    }

    fn pull(&self, path: &Path) -> Result<(), LfsError> {
        let include = path.strip_prefix(&self.workdir).unwrap_or(path);
        tracing::info!(path = %include.display(), "pulling LFS object");
        let output = Command::new("git")
            .args(["lfs", "pull", "--include"])
            .arg(include)
            .current_dir(&self.workdir)
            .output()
            .map_err(LfsError::Unavailable)?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        // git reports a concurrent fetch through its lock file.
        if stderr.contains(".lock") {
            return Err(LfsError::InProgress(path.to_path_buf()));
        }
        Err(LfsError::PullFailed {
            path: path.to_path_buf(),
            stderr,
        })
    }
}
