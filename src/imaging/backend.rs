//! Transcoding backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations the pipeline needs:
//! identify (probe dimensions) and transcode (one source, many outputs).
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend): pure Rust, statically
//! linked.
//!
//! ## Failure contract
//!
//! `transcode` returns `Err` only when the source itself cannot be read or
//! decoded; nothing can be produced in that case and the retry policy decides
//! what happens next. A failure to write one output is reported in that
//! output's [`OutputResult`] and does not affect its siblings.

use super::params::OutputSpec;
use crate::retry::{Classify, ErrorKind};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Encoding failed: {0}")]
    Encode(String),
}

impl Classify for BackendError {
    fn kind(&self) -> ErrorKind {
        match self {
            BackendError::Io(e) => Classify::kind(e),
            BackendError::Decode { .. } => ErrorKind::Decode,
            BackendError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            BackendError::Encode(_) => ErrorKind::OutputFailed,
        }
    }
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Outcome for one requested output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputResult {
    pub path: PathBuf,
    pub error: Option<String>,
}

impl OutputResult {
    pub fn ok(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            error: None,
        }
    }

    pub fn failed(path: impl Into<PathBuf>, error: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            error: Some(error.into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Trait for transcoding backends.
pub trait ImageBackend {
    /// Get image dimensions without a full decode where possible.
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError>;

    /// Decode `source` once and write every requested output.
    ///
    /// Results are returned in the order of `outputs`.
    fn transcode(
        &self,
        source: &Path,
        outputs: &[OutputSpec],
    ) -> Result<Vec<OutputResult>, BackendError>;
}
