//! Append-only error audit log.
//!
//! Every fatal file error, including transient errors that exhausted their
//! retries, is appended here as one JSON object per line. Entries are never
//! rewritten or deleted; the log accumulates across retries, files, and runs.
//!
//! ```text
//! {"timestamp":"2026-10-14T09:12:03Z","file":"images/hero.png","error":{"message":"...","code":"timeout"},"context":{"attempt":3,"max_attempts":3,"operation":"transcode"}}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub timestamp: DateTime<Utc>,
    pub file: String,
    pub error: ErrorDetail,
    pub context: ErrorContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    /// Snake-case [`ErrorKind`](crate::retry::ErrorKind) name.
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// 1-based attempt on which the error became final.
    pub attempt: u32,
    pub max_attempts: u32,
    /// What was being attempted (`transcode`, `lfs_pull`, `stat`, ...).
    pub operation: String,
}

impl ErrorLogEntry {
    pub fn new(
        file: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
        context: ErrorContext,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            file: file.into(),
            error: ErrorDetail {
                message: message.into(),
                code: code.into(),
            },
            context,
        }
    }
}

/// Handle to a JSON-lines audit file.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry as a single line. Creates the file on first use.
    pub fn append(&self, entry: &ErrorLogEntry) -> Result<(), AuditError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Read all entries in write order.
    ///
    /// A missing log yields no entries. Lines that fail to parse are skipped
    /// with a warning rather than failing the whole read.
    pub fn entries(&self) -> Result<Vec<ErrorLogEntry>, AuditError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(
                    log = %self.path.display(),
                    line = n + 1,
                    "skipping malformed audit entry: {e}"
                ),
            }
        }
        Ok(entries)
    }
}
