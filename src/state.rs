//! Resumable run state.
//!
//! Large batches fail partway: a corrupt source, a flaky network mount, a
//! Ctrl-C. This module records the outcome of every file as soon as it is
//! known, so a later run can pick up where the last one stopped instead of
//! starting over.
//!
//! # Design
//!
//! The state is one JSON document ([`OptimizationState`]) holding a snapshot
//! of the run configuration, a map of per-file outcomes keyed by input path,
//! and the queue of files still pending. After every file the whole document
//! is rewritten: it is serialized to a sibling `.tmp` file and renamed over
//! the target, so an interruption leaves either the previous or the new
//! document, never a partial one.
//!
//! `progress` counters are never taken from callers. They are recomputed from
//! the `files` map on every save, so the two cannot drift.
//!
//! ## Versioning
//!
//! Documents carry a format version. A document with any other version is
//! ignored with a warning and the run starts from scratch.
//!
//! ## Resume
//!
//! Only `succeeded` records are treated as done. Skipped LFS pointers and
//! failures are re-examined on the next run.

use crate::audit::{AuditError, ErrorLog, ErrorLogEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Version of the state document format. Bump this to invalidate existing
/// state files when the format changes.
pub const STATE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Audit log error: {0}")]
    Audit(#[from] AuditError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// All outputs exist and are current.
    Succeeded,
    /// Deliberately not processed (e.g. an unresolved LFS pointer).
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub path: String,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome recorded for one input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub outputs: Vec<OutputRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileTable {
    pub processed: BTreeMap<String, FileRecord>,
    pub pending: Vec<String>,
}

/// The persisted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationState {
    pub version: u32,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub configuration: serde_json::Value,
    pub progress: Progress,
    pub files: FileTable,
}

impl OptimizationState {
    pub fn new(configuration: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            version: STATE_VERSION,
            started_at: now,
            last_updated_at: now,
            configuration,
            progress: Progress::default(),
            files: FileTable::default(),
        }
    }

    /// Progress derived from the file table.
    pub fn compute_progress(&self) -> Progress {
        let processed = self.files.processed.len();
        let count = |status| {
            self.files
                .processed
                .values()
                .filter(|r| r.status == status)
                .count()
        };
        // A failed file queued for another attempt is already counted as processed.
        let remaining = self
            .files
            .pending
            .iter()
            .filter(|p| !self.files.processed.contains_key(*p))
            .count();
        Progress {
            total: processed + remaining,
            processed,
            succeeded: count(RecordStatus::Succeeded),
            failed: count(RecordStatus::Failed),
            remaining,
        }
    }
}

/// Read a state document. `Ok(None)` when absent, stale, or unreadable JSON.
pub fn read_state(path: &Path) -> Result<Option<OptimizationState>, StateError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let value: serde_json::Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(path = %path.display(), "ignoring unreadable state file: {e}");
            return Ok(None);
        }
    };
    let version = value.get("version").and_then(|v| v.as_u64());
    if version != Some(STATE_VERSION as u64) {
        tracing::warn!(
            path = %path.display(),
            found = ?version,
            expected = STATE_VERSION,
            "ignoring state file with a different format version"
        );
        return Ok(None);
    }
    match serde_json::from_value(value) {
        Ok(state) => Ok(Some(state)),
        Err(e) => {
            tracing::warn!(path = %path.display(), "ignoring malformed state file: {e}");
            Ok(None)
        }
    }
}

/// Counts derived from the recorded outcomes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Percentage of recorded files that succeeded, one decimal place.
    pub success_rate: f64,
}

/// On-demand audit view of the state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateReport {
    pub summary: ReportSummary,
    pub errors: Vec<ErrorLogEntry>,
    pub error_log_path: PathBuf,
}

/// Owns the in-memory state and its file.
pub struct StateStore {
    path: PathBuf,
    error_log: ErrorLog,
    state: OptimizationState,
}

impl StateStore {
    /// A fresh, unsaved state.
    pub fn new(
        path: impl Into<PathBuf>,
        error_log: impl Into<PathBuf>,
        configuration: serde_json::Value,
    ) -> Self {
        Self {
            path: path.into(),
            error_log: ErrorLog::new(error_log),
            state: OptimizationState::new(configuration),
        }
    }

    /// Continue from the saved state if there is a usable one, else start fresh.
    ///
    /// The configuration snapshot is replaced with the current run's.
    pub fn resume(
        path: impl Into<PathBuf>,
        error_log: impl Into<PathBuf>,
        configuration: serde_json::Value,
    ) -> Result<Self, StateError> {
        let mut store = Self::new(path, error_log, configuration);
        if let Some(mut loaded) = store.load()? {
            tracing::info!(
                path = %store.path.display(),
                recorded = loaded.files.processed.len(),
                pending = loaded.files.pending.len(),
                "resuming from saved state"
            );
            loaded.configuration = store.state.configuration.take();
            store.state = loaded;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &OptimizationState {
        &self.state
    }

    pub fn load(&self) -> Result<Option<OptimizationState>, StateError> {
        read_state(&self.path)
    }

    /// Recompute progress and atomically replace the state file.
    pub fn save(&mut self) -> Result<(), StateError> {
        self.state.progress = self.state.compute_progress();
        self.state.last_updated_at = Utc::now();

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.state)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let mut file = File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Delete the state file and reset the in-memory state.
    pub fn clear(&mut self) -> Result<(), StateError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let configuration = self.state.configuration.take();
        self.state = OptimizationState::new(configuration);
        Ok(())
    }

    /// Record (or overwrite) the outcome for `path` and drop it from the queue.
    pub fn record_processed_file(&mut self, path: &str, record: FileRecord) {
        self.state.files.pending.retain(|p| p != path);
        self.state.files.processed.insert(path.to_string(), record);
    }

    /// Whether `path` already succeeded and can be left alone.
    pub fn is_file_processed(&self, path: &str) -> bool {
        self.state
            .files
            .processed
            .get(path)
            .is_some_and(|r| r.status == RecordStatus::Succeeded)
    }

    pub fn set_pending(&mut self, pending: Vec<String>) {
        self.state.files.pending = pending;
    }

    /// Order in which `candidates` should be processed on this run.
    ///
    /// Files still queued from the saved state come first, in their saved
    /// order, followed by the rest in discovery order. Succeeded files and
    /// saved entries that are no longer candidates are dropped.
    pub fn resume_queue(&self, candidates: &[String]) -> Vec<String> {
        let known: HashSet<&str> = candidates.iter().map(String::as_str).collect();
        let mut queued = HashSet::new();
        let mut queue = Vec::new();

        let saved = self.state.files.pending.iter().map(String::as_str);
        for path in saved
            .filter(|p| known.contains(p))
            .chain(candidates.iter().map(String::as_str))
        {
            if self.is_file_processed(path) || !queued.insert(path) {
                continue;
            }
            queue.push(path.to_string());
        }
        queue
    }

    pub fn error_log(&self) -> &ErrorLog {
        &self.error_log
    }

    /// Summarize recorded outcomes and list the raw audit entries.
    pub fn generate_report(&self) -> Result<StateReport, StateError> {
        let records = &self.state.files.processed;
        let count = |status| records.values().filter(|r| r.status == status).count();
        let total = records.len();
        let succeeded = count(RecordStatus::Succeeded);
        let success_rate = if total == 0 {
            0.0
        } else {
            (succeeded as f64 / total as f64 * 1000.0).round() / 10.0
        };
        Ok(StateReport {
            summary: ReportSummary {
                total,
                succeeded,
                skipped: count(RecordStatus::Skipped),
                failed: count(RecordStatus::Failed),
                success_rate,
            },
            errors: self.error_log.entries()?,
            error_log_path: self.error_log.path().to_path_buf(),
        })
    }
}
