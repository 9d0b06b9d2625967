//! Shared test doubles for the imgopt test suite.
//!
//! Each double records what it was asked to do behind a `Mutex`, so tests can
//! hand out `&dyn Trait` references and still inspect calls afterwards.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let timestamps = MockTimestamps::new()
//!     .with("images/a.png", at(100))
//!     .with("out/a.webp", at(200));
//! let lfs = MockLfs::new().with_pointer("b.png");
//! let sleeper = RecordingSleeper::default();
//! ```
//!
//! The image backend double lives next to its trait, in
//! `imaging::backend::tests::MockBackend`.

use crate::incremental::Timestamps;
use crate::lfs::{LfsClient, LfsError};
use crate::pipeline::{JobStatus, ProgressEvent, ProgressSink};
use crate::retry::{Classify, ErrorKind, Sleeper};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

// =========================================================================
// Errors
// =========================================================================

/// An error that is nothing but its classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeError(pub ErrorKind);

impl fmt::Display for FakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fake {} error", self.0)
    }
}

impl Classify for FakeError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

// =========================================================================
// Sleeper
// =========================================================================

/// Records requested delays instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

// =========================================================================
// Timestamps
// =========================================================================

/// In-memory modification times. Unknown paths are `NotFound`.
#[derive(Default)]
pub struct MockTimestamps {
    times: HashMap<PathBuf, SystemTime>,
}

impl MockTimestamps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<PathBuf>, mtime: SystemTime) -> Self {
        self.times.insert(path.into(), mtime);
        self
    }
}

impl Timestamps for MockTimestamps {
    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        self.times.get(path).copied().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no mock timestamp for {}", path.display()),
            )
        })
    }
}

// =========================================================================
// LFS
// =========================================================================

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Scripted LFS client keyed by file name.
///
/// A successful pull turns a pointer into real content unless the file was
/// marked [`unresolvable`](MockLfs::unresolvable).
#[derive(Default)]
pub struct MockLfs {
    pointers: Mutex<HashSet<String>>,
    unresolvable: HashSet<String>,
    pull_errors: Mutex<HashMap<String, VecDeque<LfsError>>>,
    pulls: Mutex<Vec<String>>,
}

impl MockLfs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pointer(self, file: &str) -> Self {
        self.pointers.lock().unwrap().insert(file.to_string());
        self
    }

    /// Pulls report success but leave the pointer in place.
    pub fn unresolvable(mut self, file: &str) -> Self {
        self.unresolvable.insert(file.to_string());
        self
    }

    /// Queue errors returned by the next pulls of `file`.
    pub fn failing_pull(self, file: &str, errors: Vec<LfsError>) -> Self {
        self.pull_errors
            .lock()
            .unwrap()
            .insert(file.to_string(), errors.into());
        self
    }

    /// File names passed to `pull`, one per call.
    pub fn pulls(&self) -> Vec<String> {
        self.pulls.lock().unwrap().clone()
    }
}

impl LfsClient for MockLfs {
    fn is_pointer(&self, path: &Path) -> Result<bool, LfsError> {
        Ok(self.pointers.lock().unwrap().contains(&file_name(path)))
    }

    fn pull(&self, path: &Path) -> Result<(), LfsError> {
        let name = file_name(path);
        self.pulls.lock().unwrap().push(name.clone());
        if let Some(err) = self
            .pull_errors
            .lock()
            .unwrap()
            .get_mut(&name)
            .and_then(|queue| queue.pop_front())
        {
            return Err(err);
        }
        if !self.unresolvable.contains(&name) {
            self.pointers.lock().unwrap().remove(&name);
        }
        Ok(())
    }
}

// =========================================================================
// Progress
// =========================================================================

#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn start(&self, total: usize) {
        self.events
            .lock()
            .unwrap()
            .push(ProgressEvent::Started { total });
    }

    fn update(&self, current: usize, status: JobStatus, filename: &str) {
        self.events.lock().unwrap().push(ProgressEvent::Updated {
            current,
            status,
            filename: filename.to_string(),
        });
    }

    fn finish(&self) {
        self.events.lock().unwrap().push(ProgressEvent::Finished);
    }
}
