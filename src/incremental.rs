//! Change detection for incremental runs.
//!
//! A source image may be skipped only when every output it should produce
//! already exists and is at least as new as the source. Anything else (a
//! missing output, an output older than its source, an output whose timestamp
//! cannot be read) means the file is reprocessed.
//!
//! Timestamps are read through [`Timestamps`] so the decision logic can be
//! exercised without touching the filesystem.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Source of last-modified times.
pub trait Timestamps {
    /// Last-modified time of `path`. Fails with `NotFound` when absent.
    fn modified(&self, path: &Path) -> io::Result<SystemTime>;
}

/// Reads modification times from filesystem metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsTimestamps;

impl Timestamps for FsTimestamps {
    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        std::fs::metadata(path)?.modified()
    }
}

/// Decide whether `input` needs processing.
///
/// Returns an error only when the input's own timestamp cannot be read.
pub fn should_process(
    timestamps: &dyn Timestamps,
    input: &Path,
    expected_outputs: &[PathBuf],
    force: bool,
) -> io::Result<bool> {
    if force {
        return Ok(true);
    }
    let input_mtime = timestamps.modified(input)?;
    if expected_outputs.is_empty() {
        return Ok(true);
    }
    for output in expected_outputs {
        match timestamps.modified(output) {
            Ok(mtime) if mtime >= input_mtime => {}
            Ok(_) => {
                tracing::debug!(input = %input.display(), output = %output.display(), "output older than source");
                return Ok(true);
            }
            Err(_) => {
                tracing::debug!(input = %input.display(), output = %output.display(), "output missing");
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockTimestamps;
    use filetime::{FileTime, set_file_mtime};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn outputs(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn all_outputs_newer_skips() {
        let ts = MockTimestamps::new()
            .with("in.png", at(100))
            .with("a.webp", at(200))
            .with("a.avif", at(150));
        let result =
            should_process(&ts, Path::new("in.png"), &outputs(&["a.webp", "a.avif"]), false);
        assert!(!result.unwrap());
    }

    #[test]
    fn equal_mtime_counts_as_fresh() {
        let ts = MockTimestamps::new()
            .with("in.png", at(100))
            .with("a.webp", at(100));
        assert!(!should_process(&ts, Path::new("in.png"), &outputs(&["a.webp"]), false).unwrap());
    }

    #[test]
    fn one_older_output_reprocesses() {
        let ts = MockTimestamps::new()
            .with("in.png", at(100))
            .with("a.webp", at(200))
            .with("a.avif", at(99));
        assert!(
            should_process(&ts, Path::new("in.png"), &outputs(&["a.webp", "a.avif"]), false)
                .unwrap()
        );
    }

    #[test]
    fn missing_output_reprocesses() {
        let ts = MockTimestamps::new()
            .with("in.png", at(100))
            .with("a.webp", at(200));
        assert!(
            should_process(&ts, Path::new("in.png"), &outputs(&["a.webp", "a.avif"]), false)
                .unwrap()
        );
    }

    #[test]
    fn force_always_processes() {
        let ts = MockTimestamps::new()
            .with("in.png", at(100))
            .with("a.webp", at(200));
        assert!(should_process(&ts, Path::new("in.png"), &outputs(&["a.webp"]), true).unwrap());
    }

    #[test]
    fn force_does_not_stat_input() {
        let ts = MockTimestamps::new();
        assert!(should_process(&ts, Path::new("gone.png"), &[], true).unwrap());
    }

    #[test]
    fn missing_input_is_error() {
        let ts = MockTimestamps::new().with("a.webp", at(200));
        let err = should_process(&ts, Path::new("gone.png"), &outputs(&["a.webp"]), false)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn no_expected_outputs_processes() {
        let ts = MockTimestamps::new().with("in.png", at(100));
        assert!(should_process(&ts, Path::new("in.png"), &[], false).unwrap());
    }

    // =========================================================================
    // Filesystem timestamps
    // =========================================================================

    #[test]
    fn fs_timestamps_compare_real_files() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("in.png");
        let output = tmp.path().join("in.webp");
        fs::write(&input, b"src").unwrap();
        fs::write(&output, b"out").unwrap();

        set_file_mtime(&input, FileTime::from_unix_time(1_000, 0)).unwrap();
        set_file_mtime(&output, FileTime::from_unix_time(2_000, 0)).unwrap();
        assert!(!should_process(&FsTimestamps, &input, &[output.clone()], false).unwrap());

        set_file_mtime(&input, FileTime::from_unix_time(3_000, 0)).unwrap();
        assert!(should_process(&FsTimestamps, &input, &[output], false).unwrap());
    }

    #[test]
    fn fs_timestamps_missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = FsTimestamps
            .modified(&tmp.path().join("nope.png"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
