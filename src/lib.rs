//! # imgopt
//!
//! Incremental, resumable batch image optimizer. Point it at a directory of
//! source images and it writes optimized copies in every configured format,
//! skipping inputs whose outputs are already current and recording every
//! outcome so an interrupted batch can pick up where it stopped.
//!
//! # Architecture: One File at a Time
//!
//! Each discovered image moves through a small state machine, and its outcome
//! is persisted before the next image starts:
//!
//! ```text
//! discover  images/  →  queue           (walkdir, hidden entries skipped)
//! lfs       pointer? →  pull / skip     (git lfs, retried)
//! detect    mtimes   →  skip / process  (outputs newer than source = skip)
//! resolve   rules    →  quality map     (most specific rule wins)
//! transcode source   →  outputs         (retried with backoff)
//! record    outcome  →  .imgopt-state.json
//! ```
//!
//! Sequential processing keeps progress counters and state writes
//! deterministic. The retry backoff sleep is the only suspension point.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | Loads `imgopt.toml`, merges it over stock defaults, validates |
//! | [`discover`] | Walks the input directory for decodable images |
//! | [`lfs`] | Git LFS pointer detection and `git lfs pull` retrieval |
//! | [`incremental`] | Timestamp-based change detection |
//! | [`quality`] | Per-file quality resolution from override rules |
//! | [`retry`] | Error classification and the bounded retry executor |
//! | [`audit`] | Append-only JSON-lines error log |
//! | [`state`] | Resumable run state, saved atomically after every file |
//! | [`pipeline`] | Orchestrates the per-file state machine and the run report |
//! | [`imaging`] | Transcoding backend trait and the pure-Rust implementation |
//! | [`output`] | CLI formatting of progress and reports |
//!
//! # Failure Model
//!
//! Errors are tagged with an [`ErrorKind`](retry::ErrorKind) where they
//! originate. Transient kinds (timeouts, resets, LFS contention) are retried;
//! anything else is final for that file. By default the first final error
//! aborts the batch after its outcome is saved. With `continue_on_error` the
//! failure is recorded and the batch moves on. Either way every final error
//! lands in the audit log, and a later `--resume` run re-examines only the
//! files that did not succeed.

pub mod audit;
pub mod config;
pub mod discover;
pub mod imaging;
pub mod incremental;
pub mod lfs;
pub mod output;
pub mod pipeline;
pub mod quality;
pub mod retry;
pub mod state;

#[cfg(test)]
pub(crate) mod test_helpers;
