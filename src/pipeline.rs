//! Batch orchestration.
//!
//! Drives every discovered image through the per-file state machine and
//! records each outcome before moving on:
//!
//! ```text
//! Discovered ─▶ LfsCheck ─┬─▶ LfsPointer                       (pointer, auto_pull off)
//!                         ├─▶ LfsError                         (pull failed / still a pointer)
//!                         └─▶ ChangeCheck ─┬─▶ Skipped         (outputs up to date)
//!                                          └─▶ Transcode ─┬─▶ Processed
//!                                                         └─▶ Error
//! ```
//!
//! Files are processed one at a time in queue order. After each terminal
//! state the outcome is written to the [`StateStore`] and saved, so an
//! interrupted batch loses at most the file that was in flight.
//!
//! ## Output layout
//!
//! Outputs mirror the input tree. For `marketing/hero.png` with formats
//! `[webp, avif]` and sizes `[800]`:
//!
//! ```text
//! optimized/marketing/hero-800.webp
//! optimized/marketing/hero-800.avif
//! ```
//!
//! With no sizes configured a single original-size output is written per
//! format (`hero.webp`).
//!
//! ## Failure modes
//!
//! Whether a fatal file error stops the batch is decided once, from
//! `retry.continue_on_error`, when the [`Pipeline`] is built. In strict mode
//! the failing file is recorded and saved before [`PipelineError::Aborted`]
//! is returned. Per-output write failures mark the file as `error` but never
//! stop the batch: the source was readable, and sibling outputs were written.

use crate::audit::{ErrorContext, ErrorLog, ErrorLogEntry};
use crate::config::OptimizerConfig;
use crate::discover::DiscoveredFile;
use crate::imaging::{ImageBackend, OutputFormat, OutputResult, OutputSpec, Quality, ResizeSpec};
use crate::incremental::{Timestamps, should_process};
use crate::lfs::{LfsClient, LfsError};
use crate::quality::CompiledRules;
use crate::retry::{AttemptContext, Classify, ErrorKind, RetryExecutor, RetryPolicy, Sleeper};
use crate::state::{FileRecord, OutputRecord, RecordStatus, StateError, StateStore};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("State error: {0}")]
    State(#[from] StateError),
    #[error("Invalid quality rule: {0}")]
    Rules(#[from] globset::Error),
    #[error("Aborted on {file} after {attempts} attempt(s) [{kind}]: {message}")]
    Aborted {
        file: String,
        attempts: u32,
        message: String,
        kind: ErrorKind,
        /// Counts up to and including the failing file.
        report: RunReport,
    },
}

/// Where a job is in the per-file state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    /// Outputs already up to date.
    Skipped,
    /// Unresolved LFS pointer left alone.
    LfsPointer,
    LfsError,
    Processed,
    Error,
}

impl JobStatus {
    pub fn label(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Skipped => "skipped",
            JobStatus::LfsPointer => "lfs-pointer",
            JobStatus::LfsError => "lfs-error",
            JobStatus::Processed => "processed",
            JobStatus::Error => "error",
        }
    }

    /// How this outcome is persisted. Pending is never recorded.
    pub fn record_status(self) -> RecordStatus {
        match self {
            JobStatus::Processed | JobStatus::Skipped => RecordStatus::Succeeded,
            JobStatus::LfsPointer => RecordStatus::Skipped,
            JobStatus::Pending | JobStatus::LfsError | JobStatus::Error => RecordStatus::Failed,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutput {
    pub path: PathBuf,
    pub succeeded: bool,
    pub error_message: Option<String>,
}

impl From<OutputResult> for JobOutput {
    fn from(result: OutputResult) -> Self {
        Self {
            succeeded: result.succeeded(),
            path: result.path,
            error_message: result.error,
        }
    }
}

/// One input file moving through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingJob {
    pub input_path: PathBuf,
    pub relative_path: String,
    pub filename: String,
    /// State store key.
    pub key: String,
    pub status: JobStatus,
    pub outputs: Vec<JobOutput>,
    /// Operation attempts made, summed over LFS retrieval and transcoding.
    pub attempts: u32,
    pub error: Option<String>,
}

impl ProcessingJob {
    pub fn new(file: &DiscoveredFile) -> Self {
        Self {
            input_path: file.path.clone(),
            relative_path: file.relative_path.clone(),
            filename: file.file_name().to_string(),
            key: file.key(),
            status: JobStatus::Pending,
            outputs: Vec::new(),
            attempts: 0,
            error: None,
        }
    }

    fn finish(&mut self, status: JobStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
    }

    pub fn to_record(&self) -> FileRecord {
        FileRecord {
            status: self.status.record_status(),
            error: self.error.clone(),
            outputs: self
                .outputs
                .iter()
                .map(|o| OutputRecord {
                    path: o.path.to_string_lossy().to_string(),
                    succeeded: o.succeeded,
                    error: o.error_message.clone(),
                })
                .collect(),
        }
    }
}

/// Observational progress notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Started {
        total: usize,
    },
    Updated {
        current: usize,
        status: JobStatus,
        filename: String,
    },
    Finished,
}

pub trait ProgressSink {
    fn start(&self, total: usize);
    fn update(&self, current: usize, status: JobStatus, filename: &str);
    fn finish(&self);
}

/// Forwards events to a printer thread. A hung-up receiver is ignored.
impl ProgressSink for Sender<ProgressEvent> {
    fn start(&self, total: usize) {
        let _ = self.send(ProgressEvent::Started { total });
    }

    fn update(&self, current: usize, status: JobStatus, filename: &str) {
        let _ = self.send(ProgressEvent::Updated {
            current,
            status,
            filename: filename.to_string(),
        });
    }

    fn finish(&self) {
        let _ = self.send(ProgressEvent::Finished);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn start(&self, _total: usize) {}
    fn update(&self, _current: usize, _status: JobStatus, _filename: &str) {}
    fn finish(&self) {}
}

/// External services the pipeline drives.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub backend: &'a dyn ImageBackend,
    pub lfs: &'a dyn LfsClient,
    pub timestamps: &'a dyn Timestamps,
    pub sleeper: &'a dyn Sleeper,
    pub progress: &'a dyn ProgressSink,
}

/// One output a source image should produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOutput {
    pub path: PathBuf,
    pub format: OutputFormat,
    pub resize: ResizeSpec,
}

/// Output paths for `file`: every format at every size, formats outermost.
pub fn plan_outputs(
    output_dir: &Path,
    file: &DiscoveredFile,
    formats: &[OutputFormat],
    sizes: &[u32],
) -> Vec<PlannedOutput> {
    let stem = Path::new(file.file_name())
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file.file_name().to_string());
    let dir = match file.relative_dir() {
        "" => output_dir.to_path_buf(),
        rel => output_dir.join(rel),
    };
    let resizes: Vec<ResizeSpec> = if sizes.is_empty() {
        vec![ResizeSpec::Original]
    } else {
        sizes.iter().map(|w| ResizeSpec::MaxWidth(*w)).collect()
    };

    let mut planned = Vec::with_capacity(formats.len() * resizes.len());
    for &format in formats {
        for &resize in &resizes {
            let name = match resize {
                ResizeSpec::Original => format!("{stem}.{}", format.extension()),
                ResizeSpec::MaxWidth(w) => format!("{stem}-{w}.{}", format.extension()),
            };
            planned.push(PlannedOutput {
                path: dir.join(name),
                format,
                resize,
            });
        }
    }
    planned
}

/// Counts by terminal state for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub discovered: usize,
    /// Already `succeeded` in the loaded state and not queued.
    pub previously_succeeded: usize,
    pub processed: usize,
    pub skipped: usize,
    pub lfs_pointers: usize,
    pub lfs_errors: usize,
    pub errors: usize,
    pub error_log: PathBuf,
}

impl RunReport {
    fn count(&mut self, status: JobStatus) {
        match status {
            JobStatus::Processed => self.processed += 1,
            JobStatus::Skipped => self.skipped += 1,
            JobStatus::LfsPointer => self.lfs_pointers += 1,
            JobStatus::LfsError => self.lfs_errors += 1,
            JobStatus::Error => self.errors += 1,
            JobStatus::Pending => {}
        }
    }

    pub fn has_errors(&self) -> bool {
        self.errors + self.lfs_errors > 0
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed, {} skipped, {} errored",
            self.processed,
            self.skipped + self.lfs_pointers,
            self.errors + self.lfs_errors
        )
    }
}

/// A fatal file error in strict mode.
struct Halt {
    message: String,
    kind: ErrorKind,
    attempts: u32,
}

pub struct Pipeline<'a> {
    config: &'a OptimizerConfig,
    collaborators: Collaborators<'a>,
    rules: CompiledRules,
    policy: RetryPolicy,
    error_log: ErrorLog,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a OptimizerConfig,
        collaborators: Collaborators<'a>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            config,
            collaborators,
            rules: CompiledRules::new(&config.rules)?,
            policy: RetryPolicy::from_config(&config.retry),
            error_log: ErrorLog::new(&config.state.error_log),
        })
    }

    /// Process every file not already succeeded in `store`.
    pub fn run(
        &self,
        store: &mut StateStore,
        files: &[DiscoveredFile],
    ) -> Result<RunReport, PipelineError> {
        let by_key: HashMap<String, &DiscoveredFile> =
            files.iter().map(|f| (f.key(), f)).collect();
        let keys: Vec<String> = files.iter().map(DiscoveredFile::key).collect();
        let queue = store.resume_queue(&keys);

        let mut report = RunReport {
            discovered: files.len(),
            previously_succeeded: keys.len() - queue.len(),
            error_log: self.error_log.path().to_path_buf(),
            ..RunReport::default()
        };
        tracing::info!(
            discovered = report.discovered,
            queued = queue.len(),
            previously_succeeded = report.previously_succeeded,
            continue_on_error = self.policy.continue_on_error,
            "starting batch"
        );

        store.set_pending(queue.clone());
        store.save()?;

        let progress = self.collaborators.progress;
        progress.start(queue.len());

        for (index, key) in queue.iter().enumerate() {
            let Some(file) = by_key.get(key) else {
                continue;
            };
            let mut job = ProcessingJob::new(file);
            let halted = self.process_file(file, &mut job).err();

            report.count(job.status);
            store.record_processed_file(&job.key, job.to_record());
            store.save()?;
            progress.update(index + 1, job.status, &job.filename);

            if let Some(halt) = halted {
                progress.finish();
                tracing::error!(file = %job.key, "aborting batch");
                return Err(PipelineError::Aborted {
                    file: job.key,
                    attempts: halt.attempts,
                    message: halt.message,
                    kind: halt.kind,
                    report,
                });
            }
        }

        progress.finish();
        tracing::info!(
            processed = report.processed,
            skipped = report.skipped,
            lfs_pointers = report.lfs_pointers,
            errors = report.errors + report.lfs_errors,
            "batch complete"
        );
        Ok(report)
    }

    fn executor(&self) -> RetryExecutor<'_> {
        RetryExecutor::new(self.policy, self.collaborators.sleeper, &self.error_log)
    }

    /// Run one file to a terminal state. `Err` means the batch must stop.
    fn process_file(&self, file: &DiscoveredFile, job: &mut ProcessingJob) -> Result<(), Halt> {
        if self.config.lfs.enabled && !self.resolve_lfs(file, job)? {
            return Ok(());
        }

        let planned = plan_outputs(
            &self.config.output_dir,
            file,
            &self.config.formats,
            &self.config.sizes,
        );
        let paths: Vec<PathBuf> = planned.iter().map(|p| p.path.clone()).collect();
        match should_process(
            self.collaborators.timestamps,
            &file.path,
            &paths,
            self.config.force,
        ) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(file = %job.key, "outputs up to date");
                job.finish(JobStatus::Skipped, None);
                return Ok(());
            }
            Err(e) => {
                let kind = Classify::kind(&e);
                let message = format!("cannot read source timestamp: {e}");
                self.audit(&job.key, &message, kind, "stat", 1);
                job.finish(JobStatus::Error, Some(message.clone()));
                return self.fail(message, kind, 1);
            }
        }

        let width = self.probe_width(file);
        let quality = self.rules.resolve(
            file.file_name(),
            file.relative_dir(),
            width,
            &self.config.quality,
        );
        let specs: Vec<OutputSpec> = planned
            .into_iter()
            .map(|p| OutputSpec {
                quality: quality
                    .get(&p.format)
                    .copied()
                    .map(Quality::new)
                    .unwrap_or_default(),
                path: p.path,
                format: p.format,
                resize: p.resize,
            })
            .collect();

        let context = AttemptContext {
            file: &job.key,
            operation: "transcode",
        };
        let backend = self.collaborators.backend;
        let outcome = match self
            .executor()
            .run(&context, |_| backend.transcode(&file.path, &specs))
        {
            Ok(outcome) => outcome,
            Err(aborted) => {
                job.attempts += aborted.attempts;
                let message = aborted.error.to_string();
                job.finish(JobStatus::Error, Some(message.clone()));
                return Err(Halt {
                    message,
                    kind: aborted.error.kind(),
                    attempts: aborted.attempts,
                });
            }
        };
        job.attempts += outcome.attempts;

        let results = match outcome.result {
            Ok(results) => results,
            Err(e) => {
                job.finish(JobStatus::Error, Some(e.to_string()));
                return Ok(());
            }
        };
        job.outputs = results.into_iter().map(JobOutput::from).collect();

        let failed: Vec<&JobOutput> = job.outputs.iter().filter(|o| !o.succeeded).collect();
        if failed.is_empty() {
            tracing::debug!(file = %job.key, outputs = job.outputs.len(), "processed");
            job.finish(JobStatus::Processed, None);
            return Ok(());
        }
        for output in &failed {
            let message = format!(
                "{}: {}",
                output.path.display(),
                output.error_message.as_deref().unwrap_or("unknown error")
            );
            self.audit(
                &job.key,
                &message,
                ErrorKind::OutputFailed,
                "transcode",
                outcome.attempts,
            );
        }
        let message = format!("{} of {} outputs failed", failed.len(), job.outputs.len());
        job.finish(JobStatus::Error, Some(message));
        Ok(())
    }

    /// LFS stage. `Ok(true)` when the file holds real content and should continue.
    fn resolve_lfs(&self, file: &DiscoveredFile, job: &mut ProcessingJob) -> Result<bool, Halt> {
        let lfs = self.collaborators.lfs;
        match lfs.is_pointer(&file.path) {
            Ok(false) => return Ok(true),
            Ok(true) => {}
            Err(e) => {
                // The change check stats the input and reports it properly.
                tracing::debug!(file = %job.key, "pointer check failed: {e}");
                return Ok(true);
            }
        }

        if !self.config.lfs.auto_pull {
            tracing::info!(file = %job.key, "skipping LFS pointer");
            job.finish(JobStatus::LfsPointer, None);
            return Ok(false);
        }

        let context = AttemptContext {
            file: &job.key,
            operation: "lfs_pull",
        };
        let pulled = self.executor().run(&context, |_| {
            lfs.pull(&file.path)?;
            if lfs.is_pointer(&file.path)? {
                return Err(LfsError::StillPointer(file.path.clone()));
            }
            Ok(())
        });
        match pulled {
            Ok(outcome) => {
                job.attempts += outcome.attempts;
                match outcome.result {
                    Ok(()) => Ok(true),
                    Err(e) => {
                        job.finish(JobStatus::LfsError, Some(e.to_string()));
                        Ok(false)
                    }
                }
            }
            Err(aborted) => {
                job.attempts += aborted.attempts;
                let message = aborted.error.to_string();
                job.finish(JobStatus::LfsError, Some(message.clone()));
                Err(Halt {
                    message,
                    kind: aborted.error.kind(),
                    attempts: aborted.attempts,
                })
            }
        }
    }

    /// Probed width, only when some rule has a width predicate.
    fn probe_width(&self, file: &DiscoveredFile) -> Option<u32> {
        if !self.rules.needs_width() {
            return None;
        }
        match self.collaborators.backend.identify(&file.path) {
            Ok(dims) => Some(dims.width),
            Err(e) => {
                tracing::debug!(file = %file.relative_path, "width probe failed: {e}");
                None
            }
        }
    }

    /// Fatal-for-file outcome outside the retry executor.
    fn fail(&self, message: String, kind: ErrorKind, attempts: u32) -> Result<(), Halt> {
        if self.policy.continue_on_error {
            return Ok(());
        }
        Err(Halt {
            message,
            kind,
            attempts,
        })
    }

    fn audit(&self, file: &str, message: &str, kind: ErrorKind, operation: &str, attempt: u32) {
        tracing::error!(file, operation, code = kind.code(), "{message}");
        let entry = ErrorLogEntry::new(
            file,
            message,
            kind.code(),
            ErrorContext {
                attempt,
                max_attempts: self.policy.max_retries,
                operation: operation.to_string(),
            },
        );
        if let Err(e) = self.error_log.append(&entry) {
            tracing::error!(log = %self.error_log.path().display(), "failed to write audit entry: {e}");
        }
    }
}
