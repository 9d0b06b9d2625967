//! Bounded retry with backoff around a single operation.
//!
//! The executor never looks at what the operation does. It only governs the
//! retry envelope: how many attempts, how long to wait between them, and what
//! happens once an error is final.
//!
//! ## Classification
//!
//! Errors carry an explicit [`ErrorKind`] assigned where they originate (see
//! [`Classify`]). Retry decisions are a pure enum check:
//!
//! | Kind | Retryable |
//! |---|---|
//! | `transient_io`, `timeout`, `connection_reset` | yes |
//! | `not_found` (file raced into existence) | yes |
//! | `lfs_in_progress`, `lfs_failed` | yes |
//! | everything else | no |
//!
//! ## Delays
//!
//! Attempts are numbered from 1. After a retryable failure on attempt `n`
//! (and `n < max_retries`) the executor sleeps `base_delay`, or
//! `base_delay * 2^(n-1)` with exponential backoff, before attempt `n + 1`.
//!
//! ## Final errors
//!
//! A non-retryable error, or a retryable one on the last attempt, is appended
//! to the [audit log](crate::audit) with the attempt count. The executor then
//! either hands the error back as a failed [`RetryOutcome`]
//! (`continue_on_error`) or returns [`Aborted`] so the caller stops the batch.

use crate::audit::{ErrorContext, ErrorLog, ErrorLogEntry};
use crate::config::RetryConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::time::Duration;

/// Classification tag for every error the pipeline can see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientIo,
    Timeout,
    ConnectionReset,
    NotFound,
    LfsInProgress,
    LfsFailed,
    PermissionDenied,
    Decode,
    UnsupportedFormat,
    Unreadable,
    OutputFailed,
    Other,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::TransientIo
                | ErrorKind::Timeout
                | ErrorKind::ConnectionReset
                | ErrorKind::NotFound
                | ErrorKind::LfsInProgress
                | ErrorKind::LfsFailed
        )
    }

    /// Stable code written to the audit log.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionReset => "connection_reset",
            ErrorKind::NotFound => "not_found",
            ErrorKind::LfsInProgress => "lfs_in_progress",
            ErrorKind::LfsFailed => "lfs_failed",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Decode => "decode",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::Unreadable => "unreadable",
            ErrorKind::OutputFailed => "output_failed",
            ErrorKind::Other => "other",
        }
    }

    pub fn from_io(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                ErrorKind::ConnectionReset
            }
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => ErrorKind::TransientIo,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => ErrorKind::Unreadable,
            _ => ErrorKind::Other,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Errors that know their own [`ErrorKind`].
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

impl Classify for io::Error {
    fn kind(&self) -> ErrorKind {
        ErrorKind::from_io(io::Error::kind(self))
    }
}

/// Suspension between attempts.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Blocks the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Retry settings, fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub exponential_backoff: bool,
    pub continue_on_error: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            exponential_backoff: config.exponential_backoff,
            continue_on_error: config.continue_on_error,
        }
    }

    /// Delay to wait after a retryable failure on `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.exponential_backoff {
            return self.base_delay;
        }
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// What the operation is and which file it concerns, for logs and audit entries.
#[derive(Debug, Clone, Copy)]
pub struct AttemptContext<'a> {
    pub file: &'a str,
    pub operation: &'a str,
}

/// Result of a completed retry envelope.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// A final error in strict mode: the caller must stop the batch.
#[derive(Debug)]
pub struct Aborted<E> {
    pub error: E,
    pub attempts: u32,
}

impl<E: fmt::Display> fmt::Display for Aborted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (after {} attempt(s))", self.error, self.attempts)
    }
}

pub struct RetryExecutor<'a> {
    policy: RetryPolicy,
    sleeper: &'a dyn Sleeper,
    audit: &'a ErrorLog,
}

impl<'a> RetryExecutor<'a> {
    pub fn new(policy: RetryPolicy, sleeper: &'a dyn Sleeper, audit: &'a ErrorLog) -> Self {
        Self {
            policy,
            sleeper,
            audit,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails fatally, or runs out of attempts.
    ///
    /// The closure receives the 1-based attempt number.
    pub fn run<T, E, F>(
        &self,
        context: &AttemptContext<'_>,
        mut operation: F,
    ) -> Result<RetryOutcome<T, E>, Aborted<E>>
    where
        E: Classify + fmt::Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        let max = self.policy.max_retries.max(1);
        let mut attempt = 1;
        loop {
            let error = match operation(attempt) {
                Ok(result) => {
                    return Ok(RetryOutcome {
                        result: Ok(result),
                        attempts: attempt,
                    });
                }
                Err(e) => e,
            };

            let kind = error.kind();
            if kind.is_retryable() && attempt < max {
                let delay = self.policy.delay_for(attempt);
                tracing::warn!(
                    file = context.file,
                    operation = context.operation,
                    attempt,
                    max_attempts = max,
                    code = kind.code(),
                    delay_ms = delay.as_millis() as u64,
                    "retrying after error: {error}"
                );
                self.sleeper.sleep(delay);
                attempt += 1;
                continue;
            }

            self.record_failure(context, &error, kind, attempt, max);
            if self.policy.continue_on_error {
                return Ok(RetryOutcome {
                    result: Err(error),
                    attempts: attempt,
                });
            }
            return Err(Aborted {
                error,
                attempts: attempt,
            });
        }
    }

    fn record_failure(
        &self,
        context: &AttemptContext<'_>,
        error: &dyn fmt::Display,
        kind: ErrorKind,
        attempt: u32,
        max: u32,
    ) {
        tracing::error!(
            file = context.file,
            operation = context.operation,
            attempt,
            code = kind.code(),
            "giving up: {error}"
        );
        let entry = ErrorLogEntry::new(
            context.file,
            error.to_string(),
            kind.code(),
            ErrorContext {
                attempt,
                max_attempts: max,
                operation: context.operation.to_string(),
            },
        );
        if let Err(e) = self.audit.append(&entry) {
            tracing::error!(log = %self.audit.path().display(), "failed to write audit entry: {e}");
        }
    }
}
