//! Per-action retry loop around fallible destination writes.
//!
//! A failing action is reported to a decision provider, which answers
//! with Retry or Abort. The provider call blocks the export worker (a
//! human dialog or an automated policy sits behind it), never the
//! caller's control thread.

use std::path::Path;

use crate::error::ExportError;

/// Answer to a reported I/O failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-run the same action.
    Retry,
    /// Abandon this action only; traversal continues.
    Abort,
}

/// Structured failure event handed to the decision provider.
#[derive(Debug)]
pub struct FailureReport<'a> {
    /// Destination path of the failing action.
    pub path: &'a Path,
    /// 1-based count of failed attempts so far.
    pub attempt: u32,
    pub error: &'a ExportError,
}

/// Decides whether a failed I/O action is retried.
pub trait DecisionProvider: Send {
    fn decide(&self, report: FailureReport<'_>) -> RetryDecision;
}

impl<F> DecisionProvider for F
where
    F: for<'a> Fn(FailureReport<'a>) -> RetryDecision + Send,
{
    fn decide(&self, report: FailureReport<'_>) -> RetryDecision {
        self(report)
    }
}

/// Abandons a failing action on its first failure.
#[derive(Debug, Default)]
pub struct NeverRetry;

impl DecisionProvider for NeverRetry {
    fn decide(&self, _report: FailureReport<'_>) -> RetryDecision {
        RetryDecision::Abort
    }
}

/// Retries a failing action up to the given number of times, then
/// abandons it.
#[derive(Debug)]
pub struct LimitedRetry(pub u32);

impl DecisionProvider for LimitedRetry {
    fn decide(&self, report: FailureReport<'_>) -> RetryDecision {
        if report.attempt <= self.0 {
            RetryDecision::Retry
        } else {
            RetryDecision::Abort
        }
    }
}

/// Result of a retried action.
pub(crate) enum Attempt<T> {
    Completed(T),
    Abandoned,
}

/// Runs `action` until it succeeds or the provider stops retrying.
pub(crate) fn with_retry<T>(
    decisions: &dyn DecisionProvider,
    path: &Path,
    mut action: impl FnMut() -> Result<T, ExportError>,
) -> Attempt<T> {
    let mut attempt = 0u32;
    loop {
        match action() {
            Ok(value) => return Attempt::Completed(value),
            Err(error) => {
                attempt += 1;
                tracing::warn!(
                    "I/O failure at {} (attempt {}): {}",
                    path.display(),
                    attempt,
                    error
                );
                match decisions.decide(FailureReport {
                    path,
                    attempt,
                    error: &error,
                }) {
                    RetryDecision::Retry => continue,
                    RetryDecision::Abort => {
                        tracing::warn!(
                            "abandoning {} after {} failed attempt(s)",
                            path.display(),
                            attempt
                        );
                        return Attempt::Abandoned;
                    }
                }
            }
        }
    }
}
