//! Per-step retry bookkeeping and the transient-error classifier.

use crate::error::StepError;
use planwright_core::EngineConfig;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Lowercase substrings that mark an error as transient. Anything else is terminal.
pub const TRANSIENT_MARKERS: &[&str] = &[
    "quota",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "too many requests",
    "429",
    "network",
    "connection reset",
    "connection refused",
    "unavailable",
    "503",
    "timeout",
    "timed out",
    "parse",
    "overload",
];

pub fn is_transient(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Mutable counters for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRetryState {
    transient_attempt: u32,
    max_transient_retries: u32,
}

impl StepRetryState {
    pub fn new(max_transient_retries: u32) -> Self {
        Self {
            transient_attempt: 0,
            max_transient_retries,
        }
    }

    pub fn transient_attempt(&self) -> u32 {
        self.transient_attempt
    }

    pub fn can_retry_transient(&self) -> bool {
        self.transient_attempt < self.max_transient_retries
    }

    /// Count one automatic retry and return the delay to wait before it.
    pub fn record_transient(&mut self, config: &EngineConfig) -> Duration {
        self.transient_attempt += 1;
        config.retry_delay(self.transient_attempt)
    }

    /// The user chose "retry": start counting again.
    pub fn reset(&mut self) {
        self.transient_attempt = 0;
    }
}

/// Sleep for `delay` unless the run is cancelled first.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<(), StepError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StepError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
