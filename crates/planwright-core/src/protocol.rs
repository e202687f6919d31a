//! Contracts between the execution engine and the host application.
//!
//! Every suspendable operation takes the run's [`CancellationToken`]
//! explicitly; there is no ambient cancellation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

impl CollaboratorError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

pub type CollabResult<T> = Result<T, CollaboratorError>;

// ═══════════════════════════════════════════════════════════════════════════
//  CONTENT GENERATION
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt_parts: Vec<String>,
    pub model: String,
    pub system_instruction: Option<String>,
}

impl GenerationRequest {
    pub fn joined_prompt(&self) -> String {
        self.prompt_parts.join("\n\n")
    }
}

/// Receives streamed text for live progress only.
pub type ChunkCallback<'a> = &'a (dyn Fn(&str) + Send + Sync);

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(
        &self,
        request: GenerationRequest,
        on_chunk: Option<ChunkCallback<'_>>,
        cancel: &CancellationToken,
    ) -> CollabResult<String>;
}

// ═══════════════════════════════════════════════════════════════════════════
//  DIAGNOSTICS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Information,
    Hint,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Information => "info",
            Severity::Hint => "hint",
        }
    }
}

/// 1-based, inclusive line/column range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TextRange {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl TextRange {
    pub fn point(line: u32, column: u32) -> Self {
        Self {
            start_line: line,
            start_column: column,
            end_line: line,
            end_column: column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub range: TextRange,
    pub message: String,
}

/// Polling bounds for [`DiagnosticSource::wait_for_stable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityWindow {
    pub timeout: Duration,
    pub initial_poll: Duration,
    pub max_poll: Duration,
}

impl Default for StabilityWindow {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            initial_poll: Duration::from_millis(200),
            max_poll: Duration::from_secs(2),
        }
    }
}

#[async_trait]
pub trait DiagnosticSource: Send + Sync {
    async fn diagnostics(&self, path: &Path) -> CollabResult<Vec<Diagnostic>>;

    /// Wait until two consecutive reads for `path` agree, polling with
    /// exponential backoff. Returning at the timeout is not an error.
    /// Cancellation drops any read in flight.
    async fn wait_for_stable(
        &self,
        path: &Path,
        cancel: &CancellationToken,
        window: StabilityWindow,
    ) -> CollabResult<()> {
        let deadline = tokio::time::Instant::now() + window.timeout;
        let mut delay = window.initial_poll.max(Duration::from_millis(1));
        let mut previous = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CollaboratorError::Cancelled),
            read = self.diagnostics(path) => read?,
        };

        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                tracing::debug!(path = %path.display(), "diagnostics did not settle before timeout");
                return Ok(());
            }
            let sleep_for = delay.min(deadline - now);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CollaboratorError::Cancelled),
                _ = tokio::time::sleep(sleep_for) => {}
            }

            let current = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CollaboratorError::Cancelled),
                read = self.diagnostics(path) => read?,
            };
            if current == previous {
                return Ok(());
            }
            previous = current;
            delay = (delay * 2).min(window.max_poll.max(window.initial_poll));
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  FILESYSTEM & PROCESSES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub is_dir: bool,
    pub len: u64,
}

/// Workspace filesystem. All paths are workspace-relative.
///
/// Implementations must report a missing path as [`CollaboratorError::NotFound`].
#[async_trait]
pub trait WorkspaceFs: Send + Sync {
    fn root(&self) -> &Path;
    async fn stat(&self, path: &Path) -> CollabResult<FileStat>;
    async fn read_to_string(&self, path: &Path) -> CollabResult<String>;
    /// Write `content`, creating parent directories as needed.
    async fn write(&self, path: &Path, content: &str) -> CollabResult<()>;
    async fn create_dir_all(&self, path: &Path) -> CollabResult<()>;
    async fn remove_file(&self, path: &Path) -> CollabResult<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Spawns external processes. On cancellation the child must be killed
/// before returning [`CollaboratorError::Cancelled`].
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn spawn(
        &self,
        executable: &str,
        args: &[String],
        cwd: &Path,
        cancel: &CancellationToken,
    ) -> CollabResult<ProcessOutput>;
}

// ═══════════════════════════════════════════════════════════════════════════
//  CHANGE LOG
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub run_id: String,
    pub path: PathBuf,
    pub change_type: ChangeType,
    pub summary: String,
    pub diff: String,
    /// Content before the change; `None` for files that did not exist.
    pub before: Option<String>,
    pub after: String,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait ChangeLog: Send + Sync {
    async fn append(&self, entry: ChangeLogEntry) -> CollabResult<()>;
    /// Most recent entries last, at most `limit` of them.
    async fn recent(&self, limit: usize) -> CollabResult<Vec<ChangeLogEntry>>;
}

// ═══════════════════════════════════════════════════════════════════════════
//  USER INTERACTION & PROGRESS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryChoice {
    Retry,
    Skip,
    Cancel,
}

/// What the user sees when a step needs a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    /// 1-based position in the ordered plan.
    pub step_number: usize,
    pub step_summary: String,
    pub reason: String,
    pub detail: Option<String>,
}

/// Blocking prompts. The engine races each call against cancellation and
/// treats a cancelled prompt as [`RecoveryChoice::Cancel`].
#[async_trait]
pub trait UserInteraction: Send + Sync {
    async fn choose_recovery(&self, failure: &StepFailure) -> RecoveryChoice;
    async fn approve_command(&self, command: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    StepStarted {
        step_number: usize,
        total: usize,
        summary: String,
    },
    StepRetrying {
        step_number: usize,
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    StepCompleted {
        step_number: usize,
        changed: bool,
    },
    StepSkipped {
        step_number: usize,
        reason: String,
    },
    GenerationChunk {
        step_number: usize,
        chars: usize,
    },
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Final classification of one plan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    SuccessWithErrors,
    Cancelled,
    Failed,
}

impl RunOutcome {
    pub fn label(self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::SuccessWithErrors => "success_with_errors",
            RunOutcome::Cancelled => "cancelled",
            RunOutcome::Failed => "failed",
        }
    }
}
