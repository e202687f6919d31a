//! Post-run diagnostic stabilization and the self-correction request it feeds.

use super::PlanExecutor;
use crate::error::StepError;
use futures::future::join_all;
use planwright_core::util::truncate;
use planwright_core::{ChangeLogEntry, ChangeType, CollaboratorError, Diagnostic, Severity};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const MAX_CHANGE_DIFF_CHARS: usize = 1_500;

impl PlanExecutor {
    /// Wait for diagnostics on `files` to settle, then return the
    /// error-severity ones per file. Files without errors are absent.
    pub(super) async fn settle_diagnostics(
        &self,
        files: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<PathBuf, Vec<Diagnostic>>, StepError> {
        let mut errors = BTreeMap::new();
        if files.is_empty() {
            return Ok(errors);
        }

        let source = &self.collaborators.diagnostics;
        let window = self.config.stability_window();

        let waits = files.iter().map(|path| async move {
            (path, source.wait_for_stable(path, cancel, window).await)
        });
        for (path, waited) in join_all(waits).await {
            match waited {
                Ok(()) => {}
                Err(CollaboratorError::Cancelled) => return Err(StepError::Cancelled),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "diagnostics did not stabilize")
                }
            }
        }
        if cancel.is_cancelled() {
            return Err(StepError::Cancelled);
        }

        let reads = files
            .iter()
            .map(|path| async move {
                let read = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(CollaboratorError::Cancelled),
                    read = source.diagnostics(path) => read,
                };
                (path, read)
            });
        for (path, read) in join_all(reads).await {
            match read {
                Ok(list) => {
                    let file_errors: Vec<Diagnostic> = list
                        .into_iter()
                        .filter(|d| d.severity == Severity::Error)
                        .collect();
                    debug!(path = %path.display(), errors = file_errors.len(), "diagnostics settled");
                    if !file_errors.is_empty() {
                        errors.insert(path.clone(), file_errors);
                    }
                }
                Err(CollaboratorError::Cancelled) => return Err(StepError::Cancelled),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "could not read diagnostics")
                }
            }
        }

        Ok(errors)
    }
}

/// Input for a follow-up plan that fixes diagnostics left by a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelfCorrectionRequest {
    pub files: Vec<PathBuf>,
    pub diagnostics: BTreeMap<PathBuf, Vec<Diagnostic>>,
    pub recent_changes: Vec<ChangeLogEntry>,
}

impl SelfCorrectionRequest {
    /// Every diagnostic as `path:line:col: severity: message`.
    pub fn diagnostics_text(&self) -> String {
        self.files
            .iter()
            .filter_map(|path| self.diagnostics_for(path))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn diagnostics_for(&self, path: &Path) -> Option<String> {
        let list = self.diagnostics.get(path)?;
        if list.is_empty() {
            return None;
        }
        Some(
            list.iter()
                .map(|d| format_diagnostic(path, d))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    /// Goal text for the plan producer.
    pub fn goal_prompt(&self, original_goal: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Fix the errors reported after the previous change. Change only what is needed to resolve them."
        );
        let _ = writeln!(out, "\nPREVIOUS GOAL:\n{}", original_goal.trim());
        let _ = writeln!(out, "\nERRORS:\n{}", self.diagnostics_text());

        if !self.recent_changes.is_empty() {
            out.push_str("\nRECENT CHANGES:\n");
            for change in &self.recent_changes {
                let verb = match change.change_type {
                    ChangeType::Created => "created",
                    ChangeType::Modified => "modified",
                };
                let _ = writeln!(
                    out,
                    "- {} ({}): {}",
                    change.path.display(),
                    verb,
                    change.summary
                );
                if !change.diff.is_empty() {
                    let _ = writeln!(out, "{}", truncate(&change.diff, MAX_CHANGE_DIFF_CHARS));
                }
            }
        }
        out
    }
}

fn format_diagnostic(path: &Path, diagnostic: &Diagnostic) -> String {
    format!(
        "{}:{}:{}: {}: {}",
        path.to_string_lossy().replace('\\', "/"),
        diagnostic.range.start_line,
        diagnostic.range.start_column,
        diagnostic.severity.label(),
        diagnostic.message
    )
}
