//! The plan run state machine.
//!
//! Steps run one at a time in bucket order. Each step gets its own retry
//! state: transient failures retry automatically with linear backoff, anything
//! else (or an exhausted budget) is escalated to the user as retry / skip /
//! cancel. Command steps never retry. After the last step the executor waits
//! for diagnostics on every touched file and decides whether the run needs a
//! self-correction cycle.

mod diagnostics;
mod steps;

pub use diagnostics::SelfCorrectionRequest;

use crate::error::StepError;
use crate::retry::{sleep_or_cancel, StepRetryState};
use planwright_core::patch::{HeuristicSymbolLookup, SymbolLookup};
use planwright_core::{
    ChangeLog, ChangeLogEntry, ContentGenerator, Diagnostic, DiagnosticSource, EngineConfig,
    ExecutionPlan, PlanStep, ProcessRunner, ProgressEvent, ProgressSink, RecoveryChoice,
    RunOutcome, StepFailure, StepKind, UserInteraction, WorkspaceFs,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything the executor talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn ContentGenerator>,
    pub diagnostics: Arc<dyn DiagnosticSource>,
    pub fs: Arc<dyn WorkspaceFs>,
    pub processes: Arc<dyn ProcessRunner>,
    pub change_log: Arc<dyn ChangeLog>,
    pub user: Arc<dyn UserInteraction>,
    pub progress: Option<Arc<dyn ProgressSink>>,
    pub symbols: Arc<dyn SymbolLookup>,
}

impl Collaborators {
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        diagnostics: Arc<dyn DiagnosticSource>,
        fs: Arc<dyn WorkspaceFs>,
        processes: Arc<dyn ProcessRunner>,
        change_log: Arc<dyn ChangeLog>,
        user: Arc<dyn UserInteraction>,
    ) -> Self {
        Self {
            generator,
            diagnostics,
            fs,
            processes,
            change_log,
            user,
            progress: None,
            symbols: Arc::new(HeuristicSymbolLookup::default()),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_symbols(mut self, symbols: Arc<dyn SymbolLookup>) -> Self {
        self.symbols = symbols;
        self
    }
}

/// Per-run inputs that shape generation prompts.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub project_context: String,
    /// Set when this run is fixing diagnostics left by an earlier one.
    pub self_correction: Option<SelfCorrectionRequest>,
}

impl ExecutionContext {
    pub fn new(project_context: impl Into<String>) -> Self {
        Self {
            project_context: project_context.into(),
            self_correction: None,
        }
    }

    pub fn self_correcting(mut self, request: SelfCorrectionRequest) -> Self {
        self.self_correction = Some(request);
        self
    }

    fn diagnostics_for(&self, path: &Path) -> Option<String> {
        self.self_correction
            .as_ref()
            .and_then(|request| request.diagnostics_for(path))
    }
}

/// Files mutated during one run, in first-touch order.
#[derive(Debug, Default)]
struct AffectedFileSet {
    files: Vec<PathBuf>,
}

impl AffectedFileSet {
    fn insert(&mut self, path: &Path) {
        if !self.files.iter().any(|p| p == path) {
            self.files.push(path.to_path_buf());
        }
    }
}

/// Mutable state of one `execute_plan` call.
struct RunState {
    run_id: String,
    affected: AffectedFileSet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRunReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub total_steps: usize,
    /// Steps that finished, including ones that turned out to be no-ops.
    pub completed_steps: usize,
    /// 1-based numbers of steps the user skipped or declined.
    pub skipped_steps: Vec<usize>,
    pub affected_files: Vec<PathBuf>,
    /// Affected files that still carry error-severity diagnostics.
    pub files_needing_correction: Vec<PathBuf>,
    pub error_diagnostics: BTreeMap<PathBuf, Vec<Diagnostic>>,
    /// The failure that aborted the run, when the outcome is `Failed`.
    pub failure: Option<StepFailure>,
}

impl PlanRunReport {
    fn new(run_id: String, total_steps: usize) -> Self {
        Self {
            run_id,
            outcome: RunOutcome::Success,
            total_steps,
            completed_steps: 0,
            skipped_steps: Vec::new(),
            affected_files: Vec::new(),
            files_needing_correction: Vec::new(),
            error_diagnostics: BTreeMap::new(),
            failure: None,
        }
    }

    pub fn needs_correction(&self) -> bool {
        self.outcome == RunOutcome::SuccessWithErrors
    }

    /// The follow-up request for a `SuccessWithErrors` run.
    pub fn correction_request(
        &self,
        recent_changes: Vec<ChangeLogEntry>,
    ) -> Option<SelfCorrectionRequest> {
        if !self.needs_correction() {
            return None;
        }
        Some(SelfCorrectionRequest {
            files: self.files_needing_correction.clone(),
            diagnostics: self.error_diagnostics.clone(),
            recent_changes,
        })
    }
}

enum StepResolution {
    Completed { changed: bool },
    Skipped(String),
    Cancelled,
    Aborted(StepFailure),
}

pub struct PlanExecutor {
    collaborators: Collaborators,
    config: EngineConfig,
}

impl PlanExecutor {
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Self {
        Self {
            collaborators,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Run `plan` to completion, cancellation, or abort.
    ///
    /// The plan is normalized again before running, so callers may pass a
    /// hand-built plan. Cancelling `cancel` stops the run before the next
    /// step or suspension point; choosing "cancel" at an escalation cancels it.
    pub async fn execute_plan(
        &self,
        plan: &ExecutionPlan,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> PlanRunReport {
        let plan = plan.clone().normalized();
        let total = plan.steps.len();
        let mut run = RunState {
            run_id: Uuid::new_v4().to_string(),
            affected: AffectedFileSet::default(),
        };
        let mut report = PlanRunReport::new(run.run_id.clone(), total);
        info!(run_id = %run.run_id, steps = total, plan = %plan.description, "starting plan run");

        for (idx, step) in plan.steps.iter().enumerate() {
            let number = idx + 1;
            if cancel.is_cancelled() {
                return finish(report, run, RunOutcome::Cancelled);
            }

            info!(step = number, kind = step.kind().label(), "{}", step.summary());
            self.emit(ProgressEvent::StepStarted {
                step_number: number,
                total,
                summary: step.summary(),
            });

            match self.drive_step(number, step, ctx, &mut run, cancel).await {
                StepResolution::Completed { changed } => {
                    report.completed_steps += 1;
                    self.emit(ProgressEvent::StepCompleted {
                        step_number: number,
                        changed,
                    });
                }
                StepResolution::Skipped(reason) => {
                    info!(step = number, %reason, "step skipped");
                    report.skipped_steps.push(number);
                    self.emit(ProgressEvent::StepSkipped {
                        step_number: number,
                        reason,
                    });
                }
                StepResolution::Cancelled => {
                    info!(step = number, "run cancelled");
                    return finish(report, run, RunOutcome::Cancelled);
                }
                StepResolution::Aborted(failure) => {
                    warn!(step = number, reason = %failure.reason, "run aborted");
                    report.failure = Some(failure);
                    return finish(report, run, RunOutcome::Failed);
                }
            }
        }

        match self.settle_diagnostics(&run.affected.files, cancel).await {
            Ok(errors) => {
                report.files_needing_correction = run
                    .affected
                    .files
                    .iter()
                    .filter(|path| errors.contains_key(*path))
                    .cloned()
                    .collect();
                report.error_diagnostics = errors;
                let outcome = if report.files_needing_correction.is_empty() {
                    RunOutcome::Success
                } else {
                    RunOutcome::SuccessWithErrors
                };
                finish(report, run, outcome)
            }
            Err(_) => finish(report, run, RunOutcome::Cancelled),
        }
    }

    /// Attempt one step until it completes, is skipped, or ends the run.
    async fn drive_step(
        &self,
        number: usize,
        step: &PlanStep,
        ctx: &ExecutionContext,
        run: &mut RunState,
        cancel: &CancellationToken,
    ) -> StepResolution {
        let summary = step.summary();
        let mut retry = StepRetryState::new(self.config.max_transient_step_retries);

        loop {
            if cancel.is_cancelled() {
                return StepResolution::Cancelled;
            }

            let err = match self.run_step(number, step, ctx, run, cancel).await {
                Ok(steps::StepEffect::Applied { changed }) => {
                    return StepResolution::Completed { changed }
                }
                Ok(steps::StepEffect::Declined(reason)) => return StepResolution::Skipped(reason),
                Err(err) => err,
            };

            if err.is_cancelled() || cancel.is_cancelled() {
                return StepResolution::Cancelled;
            }

            if step.kind() == StepKind::RunCommand {
                return StepResolution::Aborted(err.to_failure(number, &summary));
            }

            if err.is_transient() && retry.can_retry_transient() {
                let delay = retry.record_transient(&self.config);
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    step = number,
                    attempt = retry.transient_attempt(),
                    delay_ms,
                    error = %err,
                    "transient step failure, retrying"
                );
                self.emit(ProgressEvent::StepRetrying {
                    step_number: number,
                    attempt: retry.transient_attempt(),
                    delay_ms,
                    reason: err.reason(),
                });
                if sleep_or_cancel(delay, cancel).await.is_err() {
                    return StepResolution::Cancelled;
                }
                continue;
            }

            let failure = err.to_failure(number, &summary);
            warn!(step = number, reason = %failure.reason, "step failed, asking for recovery");
            match self.ask_recovery(&failure, cancel).await {
                RecoveryChoice::Retry => {
                    info!(step = number, "retrying step at user request");
                    retry.reset();
                }
                RecoveryChoice::Skip => {
                    return StepResolution::Skipped(format!(
                        "skipped after failure: {}",
                        failure.reason
                    ))
                }
                RecoveryChoice::Cancel => {
                    cancel.cancel();
                    return StepResolution::Cancelled;
                }
            }
        }
    }

    async fn ask_recovery(
        &self,
        failure: &StepFailure,
        cancel: &CancellationToken,
    ) -> RecoveryChoice {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => RecoveryChoice::Cancel,
            choice = self.collaborators.user.choose_recovery(failure) => choice,
        }
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(progress) = &self.collaborators.progress {
            progress.emit(event);
        }
    }
}

fn finish(mut report: PlanRunReport, run: RunState, outcome: RunOutcome) -> PlanRunReport {
    report.outcome = outcome;
    report.affected_files = run.affected.files;
    debug!(
        run_id = %report.run_id,
        outcome = outcome.label(),
        affected = report.affected_files.len(),
        "plan run finished"
    );
    report
}
