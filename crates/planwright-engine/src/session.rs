//! One user request end to end: plan, execute, and self-correct.

use crate::executor::{ExecutionContext, PlanExecutor, PlanRunReport};
use crate::planner::{PlanProducer, PlanningError};
use planwright_core::{ExecutionPlan, RunOutcome};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Change-log entries handed to each self-correction cycle.
const RECENT_CHANGES_FOR_CORRECTION: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// The first run, then one per self-correction cycle.
    pub runs: Vec<PlanRunReport>,
    /// Set when cancellation arrived between runs.
    pub cancelled: bool,
}

impl SessionReport {
    pub fn outcome(&self) -> RunOutcome {
        if self.cancelled {
            return RunOutcome::Cancelled;
        }
        self.runs
            .last()
            .map(|run| run.outcome)
            .unwrap_or(RunOutcome::Failed)
    }

    pub fn correction_cycles(&self) -> usize {
        self.runs.len().saturating_sub(1)
    }
}

pub struct Session {
    executor: PlanExecutor,
    producer: PlanProducer,
}

impl Session {
    pub fn new(executor: PlanExecutor, producer: PlanProducer) -> Self {
        Self { executor, producer }
    }

    pub fn executor(&self) -> &PlanExecutor {
        &self.executor
    }

    pub fn producer(&self) -> &PlanProducer {
        &self.producer
    }

    /// Plan `goal`, run it, and self-correct while diagnostics remain.
    pub async fn run_goal(
        &self,
        goal: &str,
        project_context: &str,
        cancel: &CancellationToken,
    ) -> Result<SessionReport, PlanningError> {
        let plan = self.producer.produce(goal, project_context, cancel).await?;
        self.run_plan(&plan, goal, project_context, cancel).await
    }

    /// Run an already-validated plan, then self-correct while diagnostics remain.
    ///
    /// `goal` describes the intent to correction cycles; callers with no
    /// natural-language goal can pass the plan description.
    pub async fn run_plan(
        &self,
        plan: &ExecutionPlan,
        goal: &str,
        project_context: &str,
        cancel: &CancellationToken,
    ) -> Result<SessionReport, PlanningError> {
        let first = self
            .executor
            .execute_plan(plan, &ExecutionContext::new(project_context), cancel)
            .await;
        let mut runs = vec![first];
        let mut cancelled = false;
        let max_cycles = self.executor.config().max_self_correction_cycles as usize;

        while runs.len() <= max_cycles {
            let Some(last) = runs.last() else { break };
            if !last.needs_correction() {
                break;
            }
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let recent = match self
                .executor
                .collaborators()
                .change_log
                .recent(RECENT_CHANGES_FOR_CORRECTION)
                .await
            {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(error = %err, "could not read recent changes for self-correction");
                    Vec::new()
                }
            };
            let Some(request) = last.correction_request(recent) else {
                break;
            };

            info!(
                cycle = runs.len(),
                files = request.files.len(),
                "starting self-correction cycle"
            );
            let correction_goal = request.goal_prompt(goal);
            let plan = match self
                .producer
                .produce(&correction_goal, project_context, cancel)
                .await
            {
                Ok(plan) => plan,
                Err(PlanningError::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "self-correction plan could not be produced");
                    break;
                }
            };
            let ctx = ExecutionContext::new(project_context).self_correcting(request);
            runs.push(self.executor.execute_plan(&plan, &ctx, cancel).await);
        }

        Ok(SessionReport { runs, cancelled })
    }
}
