//! Goal → validated plan, retrying with the validation error as feedback.

use crate::error::StepError;
use crate::prompts;
use crate::retry::{is_transient, sleep_or_cancel};
use planwright_core::{
    validate_plan, CollaboratorError, ContentGenerator, EngineConfig, ExecutionPlan,
    GenerationRequest, IgnoreRules, PlanValidationError,
};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    #[error("no valid plan after {attempts} attempts: {last}")]
    Invalid {
        attempts: u32,
        last: PlanValidationError,
    },
    #[error("plan generation failed: {0}")]
    Generation(String),
    #[error("planning cancelled")]
    Cancelled,
}

impl From<StepError> for PlanningError {
    fn from(err: StepError) -> Self {
        match err {
            StepError::Cancelled => PlanningError::Cancelled,
            other => PlanningError::Generation(other.to_string()),
        }
    }
}

pub struct PlanProducer {
    generator: Arc<dyn ContentGenerator>,
    ignore: IgnoreRules,
    model: String,
    max_attempts: u32,
    backoff: EngineConfig,
}

impl PlanProducer {
    /// Model, attempt budget and retry delays come from `config`.
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        ignore: IgnoreRules,
        config: &EngineConfig,
    ) -> Self {
        Self {
            generator,
            ignore,
            model: config.model.clone(),
            max_attempts: config.max_content_repair_attempts.max(1),
            backoff: config.clone(),
        }
    }

    pub fn ignore_rules(&self) -> &IgnoreRules {
        &self.ignore
    }

    /// Ask for a plan for `goal` and validate it.
    ///
    /// A rejected plan is retried with the validation error appended to the
    /// prompt. Transient generation failures count against the same budget.
    pub async fn produce(
        &self,
        goal: &str,
        project_context: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecutionPlan, PlanningError> {
        let mut feedback: Option<String> = None;
        let mut last_invalid: Option<PlanValidationError> = None;

        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(PlanningError::Cancelled);
            }
            let request = GenerationRequest {
                prompt_parts: prompts::plan_parts(goal, project_context, feedback.as_deref()),
                model: self.model.clone(),
                system_instruction: Some(prompts::PLAN_SYSTEM.to_string()),
            };

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PlanningError::Cancelled),
                response = self.generator.generate(request, None, cancel) => response,
            };
            let text = match response {
                Ok(text) => text,
                Err(CollaboratorError::Cancelled) => return Err(PlanningError::Cancelled),
                Err(err) if is_transient(&err.to_string()) && attempt < self.max_attempts => {
                    let delay = self.backoff.retry_delay(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "plan generation failed, retrying"
                    );
                    sleep_or_cancel(delay, cancel).await?;
                    continue;
                }
                Err(err) => return Err(PlanningError::Generation(err.to_string())),
            };

            match validate_plan(text.as_str(), &self.ignore) {
                Ok(plan) => {
                    info!(attempt, steps = plan.steps.len(), "plan accepted");
                    return Ok(plan);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "plan rejected by validation");
                    feedback = Some(format!(
                        "IMPORTANT: your previous plan was rejected: {}.\nReturn a corrected JSON object that satisfies every rule.",
                        err
                    ));
                    last_invalid = Some(err);
                }
            }
        }

        match last_invalid {
            Some(last) => Err(PlanningError::Invalid {
                attempts: self.max_attempts,
                last,
            }),
            None => Err(PlanningError::Generation(
                "no plan was generated".to_string(),
            )),
        }
    }
}
