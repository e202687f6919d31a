use crate::retry::is_transient;
use planwright_core::util::truncate;
use planwright_core::{CollaboratorError, PatchError, StepFailure};
use thiserror::Error;

/// Raw collaborator text shown to the user is cut to this many characters.
const MAX_DETAIL_CHARS: usize = 2_000;

/// Why one attempt at a step did not finish.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// Expected to clear up on its own; retried automatically with backoff.
    #[error("{0}")]
    Transient(String),
    #[error("{reason}")]
    Terminal {
        reason: String,
        detail: Option<String>,
    },
    /// The run was cancelled. Never retried and never reported as a failure.
    #[error("step cancelled")]
    Cancelled,
    /// Generated edits still did not apply after every repair attempt.
    #[error("generated edits could not be applied: {0}")]
    Patch(#[from] PatchError),
}

impl StepError {
    pub fn terminal(reason: impl Into<String>) -> Self {
        Self::Terminal {
            reason: reason.into(),
            detail: None,
        }
    }

    pub fn terminal_with_detail(reason: impl Into<String>, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self::Terminal {
            reason: reason.into(),
            detail: (!detail.trim().is_empty()).then(|| truncate(detail.trim(), MAX_DETAIL_CHARS)),
        }
    }

    /// Classify a collaborator failure. `context` names what was being attempted.
    pub fn from_collaborator(context: &str, err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Cancelled => StepError::Cancelled,
            CollaboratorError::NotFound(what) => {
                StepError::terminal_with_detail(format!("{}: not found", context), what)
            }
            CollaboratorError::Other(message) => {
                if is_transient(&message) {
                    StepError::Transient(format!("{}: {}", context, truncate(&message, 300)))
                } else {
                    StepError::terminal_with_detail(context, message)
                }
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StepError::Transient(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepError::Cancelled)
    }

    /// Short structured reason for the user.
    pub fn reason(&self) -> String {
        match self {
            StepError::Transient(message) => format!("temporary failure: {}", message),
            StepError::Terminal { reason, .. } => reason.clone(),
            StepError::Cancelled => "cancelled".to_string(),
            StepError::Patch(PatchError::Ambiguous { block, .. }) => {
                format!("edit block {} matched more than one location", block)
            }
            StepError::Patch(PatchError::NotFound { block, .. }) => {
                format!("edit block {} did not match the file", block)
            }
        }
    }

    /// Raw collaborator or matcher text, when there is any.
    pub fn detail(&self) -> Option<String> {
        match self {
            StepError::Terminal { detail, .. } => detail.clone(),
            StepError::Patch(err) => Some(truncate(&err.to_string(), MAX_DETAIL_CHARS)),
            StepError::Transient(_) | StepError::Cancelled => None,
        }
    }

    pub fn to_failure(&self, step_number: usize, step_summary: &str) -> StepFailure {
        StepFailure {
            step_number,
            step_summary: step_summary.to_string(),
            reason: self.reason(),
            detail: self.detail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collaborator_errors_are_classified_by_message() {
        let transient =
            StepError::from_collaborator("generation", CollaboratorError::other("HTTP 429 rate limit"));
        assert!(transient.is_transient());

        let terminal = StepError::from_collaborator(
            "generation",
            CollaboratorError::other("invalid API key"),
        );
        assert_eq!(
            terminal,
            StepError::Terminal {
                reason: "generation".into(),
                detail: Some("invalid API key".into())
            }
        );

        assert!(StepError::from_collaborator("write", CollaboratorError::Cancelled).is_cancelled());
    }

    #[test]
    fn failure_carries_reason_and_detail() {
        let err = StepError::Patch(PatchError::NotFound {
            block: 2,
            search: "fn gone()".into(),
        });
        let failure = err.to_failure(3, "Modify file src/lib.rs");
        assert_eq!(failure.step_number, 3);
        assert_eq!(failure.reason, "edit block 2 did not match the file");
        assert!(failure.detail.unwrap().contains("fn gone()"));
    }

    #[test]
    fn blank_detail_is_dropped() {
        let err = StepError::terminal_with_detail("command failed", "  \n");
        assert_eq!(err.detail(), None);
    }
}
