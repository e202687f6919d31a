//! Plan data model: the four step kinds and the ordered plan they form.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Joins the prompts of `ModifyFile` steps that target the same path.
pub const MODIFY_PROMPT_SEPARATOR: &str = "\n\n--- additional change for this file ---\n\n";

/// Where the body of a new file comes from. Exactly one source per file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSource {
    Content(String),
    GeneratePrompt(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    CreateDirectory {
        path: PathBuf,
    },
    CreateFile {
        path: PathBuf,
        source: FileSource,
        #[serde(default)]
        use_content_agent: bool,
    },
    ModifyFile {
        path: PathBuf,
        modification_prompt: String,
    },
    RunCommand {
        command: String,
    },
}

/// Step kinds in execution priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    CreateDirectory,
    CreateFile,
    ModifyFile,
    RunCommand,
}

impl StepKind {
    pub const ALL: [StepKind; 4] = [
        StepKind::CreateDirectory,
        StepKind::CreateFile,
        StepKind::ModifyFile,
        StepKind::RunCommand,
    ];

    pub fn label(self) -> &'static str {
        match self {
            StepKind::CreateDirectory => "create_directory",
            StepKind::CreateFile => "create_file",
            StepKind::ModifyFile => "modify_file",
            StepKind::RunCommand => "run_command",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub action: StepAction,
}

impl PlanStep {
    pub fn new(action: StepAction) -> Self {
        Self {
            description: None,
            action,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn kind(&self) -> StepKind {
        match self.action {
            StepAction::CreateDirectory { .. } => StepKind::CreateDirectory,
            StepAction::CreateFile { .. } => StepKind::CreateFile,
            StepAction::ModifyFile { .. } => StepKind::ModifyFile,
            StepAction::RunCommand { .. } => StepKind::RunCommand,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.action {
            StepAction::CreateDirectory { path }
            | StepAction::CreateFile { path, .. }
            | StepAction::ModifyFile { path, .. } => Some(path.as_path()),
            StepAction::RunCommand { .. } => None,
        }
    }

    /// Short human label used in logs and escalation prompts.
    pub fn summary(&self) -> String {
        match &self.action {
            StepAction::CreateDirectory { path } => {
                format!("Create directory {}", path.display())
            }
            StepAction::CreateFile { path, .. } => format!("Create file {}", path.display()),
            StepAction::ModifyFile { path, .. } => format!("Modify file {}", path.display()),
            StepAction::RunCommand { command } => format!("Run command `{}`", command),
        }
    }
}

/// A validated plan ready for one execution run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub description: String,
    pub steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    /// Reorder steps into fixed kind buckets and merge `ModifyFile` steps per path.
    ///
    /// Within a bucket the encounter order is preserved. Running this on an
    /// already-normalized plan returns it unchanged.
    pub fn normalized(self) -> Self {
        let ExecutionPlan { description, steps } = self;
        let mut buckets: HashMap<StepKind, Vec<PlanStep>> = HashMap::new();
        for step in steps {
            buckets.entry(step.kind()).or_default().push(step);
        }

        let mut ordered = Vec::new();
        for kind in StepKind::ALL {
            let bucket = buckets.remove(&kind).unwrap_or_default();
            if kind == StepKind::ModifyFile {
                ordered.extend(consolidate_modifications(bucket));
            } else {
                ordered.extend(bucket);
            }
        }

        ExecutionPlan {
            description,
            steps: ordered,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn count_of(&self, kind: StepKind) -> usize {
        self.steps.iter().filter(|s| s.kind() == kind).count()
    }
}

fn consolidate_modifications(steps: Vec<PlanStep>) -> Vec<PlanStep> {
    let mut merged: Vec<PlanStep> = Vec::with_capacity(steps.len());
    let mut index_by_path: HashMap<PathBuf, usize> = HashMap::new();

    for step in steps {
        let StepAction::ModifyFile {
            path,
            modification_prompt,
        } = step.action
        else {
            merged.push(step);
            continue;
        };

        match index_by_path.get(&path) {
            Some(&idx) => {
                let existing = &mut merged[idx];
                if let StepAction::ModifyFile {
                    modification_prompt: existing_prompt,
                    ..
                } = &mut existing.action
                {
                    existing_prompt.push_str(MODIFY_PROMPT_SEPARATOR);
                    existing_prompt.push_str(&modification_prompt);
                }
                existing.description = match (existing.description.take(), step.description) {
                    (Some(a), Some(b)) => Some(format!("{}; {}", a, b)),
                    (a, b) => a.or(b),
                };
            }
            None => {
                index_by_path.insert(path.clone(), merged.len());
                merged.push(PlanStep {
                    description: step.description,
                    action: StepAction::ModifyFile {
                        path,
                        modification_prompt,
                    },
                });
            }
        }
    }

    merged
}
