//! What each step kind does on a single attempt.

use super::{ExecutionContext, PlanExecutor, RunState};
use crate::content::{
    assess_full_file, clean_file_response, empty_blocks_guidance, normalize_generated_content,
    parse_confirmation, patch_repair_guidance, rejected_content_guidance, FileVerdict,
};
use crate::diff::unified_diff;
use crate::error::StepError;
use crate::prompts::{self, FilePromptInputs};
use chrono::Utc;
use planwright_core::patch::contains_patch_markers;
use planwright_core::util::shell_invocation;
use planwright_core::{
    apply_blocks_with_symbols, parse_blocks, ChangeLogEntry, ChangeType, ChunkCallback,
    CollaboratorError, FileSource, GenerationRequest, PlanStep, ProgressEvent, StepAction,
};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(super) enum StepEffect {
    Applied { changed: bool },
    /// The user declined; the step counts as skipped.
    Declined(String),
}

impl PlanExecutor {
    pub(super) async fn run_step(
        &self,
        number: usize,
        step: &PlanStep,
        ctx: &ExecutionContext,
        run: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<StepEffect, StepError> {
        match &step.action {
            StepAction::CreateDirectory { path } => self.create_directory(path).await,
            StepAction::CreateFile {
                path,
                source,
                use_content_agent,
            } => {
                let content = match source {
                    FileSource::Content(content) => content.clone(),
                    FileSource::GeneratePrompt(prompt) => {
                        self.generate_new_file(number, path, prompt, *use_content_agent, ctx, cancel)
                            .await?
                    }
                };
                self.write_change(path, content, step, run).await
            }
            StepAction::ModifyFile {
                path,
                modification_prompt,
            } => {
                let content = match self.read_existing(path).await? {
                    Some(current) => {
                        self.generate_modification(
                            number,
                            path,
                            modification_prompt,
                            &current,
                            ctx,
                            cancel,
                        )
                        .await?
                    }
                    None => {
                        info!(step = number, path = %path.display(), "file to modify does not exist, creating it");
                        self.generate_new_file(number, path, modification_prompt, false, ctx, cancel)
                            .await?
                    }
                };
                self.write_change(path, content, step, run).await
            }
            StepAction::RunCommand { command } => self.run_command(command, cancel).await,
        }
    }

    async fn create_directory(&self, path: &Path) -> Result<StepEffect, StepError> {
        let fs = &self.collaborators.fs;
        match fs.stat(path).await {
            Ok(stat) if stat.is_dir => {
                debug!(path = %path.display(), "directory already exists");
                Ok(StepEffect::Applied { changed: false })
            }
            Ok(_) => Err(StepError::terminal(format!(
                "{} exists and is not a directory",
                path.display()
            ))),
            Err(CollaboratorError::NotFound(_)) => {
                fs.create_dir_all(path).await.map_err(|e| {
                    StepError::from_collaborator(&format!("create directory {}", path.display()), e)
                })?;
                Ok(StepEffect::Applied { changed: true })
            }
            Err(e) => Err(StepError::from_collaborator(
                &format!("inspect {}", path.display()),
                e,
            )),
        }
    }

    async fn read_existing(&self, path: &Path) -> Result<Option<String>, StepError> {
        match self.collaborators.fs.read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(CollaboratorError::NotFound(_)) => Ok(None),
            Err(e) => Err(StepError::from_collaborator(
                &format!("read {}", path.display()),
                e,
            )),
        }
    }

    /// Write `content` unless it matches what is on disk, and log the change.
    async fn write_change(
        &self,
        path: &Path,
        content: String,
        step: &PlanStep,
        run: &mut RunState,
    ) -> Result<StepEffect, StepError> {
        let before = self.read_existing(path).await?;
        if before.as_deref() == Some(content.as_str()) {
            debug!(path = %path.display(), "content unchanged, nothing to write");
            return Ok(StepEffect::Applied { changed: false });
        }

        self.collaborators
            .fs
            .write(path, &content)
            .await
            .map_err(|e| StepError::from_collaborator(&format!("write {}", path.display()), e))?;
        run.affected.insert(path);

        let change_type = if before.is_some() {
            ChangeType::Modified
        } else {
            ChangeType::Created
        };
        let entry = ChangeLogEntry {
            run_id: run.run_id.clone(),
            path: path.to_path_buf(),
            change_type,
            summary: step
                .description
                .clone()
                .unwrap_or_else(|| step.summary()),
            diff: unified_diff(path, before.as_deref(), &content),
            before,
            after: content,
            timestamp: Utc::now(),
        };
        if let Err(err) = self.collaborators.change_log.append(entry).await {
            // The write already happened; losing the entry only costs revert history.
            warn!(path = %path.display(), error = %err, "failed to record change");
        }
        Ok(StepEffect::Applied { changed: true })
    }

    async fn run_command(
        &self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<StepEffect, StepError> {
        if !self.config.auto_approve_commands {
            let approved = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StepError::Cancelled),
                approved = self.collaborators.user.approve_command(command) => approved,
            };
            if !approved {
                return Ok(StepEffect::Declined(format!(
                    "command `{}` was not approved",
                    command
                )));
            }
        }

        let (executable, args) = shell_invocation(command);
        let command_cancel = cancel.child_token();
        let timeout = self.config.command_timeout();
        let root = self.collaborators.fs.root().to_path_buf();
        let spawn = self
            .collaborators
            .processes
            .spawn(executable, &args, &root, &command_cancel);
        tokio::pin!(spawn);

        let result = tokio::select! {
            result = &mut spawn => result,
            _ = tokio::time::sleep(timeout) => {
                command_cancel.cancel();
                let _ = spawn.await;
                return Err(StepError::terminal(format!(
                    "command `{}` timed out after {}s",
                    command,
                    timeout.as_secs()
                )));
            }
        };
        let output = result.map_err(|e| StepError::from_collaborator("run command", e))?;

        if output.success() {
            info!(command, "command succeeded");
            return Ok(StepEffect::Applied { changed: false });
        }

        let status = output
            .exit_code
            .map(|code| format!("exit code {}", code))
            .unwrap_or_else(|| "a signal".to_string());
        let detail = if output.stderr.trim().is_empty() {
            output.stdout
        } else {
            output.stderr
        };
        Err(StepError::terminal_with_detail(
            format!("command `{}` failed with {}", command, status),
            tail(&detail, 40),
        ))
    }

    async fn generate_new_file(
        &self,
        number: usize,
        path: &Path,
        prompt: &str,
        content_agent: bool,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<String, StepError> {
        let system = if content_agent {
            prompts::CONTENT_WRITER_SYSTEM
        } else {
            prompts::CREATE_FILE_SYSTEM
        };
        let diagnostics = ctx.diagnostics_for(path);
        let mut feedback: Option<String> = None;
        let mut last_rejection = String::new();

        for attempt in 1..=self.config.max_content_repair_attempts.max(1) {
            let parts = prompts::create_file_parts(
                path,
                prompt,
                FilePromptInputs {
                    project_context: &ctx.project_context,
                    diagnostics: diagnostics.as_deref(),
                    feedback: feedback.as_deref(),
                },
            );
            let raw = self.generate(number, parts, system, true, cancel).await?;
            if contains_patch_markers(&raw) {
                last_rejection = "the response contained edit blocks for a new file".to_string();
            } else {
                let content = clean_file_response(&raw);
                match self.vet_full_file(path, prompt, &content, None, cancel).await? {
                    None => return Ok(normalize_generated_content(None, content)),
                    Some(reason) => last_rejection = reason,
                }
            }
            warn!(step = number, path = %path.display(), attempt, reason = %last_rejection, "generated file rejected");
            feedback = Some(rejected_content_guidance(&last_rejection));
        }

        Err(StepError::terminal_with_detail(
            "generated content was rejected",
            last_rejection,
        ))
    }

    async fn generate_modification(
        &self,
        number: usize,
        path: &Path,
        prompt: &str,
        current: &str,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<String, StepError> {
        let system = prompts::modify_file_system();
        let diagnostics = ctx.diagnostics_for(path);
        let mut feedback: Option<String> = None;
        let mut last_error = StepError::terminal("no generation attempt was made");

        for attempt in 1..=self.config.max_content_repair_attempts.max(1) {
            let parts = prompts::modify_file_parts(
                path,
                prompt,
                current,
                FilePromptInputs {
                    project_context: &ctx.project_context,
                    diagnostics: diagnostics.as_deref(),
                    feedback: feedback.as_deref(),
                },
            );
            let raw = self.generate(number, parts, &system, true, cancel).await?;

            if contains_patch_markers(&raw) {
                let blocks = parse_blocks(&raw);
                if blocks.is_empty() {
                    warn!(step = number, attempt, "edit markers without a complete block");
                    feedback = Some(empty_blocks_guidance());
                    last_error = StepError::terminal("generated edits had no complete block");
                    continue;
                }
                match apply_blocks_with_symbols(current, &blocks, self.collaborators.symbols.as_ref()) {
                    Ok(updated) => {
                        debug!(step = number, blocks = blocks.len(), "applied generated edits");
                        return Ok(updated);
                    }
                    Err(err) => {
                        warn!(step = number, path = %path.display(), attempt, error = %err, "generated edits did not apply");
                        feedback = Some(patch_repair_guidance(&err));
                        last_error = StepError::Patch(err);
                        continue;
                    }
                }
            }

            let content = clean_file_response(&raw);
            match self
                .vet_full_file(path, prompt, &content, Some(current), cancel)
                .await?
            {
                None => return Ok(normalize_generated_content(Some(current), content)),
                Some(reason) => {
                    warn!(step = number, path = %path.display(), attempt, %reason, "full-file rewrite rejected");
                    feedback = Some(rejected_content_guidance(&reason));
                    last_error =
                        StepError::terminal_with_detail("generated content was rejected", reason);
                }
            }
        }

        Err(last_error)
    }

    /// `None` when `content` can be written; otherwise why it cannot.
    async fn vet_full_file(
        &self,
        path: &Path,
        request: &str,
        content: &str,
        original: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, StepError> {
        match assess_full_file(content, path, original, self.config.min_full_file_chars) {
            FileVerdict::Plausible => Ok(None),
            FileVerdict::Rejected(reason) => Ok(Some(reason)),
            FileVerdict::Doubtful(concern) => {
                let parts = prompts::confirm_full_file_parts(path, request, content, &concern);
                let answer = self
                    .generate(0, parts, prompts::CONFIRM_FULL_FILE_SYSTEM, false, cancel)
                    .await?;
                if parse_confirmation(&answer) {
                    debug!(path = %path.display(), %concern, "doubtful content confirmed as complete");
                    Ok(None)
                } else {
                    Ok(Some(concern))
                }
            }
        }
    }

    async fn generate(
        &self,
        number: usize,
        prompt_parts: Vec<String>,
        system: &str,
        stream: bool,
        cancel: &CancellationToken,
    ) -> Result<String, StepError> {
        if cancel.is_cancelled() {
            return Err(StepError::Cancelled);
        }
        let request = GenerationRequest {
            prompt_parts,
            model: self.config.model.clone(),
            system_instruction: Some(system.to_string()),
        };

        let progress = self.collaborators.progress.clone();
        let on_chunk = move |chunk: &str| {
            if let Some(sink) = &progress {
                sink.emit(ProgressEvent::GenerationChunk {
                    step_number: number,
                    chars: chunk.chars().count(),
                });
            }
        };
        let callback: Option<ChunkCallback<'_>> = if stream { Some(&on_chunk) } else { None };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StepError::Cancelled),
            result = self.collaborators.generator.generate(request, callback, cancel) => result,
        };
        result.map_err(|e| StepError::from_collaborator("content generation", e))
    }
}

/// Last `lines` lines of process output.
fn tail(output: &str, lines: usize) -> String {
    let all: Vec<&str> = output.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
