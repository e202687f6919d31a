//! In-memory collaborators for engine tests.

use crate::executor::{Collaborators, PlanExecutor};
use async_trait::async_trait;
use planwright_core::{
    ChangeLog, ChangeLogEntry, ChunkCallback, CollabResult, CollaboratorError, ContentGenerator,
    Diagnostic, DiagnosticSource, EngineConfig, ExecutionPlan, FileSource, FileStat,
    GenerationRequest, PlanStep, ProcessOutput, ProcessRunner, ProgressEvent, ProgressSink,
    RecoveryChoice, Severity, StepAction, StepFailure, TextRange, UserInteraction, WorkspaceFs,
};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

// ═══════════════════════════════════════════════════════════════════════════
//  FAKE COLLABORATORS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    Dir,
    File(String),
}

#[derive(Default)]
pub(crate) struct MemoryFs {
    pub(crate) root: PathBuf,
    pub(crate) nodes: Mutex<HashMap<PathBuf, Node>>,
    pub(crate) ops: Mutex<Vec<String>>,
}

impl MemoryFs {
    pub(crate) fn with_file(self, path: &str, content: &str) -> Self {
        self.nodes
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), Node::File(content.to_string()));
        self
    }

    pub(crate) fn file(&self, path: &str) -> Option<String> {
        match self.nodes.lock().unwrap().get(Path::new(path)) {
            Some(Node::File(content)) => Some(content.clone()),
            _ => None,
        }
    }

    pub(crate) fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkspaceFs for MemoryFs {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn stat(&self, path: &Path) -> CollabResult<FileStat> {
        match self.nodes.lock().unwrap().get(path) {
            Some(Node::Dir) => Ok(FileStat { is_dir: true, len: 0 }),
            Some(Node::File(content)) => Ok(FileStat {
                is_dir: false,
                len: content.len() as u64,
            }),
            None => Err(CollaboratorError::NotFound(path.display().to_string())),
        }
    }

    async fn read_to_string(&self, path: &Path) -> CollabResult<String> {
        match self.nodes.lock().unwrap().get(path) {
            Some(Node::File(content)) => Ok(content.clone()),
            Some(Node::Dir) => Err(CollaboratorError::other("is a directory")),
            None => Err(CollaboratorError::NotFound(path.display().to_string())),
        }
    }

    async fn write(&self, path: &Path, content: &str) -> CollabResult<()> {
        self.ops
            .lock()
            .unwrap()
            .push(format!("write {}", path.display()));
        self.nodes
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), Node::File(content.to_string()));
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> CollabResult<()> {
        self.ops
            .lock()
            .unwrap()
            .push(format!("mkdir {}", path.display()));
        self.nodes
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), Node::Dir);
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> CollabResult<()> {
        self.nodes.lock().unwrap().remove(path);
        Ok(())
    }
}

/// Answers generation requests from a script, in order.
#[derive(Default)]
pub(crate) struct ScriptedGenerator {
    pub(crate) responses: Mutex<VecDeque<CollabResult<String>>>,
    pub(crate) requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub(crate) fn push_ok(&self, text: &str) -> &Self {
        self.responses.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub(crate) fn push_err(&self, message: &str) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(CollaboratorError::other(message)));
        self
    }

    pub(crate) fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        request: GenerationRequest,
        on_chunk: Option<ChunkCallback<'_>>,
        _cancel: &CancellationToken,
    ) -> CollabResult<String> {
        self.requests.lock().unwrap().push(request);
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(CollaboratorError::other("no scripted response")));
        if let (Some(on_chunk), Ok(text)) = (on_chunk, &response) {
            on_chunk(text.as_str());
        }
        response
    }
}

#[derive(Default)]
pub(crate) struct MapDiagnostics {
    pub(crate) by_path: Mutex<HashMap<PathBuf, Vec<Diagnostic>>>,
    /// Make every read hang for five minutes.
    pub(crate) stalled: AtomicBool,
}

impl MapDiagnostics {
    pub(crate) fn set(&self, path: &str, diagnostics: Vec<Diagnostic>) {
        self.by_path
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), diagnostics);
    }
}

#[async_trait]
impl DiagnosticSource for MapDiagnostics {
    async fn diagnostics(&self, path: &Path) -> CollabResult<Vec<Diagnostic>> {
        if self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_secs(300)).await;
        }
        Ok(self
            .by_path
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub(crate) struct ScriptedProcesses {
    pub(crate) outputs: Mutex<VecDeque<ProcessOutput>>,
    pub(crate) invocations: Mutex<Vec<Vec<String>>>,
    /// When set, every spawn blocks until its token is cancelled.
    pub(crate) hang: bool,
    pub(crate) killed: AtomicBool,
}

#[async_trait]
impl ProcessRunner for ScriptedProcesses {
    async fn spawn(
        &self,
        executable: &str,
        args: &[String],
        _cwd: &Path,
        cancel: &CancellationToken,
    ) -> CollabResult<ProcessOutput> {
        let mut invocation = vec![executable.to_string()];
        invocation.extend(args.iter().cloned());
        self.invocations.lock().unwrap().push(invocation);
        if self.hang {
            cancel.cancelled().await;
            self.killed.store(true, Ordering::SeqCst);
            return Err(CollaboratorError::Cancelled);
        }
        Ok(self.outputs.lock().unwrap().pop_front().unwrap_or(ProcessOutput {
            exit_code: Some(0),
            ..ProcessOutput::default()
        }))
    }
}

#[derive(Default)]
pub(crate) struct MemoryChangeLog {
    pub(crate) entries: Mutex<Vec<ChangeLogEntry>>,
}

#[async_trait]
impl ChangeLog for MemoryChangeLog {
    async fn append(&self, entry: ChangeLogEntry) -> CollabResult<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> CollabResult<Vec<ChangeLogEntry>> {
        let entries = self.entries.lock().unwrap();
        let start = entries.len().saturating_sub(limit);
        Ok(entries[start..].to_vec())
    }
}

#[derive(Default)]
pub(crate) struct ScriptedUser {
    pub(crate) choices: Mutex<VecDeque<RecoveryChoice>>,
    pub(crate) approve: bool,
    pub(crate) failures: Mutex<Vec<StepFailure>>,
    pub(crate) approvals_asked: Mutex<Vec<String>>,
}

#[async_trait]
impl UserInteraction for ScriptedUser {
    async fn choose_recovery(&self, failure: &StepFailure) -> RecoveryChoice {
        self.failures.lock().unwrap().push(failure.clone());
        self.choices
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RecoveryChoice::Cancel)
    }

    async fn approve_command(&self, command: &str) -> bool {
        self.approvals_asked
            .lock()
            .unwrap()
            .push(command.to_string());
        self.approve
    }
}

#[derive(Default)]
pub(crate) struct RecordingProgress {
    pub(crate) events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressSink for RecordingProgress {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub(crate) struct Harness {
    pub(crate) fs: Arc<MemoryFs>,
    pub(crate) generator: Arc<ScriptedGenerator>,
    pub(crate) diagnostics: Arc<MapDiagnostics>,
    pub(crate) processes: Arc<ScriptedProcesses>,
    pub(crate) change_log: Arc<MemoryChangeLog>,
    pub(crate) user: Arc<ScriptedUser>,
    pub(crate) progress: Arc<RecordingProgress>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_parts(MemoryFs::default(), ScriptedProcesses::default(), ScriptedUser::default())
    }

    pub(crate) fn with_parts(fs: MemoryFs, processes: ScriptedProcesses, user: ScriptedUser) -> Self {
        Self {
            fs: Arc::new(fs),
            generator: Arc::new(ScriptedGenerator::default()),
            diagnostics: Arc::new(MapDiagnostics::default()),
            processes: Arc::new(processes),
            change_log: Arc::new(MemoryChangeLog::default()),
            user: Arc::new(user),
            progress: Arc::new(RecordingProgress::default()),
        }
    }

    pub(crate) fn executor(&self, config: EngineConfig) -> PlanExecutor {
        let collaborators = Collaborators::new(
            self.generator.clone(),
            self.diagnostics.clone(),
            self.fs.clone(),
            self.processes.clone(),
            self.change_log.clone(),
            self.user.clone(),
        )
        .with_progress(self.progress.clone());
        PlanExecutor::new(collaborators, config)
    }

    pub(crate) fn entries(&self) -> Vec<ChangeLogEntry> {
        self.change_log.entries.lock().unwrap().clone()
    }

    pub(crate) fn failures(&self) -> Vec<StepFailure> {
        self.user.failures.lock().unwrap().clone()
    }
}

pub(crate) fn config() -> EngineConfig {
    EngineConfig {
        auto_approve_commands: true,
        min_full_file_chars: 10,
        ..EngineConfig::default()
    }
}

pub(crate) fn plan(steps: Vec<PlanStep>) -> ExecutionPlan {
    ExecutionPlan {
        description: "test plan".into(),
        steps,
    }
}

pub(crate) fn create_file(path: &str, content: &str) -> PlanStep {
    PlanStep::new(StepAction::CreateFile {
        path: PathBuf::from(path),
        source: FileSource::Content(content.to_string()),
        use_content_agent: false,
    })
}

pub(crate) fn generate_file(path: &str, prompt: &str) -> PlanStep {
    PlanStep::new(StepAction::CreateFile {
        path: PathBuf::from(path),
        source: FileSource::GeneratePrompt(prompt.to_string()),
        use_content_agent: false,
    })
}

pub(crate) fn modify_file(path: &str, prompt: &str) -> PlanStep {
    PlanStep::new(StepAction::ModifyFile {
        path: PathBuf::from(path),
        modification_prompt: prompt.to_string(),
    })
}

pub(crate) fn run_command(command: &str) -> PlanStep {
    PlanStep::new(StepAction::RunCommand {
        command: command.to_string(),
    })
}

pub(crate) fn error_at(line: u32, message: &str) -> Diagnostic {
    Diagnostic {
        severity: Severity::Error,
        range: TextRange::point(line, 1),
        message: message.to_string(),
    }
}

pub(crate) const VALID_FILE: &str = "export function greet(name: string): string {\n  return `hi ${name}`;\n}\n";
