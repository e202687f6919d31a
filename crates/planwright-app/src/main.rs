//! planwright - plan-driven code changes from the terminal
//!
//! Validates and executes structured change plans, asks a model to write
//! them from a goal, and self-corrects against the project's diagnostics.

mod logging;
mod terminal;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use planwright_adapters::{
    config, ChatCompletionsClient, CommandDiagnostics, JsonlChangeLog, LocalWorkspace,
    NoDiagnostics, TokioProcessRunner,
};
use planwright_core::{
    validate_plan, ChunkCallback, CollabResult, CollaboratorError, ContentGenerator,
    DiagnosticSource, EngineConfig, ExecutionPlan, GenerationRequest, IgnoreRules, RunOutcome,
};
use planwright_engine::{Collaborators, PlanExecutor, PlanProducer, Session, SessionReport};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use terminal::{TerminalProgress, TerminalUser};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "planwright",
    about = "Plan-driven code changes with self-correction",
    version
)]
struct Args {
    /// Project root (defaults to current directory)
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Run plan commands without asking
    #[arg(long, short = 'y', global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a plan file and print its execution order
    Validate { plan: PathBuf },
    /// Execute a plan file
    Run {
        plan: PathBuf,
        /// File whose contents are given to the model as project context
        #[arg(long)]
        context: Option<PathBuf>,
    },
    /// Ask the model for a plan and execute it
    Goal {
        goal: String,
        #[arg(long)]
        context: Option<PathBuf>,
    },
    /// Undo the most recent run
    Revert,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    match run(Args::parse()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("  Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let root = args
        .root
        .canonicalize()
        .with_context(|| format!("project root {} not found", args.root.display()))?;
    let mut engine_config = config::load(&root);
    if args.yes {
        engine_config.auto_approve_commands = true;
    }
    let ignore = IgnoreRules::load(&root, &engine_config.ignore_patterns);
    tracing::debug!(root = %root.display(), model = %engine_config.model, "configuration loaded");

    match args.command {
        Command::Validate { plan } => {
            let plan = load_plan(&plan, &ignore)?;
            print_plan(&plan);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { plan, context } => {
            let plan = load_plan(&plan, &ignore)?;
            let project_context = read_context(context.as_deref())?;
            let session = build_session(&root, engine_config, ignore);
            let cancel = cancel_on_ctrl_c();
            let report = session
                .run_plan(&plan, &plan.description, &project_context, &cancel)
                .await?;
            Ok(print_report(&report))
        }
        Command::Goal { goal, context } => {
            let project_context = read_context(context.as_deref())?;
            let session = build_session(&root, engine_config, ignore);
            let cancel = cancel_on_ctrl_c();
            let report = session.run_goal(&goal, &project_context, &cancel).await?;
            Ok(print_report(&report))
        }
        Command::Revert => {
            let log = JsonlChangeLog::new(&root);
            let workspace = LocalWorkspace::new(&root);
            match log.revert_last_run(&workspace).await? {
                Some(summary) => {
                    eprintln!("  Reverted run {}", summary.run_id);
                    for path in &summary.restored {
                        eprintln!("    restored {}", path.display());
                    }
                    for path in &summary.removed {
                        eprintln!("    removed  {}", path.display());
                    }
                }
                None => eprintln!("  Nothing to revert"),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_plan(path: &Path, ignore: &IgnoreRules) -> Result<ExecutionPlan> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read plan {}", path.display()))?;
    validate_plan(text.as_str(), ignore).with_context(|| format!("invalid plan {}", path.display()))
}

fn read_context(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read context {}", path.display())),
        None => Ok(String::new()),
    }
}

/// Stands in for the model client when no API key is set, so plans with
/// only literal content still run.
struct UnconfiguredGenerator(String);

#[async_trait]
impl ContentGenerator for UnconfiguredGenerator {
    async fn generate(
        &self,
        _request: GenerationRequest,
        _on_chunk: Option<ChunkCallback<'_>>,
        _cancel: &CancellationToken,
    ) -> CollabResult<String> {
        Err(CollaboratorError::other(self.0.clone()))
    }
}

fn build_session(root: &Path, engine_config: EngineConfig, ignore: IgnoreRules) -> Session {
    let generator: Arc<dyn ContentGenerator> = match ChatCompletionsClient::from_env() {
        Ok(client) => Arc::new(client),
        Err(err) => Arc::new(UnconfiguredGenerator(format!("{:#}", err))),
    };
    let fs = Arc::new(LocalWorkspace::new(root));
    let processes = Arc::new(TokioProcessRunner);
    let diagnostics: Arc<dyn DiagnosticSource> = match &engine_config.diagnostics_command {
        Some(command) => Arc::new(CommandDiagnostics::new(
            command.clone(),
            fs.clone(),
            processes.clone(),
            engine_config.command_timeout(),
        )),
        None => Arc::new(NoDiagnostics),
    };

    let collaborators = Collaborators::new(
        generator.clone(),
        diagnostics,
        fs,
        processes,
        Arc::new(JsonlChangeLog::new(root)),
        Arc::new(TerminalUser),
    )
    .with_progress(Arc::new(TerminalProgress));
    let producer = PlanProducer::new(generator, ignore, &engine_config);
    Session::new(PlanExecutor::new(collaborators, engine_config), producer)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  Cancelling...");
            trigger.cancel();
        }
    });
    cancel
}

fn print_plan(plan: &ExecutionPlan) {
    let ordered = plan.clone().normalized();
    eprintln!("  {}", ordered.description);
    for (idx, step) in ordered.steps.iter().enumerate() {
        eprintln!("  {:>3}. {}", idx + 1, step.summary());
    }
}

fn print_report(report: &SessionReport) -> ExitCode {
    for (cycle, run) in report.runs.iter().enumerate() {
        let label = if cycle == 0 {
            "Run".to_string()
        } else {
            format!("Correction {}", cycle)
        };
        eprintln!(
            "\n  {}: {} ({}/{} steps, {} skipped)",
            label,
            run.outcome.label(),
            run.completed_steps,
            run.total_steps,
            run.skipped_steps.len()
        );
        for path in &run.affected_files {
            eprintln!("    changed {}", path.display());
        }
        for (path, diagnostics) in &run.error_diagnostics {
            for diagnostic in diagnostics {
                eprintln!(
                    "    {}:{}:{}: {}",
                    path.display(),
                    diagnostic.range.start_line,
                    diagnostic.range.start_column,
                    diagnostic.message
                );
            }
        }
        if let Some(failure) = &run.failure {
            eprintln!(
                "    step {} failed: {}",
                failure.step_number, failure.reason
            );
        }
    }

    match report.outcome() {
        RunOutcome::Success | RunOutcome::SuccessWithErrors => ExitCode::SUCCESS,
        RunOutcome::Cancelled | RunOutcome::Failed => ExitCode::FAILURE,
    }
}
