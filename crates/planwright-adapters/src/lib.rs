//! Runtime adapters for planwright (config, filesystem, processes, persistence, model access).

pub mod change_log;
pub mod config;
pub mod diagnostics;
pub mod fs;
pub mod llm;
pub mod process;

pub use change_log::{JsonlChangeLog, RevertSummary};
pub use diagnostics::{CommandDiagnostics, NoDiagnostics};
pub use fs::LocalWorkspace;
pub use llm::ChatCompletionsClient;
pub use process::TokioProcessRunner;
