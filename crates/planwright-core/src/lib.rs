//! Core domain model and contracts for planwright.
//!
//! Holds the plan model and validator, the search/replace patch engine, and
//! the collaborator traits the execution engine is written against.

pub mod config;
pub mod ignore;
pub mod patch;
pub mod plan;
pub mod protocol;
pub mod util;
pub mod validate;

pub use config::EngineConfig;
pub use ignore::IgnoreRules;
pub use patch::{apply_blocks, apply_blocks_with_symbols, parse_blocks, PatchBlock, PatchError};
pub use plan::{ExecutionPlan, FileSource, PlanStep, StepAction, StepKind};
pub use protocol::*;
pub use validate::{validate_plan, PlanPayload, PlanValidationError};

/// Re-exported so hosts share the engine's cancellation type.
pub use tokio_util::sync::CancellationToken;
