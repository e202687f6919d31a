//! Plan execution for planwright.
//!
//! [`PlanExecutor`] runs a validated plan step by step against the host's
//! collaborators. [`PlanProducer`] turns a goal into a plan, and [`Session`]
//! ties the two together with bounded self-correction cycles.

pub mod content;
pub mod diff;
pub mod error;
pub mod executor;
#[cfg(test)]
mod fakes;
pub mod planner;
pub mod prompts;
pub mod retry;
pub mod session;

pub use error::StepError;
pub use executor::{
    Collaborators, ExecutionContext, PlanExecutor, PlanRunReport, SelfCorrectionRequest,
};
pub use planner::{PlanProducer, PlanningError};
pub use session::{Session, SessionReport};
