//! Deterministic pipeline execution for discharge assessments.
//!
//! A [`Plan`] is a static DAG of tool steps. The [`DependencyScheduler`]
//! runs it in waves: every step whose dependencies are satisfied runs
//! concurrently, and results are applied to the shared
//! [`ExecutionContext`] in plan order once the wave settles.

pub mod context;
pub mod plan;
pub mod scheduler;

pub use context::{ExecutionContext, StepInput, ToolOutput};
pub use plan::{Plan, PlannedStep};
pub use scheduler::{DependencyScheduler, PipelineRun, StepExecutor, StepRecord};
