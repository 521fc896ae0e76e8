//! # CarePilot Core
//!
//! Domain types, traits, and error definitions for the CarePilot
//! discharge-readiness agent. This crate has **no framework dependencies**;
//! it defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here. Implementations live in
//! their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with scripted providers and closure-backed tools
//! - Clean dependency graph (all crates depend inward on core)

pub mod assessment;
pub mod clock;
pub mod error;
pub mod graph;
pub mod provider;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use assessment::{AssessmentRecord, DischargeAnalysis, DischargeStatus, RiskFactor, Severity};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use graph::ExecutionGraph;
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use session::{Session, SessionStatus, SessionStore, Step, StepOutcome};
pub use tool::{FnTool, Tool, ToolRegistry, ToolResult};
