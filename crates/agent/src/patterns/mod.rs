//! Agent patterns: structured reasoning strategies.
//!
//! CarePilot runs one autonomous pattern, **ReAct** (Thought → Action →
//! Observation with a visible trace). The deterministic alternative, a
//! fixed dependency plan, lives in `carepilot-workflow`.

pub mod react;

pub use react::{ReactAgent, ReactFailure, ReactRequest, ReactResult, ToolCallRecord};

#[cfg(test)]
pub(crate) mod test_helpers;
