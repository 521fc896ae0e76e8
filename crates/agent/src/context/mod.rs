//! Prompt construction for the reasoning loop.
//!
//! The system prompt is fixed for a run (instructions, tool catalog,
//! response format, memory context). The transcript grows by one
//! `Assistant:` / `Observation:` pair per iteration and is sent as the
//! user prompt on every call.

pub mod prompt;
pub mod transcript;

pub use prompt::{DEFAULT_INSTRUCTIONS, MemoryContext, system_prompt};
pub use transcript::Transcript;
