//! The CarePilot agent: a ReAct reasoning loop over clinical tools.
//!
//! Each turn follows a **Think → Act → Observe** cycle:
//!
//! 1. **Build context** (instructions + tool catalogue + patient memory)
//! 2. **Ask the model** for one JSON step: a tool action or a final answer
//! 3. **If action**: execute the tool, append the observation, loop
//! 4. **If final answer**: verify grounding, store any assessment, return
//!
//! The loop stops at the final answer, the iteration limit, or
//! cancellation. [`AgentService`] wraps it with sessions and memory.

pub mod context;
pub mod grounding;
pub mod parser;
pub mod patterns;
pub mod service;
pub mod session;
pub mod stream_event;

pub use context::{DEFAULT_INSTRUCTIONS, MemoryContext, Transcript, system_prompt};
pub use grounding::{ClaimCheck, GroundingReport, GroundingVerifier};
pub use parser::{Decision, ParseError, parse_decision};
pub use patterns::{ReactAgent, ReactFailure, ReactRequest, ReactResult, ToolCallRecord};
pub use service::{AgentResponse, AgentService, PipelineResponse, RunMetadata};
pub use session::{EvictionPolicy, InMemorySessionStore, RunGuard, SessionManager};
pub use stream_event::AgentStreamEvent;
pub use tokio_util::sync::CancellationToken;
