//! Execution tracing, cost estimation, and background evaluation for
//! CarePilot.
//!
//! Provides span-based tracing of every agent action (LLM calls, tool
//! executions, pipeline waves), cost estimation with built-in model
//! pricing, and a non-blocking evaluation queue that scores tool calls
//! and answers after the fact.

pub mod engine;
pub mod evaluation;
pub mod model;
pub mod pricing;

pub use engine::TelemetryEngine;
pub use evaluation::{
    AnswerSupportEvaluator, EvaluationJob, EvaluationOutcome, EvaluationQueue, Evaluator,
    ToolReliabilityEvaluator, default_evaluators,
};
pub use model::{Span, SpanKind, Trace, UsageSummary};
pub use pricing::{ModelPricing, PricingTable};
