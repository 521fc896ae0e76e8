//! ReAct pattern: Thought → Action → Observation loop.
//!
//! Each iteration sends the growing transcript to the model and parses one
//! JSON decision from the reply: call a tool, or give a final answer. The
//! model call is the only non-deterministic step; everything around it is
//! a plain interpreter over [`Decision`] values.
//!
//! # Failure handling
//!
//! - Tool errors, panics and unknown tool names become observation text;
//!   the model sees them and can adapt.
//! - An unparseable reply gets exactly one reformat retry. If that also
//!   fails, the iteration records a "Parse error" step with no action.
//! - Provider errors and cancellation end the run. Steps taken before the
//!   failure are returned in [`ReactFailure`].
//! - Hitting `max_iterations` is not an error: the answer is synthesized
//!   from the last three observations and `hit_max_iterations` is set.

use carepilot_core::error::Error;
use carepilot_core::graph::{ExecutionGraph, GraphNode, NodeStatus};
use carepilot_core::provider::{Provider, ProviderRequest, Usage};
use carepilot_core::session::{Step, StepOutcome};
use carepilot_core::tool::{ToolRegistry, ToolResult};
use carepilot_telemetry::{PricingTable, Span, SpanKind, TelemetryEngine};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{DEFAULT_INSTRUCTIONS, MemoryContext, Transcript, system_prompt};
use crate::parser::{Decision, ParseError, parse_decision};
use crate::stream_event::AgentStreamEvent;

/// Observations folded into the answer when the iteration limit is hit.
const FALLBACK_OBSERVATIONS: usize = 3;

/// The autonomous reasoning agent.
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct ReactAgent {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    tools: Arc<ToolRegistry>,
    instructions: String,
    max_iterations: u32,
    pricing: Arc<PricingTable>,
    telemetry: Option<Arc<TelemetryEngine>>,
}

/// Input for one run.
pub struct ReactRequest<'a> {
    pub session_id: &'a str,
    pub goal: &'a str,
    pub memory: &'a MemoryContext,
}

/// One tool invocation made during a run.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub iteration: u32,
    pub tool: String,
    pub args: serde_json::Value,
    pub result: ToolResult,
}

/// The result of a completed ReAct run.
#[derive(Debug, Clone)]
pub struct ReactResult {
    pub answer: String,
    pub steps: Vec<Step>,
    /// Distinct tools invoked, in first-use order.
    pub tools_used: Vec<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Every observation, in order.
    pub observations: Vec<String>,
    pub iterations: u32,
    pub reasoning_trace: Vec<String>,
    pub hit_max_iterations: bool,
    pub usage: Usage,
    pub llm_calls: u32,
    pub estimated_cost_usd: f64,
    pub latency_ms: u64,
    pub graph: ExecutionGraph,
    pub model: String,
}

/// A run that ended in a fatal error, with the steps taken before it.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct ReactFailure {
    pub error: Error,
    pub steps: Vec<Step>,
    pub reasoning_trace: Vec<String>,
}

#[derive(Default)]
struct RunState {
    steps: Vec<Step>,
    trace: Vec<String>,
    observations: Vec<String>,
    tool_calls: Vec<ToolCallRecord>,
    tools_used: Vec<String>,
    usage: Usage,
    llm_calls: u32,
    cost: f64,
    graph: ExecutionGraph,
}

impl RunState {
    fn record_step(&mut self, step: Step, label: &str, tool: Option<&str>, status: NodeStatus, ms: u64) {
        self.graph.chain(GraphNode {
            id: format!("iter-{}", step.iteration),
            label: label.to_string(),
            tool: tool.map(str::to_string),
            wave: None,
            status,
            duration_ms: ms,
        });
        self.steps.push(step);
    }
}

/// Where the per-call context comes from, bundled to keep signatures short.
struct CallContext<'a> {
    session_id: &'a str,
    cancel: &'a CancellationToken,
    events: Option<&'a mpsc::Sender<AgentStreamEvent>>,
    trace_id: Option<&'a str>,
}

impl CallContext<'_> {
    async fn emit(&self, event: AgentStreamEvent) {
        if let Some(tx) = self.events {
            // A dropped receiver only stops the stream, never the run.
            let _ = tx.send(event).await;
        }
    }
}

impl ReactAgent {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.2,
            max_tokens: None,
            tools,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            max_iterations: 10,
            pricing: Arc::new(PricingTable::with_defaults()),
            telemetry: None,
        }
    }

    /// Set max iterations. Values below 1 are raised to 1.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Pricing used for cost estimates when no telemetry engine is attached.
    pub fn with_pricing(mut self, pricing: Arc<PricingTable>) -> Self {
        self.pricing = pricing;
        self
    }

    /// Attach a telemetry engine for execution tracing and cost tracking.
    pub fn with_telemetry(mut self, engine: Arc<TelemetryEngine>) -> Self {
        self.telemetry = Some(engine);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Execute the loop to completion.
    pub async fn run(
        &self,
        request: ReactRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<ReactResult, ReactFailure> {
        self.run_with_events(request, cancel, None).await
    }

    /// Execute the loop, emitting each thought, action and observation to
    /// `events` as it happens.
    pub async fn run_with_events(
        &self,
        request: ReactRequest<'_>,
        cancel: &CancellationToken,
        events: Option<&mpsc::Sender<AgentStreamEvent>>,
    ) -> Result<ReactResult, ReactFailure> {
        let started = Instant::now();
        let trace_id = self
            .telemetry
            .as_ref()
            .map(|t| t.start_trace(request.session_id));
        let ctx = CallContext {
            session_id: request.session_id,
            cancel,
            events,
            trace_id: trace_id.as_deref(),
        };

        let mut state = RunState::default();
        let outcome = self.drive(&request, &ctx, &mut state).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        if let (Some(telemetry), Some(tid)) = (&self.telemetry, &trace_id) {
            let mut span = Span::new(SpanKind::Turn, "react_run")
                .with_metadata("session_id", request.session_id)
                .with_metadata("goal", request.goal)
                .with_metadata("iterations", state.steps.len());
            if let Ok((answer, hit_max)) = &outcome {
                span.set_output(serde_json::json!({
                    "answer": answer,
                    "hit_max_iterations": hit_max,
                }));
            }
            span.end_with_duration(outcome.is_ok(), latency_ms);
            telemetry.record_span(tid, span);
            telemetry.end_trace(tid);
        }

        match outcome {
            Ok((answer, hit_max_iterations)) => {
                info!(
                    session_id = request.session_id,
                    iterations = state.steps.len(),
                    tool_calls = state.tool_calls.len(),
                    hit_max_iterations,
                    latency_ms,
                    "ReAct loop completed"
                );
                Ok(ReactResult {
                    answer,
                    iterations: state.steps.len() as u32,
                    steps: state.steps,
                    tools_used: state.tools_used,
                    tool_calls: state.tool_calls,
                    observations: state.observations,
                    reasoning_trace: state.trace,
                    hit_max_iterations,
                    usage: state.usage,
                    llm_calls: state.llm_calls,
                    estimated_cost_usd: state.cost,
                    latency_ms,
                    graph: state.graph,
                    model: self.model.clone(),
                })
            }
            Err(error) => {
                warn!(session_id = request.session_id, %error, steps = state.steps.len(), "ReAct loop failed");
                Err(ReactFailure {
                    error,
                    steps: state.steps,
                    reasoning_trace: state.trace,
                })
            }
        }
    }

    async fn drive(
        &self,
        request: &ReactRequest<'_>,
        ctx: &CallContext<'_>,
        state: &mut RunState,
    ) -> Result<(String, bool), Error> {
        let system = system_prompt(&self.instructions, &self.tools.definitions(), request.memory);
        let mut transcript = Transcript::new(request.goal);

        info!(
            session_id = ctx.session_id,
            model = %self.model,
            max_iterations = self.max_iterations,
            "ReAct loop starting"
        );

        for iteration in 1..=self.max_iterations {
            debug!(session_id = ctx.session_id, iteration, "ReAct iteration");
            let iteration_started = Instant::now();
            let decision = self
                .decide(&system, &transcript, iteration, ctx, state)
                .await?;

            match decision {
                Ok(Decision::Finish { thought, answer }) => {
                    ctx.emit(AgentStreamEvent::Thought {
                        iteration,
                        content: thought.clone(),
                    })
                    .await;
                    state.trace.push(format!("Thought: {thought}"));
                    state.trace.push(format!("Final answer: {answer}"));
                    let step = Step {
                        iteration,
                        thought,
                        outcome: StepOutcome::Final {
                            answer: answer.clone(),
                        },
                        timestamp: Utc::now(),
                    };
                    let ms = iteration_started.elapsed().as_millis() as u64;
                    state.record_step(step, "final_answer", None, NodeStatus::Succeeded, ms);
                    return Ok((answer, false));
                }
                Ok(Decision::Act {
                    thought,
                    tool,
                    args,
                }) => {
                    ctx.emit(AgentStreamEvent::Thought {
                        iteration,
                        content: thought.clone(),
                    })
                    .await;
                    ctx.emit(AgentStreamEvent::Action {
                        iteration,
                        tool: tool.clone(),
                        args: args.clone(),
                    })
                    .await;
                    state.trace.push(format!("Thought: {thought}"));
                    state.trace.push(format!("Action: {tool}({args})"));

                    let (observation, success) = self.act(&tool, &args, iteration, ctx, state).await?;

                    ctx.emit(AgentStreamEvent::Observation {
                        iteration,
                        tool: Some(tool.clone()),
                        content: observation.clone(),
                        success,
                    })
                    .await;
                    state.trace.push(format!("Observation: {observation}"));
                    transcript.push_action(&thought, &tool, &args);
                    transcript.push_observation(observation.clone());
                    state.observations.push(observation.clone());

                    let status = if success {
                        NodeStatus::Succeeded
                    } else {
                        NodeStatus::Failed
                    };
                    let step = Step {
                        iteration,
                        thought,
                        outcome: StepOutcome::Action {
                            tool: tool.clone(),
                            args,
                            observation,
                        },
                        timestamp: Utc::now(),
                    };
                    let ms = iteration_started.elapsed().as_millis() as u64;
                    state.record_step(step, &tool, Some(&tool), status, ms);
                }
                Err(parse_error) => {
                    let thought = "Parse error".to_string();
                    let observation =
                        format!("Parse error: {parse_error}. No action was taken this iteration.");
                    ctx.emit(AgentStreamEvent::Thought {
                        iteration,
                        content: thought.clone(),
                    })
                    .await;
                    ctx.emit(AgentStreamEvent::Observation {
                        iteration,
                        tool: None,
                        content: observation.clone(),
                        success: false,
                    })
                    .await;
                    state.trace.push(format!("Thought: {thought}"));
                    state.trace.push(format!("Observation: {observation}"));
                    transcript.push_thought(&thought);
                    transcript.push_observation(observation.clone());
                    state.observations.push(observation.clone());

                    let step = Step {
                        iteration,
                        thought,
                        outcome: StepOutcome::NoAction { observation },
                        timestamp: Utc::now(),
                    };
                    let ms = iteration_started.elapsed().as_millis() as u64;
                    state.record_step(step, "parse_error", None, NodeStatus::Failed, ms);
                }
            }
        }

        warn!(
            session_id = ctx.session_id,
            max_iterations = self.max_iterations,
            "ReAct: max iterations reached"
        );
        Ok((fallback_answer(&state.observations, self.max_iterations), true))
    }

    /// One model call, plus one reformat retry if the reply does not parse.
    async fn decide(
        &self,
        system: &str,
        transcript: &Transcript,
        iteration: u32,
        ctx: &CallContext<'_>,
        state: &mut RunState,
    ) -> Result<Result<Decision, ParseError>, Error> {
        let raw = self
            .call_model(system, transcript.render(), iteration, false, ctx, state)
            .await?;
        let error = match parse_decision(&raw) {
            Ok(decision) => return Ok(Ok(decision)),
            Err(e) => e,
        };

        debug!(session_id = ctx.session_id, iteration, %error, "Unparseable reply, retrying once");
        let retry_prompt = transcript.render_reformat_request(&raw, &error.to_string());
        let raw = self
            .call_model(system, retry_prompt, iteration, true, ctx, state)
            .await?;
        let parsed = parse_decision(&raw);
        if let Err(ref e) = parsed {
            warn!(session_id = ctx.session_id, iteration, error = %e, "Retry reply also unparseable");
        }
        Ok(parsed)
    }

    async fn call_model(
        &self,
        system: &str,
        prompt: String,
        iteration: u32,
        retry: bool,
        ctx: &CallContext<'_>,
        state: &mut RunState,
    ) -> Result<String, Error> {
        let mut request = ProviderRequest::new(&self.model, prompt)
            .with_system_prompt(system)
            .with_metadata("session_id", ctx.session_id)
            .with_metadata("iteration", iteration)
            .with_metadata("retry", retry);
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;

        let started = Instant::now();
        let response = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            response = self.provider.generate(request) => response?,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        state.llm_calls += 1;
        let mut cost = 0.0;
        if let Some(usage) = &response.usage {
            state.usage.add(usage);
            cost = self.estimate_cost(&response.model, usage);
            state.cost += cost;
        }

        if let (Some(telemetry), Some(tid)) = (&self.telemetry, ctx.trace_id) {
            let mut span = Span::new(SpanKind::LlmCall, &response.model)
                .with_metadata("iteration", iteration)
                .with_metadata("retry", retry);
            if let Some(usage) = &response.usage {
                span.record_tokens(usage.prompt_tokens, usage.completion_tokens, cost);
            }
            span.end_with_duration(true, duration_ms);
            telemetry.record_span(tid, span);
        }

        Ok(response.content)
    }

    async fn act(
        &self,
        tool: &str,
        args: &serde_json::Value,
        iteration: u32,
        ctx: &CallContext<'_>,
        state: &mut RunState,
    ) -> Result<(String, bool), Error> {
        if !self.tools.contains(tool) {
            warn!(session_id = ctx.session_id, tool, "Model requested an unknown tool");
            let observation = format!(
                "Error: Unknown tool '{tool}'. Valid tools: {}",
                self.tools.names().join(", ")
            );
            return Ok((observation, false));
        }

        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            result = self.tools.execute(tool, args.clone()) => result,
        };

        if let (Some(telemetry), Some(tid)) = (&self.telemetry, ctx.trace_id) {
            let mut span = Span::new(SpanKind::ToolExecution, tool)
                .with_metadata("iteration", iteration)
                .with_metadata("args", args.clone());
            span.set_output(serde_json::to_value(&result).unwrap_or_default());
            span.end_with_duration(result.success, result.duration_ms);
            telemetry.record_span(tid, span);
        }

        if !state.tools_used.iter().any(|t| t == tool) {
            state.tools_used.push(tool.to_string());
        }
        let observation = result.to_observation();
        let success = result.success;
        state.tool_calls.push(ToolCallRecord {
            iteration,
            tool: tool.to_string(),
            args: args.clone(),
            result,
        });
        Ok((observation, success))
    }

    /// Estimated USD cost of `usage` on `model`.
    pub fn estimate_cost(&self, model: &str, usage: &Usage) -> f64 {
        match &self.telemetry {
            Some(telemetry) => {
                telemetry.compute_cost(model, usage.prompt_tokens, usage.completion_tokens)
            }
            None => self
                .pricing
                .compute_cost(model, usage.prompt_tokens, usage.completion_tokens),
        }
    }
}

/// Best-effort answer from the last few observations.
fn fallback_answer(observations: &[String], max_iterations: u32) -> String {
    let start = observations.len().saturating_sub(FALLBACK_OBSERVATIONS);
    let recent = &observations[start..];
    if recent.is_empty() {
        return format!(
            "Reached the maximum of {max_iterations} reasoning iterations without a final answer."
        );
    }
    format!(
        "Reached the maximum of {max_iterations} reasoning iterations without a final answer. \
         Most recent observations:\n{}",
        recent.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_helpers::*;
    use carepilot_core::error::ProviderError;
    use serde_json::json;

    fn agent(provider: Arc<dyn Provider>) -> ReactAgent {
        ReactAgent::new(provider, "openai/gpt-4o", discharge_tools())
    }

    async fn run(agent: &ReactAgent, goal: &str) -> Result<ReactResult, ReactFailure> {
        let memory = MemoryContext::default();
        agent
            .run(
                ReactRequest {
                    session_id: "s-1",
                    goal,
                    memory: &memory,
                },
                &CancellationToken::new(),
            )
            .await
    }

    #[tokio::test]
    async fn single_final_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![&final_answer("Ready for discharge.")]));
        let result = run(&agent(provider.clone()), "Assess P-1").await.unwrap();

        assert_eq!(result.answer, "Ready for discharge.");
        assert_eq!(result.iterations, 1);
        assert!(!result.hit_max_iterations);
        assert!(result.tools_used.is_empty());
        assert!(result.steps[0].is_final());
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn action_then_answer_grows_transcript() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            &action("fetch_patient", json!({"patient_id": "P-1"})),
            &final_answer("Score 72, caution."),
        ]));
        let result = run(&agent(provider.clone()), "Assess P-1").await.unwrap();

        assert_eq!(result.iterations, 2);
        assert_eq!(result.tools_used, vec!["fetch_patient"]);
        let (tool, args) = result.steps[0].action().unwrap();
        assert_eq!(tool, "fetch_patient");
        assert_eq!(args["patient_id"], "P-1");
        assert!(result.steps[0].observation().unwrap().contains("warfarin"));

        // The second call sees the first action and its observation.
        let second = &provider.requests()[1].prompt;
        assert!(second.contains("Assistant: "));
        assert!(second.contains("Observation: "));
        assert!(second.contains("warfarin"));
        assert_eq!(result.graph.nodes.len(), 2);
        assert_eq!(result.graph.edges.len(), 1);
    }

    #[tokio::test]
    async fn tool_errors_and_panics_become_observations() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            &action("estimate_costs", json!({})),
            &action("retrieve_knowledge", json!({"query": "warfarin"})),
            &final_answer("Done despite failures."),
        ]));
        let result = run(&agent(provider), "Assess P-1").await.unwrap();

        assert_eq!(result.answer, "Done despite failures.");
        let first = result.steps[0].observation().unwrap();
        assert!(first.starts_with("Error:"));
        assert!(first.contains("billing service unavailable"));
        let second = result.steps[1].observation().unwrap();
        assert!(second.contains("index corrupted"));
        assert_eq!(result.tool_calls.len(), 2);
        assert!(result.tool_calls.iter().all(|c| !c.result.success));
    }

    #[tokio::test]
    async fn unknown_tool_lists_valid_names() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            &action("lookup_insurance", json!({})),
            &final_answer("ok"),
        ]));
        let result = run(&agent(provider), "Assess").await.unwrap();

        let observation = result.steps[0].observation().unwrap();
        assert!(observation.contains("Unknown tool 'lookup_insurance'"));
        assert!(observation.contains("estimate_costs, fetch_patient, retrieve_knowledge"));
        assert!(result.tools_used.is_empty());
    }

    #[tokio::test]
    async fn always_unknown_tool_hits_max_iterations() {
        let reply = r#"{"thought":"x","action":{"tool":"missing","args":{}}}"#;
        let provider = Arc::new(ScriptedProvider::repeating(reply));
        let agent = agent(provider.clone()).with_max_iterations(4);
        let result = run(&agent, "Assess").await.unwrap();

        assert!(result.hit_max_iterations);
        assert_eq!(result.iterations, 4);
        assert_eq!(result.steps.len(), 4);
        assert!(result.steps.iter().all(|s| !s.is_final()));
        assert_eq!(provider.call_count(), 4);
        // Fallback carries the last three observations.
        assert_eq!(result.answer.matches("Unknown tool 'missing'").count(), 3);
    }

    #[tokio::test]
    async fn parse_retry_recovers() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            "I think the patient is fine",
            &final_answer("Ready."),
        ]));
        let result = run(&agent(provider.clone()), "Assess").await.unwrap();

        assert_eq!(result.answer, "Ready.");
        assert_eq!(result.iterations, 1);
        assert_eq!(result.llm_calls, 2);
        assert_eq!(result.usage.total_tokens, 240);
        let retry = &provider.requests()[1];
        assert!(retry.prompt.contains("I think the patient is fine"));
        assert_eq!(retry.metadata["retry"], true);
    }

    #[tokio::test]
    async fn double_parse_failure_continues_without_action() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            "garbage",
            "still garbage",
            &final_answer("Recovered."),
        ]));
        let result = run(&agent(provider), "Assess").await.unwrap();

        assert_eq!(result.iterations, 2);
        assert_eq!(result.steps[0].thought, "Parse error");
        assert!(result.steps[0].action().is_none());
        assert!(!result.steps[0].is_final());
        assert!(result.steps[0].observation().unwrap().starts_with("Parse error"));
        assert_eq!(result.answer, "Recovered.");
    }

    #[tokio::test]
    async fn provider_failure_is_fatal_but_keeps_steps() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![&action("fetch_patient", json!({"patient_id": "P-1"}))])
                .then_error(ProviderError::Timeout("30s".into())),
        );
        let failure = run(&agent(provider), "Assess").await.unwrap_err();

        assert!(matches!(failure.error, Error::Provider(ProviderError::Timeout(_))));
        assert_eq!(failure.steps.len(), 1);
        assert!(!failure.reasoning_trace.is_empty());
    }

    #[tokio::test]
    async fn cancellation_aborts_model_call() {
        let agent = agent(Arc::new(HangingProvider));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let memory = MemoryContext::default();
        let failure = agent
            .run(
                ReactRequest {
                    session_id: "s-1",
                    goal: "Assess",
                    memory: &memory,
                },
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(failure.error, Error::Cancelled));
        assert!(failure.steps.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_tool_call() {
        let telemetry = Arc::new(TelemetryEngine::new());
        let provider = Arc::new(ScriptedProvider::new(vec![&action(
            "monitor_vitals",
            json!({"patient_id": "P-1"}),
        )]));
        let agent = ReactAgent::new(provider.clone(), "openai/gpt-4o", hanging_tools())
            .with_telemetry(telemetry.clone());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let memory = MemoryContext::default();
        let failure = agent
            .run(
                ReactRequest {
                    session_id: "s-1",
                    goal: "Assess",
                    memory: &memory,
                },
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(failure.error, Error::Cancelled));
        assert_eq!(provider.call_count(), 1);
        assert!(failure.steps.is_empty());
        assert!(
            failure
                .reasoning_trace
                .iter()
                .all(|line| !line.starts_with("Observation:"))
        );

        let traces = telemetry.traces_for_session("s-1");
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].count(SpanKind::ToolExecution), 0);
    }

    #[tokio::test]
    async fn events_mirror_the_loop() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            &action("fetch_patient", json!({"patient_id": "P-1"})),
            &final_answer("Ready."),
        ]));
        let agent = agent(provider);
        let (tx, mut rx) = mpsc::channel(32);
        let memory = MemoryContext::default();
        agent
            .run_with_events(
                ReactRequest {
                    session_id: "s-1",
                    goal: "Assess",
                    memory: &memory,
                },
                &CancellationToken::new(),
                Some(&tx),
            )
            .await
            .unwrap();
        drop(tx);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.event_type());
        }
        assert_eq!(kinds, vec!["thought", "action", "observation", "thought"]);
    }

    #[tokio::test]
    async fn telemetry_and_cost_recorded() {
        let telemetry = Arc::new(TelemetryEngine::new());
        let provider = Arc::new(ScriptedProvider::new(vec![
            &action("fetch_patient", json!({"patient_id": "P-1"})),
            &final_answer("Ready."),
        ]));
        let agent = agent(provider).with_telemetry(telemetry.clone());
        let result = run(&agent, "Assess").await.unwrap();

        // gpt-4o: 2.5 in / 10 out per 1M; two calls of 100 in / 20 out.
        let expected = 2.0 * (100.0 * 2.5 + 20.0 * 10.0) / 1_000_000.0;
        assert!((result.estimated_cost_usd - expected).abs() < 1e-12);

        let traces = telemetry.traces_for_session("s-1");
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].count(SpanKind::LlmCall), 2);
        assert_eq!(traces[0].count(SpanKind::ToolExecution), 1);
        assert_eq!(traces[0].count(SpanKind::Turn), 1);
    }

    #[test]
    fn fallback_answer_without_observations() {
        let text = fallback_answer(&[], 3);
        assert!(text.contains("maximum of 3"));
        let text = fallback_answer(&["a".into(), "b".into(), "c".into(), "d".into()], 4);
        assert!(text.ends_with("b\nc\nd"));
    }
}
