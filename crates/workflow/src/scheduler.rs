//! Wave-based dependency scheduler.
//!
//! Each wave is every not-yet-completed step whose dependencies have all
//! completed. A wave's steps run concurrently; once all of them settle,
//! their results are applied to the shared context in plan order, then
//! the next wave is formed.

use crate::context::{ExecutionContext, StepInput};
use crate::plan::{Plan, PlannedStep};
use async_trait::async_trait;
use carepilot_core::error::PipelineError;
use carepilot_core::graph::{GraphNode, NodeStatus};
use carepilot_core::{Error, ExecutionGraph, Result, ToolRegistry, ToolResult};
use carepilot_telemetry::{Span, SpanKind, TelemetryEngine};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs one step's tool. Must not fail: errors come back as results.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, tool: &str, args: serde_json::Value) -> ToolResult;
}

#[async_trait]
impl StepExecutor for ToolRegistry {
    async fn execute(&self, tool: &str, args: serde_json::Value) -> ToolResult {
        ToolRegistry::execute(self, tool, args).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub order: u32,
    pub tool: String,
    pub wave: usize,
    pub required: bool,
    pub result: ToolResult,
}

/// Everything a completed pipeline run produced.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub context: ExecutionContext,
    /// Step orders per wave, each in plan order
    pub waves: Vec<Vec<u32>>,
    /// Orders in the sequence they were marked complete
    pub completed_orders: Vec<u32>,
    pub step_records: Vec<StepRecord>,
    pub graph: ExecutionGraph,
    pub duration_ms: u64,
}

pub struct DependencyScheduler {
    executor: Arc<dyn StepExecutor>,
    telemetry: Option<Arc<TelemetryEngine>>,
}

impl DependencyScheduler {
    pub fn new(executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            executor,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, engine: Arc<TelemetryEngine>) -> Self {
        self.telemetry = Some(engine);
        self
    }

    /// Execute `plan` to completion.
    ///
    /// Fails on an invalid plan, a dependency deadlock, a failed required
    /// step, or cancellation. A cancelled wave's results are discarded.
    pub async fn run(
        &self,
        plan: &Plan,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineRun> {
        plan.validate()?;

        let start = Instant::now();
        let trace_id = self.telemetry.as_ref().map(|t| t.start_trace(session_id));
        let outcome = self.run_waves(plan, session_id, cancel, trace_id.as_deref()).await;

        if let (Some(engine), Some(id)) = (&self.telemetry, &trace_id) {
            engine.end_trace(id);
        }

        let mut run = outcome?;
        run.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            session_id,
            waves = run.waves.len(),
            steps = run.completed_orders.len(),
            duration_ms = run.duration_ms,
            "Pipeline complete"
        );
        Ok(run)
    }

    async fn run_waves(
        &self,
        plan: &Plan,
        session_id: &str,
        cancel: &CancellationToken,
        trace_id: Option<&str>,
    ) -> Result<PipelineRun> {
        let mut context = ExecutionContext::new(&plan.patient_id);
        let mut completed: BTreeSet<u32> = BTreeSet::new();
        let mut completed_orders = Vec::with_capacity(plan.steps.len());
        let mut waves: Vec<Vec<u32>> = Vec::new();
        let mut step_records = Vec::with_capacity(plan.steps.len());
        let mut graph = ExecutionGraph::new();

        while completed.len() < plan.steps.len() {
            let batch: Vec<&PlannedStep> = plan
                .steps
                .iter()
                .filter(|s| !completed.contains(&s.order) && s.depends_on.is_subset(&completed))
                .collect();

            if batch.is_empty() {
                let pending: Vec<u32> = plan
                    .steps
                    .iter()
                    .map(|s| s.order)
                    .filter(|o| !completed.contains(o))
                    .collect();
                warn!(session_id, ?pending, "Dependency deadlock");
                return Err(PipelineError::DependencyDeadlock { pending }.into());
            }

            let wave = waves.len();
            let orders: Vec<u32> = batch.iter().map(|s| s.order).collect();
            info!(session_id, wave, steps = ?orders, "Executing wave");
            let wave_started = Instant::now();

            let calls = batch.iter().map(|step| {
                let args = step_args(plan, step, &context);
                let executor = self.executor.clone();
                async move { executor.execute(&step.tool, args).await }
            });

            // join_all yields results in input order, which is plan order.
            let results = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(session_id, wave, "Pipeline cancelled, discarding in-flight wave");
                    return Err(Error::Cancelled);
                }
                results = join_all(calls) => results,
            };

            for (step, result) in batch.iter().zip(results) {
                debug!(
                    order = step.order,
                    tool = %step.tool,
                    success = result.success,
                    duration_ms = result.duration_ms,
                    "Step settled"
                );
                self.record_step_span(trace_id, session_id, wave, step, &result);

                let status = if result.success {
                    NodeStatus::Succeeded
                } else if step.required {
                    NodeStatus::Failed
                } else {
                    NodeStatus::Unavailable
                };
                graph.add_node(GraphNode {
                    id: format!("step-{}", step.order),
                    label: step.tool.clone(),
                    tool: Some(step.tool.clone()),
                    wave: Some(wave),
                    status,
                    duration_ms: result.duration_ms,
                });
                for dep in &step.depends_on {
                    graph.add_edge(format!("step-{dep}"), format!("step-{}", step.order));
                }

                if result.success {
                    let data = result.data.clone().unwrap_or(serde_json::Value::Null);
                    context.apply(step.order, &step.tool, StepInput::available(&step.tool, data));
                } else if step.required {
                    let error = result
                        .error
                        .clone()
                        .unwrap_or_else(|| "step failed".to_string());
                    warn!(session_id, order = step.order, tool = %step.tool, %error, "Required step failed");
                    return Err(PipelineError::RequiredStepFailed {
                        order: step.order,
                        tool: step.tool.clone(),
                        error,
                    }
                    .into());
                } else {
                    let reason = result
                        .error
                        .clone()
                        .unwrap_or_else(|| "step failed".to_string());
                    info!(session_id, order = step.order, tool = %step.tool, %reason, "Optional step unavailable");
                    context.apply(step.order, &step.tool, StepInput::Unavailable { reason });
                }

                completed.insert(step.order);
                completed_orders.push(step.order);
                step_records.push(StepRecord {
                    order: step.order,
                    tool: step.tool.clone(),
                    wave,
                    required: step.required,
                    result,
                });
            }

            if let (Some(engine), Some(id)) = (&self.telemetry, trace_id) {
                let mut span = Span::new(SpanKind::Wave, format!("wave-{wave}"))
                    .with_metadata("session_id", session_id)
                    .with_metadata("steps", orders.clone());
                span.end_with_duration(true, wave_started.elapsed().as_millis() as u64);
                engine.record_span(id, span);
            }
            waves.push(orders);
        }

        Ok(PipelineRun {
            context,
            waves,
            completed_orders,
            step_records,
            graph,
            duration_ms: 0,
        })
    }

    fn record_step_span(
        &self,
        trace_id: Option<&str>,
        session_id: &str,
        wave: usize,
        step: &PlannedStep,
        result: &ToolResult,
    ) {
        let (Some(engine), Some(id)) = (&self.telemetry, trace_id) else {
            return;
        };
        let mut span = Span::new(SpanKind::ToolExecution, &step.tool)
            .with_metadata("session_id", session_id)
            .with_metadata("order", step.order)
            .with_metadata("wave", wave)
            .with_metadata("required", step.required);
        if let Some(ref data) = result.data {
            span.set_output(data.clone());
        }
        if let Some(ref error) = result.error {
            span = span.with_metadata("error", error.clone());
        }
        span.end_with_duration(result.success, result.duration_ms);
        engine.record_span(id, span);
    }
}

/// Step arguments: the plan's own args plus `patient_id` and, under
/// `inputs`, the outputs of every step upstream of this one.
fn step_args(plan: &Plan, step: &PlannedStep, context: &ExecutionContext) -> serde_json::Value {
    let patient_id = plan.patient_id.as_str();
    let mut args = match &step.args {
        serde_json::Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    args.entry("patient_id")
        .or_insert_with(|| serde_json::Value::String(patient_id.to_string()));
    args.insert(
        "inputs".to_string(),
        serde_json::Value::Object(context.inputs_for(&plan.ancestors(step.order))),
    );
    serde_json::Value::Object(args)
}
