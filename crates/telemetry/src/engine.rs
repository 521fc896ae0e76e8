//! Thread-safe telemetry engine: collects spans per session run and keeps
//! running usage totals.

use crate::model::*;
use crate::pricing::PricingTable;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Traces kept before the oldest completed ones are pruned.
const MAX_TRACES: usize = 5_000;

/// The core telemetry engine.
///
/// Shared as `Option<Arc<TelemetryEngine>>` by everything that emits
/// spans; `None` means no sink is configured and callers skip recording.
pub struct TelemetryEngine {
    pricing: PricingTable,
    traces: RwLock<Vec<Trace>>,
    totals: RwLock<UsageSummary>,
}

impl TelemetryEngine {
    /// Create a new telemetry engine with default pricing.
    pub fn new() -> Self {
        Self::with_pricing(PricingTable::with_defaults())
    }

    pub fn with_pricing(pricing: PricingTable) -> Self {
        Self {
            pricing,
            traces: RwLock::new(Vec::new()),
            totals: RwLock::new(UsageSummary::default()),
        }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    fn traces(&self) -> RwLockReadGuard<'_, Vec<Trace>> {
        self.traces.read().unwrap_or_else(|e| e.into_inner())
    }

    fn traces_mut(&self) -> RwLockWriteGuard<'_, Vec<Trace>> {
        self.traces.write().unwrap_or_else(|e| e.into_inner())
    }

    // ── Trace management ──────────────────────────────────────────────

    /// Start a new trace for a session run and return its id.
    pub fn start_trace(&self, session_id: impl Into<String>) -> String {
        let trace = Trace::new(session_id);
        let id = trace.id.clone();
        let mut traces = self.traces_mut();

        if traces.len() >= MAX_TRACES {
            let drain_count = MAX_TRACES / 10;
            let mut removed = 0;
            traces.retain(|t| {
                if removed < drain_count && t.ended_at.is_some() {
                    removed += 1;
                    return false;
                }
                true
            });
        }

        traces.push(trace);
        self.totals.write().unwrap_or_else(|e| e.into_inner()).trace_count += 1;
        id
    }

    pub fn end_trace(&self, trace_id: &str) {
        if let Some(trace) = self.traces_mut().iter_mut().find(|t| t.id == trace_id) {
            trace.end();
        }
    }

    /// Record a completed span in a trace and update running totals.
    ///
    /// Spans for unknown trace ids still count toward totals.
    pub fn record_span(&self, trace_id: &str, span: Span) {
        self.accumulate(&span);
        if let Some(trace) = self.traces_mut().iter_mut().find(|t| t.id == trace_id) {
            trace.add_span(span);
        }
    }

    /// Record a span against the latest trace of a session, opening one
    /// if the session has none. Used by emitters that run detached from
    /// the session's own run.
    pub fn record_for_session(&self, session_id: &str, span: Span) {
        let existing = self
            .traces()
            .iter()
            .rev()
            .find(|t| t.session_id == session_id)
            .map(|t| t.id.clone());
        let trace_id = match existing {
            Some(id) => id,
            None => self.start_trace(session_id),
        };
        self.record_span(&trace_id, span);
    }

    fn accumulate(&self, span: &Span) {
        let mut totals = self.totals.write().unwrap_or_else(|e| e.into_inner());
        if let Some(cost) = span.cost_usd {
            totals.total_cost_usd += cost;
        }
        totals.total_input_tokens += span.input_tokens.unwrap_or(0) as u64;
        totals.total_output_tokens += span.output_tokens.unwrap_or(0) as u64;
        match span.kind {
            SpanKind::LlmCall => totals.llm_calls += 1,
            SpanKind::ToolExecution => {
                totals.tool_executions += 1;
                if span.success == Some(false) {
                    totals.failed_tool_executions += 1;
                }
            }
            SpanKind::Evaluation => totals.evaluations += 1,
            SpanKind::Wave | SpanKind::Grounding | SpanKind::Turn => {}
        }
    }

    /// Compute cost for an LLM call using the pricing table.
    pub fn compute_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        self.pricing.compute_cost(model, input_tokens, output_tokens)
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        self.traces().iter().find(|t| t.id == trace_id).cloned()
    }

    /// List recent traces (most recent first).
    pub fn recent_traces(&self, limit: usize) -> Vec<Trace> {
        self.traces().iter().rev().take(limit).cloned().collect()
    }

    pub fn traces_for_session(&self, session_id: &str) -> Vec<Trace> {
        self.traces()
            .iter()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn trace_count(&self) -> usize {
        self.traces().len()
    }

    pub fn summary(&self) -> UsageSummary {
        self.totals.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for TelemetryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_collects_spans_and_totals() {
        let engine = TelemetryEngine::new();
        let trace_id = engine.start_trace("session-1");

        let mut llm = Span::new(SpanKind::LlmCall, "openai/gpt-4o");
        let cost = engine.compute_cost("openai/gpt-4o", 1000, 200);
        llm.record_tokens(1000, 200, cost);
        llm.end(true);
        engine.record_span(&trace_id, llm);

        let mut tool = Span::new(SpanKind::ToolExecution, "estimate_costs");
        tool.end(false);
        engine.record_span(&trace_id, tool);
        engine.end_trace(&trace_id);

        let trace = engine.get_trace(&trace_id).unwrap();
        assert_eq!(trace.spans.len(), 2);
        assert!(trace.ended_at.is_some());

        let summary = engine.summary();
        assert_eq!(summary.llm_calls, 1);
        assert_eq!(summary.tool_executions, 1);
        assert_eq!(summary.failed_tool_executions, 1);
        assert_eq!(summary.total_input_tokens, 1000);
        assert!((summary.total_cost_usd - cost).abs() < 1e-12);
    }

    #[test]
    fn record_for_session_reuses_latest_trace() {
        let engine = TelemetryEngine::new();
        let trace_id = engine.start_trace("s-1");
        engine.record_for_session("s-1", Span::new(SpanKind::Evaluation, "tool_reliability"));
        assert_eq!(engine.get_trace(&trace_id).unwrap().spans.len(), 1);

        engine.record_for_session("s-2", Span::new(SpanKind::Evaluation, "answer_support"));
        assert_eq!(engine.trace_count(), 2);
        assert_eq!(engine.traces_for_session("s-2")[0].spans.len(), 1);
        assert_eq!(engine.summary().evaluations, 2);
    }

    #[test]
    fn recent_traces_most_recent_first() {
        let engine = TelemetryEngine::new();
        engine.start_trace("a");
        engine.start_trace("b");
        let recent = engine.recent_traces(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].session_id, "b");
    }

    #[test]
    fn unknown_trace_still_counts() {
        let engine = TelemetryEngine::new();
        let mut span = Span::new(SpanKind::LlmCall, "m");
        span.record_tokens(5, 5, 0.0);
        engine.record_span("missing", span);
        assert_eq!(engine.summary().llm_calls, 1);
        assert_eq!(engine.trace_count(), 0);
    }
}
