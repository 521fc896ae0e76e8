//! Session-aware entry points for running the agent.
//!
//! [`AgentService`] ties the reasoning loop to sessions, both memory
//! tiers, grounding, and background evaluation. Hosts (the CLI, an HTTP
//! layer) call `run_agent`, `continue_conversation`, or `run_pipeline`
//! and get back a serializable response.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use carepilot_config::{AppConfig, GroundingMode};
use carepilot_core::assessment::{DischargeAnalysis, tools};
use carepilot_core::error::{Result, SessionError};
use carepilot_core::graph::ExecutionGraph;
use carepilot_core::provider::Provider;
use carepilot_core::session::{Session, SessionStatus, Step};
use carepilot_core::tool::ToolRegistry;
use carepilot_memory::{LongTermMemory, MemoryLimits, MemoryStore, Turn};
use carepilot_telemetry::{
    EvaluationJob, EvaluationQueue, ModelPricing, PricingTable, Span, SpanKind, TelemetryEngine,
    default_evaluators,
};
use carepilot_workflow::{DependencyScheduler, Plan, PipelineRun, StepRecord};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::MemoryContext;
use crate::grounding::{GroundingReport, GroundingVerifier};
use crate::parser::extract_object;
use crate::patterns::{ReactAgent, ReactRequest, ReactResult};
use crate::session::{EvictionPolicy, RunGuard, SessionManager};
use crate::stream_event::AgentStreamEvent;

/// Turns of prior conversation handed to the model.
const RECENT_TURNS: usize = 10;

/// Model id recorded for assessments scored by the pipeline.
pub const PIPELINE_MODEL_ID: &str = "pipeline/score_discharge_risk";

const ASK_FOR_PATIENT: &str =
    "Which patient should I assess? Please reply with the patient id (for example \"patient P-001\").";

const STREAM_BUFFER: usize = 64;

static PATIENT_MENTION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\bpatient\s*(?:id)?\s*[:#]?\s*([a-z0-9][a-z0-9_-]*\d)\b").ok()
});

// ── Responses ──────────────────────────────────────────────────────────

/// Token, cost and latency accounting for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub latency_ms: u64,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub estimated_cost_usd: f64,
    pub llm_calls: u32,
    pub model: String,
}

/// The outcome of one agent turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub answer: String,
    pub steps: Vec<Step>,
    pub tools_used: Vec<String>,
    pub iterations: u32,
    pub reasoning_trace: Vec<String>,
    pub hit_max_iterations: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding: Option<GroundingReport>,
    /// Risk analysis found in the final answer, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<DischargeAnalysis>,
    pub metadata: RunMetadata,
    pub execution_graph: ExecutionGraph,
}

impl AgentResponse {
    fn waiting_for_input(session: &Session, answer: &str) -> Self {
        Self {
            session_id: session.id.clone(),
            status: session.status,
            answer: answer.to_string(),
            steps: Vec::new(),
            tools_used: Vec::new(),
            iterations: 0,
            reasoning_trace: Vec::new(),
            hit_max_iterations: false,
            grounding: None,
            assessment: None,
            metadata: RunMetadata::default(),
            execution_graph: ExecutionGraph::new(),
        }
    }
}

/// The outcome of a fixed-plan pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<DischargeAnalysis>,
    /// Step orders grouped by the wave they ran in
    pub waves: Vec<Vec<u32>>,
    pub completed_orders: Vec<u32>,
    pub steps: Vec<StepRecord>,
    /// Optional tools that failed, with the reason
    pub unavailable: BTreeMap<String, String>,
    pub duration_ms: u64,
    pub execution_graph: ExecutionGraph,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingSession {
    /// Start a fresh session under a new id.
    StartFresh,
    Fail,
}

// ── Service ────────────────────────────────────────────────────────────

pub struct AgentService {
    agent: ReactAgent,
    sessions: Arc<SessionManager>,
    memory: MemoryStore,
    grounding: Option<GroundingVerifier>,
    evaluations: Option<Arc<EvaluationQueue>>,
    telemetry: Option<Arc<TelemetryEngine>>,
    assessment_store: Option<PathBuf>,
    shutdown: CancellationToken,
}

impl AgentService {
    pub fn new(agent: ReactAgent, memory: MemoryStore, sessions: Arc<SessionManager>) -> Self {
        Self {
            agent,
            sessions,
            memory,
            grounding: None,
            evaluations: None,
            telemetry: None,
            assessment_store: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_grounding(mut self, verifier: GroundingVerifier) -> Self {
        self.grounding = Some(verifier);
        self
    }

    pub fn with_evaluations(mut self, queue: Arc<EvaluationQueue>) -> Self {
        self.evaluations = Some(queue);
        self
    }

    pub fn with_telemetry(mut self, engine: Arc<TelemetryEngine>) -> Self {
        self.telemetry = Some(engine);
        self
    }

    /// Persist long-term memory to `path` after every stored assessment.
    pub fn with_assessment_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.assessment_store = Some(path.into());
        self
    }

    /// Wire up a service from configuration.
    ///
    /// Loads persisted assessments when `memory.assessment_store` names an
    /// existing file. Must be called inside a tokio runtime when
    /// evaluation is enabled.
    pub async fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
    ) -> Result<Self> {
        let pricing = Arc::new(pricing_table(config));
        let telemetry = config
            .telemetry
            .enabled
            .then(|| Arc::new(TelemetryEngine::with_pricing(pricing_table(config))));

        let max_iterations = u32::try_from(config.agent.max_iterations).unwrap_or(u32::MAX);
        let mut agent = ReactAgent::new(provider.clone(), &config.provider.model, tools)
            .with_max_iterations(max_iterations)
            .with_temperature(config.provider.temperature)
            .with_max_tokens(config.provider.max_tokens)
            .with_pricing(pricing);
        if let Some(ref instructions) = config.agent.instructions {
            agent = agent.with_instructions(instructions.clone());
        }
        if let Some(ref engine) = telemetry {
            agent = agent.with_telemetry(engine.clone());
        }

        let limits = MemoryLimits {
            history_limit: config.memory.history_limit,
            history_compress_batch: config.memory.history_compress_batch,
            trace_limit: config.memory.trace_limit,
            trace_keep: config.memory.trace_keep,
        };
        let mut memory = MemoryStore::new(limits);
        if let Some(ref path) = config.memory.assessment_store
            && path.exists()
        {
            memory = memory.with_long_term(LongTermMemory::load_from(path).await?);
            info!(path = %path.display(), "Loaded assessment history");
        }

        let sessions = Arc::new(SessionManager::in_memory(EvictionPolicy::from(
            &config.sessions,
        )));
        let mut service = Self::new(agent, memory, sessions);

        if config.grounding.enabled {
            service = service.with_grounding(match config.grounding.mode {
                GroundingMode::Fast => GroundingVerifier::fast(),
                GroundingMode::Thorough => {
                    GroundingVerifier::thorough(provider, &config.provider.model)
                }
            });
        }
        if config.evaluation.enabled {
            service = service.with_evaluations(Arc::new(EvaluationQueue::spawn(
                default_evaluators(),
                telemetry.clone(),
                config.evaluation.queue_capacity,
            )));
        }
        if let Some(engine) = telemetry {
            service = service.with_telemetry(engine);
        }
        if let Some(ref path) = config.memory.assessment_store {
            service = service.with_assessment_store(path.clone());
        }
        Ok(service)
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn agent(&self) -> &ReactAgent {
        &self.agent
    }

    pub fn telemetry(&self) -> Option<&Arc<TelemetryEngine>> {
        self.telemetry.as_ref()
    }

    pub fn evaluations(&self) -> Option<&Arc<EvaluationQueue>> {
        self.evaluations.as_ref()
    }

    pub async fn assessment_context(&self, patient_id: &str) -> carepilot_memory::AssessmentContext {
        self.memory.long_term.get_assessment_context(patient_id).await
    }

    /// Cancel every in-flight run. Runs end with
    /// [`Error::Cancelled`](carepilot_core::Error::Cancelled).
    pub fn cancel_all(&self) {
        self.shutdown.cancel();
    }

    /// Drain the evaluation queue and persist long-term memory.
    pub async fn shutdown(&self) {
        if let Some(ref queue) = self.evaluations {
            queue.shutdown().await;
        }
        self.persist().await;
    }

    // ── Agent runs ─────────────────────────────────────────────────────

    /// Run the agent on `goal`.
    ///
    /// An unknown or evicted `session_id` starts a fresh session under a
    /// new id. Without a patient id (argument, session context, or a
    /// "patient X" mention in the goal) the session waits for input.
    pub async fn run_agent(
        &self,
        goal: &str,
        session_id: Option<&str>,
        patient_id: Option<&str>,
    ) -> Result<AgentResponse> {
        self.run_turn(goal, session_id, patient_id, MissingSession::StartFresh, None)
            .await
    }

    /// Add a message to an existing session.
    pub async fn continue_conversation(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<AgentResponse> {
        self.run_turn(message, Some(session_id), None, MissingSession::Fail, None)
            .await
    }

    /// Streaming form of [`run_agent`](Self::run_agent). The last event
    /// is always `done` or `error`.
    pub fn run_agent_stream(
        self: &Arc<Self>,
        goal: impl Into<String>,
        session_id: Option<String>,
        patient_id: Option<String>,
    ) -> mpsc::Receiver<AgentStreamEvent> {
        self.spawn_stream(goal.into(), session_id, patient_id, MissingSession::StartFresh)
    }

    /// Streaming form of
    /// [`continue_conversation`](Self::continue_conversation).
    pub fn continue_conversation_stream(
        self: &Arc<Self>,
        session_id: impl Into<String>,
        message: impl Into<String>,
    ) -> mpsc::Receiver<AgentStreamEvent> {
        self.spawn_stream(message.into(), Some(session_id.into()), None, MissingSession::Fail)
    }

    fn spawn_stream(
        self: &Arc<Self>,
        message: String,
        session_id: Option<String>,
        patient_id: Option<String>,
        missing: MissingSession,
    ) -> mpsc::Receiver<AgentStreamEvent> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = service
                .run_turn(
                    &message,
                    session_id.as_deref(),
                    patient_id.as_deref(),
                    missing,
                    Some(&tx),
                )
                .await;
            let last = match outcome {
                Ok(response) => AgentStreamEvent::Done {
                    response: Box::new(response),
                },
                Err(e) => AgentStreamEvent::Error {
                    message: e.to_string(),
                },
            };
            let _ = tx.send(last).await;
        });
        rx
    }

    async fn run_turn(
        &self,
        message: &str,
        session_id: Option<&str>,
        patient_id: Option<&str>,
        missing: MissingSession,
        events: Option<&mpsc::Sender<AgentStreamEvent>>,
    ) -> Result<AgentResponse> {
        self.evict_idle().await;
        let (mut session, _guard) = self.open_session(message, session_id, missing).await?;
        self.reset_to_planning(&mut session)?;
        session.goal = message.to_string();

        let sid = session.id.clone();
        self.memory.short_term.ensure_session(&sid, message).await;
        let recent_turns = self.memory.short_term.recent_turns(&sid, RECENT_TURNS).await;
        self.memory.short_term.set_goal(&sid, message).await?;
        self.memory.short_term.add_turn(&sid, Turn::user(message)).await?;

        let patient_id = patient_id
            .map(str::to_string)
            .or_else(|| session.context.patient_id.clone())
            .or_else(|| patient_id_from_text(message));
        let Some(patient_id) = patient_id else {
            session.transition(SessionStatus::WaitingInput, self.sessions.now())?;
            self.memory
                .short_term
                .add_turn(&sid, Turn::assistant(ASK_FOR_PATIENT))
                .await?;
            self.sessions.save(session.clone()).await;
            info!(session_id = %sid, "No patient id, waiting for input");
            return Ok(AgentResponse::waiting_for_input(&session, ASK_FOR_PATIENT));
        };

        session.context.patient_id = Some(patient_id.clone());
        session.transition(SessionStatus::Executing, self.sessions.now())?;
        self.sessions.save(session.clone()).await;

        let assessment_summary = self
            .memory
            .long_term
            .get_assessment_context(&patient_id)
            .await
            .summary_text();
        let memory = MemoryContext {
            patient_id: Some(patient_id.clone()),
            assessment_summary: Some(assessment_summary),
            recent_turns,
        };
        let request = ReactRequest {
            session_id: &sid,
            goal: message,
            memory: &memory,
        };
        let cancel = self.shutdown.child_token();

        match self.agent.run_with_events(request, &cancel, events).await {
            Ok(result) => self.finish_turn(session, &patient_id, message, result).await,
            Err(failure) => {
                self.record_trace(&sid, &failure.reasoning_trace).await;
                session.steps.extend(failure.steps);
                session.transition(SessionStatus::Error, self.sessions.now())?;
                self.sessions.save(session).await;
                warn!(session_id = %sid, error = %failure.error, "Agent run failed");
                Err(failure.error)
            }
        }
    }

    async fn finish_turn(
        &self,
        mut session: Session,
        patient_id: &str,
        goal: &str,
        result: ReactResult,
    ) -> Result<AgentResponse> {
        let sid = session.id.clone();
        self.record_trace(&sid, &result.reasoning_trace).await;

        for call in &result.tool_calls {
            let observation = call.result.to_observation();
            if call.tool == tools::FETCH_PATIENT && call.result.success {
                self.memory
                    .short_term
                    .set_patient_summary(&sid, observation.clone())
                    .await?;
            }
            self.memory
                .short_term
                .add_turn(&sid, Turn::tool(&call.tool, call.result.success, observation))
                .await?;
            self.memory
                .short_term
                .store_tool_result(&sid, &call.tool, call.result.clone())
                .await?;
            self.submit(EvaluationJob::ToolCall {
                session_id: sid.clone(),
                tool: call.tool.clone(),
                args: call.args.clone(),
                result: call.result.clone(),
            });
        }
        self.memory
            .short_term
            .add_turn(&sid, Turn::assistant(&result.answer))
            .await?;

        // A max-iterations fallback is a digest of observations, not an
        // answer: it is neither verified nor mined for an assessment.
        let answered = !result.hit_max_iterations;
        let grounding = match &self.grounding {
            Some(verifier) if answered => {
                let started = std::time::Instant::now();
                let report = verifier
                    .verify(&result.answer, &result.observations, &self.shutdown)
                    .await;
                self.record_grounding_span(&sid, &report, started.elapsed().as_millis() as u64);
                Some(report)
            }
            _ => None,
        };
        let assessment = if answered {
            extract_analysis(&result.answer)
        } else {
            None
        };
        if let Some(ref analysis) = assessment {
            self.store_assessment(patient_id, analysis, self.agent.model()).await;
        }
        if answered {
            self.submit(EvaluationJob::Answer {
                session_id: sid.clone(),
                goal: goal.to_string(),
                answer: result.answer.clone(),
                observations: result.observations.clone(),
            });
        }

        let mut usage = result.usage;
        let mut cost = result.estimated_cost_usd;
        let mut llm_calls = result.llm_calls;
        if let Some(extra) = grounding.as_ref().and_then(|g| g.usage) {
            usage.add(&extra);
            cost += self.agent.estimate_cost(self.agent.model(), &extra);
            llm_calls += 1;
        }

        session.steps.extend(result.steps.iter().cloned());
        session.context.last_answer = Some(result.answer.clone());
        session.transition(SessionStatus::Completed, self.sessions.now())?;
        let status = session.status;
        self.sessions.save(session).await;

        info!(
            session_id = %sid,
            iterations = result.iterations,
            tools = result.tools_used.len(),
            cost_usd = cost,
            "Agent turn complete"
        );

        Ok(AgentResponse {
            session_id: sid,
            status,
            answer: result.answer,
            steps: result.steps,
            tools_used: result.tools_used,
            iterations: result.iterations,
            reasoning_trace: result.reasoning_trace,
            hit_max_iterations: result.hit_max_iterations,
            grounding,
            assessment,
            metadata: RunMetadata {
                latency_ms: result.latency_ms,
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
                estimated_cost_usd: cost,
                llm_calls,
                model: result.model,
            },
            execution_graph: result.graph,
        })
    }

    // ── Pipeline runs ──────────────────────────────────────────────────

    /// Run the fixed discharge-assessment plan for `patient_id` through
    /// the dependency scheduler, without the reasoning loop.
    pub async fn run_pipeline(
        &self,
        patient_id: &str,
        session_id: Option<&str>,
    ) -> Result<PipelineResponse> {
        self.evict_idle().await;
        let goal = format!("Discharge assessment for patient {patient_id}");
        let (mut session, _guard) = self
            .open_session(&goal, session_id, MissingSession::StartFresh)
            .await?;
        self.reset_to_planning(&mut session)?;
        session.goal = goal.clone();
        session.context.patient_id = Some(patient_id.to_string());
        session.transition(SessionStatus::Executing, self.sessions.now())?;
        self.sessions.save(session.clone()).await;

        let sid = session.id.clone();
        self.memory.short_term.ensure_session(&sid, &goal).await;
        self.memory.short_term.add_turn(&sid, Turn::user(&goal)).await?;

        let mut scheduler = DependencyScheduler::new(self.agent.tools().clone());
        if let Some(ref engine) = self.telemetry {
            scheduler = scheduler.with_telemetry(engine.clone());
        }
        let plan = Plan::discharge_assessment(patient_id);
        let cancel = self.shutdown.child_token();

        let run = match scheduler.run(&plan, &sid, &cancel).await {
            Ok(run) => run,
            Err(e) => {
                session.transition(SessionStatus::Error, self.sessions.now())?;
                self.sessions.save(session).await;
                warn!(session_id = %sid, error = %e, "Pipeline failed");
                return Err(e);
            }
        };

        for record in &run.step_records {
            self.memory
                .short_term
                .add_turn(
                    &sid,
                    Turn::tool(&record.tool, record.result.success, record.result.to_observation()),
                )
                .await?;
            self.memory
                .short_term
                .store_tool_result(&sid, &record.tool, record.result.clone())
                .await?;
            self.submit(EvaluationJob::ToolCall {
                session_id: sid.clone(),
                tool: record.tool.clone(),
                args: serde_json::json!({ "patient_id": patient_id }),
                result: record.result.clone(),
            });
        }

        let assessment = run.context.analysis.clone();
        if let Some(ref analysis) = assessment {
            self.store_assessment(patient_id, analysis, PIPELINE_MODEL_ID).await;
        }
        let answer = pipeline_summary(patient_id, &run);
        self.memory
            .short_term
            .add_turn(&sid, Turn::assistant(&answer))
            .await?;

        session.context.last_answer = Some(answer.clone());
        session.transition(SessionStatus::Completed, self.sessions.now())?;
        let status = session.status;
        self.sessions.save(session).await;

        info!(
            session_id = %sid,
            patient_id,
            waves = run.waves.len(),
            unavailable = run.context.unavailable.len(),
            "Pipeline complete"
        );

        Ok(PipelineResponse {
            session_id: sid,
            status,
            answer,
            assessment,
            waves: run.waves,
            completed_orders: run.completed_orders,
            steps: run.step_records,
            unavailable: run.context.unavailable,
            duration_ms: run.duration_ms,
            execution_graph: run.graph,
        })
    }

    // ── Internals ──────────────────────────────────────────────────────

    async fn evict_idle(&self) {
        for id in self.sessions.maybe_evict().await {
            self.memory.short_term.remove(&id).await;
        }
    }

    /// Load or create the session and take its run guard.
    async fn open_session(
        &self,
        goal: &str,
        session_id: Option<&str>,
        missing: MissingSession,
    ) -> Result<(Session, RunGuard)> {
        if let Some(id) = session_id {
            let guard = self.sessions.try_acquire(id)?;
            if let Some(session) = self.sessions.get(id).await {
                return Ok((session, guard));
            }
            drop(guard);
            if missing == MissingSession::Fail {
                return Err(SessionError::NotFound(id.to_string()).into());
            }
            info!(session_id = id, "Unknown or evicted session, starting a new one");
        }
        let session = self.sessions.create(goal).await;
        let guard = self.sessions.try_acquire(&session.id)?;
        Ok((session, guard))
    }

    /// Every run starts from `planning`.
    fn reset_to_planning(&self, session: &mut Session) -> Result<()> {
        match session.status {
            SessionStatus::Planning => {}
            SessionStatus::Executing => {
                // Only reachable when a previous run was dropped mid-flight;
                // the run guard rules out a live one.
                warn!(session_id = %session.id, "Recovering session left executing");
                session.status = SessionStatus::Planning;
                session.touch(self.sessions.now());
            }
            _ => session.transition(SessionStatus::Planning, self.sessions.now())?,
        }
        Ok(())
    }

    async fn record_trace(&self, session_id: &str, trace: &[String]) {
        for line in trace {
            if let Err(e) = self
                .memory
                .short_term
                .record_reasoning_step(session_id, line.clone())
                .await
            {
                warn!(session_id, error = %e, "Could not record reasoning step");
                return;
            }
        }
    }

    fn record_grounding_span(&self, session_id: &str, report: &GroundingReport, ms: u64) {
        let Some(ref engine) = self.telemetry else {
            return;
        };
        let mut span = Span::new(SpanKind::Grounding, "grounding")
            .with_metadata("mode", report.mode.as_str())
            .with_metadata("claims", report.claims.len())
            .with_metadata("grounded_ratio", report.grounded_ratio)
            .with_metadata("fell_back", report.fell_back);
        if let Some(usage) = report.usage {
            let cost = self.agent.estimate_cost(self.agent.model(), &usage);
            span.record_tokens(usage.prompt_tokens, usage.completion_tokens, cost);
        }
        span.end_with_duration(true, ms);
        engine.record_for_session(session_id, span);
    }

    fn submit(&self, job: EvaluationJob) {
        if let Some(ref queue) = self.evaluations
            && !queue.submit(job)
        {
            warn!("Evaluation queue full, job dropped");
        }
    }

    async fn store_assessment(&self, patient_id: &str, analysis: &DischargeAnalysis, model_id: &str) {
        let index = self
            .memory
            .long_term
            .store_assessment(patient_id, analysis, model_id)
            .await;
        info!(
            patient_id,
            score = analysis.score,
            status = analysis.status.as_str(),
            assessments = index + 1,
            "Stored assessment"
        );
        self.persist().await;
    }

    async fn persist(&self) {
        let Some(ref path) = self.assessment_store else {
            return;
        };
        if let Err(e) = self.memory.long_term.save_to(path).await {
            warn!(path = %path.display(), error = %e, "Could not persist assessments");
        }
    }
}

/// Built-in prices with the configured per-model overrides applied.
fn pricing_table(config: &AppConfig) -> PricingTable {
    let table = PricingTable::with_defaults();
    table.apply_overrides(config.telemetry.custom_pricing.iter().map(|(model, p)| {
        (model.clone(), ModelPricing::new(p.input_per_m, p.output_per_m))
    }));
    table
}

/// A patient id mentioned as "patient X" in free text. The id must end
/// in a digit so ordinary words after "patient" are not taken.
pub fn patient_id_from_text(text: &str) -> Option<String> {
    PATIENT_MENTION
        .as_ref()?
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// The discharge analysis embedded in an answer, if it carries one
/// either at the top level or under `analysis`.
pub fn extract_analysis(answer: &str) -> Option<DischargeAnalysis> {
    let object = serde_json::Value::Object(extract_object(answer).ok()?);
    DischargeAnalysis::from_value(&object)
        .or_else(|| object.get("analysis").and_then(DischargeAnalysis::from_value))
}

fn pipeline_summary(patient_id: &str, run: &PipelineRun) -> String {
    let mut summary = match run.context.analysis {
        Some(ref analysis) => {
            let mut text = format!(
                "Patient {patient_id}: discharge readiness score {} ({}).",
                analysis.score,
                analysis.status.as_str()
            );
            if !analysis.risk_factors.is_empty() {
                let factors: Vec<&str> =
                    analysis.risk_factors.iter().map(|f| f.title.as_str()).collect();
                text.push_str(&format!(" Risk factors: {}.", factors.join(", ")));
            }
            text
        }
        None => format!("Patient {patient_id}: the pipeline finished without a risk score."),
    };
    if !run.context.unavailable.is_empty() {
        let missing: Vec<&str> = run.context.unavailable.keys().map(String::as_str).collect();
        summary.push_str(&format!(" Unavailable: {}.", missing.join(", ")));
    }
    summary
}
