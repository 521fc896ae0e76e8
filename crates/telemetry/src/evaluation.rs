//! Background evaluation of tool calls and final answers.
//!
//! Runs submit jobs and move on; a spawned worker drains the queue and
//! records each outcome as an `Evaluation` span. Nothing in a run waits
//! for an evaluation to finish.

use crate::TelemetryEngine;
use crate::model::{Span, SpanKind};
use async_trait::async_trait;
use carepilot_core::ToolResult;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Outcomes kept for inspection; older ones are dropped first.
const MAX_RESULTS: usize = 5_000;

/// Work submitted for evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvaluationJob {
    ToolCall {
        session_id: String,
        tool: String,
        args: serde_json::Value,
        result: ToolResult,
    },
    Answer {
        session_id: String,
        goal: String,
        answer: String,
        observations: Vec<String>,
    },
}

impl EvaluationJob {
    pub fn session_id(&self) -> &str {
        match self {
            EvaluationJob::ToolCall { session_id, .. } | EvaluationJob::Answer { session_id, .. } => {
                session_id
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub evaluator: String,
    pub session_id: String,
    /// Tool name or `"answer"`
    pub subject: String,
    /// 0.0 (bad) to 1.0 (good)
    pub score: f64,
    pub passed: bool,
    pub detail: String,
}

/// A scorer for one kind of job. Returns `None` for jobs it ignores.
#[async_trait]
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(&self, job: &EvaluationJob) -> Option<EvaluationOutcome>;
}

/// Scores tool calls: failures 0, empty successes 0.5, data-bearing 1.
pub struct ToolReliabilityEvaluator;

#[async_trait]
impl Evaluator for ToolReliabilityEvaluator {
    fn name(&self) -> &str {
        "tool_reliability"
    }

    async fn evaluate(&self, job: &EvaluationJob) -> Option<EvaluationOutcome> {
        let EvaluationJob::ToolCall {
            session_id,
            tool,
            result,
            ..
        } = job
        else {
            return None;
        };

        let (score, detail) = if !result.success {
            (0.0, result.error.clone().unwrap_or_else(|| "failed".into()))
        } else if is_empty(result.data.as_ref()) {
            (0.5, "succeeded with empty output".to_string())
        } else {
            (1.0, format!("succeeded in {}ms", result.duration_ms))
        };

        Some(EvaluationOutcome {
            evaluator: self.name().to_string(),
            session_id: session_id.clone(),
            subject: tool.clone(),
            score,
            passed: score >= 0.5,
            detail,
        })
    }
}

fn is_empty(data: Option<&serde_json::Value>) -> bool {
    match data {
        None | Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::String(s)) => s.trim().is_empty(),
        Some(serde_json::Value::Array(a)) => a.is_empty(),
        Some(serde_json::Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

/// Scores a final answer by the share of its content words that also
/// appear somewhere in the run's observations.
pub struct AnswerSupportEvaluator {
    pub threshold: f64,
}

impl Default for AnswerSupportEvaluator {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

fn content_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '.')
        .map(|w| w.trim_matches('.').to_lowercase())
        .filter(|w| w.chars().count() >= 4)
        .collect()
}

#[async_trait]
impl Evaluator for AnswerSupportEvaluator {
    fn name(&self) -> &str {
        "answer_support"
    }

    async fn evaluate(&self, job: &EvaluationJob) -> Option<EvaluationOutcome> {
        let EvaluationJob::Answer {
            session_id,
            answer,
            observations,
            ..
        } = job
        else {
            return None;
        };

        let answer_words = content_words(answer);
        let evidence = content_words(&observations.join(" "));
        let (score, detail) = if answer_words.is_empty() {
            (1.0, "no content words to check".to_string())
        } else {
            let supported = answer_words.iter().filter(|w| evidence.contains(*w)).count();
            (
                supported as f64 / answer_words.len() as f64,
                format!("{supported}/{} content words found in observations", answer_words.len()),
            )
        };

        Some(EvaluationOutcome {
            evaluator: self.name().to_string(),
            session_id: session_id.clone(),
            subject: "answer".to_string(),
            score,
            passed: score >= self.threshold,
            detail,
        })
    }
}

/// Bounded queue plus the worker task that drains it.
pub struct EvaluationQueue {
    tx: Mutex<Option<mpsc::Sender<EvaluationJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    results: Arc<RwLock<VecDeque<EvaluationOutcome>>>,
    dropped: AtomicU64,
}

impl EvaluationQueue {
    /// Start the worker. Must be called inside a tokio runtime.
    pub fn spawn(
        evaluators: Vec<Arc<dyn Evaluator>>,
        telemetry: Option<Arc<TelemetryEngine>>,
        capacity: usize,
    ) -> Self {
        Self::spawn_with_limit(evaluators, telemetry, capacity, MAX_RESULTS)
    }

    /// Like [`spawn`](Self::spawn), keeping at most `result_limit`
    /// outcomes.
    pub fn spawn_with_limit(
        evaluators: Vec<Arc<dyn Evaluator>>,
        telemetry: Option<Arc<TelemetryEngine>>,
        capacity: usize,
        result_limit: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<EvaluationJob>(capacity.max(1));
        let result_limit = result_limit.max(1);
        let results = Arc::new(RwLock::new(VecDeque::new()));
        let sink = results.clone();

        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                for evaluator in &evaluators {
                    let started = std::time::Instant::now();
                    let Some(outcome) = evaluator.evaluate(&job).await else {
                        continue;
                    };
                    debug!(
                        evaluator = %outcome.evaluator,
                        subject = %outcome.subject,
                        score = outcome.score,
                        "Evaluation complete"
                    );

                    if let Some(ref engine) = telemetry {
                        let mut span = Span::new(SpanKind::Evaluation, &outcome.evaluator)
                            .with_metadata("subject", outcome.subject.clone())
                            .with_metadata("score", outcome.score);
                        span.set_output(serde_json::to_value(&outcome).unwrap_or_default());
                        span.end_with_duration(outcome.passed, started.elapsed().as_millis() as u64);
                        engine.record_for_session(job.session_id(), span);
                    }

                    let mut kept = sink.write().unwrap_or_else(|e| e.into_inner());
                    kept.push_back(outcome);
                    while kept.len() > result_limit {
                        kept.pop_front();
                    }
                }
            }
        });

        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            results,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a job without waiting. Returns false if it was dropped.
    pub fn submit(&self, job: EvaluationJob) -> bool {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = guard.as_ref() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        match tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(session_id = %job.session_id(), "Evaluation queue full, dropping job");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Evaluation worker stopped, dropping job");
                false
            }
        }
    }

    /// The most recent outcomes, oldest first.
    pub fn results(&self) -> Vec<EvaluationOutcome> {
        self.results
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Close the queue and wait for queued jobs to finish.
    pub async fn shutdown(&self) {
        drop(self.tx.lock().unwrap_or_else(|e| e.into_inner()).take());
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            warn!(error = %e, "Evaluation worker ended abnormally");
        }
    }
}

impl Drop for EvaluationQueue {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            worker.abort();
        }
    }
}

/// The evaluators enabled by default.
pub fn default_evaluators() -> Vec<Arc<dyn Evaluator>> {
    vec![
        Arc::new(ToolReliabilityEvaluator),
        Arc::new(AnswerSupportEvaluator::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_job(success: bool, data: serde_json::Value) -> EvaluationJob {
        let result = if success {
            ToolResult::ok(data, 12)
        } else {
            ToolResult::failed("upstream 503", 12)
        };
        EvaluationJob::ToolCall {
            session_id: "s-1".into(),
            tool: "estimate_costs".into(),
            args: json!({}),
            result,
        }
    }

    #[tokio::test]
    async fn tool_reliability_scores() {
        let eval = ToolReliabilityEvaluator;
        let ok = eval.evaluate(&tool_job(true, json!({"total_usd": 1200.0}))).await.unwrap();
        assert_eq!(ok.score, 1.0);
        let empty = eval.evaluate(&tool_job(true, json!({}))).await.unwrap();
        assert_eq!(empty.score, 0.5);
        let failed = eval.evaluate(&tool_job(false, json!(null))).await.unwrap();
        assert_eq!(failed.score, 0.0);
        assert!(!failed.passed);
        assert!(failed.detail.contains("503"));
    }

    #[tokio::test]
    async fn answer_support_counts_supported_words() {
        let job = EvaluationJob::Answer {
            session_id: "s-1".into(),
            goal: "assess".into(),
            answer: "Warfarin interaction detected".into(),
            observations: vec!["warfarin + aspirin: major interaction".into()],
        };
        let outcome = AnswerSupportEvaluator::default().evaluate(&job).await.unwrap();
        assert!((outcome.score - 2.0 / 3.0).abs() < 1e-9);
        assert!(outcome.passed);
        assert!(ToolReliabilityEvaluator.evaluate(&job).await.is_none());
    }

    #[tokio::test]
    async fn queue_runs_jobs_and_records_spans() {
        let engine = Arc::new(TelemetryEngine::new());
        let queue = EvaluationQueue::spawn(default_evaluators(), Some(engine.clone()), 8);
        assert!(queue.submit(tool_job(true, json!({"ok": true}))));
        queue.shutdown().await;

        let results = queue.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].evaluator, "tool_reliability");
        assert_eq!(engine.summary().evaluations, 1);
        assert!(!queue.submit(tool_job(true, json!({}))));
    }

    #[tokio::test]
    async fn results_keep_only_the_newest() {
        let queue = EvaluationQueue::spawn_with_limit(default_evaluators(), None, 16, 3);
        for i in 0..5 {
            assert!(queue.submit(EvaluationJob::ToolCall {
                session_id: format!("s-{i}"),
                tool: "fetch_patient".into(),
                args: json!({}),
                result: ToolResult::ok(json!({"n": i}), 1),
            }));
        }
        queue.shutdown().await;

        let sessions: Vec<String> = queue.results().into_iter().map(|r| r.session_id).collect();
        assert_eq!(sessions, vec!["s-2", "s-3", "s-4"]);
    }

    struct SlowEvaluator;

    #[async_trait]
    impl Evaluator for SlowEvaluator {
        fn name(&self) -> &str {
            "slow"
        }
        async fn evaluate(&self, _job: &EvaluationJob) -> Option<EvaluationOutcome> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            None
        }
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let queue = EvaluationQueue::spawn(vec![Arc::new(SlowEvaluator)], None, 1);
        let mut accepted = 0;
        for _ in 0..5 {
            if queue.submit(tool_job(true, json!({}))) {
                accepted += 1;
            }
        }
        // one job held by the worker at most, one buffered
        assert!(accepted <= 2);
        assert!(queue.dropped() >= 3);
    }
}
