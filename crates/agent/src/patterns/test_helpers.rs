//! Shared test helpers for agent tests.

use carepilot_core::error::ProviderError;
use carepilot_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use carepilot_core::tool::{FnTool, ToolRegistry};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A provider that replays scripted replies in order.
///
/// Once the script runs out it repeats the fallback reply if one was
/// given, otherwise returns an API error.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    fallback: Option<String>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.to_string())).collect()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with the same reply.
    pub fn repeating(reply: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Some(reply.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue an error after the scripted replies.
    pub fn then_error(self, error: ProviderError) -> Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        let next = self.replies.lock().unwrap().pop_front();
        let content = match next {
            Some(reply) => reply?,
            None => self.fallback.clone().ok_or_else(|| ProviderError::ApiError {
                status_code: 500,
                message: "script exhausted".into(),
            })?,
        };
        Ok(ProviderResponse {
            content,
            usage: Some(Usage {
                prompt_tokens: 100,
                completion_tokens: 20,
                total_tokens: 120,
            }),
            latency_ms: 5,
            model,
        })
    }
}

/// A provider whose calls never complete.
pub struct HangingProvider;

#[async_trait::async_trait]
impl Provider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn generate(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        std::future::pending().await
    }
}

/// A registry with a patient lookup, a failing cost tool, and a tool that panics.
pub fn discharge_tools() -> Arc<ToolRegistry> {
    Arc::new(base_registry())
}

fn base_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FnTool::new(
        "fetch_patient",
        "Fetch the patient record",
        json!({"type": "object", "properties": {"patient_id": {"type": "string"}}}),
        |args| async move {
            Ok(json!({
                "patient_id": args["patient_id"].as_str().unwrap_or("unknown"),
                "age": 71,
                "medications": ["warfarin", "aspirin"],
                "length_of_stay_days": 6
            }))
        },
    )));
    registry.register(Arc::new(FnTool::new(
        "estimate_costs",
        "Estimate post-discharge costs",
        json!({"type": "object"}),
        |_args| async move {
            Err(carepilot_core::error::ToolError::ExecutionFailed {
                tool_name: "estimate_costs".into(),
                reason: "billing service unavailable".into(),
            })
        },
    )));
    registry.register(Arc::new(FnTool::new(
        "retrieve_knowledge",
        "Search discharge guidance",
        json!({"type": "object"}),
        |_args| async move {
            if true {
                panic!("index corrupted");
            }
            Ok(json!(null))
        },
    )));
    registry
}

/// [`discharge_tools`] plus the remaining tools of the discharge plan.
/// Scoring returns 58 with one high-severity medication factor.
pub fn pipeline_tools() -> Arc<ToolRegistry> {
    let mut registry = base_registry();
    registry.register(Arc::new(FnTool::new(
        "check_drug_interactions",
        "Check medication interactions",
        json!({"type": "object"}),
        |_args| async move {
            Ok(json!({"interactions": [{"drugs": ["warfarin", "aspirin"], "severity": "high"}]}))
        },
    )));
    registry.register(Arc::new(FnTool::new(
        "evaluate_guidelines",
        "Evaluate discharge guidelines",
        json!({"type": "object"}),
        |_args| async move { Ok(json!({"passed": 4, "failed": 1})) },
    )));
    registry.register(Arc::new(FnTool::new(
        "score_discharge_risk",
        "Score discharge readiness",
        json!({"type": "object"}),
        |args| async move {
            assert!(args["inputs"].get("fetch_patient").is_some());
            Ok(json!({
                "score": 58,
                "status": "caution",
                "risk_factors": [
                    {"category": "medication", "title": "Anticoagulant therapy", "severity": "high"}
                ]
            }))
        },
    )));
    Arc::new(registry)
}

/// [`discharge_tools`] plus a vitals monitor whose calls never complete.
pub fn hanging_tools() -> Arc<ToolRegistry> {
    let mut registry = base_registry();
    registry.register(Arc::new(FnTool::new(
        "monitor_vitals",
        "Stream bedside vitals",
        json!({"type": "object"}),
        |_args| async move { std::future::pending().await },
    )));
    Arc::new(registry)
}

pub fn action(tool: &str, args: serde_json::Value) -> String {
    json!({"thought": format!("call {tool}"), "action": {"tool": tool, "args": args}}).to_string()
}

pub fn final_answer(answer: &str) -> String {
    json!({"thought": "done", "final_answer": answer}).to_string()
}
