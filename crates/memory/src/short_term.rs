//! Short-term memory: per-session working state.
//!
//! Each session gets one [`ShortTermMemory`] record holding its
//! conversation, the latest result of each tool, and a reasoning trace.
//! Both lists are bounded: old conversation turns are folded into a
//! summary line, and the trace keeps only its most recent entries.

use carepilot_core::ToolResult;
use carepilot_core::error::MemoryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Bounds applied to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimits {
    pub history_limit: usize,
    pub history_compress_batch: usize,
    pub trace_limit: usize,
    pub trace_keep: usize,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            history_limit: 50,
            history_compress_batch: 10,
            trace_limit: 100,
            trace_keep: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    Tool,
    /// Stand-in for a batch of compressed turns.
    Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    /// Tool name, for `Tool` turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Tool outcome, for `Tool` turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }

    pub fn tool(name: impl Into<String>, success: bool, content: impl Into<String>) -> Self {
        Self {
            tool: Some(name.into()),
            success: Some(success),
            ..Self::new(TurnRole::Tool, content)
        }
    }

    fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool: None,
            success: None,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningEntry {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingState {
    pub goal: String,
    pub reasoning_trace: Vec<ReasoningEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortTermMemory {
    pub session_id: String,
    pub conversation_history: Vec<Turn>,
    pub current_patient_summary: Option<String>,
    /// Latest result per tool name
    pub tool_results: HashMap<String, ToolResult>,
    pub working_state: WorkingState,
}

impl ShortTermMemory {
    fn new(session_id: String, goal: String) -> Self {
        Self {
            session_id,
            conversation_history: Vec::new(),
            current_patient_summary: None,
            tool_results: HashMap::new(),
            working_state: WorkingState {
                goal,
                reasoning_trace: Vec::new(),
            },
        }
    }

    fn push_turn(&mut self, turn: Turn, limits: &MemoryLimits) {
        self.conversation_history.push(turn);
        if self.conversation_history.len() > limits.history_limit {
            let batch = limits
                .history_compress_batch
                .min(self.conversation_history.len());
            let compressed: Vec<Turn> = self.conversation_history.drain(..batch).collect();
            let summary = summarize(&compressed);
            debug!(session_id = %self.session_id, batch, "Compressed conversation history");
            self.conversation_history.insert(0, Turn::new(TurnRole::Summary, summary));
        }
    }

    fn push_reasoning(&mut self, text: String, limits: &MemoryLimits) {
        let trace = &mut self.working_state.reasoning_trace;
        trace.push(ReasoningEntry {
            timestamp: Utc::now(),
            text,
        });
        if trace.len() > limits.trace_limit {
            let excess = trace.len() - limits.trace_keep;
            trace.drain(..excess);
        }
    }
}

/// One line describing what a batch of turns contained.
fn summarize(turns: &[Turn]) -> String {
    let count = |role: TurnRole| turns.iter().filter(|t| t.role == role).count();
    let tool_ok = turns
        .iter()
        .filter(|t| t.role == TurnRole::Tool && t.success == Some(true))
        .count();
    let mut line = format!(
        "[Summary of {} earlier turns: {} user messages, {} assistant messages, {} successful tool calls",
        turns.len(),
        count(TurnRole::User),
        count(TurnRole::Assistant),
        tool_ok
    );
    let nested = count(TurnRole::Summary);
    if nested > 0 {
        line.push_str(&format!(", {nested} prior summaries"));
    }
    line.push(']');
    line
}

/// All live short-term memories, keyed by session id.
#[derive(Clone)]
pub struct ShortTermStore {
    sessions: Arc<RwLock<HashMap<String, ShortTermMemory>>>,
    limits: MemoryLimits,
}

impl ShortTermStore {
    pub fn new(limits: MemoryLimits) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            limits,
        }
    }

    pub fn limits(&self) -> MemoryLimits {
        self.limits
    }

    /// Allocate a fresh record under a new session id.
    pub async fn create_session(&self, goal: impl Into<String>) -> String {
        let id = Uuid::new_v4().to_string();
        self.create_session_with_id(&id, goal).await;
        id
    }

    /// Allocate a fresh record under `id`, replacing any existing one.
    pub async fn create_session_with_id(&self, id: &str, goal: impl Into<String>) {
        let memory = ShortTermMemory::new(id.to_string(), goal.into());
        self.sessions.write().await.insert(id.to_string(), memory);
    }

    /// Create the record if missing; keep it otherwise.
    pub async fn ensure_session(&self, id: &str, goal: &str) {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.to_string())
            .or_insert_with(|| ShortTermMemory::new(id.to_string(), goal.to_string()));
    }

    async fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut ShortTermMemory, &MemoryLimits) -> T,
    ) -> Result<T, MemoryError> {
        let mut sessions = self.sessions.write().await;
        let memory = sessions
            .get_mut(session_id)
            .ok_or_else(|| MemoryError::UnknownSession(session_id.to_string()))?;
        Ok(f(memory, &self.limits))
    }

    pub async fn add_turn(&self, session_id: &str, turn: Turn) -> Result<(), MemoryError> {
        self.with_session(session_id, |m, limits| m.push_turn(turn, limits))
            .await
    }

    pub async fn record_reasoning_step(
        &self,
        session_id: &str,
        text: impl Into<String>,
    ) -> Result<(), MemoryError> {
        let text = text.into();
        self.with_session(session_id, |m, limits| m.push_reasoning(text, limits))
            .await
    }

    pub async fn store_tool_result(
        &self,
        session_id: &str,
        tool: &str,
        result: ToolResult,
    ) -> Result<(), MemoryError> {
        self.with_session(session_id, |m, _| {
            m.tool_results.insert(tool.to_string(), result);
        })
        .await
    }

    pub async fn set_patient_summary(
        &self,
        session_id: &str,
        summary: impl Into<String>,
    ) -> Result<(), MemoryError> {
        let summary = summary.into();
        self.with_session(session_id, |m, _| m.current_patient_summary = Some(summary))
            .await
    }

    pub async fn set_goal(&self, session_id: &str, goal: impl Into<String>) -> Result<(), MemoryError> {
        let goal = goal.into();
        self.with_session(session_id, |m, _| m.working_state.goal = goal)
            .await
    }

    /// Snapshot of a session's memory.
    pub async fn get(&self, session_id: &str) -> Option<ShortTermMemory> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// The last `n` conversation turns, oldest first.
    pub async fn recent_turns(&self, session_id: &str, n: usize) -> Vec<Turn> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|m| {
                let history = &m.conversation_history;
                history[history.len().saturating_sub(n)..].to_vec()
            })
            .unwrap_or_default()
    }

    pub async fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for ShortTermStore {
    fn default() -> Self {
        Self::new(MemoryLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_get_session() {
        let store = ShortTermStore::default();
        let id = store.create_session("Assess P-1").await;
        let memory = store.get(&id).await.unwrap();
        assert_eq!(memory.working_state.goal, "Assess P-1");
        assert!(memory.conversation_history.is_empty());
    }

    #[tokio::test]
    async fn unknown_session_is_an_error() {
        let store = ShortTermStore::default();
        let err = store.add_turn("nope", Turn::user("hi")).await.unwrap_err();
        assert!(matches!(err, MemoryError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn history_never_exceeds_limit() {
        let store = ShortTermStore::default();
        let id = store.create_session("goal").await;
        for i in 0..200 {
            store.add_turn(&id, Turn::user(format!("msg {i}"))).await.unwrap();
            let len = store.get(&id).await.unwrap().conversation_history.len();
            assert!(len <= 50, "history grew to {len}");
        }
    }

    #[tokio::test]
    async fn overflow_compresses_oldest_ten_into_one_line() {
        let store = ShortTermStore::default();
        let id = store.create_session("goal").await;
        for i in 0..50 {
            let turn = match i % 3 {
                0 => Turn::user(format!("q{i}")),
                1 => Turn::assistant(format!("a{i}")),
                _ => Turn::tool("fetch_patient", i % 2 == 0, "{}"),
            };
            store.add_turn(&id, turn).await.unwrap();
        }
        assert_eq!(store.get(&id).await.unwrap().conversation_history.len(), 50);

        store.add_turn(&id, Turn::user("turn 51")).await.unwrap();
        let history = store.get(&id).await.unwrap().conversation_history;
        assert_eq!(history.len(), 42);
        assert_eq!(history[0].role, TurnRole::Summary);
        // first ten: i = 0..10 → users at 0,3,6,9; assistants at 1,4,7; tools at 2,5,8 (ok at 2,8)
        assert_eq!(
            history[0].content,
            "[Summary of 10 earlier turns: 4 user messages, 3 assistant messages, 2 successful tool calls]"
        );
        assert_eq!(history[1].content, "a10");
        assert_eq!(history.last().unwrap().content, "turn 51");
    }

    #[tokio::test]
    async fn reasoning_trace_truncates_to_most_recent() {
        let store = ShortTermStore::default();
        let id = store.create_session("goal").await;
        for i in 0..100 {
            store.record_reasoning_step(&id, format!("step {i}")).await.unwrap();
        }
        assert_eq!(store.get(&id).await.unwrap().working_state.reasoning_trace.len(), 100);

        store.record_reasoning_step(&id, "step 100").await.unwrap();
        let trace = store.get(&id).await.unwrap().working_state.reasoning_trace;
        assert_eq!(trace.len(), 50);
        assert_eq!(trace[0].text, "step 51");
        assert_eq!(trace[49].text, "step 100");
    }

    #[tokio::test]
    async fn tool_results_keep_latest_per_tool() {
        let store = ShortTermStore::default();
        let id = store.create_session("goal").await;
        store
            .store_tool_result(&id, "estimate_costs", ToolResult::failed("timeout", 5))
            .await
            .unwrap();
        store
            .store_tool_result(&id, "estimate_costs", ToolResult::ok(serde_json::json!({"total_usd": 10.0}), 5))
            .await
            .unwrap();
        let memory = store.get(&id).await.unwrap();
        assert!(memory.tool_results["estimate_costs"].success);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = ShortTermStore::default();
        let a = store.create_session("a").await;
        let b = store.create_session("b").await;
        store.add_turn(&a, Turn::user("only in a")).await.unwrap();
        store.set_patient_summary(&a, "P-1, 82y").await.unwrap();
        assert!(store.get(&b).await.unwrap().conversation_history.is_empty());
        assert!(store.get(&b).await.unwrap().current_patient_summary.is_none());
        assert_eq!(store.recent_turns(&a, 5).await.len(), 1);
        assert!(store.remove(&a).await);
        assert_eq!(store.len().await, 1);
    }
}
