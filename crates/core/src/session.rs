//! Session domain model.
//!
//! A session is the unit of continuity for one multi-turn agent
//! interaction. Its step list is append-only within a run.

use crate::error::SessionError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Planning,
    Executing,
    WaitingInput,
    Completed,
    Error,
}

impl SessionStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Terminal and waiting states may return to `Planning` when the
    /// conversation continues.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Planning, Executing)
                | (Planning, WaitingInput)
                | (Executing, Completed)
                | (Executing, Error)
                | (WaitingInput, Planning)
                | (Completed, Planning)
                | (Error, Planning)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Planning => "planning",
            SessionStatus::Executing => "executing",
            SessionStatus::WaitingInput => "waiting_input",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single reasoning cycle produced.
///
/// Exactly one outcome per step: the model either acted, answered, or
/// (after an unrecoverable parse failure) did neither, in which case a
/// placeholder observation stands in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutcome {
    Action {
        tool: String,
        args: serde_json::Value,
        observation: String,
    },
    Final {
        answer: String,
    },
    NoAction {
        observation: String,
    },
}

/// One Thought → Action → Observation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub iteration: u32,
    pub thought: String,
    pub outcome: StepOutcome,
    pub timestamp: DateTime<Utc>,
}

impl Step {
    /// The `(tool, args)` pair, if this step invoked a tool.
    pub fn action(&self) -> Option<(&str, &serde_json::Value)> {
        match &self.outcome {
            StepOutcome::Action { tool, args, .. } => Some((tool.as_str(), args)),
            _ => None,
        }
    }

    pub fn observation(&self) -> Option<&str> {
        match &self.outcome {
            StepOutcome::Action { observation, .. } | StepOutcome::NoAction { observation } => {
                Some(observation.as_str())
            }
            StepOutcome::Final { .. } => None,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self.outcome, StepOutcome::Final { .. })
    }

    pub fn final_answer(&self) -> Option<&str> {
        match &self.outcome {
            StepOutcome::Final { answer } => Some(answer.as_str()),
            _ => None,
        }
    }
}

/// Per-session context carried between turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_answer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub goal: String,
    pub status: SessionStatus,
    pub steps: Vec<Step>,
    pub context: SessionContext,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(goal: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), goal, now)
    }

    pub fn with_id(id: impl Into<String>, goal: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            status: SessionStatus::Planning,
            steps: Vec::new(),
            context: SessionContext::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: SessionStatus, now: DateTime<Utc>) -> Result<(), SessionError> {
        if self.status == next {
            self.updated_at = now;
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                session_id: self.id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

/// Storage for live sessions.
///
/// The session manager owns policy (TTL, capacity); stores only hold data.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Option<Session>;

    async fn put(&self, session: Session);

    async fn remove(&self, id: &str) -> Option<Session>;

    /// Snapshot of every live session.
    async fn list(&self) -> Vec<Session>;

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_lifecycle() {
        let now = Utc::now();
        let mut session = Session::new("Assess P-1", now);
        assert_eq!(session.status, SessionStatus::Planning);
        session.transition(SessionStatus::Executing, now).unwrap();
        session.transition(SessionStatus::Completed, now).unwrap();
        session.transition(SessionStatus::Planning, now).unwrap();
    }

    #[test]
    fn illegal_transition_rejected() {
        let now = Utc::now();
        let mut session = Session::new("Assess P-1", now);
        let err = session.transition(SessionStatus::Completed, now).unwrap_err();
        assert!(err.to_string().contains("planning -> completed"));
        assert_eq!(session.status, SessionStatus::Planning);
    }

    #[test]
    fn waiting_input_reachable_from_planning_only() {
        assert!(SessionStatus::Planning.can_transition_to(SessionStatus::WaitingInput));
        assert!(!SessionStatus::Executing.can_transition_to(SessionStatus::WaitingInput));
    }

    #[test]
    fn step_accessors() {
        let step = Step {
            iteration: 1,
            thought: "look up meds".into(),
            outcome: StepOutcome::Action {
                tool: "check_drug_interactions".into(),
                args: serde_json::json!({"patient_id": "P-1"}),
                observation: "2 interactions".into(),
            },
            timestamp: Utc::now(),
        };
        assert_eq!(step.action().map(|(t, _)| t), Some("check_drug_interactions"));
        assert_eq!(step.observation(), Some("2 interactions"));
        assert!(!step.is_final());

        let done = Step {
            iteration: 2,
            thought: "done".into(),
            outcome: StepOutcome::Final { answer: "ready".into() },
            timestamp: Utc::now(),
        };
        assert!(done.is_final());
        assert!(done.action().is_none());
        assert_eq!(done.final_answer(), Some("ready"));
    }

    #[test]
    fn step_outcome_serializes_tagged() {
        let outcome = StepOutcome::NoAction {
            observation: "Parse error".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["kind"], "no_action");
    }
}
