//! Agent-level streaming events.
//!
//! A streaming run emits these as the loop produces them. Ordering and
//! termination are exactly those of the non-streaming run; the terminal
//! `done` event carries the same [`AgentResponse`] the blocking call
//! would have returned.

use crate::service::AgentResponse;
use serde::{Deserialize, Serialize};

/// Events emitted by the agent during streaming execution.
///
/// - `thought`: the model's reasoning for an iteration
/// - `action`: a tool is about to be invoked
/// - `observation`: the result of that invocation, or a parse-error note
/// - `done`: the run finished; carries the full response
/// - `error`: the run failed with a fatal error
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    Thought {
        iteration: u32,
        content: String,
    },

    Action {
        iteration: u32,
        tool: String,
        args: serde_json::Value,
    },

    Observation {
        iteration: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
        content: String,
        success: bool,
    },

    Done {
        response: Box<AgentResponse>,
    },

    Error {
        message: String,
    },
}

impl AgentStreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Thought { .. } => "thought",
            Self::Action { .. } => "action",
            Self::Observation { .. } => "observation",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_action() {
        let event = AgentStreamEvent::Action {
            iteration: 2,
            tool: "check_drug_interactions".into(),
            args: serde_json::json!({"patient_id": "P-1"}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"action""#));
        assert!(json.contains(r#""tool":"check_drug_interactions""#));
        assert!(json.contains(r#""iteration":2"#));
    }

    #[test]
    fn observation_without_tool_omits_field() {
        let event = AgentStreamEvent::Observation {
            iteration: 1,
            tool: None,
            content: "Parse error".into(),
            success: false,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"observation""#));
        assert!(!json.contains(r#""tool""#));
    }

    #[test]
    fn event_types_and_terminals() {
        let thought = AgentStreamEvent::Thought {
            iteration: 1,
            content: "x".into(),
        };
        let error = AgentStreamEvent::Error {
            message: "boom".into(),
        };
        assert_eq!(thought.event_type(), "thought");
        assert_eq!(error.event_type(), "error");
        assert!(!thought.is_terminal());
        assert!(error.is_terminal());
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"thought","iteration":3,"content":"hi"}"#;
        let event: AgentStreamEvent = serde_json::from_str(json).unwrap();
        match event {
            AgentStreamEvent::Thought { iteration, content } => {
                assert_eq!(iteration, 3);
                assert_eq!(content, "hi");
            }
            _ => panic!("Wrong variant"),
        }
    }
}
