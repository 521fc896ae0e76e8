//! Parsing of model turns into a structured decision.
//!
//! The model is asked for a single JSON object:
//!
//! ```json
//! {"thought": "...", "action": {"tool": "fetch_patient", "args": {"patient_id": "P-1"}}}
//! {"thought": "...", "final_answer": "..."}
//! ```
//!
//! Models routinely wrap that object in code fences or prose, so the parser
//! scans for the first JSON object in the text rather than requiring the
//! whole reply to be JSON.

use serde_json::Value;
use thiserror::Error;

/// What the model decided to do this iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Act {
        thought: String,
        tool: String,
        args: Value,
    },
    Finish {
        thought: String,
        answer: String,
    },
}

impl Decision {
    pub fn thought(&self) -> &str {
        match self {
            Decision::Act { thought, .. } | Decision::Finish { thought, .. } => thought,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("no JSON object found in model output")]
    NoJson,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("response has neither an action nor a final_answer")]
    MissingOutcome,
}

/// Parse one model reply.
///
/// When both `final_answer` and `action` are present the final answer wins.
pub fn parse_decision(raw: &str) -> Result<Decision, ParseError> {
    let object = extract_object(raw)?;
    let thought = object
        .get("thought")
        .map(value_to_text)
        .unwrap_or_default();

    if let Some(answer) = object.get("final_answer").filter(|v| !v.is_null()) {
        return Ok(Decision::Finish {
            thought,
            answer: value_to_text(answer),
        });
    }

    match object.get("action") {
        Some(Value::Object(action)) => {
            let tool = action
                .get("tool")
                .or_else(|| action.get("name"))
                .and_then(Value::as_str)
                .filter(|t| !t.trim().is_empty())
                .ok_or(ParseError::MissingOutcome)?;
            let args = action
                .get("args")
                .or_else(|| action.get("arguments"))
                .or_else(|| action.get("input"))
                .cloned();
            Ok(Decision::Act {
                thought,
                tool: tool.trim().to_string(),
                args: normalize_args(args),
            })
        }
        // Flat form: {"action": "tool_name", "action_input": {...}}
        Some(Value::String(tool)) if !tool.trim().is_empty() => {
            let args = object
                .get("action_input")
                .or_else(|| object.get("args"))
                .cloned();
            Ok(Decision::Act {
                thought,
                tool: tool.trim().to_string(),
                args: normalize_args(args),
            })
        }
        _ => Err(ParseError::MissingOutcome),
    }
}

/// Locate and decode the first JSON object in `raw`.
pub fn extract_object(raw: &str) -> Result<serde_json::Map<String, Value>, ParseError> {
    let text = strip_fences(raw);
    let mut last_error = None;

    for (start, _) in text.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(map))) => return Ok(map),
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                if last_error.is_none() {
                    last_error = Some(e.to_string());
                }
            }
            None => break,
        }
    }

    Err(match last_error {
        Some(e) => ParseError::InvalidJson(e),
        None => ParseError::NoJson,
    })
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line, then the closing fence.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn normalize_args(args: Option<Value>) -> Value {
    match args {
        None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
        // Some models double-encode arguments as a JSON string.
        Some(Value::String(s)) => match serde_json::from_str::<Value>(&s) {
            Ok(v @ Value::Object(_)) => v,
            _ => Value::String(s),
        },
        Some(v) => v,
    }
}

/// Render any JSON value as answer text. Strings are taken verbatim.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_action() {
        let raw = r#"{"thought":"need data","action":{"tool":"fetch_patient","args":{"patient_id":"P-1"}}}"#;
        let decision = parse_decision(raw).unwrap();
        assert_eq!(
            decision,
            Decision::Act {
                thought: "need data".into(),
                tool: "fetch_patient".into(),
                args: json!({"patient_id": "P-1"}),
            }
        );
    }

    #[test]
    fn parses_final_answer() {
        let decision = parse_decision(r#"{"thought":"done","final_answer":"Ready."}"#).unwrap();
        assert_eq!(
            decision,
            Decision::Finish {
                thought: "done".into(),
                answer: "Ready.".into()
            }
        );
    }

    #[test]
    fn strips_code_fences_and_prose() {
        let raw = "Here you go:\n```json\n{\"thought\":\"t\",\"final_answer\":\"ok\"}\n```";
        assert!(matches!(parse_decision(raw), Ok(Decision::Finish { .. })));

        let fenced = "```json\n{\"thought\":\"t\",\"final_answer\":\"ok\"}\n```";
        assert!(matches!(parse_decision(fenced), Ok(Decision::Finish { .. })));
    }

    #[test]
    fn final_answer_wins_over_action() {
        let raw = r#"{"thought":"t","action":{"tool":"x","args":{}},"final_answer":"stop"}"#;
        match parse_decision(raw).unwrap() {
            Decision::Finish { answer, .. } => assert_eq!(answer, "stop"),
            other => panic!("expected final answer, got {other:?}"),
        }
    }

    #[test]
    fn object_final_answer_is_coerced_to_text() {
        let raw = r#"{"thought":"t","final_answer":{"score":80,"status":"ready"}}"#;
        match parse_decision(raw).unwrap() {
            Decision::Finish { answer, .. } => {
                let value: Value = serde_json::from_str(&answer).unwrap();
                assert_eq!(value["score"], 80);
            }
            other => panic!("expected final answer, got {other:?}"),
        }
    }

    #[test]
    fn flat_action_form() {
        let raw = r#"{"thought":"t","action":"estimate_costs","action_input":{"patient_id":"P-2"}}"#;
        match parse_decision(raw).unwrap() {
            Decision::Act { tool, args, .. } => {
                assert_eq!(tool, "estimate_costs");
                assert_eq!(args["patient_id"], "P-2");
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn missing_args_default_to_empty_object() {
        let decision = parse_decision(r#"{"action":{"tool":"fetch_patient"}}"#).unwrap();
        match decision {
            Decision::Act { thought, args, .. } => {
                assert!(thought.is_empty());
                assert_eq!(args, json!({}));
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn string_encoded_args_are_decoded() {
        let raw = r#"{"thought":"t","action":{"tool":"x","args":"{\"a\":1}"}}"#;
        match parse_decision(raw).unwrap() {
            Decision::Act { args, .. } => assert_eq!(args, json!({"a": 1})),
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn errors() {
        assert_eq!(parse_decision("no json here"), Err(ParseError::NoJson));
        assert!(matches!(
            parse_decision(r#"{"thought": "unterminated"#),
            Err(ParseError::InvalidJson(_))
        ));
        assert_eq!(
            parse_decision(r#"{"thought":"only thinking"}"#),
            Err(ParseError::MissingOutcome)
        );
        assert_eq!(
            parse_decision(r#"{"thought":"t","final_answer":null}"#),
            Err(ParseError::MissingOutcome)
        );
    }
}
