//! The running transcript sent to the model each iteration.

use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Assistant(String),
    Observation(String),
}

/// Goal plus every `Assistant:` / `Observation:` line so far.
///
/// Only grows: nothing is removed or rewritten once appended.
#[derive(Debug, Clone)]
pub struct Transcript {
    goal: String,
    entries: Vec<Entry>,
}

impl Transcript {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            entries: Vec::new(),
        }
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn push_action(&mut self, thought: &str, tool: &str, args: &Value) {
        let line = json!({"thought": thought, "action": {"tool": tool, "args": args}});
        self.entries.push(Entry::Assistant(line.to_string()));
    }

    /// An assistant turn that produced no action.
    pub fn push_thought(&mut self, thought: &str) {
        let line = json!({ "thought": thought });
        self.entries.push(Entry::Assistant(line.to_string()));
    }

    pub fn push_observation(&mut self, observation: impl Into<String>) {
        self.entries.push(Entry::Observation(observation.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as the prompt for the next model call.
    pub fn render(&self) -> String {
        let mut out = format!("User goal: {}\n", self.goal);
        if !self.entries.is_empty() {
            out.push('\n');
        }
        for entry in &self.entries {
            match entry {
                Entry::Assistant(text) => {
                    out.push_str("Assistant: ");
                    out.push_str(text);
                }
                Entry::Observation(text) => {
                    out.push_str("Observation: ");
                    out.push_str(text);
                }
            }
            out.push('\n');
        }
        out.push_str("\nRespond with your next step as a single JSON object.");
        out
    }

    /// Prompt for the one retry after an unparseable reply.
    pub fn render_reformat_request(&self, bad_output: &str, error: &str) -> String {
        format!(
            "{}\n\nYour previous reply could not be parsed ({error}):\n{bad_output}\n\n\
             Reformat it as strict JSON with a \"thought\" and either an \"action\" \
             ({{\"tool\": ..., \"args\": {{...}}}}) or a \"final_answer\". Output only the JSON object.",
            self.render()
        )
    }
}
