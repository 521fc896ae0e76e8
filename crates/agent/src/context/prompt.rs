//! System prompt assembly.

use carepilot_core::provider::ToolDefinition;
use carepilot_memory::{Turn, TurnRole};

pub const DEFAULT_INSTRUCTIONS: &str = "You are CarePilot, a clinical discharge-planning assistant. \
Assess whether the patient is ready for hospital discharge. Gather facts with the available tools \
before concluding; never invent values that no tool returned. When you have enough information, \
give a final answer that states the discharge readiness score (0-100), the status (ready, caution, \
or not_ready), and the key risk factors.";

const RESPONSE_FORMAT: &str = r#"Respond with exactly one JSON object and nothing else.
To call a tool:
{"thought": "<your reasoning>", "action": {"tool": "<tool name>", "args": {<arguments>}}}
To finish:
{"thought": "<your reasoning>", "final_answer": "<answer for the clinician>"}
A final answer may embed a JSON analysis of the form
{"score": <0-100>, "status": "ready|caution|not_ready", "risk_factors": [{"category": "...", "title": "...", "severity": "low|medium|high|critical"}]}"#;

/// Memory injected into the system prompt for one run.
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    pub patient_id: Option<String>,
    /// Rendered long-term history for the patient.
    pub assessment_summary: Option<String>,
    /// Recent conversation turns from this session, oldest first.
    pub recent_turns: Vec<Turn>,
}

impl MemoryContext {
    pub fn is_empty(&self) -> bool {
        self.patient_id.is_none() && self.assessment_summary.is_none() && self.recent_turns.is_empty()
    }
}

/// Build the system prompt for a run.
pub fn system_prompt(instructions: &str, tools: &[ToolDefinition], memory: &MemoryContext) -> String {
    let mut sections = vec![instructions.trim().to_string()];

    if tools.is_empty() {
        sections.push("## Available tools\n(none)".to_string());
    } else {
        let catalog: Vec<String> = tools
            .iter()
            .map(|t| format!("- {}: {}\n  parameters: {}", t.name, t.description, t.parameters))
            .collect();
        sections.push(format!("## Available tools\n{}", catalog.join("\n")));
    }

    sections.push(format!("## Response format\n{RESPONSE_FORMAT}"));

    if let Some(ref patient_id) = memory.patient_id {
        sections.push(format!("## Patient\nThe patient under review is {patient_id}."));
    }
    if let Some(ref summary) = memory.assessment_summary {
        sections.push(format!("## Assessment history\n{summary}"));
    }
    if !memory.recent_turns.is_empty() {
        let lines: Vec<String> = memory.recent_turns.iter().map(render_turn).collect();
        sections.push(format!("## Recent conversation\n{}", lines.join("\n")));
    }

    sections.join("\n\n")
}

fn render_turn(turn: &Turn) -> String {
    match turn.role {
        TurnRole::User => format!("User: {}", turn.content),
        TurnRole::Assistant => format!("Assistant: {}", turn.content),
        TurnRole::Tool => format!(
            "Tool {}: {}",
            turn.tool.as_deref().unwrap_or("unknown"),
            turn.content
        ),
        TurnRole::Summary => turn.content.clone(),
    }
}
