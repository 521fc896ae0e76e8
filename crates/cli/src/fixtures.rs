//! Fixture-backed tools.
//!
//! A fixture file is a JSON object mapping tool name to the data that
//! tool returns. An entry of the form `{"error": "reason"}` makes the
//! tool fail with that reason, which is how unavailable services are
//! simulated.

use async_trait::async_trait;
use carepilot_core::assessment::tools;
use carepilot_core::error::ToolError;
use carepilot_core::tool::{Tool, ToolRegistry};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub struct FixtureTool {
    name: String,
    description: String,
    response: Value,
}

impl FixtureTool {
    pub fn new(name: impl Into<String>, response: Value) -> Self {
        let name = name.into();
        Self {
            description: describe(&name).to_string(),
            name,
            response,
        }
    }

    /// The failure reason, for `{"error": "..."}` entries.
    fn failure(&self) -> Option<&str> {
        let object = self.response.as_object()?;
        if object.len() != 1 {
            return None;
        }
        object.get("error")?.as_str()
    }
}

#[async_trait]
impl Tool for FixtureTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        if self.name == tools::RETRIEVE_KNOWLEDGE {
            return json!({
                "type": "object",
                "properties": {
                    "patient_id": {"type": "string"},
                    "query": {"type": "string", "description": "What to look up"}
                },
                "required": ["query"]
            });
        }
        json!({
            "type": "object",
            "properties": {
                "patient_id": {"type": "string", "description": "The patient to look up"}
            },
            "required": ["patient_id"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        debug!(tool = %self.name, args = %arguments, "Serving fixture");
        if let Some(reason) = self.failure() {
            return Err(ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: reason.to_string(),
            });
        }
        Ok(self.response.clone())
    }
}

fn describe(name: &str) -> &'static str {
    match name {
        tools::FETCH_PATIENT => "Fetch the patient's record: demographics, diagnoses, medications, and labs.",
        tools::CHECK_DRUG_INTERACTIONS => "Check the patient's medications for known interactions.",
        tools::EVALUATE_GUIDELINES => "Evaluate the patient against discharge guidelines.",
        tools::ESTIMATE_COSTS => "Estimate post-discharge costs and insurance coverage.",
        tools::RETRIEVE_KNOWLEDGE => "Search discharge guidance and clinical references.",
        tools::SCORE_DISCHARGE_RISK => "Score discharge readiness from the gathered facts (0-100).",
        _ => "Fixture-backed tool.",
    }
}

/// Build a registry from parsed fixture JSON.
pub fn registry_from_value(value: Value) -> Result<ToolRegistry, String> {
    let Value::Object(entries) = value else {
        return Err("fixture file must be a JSON object mapping tool name to data".into());
    };
    if entries.is_empty() {
        return Err("fixture file defines no tools".into());
    }
    let mut registry = ToolRegistry::new();
    for (name, response) in entries {
        registry.register(Arc::new(FixtureTool::new(name, response)));
    }
    Ok(registry)
}

pub fn load_registry(path: &Path) -> Result<ToolRegistry, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read fixtures at {}: {e}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse fixtures at {}: {e}", path.display()))?;
    Ok(registry_from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_fixture_data() {
        let registry = registry_from_value(json!({
            "fetch_patient": {"patient_id": "P-1", "age": 80},
            "estimate_costs": {"error": "billing offline"}
        }))
        .unwrap();
        assert_eq!(registry.names(), vec!["estimate_costs", "fetch_patient"]);

        let ok = registry.execute("fetch_patient", json!({"patient_id": "P-1"})).await;
        assert!(ok.success);
        assert_eq!(ok.data.unwrap()["age"], 80);

        let failed = registry.execute("estimate_costs", json!({})).await;
        assert!(!failed.success);
        assert!(failed.error.unwrap().contains("billing offline"));
    }

    #[test]
    fn error_key_alongside_data_is_plain_data() {
        let tool = FixtureTool::new("evaluate_guidelines", json!({"error": "x", "passed": 3}));
        assert!(tool.failure().is_none());
    }

    #[test]
    fn rejects_non_object_fixtures() {
        assert!(registry_from_value(json!([1, 2])).is_err());
        assert!(registry_from_value(json!({})).is_err());
    }

    #[test]
    fn descriptions_cover_known_tools() {
        let definitions = registry_from_value(json!({"score_discharge_risk": {"score": 70}}))
            .unwrap()
            .definitions();
        assert!(definitions[0].description.contains("readiness"));
    }
}
