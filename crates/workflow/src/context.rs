//! Tagged tool outputs and the shared context they update.

use carepilot_core::DischargeAnalysis;
use carepilot_core::assessment::{
    CostEstimate, DrugInteractionReport, GuidelineReport, KnowledgeSnippets, PatientSnapshot, tools,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A successful tool's data, decoded by tool name.
///
/// A typed variant is chosen only when the data carries that shape's key
/// field; anything else is kept as `Other` rather than rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ToolOutput {
    PatientRecord(PatientSnapshot),
    DrugInteractions(DrugInteractionReport),
    GuidelineEvaluation(GuidelineReport),
    CostEstimate(CostEstimate),
    KnowledgeRetrieval(KnowledgeSnippets),
    RiskAnalysis(DischargeAnalysis),
    Other { tool: String, data: serde_json::Value },
}

impl ToolOutput {
    pub fn decode(tool: &str, data: serde_json::Value) -> Self {
        // A typed shape needs its key field; the rest default.
        fn typed<T: serde::de::DeserializeOwned>(data: &serde_json::Value, key: &str) -> Option<T> {
            data.get(key)?;
            serde_json::from_value(data.clone()).ok()
        }

        let decoded = match tool {
            tools::FETCH_PATIENT => typed(&data, "patient_id").map(ToolOutput::PatientRecord),
            tools::CHECK_DRUG_INTERACTIONS => {
                typed(&data, "interactions").map(ToolOutput::DrugInteractions)
            }
            tools::EVALUATE_GUIDELINES => typed(&data, "checks").map(ToolOutput::GuidelineEvaluation),
            tools::ESTIMATE_COSTS => typed(&data, "total_usd").map(ToolOutput::CostEstimate),
            tools::RETRIEVE_KNOWLEDGE => {
                typed(&data, "snippets").map(ToolOutput::KnowledgeRetrieval)
            }
            tools::SCORE_DISCHARGE_RISK => {
                DischargeAnalysis::from_value(&data).map(ToolOutput::RiskAnalysis)
            }
            _ => None,
        };
        decoded.unwrap_or_else(|| ToolOutput::Other {
            tool: tool.to_string(),
            data,
        })
    }
}

/// What a dependent step sees for one of its dependencies.
#[derive(Debug, Clone, PartialEq)]
pub enum StepInput {
    /// The tool's data exactly as returned, plus its decoded form.
    Available {
        data: serde_json::Value,
        output: ToolOutput,
    },
    /// The dependency was optional and failed.
    Unavailable { reason: String },
}

impl StepInput {
    /// Wrap a successful tool's data.
    pub fn available(tool: &str, data: serde_json::Value) -> Self {
        StepInput::Available {
            output: ToolOutput::decode(tool, data.clone()),
            data,
        }
    }

    /// What dependents receive: the raw data, or the unavailable marker.
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            StepInput::Available { data, .. } => data.clone(),
            StepInput::Unavailable { reason } => serde_json::json!({
                "status": "unavailable",
                "reason": reason,
            }),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, StepInput::Available { .. })
    }
}

/// Shared state built up as waves complete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    pub patient_id: String,
    pub patient: Option<PatientSnapshot>,
    pub interactions: Option<DrugInteractionReport>,
    pub guidelines: Option<GuidelineReport>,
    pub costs: Option<CostEstimate>,
    pub knowledge: Option<KnowledgeSnippets>,
    pub analysis: Option<DischargeAnalysis>,
    /// Outputs without a typed shape, by step order
    pub other: BTreeMap<u32, serde_json::Value>,
    /// Optional tools that failed, with the reason
    pub unavailable: BTreeMap<String, String>,
    outputs: BTreeMap<u32, (String, StepInput)>,
}

impl ExecutionContext {
    pub fn new(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            ..Self::default()
        }
    }

    /// Record the outcome of step `order`.
    pub fn apply(&mut self, order: u32, tool: &str, input: StepInput) {
        match &input {
            StepInput::Available { output, .. } => match output.clone() {
                ToolOutput::PatientRecord(p) => self.patient = Some(p),
                ToolOutput::DrugInteractions(r) => self.interactions = Some(r),
                ToolOutput::GuidelineEvaluation(r) => self.guidelines = Some(r),
                ToolOutput::CostEstimate(c) => self.costs = Some(c),
                ToolOutput::KnowledgeRetrieval(k) => self.knowledge = Some(k),
                ToolOutput::RiskAnalysis(a) => self.analysis = Some(a),
                ToolOutput::Other { data, .. } => {
                    self.other.insert(order, data);
                }
            },
            StepInput::Unavailable { reason } => {
                self.unavailable.insert(tool.to_string(), reason.clone());
            }
        }
        self.outputs.insert(order, (tool.to_string(), input));
    }

    pub fn output(&self, order: u32) -> Option<&StepInput> {
        self.outputs.get(&order).map(|(_, input)| input)
    }

    /// Outputs of the given steps keyed by tool name. When two of them
    /// ran the same tool, the higher order wins.
    pub fn inputs_for<'a>(
        &self,
        depends_on: impl IntoIterator<Item = &'a u32>,
    ) -> serde_json::Map<String, serde_json::Value> {
        depends_on
            .into_iter()
            .filter_map(|order| self.outputs.get(order))
            .map(|(tool, input)| (tool.clone(), input.to_value()))
            .collect()
    }
}
