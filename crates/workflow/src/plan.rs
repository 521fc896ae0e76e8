//! Static step plans for the dependency scheduler.

use carepilot_core::assessment::tools;
use carepilot_core::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// One step of a plan. `depends_on` holds order numbers of other steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub order: u32,
    pub tool: String,
    #[serde(default)]
    pub depends_on: BTreeSet<u32>,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Extra arguments merged into the tool call
    #[serde(default)]
    pub args: serde_json::Value,
}

fn default_required() -> bool {
    true
}

impl PlannedStep {
    pub fn new(order: u32, tool: impl Into<String>) -> Self {
        Self {
            order,
            tool: tool.into(),
            depends_on: BTreeSet::new(),
            required: true,
            args: serde_json::Value::Null,
        }
    }

    pub fn after(mut self, deps: impl IntoIterator<Item = u32>) -> Self {
        self.depends_on.extend(deps);
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub patient_id: String,
    pub steps: Vec<PlannedStep>,
}

impl Plan {
    pub fn new(patient_id: impl Into<String>, steps: Vec<PlannedStep>) -> Self {
        Self {
            patient_id: patient_id.into(),
            steps,
        }
    }

    /// The standard discharge-readiness plan: fetch the patient, fan out
    /// to the four clinical checks, then score.
    pub fn discharge_assessment(patient_id: impl Into<String>) -> Self {
        Self::new(
            patient_id,
            vec![
                PlannedStep::new(1, tools::FETCH_PATIENT),
                PlannedStep::new(2, tools::CHECK_DRUG_INTERACTIONS).after([1]),
                PlannedStep::new(3, tools::EVALUATE_GUIDELINES).after([1]),
                PlannedStep::new(4, tools::ESTIMATE_COSTS).after([1]).optional(),
                PlannedStep::new(5, tools::RETRIEVE_KNOWLEDGE).after([1]).optional(),
                PlannedStep::new(6, tools::SCORE_DISCHARGE_RISK).after([2, 3, 4, 5]),
            ],
        )
    }

    pub fn step(&self, order: u32) -> Option<&PlannedStep> {
        self.steps.iter().find(|s| s.order == order)
    }

    /// Every step `order` depends on, directly or through other steps.
    /// Terminates on cyclic plans.
    pub fn ancestors(&self, order: u32) -> BTreeSet<u32> {
        let mut seen = BTreeSet::new();
        let mut pending: Vec<u32> = self
            .step(order)
            .map(|s| s.depends_on.iter().copied().collect())
            .unwrap_or_default();
        while let Some(next) = pending.pop() {
            if next == order || !seen.insert(next) {
                continue;
            }
            if let Some(step) = self.step(next) {
                pending.extend(step.depends_on.iter().copied());
            }
        }
        seen
    }

    /// Reject duplicate orders, self-dependencies, and dependencies on
    /// orders that do not exist. Cycles are left to the scheduler.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.steps.is_empty() {
            return Err(PipelineError::InvalidPlan("plan has no steps".into()));
        }

        let mut orders = HashSet::new();
        for step in &self.steps {
            if !orders.insert(step.order) {
                return Err(PipelineError::InvalidPlan(format!(
                    "duplicate step order {}",
                    step.order
                )));
            }
        }

        for step in &self.steps {
            if step.depends_on.contains(&step.order) {
                return Err(PipelineError::InvalidPlan(format!(
                    "step {} ({}) depends on itself",
                    step.order, step.tool
                )));
            }
            if let Some(missing) = step.depends_on.iter().find(|d| !orders.contains(*d)) {
                return Err(PipelineError::InvalidPlan(format!(
                    "step {} ({}) depends on unknown step {missing}",
                    step.order, step.tool
                )));
            }
        }
        Ok(())
    }
}
