//! Discharge assessment records and the typed outputs of clinical tools.
//!
//! An [`AssessmentRecord`] is the minimal unit of durable patient history.
//! The remaining types describe what the clinical data sources return;
//! they are decoded leniently because those sources are external.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical names of the clinical tools.
pub mod tools {
    pub const FETCH_PATIENT: &str = "fetch_patient";
    pub const CHECK_DRUG_INTERACTIONS: &str = "check_drug_interactions";
    pub const EVALUATE_GUIDELINES: &str = "evaluate_guidelines";
    pub const ESTIMATE_COSTS: &str = "estimate_costs";
    pub const RETRIEVE_KNOWLEDGE: &str = "retrieve_knowledge";
    pub const SCORE_DISCHARGE_RISK: &str = "score_discharge_risk";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "LOW", alias = "Low")]
    Low,
    #[serde(alias = "MEDIUM", alias = "Medium", alias = "moderate")]
    Medium,
    #[serde(alias = "HIGH", alias = "High")]
    High,
    #[serde(alias = "CRITICAL", alias = "Critical")]
    Critical,
}

impl Severity {
    /// High and critical factors feed the cross-patient risk patterns.
    pub fn is_high(self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DischargeStatus {
    #[serde(alias = "READY")]
    Ready,
    #[serde(alias = "CAUTION", alias = "ready_with_caution")]
    Caution,
    #[serde(alias = "NOT_READY")]
    NotReady,
}

impl DischargeStatus {
    pub fn from_score(score: u8) -> Self {
        match score {
            75..=u8::MAX => DischargeStatus::Ready,
            50..=74 => DischargeStatus::Caution,
            _ => DischargeStatus::NotReady,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DischargeStatus::Ready => "ready",
            DischargeStatus::Caution => "caution",
            DischargeStatus::NotReady => "not_ready",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub category: String,
    pub title: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// The result of scoring one patient for discharge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DischargeAnalysis {
    /// Readiness score, 0 (not ready) to 100 (ready)
    pub score: u8,
    pub status: DischargeStatus,
    #[serde(default)]
    pub risk_factors: Vec<RiskFactor>,
}

impl DischargeAnalysis {
    /// Decode an analysis from loosely-shaped JSON.
    ///
    /// Accepts fractional or out-of-range scores (clamped) and derives the
    /// status from the score when it is missing or unrecognised. Returns
    /// `None` when there is no numeric `score`.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let raw = value.get("score")?.as_f64()?;
        let score = raw.round().clamp(0.0, 100.0) as u8;
        let status = value
            .get("status")
            .and_then(|s| serde_json::from_value(s.clone()).ok())
            .unwrap_or_else(|| DischargeStatus::from_score(score));
        let risk_factors = value
            .get("risk_factors")
            .and_then(|r| r.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value::<RiskFactor>(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            score,
            status,
            risk_factors,
        })
    }

    /// Sorted, de-duplicated categories of the high-severity factors.
    pub fn high_severity_categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self
            .risk_factors
            .iter()
            .filter(|f| f.severity.is_high())
            .map(|f| f.category.clone())
            .collect();
        categories.sort();
        categories.dedup();
        categories
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFactorSummary {
    pub severity: Severity,
    pub category: String,
    pub title: String,
}

impl From<&RiskFactor> for RiskFactorSummary {
    fn from(factor: &RiskFactor) -> Self {
        Self {
            severity: factor.severity,
            category: factor.category.clone(),
            title: factor.title.clone(),
        }
    }
}

/// One stored assessment in a patient's long-term history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub patient_id: String,
    pub assessment_date: DateTime<Utc>,
    pub score: u8,
    pub status: DischargeStatus,
    pub risk_factor_summaries: Vec<RiskFactorSummary>,
    pub model: String,
}

impl AssessmentRecord {
    pub fn from_analysis(
        patient_id: impl Into<String>,
        analysis: &DischargeAnalysis,
        model: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            patient_id: patient_id.into(),
            assessment_date: at,
            score: analysis.score,
            status: analysis.status,
            risk_factor_summaries: analysis.risk_factors.iter().map(RiskFactorSummary::from).collect(),
            model: model.into(),
        }
    }
}

// ── Clinical tool outputs ──

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientSnapshot {
    pub patient_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub diagnoses: Vec<String>,
    #[serde(default)]
    pub medications: Vec<String>,
    #[serde(default)]
    pub length_of_stay_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugInteraction {
    pub drugs: Vec<String>,
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrugInteractionReport {
    #[serde(default)]
    pub interactions: Vec<DrugInteraction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelineCheck {
    pub guideline: String,
    pub met: bool,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuidelineReport {
    #[serde(default)]
    pub checks: Vec<GuidelineCheck>,
}

impl GuidelineReport {
    pub fn unmet(&self) -> impl Iterator<Item = &GuidelineCheck> {
        self.checks.iter().filter(|c| !c.met)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub total_usd: f64,
    #[serde(default)]
    pub out_of_pocket_usd: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    pub source: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSnippets {
    #[serde(default)]
    pub snippets: Vec<KnowledgeSnippet>,
}
