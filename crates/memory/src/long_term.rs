//! Long-term memory: cross-session patient assessment history.
//!
//! History is append-only per patient. Every store also feeds a global
//! table of co-occurring high-severity risk categories. The whole store
//! can be saved to and loaded from a pretty-printed JSON file.

use carepilot_core::error::MemoryError;
use carepilot_core::{AssessmentRecord, DischargeAnalysis};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

const CONTEXT_WINDOW: usize = 5;
const TREND_WINDOW: usize = 3;
const TREND_THRESHOLD: f64 = 10.0;
const MAX_RECURRING: usize = 5;

/// A set of high-severity categories seen together, and how often.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPattern {
    /// Sorted, de-duplicated categories
    pub pattern: Vec<String>,
    pub frequency: u32,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreTrend {
    Improving,
    Declining,
    Stable,
    Unknown,
}

impl ScoreTrend {
    /// Classify a chronological score series.
    ///
    /// Looks at the last three scores (or two, if that is all there is)
    /// and compares their mean to the first of them.
    pub fn classify(scores: &[u8]) -> Self {
        if scores.len() < 2 {
            return ScoreTrend::Unknown;
        }
        let window = &scores[scores.len().saturating_sub(TREND_WINDOW)..];
        let mean = window.iter().map(|&s| s as f64).sum::<f64>() / window.len() as f64;
        let delta = mean - window[0] as f64;
        if delta > TREND_THRESHOLD {
            ScoreTrend::Improving
        } else if delta < -TREND_THRESHOLD {
            ScoreTrend::Declining
        } else {
            ScoreTrend::Stable
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScoreTrend::Improving => "improving",
            ScoreTrend::Declining => "declining",
            ScoreTrend::Stable => "stable",
            ScoreTrend::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringCategory {
    pub category: String,
    /// Distinct assessments that flagged this category
    pub assessments: usize,
}

/// What the agent is told about a patient's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentContext {
    pub patient_id: String,
    pub total_assessments: usize,
    /// Most recent last
    pub recent_assessments: Vec<AssessmentRecord>,
    pub score_trend: ScoreTrend,
    pub recurring_risk_categories: Vec<RecurringCategory>,
}

impl AssessmentContext {
    /// Render as prompt text.
    pub fn summary_text(&self) -> String {
        if self.total_assessments == 0 {
            return format!("No prior assessments for patient {}.", self.patient_id);
        }
        let scores: Vec<String> = self
            .recent_assessments
            .iter()
            .map(|r| format!("{} ({})", r.score, r.assessment_date.format("%Y-%m-%d")))
            .collect();
        let mut text = format!(
            "Patient {} has {} prior assessment(s). Recent scores: {}. Trend: {}.",
            self.patient_id,
            self.total_assessments,
            scores.join(", "),
            self.score_trend.as_str()
        );
        if !self.recurring_risk_categories.is_empty() {
            let recurring: Vec<String> = self
                .recurring_risk_categories
                .iter()
                .map(|c| format!("{} (x{})", c.category, c.assessments))
                .collect();
            text.push_str(&format!(" Recurring risks: {}.", recurring.join(", ")));
        }
        text
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LongTermState {
    patient_assessments: BTreeMap<String, Vec<AssessmentRecord>>,
    risk_patterns: Vec<RiskPattern>,
}

/// Process-wide assessment history. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct LongTermMemory {
    state: Arc<RwLock<LongTermState>>,
}

impl LongTermMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an assessment and return its index in the patient's history.
    pub async fn store_assessment(
        &self,
        patient_id: &str,
        analysis: &DischargeAnalysis,
        model_id: &str,
    ) -> usize {
        self.store_assessment_at(patient_id, analysis, model_id, Utc::now())
            .await
    }

    pub async fn store_assessment_at(
        &self,
        patient_id: &str,
        analysis: &DischargeAnalysis,
        model_id: &str,
        at: DateTime<Utc>,
    ) -> usize {
        let record = AssessmentRecord::from_analysis(patient_id, analysis, model_id, at);
        let categories = analysis.high_severity_categories();

        // Append and pattern update happen under one write lock, so
        // concurrent stores never lose each other's records.
        let mut state = self.state.write().await;
        let history = state
            .patient_assessments
            .entry(patient_id.to_string())
            .or_default();
        history.push(record);
        let index = history.len() - 1;

        if categories.len() >= 2 {
            match state.risk_patterns.iter_mut().find(|p| p.pattern == categories) {
                Some(existing) => {
                    existing.frequency += 1;
                    existing.last_seen = at;
                }
                None => state.risk_patterns.push(RiskPattern {
                    pattern: categories,
                    frequency: 1,
                    last_seen: at,
                }),
            }
        }

        debug!(patient_id, index, score = analysis.score, "Stored assessment");
        index
    }

    pub async fn get_assessment_context(&self, patient_id: &str) -> AssessmentContext {
        let state = self.state.read().await;
        let history: &[AssessmentRecord] = state
            .patient_assessments
            .get(patient_id)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let scores: Vec<u8> = history.iter().map(|r| r.score).collect();
        let recent = history[history.len().saturating_sub(CONTEXT_WINDOW)..].to_vec();

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for record in history {
            let mut seen: Vec<&str> = record
                .risk_factor_summaries
                .iter()
                .map(|f| f.category.as_str())
                .collect();
            seen.sort_unstable();
            seen.dedup();
            for category in seen {
                *counts.entry(category).or_default() += 1;
            }
        }
        let mut recurring: Vec<RecurringCategory> = counts
            .into_iter()
            .filter(|(_, n)| *n >= 2)
            .map(|(category, assessments)| RecurringCategory {
                category: category.to_string(),
                assessments,
            })
            .collect();
        recurring.sort_by(|a, b| {
            b.assessments
                .cmp(&a.assessments)
                .then_with(|| a.category.cmp(&b.category))
        });
        recurring.truncate(MAX_RECURRING);

        AssessmentContext {
            patient_id: patient_id.to_string(),
            total_assessments: history.len(),
            recent_assessments: recent,
            score_trend: ScoreTrend::classify(&scores),
            recurring_risk_categories: recurring,
        }
    }

    /// Full history for a patient, oldest first.
    pub async fn history(&self, patient_id: &str) -> Vec<AssessmentRecord> {
        self.state
            .read()
            .await
            .patient_assessments
            .get(patient_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The `n` most frequent risk patterns.
    pub async fn top_risk_patterns(&self, n: usize) -> Vec<RiskPattern> {
        let mut patterns = self.state.read().await.risk_patterns.clone();
        patterns.sort_by(|a, b| {
            b.frequency
                .cmp(&a.frequency)
                .then_with(|| a.pattern.cmp(&b.pattern))
        });
        patterns.truncate(n);
        patterns
    }

    pub async fn patient_count(&self) -> usize {
        self.state.read().await.patient_assessments.len()
    }

    /// Write the whole store as pretty JSON.
    pub async fn save_to(&self, path: &Path) -> Result<(), MemoryError> {
        let json = {
            let state = self.state.read().await;
            serde_json::to_string_pretty(&*state)
                .map_err(|e| MemoryError::Storage(format!("serialize: {e}")))?
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MemoryError::Storage(format!("{}: {e}", parent.display())))?;
        }
        tokio::fs::write(path, json)
            .await
            .map_err(|e| MemoryError::Storage(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "Saved long-term memory");
        Ok(())
    }

    /// Load a store previously written by [`save_to`](Self::save_to).
    /// A missing file yields an empty store.
    pub async fn load_from(path: &Path) -> Result<Self, MemoryError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No assessment history yet, starting empty");
                return Ok(Self::new());
            }
            Err(e) => return Err(MemoryError::Storage(format!("{}: {e}", path.display()))),
        };
        let state: LongTermState = serde_json::from_str(&content)
            .map_err(|e| MemoryError::Storage(format!("{}: {e}", path.display())))?;
        info!(
            path = %path.display(),
            patients = state.patient_assessments.len(),
            "Loaded long-term memory"
        );
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carepilot_core::{DischargeStatus, RiskFactor, Severity};

    fn analysis(score: u8, factors: &[(&str, Severity)]) -> DischargeAnalysis {
        DischargeAnalysis {
            score,
            status: DischargeStatus::from_score(score),
            risk_factors: factors
                .iter()
                .map(|(category, severity)| RiskFactor {
                    category: category.to_string(),
                    title: format!("{category} risk"),
                    severity: *severity,
                    description: String::new(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn improving_trend_after_three_rising_scores() {
        let memory = LongTermMemory::new();
        for score in [30, 50, 75] {
            memory.store_assessment("P", &analysis(score, &[]), "gpt-4o").await;
        }
        let context = memory.get_assessment_context("P").await;
        assert_eq!(context.score_trend, ScoreTrend::Improving);
        assert_eq!(context.total_assessments, 3);
    }

    #[test]
    fn trend_classification_edges() {
        assert_eq!(ScoreTrend::classify(&[]), ScoreTrend::Unknown);
        assert_eq!(ScoreTrend::classify(&[50]), ScoreTrend::Unknown);
        // two scores: mean(40, 70) - 40 = 15
        assert_eq!(ScoreTrend::classify(&[40, 70]), ScoreTrend::Improving);
        assert_eq!(ScoreTrend::classify(&[80, 60, 40]), ScoreTrend::Declining);
        // only the last three count: mean(60, 62, 64) - 60 = 2
        assert_eq!(ScoreTrend::classify(&[10, 60, 62, 64]), ScoreTrend::Stable);
    }

    #[tokio::test]
    async fn context_keeps_last_five() {
        let memory = LongTermMemory::new();
        for score in 0..8u8 {
            memory.store_assessment("P", &analysis(score * 10, &[]), "m").await;
        }
        let context = memory.get_assessment_context("P").await;
        assert_eq!(context.recent_assessments.len(), 5);
        assert_eq!(context.recent_assessments[0].score, 30);
        assert_eq!(context.recent_assessments[4].score, 70);
    }

    #[tokio::test]
    async fn context_is_idempotent() {
        let memory = LongTermMemory::new();
        memory
            .store_assessment("P", &analysis(40, &[("falls", Severity::High)]), "m")
            .await;
        memory
            .store_assessment("P", &analysis(45, &[("falls", Severity::Low)]), "m")
            .await;
        let first = memory.get_assessment_context("P").await;
        let second = memory.get_assessment_context("P").await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn recurring_categories_ranked_and_capped() {
        let memory = LongTermMemory::new();
        let sets: [&[(&str, Severity)]; 3] = [
            &[("a", Severity::Low), ("b", Severity::Low), ("c", Severity::Low), ("a", Severity::High)],
            &[("a", Severity::Low), ("b", Severity::Low), ("d", Severity::Low), ("e", Severity::Low), ("f", Severity::Low), ("g", Severity::Low)],
            &[("a", Severity::Low), ("c", Severity::Low), ("d", Severity::Low), ("e", Severity::Low), ("f", Severity::Low), ("g", Severity::Low)],
        ];
        for set in sets {
            memory.store_assessment("P", &analysis(50, set), "m").await;
        }
        let recurring = memory.get_assessment_context("P").await.recurring_risk_categories;
        assert_eq!(recurring.len(), 5);
        // "a" counted once per assessment despite appearing twice in the first
        assert_eq!(recurring[0], RecurringCategory { category: "a".into(), assessments: 3 });
        let names: Vec<&str> = recurring.iter().map(|c| c.category.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn risk_patterns_dedupe_by_sorted_key() {
        let memory = LongTermMemory::new();
        memory
            .store_assessment("P1", &analysis(40, &[("renal", Severity::High), ("cardiac", Severity::Critical)]), "m")
            .await;
        memory
            .store_assessment("P2", &analysis(35, &[("cardiac", Severity::High), ("renal", Severity::High), ("social", Severity::Low)]), "m")
            .await;
        // single high-severity category: no pattern
        memory
            .store_assessment("P3", &analysis(60, &[("cardiac", Severity::High)]), "m")
            .await;

        let patterns = memory.top_risk_patterns(10).await;
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].pattern, vec!["cardiac".to_string(), "renal".to_string()]);
        assert_eq!(patterns[0].frequency, 2);
    }

    #[tokio::test]
    async fn concurrent_appends_lose_nothing() {
        let memory = LongTermMemory::new();
        let mut handles = Vec::new();
        for i in 0..20u8 {
            let memory = memory.clone();
            handles.push(tokio::spawn(async move {
                memory.store_assessment("P", &analysis(i, &[]), "m").await
            }));
        }
        let mut indices = Vec::new();
        for handle in handles {
            indices.push(handle.await.unwrap());
        }
        indices.sort_unstable();
        assert_eq!(indices, (0..20).collect::<Vec<_>>());
        assert_eq!(memory.history("P").await.len(), 20);
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history").join("assessments.json");

        let memory = LongTermMemory::new();
        memory
            .store_assessment("P", &analysis(55, &[("renal", Severity::High), ("falls", Severity::High)]), "m")
            .await;
        memory.save_to(&path).await.unwrap();

        let loaded = LongTermMemory::load_from(&path).await.unwrap();
        assert_eq!(loaded.history("P").await, memory.history("P").await);
        assert_eq!(loaded.top_risk_patterns(1).await[0].frequency, 1);
    }

    #[tokio::test]
    async fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = LongTermMemory::load_from(&dir.path().join("none.json")).await.unwrap();
        assert_eq!(loaded.patient_count().await, 0);
    }

    #[tokio::test]
    async fn summary_text_mentions_trend() {
        let memory = LongTermMemory::new();
        assert!(memory.get_assessment_context("P").await.summary_text().contains("No prior"));
        memory.store_assessment("P", &analysis(80, &[]), "m").await;
        memory.store_assessment("P", &analysis(40, &[]), "m").await;
        let text = memory.get_assessment_context("P").await.summary_text();
        assert!(text.contains("Trend: declining"));
    }
}
