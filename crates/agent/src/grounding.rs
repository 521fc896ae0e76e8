//! Post-answer grounding checks.
//!
//! Verifies that claims in a final answer can be traced to what the tools
//! actually returned. The report is informational: it is attached to the
//! response and never blocks or alters the answer.
//!
//! - **Fast**: regex extraction of numeric claims with a unit (doses,
//!   percentages, durations, clock times), each looked up verbatim in the
//!   observations.
//! - **Thorough**: the model lists the answer's claims and classifies each
//!   against the observations. Falls back to fast mode if the call fails
//!   or its reply cannot be parsed.

use carepilot_config::GroundingMode;
use carepilot_core::provider::{Provider, ProviderRequest, Usage};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::parser::{extract_object, value_to_text};

static NUMERIC_CLAIM: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b\d+(?:\.\d+)?\s*(?:%|percent\b|mcg\b|mg\b|g\b|ml\b|units?\b|iu\b|mmhg\b|bpm\b|hours?\b|hrs?\b|days?\b|weeks?\b|minutes?\b|mins?\b)|\b\d{1,2}:\d{2}\b",
    )
    .ok()
});

/// Per-observation cap on text sent to the model in thorough mode.
const MAX_OBSERVATION_CHARS: usize = 2_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimCheck {
    pub claim: String,
    pub grounded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingReport {
    /// The mode that produced the checks.
    pub mode: GroundingMode,
    pub claims: Vec<ClaimCheck>,
    /// Share of claims that were grounded; 1.0 when there are none.
    pub grounded_ratio: f64,
    /// Thorough mode was requested but fast mode produced this report.
    #[serde(default)]
    pub fell_back: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl GroundingReport {
    fn new(mode: GroundingMode, claims: Vec<ClaimCheck>) -> Self {
        let grounded = claims.iter().filter(|c| c.grounded).count();
        let grounded_ratio = if claims.is_empty() {
            1.0
        } else {
            grounded as f64 / claims.len() as f64
        };
        Self {
            mode,
            claims,
            grounded_ratio,
            fell_back: false,
            usage: None,
        }
    }

    pub fn is_fully_grounded(&self) -> bool {
        self.claims.iter().all(|c| c.grounded)
    }

    pub fn ungrounded(&self) -> impl Iterator<Item = &ClaimCheck> {
        self.claims.iter().filter(|c| !c.grounded)
    }
}

pub struct GroundingVerifier {
    mode: GroundingMode,
    provider: Option<Arc<dyn Provider>>,
    model: String,
}

impl GroundingVerifier {
    pub fn fast() -> Self {
        Self {
            mode: GroundingMode::Fast,
            provider: None,
            model: String::new(),
        }
    }

    pub fn thorough(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            mode: GroundingMode::Thorough,
            provider: Some(provider),
            model: model.into(),
        }
    }

    pub fn mode(&self) -> GroundingMode {
        self.mode
    }

    /// Check `answer` against `observations`. Never fails.
    pub async fn verify(
        &self,
        answer: &str,
        observations: &[String],
        cancel: &CancellationToken,
    ) -> GroundingReport {
        match (self.mode, &self.provider) {
            (GroundingMode::Thorough, Some(provider)) => {
                match self.verify_with_model(provider.as_ref(), answer, observations, cancel).await {
                    Some(report) => report,
                    None => {
                        let mut report = check_numeric_claims(answer, observations);
                        report.fell_back = true;
                        report
                    }
                }
            }
            _ => check_numeric_claims(answer, observations),
        }
    }

    async fn verify_with_model(
        &self,
        provider: &dyn Provider,
        answer: &str,
        observations: &[String],
        cancel: &CancellationToken,
    ) -> Option<GroundingReport> {
        let request = ProviderRequest::new(&self.model, thorough_prompt(answer, observations))
            .with_system_prompt(
                "You verify clinical answers against source data. Reply with JSON only.",
            )
            .with_metadata("purpose", "grounding");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Grounding check cancelled, using fast mode");
                return None;
            }
            response = provider.generate(request) => response,
        };
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Grounding model call failed, using fast mode");
                return None;
            }
        };

        let claims = match parse_claims(&response.content) {
            Some(claims) => claims,
            None => {
                warn!("Grounding reply unparseable, using fast mode");
                return None;
            }
        };
        let mut report = GroundingReport::new(GroundingMode::Thorough, claims);
        report.usage = response.usage;
        Some(report)
    }
}

/// Fast heuristic: numeric claims not present verbatim in any observation.
pub fn check_numeric_claims(answer: &str, observations: &[String]) -> GroundingReport {
    let normalized: Vec<String> = observations.iter().map(|o| normalize(o)).collect();
    let claims = numeric_claims(answer)
        .into_iter()
        .map(|claim| {
            let needle = normalize(&claim);
            let evidence = normalized
                .iter()
                .position(|haystack| contains_number(haystack, &needle))
                .map(|i| format!("observation {}", i + 1));
            ClaimCheck {
                claim,
                grounded: evidence.is_some(),
                evidence,
            }
        })
        .collect();
    GroundingReport::new(GroundingMode::Fast, claims)
}

/// Distinct numeric claims in `text`, in order of appearance.
pub fn numeric_claims(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    let Some(pattern) = NUMERIC_CLAIM.as_ref() else {
        return seen;
    };
    for m in pattern.find_iter(text) {
        let claim = m.as_str().trim().to_string();
        if !seen.contains(&claim) {
            seen.push(claim);
        }
    }
    seen
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Substring match that refuses to land inside a longer number
/// ("5mg" must not match inside "15mg").
fn contains_number(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(i, _)| {
        !haystack[..i]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_digit() || c == '.')
    })
}

fn thorough_prompt(answer: &str, observations: &[String]) -> String {
    let mut prompt = String::from(
        "List every factual claim in the ANSWER and decide whether the OBSERVATIONS support it.\n\
         Respond with {\"claims\": [{\"claim\": \"...\", \"grounded\": true|false, \"evidence\": \"...\"}]}\n\n",
    );
    prompt.push_str("ANSWER:\n");
    prompt.push_str(answer);
    prompt.push_str("\n\nOBSERVATIONS:\n");
    for (i, observation) in observations.iter().enumerate() {
        let clipped: String = observation.chars().take(MAX_OBSERVATION_CHARS).collect();
        prompt.push_str(&format!("[{}] {}\n", i + 1, clipped));
    }
    prompt
}

fn parse_claims(raw: &str) -> Option<Vec<ClaimCheck>> {
    let object = extract_object(raw).ok()?;
    let claims = object.get("claims")?.as_array()?;
    Some(
        claims
            .iter()
            .filter_map(|c| {
                let claim = c.get("claim").map(value_to_text)?;
                let grounded = c.get("grounded").and_then(|g| g.as_bool()).unwrap_or(false);
                let evidence = c
                    .get("evidence")
                    .map(value_to_text)
                    .filter(|e| !e.is_empty());
                Some(ClaimCheck {
                    claim,
                    grounded,
                    evidence,
                })
            })
            .collect(),
    )
}
