//! Confidence scoring for accounting suggestions.
//!
//! Combines the model's raw confidence with the rule verdict into a final
//! score and risk tier. Pure and deterministic: identical inputs always
//! produce identical outputs, which keeps audits reproducible.

use serde::{Deserialize, Serialize};

use crate::domain::RiskLevel;
use crate::rules::ValidationResult;

/// Scoring constants. The penalty factor and tier thresholds are
/// configuration, not domain truth; tune against historical suggestions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringPolicy {
    /// Multiplier applied once per violation (compounds multiplicatively)
    #[serde(default = "default_violation_penalty")]
    pub violation_penalty: f64,

    /// Final score at or above this is low risk
    #[serde(default = "default_low_threshold")]
    pub low_threshold: f64,

    /// Final score at or above this (but below low) is medium risk
    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: f64,
}

fn default_violation_penalty() -> f64 {
    0.5
}
fn default_low_threshold() -> f64 {
    0.70
}
fn default_medium_threshold() -> f64 {
    0.45
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            violation_penalty: default_violation_penalty(),
            low_threshold: default_low_threshold(),
            medium_threshold: default_medium_threshold(),
        }
    }
}

/// Final score and risk tier for one suggestion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub final_score: f64,
    pub risk_level: RiskLevel,
}

/// Combine raw model confidence with the rule verdict.
///
/// Each violation multiplies the confidence by the penalty factor, so
/// repeated problems degrade the score super-linearly. Any account-number
/// violation forces at least medium risk regardless of the score.
pub fn score(raw_confidence: f64, validation: &ValidationResult, policy: &ScoringPolicy) -> Score {
    let mut confidence = raw_confidence.clamp(0.0, 1.0);

    for _ in &validation.violations {
        confidence *= policy.violation_penalty;
    }

    let final_score = round2(confidence.clamp(0.0, 1.0));

    let tier = if final_score >= policy.low_threshold {
        RiskLevel::Low
    } else if final_score >= policy.medium_threshold {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    };

    // Hard override: a suspect account number is never low risk
    let risk_level = if validation.has_account_violation() {
        tier.max(RiskLevel::Medium)
    } else {
        tier
    };

    Score {
        final_score,
        risk_level,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
