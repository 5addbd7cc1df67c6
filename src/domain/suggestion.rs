//! Accounting suggestions produced by the pipeline.
//!
//! A suggestion is created exactly once per run by the terminal persistence
//! step. The pipeline never touches it again; the approval fields change
//! exactly once, by a human reviewer action outside the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A human-reviewable accounting suggestion for one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: Uuid,

    /// The run that produced this suggestion
    pub run_id: Uuid,

    pub document_id: String,

    /// Suggested ledger account (Norwegian chart of accounts, 4 digits)
    pub account_number: Option<String>,

    /// Suggested VAT code
    pub vat_code: Option<String>,

    /// Final confidence after rule penalties, in [0, 1]
    pub confidence_score: f64,

    pub risk_level: RiskLevel,

    /// Model reasoning, shown to the reviewer
    pub notes: String,

    pub approval_status: ApprovalStatus,

    pub decided_by: Option<String>,

    pub decided_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl Suggestion {
    pub fn new(
        run_id: Uuid,
        document_id: impl Into<String>,
        account_number: Option<String>,
        vat_code: Option<String>,
        confidence_score: f64,
        risk_level: RiskLevel,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            document_id: document_id.into(),
            account_number,
            vat_code,
            confidence_score,
            risk_level,
            notes: notes.into(),
            approval_status: ApprovalStatus::Pending,
            decided_by: None,
            decided_at: None,
            created_at: Utc::now(),
        }
    }

    /// Apply a reviewer decision. Fails if the suggestion was already
    /// decided; approval is a one-shot transition.
    pub fn apply_decision(&mut self, approved: bool, actor: &str) -> Result<(), AlreadyDecided> {
        if self.approval_status != ApprovalStatus::Pending {
            return Err(AlreadyDecided(self.id));
        }
        self.approval_status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        self.decided_by = Some(actor.to_string());
        self.decided_at = Some(Utc::now());
        Ok(())
    }
}

/// Raised when a reviewer decision hits an already-decided suggestion
#[derive(Debug, thiserror::Error)]
#[error("suggestion {0} has already been decided")]
pub struct AlreadyDecided(pub Uuid);

/// Coarse risk tier derived from confidence and validation outcome.
///
/// Ordered so that `Low < Medium < High`; the scorer uses `max` to apply
/// hard overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

/// Reviewer verdict on a suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}
