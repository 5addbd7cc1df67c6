//! Audit records for the compliance trail.
//!
//! Every pipeline action is recorded as an immutable entry in an append-only
//! log. Records carry key *names* and payload digests, never raw document or
//! model content, unless a step explicitly flags full capture.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// One immutable entry in the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique identifier for this record
    pub id: Uuid,

    /// The run this record belongs to (None for non-pipeline actions)
    pub run_id: Option<Uuid>,

    /// Acting user, if the action was human-initiated
    pub actor_user_id: Option<String>,

    /// What happened
    pub action: AuditAction,

    /// Step name (if applicable)
    pub step_name: Option<String>,

    /// Names of the context keys the step read (never values)
    #[serde(default)]
    pub input_key_names: Vec<String>,

    /// Names of the context keys the step wrote
    #[serde(default)]
    pub output_key_names: Vec<String>,

    /// Output keys the step proposed but was not allowed to write
    #[serde(default)]
    pub dropped_key_names: Vec<String>,

    pub success: bool,

    /// Time taken in milliseconds (for terminal records)
    pub duration_ms: Option<u64>,

    /// Short digest of the payload, not full content
    pub summary: String,

    /// Error message if the action failed
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Create a new record with the current timestamp
    pub fn new(run_id: Option<Uuid>, action: AuditAction, summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            actor_user_id: None,
            action,
            step_name: None,
            input_key_names: Vec::new(),
            output_key_names: Vec::new(),
            dropped_key_names: Vec::new(),
            success: true,
            duration_ms: None,
            summary: summary.into(),
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_step(mut self, step_name: impl Into<String>) -> Self {
        self.step_name = Some(step_name.into());
        self
    }

    pub fn with_actor(mut self, actor_user_id: impl Into<String>) -> Self {
        self.actor_user_id = Some(actor_user_id.into());
        self
    }

    pub fn with_input_keys(mut self, keys: Vec<String>) -> Self {
        self.input_key_names = keys;
        self
    }

    pub fn with_output_keys(mut self, keys: Vec<String>) -> Self {
        self.output_key_names = keys;
        self
    }

    pub fn with_dropped_keys(mut self, keys: Vec<String>) -> Self {
        self.dropped_key_names = keys;
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Mark the record as failed with an error message
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Actions recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A pipeline step began executing
    StepStart,

    /// A pipeline step finished (successfully or not)
    StepEnd,

    /// An outbound call to a third-party service began
    ExternalCallStart,

    /// An outbound call returned (successfully or not)
    ExternalCallEnd,

    /// A human reviewer approved or rejected a suggestion
    Decision,
}

/// Digest of a payload for audit summaries: sha256 prefix plus length.
///
/// Keeps the trail verifiable without copying tenant data into it.
pub fn payload_digest(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    let digest = hasher.finalize();
    format!("sha256:{} len={}", hex::encode(&digest[..8]), payload.len())
}
