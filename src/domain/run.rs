//! Workflow run state.
//!
//! A `WorkflowRun` is one end-to-end execution of the pipeline for a single
//! document. Status transitions are monotonic: a terminal run never leaves
//! its terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One pipeline execution instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: Uuid,

    /// Trigger that started this run (e.g. "document_received")
    pub trigger_name: String,

    pub tenant_id: String,

    pub document_id: String,

    /// Names of the steps that completed, in execution order
    pub executed_steps: Vec<String>,

    pub status: RunStatus,

    pub started_at: DateTime<Utc>,

    pub ended_at: Option<DateTime<Utc>>,

    /// Stable error code and summary for failed runs
    pub error: Option<RunError>,
}

/// Status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Stable failure code plus human-readable summary. Raw internal detail is
/// never carried here; it lives in the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub code: String,
    pub message: String,
}

impl WorkflowRun {
    /// Create a pending run for a trigger
    pub fn new(
        run_id: Uuid,
        trigger_name: impl Into<String>,
        tenant_id: impl Into<String>,
        document_id: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            trigger_name: trigger_name.into(),
            tenant_id: tenant_id.into(),
            document_id: document_id.into(),
            executed_steps: Vec::new(),
            status: RunStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
        }
    }

    /// Transition pending -> running. No-op if already terminal.
    pub fn start(&mut self) {
        if self.status == RunStatus::Pending {
            self.status = RunStatus::Running;
            self.started_at = Utc::now();
        }
    }

    /// Transition running -> completed. No-op if already terminal.
    pub fn complete(&mut self) {
        if !self.is_terminal() {
            self.status = RunStatus::Completed;
            self.ended_at = Some(Utc::now());
        }
    }

    /// Transition to failed with a stable code. No-op if already terminal.
    pub fn fail(&mut self, code: impl Into<String>, message: impl Into<String>) {
        if !self.is_terminal() {
            self.status = RunStatus::Failed;
            self.ended_at = Some(Utc::now());
            self.error = Some(RunError {
                code: code.into(),
                message: message.into(),
            });
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RunStatus::Completed | RunStatus::Failed)
    }
}
