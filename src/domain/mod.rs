//! Domain data structures: audit records, workflow runs, suggestions.

pub mod audit;
pub mod run;
pub mod suggestion;

pub use audit::{payload_digest, AuditAction, AuditRecord};
pub use run::{RunError, RunStatus, WorkflowRun};
pub use suggestion::{AlreadyDecided, ApprovalStatus, RiskLevel, Suggestion};
