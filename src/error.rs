//! Error taxonomy for the pipeline core.
//!
//! Three families, handled differently:
//! - registration errors are fatal at startup and never occur mid-run
//! - contract violations abort the run immediately (step wiring bugs)
//! - transient failures are retried per step policy, then fail the run
//!
//! Domain problems (malformed model output, rule violations) are never
//! errors; they flow into scoring as `ValidationResult` data.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised while populating the step registry. These indicate broken
/// configuration and are only possible at process start.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("step '{0}' is already registered")]
    DuplicateStep(String),

    #[error("no workflow configured for trigger '{0}'")]
    UnknownTrigger(String),

    #[error("workflow '{trigger}' references unknown step '{step}'")]
    UnknownStep { trigger: String, step: String },

    #[error(
        "step '{step}' in workflow '{trigger}' requires key '{key}' that \
         neither the seed context nor any earlier step provides"
    )]
    UnsatisfiedInput {
        trigger: String,
        step: String,
        key: String,
    },
}

/// Contract violations at the context access layer.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("step '{step}' requested undeclared key '{key}'")]
    UndeclaredKey { step: String, key: String },

    #[error("step '{step}' is missing required input key '{key}'")]
    MissingInput { step: String, key: String },

    #[error("seed context is missing required key '{key}'")]
    MissingSeedKey { key: String },

    #[error("key '{key}' was written by step '{owner}' and is not overwritable")]
    ImmutableKey { key: String, owner: String },
}

/// Public error surface of the engine. Callers get a stable code and a
/// human-readable message; raw internal detail stays in the audit trail.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("suggestion {0} not found")]
    SuggestionNotFound(Uuid),

    #[error("suggestion {0} has already been decided")]
    AlreadyDecided(Uuid),

    #[error("audit trail write failed: {0}")]
    Audit(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl PipelineError {
    /// Stable machine-readable code for API callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Registry(RegistryError::DuplicateStep(_)) => "duplicate_step",
            Self::Registry(RegistryError::UnknownTrigger(_)) => "unknown_trigger",
            Self::Registry(RegistryError::UnknownStep { .. }) => "unknown_step",
            Self::Registry(RegistryError::UnsatisfiedInput { .. }) => "unsatisfied_input",
            Self::Context(ContextError::UndeclaredKey { .. }) => "undeclared_key",
            Self::Context(ContextError::MissingInput { .. }) => "missing_input",
            Self::Context(ContextError::MissingSeedKey { .. }) => "missing_seed_key",
            Self::Context(ContextError::ImmutableKey { .. }) => "immutable_key",
            Self::RunNotFound(_) => "run_not_found",
            Self::SuggestionNotFound(_) => "suggestion_not_found",
            Self::AlreadyDecided(_) => "already_decided",
            Self::Audit(_) => "audit_append_failed",
            Self::Storage(_) => "storage_failed",
        }
    }
}
