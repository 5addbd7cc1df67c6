//! Pipeline core: registry, run context, audit store and the executor.

pub mod audit_store;
pub mod context;
pub mod executor;
pub mod registry;

pub use audit_store::{AuditFilter, AuditStore};
pub use context::{ContextView, MergeOutcome, RunContext, SEED_KEYS};
pub use executor::Engine;
pub use registry::{
    standard_registry, RetryPolicy, StepDescriptor, StepKind, StepRegistry,
    TRIGGER_DOCUMENT_RECEIVED,
};
