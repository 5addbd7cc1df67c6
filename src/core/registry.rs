//! Step registry: the static catalogue of step kinds and workflows.
//!
//! Populated once at process start and read-only afterwards. Steps are a
//! closed set of tagged variants dispatched by the executor; there is no
//! runtime string-based dispatch into arbitrary code.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::context::SEED_KEYS;
use crate::error::RegistryError;

/// Trigger fired when a scanned document arrives
pub const TRIGGER_DOCUMENT_RECEIVED: &str = "document_received";

/// The closed set of step kinds the executor knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// OCR text extraction from the document file
    ExtractText,

    /// Model call producing a raw accounting suggestion
    InferSuggestion,

    /// Rule validation plus confidence scoring
    ScoreSuggestion,

    /// Persist the final suggestion record
    PersistSuggestion,
}

/// Static configuration for one step. Immutable after registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDescriptor {
    /// Step name (unique within the registry)
    pub name: String,

    pub kind: StepKind,

    /// Context keys this step is allowed to read
    pub required_input_keys: Vec<String>,

    /// Context keys this step is allowed to write
    pub produced_output_keys: Vec<String>,

    /// Keys this step may overwrite even if an earlier step owns them
    #[serde(default)]
    pub overwritable_keys: Vec<String>,

    /// True if the step calls a third-party service (extra audit wrapping)
    #[serde(default)]
    pub is_external: bool,

    /// Whether transient failures are retried
    #[serde(default)]
    pub retryable: bool,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Override for the engine-wide per-step timeout
    pub timeout_seconds: Option<u64>,

    /// Record full payloads in external-call audit records instead of
    /// digests (compliance opt-in)
    #[serde(default)]
    pub capture_full_payload: bool,
}

impl StepDescriptor {
    pub fn new(
        name: impl Into<String>,
        kind: StepKind,
        required_input_keys: &[&str],
        produced_output_keys: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            required_input_keys: required_input_keys.iter().map(|k| k.to_string()).collect(),
            produced_output_keys: produced_output_keys.iter().map(|k| k.to_string()).collect(),
            overwritable_keys: Vec::new(),
            is_external: false,
            retryable: false,
            retry: RetryPolicy::default(),
            timeout_seconds: None,
            capture_full_payload: false,
        }
    }

    pub fn external(mut self) -> Self {
        self.is_external = true;
        self
    }

    pub fn retryable(mut self, retry: RetryPolicy) -> Self {
        self.retryable = true;
        self.retry = retry;
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Effective timeout given the engine default
    pub fn timeout(&self, default_seconds: u64) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(default_seconds))
    }

    pub fn reads(&self, key: &str) -> bool {
        self.required_input_keys.iter().any(|k| k == key)
    }

    pub fn produces(&self, key: &str) -> bool {
        self.produced_output_keys.iter().any(|k| k == key)
    }

    pub fn may_overwrite(&self, key: &str) -> bool {
        self.overwritable_keys.iter().any(|k| k == key)
    }
}

/// Retry policy for transient step failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    500
}
fn default_max_delay() -> u64 {
    15000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following the given attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Read-only catalogue of steps and trigger workflows
#[derive(Debug, Default)]
pub struct StepRegistry {
    steps: HashMap<String, Arc<StepDescriptor>>,
    workflows: HashMap<String, Vec<String>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step descriptor. Fails on a name collision.
    pub fn register(&mut self, descriptor: StepDescriptor) -> Result<(), RegistryError> {
        if self.steps.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateStep(descriptor.name));
        }
        self.steps
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    /// Register an ordered workflow for a trigger.
    ///
    /// Validates the wiring at registration time: every named step must
    /// exist, and every step's required inputs must be satisfiable from the
    /// seed keys plus the outputs of earlier steps. Broken wiring is a
    /// configuration error and never reaches a run.
    pub fn register_workflow(
        &mut self,
        trigger: impl Into<String>,
        step_names: &[&str],
    ) -> Result<(), RegistryError> {
        let trigger = trigger.into();
        let mut available: HashSet<&str> = SEED_KEYS.iter().copied().collect();

        for name in step_names {
            let step = self
                .steps
                .get(*name)
                .ok_or_else(|| RegistryError::UnknownStep {
                    trigger: trigger.clone(),
                    step: name.to_string(),
                })?;

            for key in &step.required_input_keys {
                if !available.contains(key.as_str()) {
                    return Err(RegistryError::UnsatisfiedInput {
                        trigger: trigger.clone(),
                        step: name.to_string(),
                        key: key.clone(),
                    });
                }
            }

            for key in &step.produced_output_keys {
                available.insert(key.as_str());
            }
        }

        self.workflows
            .insert(trigger, step_names.iter().map(|s| s.to_string()).collect());
        Ok(())
    }

    /// Resolve the ordered step list for a trigger
    pub fn resolve(&self, trigger: &str) -> Result<Vec<Arc<StepDescriptor>>, RegistryError> {
        let names = self
            .workflows
            .get(trigger)
            .ok_or_else(|| RegistryError::UnknownTrigger(trigger.to_string()))?;

        // Workflow registration guarantees the lookups succeed
        Ok(names
            .iter()
            .filter_map(|n| self.steps.get(n).cloned())
            .collect())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<StepDescriptor>> {
        self.steps.get(name)
    }
}

/// Build the standard registry: OCR -> inference -> scoring -> persistence
/// wired for the `document_received` trigger. The configured retry policy
/// applies to the retryable external steps.
pub fn standard_registry(retry: &RetryPolicy) -> Result<StepRegistry, RegistryError> {
    let mut registry = StepRegistry::new();

    registry.register(StepDescriptor::new(
        "extract_text",
        StepKind::ExtractText,
        &["document_id", "file_path", "mime_type"],
        &["ocr_text"],
    ))?;

    registry.register(
        StepDescriptor::new(
            "infer_suggestion",
            StepKind::InferSuggestion,
            &["ocr_text", "document_id"],
            &["inference"],
        )
        .external()
        .retryable(retry.clone()),
    )?;

    registry.register(StepDescriptor::new(
        "score_suggestion",
        StepKind::ScoreSuggestion,
        &["inference"],
        &["confidence_score", "risk_level", "validation", "notes"],
    ))?;

    registry.register(StepDescriptor::new(
        "persist_suggestion",
        StepKind::PersistSuggestion,
        &[
            "document_id",
            "inference",
            "confidence_score",
            "risk_level",
            "notes",
        ],
        &["suggestion_id"],
    ))?;

    registry.register_workflow(
        TRIGGER_DOCUMENT_RECEIVED,
        &[
            "extract_text",
            "infer_suggestion",
            "score_suggestion",
            "persist_suggestion",
        ],
    )?;

    Ok(registry)
}
