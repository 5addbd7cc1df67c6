//! Run context: the scoped, access-controlled data carrier for one run.
//!
//! Steps never touch the context directly. The executor hands each step a
//! read view restricted to its declared input keys and merges back only its
//! declared output keys, so the access-control boundary is enforced here
//! rather than trusted to step discipline.

use std::collections::HashMap;

use serde_json::Value;
use uuid::Uuid;

use crate::core::registry::StepDescriptor;
use crate::error::ContextError;

/// Keys every trigger must provide when a run is created
pub const SEED_KEYS: &[&str] = &[
    "document_id",
    "file_path",
    "mime_type",
    "tenant_id",
    "user_id",
];

/// Owner label for keys written at trigger time
const SEED_OWNER: &str = "seed";

/// The mutable data carrier for one pipeline execution, scoped to a single
/// tenant, document and run. Discarded once the run completes; only the
/// suggestion record and the audit trail persist.
#[derive(Debug)]
pub struct RunContext {
    run_id: Uuid,
    tenant_id: String,
    document_id: String,
    values: HashMap<String, Value>,
    /// Which step wrote each key; a written key is immutable unless a later
    /// step explicitly declares it overwritable
    owners: HashMap<String, String>,
}

impl RunContext {
    /// Create a context from trigger seed data. Every seed key must be
    /// present.
    pub fn from_seed(run_id: Uuid, seed: HashMap<String, Value>) -> Result<Self, ContextError> {
        for key in SEED_KEYS {
            if !seed.contains_key(*key) {
                return Err(ContextError::MissingSeedKey {
                    key: key.to_string(),
                });
            }
        }

        let tenant_id = string_value(&seed, "tenant_id");
        let document_id = string_value(&seed, "document_id");

        let owners = seed
            .keys()
            .map(|k| (k.clone(), SEED_OWNER.to_string()))
            .collect();

        Ok(Self {
            run_id,
            tenant_id,
            document_id,
            values: seed,
            owners,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Build the restricted read view for a step
    pub fn view<'a>(&'a self, step: &'a StepDescriptor) -> ContextView<'a> {
        ContextView {
            step,
            values: &self.values,
        }
    }

    /// Names of the step's declared input keys that are actually present,
    /// for the step_start audit record.
    pub fn present_input_keys(&self, step: &StepDescriptor) -> Vec<String> {
        step.required_input_keys
            .iter()
            .filter(|k| self.values.contains_key(*k))
            .cloned()
            .collect()
    }

    /// Merge a step's proposed updates.
    ///
    /// Keys outside `produced_output_keys` are dropped, never merged, and
    /// returned so the executor can record the policy violation in the
    /// audit entry. Overwriting a key owned by an earlier step without an
    /// explicit overwritable declaration is a contract violation that
    /// aborts the run.
    pub fn apply_updates(
        &mut self,
        step: &StepDescriptor,
        updates: HashMap<String, Value>,
    ) -> Result<MergeOutcome, ContextError> {
        let mut outcome = MergeOutcome::default();

        for (key, value) in updates {
            if !step.produces(&key) {
                outcome.dropped_keys.push(key);
                continue;
            }

            if let Some(owner) = self.owners.get(&key) {
                if !step.may_overwrite(&key) {
                    return Err(ContextError::ImmutableKey {
                        key,
                        owner: owner.clone(),
                    });
                }
            }

            self.owners.insert(key.clone(), step.name.clone());
            self.values.insert(key.clone(), value);
            outcome.merged_keys.push(key);
        }

        outcome.dropped_keys.sort();
        outcome.merged_keys.sort();
        Ok(outcome)
    }
}

/// Result of merging one step's outputs
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Keys actually written to the context
    pub merged_keys: Vec<String>,

    /// Proposed keys outside the step's declared outputs (policy violations)
    pub dropped_keys: Vec<String>,
}

/// Read-only snapshot of the context restricted to one step's declared
/// input keys.
#[derive(Debug, Clone, Copy)]
pub struct ContextView<'a> {
    step: &'a StepDescriptor,
    values: &'a HashMap<String, Value>,
}

impl<'a> ContextView<'a> {
    /// Read a declared input key. Requesting a key outside the step's
    /// declaration fails regardless of whether the key exists.
    pub fn get(&self, key: &str) -> Result<&'a Value, ContextError> {
        if !self.step.reads(key) {
            return Err(ContextError::UndeclaredKey {
                step: self.step.name.clone(),
                key: key.to_string(),
            });
        }
        self.values.get(key).ok_or_else(|| ContextError::MissingInput {
            step: self.step.name.clone(),
            key: key.to_string(),
        })
    }

    /// Read a declared input key as a string
    pub fn get_str(&self, key: &str) -> Result<&'a str, ContextError> {
        let value = self.get(key)?;
        value.as_str().ok_or_else(|| ContextError::MissingInput {
            step: self.step.name.clone(),
            key: key.to_string(),
        })
    }

    /// Read a declared input key as a float
    pub fn get_f64(&self, key: &str) -> Result<f64, ContextError> {
        let value = self.get(key)?;
        value.as_f64().ok_or_else(|| ContextError::MissingInput {
            step: self.step.name.clone(),
            key: key.to_string(),
        })
    }
}

fn string_value(map: &HashMap<String, Value>, key: &str) -> String {
    match map.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}
