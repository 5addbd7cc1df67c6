//! Workflow executor for document-processing runs.
//!
//! Orchestrates the resolved step list against a run context, enforcing
//! key-level access control, per-step timeouts, retry policy, and the
//! mandatory audit trail around every step and every external call.
//!
//! State machine per run: pending -> running -> {completed | failed}.
//! A failing step never merges partial output, and no later step runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineSettings;
use crate::core::audit_store::{AuditFilter, AuditStore};
use crate::core::context::RunContext;
use crate::core::registry::{StepDescriptor, StepKind, StepRegistry};
use crate::domain::{
    payload_digest, AuditAction, AuditRecord, RiskLevel, Suggestion, WorkflowRun,
};
use crate::error::{ContextError, PipelineError};
use crate::rules;
use crate::scoring;
use crate::services::{
    FileRunStore, InferenceError, InferenceOutput, InferenceService, SuggestionStore,
    TextExtractor,
};

/// Failure of a single step attempt, classified for retry handling
#[derive(Debug)]
enum StepError {
    /// Step wiring bug; aborts the run, never retried
    Contract(ContextError),

    /// Transient failure; retried when the step allows it
    Transient(String),

    /// Attempt exceeded the step timeout; treated as transient
    Timeout,

    /// The audit trail itself could not be written; never retried
    Audit(String),
}

impl From<ContextError> for StepError {
    fn from(e: ContextError) -> Self {
        Self::Contract(e)
    }
}

impl StepError {
    fn code(&self) -> &'static str {
        match self {
            Self::Contract(ContextError::UndeclaredKey { .. }) => "undeclared_key",
            Self::Contract(ContextError::MissingInput { .. }) => "missing_input",
            Self::Contract(ContextError::MissingSeedKey { .. }) => "missing_seed_key",
            Self::Contract(ContextError::ImmutableKey { .. }) => "immutable_key",
            Self::Transient(_) => "step_failed",
            Self::Timeout => "step_timeout",
            Self::Audit(_) => "audit_append_failed",
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Contract(e) => e.to_string(),
            Self::Transient(msg) => msg.clone(),
            Self::Timeout => "step timed out".to_string(),
            Self::Audit(msg) => format!("audit trail write failed: {msg}"),
        }
    }

    fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout)
    }
}

/// The pipeline engine: one instance per process, cheap to clone.
///
/// All collaborators are injected explicitly; the audit store in particular
/// is never ambient global state, which keeps per-test stores isolated.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<StepRegistry>,
    audit: Arc<AuditStore>,
    runs: Arc<FileRunStore>,
    extractor: Arc<dyn TextExtractor>,
    inference: Arc<dyn InferenceService>,
    suggestions: Arc<dyn SuggestionStore>,
    settings: EngineSettings,
    cancel_flags: Arc<Mutex<HashMap<Uuid, Arc<AtomicBool>>>>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<StepRegistry>,
        audit: Arc<AuditStore>,
        runs: Arc<FileRunStore>,
        extractor: Arc<dyn TextExtractor>,
        inference: Arc<dyn InferenceService>,
        suggestions: Arc<dyn SuggestionStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            audit,
            runs,
            extractor,
            inference,
            suggestions,
            settings,
            cancel_flags: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a run for a trigger. Validates the trigger and seed context
    /// synchronously, then executes the workflow on its own task.
    #[instrument(skip(self, seed), fields(trigger = %trigger))]
    pub async fn start_run(
        &self,
        trigger: &str,
        seed: HashMap<String, Value>,
    ) -> Result<Uuid, PipelineError> {
        let steps = self.registry.resolve(trigger)?;

        let run_id = Uuid::new_v4();
        let ctx = RunContext::from_seed(run_id, seed)?;

        let run = WorkflowRun::new(run_id, trigger, ctx.tenant_id(), ctx.document_id());
        self.runs
            .save(&run)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel_flags
            .lock()
            .expect("cancel flag lock poisoned")
            .insert(run_id, cancel.clone());

        info!(%run_id, "Starting run");

        let engine = self.clone();
        tokio::spawn(async move {
            engine.execute_run(run, ctx, steps, cancel).await;
        });

        Ok(run_id)
    }

    /// Current status of a run
    pub async fn get_run_status(&self, run_id: Uuid) -> Result<WorkflowRun, PipelineError> {
        self.runs
            .load(run_id)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?
            .ok_or(PipelineError::RunNotFound(run_id))
    }

    /// Recent runs, most recently started first
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<WorkflowRun>, PipelineError> {
        self.runs
            .list(limit)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))
    }

    /// Read-only projection over the audit trail
    pub async fn list_audit_records(
        &self,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditRecord>, PipelineError> {
        self.audit
            .list(filter)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))
    }

    /// Request cooperative cancellation. The run stops before its next
    /// step; a step already executing is not interrupted.
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<(), PipelineError> {
        let flag = {
            let flags = self.cancel_flags.lock().expect("cancel flag lock poisoned");
            flags.get(&run_id).cloned()
        };

        if let Some(flag) = flag {
            flag.store(true, Ordering::SeqCst);
            return Ok(());
        }

        // Not active; a terminal run is a no-op, an unknown one an error
        self.get_run_status(run_id).await.map(|_| ())
    }

    /// Record a human reviewer decision on a suggestion. Outside the
    /// pipeline; approval fields change exactly once.
    pub async fn decide_suggestion(
        &self,
        suggestion_id: Uuid,
        approved: bool,
        actor: &str,
    ) -> Result<Suggestion, PipelineError> {
        let mut suggestion = self
            .suggestions
            .load(suggestion_id)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?
            .ok_or(PipelineError::SuggestionNotFound(suggestion_id))?;

        suggestion
            .apply_decision(approved, actor)
            .map_err(|_| PipelineError::AlreadyDecided(suggestion_id))?;

        self.suggestions
            .save(&suggestion)
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;

        let verdict = if approved { "approved" } else { "rejected" };
        let record = AuditRecord::new(
            Some(suggestion.run_id),
            AuditAction::Decision,
            format!("suggestion {suggestion_id} {verdict}"),
        )
        .with_actor(actor);
        self.audit
            .append(&record)
            .await
            .map_err(|e| PipelineError::Audit(e.to_string()))?;

        info!(%suggestion_id, verdict, "Suggestion decided");
        Ok(suggestion)
    }

    /// Execute the resolved step list for one run
    #[instrument(skip_all, fields(run_id = %run.run_id))]
    async fn execute_run(
        &self,
        mut run: WorkflowRun,
        mut ctx: RunContext,
        steps: Vec<Arc<StepDescriptor>>,
        cancel: Arc<AtomicBool>,
    ) {
        run.start();
        if let Err(e) = self.runs.save(&run).await {
            self.finish_failed(&mut run, "storage_failed", &e.to_string())
                .await;
            return;
        }

        for step in &steps {
            // Cooperative cancellation between steps only
            if cancel.load(Ordering::SeqCst) {
                self.finish_failed(
                    &mut run,
                    "cancelled",
                    &format!("run cancelled before step '{}'", step.name),
                )
                .await;
                return;
            }

            let input_keys = ctx.present_input_keys(step);
            let start_record = AuditRecord::new(
                Some(run.run_id),
                AuditAction::StepStart,
                format!("step '{}' starting", step.name),
            )
            .with_step(step.name.as_str())
            .with_input_keys(input_keys);

            if let Err(e) = self.audit.append(&start_record).await {
                self.finish_failed(&mut run, "audit_append_failed", &e.to_string())
                    .await;
                return;
            }

            let step_start = Instant::now();

            // Fail fast before invoking a step whose inputs are incomplete
            let precheck = step
                .required_input_keys
                .iter()
                .find(|key| !ctx.contains(key))
                .map(|key| {
                    StepError::Contract(ContextError::MissingInput {
                        step: step.name.clone(),
                        key: key.clone(),
                    })
                });

            let result = match precheck {
                Some(err) => Err(err),
                None => self.run_step_with_retry(step, &ctx, run.run_id).await,
            };

            let duration_ms = step_start.elapsed().as_millis() as u64;

            match result {
                Ok(updates) => match ctx.apply_updates(step, updates) {
                    Ok(outcome) => {
                        if !outcome.dropped_keys.is_empty() {
                            warn!(
                                step = %step.name,
                                dropped = ?outcome.dropped_keys,
                                "Step proposed undeclared output keys; dropped"
                            );
                        }

                        let end_record = AuditRecord::new(
                            Some(run.run_id),
                            AuditAction::StepEnd,
                            format!("step '{}' completed in {duration_ms}ms", step.name),
                        )
                        .with_step(step.name.as_str())
                        .with_output_keys(outcome.merged_keys)
                        .with_dropped_keys(outcome.dropped_keys)
                        .with_duration(duration_ms);

                        if let Err(e) = self.audit.append(&end_record).await {
                            self.finish_failed(&mut run, "audit_append_failed", &e.to_string())
                                .await;
                            return;
                        }

                        run.executed_steps.push(step.name.clone());
                        if let Err(e) = self.runs.save(&run).await {
                            self.finish_failed(&mut run, "storage_failed", &e.to_string())
                                .await;
                            return;
                        }
                    }
                    Err(contract) => {
                        let err = StepError::from(contract);
                        self.fail_step(&mut run, step, duration_ms, &err).await;
                        return;
                    }
                },
                Err(err) => {
                    self.fail_step(&mut run, step, duration_ms, &err).await;
                    return;
                }
            }
        }

        run.complete();
        if let Err(e) = self.runs.save(&run).await {
            error!(error = %e, "Failed to persist completed run");
        }
        self.remove_cancel_flag(run.run_id);
        info!("Run completed");
    }

    /// Record a terminal step failure and fail the run
    async fn fail_step(
        &self,
        run: &mut WorkflowRun,
        step: &StepDescriptor,
        duration_ms: u64,
        err: &StepError,
    ) {
        error!(step = %step.name, error = %err.message(), "Step failed permanently");

        let end_record = AuditRecord::new(
            Some(run.run_id),
            AuditAction::StepEnd,
            format!("step '{}' failed", step.name),
        )
        .with_step(step.name.as_str())
        .with_duration(duration_ms)
        .with_error(err.message());

        if let Err(e) = self.audit.append(&end_record).await {
            // Losing the audit trail is itself a pipeline failure
            self.finish_failed(run, "audit_append_failed", &e.to_string())
                .await;
            return;
        }

        self.finish_failed(run, err.code(), &err.message()).await;
    }

    async fn finish_failed(&self, run: &mut WorkflowRun, code: &str, message: &str) {
        run.fail(code, message);
        if let Err(e) = self.runs.save(run).await {
            error!(error = %e, "Failed to persist failed run");
        }
        self.remove_cancel_flag(run.run_id);
        error!(code, "Run failed");
    }

    fn remove_cancel_flag(&self, run_id: Uuid) {
        self.cancel_flags
            .lock()
            .expect("cancel flag lock poisoned")
            .remove(&run_id);
    }

    /// Execute one step, retrying transient failures per its policy
    async fn run_step_with_retry(
        &self,
        step: &StepDescriptor,
        ctx: &RunContext,
        run_id: Uuid,
    ) -> Result<HashMap<String, Value>, StepError> {
        let step_timeout = step.timeout(self.settings.step_timeout_seconds);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match self.dispatch(step, ctx, run_id, step_timeout).await {
                Ok(updates) => return Ok(updates),
                Err(err) => {
                    if err.is_transient() && step.retryable && step.retry.should_retry(attempt) {
                        let delay = step.retry.delay_for_attempt(attempt);
                        warn!(
                            step = %step.name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err.message(),
                            "Step failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Dispatch one attempt of a step through its tagged variant. Steps are
    /// a closed set; adding a kind means adding a registry entry and an arm
    /// here, never runtime dispatch into arbitrary code.
    async fn dispatch(
        &self,
        step: &StepDescriptor,
        ctx: &RunContext,
        run_id: Uuid,
        step_timeout: Duration,
    ) -> Result<HashMap<String, Value>, StepError> {
        let view = ctx.view(step);

        match step.kind {
            StepKind::ExtractText => {
                let file_path = view.get_str("file_path")?;
                let mime_type = view.get_str("mime_type")?;

                let text = timeout(step_timeout, self.extractor.extract(file_path, mime_type))
                    .await
                    .map_err(|_| StepError::Timeout)?
                    .map_err(|e| StepError::Transient(e.to_string()))?;

                Ok(HashMap::from([("ocr_text".to_string(), json!(text))]))
            }

            StepKind::InferSuggestion => {
                let ocr_text = view.get_str("ocr_text")?;
                self.call_inference(step, run_id, ocr_text, step_timeout)
                    .await
            }

            StepKind::ScoreSuggestion => {
                let inference: InferenceOutput =
                    serde_json::from_value(view.get("inference")?.clone()).map_err(|e| {
                        StepError::Transient(format!("inference output off contract: {e}"))
                    })?;

                let validation =
                    rules::validate(inference.account_number.as_deref(), inference.vat_code.as_deref());
                let score = scoring::score(inference.confidence, &validation, &self.settings.scoring);

                let validation_value = serde_json::to_value(&validation)
                    .map_err(|e| StepError::Transient(e.to_string()))?;

                Ok(HashMap::from([
                    ("confidence_score".to_string(), json!(score.final_score)),
                    ("risk_level".to_string(), json!(score.risk_level)),
                    ("validation".to_string(), validation_value),
                    ("notes".to_string(), json!(inference.reasoning)),
                ]))
            }

            StepKind::PersistSuggestion => {
                let document_id = view.get_str("document_id")?;
                let inference: InferenceOutput =
                    serde_json::from_value(view.get("inference")?.clone()).map_err(|e| {
                        StepError::Transient(format!("inference output off contract: {e}"))
                    })?;
                let confidence_score = view.get_f64("confidence_score")?;
                let risk_level: RiskLevel =
                    serde_json::from_value(view.get("risk_level")?.clone())
                        .map_err(|e| StepError::Transient(e.to_string()))?;
                let notes = view.get_str("notes")?;

                let suggestion = Suggestion::new(
                    run_id,
                    document_id,
                    inference.account_number,
                    inference.vat_code,
                    confidence_score,
                    risk_level,
                    notes,
                );

                let id = timeout(step_timeout, self.suggestions.save(&suggestion))
                    .await
                    .map_err(|_| StepError::Timeout)?
                    .map_err(|e| StepError::Transient(e.to_string()))?;

                info!(suggestion_id = %id, %risk_level, "Suggestion persisted");
                Ok(HashMap::from([("suggestion_id".to_string(), json!(id))]))
            }
        }
    }

    /// Invoke the inference service with external-call audit wrapping.
    /// Each attempt leaves its own start/end pair in the trail.
    async fn call_inference(
        &self,
        step: &StepDescriptor,
        run_id: Uuid,
        ocr_text: &str,
        step_timeout: Duration,
    ) -> Result<HashMap<String, Value>, StepError> {
        let request_summary = if step.capture_full_payload {
            ocr_text.to_string()
        } else {
            payload_digest(ocr_text)
        };

        let start_record =
            AuditRecord::new(Some(run_id), AuditAction::ExternalCallStart, request_summary)
                .with_step(step.name.as_str());
        self.audit
            .append(&start_record)
            .await
            .map_err(|e| StepError::Audit(e.to_string()))?;

        let call_start = Instant::now();
        let result = match timeout(step_timeout, self.inference.suggest(ocr_text)).await {
            Ok(r) => r,
            Err(_) => Err(InferenceError::Timeout),
        };
        let duration_ms = call_start.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                let payload = serde_json::to_string(&output).unwrap_or_default();
                let response_summary = if step.capture_full_payload {
                    payload
                } else {
                    payload_digest(&payload)
                };

                let end_record = AuditRecord::new(
                    Some(run_id),
                    AuditAction::ExternalCallEnd,
                    response_summary,
                )
                .with_step(step.name.as_str())
                .with_duration(duration_ms);
                self.audit
                    .append(&end_record)
                    .await
                    .map_err(|e| StepError::Audit(e.to_string()))?;

                let value = serde_json::to_value(&output)
                    .map_err(|e| StepError::Transient(e.to_string()))?;
                Ok(HashMap::from([("inference".to_string(), value)]))
            }
            Err(e) => {
                let end_record = AuditRecord::new(
                    Some(run_id),
                    AuditAction::ExternalCallEnd,
                    "inference call failed",
                )
                .with_step(step.name.as_str())
                .with_duration(duration_ms)
                .with_error(e.to_string());
                self.audit
                    .append(&end_record)
                    .await
                    .map_err(|audit_err| StepError::Audit(audit_err.to_string()))?;

                Err(match e {
                    InferenceError::Timeout => StepError::Timeout,
                    other => StepError::Transient(other.to_string()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::{standard_registry, RetryPolicy, StepRegistry};
    use crate::domain::{ApprovalStatus, RunStatus};
    use crate::services::ExtractionError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use tempfile::TempDir;

    struct StaticExtractor(String);

    #[async_trait]
    impl TextExtractor for StaticExtractor {
        async fn extract(&self, _: &str, _: &str) -> Result<String, ExtractionError> {
            Ok(self.0.clone())
        }
    }

    struct SlowExtractor {
        delay: Duration,
        text: String,
    }

    #[async_trait]
    impl TextExtractor for SlowExtractor {
        async fn extract(&self, _: &str, _: &str) -> Result<String, ExtractionError> {
            tokio::time::sleep(self.delay).await;
            Ok(self.text.clone())
        }
    }

    struct StaticInference(InferenceOutput);

    #[async_trait]
    impl InferenceService for StaticInference {
        async fn suggest(&self, _: &str) -> Result<InferenceOutput, InferenceError> {
            Ok(self.0.clone())
        }
    }

    struct FailingInference;

    #[async_trait]
    impl InferenceService for FailingInference {
        async fn suggest(&self, _: &str) -> Result<InferenceOutput, InferenceError> {
            Err(InferenceError::Http("connection refused".to_string()))
        }
    }

    /// Fails the first `failures` calls, then succeeds
    struct FlakyInference {
        failures: AtomicU32,
        output: InferenceOutput,
    }

    #[async_trait]
    impl InferenceService for FlakyInference {
        async fn suggest(&self, _: &str) -> Result<InferenceOutput, InferenceError> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 {
                    Some(n - 1)
                } else {
                    None
                }
            }).is_ok()
            {
                return Err(InferenceError::Timeout);
            }
            Ok(self.output.clone())
        }
    }

    #[derive(Default)]
    struct MemorySuggestionStore {
        inner: Mutex<HashMap<Uuid, Suggestion>>,
    }

    impl MemorySuggestionStore {
        fn first(&self) -> Option<Suggestion> {
            self.inner.lock().unwrap().values().next().cloned()
        }

        fn len(&self) -> usize {
            self.inner.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SuggestionStore for MemorySuggestionStore {
        async fn save(&self, suggestion: &Suggestion) -> anyhow::Result<Uuid> {
            self.inner
                .lock()
                .unwrap()
                .insert(suggestion.id, suggestion.clone());
            Ok(suggestion.id)
        }

        async fn load(&self, id: Uuid) -> anyhow::Result<Option<Suggestion>> {
            Ok(self.inner.lock().unwrap().get(&id).cloned())
        }
    }

    struct FailingSuggestionStore;

    #[async_trait]
    impl SuggestionStore for FailingSuggestionStore {
        async fn save(&self, _: &Suggestion) -> anyhow::Result<Uuid> {
            anyhow::bail!("disk full")
        }

        async fn load(&self, _: Uuid) -> anyhow::Result<Option<Suggestion>> {
            Ok(None)
        }
    }

    fn sample_inference() -> InferenceOutput {
        InferenceOutput {
            account_number: Some("4000".to_string()),
            vat_code: Some("3".to_string()),
            confidence: 0.8,
            risk_hint: Some("low".to_string()),
            reasoning: "Standard purchase invoice".to_string(),
        }
    }

    /// Millisecond retry delays so failure tests stay fast
    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 1.0,
        }
    }

    fn fast_registry() -> StepRegistry {
        standard_registry(&fast_retry(3)).unwrap()
    }

    async fn engine_with(
        registry: StepRegistry,
        extractor: Arc<dyn TextExtractor>,
        inference: Arc<dyn InferenceService>,
        suggestions: Arc<dyn SuggestionStore>,
    ) -> (Engine, TempDir) {
        let temp = TempDir::new().unwrap();
        let audit = AuditStore::open(temp.path().join("audit.jsonl"))
            .await
            .unwrap();
        let runs = FileRunStore::open(temp.path().join("runs")).await.unwrap();

        let engine = Engine::new(
            Arc::new(registry),
            Arc::new(audit),
            Arc::new(runs),
            extractor,
            inference,
            suggestions,
            EngineSettings {
                step_timeout_seconds: 5,
                ..Default::default()
            },
        );
        (engine, temp)
    }

    async fn test_engine(
        extractor: Arc<dyn TextExtractor>,
        inference: Arc<dyn InferenceService>,
        suggestions: Arc<dyn SuggestionStore>,
    ) -> (Engine, TempDir) {
        engine_with(fast_registry(), extractor, inference, suggestions).await
    }

    fn seed() -> HashMap<String, Value> {
        [
            ("document_id", json!("D1")),
            ("file_path", json!("/tmp/d1.pdf")),
            ("mime_type", json!("application/pdf")),
            ("tenant_id", json!("t1")),
            ("user_id", json!("u1")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    async fn wait_for_terminal(engine: &Engine, run_id: Uuid) -> WorkflowRun {
        for _ in 0..500 {
            if let Ok(run) = engine.get_run_status(run_id).await {
                if run.is_terminal() {
                    return run;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {run_id} did not reach a terminal state");
    }

    #[tokio::test]
    async fn test_end_to_end_document_scenario() {
        let store = Arc::new(MemorySuggestionStore::default());
        let (engine, _temp) = test_engine(
            Arc::new(StaticExtractor("Total: 1000 NOK".to_string())),
            Arc::new(StaticInference(sample_inference())),
            store.clone(),
        )
        .await;

        let run_id = engine
            .start_run("document_received", seed())
            .await
            .unwrap();
        let run = wait_for_terminal(&engine, run_id).await;

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(
            run.executed_steps,
            vec![
                "extract_text",
                "infer_suggestion",
                "score_suggestion",
                "persist_suggestion"
            ]
        );

        let suggestion = store.first().expect("suggestion persisted");
        assert_eq!(suggestion.document_id, "D1");
        assert_eq!(suggestion.account_number.as_deref(), Some("4000"));
        assert_eq!(suggestion.vat_code.as_deref(), Some("3"));
        assert_eq!(suggestion.confidence_score, 0.8);
        assert_eq!(suggestion.risk_level, RiskLevel::Low);
        assert_eq!(suggestion.approval_status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn test_audit_completeness() {
        let store = Arc::new(MemorySuggestionStore::default());
        let (engine, _temp) = test_engine(
            Arc::new(StaticExtractor("Total: 1000 NOK".to_string())),
            Arc::new(StaticInference(sample_inference())),
            store,
        )
        .await;

        let run_id = engine
            .start_run("document_received", seed())
            .await
            .unwrap();
        let run = wait_for_terminal(&engine, run_id).await;
        assert_eq!(run.status, RunStatus::Completed);

        let records = engine
            .list_audit_records(&AuditFilter::for_run(run_id))
            .await
            .unwrap();

        // Exactly one step_start and one step_end per executed step
        for step in &run.executed_steps {
            let starts = records
                .iter()
                .filter(|r| {
                    r.action == AuditAction::StepStart && r.step_name.as_deref() == Some(step)
                })
                .count();
            let ends = records
                .iter()
                .filter(|r| {
                    r.action == AuditAction::StepEnd && r.step_name.as_deref() == Some(step)
                })
                .count();
            assert_eq!(starts, 1, "step {step} should have one step_start");
            assert_eq!(ends, 1, "step {step} should have one step_end");
        }

        // The external step is wrapped with one call start/end pair
        let call_starts = records
            .iter()
            .filter(|r| r.action == AuditAction::ExternalCallStart)
            .count();
        let call_ends = records
            .iter()
            .filter(|r| r.action == AuditAction::ExternalCallEnd)
            .count();
        assert_eq!(call_starts, 1);
        assert_eq!(call_ends, 1);

        // Step input key names are recorded, never values
        let ocr_start = records
            .iter()
            .find(|r| {
                r.action == AuditAction::StepStart
                    && r.step_name.as_deref() == Some("extract_text")
            })
            .unwrap();
        assert!(ocr_start
            .input_key_names
            .contains(&"file_path".to_string()));
        assert!(!ocr_start.summary.contains("/tmp/d1.pdf"));
    }

    #[tokio::test]
    async fn test_no_partial_commit_on_failure() {
        let store = Arc::new(MemorySuggestionStore::default());
        let (engine, _temp) = test_engine(
            Arc::new(StaticExtractor("Total: 1000 NOK".to_string())),
            Arc::new(FailingInference),
            store.clone(),
        )
        .await;

        let run_id = engine
            .start_run("document_received", seed())
            .await
            .unwrap();
        let run = wait_for_terminal(&engine, run_id).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.executed_steps, vec!["extract_text"]);
        assert_eq!(run.error.as_ref().unwrap().code, "step_failed");

        // No suggestion record is created
        assert_eq!(store.len(), 0);

        // No records exist for steps that never ran
        let records = engine
            .list_audit_records(&AuditFilter::for_run(run_id))
            .await
            .unwrap();
        assert!(!records
            .iter()
            .any(|r| r.step_name.as_deref() == Some("score_suggestion")));

        // The failing step has a terminal step_end with the error captured
        let end = records
            .iter()
            .find(|r| {
                r.action == AuditAction::StepEnd
                    && r.step_name.as_deref() == Some("infer_suggestion")
            })
            .unwrap();
        assert!(!end.success);
        assert!(end.error.as_deref().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_retry_then_succeed() {
        let store = Arc::new(MemorySuggestionStore::default());
        let (engine, _temp) = test_engine(
            Arc::new(StaticExtractor("Total: 1000 NOK".to_string())),
            Arc::new(FlakyInference {
                failures: AtomicU32::new(1),
                output: sample_inference(),
            }),
            store.clone(),
        )
        .await;

        let run_id = engine
            .start_run("document_received", seed())
            .await
            .unwrap();
        let run = wait_for_terminal(&engine, run_id).await;

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(store.len(), 1);

        // Each attempt leaves its own external-call pair
        let records = engine
            .list_audit_records(&AuditFilter::for_run(run_id))
            .await
            .unwrap();
        let call_ends: Vec<_> = records
            .iter()
            .filter(|r| r.action == AuditAction::ExternalCallEnd)
            .collect();
        assert_eq!(call_ends.len(), 2);
        assert!(!call_ends[0].success);
        assert!(call_ends[1].success);
    }

    #[tokio::test]
    async fn test_retries_exhausted_fails_run() {
        let store = Arc::new(MemorySuggestionStore::default());
        let (engine, _temp) = test_engine(
            Arc::new(StaticExtractor("Total: 1000 NOK".to_string())),
            Arc::new(FlakyInference {
                failures: AtomicU32::new(10),
                output: sample_inference(),
            }),
            store.clone(),
        )
        .await;

        let run_id = engine
            .start_run("document_received", seed())
            .await
            .unwrap();
        let run = wait_for_terminal(&engine, run_id).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_ref().unwrap().code, "step_timeout");
        assert_eq!(store.len(), 0);

        // max_attempts = 3 in the fast policy
        let records = engine
            .list_audit_records(&AuditFilter::for_run(run_id))
            .await
            .unwrap();
        let attempts = records
            .iter()
            .filter(|r| r.action == AuditAction::ExternalCallStart)
            .count();
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_configured_retry_policy_drives_attempts() {
        let store = Arc::new(MemorySuggestionStore::default());
        // Five attempts configured instead of the default three
        let (engine, _temp) = engine_with(
            standard_registry(&fast_retry(5)).unwrap(),
            Arc::new(StaticExtractor("Total: 1000 NOK".to_string())),
            Arc::new(FailingInference),
            store,
        )
        .await;

        let run_id = engine
            .start_run("document_received", seed())
            .await
            .unwrap();
        let run = wait_for_terminal(&engine, run_id).await;
        assert_eq!(run.status, RunStatus::Failed);

        let records = engine
            .list_audit_records(&AuditFilter::for_run(run_id))
            .await
            .unwrap();
        let attempts = records
            .iter()
            .filter(|r| r.action == AuditAction::ExternalCallStart)
            .count();
        assert_eq!(attempts, 5);
    }

    #[tokio::test]
    async fn test_missing_input_fails_fast_before_step_runs() {
        // Wiring that passes registration (the first step declares it will
        // produce "inference") but never actually provides the key, so the
        // scoring step's precheck must stop the run.
        let mut registry = StepRegistry::new();
        registry
            .register(StepDescriptor::new(
                "extract_text",
                StepKind::ExtractText,
                &["document_id", "file_path", "mime_type"],
                &["ocr_text", "inference"],
            ))
            .unwrap();
        registry
            .register(StepDescriptor::new(
                "score_suggestion",
                StepKind::ScoreSuggestion,
                &["inference"],
                &["confidence_score", "risk_level", "validation", "notes"],
            ))
            .unwrap();
        registry
            .register_workflow("document_received", &["extract_text", "score_suggestion"])
            .unwrap();

        let store = Arc::new(MemorySuggestionStore::default());
        let (engine, _temp) = engine_with(
            registry,
            Arc::new(StaticExtractor("Total: 1000 NOK".to_string())),
            Arc::new(StaticInference(sample_inference())),
            store,
        )
        .await;

        let run_id = engine
            .start_run("document_received", seed())
            .await
            .unwrap();
        let run = wait_for_terminal(&engine, run_id).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_ref().unwrap().code, "missing_input");
        assert_eq!(run.executed_steps, vec!["extract_text"]);

        // The aborted step still leaves a complete start/end pair
        let records = engine
            .list_audit_records(&AuditFilter::for_run(run_id))
            .await
            .unwrap();
        let end = records
            .iter()
            .find(|r| {
                r.action == AuditAction::StepEnd
                    && r.step_name.as_deref() == Some("score_suggestion")
            })
            .unwrap();
        assert!(!end.success);
        assert!(end.error.as_deref().unwrap().contains("inference"));
    }

    #[tokio::test]
    async fn test_persist_failure_creates_no_suggestion() {
        let (engine, _temp) = test_engine(
            Arc::new(StaticExtractor("Total: 1000 NOK".to_string())),
            Arc::new(StaticInference(sample_inference())),
            Arc::new(FailingSuggestionStore),
        )
        .await;

        let run_id = engine
            .start_run("document_received", seed())
            .await
            .unwrap();
        let run = wait_for_terminal(&engine, run_id).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(
            run.executed_steps,
            vec!["extract_text", "infer_suggestion", "score_suggestion"]
        );
    }

    #[tokio::test]
    async fn test_unknown_trigger() {
        let store = Arc::new(MemorySuggestionStore::default());
        let (engine, _temp) = test_engine(
            Arc::new(StaticExtractor(String::new())),
            Arc::new(StaticInference(sample_inference())),
            store,
        )
        .await;

        let err = engine.start_run("no_such_trigger", seed()).await;
        assert_eq!(err.unwrap_err().code(), "unknown_trigger");
    }

    #[tokio::test]
    async fn test_missing_seed_key() {
        let store = Arc::new(MemorySuggestionStore::default());
        let (engine, _temp) = test_engine(
            Arc::new(StaticExtractor(String::new())),
            Arc::new(StaticInference(sample_inference())),
            store,
        )
        .await;

        let mut incomplete = seed();
        incomplete.remove("user_id");
        let err = engine.start_run("document_received", incomplete).await;
        assert_eq!(err.unwrap_err().code(), "missing_seed_key");
    }

    #[tokio::test]
    async fn test_get_run_status_unknown() {
        let store = Arc::new(MemorySuggestionStore::default());
        let (engine, _temp) = test_engine(
            Arc::new(StaticExtractor(String::new())),
            Arc::new(StaticInference(sample_inference())),
            store,
        )
        .await;

        let err = engine.get_run_status(Uuid::new_v4()).await;
        assert_eq!(err.unwrap_err().code(), "run_not_found");
    }

    #[tokio::test]
    async fn test_cooperative_cancellation() {
        let store = Arc::new(MemorySuggestionStore::default());
        let (engine, _temp) = test_engine(
            Arc::new(SlowExtractor {
                delay: Duration::from_millis(300),
                text: "Total: 1000 NOK".to_string(),
            }),
            Arc::new(StaticInference(sample_inference())),
            store.clone(),
        )
        .await;

        let run_id = engine
            .start_run("document_received", seed())
            .await
            .unwrap();

        // Cancel while the first step is still executing; the step itself
        // finishes, the run stops before the next one.
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.cancel_run(run_id).await.unwrap();

        let run = wait_for_terminal(&engine, run_id).await;
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_ref().unwrap().code, "cancelled");
        assert_eq!(run.executed_steps, vec!["extract_text"]);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_decide_suggestion_once() {
        let store = Arc::new(MemorySuggestionStore::default());
        let (engine, _temp) = test_engine(
            Arc::new(StaticExtractor("Total: 1000 NOK".to_string())),
            Arc::new(StaticInference(sample_inference())),
            store.clone(),
        )
        .await;

        let run_id = engine
            .start_run("document_received", seed())
            .await
            .unwrap();
        wait_for_terminal(&engine, run_id).await;

        let suggestion_id = store.first().unwrap().id;
        let decided = engine
            .decide_suggestion(suggestion_id, true, "reviewer@firm.no")
            .await
            .unwrap();
        assert_eq!(decided.approval_status, ApprovalStatus::Approved);

        let err = engine
            .decide_suggestion(suggestion_id, false, "other@firm.no")
            .await;
        assert_eq!(err.unwrap_err().code(), "already_decided");

        // The decision is in the trail with its actor
        let records = engine
            .list_audit_records(&AuditFilter {
                action: Some(AuditAction::Decision),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].actor_user_id.as_deref(), Some("reviewer@firm.no"));
        assert_eq!(records[0].run_id, Some(run_id));
    }
}
