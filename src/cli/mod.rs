//! Command-line interface for kontera.
//!
//! Provides commands for processing documents, checking run status,
//! inspecting the audit trail, and recording reviewer decisions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use uuid::Uuid;

use crate::config;
use crate::core::{
    standard_registry, AuditFilter, AuditStore, Engine, TRIGGER_DOCUMENT_RECEIVED,
};
use crate::domain::{AuditAction, RunStatus, Suggestion};
use crate::services::{
    FileRunStore, FileSuggestionStore, HttpInferenceClient, TesseractExtractor,
};

/// kontera - Audited document pipeline for accounting suggestions
#[derive(Parser, Debug)]
#[command(name = "kontera")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process a scanned document through the pipeline
    Process {
        /// Path to the document file
        file: PathBuf,

        /// Document identifier (defaults to the file stem)
        #[arg(long)]
        document_id: Option<String>,

        /// MIME type (guessed from the extension if not given)
        #[arg(long)]
        mime_type: Option<String>,

        /// Tenant the document belongs to
        #[arg(short, long, default_value = "default")]
        tenant: String,

        /// User uploading the document
        #[arg(short, long, default_value = "cli")]
        user: String,

        /// Wait for the run to finish and print the outcome
        #[arg(short, long)]
        wait: bool,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Request cancellation of a running pipeline
    Cancel {
        /// Run ID to cancel
        run_id: String,
    },

    /// List recent suggestions awaiting review
    Suggestions {
        /// Maximum number of suggestions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Record a reviewer decision on a suggestion
    Decide {
        /// Suggestion ID (UUID)
        suggestion_id: String,

        /// Approve or reject
        verdict: Verdict,

        /// Reviewer identity recorded in the audit trail
        #[arg(short, long)]
        actor: String,
    },

    /// Inspect the audit trail
    Audit {
        /// Filter by run ID
        #[arg(long)]
        run_id: Option<String>,

        /// Filter by acting user
        #[arg(long)]
        actor: Option<String>,

        /// Filter by action type
        #[arg(long, value_enum)]
        action: Option<ActionFilter>,

        /// Number of records to skip
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Maximum number of records to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Verdict {
    Approve,
    Reject,
}

/// Audit action filter for the CLI (maps to AuditAction)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ActionFilter {
    StepStart,
    StepEnd,
    ExternalCallStart,
    ExternalCallEnd,
    Decision,
}

impl From<ActionFilter> for AuditAction {
    fn from(f: ActionFilter) -> Self {
        match f {
            ActionFilter::StepStart => AuditAction::StepStart,
            ActionFilter::StepEnd => AuditAction::StepEnd,
            ActionFilter::ExternalCallStart => AuditAction::ExternalCallStart,
            ActionFilter::ExternalCallEnd => AuditAction::ExternalCallEnd,
            ActionFilter::Decision => AuditAction::Decision,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Process {
                file,
                document_id,
                mime_type,
                tenant,
                user,
                wait,
            } => process_document(&file, document_id, mime_type, &tenant, &user, wait).await,
            Commands::Status { run_id } => show_status(&run_id).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Cancel { run_id } => cancel_run(&run_id).await,
            Commands::Suggestions { limit } => list_suggestions(limit).await,
            Commands::Decide {
                suggestion_id,
                verdict,
                actor,
            } => decide(&suggestion_id, verdict, &actor).await,
            Commands::Audit {
                run_id,
                actor,
                action,
                offset,
                limit,
            } => show_audit(run_id, actor, action, offset, limit).await,
            Commands::Config => show_config(),
        }
    }
}

/// Wire the engine from resolved configuration and real adapters
async fn build_engine() -> Result<(Engine, Arc<FileSuggestionStore>)> {
    let cfg = config::config()?;

    let registry =
        standard_registry(&cfg.engine.retry).context("Failed to build step registry")?;
    let audit = AuditStore::open(config::audit_path()?).await?;
    let runs = FileRunStore::open(config::runs_dir()?).await?;
    let suggestions = Arc::new(FileSuggestionStore::open(config::suggestions_dir()?).await?);

    let inference = HttpInferenceClient::from_env()
        .context("Inference service not configured")?;

    let engine = Engine::new(
        Arc::new(registry),
        Arc::new(audit),
        Arc::new(runs),
        Arc::new(TesseractExtractor::new()),
        Arc::new(inference),
        suggestions.clone(),
        cfg.engine.clone(),
    );

    Ok((engine, suggestions))
}

fn parse_uuid(value: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Invalid {what} ID: {value}"))
}

/// Guess a MIME type from the file extension
fn guess_mime_type(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
    .to_string()
}

async fn process_document(
    file: &Path,
    document_id: Option<String>,
    mime_type: Option<String>,
    tenant: &str,
    user: &str,
    wait: bool,
) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("Document file not found: {}", file.display());
    }

    let document_id = document_id.unwrap_or_else(|| {
        file.file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    });
    let mime_type = mime_type.unwrap_or_else(|| guess_mime_type(file));

    let seed: HashMap<String, serde_json::Value> = [
        ("document_id".to_string(), json!(document_id)),
        ("file_path".to_string(), json!(file.display().to_string())),
        ("mime_type".to_string(), json!(mime_type)),
        ("tenant_id".to_string(), json!(tenant)),
        ("user_id".to_string(), json!(user)),
    ]
    .into_iter()
    .collect();

    let (engine, suggestions) = build_engine().await?;
    let run_id = engine
        .start_run(TRIGGER_DOCUMENT_RECEIVED, seed)
        .await
        .map_err(|e| anyhow::anyhow!("{e} (code: {})", e.code()))?;

    println!("Run started: {run_id}");

    if !wait {
        println!("Check progress with: kontera status {run_id}");
        return Ok(());
    }

    let run = loop {
        let run = engine
            .get_run_status(run_id)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        if run.is_terminal() {
            break run;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    };

    match run.status {
        RunStatus::Completed => {
            println!("Run {run_id} completed ({} steps)", run.executed_steps.len());
            // The freshest suggestion for this document is the one this run
            // just persisted
            if let Some(suggestion) = suggestions
                .list_recent(50)
                .await?
                .into_iter()
                .find(|s| s.run_id == run_id)
            {
                print_suggestion(&suggestion);
            }
        }
        _ => {
            let (code, message) = run
                .error
                .map(|e| (e.code, e.message))
                .unwrap_or_default();
            eprintln!("Run {run_id} failed [{code}]: {message}");
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn show_status(run_id: &str) -> Result<()> {
    let run_id = parse_uuid(run_id, "run")?;
    let (engine, _) = build_engine().await?;

    let run = engine
        .get_run_status(run_id)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    println!("Run:       {}", run.run_id);
    println!("Trigger:   {}", run.trigger_name);
    println!("Tenant:    {}", run.tenant_id);
    println!("Document:  {}", run.document_id);
    println!("Status:    {:?}", run.status);
    println!("Steps:     {}", run.executed_steps.join(" -> "));
    if let Some(error) = &run.error {
        println!("Error:     [{}] {}", error.code, error.message);
    }

    Ok(())
}

async fn list_runs(limit: usize) -> Result<()> {
    let (engine, _) = build_engine().await?;
    let runs = engine
        .list_runs(limit)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    for run in runs {
        println!(
            "{}  {:<10}  {}  {}",
            run.run_id,
            format!("{:?}", run.status).to_lowercase(),
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.document_id,
        );
    }

    Ok(())
}

async fn cancel_run(run_id: &str) -> Result<()> {
    let run_id = parse_uuid(run_id, "run")?;
    let (engine, _) = build_engine().await?;

    engine
        .cancel_run(run_id)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("Cancellation requested for run {run_id}");
    Ok(())
}

async fn list_suggestions(limit: usize) -> Result<()> {
    let (_, suggestions) = build_engine().await?;

    let recent = suggestions.list_recent(limit).await?;
    if recent.is_empty() {
        println!("No suggestions found");
        return Ok(());
    }

    for s in recent {
        println!(
            "{}  {:<8}  account={:<6} vat={:<3} score={:.2} risk={}  doc={}",
            s.id,
            format!("{:?}", s.approval_status).to_lowercase(),
            s.account_number.as_deref().unwrap_or("-"),
            s.vat_code.as_deref().unwrap_or("-"),
            s.confidence_score,
            s.risk_level,
            s.document_id,
        );
    }

    Ok(())
}

async fn decide(suggestion_id: &str, verdict: Verdict, actor: &str) -> Result<()> {
    let suggestion_id = parse_uuid(suggestion_id, "suggestion")?;
    let approved = matches!(verdict, Verdict::Approve);
    let (engine, _) = build_engine().await?;

    let suggestion = engine
        .decide_suggestion(suggestion_id, approved, actor)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    print_suggestion(&suggestion);
    Ok(())
}

async fn show_audit(
    run_id: Option<String>,
    actor: Option<String>,
    action: Option<ActionFilter>,
    offset: usize,
    limit: usize,
) -> Result<()> {
    let filter = AuditFilter {
        run_id: run_id
            .map(|id| parse_uuid(&id, "run"))
            .transpose()?,
        actor_user_id: actor,
        action: action.map(Into::into),
        offset,
        limit: Some(limit),
        ..Default::default()
    };

    let (engine, _) = build_engine().await?;
    let records = engine
        .list_audit_records(&filter)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    if records.is_empty() {
        println!("No audit records match");
        return Ok(());
    }

    for record in records {
        let status = if record.success { "ok" } else { "FAIL" };
        let step = record.step_name.as_deref().unwrap_or("-");
        println!(
            "{}  {:<19}  {:<18}  {:<4}  {}",
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record
                .run_id
                .map(|id| id.to_string()[..8].to_string())
                .unwrap_or_else(|| "-".to_string()),
            step,
            status,
            record.summary,
        );
        if let Some(error) = &record.error {
            println!("    error: {error}");
        }
    }

    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("Home:              {}", cfg.home.display());
    match &cfg.config_file {
        Some(path) => println!("Config file:       {}", path.display()),
        None => println!("Config file:       (none, using defaults)"),
    }
    println!("Step timeout:      {}s", cfg.engine.step_timeout_seconds);
    println!("Retry attempts:    {}", cfg.engine.retry.max_attempts);
    println!(
        "Violation penalty: {}",
        cfg.engine.scoring.violation_penalty
    );
    println!(
        "Risk thresholds:   low >= {}, medium >= {}",
        cfg.engine.scoring.low_threshold, cfg.engine.scoring.medium_threshold
    );

    Ok(())
}

fn print_suggestion(s: &Suggestion) {
    println!("Suggestion: {}", s.id);
    println!("  Document:   {}", s.document_id);
    println!("  Account:    {}", s.account_number.as_deref().unwrap_or("-"));
    println!("  VAT code:   {}", s.vat_code.as_deref().unwrap_or("-"));
    println!("  Confidence: {:.2}", s.confidence_score);
    println!("  Risk:       {}", s.risk_level);
    println!("  Status:     {:?}", s.approval_status);
    if !s.notes.is_empty() {
        println!("  Notes:      {}", s.notes);
    }
    if let Some(by) = &s.decided_by {
        println!("  Decided by: {by}");
    }
}
