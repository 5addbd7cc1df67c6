//! Append-only audit store with file-based persistence.
//!
//! Records are stored as newline-delimited JSON (JSONL). The public surface
//! exposes append and read-only projections; there is no update or delete
//! operation, so existing records cannot be altered through this API.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use chrono::{DateTime, Utc};

use crate::domain::{AuditAction, AuditRecord};

/// File-backed append-only audit store
pub struct AuditStore {
    path: PathBuf,
}

impl AuditStore {
    /// Create or open an audit store at the given path
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create audit directory: {}", parent.display())
            })?;
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record to the trail. Flushes before returning; a failed
    /// append is surfaced to the caller and fails the enclosing step.
    pub async fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open audit file: {}", self.path.display()))?;

        let json = serde_json::to_string(record).context("Failed to serialize audit record")?;
        file.write_all(format!("{json}\n").as_bytes())
            .await
            .context("Failed to write audit record")?;
        file.flush().await.context("Failed to flush audit record")?;

        Ok(())
    }

    /// Replay all records in append order
    pub async fn replay(&self) -> Result<Vec<AuditRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .await
            .with_context(|| format!("Failed to open audit file: {}", self.path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut records = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let record: AuditRecord = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse audit record: {line}"))?;
            records.push(record);
        }

        Ok(records)
    }

    /// All records for one run, in append order
    pub async fn list_by_run(&self, run_id: Uuid) -> Result<Vec<AuditRecord>> {
        let records = self.replay().await?;
        Ok(records
            .into_iter()
            .filter(|r| r.run_id == Some(run_id))
            .collect())
    }

    /// Filtered, paginated projection over the trail
    pub async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
        let records = self.replay().await?;
        Ok(records
            .into_iter()
            .filter(|r| filter.matches(r))
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect())
    }
}

/// Filter for audit queries. All conditions are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub run_id: Option<Uuid>,
    pub actor_user_id: Option<String>,
    pub action: Option<AuditAction>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn for_run(run_id: Uuid) -> Self {
        Self {
            run_id: Some(run_id),
            ..Default::default()
        }
    }

    fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(run_id) = self.run_id {
            if record.run_id != Some(run_id) {
                return false;
            }
        }
        if let Some(ref actor) = self.actor_user_id {
            if record.actor_user_id.as_deref() != Some(actor.as_str()) {
                return false;
            }
        }
        if let Some(action) = self.action {
            if record.action != action {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.created_at >= until {
                return false;
            }
        }
        true
    }
}
