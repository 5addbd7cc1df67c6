//! File-backed persistence for run snapshots and suggestion records.
//!
//! Layout under the kontera home directory:
//!
//! ```text
//! runs/<run_id>/run.json           current WorkflowRun snapshot
//! suggestions/<suggestion_id>.json one file per suggestion
//! ```
//!
//! Run snapshots are rewritten on each state transition; the append-only
//! audit trail is the historical record.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use uuid::Uuid;

use super::SuggestionStore;
use crate::domain::{Suggestion, WorkflowRun};

/// Stores one `run.json` snapshot per run directory
pub struct FileRunStore {
    base_dir: PathBuf,
}

impl FileRunStore {
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)
            .await
            .with_context(|| format!("Failed to create runs directory: {}", base_dir.display()))?;
        Ok(Self { base_dir })
    }

    fn run_path(&self, run_id: Uuid) -> PathBuf {
        self.base_dir.join(run_id.to_string()).join("run.json")
    }

    /// Write the current snapshot for a run
    pub async fn save(&self, run: &WorkflowRun) -> Result<()> {
        let path = self.run_path(run.run_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create run directory: {}", parent.display())
            })?;
        }

        let json = serde_json::to_string_pretty(run).context("Failed to serialize run")?;
        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write run snapshot: {}", path.display()))?;
        Ok(())
    }

    pub async fn load(&self, run_id: Uuid) -> Result<Option<WorkflowRun>> {
        let path = self.run_path(run_id);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read run snapshot: {}", path.display()))?;
        let run = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse run snapshot: {}", path.display()))?;
        Ok(Some(run))
    }

    /// List recent runs, most recently started first
    pub async fn list(&self, limit: usize) -> Result<Vec<WorkflowRun>> {
        let mut runs = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(run_id) = Uuid::parse_str(&name) else {
                continue;
            };
            if let Some(run) = self.load(run_id).await? {
                runs.push(run);
            }
        }

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}

/// One JSON file per suggestion
pub struct FileSuggestionStore {
    base_dir: PathBuf,
}

impl FileSuggestionStore {
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).await.with_context(|| {
            format!(
                "Failed to create suggestions directory: {}",
                base_dir.display()
            )
        })?;
        Ok(Self { base_dir })
    }

    fn path(&self, id: Uuid) -> PathBuf {
        self.base_dir.join(format!("{id}.json"))
    }

    /// List recent suggestions, newest first
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<Suggestion>> {
        let mut suggestions = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            let Ok(id) = Uuid::parse_str(stem) else {
                continue;
            };
            if let Some(suggestion) = self.load(id).await? {
                suggestions.push(suggestion);
            }
        }

        suggestions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        suggestions.truncate(limit);
        Ok(suggestions)
    }
}

#[async_trait]
impl SuggestionStore for FileSuggestionStore {
    async fn save(&self, suggestion: &Suggestion) -> Result<Uuid> {
        let path = self.path(suggestion.id);
        let json =
            serde_json::to_string_pretty(suggestion).context("Failed to serialize suggestion")?;
        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write suggestion: {}", path.display()))?;
        Ok(suggestion.id)
    }

    async fn load(&self, id: Uuid) -> Result<Option<Suggestion>> {
        let path = self.path(id);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read suggestion: {}", path.display()))?;
        let suggestion = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse suggestion: {}", path.display()))?;
        Ok(Some(suggestion))
    }
}
