//! Configuration for kontera paths and engine settings.
//!
//! Sources (highest priority first):
//! 1. Environment variables (KONTERA_HOME)
//! 2. Config file (.kontera/config.yaml, searched upward from cwd)
//! 3. Defaults (~/.kontera)
//!
//! Scoring constants, retry policy and the per-step timeout live here, not
//! in code; the exact figures are tuning knobs, not domain truth.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::registry::RetryPolicy;
use crate::scoring::ScoringPolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<std::result::Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub engine: EngineSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to the config file)
    pub home: Option<String>,
}

/// Engine-wide execution settings
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Per-step timeout in seconds
    #[serde(default = "default_step_timeout")]
    pub step_timeout_seconds: u64,

    /// Default retry policy for retryable steps
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Confidence scoring constants
    #[serde(default)]
    pub scoring: ScoringPolicy,
}

fn default_step_timeout() -> u64 {
    60
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            step_timeout_seconds: default_step_timeout(),
            retry: RetryPolicy::default(),
            scoring: ScoringPolicy::default(),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to kontera home (engine state)
    pub home: PathBuf,

    pub engine: EngineSettings,

    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".kontera").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".kontera");

    let config_file = find_config_file();

    let (home, engine) = if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;

        let home = if let Ok(env_home) = std::env::var("KONTERA_HOME") {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = config.paths.home {
            // home is relative to the .kontera/ directory
            let kontera_dir = config_path.parent().unwrap_or(Path::new("."));
            resolve_path(kontera_dir, home_path)
        } else {
            default_home
        };

        (home, config.engine)
    } else {
        let home = std::env::var("KONTERA_HOME")
            .map(PathBuf::from)
            .unwrap_or(default_home);

        (home, EngineSettings::default())
    };

    Ok(ResolvedConfig {
        home,
        engine,
        config_file,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the runs directory ($KONTERA_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("runs"))
}

/// Get the suggestions directory ($KONTERA_HOME/suggestions)
pub fn suggestions_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("suggestions"))
}

/// Get the audit trail path ($KONTERA_HOME/audit.jsonl)
pub fn audit_path() -> Result<PathBuf> {
    Ok(config()?.home.join("audit.jsonl"))
}
