use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "runledger.yaml";
pub const DEFAULT_STORAGE_DIR: &str = "data/runledger";

/// Configuration loaded from `runledger.yaml`.
/// All fields are optional. Missing fields fall back to env or defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct LedgerConfig {
    /// Root of the `tasks/` tree and the run index.
    pub storage_dir: Option<PathBuf>,
    /// Incoming-webhook URL for run notifications.
    pub notify_webhook: Option<String>,
    /// `EnvFilter` directive used for per-run `task.log` files.
    pub log_filter: Option<String>,
    /// Publish the primary's run directory in `RANK_0_RUN_DIR`.
    pub publish_run_dir: Option<bool>,
    /// Mark a run `interrupted` on Ctrl-C. Installs a process-wide SIGINT
    /// handler on the first call, so only programs that own the process
    /// (like the `runledger` binary) should turn it on.
    pub cancel_on_ctrl_c: Option<bool>,
}

impl LedgerConfig {
    /// Load configuration from a YAML file.
    ///
    /// - If `path` is `Some`, load that specific file (error if missing).
    /// - If `path` is `None`, auto-detect `runledger.yaml` in cwd; return defaults if absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_path = match path {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!("Config file not found: {}", p.display());
                }
                p.to_path_buf()
            }
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path.to_path_buf()
            }
        };

        let contents = std::fs::read_to_string(&file_path)
            .with_context(|| format!("Failed to read config file: {}", file_path.display()))?;

        let config: LedgerConfig = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", file_path.display()))?;

        Ok(config)
    }

    /// Override fields from `RUNLEDGER_*` environment variables.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var("RUNLEDGER_STORAGE_DIR") {
            self.storage_dir = Some(PathBuf::from(dir));
        }
        if let Ok(url) = std::env::var("RUNLEDGER_NOTIFY_WEBHOOK") {
            self.notify_webhook = Some(url);
        }
        if let Ok(filter) = std::env::var("RUNLEDGER_LOG_FILTER") {
            self.log_filter = Some(filter);
        }
        self
    }

    /// Config with only the storage directory set.
    pub fn with_storage_dir(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: Some(storage_dir.into()),
            ..Self::default()
        }
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.storage_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR))
    }

    pub fn publish_run_dir(&self) -> bool {
        self.publish_run_dir.unwrap_or(true)
    }

    pub fn cancel_on_ctrl_c(&self) -> bool {
        self.cancel_on_ctrl_c.unwrap_or(false)
    }
}
