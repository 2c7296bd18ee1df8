use std::path::PathBuf;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Status of a task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Success,
    Failure,
    Interrupted,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::InProgress)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::InProgress => write!(f, "in_progress"),
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failure => write!(f, "failure"),
            RunStatus::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(RunStatus::InProgress),
            "success" => Ok(RunStatus::Success),
            "failure" => Ok(RunStatus::Failure),
            "interrupted" => Ok(RunStatus::Interrupted),
            _ => Err(anyhow::anyhow!("Invalid run status: {}", s)),
        }
    }
}

/// Git state of the working tree a run was started from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitStatus {
    pub commit_hash: Option<String>,
    pub dirty: Vec<String>,
}

/// Process and host metadata captured when a run starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub hostname: String,
    pub platform: String,
    pub runtime_version: String,
    #[serde(default)]
    pub dependencies: IndexMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slurm_job_id: Option<String>,
}

/// One row of the run index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Qualified task name, `module::function`.
    pub task: String,
    pub module: String,
    #[serde(rename = "fn")]
    pub function: String,
    pub run_id: u64,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_dir: Option<PathBuf>,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_dirty: Option<bool>,
    pub hostname: String,
    pub platform: String,
    pub runtime_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slurm_job_id: Option<String>,
}

impl RunRecord {
    pub fn new(
        module: &str,
        function: &str,
        run_id: u64,
        start_time: DateTime<Utc>,
        env: &EnvironmentSnapshot,
    ) -> Self {
        Self {
            task: qualified_name(module, function),
            module: module.to_string(),
            function: function.to_string(),
            run_id,
            status: RunStatus::InProgress,
            run_dir: None,
            start_time,
            end_time: None,
            git_commit: None,
            git_dirty: None,
            hostname: env.hostname.clone(),
            platform: env.platform.clone(),
            runtime_version: env.runtime_version.clone(),
            slurm_job_id: env.slurm_job_id.clone(),
        }
    }

    /// Apply the set fields of `update`.
    pub fn apply(&mut self, update: &RunUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(ref dir) = update.run_dir {
            self.run_dir = Some(dir.clone());
        }
        if let Some(end) = update.end_time {
            self.end_time = Some(end);
        }
        if let Some(ref commit) = update.git_commit {
            self.git_commit = Some(commit.clone());
        }
        if let Some(dirty) = update.git_dirty {
            self.git_dirty = Some(dirty);
        }
    }
}

/// Partial update of a run record; `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct RunUpdate {
    pub status: Option<RunStatus>,
    pub run_dir: Option<PathBuf>,
    pub end_time: Option<DateTime<Utc>>,
    pub git_commit: Option<String>,
    pub git_dirty: Option<bool>,
}

impl RunUpdate {
    pub fn terminal(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            end_time: Some(Utc::now()),
            ..Default::default()
        }
    }
}

/// Filter for [`crate::storage::RunIndex::query_runs`].
#[derive(Debug, Clone, Default)]
pub struct RunQuery {
    pub task: Option<String>,
    pub run_ids: Option<Vec<u64>>,
    pub status: Option<RunStatus>,
}

impl RunQuery {
    pub fn task(task: impl Into<String>) -> Self {
        Self {
            task: Some(task.into()),
            ..Default::default()
        }
    }

    pub fn with_run_ids(mut self, run_ids: Vec<u64>) -> Self {
        self.run_ids = Some(run_ids);
        self
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, record: &RunRecord) -> bool {
        self.task.as_ref().is_none_or(|t| *t == record.task)
            && self
                .run_ids
                .as_ref()
                .is_none_or(|ids| ids.contains(&record.run_id))
            && self.status.is_none_or(|s| s == record.status)
    }
}

pub fn qualified_name(module: &str, function: &str) -> String {
    format!("{}::{}", module, function)
}
