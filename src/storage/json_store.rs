use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::engine::types::*;
use crate::error::LedgerError;
use crate::storage::{RunIndex, sort_records};

/// File-based run index. Each run is stored as a separate JSON file named
/// after its task and run id.
pub struct JsonRunIndex {
    base_dir: PathBuf,
    lock: RwLock<()>,
}

impl JsonRunIndex {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            lock: RwLock::new(()),
        }
    }

    fn run_path(&self, task: &str, run_id: u64) -> PathBuf {
        let slug: String = task
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '.' })
            .collect();
        self.base_dir.join(format!("{}.{}.json", slug, run_id))
    }

    async fn read_run(&self, path: &Path) -> Result<RunRecord> {
        let data = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read run file: {}", path.display()))?;
        let record: RunRecord = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse run file: {}", path.display()))?;
        Ok(record)
    }

    async fn write_run(&self, path: &Path, record: &RunRecord) -> Result<()> {
        let tmp_path = path.with_extension("json.tmp");

        let data = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, path).await?;

        Ok(())
    }
}

#[async_trait]
impl RunIndex for JsonRunIndex {
    async fn create_run(&self, record: &RunRecord) -> Result<u64> {
        let _lock = self.lock.write().await;

        tokio::fs::create_dir_all(&self.base_dir).await?;

        let path = self.run_path(&record.task, record.run_id);
        if tokio::fs::try_exists(&path).await? {
            return Err(LedgerError::RunCollision(path).into());
        }
        self.write_run(&path, record).await?;
        Ok(record.run_id)
    }

    async fn update_run(&self, task: &str, run_id: u64, update: &RunUpdate) -> Result<()> {
        let _lock = self.lock.write().await;
        let path = self.run_path(task, run_id);
        if !tokio::fs::try_exists(&path).await? {
            bail!(LedgerError::RunNotFound {
                task: task.to_string(),
                run_id,
            });
        }
        let mut record = self.read_run(&path).await?;
        record.apply(update);
        self.write_run(&path, &record).await
    }

    async fn query_runs(&self, query: &RunQuery) -> Result<Vec<RunRecord>> {
        let _lock = self.lock.read().await;

        if !tokio::fs::try_exists(&self.base_dir).await? {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_run(&path).await {
                Ok(record) if query.matches(&record) => runs.push(record),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Skipping unreadable run file"
                    )
                }
            }
        }

        sort_records(&mut runs);
        Ok(runs)
    }
}
