use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::engine::types::*;
use crate::error::LedgerError;
use crate::storage::{RunIndex, sort_records};

/// In-memory run index. Holds runs only for the lifetime of the instance.
#[derive(Default)]
pub struct MemoryRunIndex {
    runs: Mutex<HashMap<(String, u64), RunRecord>>,
}

impl MemoryRunIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunIndex for MemoryRunIndex {
    async fn create_run(&self, record: &RunRecord) -> Result<u64> {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let key = (record.task.clone(), record.run_id);
        if runs.contains_key(&key) {
            let indexed = PathBuf::from(&record.task).join(record.run_id.to_string());
            return Err(LedgerError::RunCollision(indexed).into());
        }
        runs.insert(key, record.clone());
        Ok(record.run_id)
    }

    async fn update_run(&self, task: &str, run_id: u64, update: &RunUpdate) -> Result<()> {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let record = runs
            .get_mut(&(task.to_string(), run_id))
            .ok_or_else(|| LedgerError::RunNotFound {
                task: task.to_string(),
                run_id,
            })?;
        record.apply(update);
        Ok(())
    }

    async fn query_runs(&self, query: &RunQuery) -> Result<Vec<RunRecord>> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let mut matched: Vec<RunRecord> = runs
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        sort_records(&mut matched);
        Ok(matched)
    }
}
