pub mod json_store;
pub mod memory_store;

use anyhow::Result;
use async_trait::async_trait;

use crate::engine::types::*;

/// Index of task runs, queryable by task name and run id.
///
/// The ledger commits to the index when a run is registered, after its
/// directory and metadata are in place, and on the terminal transition.
#[async_trait]
pub trait RunIndex: Send + Sync {
    /// Register a new run. Returns the run id the index recorded.
    async fn create_run(&self, record: &RunRecord) -> Result<u64>;

    /// Apply a partial update to an existing run.
    async fn update_run(&self, task: &str, run_id: u64, update: &RunUpdate) -> Result<()>;

    /// List runs matching `query`, ordered by task then run id.
    async fn query_runs(&self, query: &RunQuery) -> Result<Vec<RunRecord>>;

    /// Fetch a single run.
    async fn get_run(&self, task: &str, run_id: u64) -> Result<Option<RunRecord>> {
        let query = RunQuery::task(task).with_run_ids(vec![run_id]);
        Ok(self.query_runs(&query).await?.into_iter().next())
    }
}

pub(crate) fn sort_records(records: &mut [RunRecord]) {
    records.sort_by(|a, b| a.task.cmp(&b.task).then(a.run_id.cmp(&b.run_id)));
}
