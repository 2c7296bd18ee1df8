pub mod executor;
pub mod rundir;
pub mod task;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::cli::config::LedgerConfig;
use crate::codec::CodecRegistry;
use crate::document::{DocumentCodec, SymbolTable, Value};
use crate::error::LedgerError;
use crate::groups;
use crate::hooks::{
    CommandGit, EnvironmentProvider, FileLogSink, GitStatusProvider, LogNotifier, LogSink,
    Notifier, SystemEnvironment, WebhookNotifier,
};
use crate::storage::RunIndex;
use crate::storage::json_store::JsonRunIndex;

use self::types::{RunQuery, RunRecord};

pub use self::task::{Args, CallArgs, Task, TaskBuilder, TaskReturn};

pub const LOCAL_RANK_VAR: &str = "LOCAL_RANK";
pub const NODE_RANK_VAR: &str = "NODE_RANK";
pub const RANK_0_RUN_DIR_VAR: &str = "RANK_0_RUN_DIR";

/// Position of this process in a multi-process collective launch.
///
/// Only the primary (local rank 0 on node 0) records runs; every other
/// process calls the operation directly inside the primary's run directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectiveRank {
    pub local_rank: Option<String>,
    pub node_rank: Option<String>,
    pub rank0_run_dir: Option<PathBuf>,
}

impl CollectiveRank {
    pub fn from_env() -> Self {
        Self {
            local_rank: std::env::var(LOCAL_RANK_VAR).ok(),
            node_rank: std::env::var(NODE_RANK_VAR).ok(),
            rank0_run_dir: std::env::var_os(RANK_0_RUN_DIR_VAR).map(PathBuf::from),
        }
    }

    /// A process outside any collective launch.
    pub fn single() -> Self {
        Self::default()
    }

    pub fn is_primary(&self) -> bool {
        match (&self.local_rank, &self.node_rank) {
            (Some(local), Some(node)) => local.trim() == "0" && node.trim() == "0",
            _ => true,
        }
    }
}

/// Shared context for declaring and running tasks: storage location, codecs,
/// run index and hooks.
pub struct Ledger {
    config: LedgerConfig,
    codec: DocumentCodec,
    symbols: Arc<SymbolTable>,
    index: Arc<dyn RunIndex>,
    git: Arc<dyn GitStatusProvider>,
    environment: Arc<dyn EnvironmentProvider>,
    log_sink: Arc<dyn LogSink>,
    notifier: Arc<dyn Notifier>,
    rank: CollectiveRank,
}

impl Ledger {
    /// Ledger with the default collaborators: a JSON run index under
    /// `<storage_dir>/index`, the global codec registry, `git` via the CLI,
    /// a `task.log` file sink and log (or webhook) notifications.
    pub fn new(config: LedgerConfig) -> Self {
        let storage_dir = config.storage_dir();
        let symbols = Arc::new(SymbolTable::new());
        let codec = DocumentCodec::new(CodecRegistry::global(), symbols.clone());

        let mut log_sink = FileLogSink::new();
        if let Some(ref filter) = config.log_filter {
            log_sink = log_sink.with_filter(filter.clone());
        }

        let notifier: Arc<dyn Notifier> = match config.notify_webhook.as_deref() {
            Some(url) => match WebhookNotifier::new(url) {
                Ok(n) => Arc::new(n),
                Err(e) => {
                    warn!(error = %e, "Could not build webhook notifier, falling back to logs");
                    Arc::new(LogNotifier)
                }
            },
            None => Arc::new(LogNotifier),
        };

        Self {
            index: Arc::new(JsonRunIndex::new(storage_dir.join("index"))),
            config,
            codec,
            symbols,
            git: Arc::new(CommandGit::new()),
            environment: Arc::new(SystemEnvironment::new()),
            log_sink: Arc::new(log_sink),
            notifier,
            rank: CollectiveRank::from_env(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<CodecRegistry>) -> Self {
        self.codec = DocumentCodec::new(registry, self.symbols.clone());
        self
    }

    pub fn with_symbols(mut self, symbols: Arc<SymbolTable>) -> Self {
        self.codec = DocumentCodec::new(self.codec.registry().clone(), symbols.clone());
        self.symbols = symbols;
        self
    }

    pub fn with_index(mut self, index: Arc<dyn RunIndex>) -> Self {
        self.index = index;
        self
    }

    pub fn with_git(mut self, git: Arc<dyn GitStatusProvider>) -> Self {
        self.git = git;
        self
    }

    pub fn with_environment(mut self, environment: Arc<dyn EnvironmentProvider>) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_log_sink(mut self, log_sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = log_sink;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_rank(mut self, rank: CollectiveRank) -> Self {
        self.rank = rank;
        self
    }

    /// Start declaring a task named `module::function`.
    pub fn task(self: &Arc<Self>, module: &str, function: &str) -> TaskBuilder {
        TaskBuilder::new(self.clone(), module, function)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.config.storage_dir()
    }

    pub fn codec(&self) -> &DocumentCodec {
        &self.codec
    }

    pub fn registry(&self) -> &Arc<CodecRegistry> {
        self.codec.registry()
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    pub fn index(&self) -> &Arc<dyn RunIndex> {
        &self.index
    }

    pub fn rank(&self) -> &CollectiveRank {
        &self.rank
    }

    /// Runs recorded in the index.
    pub async fn runs(&self, query: &RunQuery) -> Result<Vec<RunRecord>> {
        self.index.query_runs(query).await
    }

    /// Directory of a run, looked up through the index.
    pub async fn run_dir(&self, task: &str, run_id: u64) -> Result<PathBuf> {
        self.index
            .get_run(task, run_id)
            .await?
            .and_then(|r| r.run_dir)
            .ok_or_else(|| {
                LedgerError::RunNotFound {
                    task: task.to_string(),
                    run_id,
                }
                .into()
            })
    }

    /// Decoded `inputs.json` of a run found through the index.
    pub async fn inputs(&self, task: &str, run_id: u64, load: bool) -> Result<Value> {
        self.group(task, run_id, "inputs", load).await
    }

    /// Decoded `outputs.json` of a run found through the index.
    pub async fn outputs(&self, task: &str, run_id: u64, load: bool) -> Result<Value> {
        self.group(task, run_id, "outputs", load).await
    }

    /// Decoded `<group>.json` of a run found through the index; `load` also
    /// reads every referenced artifact.
    pub async fn group(&self, task: &str, run_id: u64, group: &str, load: bool) -> Result<Value> {
        groups::check_name(group)?;
        let run_dir = self.run_dir(task, run_id).await?;
        self.codec
            .load_resolved(&groups::group_path(&run_dir, group), load)
    }

    pub async fn log(&self, task: &str, run_id: u64) -> Result<String> {
        executor::read_log(&self.run_dir(task, run_id).await?)
    }

    pub async fn meta(&self, task: &str, run_id: u64) -> Result<serde_json::Value> {
        executor::read_meta(&self.run_dir(task, run_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank(local: Option<&str>, node: Option<&str>) -> CollectiveRank {
        CollectiveRank {
            local_rank: local.map(String::from),
            node_rank: node.map(String::from),
            rank0_run_dir: None,
        }
    }

    #[test]
    fn primary_detection() {
        assert!(rank(None, None).is_primary());
        assert!(rank(Some("1"), None).is_primary());
        assert!(rank(Some("0"), Some("0")).is_primary());
        assert!(!rank(Some("1"), Some("0")).is_primary());
        assert!(!rank(Some("0"), Some("2")).is_primary());
    }
}
