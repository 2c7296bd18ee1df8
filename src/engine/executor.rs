use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::instrument::WithSubscriber;
use tracing::{error, info, warn};

use crate::cli::config::LedgerConfig;
use crate::document::{Map, Value, write_json};
use crate::engine::task::{
    Args, CallArgs, RETURN_RUN_ID, RUN_DIR_ARG, SILENCE_TASK, SKIPPED, Task, TaskReturn,
};
use crate::engine::types::{EnvironmentSnapshot, GitStatus, RunRecord, RunStatus, RunUpdate};
use crate::engine::{RANK_0_RUN_DIR_VAR, rundir};
use crate::error::LedgerError;

pub const META_FILE: &str = "meta.json";
pub const INPUTS_FILE: &str = "inputs.json";
pub const OUTPUTS_FILE: &str = "outputs.json";
pub const LOG_FILE: &str = "task.log";
pub const SOURCE_FILE: &str = "source.rs";

const START_TIME_FORMAT: &str = "%y-%m-%d_%H-%M-%S-%6f";

/// Contents of `meta.json`.
#[derive(Debug, Serialize)]
struct RunMeta<'a> {
    start_time: String,
    run_id: u64,
    module: &'a str,
    #[serde(rename = "fn")]
    function: &'a str,
    hostname: &'a str,
    platform: &'a str,
    runtime_version: &'a str,
    slurm_job_id: Option<&'a str>,
    git: Option<&'a GitStatus>,
    dependencies: &'a IndexMap<String, String>,
    config: &'a LedgerConfig,
}

impl Task {
    /// Run the task, recording the invocation as a new run.
    ///
    /// With `cancel_on_ctrl_c` set in the config, Ctrl-C during the run marks
    /// it `interrupted` and returns [`LedgerError::Interrupted`].
    pub async fn call(&self, args: impl Into<CallArgs>) -> Result<TaskReturn> {
        let watch_ctrl_c = self.ledger().config().cancel_on_ctrl_c();
        self.call_with_cancel(args, async move {
            if !watch_ctrl_c || tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Like [`Task::call`], but the run is interrupted when `cancel` completes.
    pub async fn call_with_cancel<C>(
        &self,
        args: impl Into<CallArgs>,
        cancel: C,
    ) -> Result<TaskReturn>
    where
        C: Future<Output = ()> + Send,
    {
        let mut cancel = std::pin::pin!(cancel);
        let mut args = args.into();
        let return_run_id = args.take_flag(RETURN_RUN_ID)?;
        let silence = args.take_flag(SILENCE_TASK)?;
        self.reserve_run_dir_arg(&mut args);
        let mut bound = self.inner.signature.bind(args)?;

        let ledger = self.ledger().clone();
        let rank = ledger.rank();
        if silence || !rank.is_primary() {
            if !rank.is_primary()
                && let Some(ref dir) = rank.rank0_run_dir
            {
                self.substitute_run_dir(&mut bound, dir);
            }
            let resolved = ledger.codec().resolve_map(bound, &self.inner.no_load)?;
            let value = until_cancelled(self.invoke(resolved, None), cancel.as_mut()).await?;
            return Ok(TaskReturn { value, run_id: None });
        }

        let name = self.name();
        let env = ledger.environment.snapshot();
        let start_time = Utc::now();
        let proposed = rundir::next_run_id(self.task_dir())?;
        let record = RunRecord::new(self.module(), self.function(), proposed, start_time, &env);
        let run_id = ledger.index().create_run(&record).await?;

        let run_dir = rundir::run_dir(self.task_dir(), run_id);
        rundir::create_run_dir(&run_dir)?;
        if ledger.config().publish_run_dir() {
            // SAFETY: the variable is only published by the primary before the
            // operation starts; callers in threaded programs disable publishing.
            unsafe { std::env::set_var(RANK_0_RUN_DIR_VAR, &run_dir) };
        }
        self.substitute_run_dir(&mut bound, &run_dir);

        let mut dispatch = None;
        let result = until_cancelled(
            self.record_run(run_id, &run_dir, &env, start_time, bound, &mut dispatch),
            cancel.as_mut(),
        )
        .await;

        match result {
            Ok(value) => {
                ledger
                    .index()
                    .update_run(&name, run_id, &RunUpdate::terminal(RunStatus::Success))
                    .await?;
                if let Err(e) = ledger.notifier.on_success(&name, run_id).await {
                    warn!(task = %name, run_id = run_id, error = %e,
                        "Success notification failed");
                }
                in_run_log(dispatch.as_ref(), || {
                    info!(task = %name, run_id = run_id, "Task completed successfully")
                });
                Ok(TaskReturn {
                    value,
                    run_id: return_run_id.then_some(run_id),
                })
            }
            Err(err) => {
                let trace = format!("{:?}", err);
                if let Err(e) = ledger.notifier.on_error(&name, run_id, &trace).await {
                    warn!(task = %name, run_id = run_id, error = %e,
                        "Error notification failed");
                }
                let status = if is_interrupted(&err) {
                    RunStatus::Interrupted
                } else {
                    RunStatus::Failure
                };
                if let Err(e) = ledger
                    .index()
                    .update_run(&name, run_id, &RunUpdate::terminal(status))
                    .await
                {
                    error!(task = %name, run_id = run_id, error = %e,
                        "Failed to record terminal status");
                }
                in_run_log(dispatch.as_ref(), || {
                    error!(task = %name, run_id = run_id, status = %status,
                        "Task failed:\n{}", trace)
                });
                Err(err)
            }
        }
    }

    /// Everything between directory allocation and the terminal transition.
    async fn record_run(
        &self,
        run_id: u64,
        run_dir: &Path,
        env: &EnvironmentSnapshot,
        start_time: DateTime<Utc>,
        bound: Map,
        dispatch: &mut Option<tracing::Dispatch>,
    ) -> Result<Value> {
        let ledger = self.ledger();
        let name = self.name();

        let git = match ledger.git.status().await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(task = %name, error = %e, "Could not capture git status");
                None
            }
        };
        let mut update = RunUpdate {
            run_dir: Some(run_dir.to_path_buf()),
            ..Default::default()
        };
        if let Some(ref g) = git {
            update.git_commit = g.commit_hash.clone();
            update.git_dirty = Some(!g.dirty.is_empty());
        }
        ledger.index().update_run(&name, run_id, &update).await?;

        let meta = RunMeta {
            start_time: start_time.format(START_TIME_FORMAT).to_string(),
            run_id,
            module: self.module(),
            function: self.function(),
            hostname: &env.hostname,
            platform: &env.platform,
            runtime_version: &env.runtime_version,
            slurm_job_id: env.slurm_job_id.as_deref(),
            git: git.as_ref(),
            dependencies: &env.dependencies,
            config: ledger.config(),
        };
        write_json(&run_dir.join(META_FILE), &meta)?;

        if let Some(ref source) = self.inner.source
            && let Err(e) = std::fs::write(run_dir.join(SOURCE_FILE), source)
        {
            warn!(task = %name, error = %e, "Could not snapshot entry-point source");
        }

        let inputs: Map = bound
            .iter()
            .map(|(k, v)| {
                let v = if self.inner.no_dump.contains(k) {
                    Value::from(SKIPPED)
                } else {
                    v.clone()
                };
                (k.clone(), v)
            })
            .collect();
        ledger
            .codec()
            .dump(&Value::Map(inputs), &run_dir.join(INPUTS_FILE), run_dir)?;

        let run_log = ledger.log_sink.init(&run_dir.join(LOG_FILE))?;
        *dispatch = Some(run_log.clone());
        if let Err(e) = ledger.notifier.on_start(&name, run_id).await {
            warn!(task = %name, run_id = run_id, error = %e, "Start notification failed");
        }
        in_run_log(Some(&run_log), || {
            info!(task = %name, run_id = run_id, run_dir = %run_dir.display(), "Running task")
        });

        let resolved = ledger.codec().resolve_map(bound, &self.inner.no_load)?;
        let value = self.invoke(resolved, Some(run_log)).await?;

        if !value.is_null() {
            ledger
                .codec()
                .dump(&value, &run_dir.join(OUTPUTS_FILE), run_dir)?;
        }
        Ok(value)
    }

    /// Start the operation, routing its events to `dispatch` when given.
    fn invoke(
        &self,
        args: Map,
        dispatch: Option<tracing::Dispatch>,
    ) -> BoxFuture<'static, Result<Value>> {
        let op = (self.inner.operation)(Args::new(args));
        match dispatch {
            Some(d) => op.with_subscriber(d).boxed(),
            None => op,
        }
    }

    /// Let a declared `run_dir` parameter go unsupplied; the lifecycle fills it.
    fn reserve_run_dir_arg(&self, args: &mut CallArgs) {
        let Some(pos) = self
            .signature()
            .params()
            .iter()
            .position(|p| p.name == RUN_DIR_ARG)
        else {
            return;
        };
        if pos >= args.positional.len() && !args.keyword.contains_key(RUN_DIR_ARG) {
            args.keyword.insert(RUN_DIR_ARG.to_string(), Value::Null);
        }
    }

    fn substitute_run_dir(&self, bound: &mut Map, run_dir: &Path) {
        if self.signature().has_param(RUN_DIR_ARG) {
            bound.insert(
                RUN_DIR_ARG.to_string(),
                Value::from(run_dir.display().to_string()),
            );
        }
    }
}

/// Drive `fut` to completion unless `cancel` fires first.
async fn until_cancelled<T, F, C>(fut: F, cancel: Pin<&mut C>) -> Result<T>
where
    F: Future<Output = Result<T>>,
    C: Future<Output = ()>,
{
    tokio::select! {
        result = fut => result,
        _ = cancel => Err(LedgerError::Interrupted.into()),
    }
}

/// Raw text of the run log in `run_dir`.
pub(crate) fn read_log(run_dir: &Path) -> Result<String> {
    let path = run_dir.join(LOG_FILE);
    std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read log: {}", path.display()))
}

/// Parsed `meta.json` of the run in `run_dir`.
pub(crate) fn read_meta(run_dir: &Path) -> Result<serde_json::Value> {
    let path = run_dir.join(META_FILE);
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read metadata: {}", path.display()))?;
    Ok(serde_json::from_str(&text)?)
}

fn in_run_log<F: FnOnce()>(dispatch: Option<&tracing::Dispatch>, f: F) {
    match dispatch {
        Some(d) => tracing::dispatcher::with_default(d, f),
        None => f(),
    }
}

fn is_interrupted(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<LedgerError>(), Some(LedgerError::Interrupted)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context as _;

    #[test]
    fn interruption_is_found_through_context() {
        let err: anyhow::Error = LedgerError::Interrupted.into();
        assert!(is_interrupted(&err));
        let wrapped = Err::<(), _>(err).context("while training").unwrap_err();
        assert!(is_interrupted(&wrapped));
        assert!(!is_interrupted(&anyhow::anyhow!("boom")));
    }

    #[test]
    fn start_time_format() {
        let t = DateTime::parse_from_rfc3339("2024-03-05T07:08:09.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(t.format(START_TIME_FORMAT).to_string(), "24-03-05_07-08-09-123456");
    }
}
