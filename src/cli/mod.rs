pub mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::document::{Value, to_json_string};
use crate::engine::task::Task;
use crate::engine::types::{RunQuery, RunStatus};
use crate::engine::{Args, CallArgs, Ledger};

use self::config::LedgerConfig;

/// Module name of the tasks bundled with the binary.
pub const DEMO_MODULE: &str = "runledger::demo";

#[derive(Parser)]
#[command(
    name = "runledger",
    version,
    about = "Reproducible task runs with versioned run directories"
)]
pub struct Cli {
    /// Path to a .env file to load (default: auto-detect .env in cwd)
    #[arg(long, global = true)]
    dotenv: Option<PathBuf>,

    /// Path to a runledger.yaml config file (default: auto-detect in cwd)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Storage directory holding `tasks/` and the run index
    #[arg(long, global = true, env = "RUNLEDGER_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List recorded runs
    Runs {
        /// Qualified task name, e.g. `mycrate::train::fit`
        #[arg(short, long)]
        task: Option<String>,

        /// Filter by status (in_progress, success, failure, interrupted)
        #[arg(short, long)]
        status: Option<String>,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Show the inputs of a run
    Inputs {
        task: String,
        /// Run id, looked up through the index (default: latest on disk)
        #[arg(long)]
        run_id: Option<u64>,
    },

    /// Show the outputs of a run
    Outputs {
        task: String,
        #[arg(long)]
        run_id: Option<u64>,
    },

    /// Show the metadata of a run
    Meta {
        task: String,
        #[arg(long)]
        run_id: Option<u64>,
    },

    /// Print the log of a run
    Log {
        task: String,
        #[arg(long)]
        run_id: Option<u64>,
    },

    /// Show a named artifact group of a run
    Group {
        task: String,
        group: String,
        #[arg(long)]
        run_id: Option<u64>,
    },

    /// Delete the artifacts of a named group
    RmGroup {
        task: String,
        group: String,
        #[arg(long)]
        run_id: u64,
    },

    /// Run the bundled `add` task
    Add {
        a: i64,
        b: i64,
        /// Skip recording the run
        #[arg(long)]
        silence: bool,
    },
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    load_dotenv(cli.dotenv.as_deref());

    let mut config = LedgerConfig::load(cli.config.as_deref())?.with_env_overrides();
    if let Some(dir) = cli.storage_dir {
        config.storage_dir = Some(dir);
    }
    if config.cancel_on_ctrl_c.is_none() {
        config.cancel_on_ctrl_c = Some(true);
    }
    let ledger = Arc::new(Ledger::new(config));

    match cli.command {
        Commands::Runs {
            task,
            status,
            format,
        } => cmd_runs(&ledger, task, status, format).await,
        Commands::Inputs { task, run_id } => {
            let value = match run_id {
                Some(id) => ledger.inputs(&task, id, false).await?,
                None => lookup(&ledger, &task)?.inputs(None, false)?,
            };
            print_value(&value)
        }
        Commands::Outputs { task, run_id } => {
            let value = match run_id {
                Some(id) => ledger.outputs(&task, id, false).await?,
                None => lookup(&ledger, &task)?.outputs(None, false)?,
            };
            print_value(&value)
        }
        Commands::Meta { task, run_id } => {
            let meta = match run_id {
                Some(id) => ledger.meta(&task, id).await?,
                None => lookup(&ledger, &task)?.meta(None)?,
            };
            println!("{}", to_json_string(&meta)?);
            Ok(())
        }
        Commands::Log { task, run_id } => {
            let log = match run_id {
                Some(id) => ledger.log(&task, id).await?,
                None => lookup(&ledger, &task)?.log(None)?,
            };
            print!("{}", log);
            Ok(())
        }
        Commands::Group {
            task,
            group,
            run_id,
        } => {
            let value = match run_id {
                Some(id) => ledger.group(&task, id, &group, false).await?,
                None => lookup(&ledger, &task)?.group(None, &group, false)?,
            };
            print_value(&value)
        }
        Commands::RmGroup {
            task,
            group,
            run_id,
        } => {
            let task = lookup(&ledger, &task)?;
            task.rm_artifacts(&group, run_id)?;
            println!("Removed artifacts of group '{}' (run {})", group, run_id);
            Ok(())
        }
        Commands::Add { a, b, silence } => cmd_add(&ledger, a, b, silence).await,
    }
}

/// Load environment variables from a .env file.
/// If an explicit path is given, load from that path (warn if missing).
/// Otherwise, auto-detect .env in the current working directory (silently skip if absent).
fn load_dotenv(explicit_path: Option<&Path>) {
    match explicit_path {
        Some(path) => match dotenvy::from_path(path) {
            Ok(()) => info!("Loaded env from {}", path.display()),
            Err(e) => {
                eprintln!(
                    "Warning: Failed to load dotenv file '{}': {}",
                    path.display(),
                    e
                );
            }
        },
        None => match dotenvy::dotenv() {
            Ok(path) => info!("Loaded env from {}", path.display()),
            Err(dotenvy::Error::Io(_)) => {}
            Err(e) => {
                eprintln!("Warning: Failed to parse .env file: {}", e);
            }
        },
    }
}

/// The `add` task shipped with the binary.
pub fn add_task(ledger: &Arc<Ledger>) -> Task {
    ledger
        .task(DEMO_MODULE, "add")
        .param("a")
        .param("b")
        .build(|args: Args| async move {
            let sum = args.i64("a")? + args.i64("b")?;
            info!(sum = sum, "Added");
            Ok::<_, anyhow::Error>(sum)
        })
}

/// Read-only handle for a task recorded by another program.
fn lookup(ledger: &Arc<Ledger>, qualified: &str) -> Result<Task> {
    let (module, function) = qualified
        .rsplit_once("::")
        .with_context(|| format!("Task name must be `module::function`, got '{}'", qualified))?;
    let name = qualified.to_string();
    Ok(ledger.task(module, function).var_keyword().build(move |_: Args| {
        let name = name.clone();
        async move {
            Err::<(), _>(anyhow::anyhow!(
                "Task '{}' cannot be run from the command line",
                name
            ))
        }
    }))
}

async fn cmd_runs(
    ledger: &Ledger,
    task: Option<String>,
    status: Option<String>,
    format: String,
) -> Result<()> {
    let query = RunQuery {
        task,
        run_ids: None,
        status: status.as_deref().map(str::parse::<RunStatus>).transpose()?,
    };
    let runs = ledger.runs(&query).await?;

    if runs.is_empty() {
        println!("No runs found.");
        return Ok(());
    }

    if format == "json" {
        println!("{}", to_json_string(&runs)?);
        return Ok(());
    }

    println!(
        "{:<40} {:>6} {:<12} {:<20} {:<10}",
        "TASK", "RUN", "STATUS", "STARTED", "COMMIT"
    );
    println!("{}", "-".repeat(92));

    for run in &runs {
        let commit = run
            .git_commit
            .as_deref()
            .map(|c| &c[..c.len().min(8)])
            .unwrap_or("-");
        println!(
            "{:<40} {:>6} {:<12} {:<20} {:<10}",
            run.task,
            run.run_id,
            run.status,
            run.start_time.format("%Y-%m-%d %H:%M:%S"),
            commit
        );
    }

    println!("\nTotal: {} run(s)", runs.len());
    Ok(())
}

async fn cmd_add(ledger: &Arc<Ledger>, a: i64, b: i64, silence: bool) -> Result<()> {
    let task = add_task(ledger);
    let args = CallArgs::new()
        .arg(a)
        .arg(b)
        .kwarg("return_run_id", true)
        .kwarg("silence_task", silence);
    let ret = task.call(args).await?;

    print_value(&ret.value)?;
    if let Some(run_id) = ret.run_id {
        println!("Run {} recorded in {}", run_id, task.run_dir(Some(run_id))?.display());
    }
    Ok(())
}

fn print_value(value: &Value) -> Result<()> {
    println!("{}", to_json_string(&display_json(value))?);
    Ok(())
}

/// JSON view of a decoded document for printing; artifacts stay as references.
fn display_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Value::Number(n.clone()),
        Value::NonFinite(n) => serde_json::Value::String(n.to_string()),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => serde_json::Value::Array(items.iter().map(display_json).collect()),
        Value::Map(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), display_json(v)))
                .collect(),
        ),
        Value::Artifact(a) => a.to_reference(),
        Value::Symbol(s) => serde_json::Value::String(format!("{}::{}", s.module(), s.name())),
        Value::Opaque(o) => serde_json::Value::String(format!("<{}>", o.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map;

    #[test]
    fn display_keeps_structure() {
        let value = Value::Map(map! { "a" => 1, "b" => vec![Value::from("x")] });
        assert_eq!(
            display_json(&value),
            serde_json::json!({"a": 1, "b": ["x"]})
        );
    }

    #[test]
    fn cli_parses_query_commands() {
        let cli = Cli::try_parse_from([
            "runledger",
            "--storage-dir",
            "/tmp/ledger",
            "inputs",
            "demo::add",
            "--run-id",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.storage_dir, Some(PathBuf::from("/tmp/ledger")));
        match cli.command {
            Commands::Inputs { task, run_id } => {
                assert_eq!(task, "demo::add");
                assert_eq!(run_id, Some(3));
            }
            _ => panic!("expected inputs"),
        }
    }
}
