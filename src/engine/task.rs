use std::any::Any;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::document::{Map, Symbol, Value};
use crate::engine::{Ledger, executor, rundir};
use crate::engine::types::{RunQuery, RunRecord, qualified_name};
use crate::error::LedgerError;
use crate::groups;

/// Keyword flag asking for the run id alongside the result.
pub const RETURN_RUN_ID: &str = "return_run_id";
/// Keyword flag that skips all recording and just calls the operation.
pub const SILENCE_TASK: &str = "silence_task";
/// Argument name that receives the run directory.
pub const RUN_DIR_ARG: &str = "run_dir";
/// Placeholder written to `inputs.json` for arguments that are not persisted.
pub const SKIPPED: &str = "__skipped__";

pub(crate) type Operation = Arc<dyn Fn(Args) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A declared parameter of a task.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<Value>,
}

/// Parameter list a task's call arguments are bound against.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    params: Vec<Param>,
    var_keyword: bool,
}

impl Signature {
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }

    /// Bind positional and keyword arguments to parameter names.
    ///
    /// The result lists declared parameters in declaration order followed by
    /// any extra keywords (only accepted when the signature takes them).
    pub fn bind(&self, args: CallArgs) -> Result<Map, LedgerError> {
        let CallArgs {
            positional,
            mut keyword,
        } = args;

        if positional.len() > self.params.len() {
            return Err(LedgerError::Bind(format!(
                "takes {} positional argument(s) but {} were given",
                self.params.len(),
                positional.len()
            )));
        }

        let mut bound = Map::with_capacity(self.params.len() + keyword.len());
        let given = positional.len();
        for (param, value) in self.params.iter().zip(positional) {
            if keyword.contains_key(&param.name) {
                return Err(LedgerError::Bind(format!(
                    "got multiple values for argument '{}'",
                    param.name
                )));
            }
            bound.insert(param.name.clone(), value);
        }

        for param in &self.params[given..] {
            let value = match keyword.shift_remove(&param.name) {
                Some(v) => v,
                None => param.default.clone().ok_or_else(|| {
                    LedgerError::Bind(format!("missing required argument '{}'", param.name))
                })?,
            };
            bound.insert(param.name.clone(), value);
        }

        if let Some((name, _)) = keyword.first()
            && !self.var_keyword
        {
            return Err(LedgerError::Bind(format!(
                "got an unexpected keyword argument '{}'",
                name
            )));
        }
        bound.extend(keyword);
        Ok(bound)
    }
}

/// Call-time arguments before binding.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keyword: Map,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.keyword.insert(name.to_string(), value.into());
        self
    }

    /// Remove a boolean control flag from the keywords.
    pub(crate) fn take_flag(&mut self, name: &str) -> Result<bool, LedgerError> {
        match self.keyword.shift_remove(name) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(b),
            Some(other) => Err(LedgerError::Bind(format!(
                "'{}' must be a bool, got {:?}",
                name, other
            ))),
        }
    }
}

impl From<Vec<Value>> for CallArgs {
    fn from(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keyword: Map::new(),
        }
    }
}

impl From<Map> for CallArgs {
    fn from(keyword: Map) -> Self {
        Self {
            positional: Vec::new(),
            keyword,
        }
    }
}

/// Bound arguments handed to a task operation.
#[derive(Debug, Clone, Default)]
pub struct Args(Map);

impl Args {
    pub fn new(map: Map) -> Self {
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    fn require(&self, name: &str) -> Result<&Value> {
        self.0
            .get(name)
            .with_context(|| format!("missing argument '{}'", name))
    }

    pub fn i64(&self, name: &str) -> Result<i64> {
        self.require(name)?
            .as_i64()
            .with_context(|| format!("argument '{}' is not an integer", name))
    }

    pub fn f64(&self, name: &str) -> Result<f64> {
        self.require(name)?
            .as_f64()
            .with_context(|| format!("argument '{}' is not a number", name))
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        self.require(name)?
            .as_bool()
            .with_context(|| format!("argument '{}' is not a bool", name))
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        self.require(name)?
            .as_str()
            .with_context(|| format!("argument '{}' is not a string", name))
    }

    /// Borrow an opaque argument as `T` (e.g. a loaded `Table`).
    pub fn downcast<T: Any>(&self, name: &str) -> Result<&T> {
        self.require(name)?.downcast_ref::<T>().with_context(|| {
            format!(
                "argument '{}' is not a {}",
                name,
                std::any::type_name::<T>()
            )
        })
    }

    /// The run directory, when the task declares a `run_dir` parameter.
    pub fn run_dir(&self) -> Option<PathBuf> {
        self.0.get(RUN_DIR_ARG).and_then(Value::as_str).map(PathBuf::from)
    }

    pub fn as_map(&self) -> &Map {
        &self.0
    }

    pub fn into_map(self) -> Map {
        self.0
    }
}

/// Result of a task call.
#[derive(Debug, Clone)]
pub struct TaskReturn {
    pub value: Value,
    /// Set when the call passed `return_run_id = true` and the run was recorded.
    pub run_id: Option<u64>,
}

/// Declares a task: its identity, parameters and operation.
pub struct TaskBuilder {
    ledger: Arc<Ledger>,
    module: String,
    function: String,
    signature: Signature,
    no_dump: Vec<String>,
    no_load: Vec<String>,
    source: Option<String>,
}

impl TaskBuilder {
    pub(crate) fn new(ledger: Arc<Ledger>, module: &str, function: &str) -> Self {
        Self {
            ledger,
            module: module.to_string(),
            function: function.to_string(),
            signature: Signature::default(),
            no_dump: Vec::new(),
            no_load: Vec::new(),
            source: None,
        }
    }

    /// Declare a required parameter.
    pub fn param(mut self, name: &str) -> Self {
        self.signature.params.push(Param {
            name: name.to_string(),
            default: None,
        });
        self
    }

    /// Declare a parameter with a default value.
    pub fn param_default(mut self, name: &str, default: impl Into<Value>) -> Self {
        self.signature.params.push(Param {
            name: name.to_string(),
            default: Some(default.into()),
        });
        self
    }

    /// Accept keyword arguments beyond the declared parameters.
    pub fn var_keyword(mut self) -> Self {
        self.signature.var_keyword = true;
        self
    }

    /// Arguments replaced by a placeholder in `inputs.json`.
    pub fn no_dump<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.no_dump.extend(names.into_iter().map(Into::into));
        self
    }

    /// Arguments passed to the operation as-is, without loading artifacts.
    pub fn no_load<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.no_load.extend(names.into_iter().map(Into::into));
        self
    }

    /// Source text snapshotted into `source.rs` for every run (for entry-point tasks).
    pub fn entry_point_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Finish the declaration with the operation to run.
    pub fn build<F, Fut, R>(self, op: F) -> Task
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Into<Value>,
    {
        let operation: Operation = Arc::new(move |args: Args| {
            op(args)
                .map(|r| r.map(|v| -> Value { v.into() }))
                .boxed()
        });
        let task_dir = rundir::task_dir(&self.ledger.storage_dir(), &self.module, &self.function);
        Task {
            inner: Arc::new(TaskInner {
                ledger: self.ledger,
                module: self.module,
                function: self.function,
                task_dir,
                signature: self.signature,
                no_dump: self.no_dump,
                no_load: self.no_load,
                source: self.source,
                operation,
            }),
        }
    }
}

pub(crate) struct TaskInner {
    pub(crate) ledger: Arc<Ledger>,
    pub(crate) module: String,
    pub(crate) function: String,
    pub(crate) task_dir: PathBuf,
    pub(crate) signature: Signature,
    pub(crate) no_dump: Vec<String>,
    pub(crate) no_load: Vec<String>,
    pub(crate) source: Option<String>,
    pub(crate) operation: Operation,
}

/// A named operation whose invocations are recorded as versioned runs.
///
/// Cloning is cheap; clones share the declaration.
#[derive(Clone)]
pub struct Task {
    pub(crate) inner: Arc<TaskInner>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name())
            .field("task_dir", &self.inner.task_dir)
            .finish()
    }
}

impl Task {
    pub fn module(&self) -> &str {
        &self.inner.module
    }

    pub fn function(&self) -> &str {
        &self.inner.function
    }

    /// Qualified name, `module::function`.
    pub fn name(&self) -> String {
        qualified_name(&self.inner.module, &self.inner.function)
    }

    pub fn task_dir(&self) -> &Path {
        &self.inner.task_dir
    }

    pub fn signature(&self) -> &Signature {
        &self.inner.signature
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.inner.ledger
    }

    /// Reference to this task usable as a document value.
    pub fn symbol(&self) -> Symbol {
        Symbol::new(self.module(), self.function(), self.clone())
    }

    /// Make this task resolvable from documents through the ledger's symbol table.
    pub fn export(&self) -> Symbol {
        self.inner
            .ledger
            .symbols()
            .register(self.module(), self.function(), self.clone())
    }

    pub fn last_run_id(&self) -> Result<Option<u64>> {
        rundir::latest_run_id(&self.inner.task_dir)
    }

    fn resolve_run_id(&self, run_id: Option<u64>) -> Result<u64> {
        match run_id {
            Some(id) => Ok(id),
            None => self
                .last_run_id()?
                .ok_or_else(|| LedgerError::NoRuns(self.name()).into()),
        }
    }

    /// Directory of run `run_id`, or of the latest run.
    pub fn run_dir(&self, run_id: Option<u64>) -> Result<PathBuf> {
        Ok(rundir::run_dir(&self.inner.task_dir, self.resolve_run_id(run_id)?))
    }

    /// Decoded `inputs.json`; `load` also reads every referenced artifact.
    pub fn inputs(&self, run_id: Option<u64>, load: bool) -> Result<Value> {
        self.group(run_id, "inputs", load)
    }

    /// Decoded `outputs.json`; `load` also reads every referenced artifact.
    pub fn outputs(&self, run_id: Option<u64>, load: bool) -> Result<Value> {
        self.group(run_id, "outputs", load)
    }

    /// Decoded `<group>.json` of a run.
    pub fn group(&self, run_id: Option<u64>, group: &str, load: bool) -> Result<Value> {
        groups::check_name(group)?;
        let run_dir = self.run_dir(run_id)?;
        self.inner
            .ledger
            .codec()
            .load_resolved(&groups::group_path(&run_dir, group), load)
    }

    /// Raw text of a run's `task.log`.
    pub fn log(&self, run_id: Option<u64>) -> Result<String> {
        executor::read_log(&self.run_dir(run_id)?)
    }

    /// A run's `meta.json`.
    pub fn meta(&self, run_id: Option<u64>) -> Result<serde_json::Value> {
        executor::read_meta(&self.run_dir(run_id)?)
    }

    /// Runs of this task recorded in the index.
    pub async fn runs(&self) -> Result<Vec<RunRecord>> {
        self.inner.ledger.runs(&RunQuery::task(self.name())).await
    }

    /// Write an artifact group into `run_dir`.
    pub fn dump(
        &self,
        value: &Value,
        run_dir: &Path,
        group: &str,
        overwrite: bool,
    ) -> Result<serde_json::Value> {
        groups::dump(self.inner.ledger.codec(), value, run_dir, group, overwrite)
    }

    /// Delete the artifacts of a group of run `run_id`. The group document is kept.
    pub fn rm_artifacts(&self, group: &str, run_id: u64) -> Result<()> {
        let run_dir = rundir::run_dir(&self.inner.task_dir, run_id);
        groups::remove(self.inner.ledger.codec(), &run_dir, group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map;

    fn signature() -> Signature {
        Signature {
            params: vec![
                Param {
                    name: "a".into(),
                    default: None,
                },
                Param {
                    name: "b".into(),
                    default: Some(Value::from(10)),
                },
            ],
            var_keyword: false,
        }
    }

    #[test]
    fn binds_positional_then_defaults() {
        let bound = signature().bind(CallArgs::new().arg(1)).unwrap();
        assert_eq!(bound, map! { "a" => 1, "b" => 10 });
    }

    #[test]
    fn keywords_fill_by_name_in_declaration_order() {
        let bound = signature()
            .bind(CallArgs::new().kwarg("b", 2).kwarg("a", 1))
            .unwrap();
        let keys: Vec<&str> = bound.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn binding_errors() {
        let sig = signature();
        assert!(sig.bind(CallArgs::new()).is_err());
        assert!(sig.bind(CallArgs::new().arg(1).arg(2).arg(3)).is_err());
        assert!(sig.bind(CallArgs::new().arg(1).kwarg("a", 2)).is_err());
        let err = sig.bind(CallArgs::new().arg(1).kwarg("c", 2)).unwrap_err();
        assert!(err.to_string().contains("unexpected keyword argument 'c'"));
    }

    #[test]
    fn var_keyword_collects_extras() {
        let mut sig = signature();
        sig.var_keyword = true;
        let bound = sig.bind(CallArgs::new().arg(1).kwarg("c", 3)).unwrap();
        assert_eq!(bound, map! { "a" => 1, "b" => 10, "c" => 3 });
    }

    #[test]
    fn flags_must_be_bool() {
        let mut args = CallArgs::new().kwarg(RETURN_RUN_ID, true).kwarg(SILENCE_TASK, "yes");
        assert!(args.take_flag(RETURN_RUN_ID).unwrap());
        assert!(args.take_flag(SILENCE_TASK).is_err());
        assert!(!args.take_flag("absent").unwrap());
    }
}
