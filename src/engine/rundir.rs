//! Versioned run directories: `<task_dir>/_runs/<run_id>/`.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

use crate::error::LedgerError;

const RUNS_DIR: &str = "_runs";

/// Root directory of a task. The crate-root segment of the module path is
/// dropped (`demo::stats::mean` lives under `tasks/stats/mean`), except for
/// `__main__`, which is kept.
pub fn task_dir(storage_dir: &Path, module: &str, function: &str) -> PathBuf {
    let segments: Vec<&str> = module
        .split("::")
        .flat_map(|s| s.split('.'))
        .filter(|s| !s.is_empty())
        .collect();
    let skip = match segments.first() {
        Some(&"__main__") | None => 0,
        Some(_) => 1,
    };

    let mut dir = storage_dir.join("tasks");
    for segment in &segments[skip..] {
        dir.push(segment);
    }
    dir.push(function);
    dir
}

/// Path of run `run_id`. Pure composition, no I/O.
pub fn run_dir(task_dir: &Path, run_id: u64) -> PathBuf {
    task_dir.join(RUNS_DIR).join(run_id.to_string())
}

/// Highest numeric run directory under `task_dir/_runs`, if any.
/// Entries that are not plain non-negative integers are ignored.
pub fn latest_run_id(task_dir: &Path) -> Result<Option<u64>> {
    let base = task_dir.join(RUNS_DIR);
    let entries = match std::fs::read_dir(&base) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to list {}", base.display()));
        }
    };

    let mut latest = None;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        if let Ok(id) = name.parse::<u64>() {
            latest = latest.max(Some(id));
        }
    }
    Ok(latest)
}

/// Candidate id for a new run: one past the latest, or 0.
pub fn next_run_id(task_dir: &Path) -> Result<u64> {
    Ok(latest_run_id(task_dir)?.map_or(0, |id| id + 1))
}

/// Create a fresh run directory. An existing directory at that path is a
/// [`LedgerError::RunCollision`]; there is no retry.
pub fn create_run_dir(run_dir: &Path) -> Result<()> {
    if let Some(parent) = run_dir.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    match std::fs::create_dir(run_dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(LedgerError::RunCollision(run_dir.to_path_buf()).into())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to create {}", run_dir.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_dir_drops_crate_root() {
        let root = Path::new("/store");
        assert_eq!(
            task_dir(root, "demo::stats", "mean"),
            PathBuf::from("/store/tasks/stats/mean")
        );
        assert_eq!(task_dir(root, "demo", "add"), PathBuf::from("/store/tasks/add"));
        assert_eq!(
            task_dir(root, "__main__", "add"),
            PathBuf::from("/store/tasks/__main__/add")
        );
        assert_eq!(
            task_dir(root, "pkg.sub.mod", "f"),
            PathBuf::from("/store/tasks/sub/mod/f")
        );
    }

    #[test]
    fn latest_ignores_non_numeric_entries() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(latest_run_id(dir.path()).unwrap(), None);

        let runs = dir.path().join("_runs");
        std::fs::create_dir_all(&runs).unwrap();
        assert_eq!(latest_run_id(dir.path()).unwrap(), None);
        assert_eq!(next_run_id(dir.path()).unwrap(), 0);

        for name in ["0", "2", "10", "scratch", "3_old", "-1"] {
            std::fs::create_dir(runs.join(name)).unwrap();
        }
        std::fs::write(runs.join("99"), "not a dir").unwrap();

        assert_eq!(latest_run_id(dir.path()).unwrap(), Some(10));
        assert_eq!(next_run_id(dir.path()).unwrap(), 11);
    }

    #[test]
    fn existing_directory_is_a_collision() {
        let dir = tempfile::tempdir().unwrap();
        let target = run_dir(dir.path(), 0);
        create_run_dir(&target).unwrap();
        let err = create_run_dir(&target).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::RunCollision(p)) if *p == target
        ));
    }
}
