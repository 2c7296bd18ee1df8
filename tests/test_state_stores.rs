//! Tests for RunIndex implementations: JsonRunIndex and MemoryRunIndex.

use chrono::Utc;

use runledger::engine::types::*;
use runledger::error::LedgerError;
use runledger::storage::RunIndex;
use runledger::storage::json_store::JsonRunIndex;
use runledger::storage::memory_store::MemoryRunIndex;

fn env() -> EnvironmentSnapshot {
    EnvironmentSnapshot {
        hostname: "node-1".into(),
        platform: "linux-x86_64-unix".into(),
        runtime_version: "runledger 0.1.0".into(),
        ..Default::default()
    }
}

fn record(function: &str, run_id: u64) -> RunRecord {
    RunRecord::new("pipeline::train", function, run_id, Utc::now(), &env())
}

async fn exercise_index(index: &dyn RunIndex) {
    assert_eq!(index.create_run(&record("fit", 0)).await.unwrap(), 0);
    assert_eq!(index.create_run(&record("fit", 1)).await.unwrap(), 1);
    index.create_run(&record("eval", 0)).await.unwrap();

    let fit = index
        .query_runs(&RunQuery::task("pipeline::train::fit"))
        .await
        .unwrap();
    assert_eq!(fit.len(), 2);
    assert_eq!(fit[0].run_id, 0);
    assert_eq!(fit[1].run_id, 1);
    assert!(fit.iter().all(|r| r.status == RunStatus::InProgress));
    assert_eq!(fit[0].hostname, "node-1");

    let update = RunUpdate {
        run_dir: Some("/data/tasks/train/fit/_runs/1".into()),
        git_commit: Some("abc123".into()),
        git_dirty: Some(true),
        ..Default::default()
    };
    index
        .update_run("pipeline::train::fit", 1, &update)
        .await
        .unwrap();
    index
        .update_run("pipeline::train::fit", 1, &RunUpdate::terminal(RunStatus::Success))
        .await
        .unwrap();

    let run = index
        .get_run("pipeline::train::fit", 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert!(run.end_time.is_some());
    assert_eq!(run.git_commit.as_deref(), Some("abc123"));
    assert_eq!(run.git_dirty, Some(true));
    assert!(run.run_dir.is_some());

    let succeeded = index
        .query_runs(&RunQuery::default().with_status(RunStatus::Success))
        .await
        .unwrap();
    assert_eq!(succeeded.len(), 1);

    let all = index.query_runs(&RunQuery::default()).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].task, "pipeline::train::eval");

    assert!(index.get_run("pipeline::train::fit", 9).await.unwrap().is_none());
}

// ===== MemoryRunIndex =====

#[tokio::test]
async fn memory_index_lifecycle() {
    exercise_index(&MemoryRunIndex::new()).await;
}

#[tokio::test]
async fn memory_index_rejects_duplicate_run() {
    let index = MemoryRunIndex::new();
    index.create_run(&record("fit", 0)).await.unwrap();
    let err = index.create_run(&record("fit", 0)).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LedgerError>(),
        Some(LedgerError::RunCollision(_))
    ));
}

#[tokio::test]
async fn memory_index_update_missing_run() {
    let index = MemoryRunIndex::new();
    let err = index
        .update_run("pipeline::train::fit", 3, &RunUpdate::terminal(RunStatus::Failure))
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LedgerError>(),
        Some(LedgerError::RunNotFound { run_id: 3, .. })
    ));
}

// ===== JsonRunIndex =====

#[tokio::test]
async fn json_index_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    exercise_index(&JsonRunIndex::new(dir.path().join("index"))).await;
}

#[tokio::test]
async fn json_index_persists_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index");

    JsonRunIndex::new(&path)
        .create_run(&record("fit", 0))
        .await
        .unwrap();

    let reopened = JsonRunIndex::new(&path);
    let runs = reopened.query_runs(&RunQuery::default()).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].function, "fit");
}

#[tokio::test]
async fn json_index_duplicate_is_collision() {
    let dir = tempfile::tempdir().unwrap();
    let index = JsonRunIndex::new(dir.path());
    index.create_run(&record("fit", 0)).await.unwrap();
    let err = index.create_run(&record("fit", 0)).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LedgerError>(),
        Some(LedgerError::RunCollision(_))
    ));
}

#[tokio::test]
async fn json_index_skips_unreadable_files() {
    let dir = tempfile::tempdir().unwrap();
    let index = JsonRunIndex::new(dir.path());
    index.create_run(&record("fit", 0)).await.unwrap();
    std::fs::write(dir.path().join("garbage.json"), "{not json").unwrap();

    let runs = index.query_runs(&RunQuery::default()).await.unwrap();
    assert_eq!(runs.len(), 1);
}

#[tokio::test]
async fn json_index_empty_dir_returns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let index = JsonRunIndex::new(dir.path().join("missing"));
    assert!(index.query_runs(&RunQuery::default()).await.unwrap().is_empty());
}
