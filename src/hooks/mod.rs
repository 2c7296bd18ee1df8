//! Collaborators the run lifecycle consults but does not own: git status,
//! environment metadata, per-run log capture and notifications.
//!
//! Every hook except the log sink is best-effort. The lifecycle logs their
//! failures and carries on.

pub mod env;
pub mod git;
pub mod logging;
pub mod notify;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::engine::types::{EnvironmentSnapshot, GitStatus};

pub use self::env::SystemEnvironment;
pub use self::git::{CommandGit, NoGit};
pub use self::logging::FileLogSink;
pub use self::notify::{LogNotifier, WebhookNotifier};

#[async_trait]
pub trait GitStatusProvider: Send + Sync {
    /// Current commit and dirty files of the working tree.
    async fn status(&self) -> Result<GitStatus>;
}

pub trait EnvironmentProvider: Send + Sync {
    fn snapshot(&self) -> EnvironmentSnapshot;
}

pub trait LogSink: Send + Sync {
    /// Prepare a subscriber that writes to `log_path` for the duration of a run.
    fn init(&self, log_path: &Path) -> Result<tracing::Dispatch>;
}

/// Fire-and-forget run notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn on_start(&self, task: &str, run_id: u64) -> Result<()>;

    async fn on_success(&self, task: &str, run_id: u64) -> Result<()>;

    async fn on_error(&self, task: &str, run_id: u64, message: &str) -> Result<()>;
}
