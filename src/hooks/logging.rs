use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context as _, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;

use crate::hooks::LogSink;

/// Writes run logs to `task.log`, optionally echoing them to stderr.
#[derive(Debug, Clone)]
pub struct FileLogSink {
    filter: String,
    echo_stderr: bool,
}

impl Default for FileLogSink {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            echo_stderr: true,
        }
    }
}

impl FileLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `EnvFilter` directive applied to the run log, e.g. `"debug"`.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn echo_stderr(mut self, echo: bool) -> Self {
        self.echo_stderr = echo;
        self
    }
}

impl LogSink for FileLogSink {
    fn init(&self, log_path: &Path) -> Result<tracing::Dispatch> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;

        let filter = EnvFilter::try_new(&self.filter)
            .with_context(|| format!("Invalid log filter '{}'", self.filter))?;

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file));
        let stderr_layer = self
            .echo_stderr
            .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(stderr_layer);
        Ok(tracing::Dispatch::new(subscriber))
    }
}
