use indexmap::IndexMap;

use crate::engine::types::EnvironmentSnapshot;
use crate::hooks::EnvironmentProvider;

/// Reads host metadata from the running process.
#[derive(Debug, Clone, Default)]
pub struct SystemEnvironment {
    dependencies: IndexMap<String, String>,
}

impl SystemEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dependency versions to record in every run's metadata.
    pub fn with_dependencies<I, K, V>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.dependencies
            .extend(deps.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

impl EnvironmentProvider for SystemEnvironment {
    fn snapshot(&self) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            hostname: hostname(),
            platform: format!(
                "{}-{}-{}",
                std::env::consts::OS,
                std::env::consts::ARCH,
                std::env::consts::FAMILY
            ),
            runtime_version: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            dependencies: self.dependencies.clone(),
            slurm_job_id: std::env::var("SLURM_JOB_ID").ok(),
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string())
}
