use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::engine::types::GitStatus;
use crate::hooks::GitStatusProvider;

/// Reads git state by running the `git` binary.
pub struct CommandGit {
    repo_dir: Option<PathBuf>,
    timeout: Duration,
}

impl Default for CommandGit {
    fn default() -> Self {
        Self {
            repo_dir: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl CommandGit {
    /// Inspect the repository containing the current working directory.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: Some(repo_dir.into()),
            ..Self::default()
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let mut command = tokio::process::Command::new("git");
        command.args(args);
        if let Some(ref dir) = self.repo_dir {
            command.current_dir(dir);
        }

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result?,
            Err(_) => bail!("git {} timed out after {:?}", args.join(" "), self.timeout),
        };
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl GitStatusProvider for CommandGit {
    async fn status(&self) -> Result<GitStatus> {
        let commit = self.git(&["rev-parse", "HEAD"]).await?;
        let porcelain = self.git(&["status", "--porcelain"]).await?;
        Ok(GitStatus {
            commit_hash: Some(commit.trim().to_string()),
            dirty: parse_porcelain(&porcelain),
        })
    }
}

/// Paths listed by `git status --porcelain`, with renames reported by their new name.
fn parse_porcelain(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let path = &line[3..];
            path.rsplit(" -> ").next().unwrap_or(path).to_string()
        })
        .collect()
}

/// Provider for code that does not live in a git checkout.
pub struct NoGit;

#[async_trait]
impl GitStatusProvider for NoGit {
    async fn status(&self) -> Result<GitStatus> {
        Ok(GitStatus::default())
    }
}
