use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::platform;

/// Narrow release API. Any `Err` becomes a failed step; transport details stay
/// inside the implementation.
pub trait RemoteApi: Send + Sync {
    /// Returns the URL of the created release.
    fn create_release(&self, repo: &str, tag: &str, notes: &str) -> Result<String>;
    fn delete_release(&self, repo: &str, tag: &str) -> Result<()>;
}

/// Talks to GitHub through the `gh` CLI, each call bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct GhCliRemote {
    timeout: Duration,
}

impl GhCliRemote {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl RemoteApi for GhCliRemote {
    fn create_release(&self, repo: &str, tag: &str, notes: &str) -> Result<String> {
        let out = platform::run_command(
            "gh",
            &[
                "release", "create", tag, "--repo", repo, "--title", tag, "--notes", notes,
            ],
            self.timeout,
        )?;
        if !out.success() {
            return Err(anyhow!(
                "gh release create が失敗しました（exit_code={}）: {}",
                out.exit_code,
                out.stderr.trim()
            ));
        }
        Ok(out.stdout.trim().to_string())
    }

    fn delete_release(&self, repo: &str, tag: &str) -> Result<()> {
        let out = platform::run_command(
            "gh",
            &["release", "delete", tag, "--repo", repo, "--yes", "--cleanup-tag"],
            self.timeout,
        )?;
        if !out.success() {
            return Err(anyhow!(
                "gh release delete が失敗しました（exit_code={}）: {}",
                out.exit_code,
                out.stderr.trim()
            ));
        }
        Ok(())
    }
}

/// Rejects every call. Used when the `gh` CLI is not installed, so a Release
/// fails at its publish step and rolls back.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRemote;

impl RemoteApi for OfflineRemote {
    fn create_release(&self, repo: &str, tag: &str, _notes: &str) -> Result<String> {
        Err(anyhow!("リモート API が利用できません（gh が見つかりません）: {repo} {tag}"))
    }

    fn delete_release(&self, repo: &str, tag: &str) -> Result<()> {
        Err(anyhow!("リモート API が利用できません（gh が見つかりません）: {repo} {tag}"))
    }
}
