//! Publish configuration
//!
//! Remote, branch and retry knobs are passed in explicitly so the core
//! stays testable without ambient environment reads. Credentials are never
//! held here; git resolves them from its own credential helpers.

use std::path::PathBuf;
use std::time::Duration;

/// How and where a change gets published
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Remote name, e.g. `origin`
    pub remote: String,

    /// Branch the GitOps controller watches, e.g. `main`
    pub branch: String,

    /// Directory inside the git work tree to run git from
    pub workdir: PathBuf,

    /// Refresh-and-retry budget for non-fast-forward rejections
    pub max_attempts: u32,

    /// Retry budget for transient transport failures
    pub network_attempts: u32,

    /// Base delay for exponential backoff between network retries
    pub backoff_base: Duration,

    /// Commit locally but skip the push
    pub no_push: bool,
}

impl PublishConfig {
    pub fn new(remote: impl Into<String>, branch: impl Into<String>, workdir: PathBuf) -> Self {
        Self {
            remote: remote.into(),
            branch: branch.into(),
            workdir,
            max_attempts: 3,
            network_attempts: 3,
            backoff_base: Duration::from_millis(500),
            no_push: false,
        }
    }

    /// Remote-tracking ref this publisher fast-forwards
    pub fn upstream(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bound_every_retry_budget() {
        let config = PublishConfig::new("origin", "main", PathBuf::from("."));

        assert!(config.max_attempts >= 1);
        assert!(config.network_attempts >= 1);
        assert!(config.backoff_base > Duration::ZERO);
        assert_eq!(config.upstream(), "origin/main");
    }
}
