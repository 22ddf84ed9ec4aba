//! Error taxonomy for the updater
//!
//! Every failure surfaced to a caller belongs to one of these classes so a
//! calling pipeline can branch on the exit code:
//!
//! | Class | Exit code | Retried internally? |
//! |-------|-----------|---------------------|
//! | usage | 2 | no |
//! | parse | 3 | no |
//! | io (incl. not-found, permission) | 4 | no |
//! | auth | 5 | no |
//! | conflict | 6 | yes, bounded refresh-and-retry first |
//! | network | 7 | yes, capped exponential backoff first |
//!
//! Exit code 2 matches what clap uses for argument errors, so "you called
//! this wrong" is a single code regardless of which layer noticed.

use std::path::PathBuf;

use thiserror::Error;

/// All failure classes the updater can surface
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Manifest path does not resolve to an existing file
    #[error("manifest not found: {path}")]
    NotFound { path: PathBuf },

    /// Manifest content is not valid structured data
    #[error("failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    /// Manifest exists but cannot be read
    #[error("permission denied reading {path}")]
    Permission {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Local read/write/rename failure
    #[error("I/O failure on {path}: {detail}")]
    Io {
        path: PathBuf,
        detail: String,
        #[source]
        source: anyhow::Error,
    },

    /// The remote rejected our credentials
    #[error("authentication rejected by remote '{remote}': {detail}")]
    Auth { remote: String, detail: String },

    /// Transport-level failure reaching the remote
    #[error("network failure reaching remote '{remote}': {detail}")]
    Network { remote: String, detail: String },

    /// Concurrent pushes kept winning; refresh-and-retry budget exhausted
    #[error("conflict pushing to {remote}/{branch}: gave up after {attempts} attempts")]
    Conflict {
        remote: String,
        branch: String,
        attempts: u32,
    },

    /// Request precondition violated before any work started
    #[error("invalid request: {0}")]
    Usage(String),
}

impl UpdateError {
    /// Short machine-parseable class name, printed as `error[<class>]: ...`
    pub fn class(&self) -> &'static str {
        match self {
            UpdateError::NotFound { .. }
            | UpdateError::Permission { .. }
            | UpdateError::Io { .. } => "io",
            UpdateError::Parse { .. } => "parse",
            UpdateError::Auth { .. } => "auth",
            UpdateError::Network { .. } => "network",
            UpdateError::Conflict { .. } => "conflict",
            UpdateError::Usage(_) => "usage",
        }
    }

    /// Process exit code for this failure class
    pub fn exit_code(&self) -> u8 {
        match self {
            UpdateError::Usage(_) => 2,
            UpdateError::Parse { .. } => 3,
            UpdateError::NotFound { .. }
            | UpdateError::Permission { .. }
            | UpdateError::Io { .. } => 4,
            UpdateError::Auth { .. } => 5,
            UpdateError::Conflict { .. } => 6,
            UpdateError::Network { .. } => 7,
        }
    }
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, UpdateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_class() {
        let errors = [
            UpdateError::Usage("x".into()),
            UpdateError::Parse {
                path: "m.yaml".into(),
                detail: "bad".into(),
            },
            UpdateError::NotFound {
                path: "m.yaml".into(),
            },
            UpdateError::Auth {
                remote: "origin".into(),
                detail: "denied".into(),
            },
            UpdateError::Conflict {
                remote: "origin".into(),
                branch: "main".into(),
                attempts: 3,
            },
            UpdateError::Network {
                remote: "origin".into(),
                detail: "refused".into(),
            },
        ];

        let mut codes: Vec<u8> = errors.iter().map(|e| e.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn io_variants_share_one_code() {
        let not_found = UpdateError::NotFound {
            path: "m.yaml".into(),
        };
        let io = UpdateError::Io {
            path: "m.yaml".into(),
            detail: "rename failed".into(),
            source: anyhow::anyhow!("disk full"),
        };
        assert_eq!(not_found.exit_code(), io.exit_code());
        assert_eq!(not_found.class(), "io");
    }
}
