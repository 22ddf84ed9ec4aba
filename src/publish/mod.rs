//! Change publishing over git
//!
//! Stages exactly the modified manifests, commits with a deterministic
//! message, and pushes to the configured remote/branch. Concurrency is
//! optimistic: a non-fast-forward rejection means another run landed first,
//! so we fetch, reset the branch to the remote head, re-run the rewriter
//! against the fresh copy, and try again — a bounded number of times, never
//! with a force push. Transient transport failures get a capped exponential
//! backoff before surfacing as a network error.

use std::path::PathBuf;
use std::process::{Command, Output};
use std::thread;
use std::time::Duration;

use crate::error::{Result, UpdateError};
use crate::storage::{Manifest, PublishConfig};

/// Hash of the commit that carries (or already carried) the update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRef(String);

impl CommitRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommitRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

enum PushOutcome {
    Accepted,
    /// Non-fast-forward rejection; a concurrent update won the race
    Rejected,
}

/// Deterministic commit message embedding repository and tag, so the audit
/// trail stays greppable
pub fn commit_message(repository: &str, new_tag: &str) -> String {
    format!("Update {} to {}", repository, new_tag)
}

/// Publishes the already-persisted manifests as one commit on the
/// configured branch.
///
/// On a push rejection the local commit is discarded, the branch is reset
/// to the remote head, and the update is re-applied from scratch. A re-run
/// that changes nothing means a concurrent invocation already published
/// this exact update, which is a success, not a conflict.
pub fn publish(
    config: &PublishConfig,
    paths: &[PathBuf],
    repository: &str,
    new_tag: &str,
) -> Result<CommitRef> {
    let message = commit_message(repository, new_tag);

    for _attempt in 0..config.max_attempts {
        stage(config, paths)?;
        commit(config, &message)?;

        if config.no_push {
            return head(config);
        }

        match push(config)? {
            PushOutcome::Accepted => return head(config),
            PushOutcome::Rejected => {
                refresh(config)?;
                if !reapply(paths, repository, new_tag)? {
                    // Already applied upstream by a concurrent run.
                    return head(config);
                }
            }
        }
    }

    Err(UpdateError::Conflict {
        remote: config.remote.clone(),
        branch: config.branch.clone(),
        attempts: config.max_attempts,
    })
}

/// Stages exactly the given files
fn stage(config: &PublishConfig, paths: &[PathBuf]) -> Result<()> {
    let mut args: Vec<&str> = vec!["add", "--"];
    let rendered: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    args.extend(rendered.iter().map(String::as_str));

    let output = git(config, &args)?;
    expect_success(config, "git add", &output)
}

/// Commits staged changes; an empty commit attempt is tolerated because it
/// means a refresh found the update already present
fn commit(config: &PublishConfig, message: &str) -> Result<()> {
    let output = git(config, &["commit", "-m", message])?;
    if output.status.success() {
        return Ok(());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stdout.contains("nothing to commit") || stderr.contains("nothing to commit") {
        return Ok(());
    }

    Err(UpdateError::Io {
        path: config.workdir.clone(),
        detail: format!("git commit failed: {}", stderr.trim()),
        source: anyhow::anyhow!("{}", stderr.trim()),
    })
}

/// Pushes the branch, retrying transient transport failures with capped
/// exponential backoff. Never force-pushes.
fn push(config: &PublishConfig) -> Result<PushOutcome> {
    let refspec = format!("HEAD:refs/heads/{}", config.branch);
    let mut backoff = config.backoff_base;

    for attempt in 1..=config.network_attempts {
        let output = git(config, &["push", &config.remote, &refspec])?;
        if output.status.success() {
            return Ok(PushOutcome::Accepted);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if is_non_fast_forward(&stderr) {
            return Ok(PushOutcome::Rejected);
        }
        if is_auth_failure(&stderr) {
            return Err(UpdateError::Auth {
                remote: config.remote.clone(),
                detail: first_line(&stderr),
            });
        }
        if is_network_failure(&stderr) {
            if attempt < config.network_attempts {
                thread::sleep(backoff);
                backoff *= 2;
                continue;
            }
            return Err(UpdateError::Network {
                remote: config.remote.clone(),
                detail: first_line(&stderr),
            });
        }

        return Err(UpdateError::Io {
            path: config.workdir.clone(),
            detail: format!("git push failed: {}", first_line(&stderr)),
            source: anyhow::anyhow!("{}", stderr.trim()),
        });
    }

    unreachable!("push loop always returns within the retry budget")
}

/// Discards the rejected local commit and moves the branch to the remote
/// head
fn refresh(config: &PublishConfig) -> Result<()> {
    let output = git(config, &["fetch", &config.remote, &config.branch])?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if is_auth_failure(&stderr) {
            return Err(UpdateError::Auth {
                remote: config.remote.clone(),
                detail: first_line(&stderr),
            });
        }
        return Err(UpdateError::Network {
            remote: config.remote.clone(),
            detail: first_line(&stderr),
        });
    }

    let output = git(config, &["reset", "--hard", "FETCH_HEAD"])?;
    expect_success(config, "git reset", &output)
}

/// Re-runs the rewriter against the refreshed work tree. Returns whether
/// any manifest still needed the update.
fn reapply(paths: &[PathBuf], repository: &str, new_tag: &str) -> Result<bool> {
    let mut any_changed = false;
    for path in paths {
        let manifest = Manifest::load(path)?;
        let (rewritten, result) = manifest.rewrite(repository, new_tag)?;
        if result.changed {
            rewritten.persist()?;
            any_changed = true;
        }
    }
    Ok(any_changed)
}

/// Resolves the current commit hash
fn head(config: &PublishConfig) -> Result<CommitRef> {
    let output = git(config, &["rev-parse", "HEAD"])?;
    expect_success(config, "git rev-parse", &output)?;
    Ok(CommitRef(
        String::from_utf8_lossy(&output.stdout).trim().to_string(),
    ))
}

/// Runs git in the configured work tree with prompts disabled and
/// transport stall timeouts bounded
fn git(config: &PublishConfig, args: &[&str]) -> Result<Output> {
    Command::new("git")
        .args(args)
        .current_dir(&config.workdir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_HTTP_LOW_SPEED_LIMIT", "1000")
        .env("GIT_HTTP_LOW_SPEED_TIME", "30")
        .output()
        .map_err(|e| UpdateError::Io {
            path: config.workdir.clone(),
            detail: format!("failed to run git {}", args.first().unwrap_or(&"")),
            source: e.into(),
        })
}

fn expect_success(config: &PublishConfig, what: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(UpdateError::Io {
        path: config.workdir.clone(),
        detail: format!("{} failed: {}", what, first_line(&stderr)),
        source: anyhow::anyhow!("{}", stderr.trim()),
    })
}

fn first_line(stderr: &str) -> String {
    stderr
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("no diagnostic output")
        .trim()
        .to_string()
}

fn is_non_fast_forward(stderr: &str) -> bool {
    stderr.contains("non-fast-forward")
        || stderr.contains("fetch first")
        || stderr.contains("[rejected]")
}

fn is_auth_failure(stderr: &str) -> bool {
    stderr.contains("Authentication failed")
        || stderr.contains("could not read Username")
        || stderr.contains("could not read Password")
        || stderr.contains("Permission denied (publickey")
        || stderr.contains("Invalid username or password")
}

fn is_network_failure(stderr: &str) -> bool {
    stderr.contains("Could not resolve host")
        || stderr.contains("Connection refused")
        || stderr.contains("Connection timed out")
        || stderr.contains("Operation timed out")
        || stderr.contains("unable to access")
        || stderr.contains("Could not read from remote repository")
        || stderr.contains("early EOF")
        || stderr.contains("The remote end hung up unexpectedly")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_message_embeds_repository_and_tag() {
        assert_eq!(commit_message("team/app", "v2"), "Update team/app to v2");
    }

    #[test]
    fn rejection_is_detected_before_other_classes() {
        let stderr = "\
To /remote/repo.git
 ! [rejected]        HEAD -> main (fetch first)
error: failed to push some refs to '/remote/repo.git'";
        assert!(is_non_fast_forward(stderr));
        assert!(!is_auth_failure(stderr));
    }

    #[test]
    fn auth_rejections_are_classified() {
        for stderr in [
            "fatal: Authentication failed for 'https://example.com/repo.git/'",
            "fatal: could not read Username for 'https://example.com': terminal prompts disabled",
            "git@example.com: Permission denied (publickey).",
        ] {
            assert!(is_auth_failure(stderr), "not classified: {stderr}");
        }
    }

    #[test]
    fn transport_failures_are_classified() {
        for stderr in [
            "fatal: unable to access 'https://example.com/repo.git/': Could not resolve host: example.com",
            "fatal: '/missing/repo.git' does not appear to be a git repository\nfatal: Could not read from remote repository.",
            "ssh: connect to host example.com port 22: Connection refused",
        ] {
            assert!(is_network_failure(stderr), "not classified: {stderr}");
        }
    }

    #[test]
    fn unrelated_stderr_is_no_class() {
        let stderr = "error: src refspec main does not match any";
        assert!(!is_non_fast_forward(stderr));
        assert!(!is_auth_failure(stderr));
        assert!(!is_network_failure(stderr));
    }
}
