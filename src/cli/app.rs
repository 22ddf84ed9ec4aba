//! Main CLI application structure

use std::path::PathBuf;

use clap::Parser;

use super::output::{Output, OutputFormat};
use crate::domain::{self, UpdateResult};
use crate::error::{Result, UpdateError};
use crate::publish;
use crate::storage::{Manifest, PublishConfig};

#[derive(Parser)]
#[command(name = "updater")]
#[command(author, version, about = "Pin a container image tag inside deployment manifests")]
pub struct Cli {
    /// Image repository to update (exact match, e.g. registry.example.com/team/app)
    pub repository: String,

    /// Tag to pin the repository to
    pub new_tag: String,

    /// Manifest file to update (repeat for several files in one commit)
    #[arg(long = "manifest", value_name = "PATH", default_value = "deploy.yaml")]
    pub manifests: Vec<PathBuf>,

    /// Git remote to push to
    #[arg(long, default_value = "origin", env = "UPDATER_REMOTE")]
    pub remote: String,

    /// Branch the deployment controller watches
    #[arg(long, default_value = "main", env = "UPDATER_BRANCH")]
    pub branch: String,

    /// Report what would change without touching anything
    #[arg(long)]
    pub dry_run: bool,

    /// Commit locally but skip the push
    #[arg(long)]
    pub no_push: bool,

    /// Output format
    #[arg(long, short = 'f', default_value = "text")]
    pub format: OutputFormat,

    /// Enable verbose output for debugging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

/// Main entry point for the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(cli.format, cli.verbose);

    output.verbose("updater starting");
    execute(&cli, &output)?;
    output.verbose("update completed");
    Ok(())
}

/// Sequences load, rewrite, persist and publish as one logical transaction.
///
/// A `changed = false` rewrite skips persist and publish entirely, so
/// re-running an already-applied update is a successful no-op. If persist
/// or publish fails, the in-memory rewrite is discarded and no commit is
/// attempted; the remote either gets the full update or nothing.
fn execute(cli: &Cli, output: &Output) -> Result<()> {
    if cli.repository.is_empty() {
        return Err(UpdateError::Usage("repository must not be empty".into()));
    }
    if !domain::is_valid_tag(&cli.new_tag) {
        return Err(UpdateError::Usage(format!(
            "'{}' is not a valid image tag",
            cli.new_tag
        )));
    }

    let mut total = UpdateResult::no_match();
    let mut rewritten: Vec<(Manifest, UpdateResult)> = Vec::new();

    for path in &cli.manifests {
        output.verbose_ctx("load", &format!("loading {}", path.display()));
        let manifest = Manifest::load(path)?;
        let (updated, result) = manifest.rewrite(&cli.repository, &cli.new_tag)?;
        output.verbose_ctx(
            "rewrite",
            &format!(
                "{}: occurrences={} changed={}",
                path.display(),
                result.occurrences,
                result.changed
            ),
        );
        total.merge(&result);
        rewritten.push((updated, result));
    }

    if !total.changed {
        report_noop(cli, output, &total);
        return Ok(());
    }

    if cli.dry_run {
        report_dry_run(cli, output, &total);
        return Ok(());
    }

    let mut changed_paths = Vec::new();
    for (manifest, result) in &rewritten {
        if result.changed {
            manifest.persist()?;
            changed_paths.push(canonical(manifest.path())?);
        }
    }

    let workdir = changed_paths[0]
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut config = PublishConfig::new(&cli.remote, &cli.branch, workdir);
    config.no_push = cli.no_push;

    output.verbose_ctx(
        "publish",
        &format!("publishing {} file(s) to {}", changed_paths.len(), config.upstream()),
    );
    let commit = publish::publish(&config, &changed_paths, &cli.repository, &cli.new_tag)?;

    if output.is_json() {
        output.data(&serde_json::json!({
            "repository": cli.repository,
            "new_tag": cli.new_tag,
            "changed": true,
            "occurrences": total.occurrences,
            "previous_tag": total.previous_tag,
            "manifests": cli.manifests,
            "commit": commit.as_str(),
            "pushed": !cli.no_push,
        }));
    } else {
        let action = if cli.no_push {
            format!("committed {}", commit)
        } else {
            format!("pushed {} to {}", commit, config.upstream())
        };
        output.success(&format!(
            "Updated {} to {} ({} occurrence(s) in {}); {}",
            cli.repository,
            cli.new_tag,
            total.occurrences,
            manifest_list(cli),
            action,
        ));
    }

    Ok(())
}

/// Reports the two no-op outcomes: nothing matched, or already pinned
fn report_noop(cli: &Cli, output: &Output, total: &UpdateResult) {
    if output.is_json() {
        output.data(&serde_json::json!({
            "repository": cli.repository,
            "new_tag": cli.new_tag,
            "changed": false,
            "occurrences": total.occurrences,
            "previous_tag": total.previous_tag,
            "manifests": cli.manifests,
        }));
    } else if total.occurrences == 0 {
        output.success(&format!(
            "No reference to '{}' in {}; nothing to do",
            cli.repository,
            manifest_list(cli)
        ));
    } else {
        output.success(&format!(
            "{} already pins {}:{} ({} occurrence(s)); nothing to publish",
            manifest_list(cli),
            cli.repository,
            cli.new_tag,
            total.occurrences
        ));
    }
}

fn report_dry_run(cli: &Cli, output: &Output, total: &UpdateResult) {
    if output.is_json() {
        output.data(&serde_json::json!({
            "repository": cli.repository,
            "new_tag": cli.new_tag,
            "changed": true,
            "occurrences": total.occurrences,
            "previous_tag": total.previous_tag,
            "manifests": cli.manifests,
            "dry_run": true,
        }));
    } else {
        let from = total.previous_tag.as_deref().unwrap_or("(untagged)");
        output.success(&format!(
            "Would update {} {} -> {} ({} occurrence(s) in {})",
            cli.repository,
            from,
            cli.new_tag,
            total.occurrences,
            manifest_list(cli)
        ));
    }
}

fn manifest_list(cli: &Cli) -> String {
    cli.manifests
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn canonical(path: &std::path::Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).map_err(|e| UpdateError::Io {
        path: path.to_path_buf(),
        detail: "failed to resolve manifest path".to_string(),
        source: e.into(),
    })
}
