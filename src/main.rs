//! Manifest Updater - pin image tags in GitOps deployment manifests

use std::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    match manifest_updater::cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // First line is machine-parseable; cause chain follows for humans.
            eprintln!("error[{}]: {}", e.class(), e);
            let mut cause = e.source();
            while let Some(c) = cause {
                eprintln!("  caused by: {}", c);
                cause = c.source();
            }
            ExitCode::from(e.exit_code())
        }
    }
}
