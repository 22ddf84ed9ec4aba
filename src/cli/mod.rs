//! # Command-Line Interface
//!
//! One command, one logical transaction:
//!
//! ```bash
//! updater team/app v2 --manifest deploy/app.yaml
//! ```
//!
//! ## Output Formats
//!
//! The `--format` flag selects:
//! - `text` (default) - Human-readable output
//! - `json` - Machine-parseable JSON
//!
//! ## Verbose Mode
//!
//! Use `--verbose` (or `-v`) for debug output on stderr.
//!
//! ## Entry Point
//!
//! Call [`run()`] to parse arguments and execute the update.

mod app;
mod output;

pub use app::{run, Cli};
pub use output::{Output, OutputFormat};
