//! Pure update logic, independent of filesystem and git
//!
//! Everything here is deterministic and I/O-free so it stays unit-testable
//! without a live manifest file, registry or remote.

pub mod reference;
pub mod rewrite;

pub use reference::{is_valid_tag, ImageReference};
pub use rewrite::{rewrite, RewriteError, UpdateResult};
