//! Manifest Updater - idempotent image-tag updates for GitOps manifests
//!
//! Given a repository and a new tag, the updater rewrites every matching
//! image reference inside one or more YAML deployment manifests, persists
//! the change atomically, and publishes it as a race-safe git commit that a
//! deployment controller can pick up. Re-running an already-applied update
//! is a successful no-op.

pub mod cli;
pub mod domain;
pub mod error;
pub mod publish;
pub mod storage;

pub use domain::{ImageReference, UpdateResult};
pub use error::UpdateError;
pub use storage::{Manifest, PublishConfig};
