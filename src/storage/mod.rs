//! Filesystem side of the updater
//!
//! Manifest loading, atomic persistence, and publish configuration.

pub mod config;
pub mod manifest;

pub use config::PublishConfig;
pub use manifest::Manifest;
