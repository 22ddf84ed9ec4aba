//! Manifest loading and atomic persistence
//!
//! A manifest is loaded fresh per invocation, validated as (possibly
//! multi-document) YAML, and kept as raw text: the rewriter edits bytes in
//! place, so serializing is just writing the text back. That is what makes
//! the untouched parts of the file round-trip byte-stable, comments and key
//! ordering included.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::domain::{self, RewriteError, UpdateResult};
use crate::error::{Result, UpdateError};

/// A deployment manifest bound to its on-disk path
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    source: String,
}

impl Manifest {
    /// Loads and validates the manifest at `path`.
    ///
    /// Fails with the `io` class when the file is missing or unreadable and
    /// with the `parse` class when any document in it is not valid YAML.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let source = match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(UpdateError::NotFound { path });
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(UpdateError::Permission { path, source: e });
            }
            Err(e) => {
                return Err(UpdateError::Io {
                    detail: "failed to read manifest".to_string(),
                    source: e.into(),
                    path,
                });
            }
        };

        // Validate every document up front; unrecognized fields are
        // preserved verbatim because the raw text is what gets written back.
        for (index, document) in serde_yaml::Deserializer::from_str(&source).enumerate() {
            if let Err(e) = serde_yaml::Value::deserialize(document) {
                return Err(UpdateError::Parse {
                    detail: format!("document {}: {}", index + 1, e),
                    path,
                });
            }
        }

        Ok(Self { path, source })
    }

    /// Returns the manifest's on-disk path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the raw manifest text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Runs the reference rewriter, yielding the rewritten manifest and
    /// what changed. Pure; the file on disk is untouched until
    /// [`Manifest::persist`].
    pub fn rewrite(&self, repository: &str, new_tag: &str) -> Result<(Manifest, UpdateResult)> {
        let (source, result) = domain::rewrite(&self.source, repository, new_tag)
            .map_err(|e| self.rewrite_error(e))?;

        let rewritten = Manifest {
            path: self.path.clone(),
            source,
        };
        Ok((rewritten, result))
    }

    fn rewrite_error(&self, e: RewriteError) -> UpdateError {
        UpdateError::Parse {
            path: self.path.clone(),
            detail: e.to_string(),
        }
    }

    /// Writes the manifest back to its path atomically: temp file in the
    /// same directory, then rename over the original. A crash mid-write
    /// never leaves a truncated manifest, and no temp file survives a
    /// failure.
    pub fn persist(&self) -> Result<()> {
        write_atomic(&self.path, &self.source)
    }
}

/// Atomic whole-file replacement via write-to-temp plus rename
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let temp_path = temp_path_for(path);

    let write = || -> anyhow::Result<()> {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("failed to create temp file {}", temp_path.display()))?;
        file.write_all(contents.as_bytes())
            .context("failed to write temp file")?;
        file.sync_all().context("failed to sync temp file")?;
        fs::rename(&temp_path, path)
            .with_context(|| format!("failed to rename over {}", path.display()))?;
        Ok(())
    };

    write().map_err(|source| {
        // Nothing dangling on failure; the original is still intact.
        let _ = fs::remove_file(&temp_path);
        UpdateError::Io {
            path: path.to_path_buf(),
            detail: "atomic write failed".to_string(),
            source,
        }
    })
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_manifest(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn load_reads_multi_document_yaml() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(&dir, "deploy.yaml", "image: app:v1\n---\nkind: Service\n");

        let manifest = Manifest::load(&path).unwrap();
        assert!(manifest.source().contains("kind: Service"));
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = Manifest::load(dir.path().join("absent.yaml")).unwrap_err();

        assert!(matches!(err, UpdateError::NotFound { .. }));
        assert_eq!(err.class(), "io");
    }

    #[test]
    fn load_invalid_yaml_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(&dir, "bad.yaml", "image: [unclosed\n");

        let err = Manifest::load(&path).unwrap_err();
        assert!(matches!(err, UpdateError::Parse { .. }));
    }

    #[test]
    fn rewrite_then_persist_round_trips() {
        let dir = TempDir::new().unwrap();
        let original = "# release manifest\nimage: app:v1 # pinned\n";
        let path = write_manifest(&dir, "deploy.yaml", original);

        let manifest = Manifest::load(&path).unwrap();
        let (rewritten, result) = manifest.rewrite("app", "v2").unwrap();
        assert!(result.changed);

        rewritten.persist().unwrap();
        let on_disk = fs::read_to_string(&path).unwrap();
        assert_eq!(on_disk, "# release manifest\nimage: app:v2 # pinned\n");
        assert!(!dir.path().join("deploy.yaml.tmp").exists());
    }

    #[test]
    fn rewrite_error_carries_the_path() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(&dir, "deploy.yaml", "image: \"\"\n");

        let manifest = Manifest::load(&path).unwrap();
        let err = manifest.rewrite("app", "v2").unwrap_err();

        match err {
            UpdateError::Parse { path: p, detail } => {
                assert_eq!(p, path);
                assert!(detail.contains("line 1"));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn failed_atomic_write_leaves_original_and_no_temp() {
        let dir = TempDir::new().unwrap();

        // The target is a directory, so the final rename must fail after
        // the temp file was already written.
        let target = dir.path().join("deploy.yaml");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("inner.txt"), "untouched").unwrap();

        let err = write_atomic(&target, "image: app:v2\n").unwrap_err();
        assert!(matches!(err, UpdateError::Io { .. }));

        assert!(target.is_dir());
        assert_eq!(
            fs::read_to_string(target.join("inner.txt")).unwrap(),
            "untouched"
        );
        assert!(!dir.path().join("deploy.yaml.tmp").exists());
    }

    #[test]
    fn successful_write_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = write_manifest(&dir, "deploy.yaml", "image: app:v1\n");

        write_atomic(&path, "image: app:v2\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "image: app:v2\n");
    }
}
