//! Container image references
//!
//! Reference format:
//! - `app` (implicit latest)
//! - `app:v1.2.3`
//! - `registry.example.com:5000/team/app:v1.2.3` (port colon is not a tag
//!   separator; the tag colon is the last one after the last `/`)
//!
//! Digest-pinned references (`app@sha256:...`) are deliberately not parsed:
//! they name an immutable image and are never tag-updatable.

use std::fmt;

/// Maximum tag length accepted by OCI registries
const MAX_TAG_LEN: usize = 128;

/// A repository plus optional tag, as found in a manifest field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    repository: String,
    tag: Option<String>,
}

impl ImageReference {
    /// Parses a scalar value as an image reference.
    ///
    /// Returns `None` for values that cannot be an image reference at all
    /// (empty, whitespace, digest-pinned). A syntactically suspect tag is
    /// still returned so the caller can decide whether to reject it.
    pub fn parse(value: &str) -> Option<Self> {
        if value.is_empty() || value.chars().any(char::is_whitespace) {
            return None;
        }
        if value.contains('@') {
            return None;
        }

        let last_slash = value.rfind('/');
        match value.rfind(':') {
            Some(colon) if last_slash.is_none_or(|s| colon > s) => {
                let (repository, tag) = (&value[..colon], &value[colon + 1..]);
                if repository.is_empty() {
                    return None;
                }
                Some(Self {
                    repository: repository.to_string(),
                    tag: Some(tag.to_string()),
                })
            }
            _ => Some(Self {
                repository: value.to_string(),
                tag: None,
            }),
        }
    }

    /// Returns the repository component
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Returns the tag component, if present
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Exact repository equality; the current tag never participates.
    /// `app` must not match `app-worker`, so no prefix matching.
    pub fn matches_repository(&self, repository: &str) -> bool {
        self.repository == repository
    }

    /// Returns the same reference pointing at `tag`.
    /// A tagless reference gains the tag (implicit latest being replaced).
    pub fn with_tag(&self, tag: &str) -> Self {
        Self {
            repository: self.repository.clone(),
            tag: Some(tag.to_string()),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}:{}", self.repository, tag),
            None => write!(f, "{}", self.repository),
        }
    }
}

/// Validates tag syntax: alphanumeric or `_` first, then alphanumeric,
/// `.`, `_` or `-`, at most 128 characters. No path separators, no
/// whitespace.
pub fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    let first_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphanumeric() || c == '_');
    first_ok
        && tag.len() <= MAX_TAG_LEN
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
