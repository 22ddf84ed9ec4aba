//! Reference rewriting inside manifest text
//!
//! The rewriter is pure: it maps source text to new source text plus an
//! [`UpdateResult`], with no I/O. It edits only the bytes of scalar values
//! whose repository matches the request, so comments, key ordering, quoting
//! and indentation of everything else survive byte-for-byte.
//!
//! The field path is not fixed: every scalar value position in every
//! document is considered (`key: value` entries and `- item` sequence
//! entries), which tolerates manifests with multiple containers, sidecars
//! and init containers without assuming a hardcoded key path. Block-scalar
//! bodies (`|` / `>`) and comments are never touched. Flow-style
//! collections (`containers: [{image: app:v1}]`) are out of scope: they
//! pass through unmatched rather than risking a partial edit.

use serde::Serialize;
use thiserror::Error;

use super::reference::{is_valid_tag, ImageReference};

#[derive(Debug, Error, PartialEq)]
pub enum RewriteError {
    /// An image field exists but cannot carry a tag update
    #[error("line {line}: {detail}")]
    MalformedImageField { line: usize, detail: String },
}

/// Outcome of one rewrite pass over one manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateResult {
    /// True if the serialized output differs from the input
    pub changed: bool,
    /// Tag the first matching occurrence carried before the rewrite;
    /// `None` when that occurrence was an implicit latest
    pub previous_tag: Option<String>,
    /// Number of matching occurrences across all documents
    pub occurrences: usize,
}

impl UpdateResult {
    /// Result for a manifest containing no matching reference.
    /// This is a normal outcome, not an error.
    pub fn no_match() -> Self {
        Self {
            changed: false,
            previous_tag: None,
            occurrences: 0,
        }
    }

    /// Folds another manifest's result into an aggregate
    pub fn merge(&mut self, other: &UpdateResult) {
        self.changed |= other.changed;
        self.occurrences += other.occurrences;
        if self.previous_tag.is_none() {
            self.previous_tag = other.previous_tag.clone();
        }
    }
}

/// One scalar value position found on a line
struct ValueSpan<'a> {
    /// Byte offset of the value in the line (after any opening quote)
    start: usize,
    /// Byte offset one past the value (before any closing quote)
    end: usize,
    /// The value content itself, quotes stripped
    content: &'a str,
    /// Mapping key owning the value, if this was a `key: value` entry
    key: Option<&'a str>,
}

/// Rewrites every occurrence of `repository[:tag]` to carry `new_tag`.
///
/// Deterministic and I/O-free; the same input always yields the same
/// output. A manifest already carrying `new_tag` reports its occurrences
/// but `changed = false`, which is what makes re-runs idempotent.
pub fn rewrite(
    source: &str,
    repository: &str,
    new_tag: &str,
) -> Result<(String, UpdateResult), RewriteError> {
    let mut out = String::with_capacity(source.len() + 16);
    let mut occurrences = 0usize;
    let mut first_previous: Option<Option<String>> = None;

    // Indent of the entry that opened a block scalar, while inside one
    let mut block_scalar: Option<usize> = None;

    for (idx, line) in source.split_inclusive('\n').enumerate() {
        let body = line.trim_end_matches(['\n', '\r']);
        let terminator = &line[body.len()..];
        let indent = body.len() - body.trim_start().len();

        if let Some(open_indent) = block_scalar {
            if body.trim().is_empty() || indent > open_indent {
                out.push_str(line);
                continue;
            }
            block_scalar = None;
        }

        let span = match find_value_span(body) {
            Some(span) => span,
            None => {
                out.push_str(line);
                continue;
            }
        };

        if span.content.starts_with('|') || span.content.starts_with('>') {
            block_scalar = Some(indent);
            out.push_str(line);
            continue;
        }

        if span.content.is_empty() {
            if span.key.is_some_and(is_image_key) {
                return Err(RewriteError::MalformedImageField {
                    line: idx + 1,
                    detail: "image field is empty".to_string(),
                });
            }
            out.push_str(line);
            continue;
        }

        let reference = match ImageReference::parse(span.content) {
            Some(r) if r.matches_repository(repository) => r,
            _ => {
                out.push_str(line);
                continue;
            }
        };

        // A tagless value matches lots of innocent fields (`name: app`), so
        // implicit-latest replacement only applies to image-named keys.
        // Tagged values are unambiguous and match on any field.
        if reference.tag().is_none() && !span.key.is_some_and(is_image_key) {
            out.push_str(line);
            continue;
        }

        if let Some(tag) = reference.tag() {
            if !is_valid_tag(tag) {
                return Err(RewriteError::MalformedImageField {
                    line: idx + 1,
                    detail: format!(
                        "reference to '{}' carries malformed tag '{}'",
                        repository, tag
                    ),
                });
            }
        }

        occurrences += 1;
        if first_previous.is_none() {
            first_previous = Some(reference.tag().map(str::to_string));
        }

        out.push_str(&body[..span.start]);
        out.push_str(&reference.with_tag(new_tag).to_string());
        out.push_str(&body[span.end..]);
        out.push_str(terminator);
    }

    let changed = occurrences > 0 && out != source;
    let result = UpdateResult {
        changed,
        previous_tag: first_previous.flatten(),
        occurrences,
    };
    Ok((out, result))
}

/// Locates the scalar value on a single line, if the line holds one.
///
/// Handles `key: value`, `- item`, `- key: value` (any dash depth), plain
/// and quoted scalars, and trailing inline comments. Returns `None` for
/// blank lines, comments, document markers, and lines without an inline
/// scalar value.
fn find_value_span(body: &str) -> Option<ValueSpan<'_>> {
    let trimmed = body.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    if trimmed == "---" || trimmed == "..." || trimmed.starts_with("--- ") {
        return None;
    }

    let mut offset = body.len() - trimmed.len();
    let mut rest = trimmed;
    let mut in_sequence = false;

    while let Some(after_dash) = rest.strip_prefix("- ") {
        in_sequence = true;
        let skipped = rest.len() - after_dash.trim_start().len();
        offset += skipped;
        rest = after_dash.trim_start();
    }

    let (key, value_offset) = match rest.find(": ") {
        Some(i) => {
            let key = &rest[..i];
            let after = &rest[i + 2..];
            let skipped = i + 2 + (after.len() - after.trim_start().len());
            (Some(key), Some(skipped))
        }
        None if rest.ends_with(':') => (None, None),
        None if in_sequence => (None, Some(0)),
        None => (None, None),
    };
    let value_offset = value_offset?;

    let value_start = offset + value_offset;
    let raw = &body[value_start..];

    if let Some(quote) = raw.chars().next().filter(|c| *c == '"' || *c == '\'') {
        let inner = &raw[1..];
        let close = find_closing_quote(inner, quote)?;
        return Some(ValueSpan {
            start: value_start + 1,
            end: value_start + 1 + close,
            content: &inner[..close],
            key,
        });
    }

    // Plain scalar: ends at an inline comment or end of line
    let end_rel = raw.find(" #").unwrap_or(raw.len());
    let content = raw[..end_rel].trim_end();
    Some(ValueSpan {
        start: value_start,
        end: value_start + content.len(),
        content,
        key,
    })
}

/// True for keys that name a container image (`image`, `initImage`,
/// `sidecar_image`, ...)
fn is_image_key(key: &str) -> bool {
    key.to_ascii_lowercase().ends_with("image")
}

/// Finds the byte offset of the closing quote within `inner`
fn find_closing_quote(inner: &str, quote: char) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in inner.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if quote == '"' => escaped = true,
            c if c == quote => return Some(i),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DEPLOYMENT: &str = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: app # the main service
spec:
  template:
    spec:
      containers:
        - name: app
          image: app:v1
        - name: worker
          image: app-worker:v1
";

    #[test]
    fn updates_only_the_exact_repository() {
        let (out, result) = rewrite(DEPLOYMENT, "app", "v2").unwrap();

        assert!(result.changed);
        assert_eq!(result.occurrences, 1);
        assert_eq!(result.previous_tag.as_deref(), Some("v1"));
        assert!(out.contains("image: app:v2"));
        assert!(out.contains("image: app-worker:v1"));
    }

    #[test]
    fn untouched_lines_are_byte_identical() {
        let (out, _) = rewrite(DEPLOYMENT, "app", "v2").unwrap();

        for (before, after) in DEPLOYMENT.lines().zip(out.lines()) {
            if !before.contains("image: app:v1") {
                assert_eq!(before, after);
            }
        }
        assert!(out.contains("name: app # the main service"));
    }

    #[test]
    fn rewrites_every_occurrence() {
        let manifest = "\
containers:
  - image: app:v1
  - image: app:v1
";
        let (out, result) = rewrite(manifest, "app", "v2").unwrap();

        assert_eq!(result.occurrences, 2);
        assert!(result.changed);
        assert_eq!(out.matches("app:v2").count(), 2);
    }

    #[test]
    fn second_run_reports_unchanged() {
        let (once, first) = rewrite(DEPLOYMENT, "app", "v2").unwrap();
        let (twice, second) = rewrite(&once, "app", "v2").unwrap();

        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(second.occurrences, 1);
        assert_eq!(second.previous_tag.as_deref(), Some("v2"));
        assert_eq!(once, twice);
    }

    #[test]
    fn no_match_is_a_no_op() {
        let (out, result) = rewrite(DEPLOYMENT, "absent", "v2").unwrap();

        assert_eq!(result, UpdateResult::no_match());
        assert_eq!(out, DEPLOYMENT);
    }

    #[test]
    fn tagless_reference_gains_the_tag() {
        let manifest = "image: app\n";
        let (out, result) = rewrite(manifest, "app", "v2").unwrap();

        assert_eq!(out, "image: app:v2\n");
        assert!(result.changed);
        assert_eq!(result.previous_tag, None);
        assert_eq!(result.occurrences, 1);
    }

    #[test]
    fn tagless_match_requires_an_image_key() {
        let manifest = "name: app\nserviceAccount: app\ninitImage: app\n";
        let (out, result) = rewrite(manifest, "app", "v2").unwrap();

        assert_eq!(out, "name: app\nserviceAccount: app\ninitImage: app:v2\n");
        assert_eq!(result.occurrences, 1);
    }

    #[test]
    fn quoted_scalars_keep_their_quotes() {
        let manifest = "image: \"app:v1\"\nbackup: 'app:v1' # keep\n";
        let (out, result) = rewrite(manifest, "app", "v2").unwrap();

        assert_eq!(out, "image: \"app:v2\"\nbackup: 'app:v2' # keep\n");
        assert_eq!(result.occurrences, 2);
    }

    #[test]
    fn inline_comments_survive() {
        let manifest = "image: app:v1 # pinned by release job\n";
        let (out, _) = rewrite(manifest, "app", "v2").unwrap();

        assert_eq!(out, "image: app:v2 # pinned by release job\n");
    }

    #[test]
    fn bare_sequence_items_are_values() {
        let manifest = "images:\n  - app:v1\n  - other:v9\n";
        let (out, result) = rewrite(manifest, "app", "v2").unwrap();

        assert_eq!(out, "images:\n  - app:v2\n  - other:v9\n");
        assert_eq!(result.occurrences, 1);
    }

    #[test]
    fn multi_document_files_are_scanned_end_to_end() {
        let manifest = "\
image: app:v1
---
spec:
  image: app:v1
";
        let (_, result) = rewrite(manifest, "app", "v2").unwrap();
        assert_eq!(result.occurrences, 2);
    }

    #[test]
    fn comments_and_block_scalars_are_never_touched() {
        let manifest = "\
# image: app:v1
script: |
  docker run app:v1
image: app:v1
";
        let (out, result) = rewrite(manifest, "app", "v2").unwrap();

        assert_eq!(result.occurrences, 1);
        assert!(out.contains("# image: app:v1"));
        assert!(out.contains("docker run app:v1"));
        assert!(out.ends_with("image: app:v2\n"));
    }

    #[test]
    fn flow_style_collections_pass_through_unmatched() {
        let manifest = "containers: [{name: app, image: app:v1}]\n";
        let (out, result) = rewrite(manifest, "app", "v2").unwrap();

        assert_eq!(out, manifest);
        assert_eq!(result, UpdateResult::no_match());
    }

    #[test]
    fn registry_port_does_not_confuse_the_match() {
        let manifest = "image: registry.example.com:5000/app:v1\n";
        let (out, result) =
            rewrite(manifest, "registry.example.com:5000/app", "v2").unwrap();

        assert_eq!(out, "image: registry.example.com:5000/app:v2\n");
        assert_eq!(result.previous_tag.as_deref(), Some("v1"));
    }

    #[test]
    fn empty_image_field_is_malformed() {
        let manifest = "containers:\n  - image: \"\"\n";
        let err = rewrite(manifest, "app", "v2").unwrap_err();

        assert!(matches!(
            err,
            RewriteError::MalformedImageField { line: 2, .. }
        ));
    }

    #[test]
    fn malformed_existing_tag_is_rejected() {
        let manifest = "image: app:-broken\n";
        let err = rewrite(manifest, "app", "v2").unwrap_err();

        assert!(matches!(err, RewriteError::MalformedImageField { .. }));
    }

    #[test]
    fn merge_aggregates_across_manifests() {
        let mut total = UpdateResult::no_match();
        total.merge(&UpdateResult {
            changed: true,
            previous_tag: Some("v1".into()),
            occurrences: 2,
        });
        total.merge(&UpdateResult::no_match());

        assert!(total.changed);
        assert_eq!(total.occurrences, 2);
        assert_eq!(total.previous_tag.as_deref(), Some("v1"));
    }

    proptest! {
        /// Applying the same update twice never changes the text again
        #[test]
        fn rewrite_is_idempotent(tag in "[a-z0-9][a-z0-9._-]{0,20}") {
            let (once, _) = rewrite(DEPLOYMENT, "app", &tag).unwrap();
            let (twice, second) = rewrite(&once, "app", &tag).unwrap();

            prop_assert_eq!(&once, &twice);
            prop_assert!(!second.changed);
        }
    }
}
