//! Root-confined repository path resolution.
//!
//! Protocol commands carry untrusted path segments. Every segment is
//! validated on its own, and the joined result must still lie strictly
//! inside the configured root. The containment check is component-wise
//! (`Path::starts_with`), never a string prefix: `/srv/repos-evil` must not
//! pass a check for `/srv/repos`.

use std::path::{Component, Path, PathBuf};

use crate::{Error, Result};

/// The directory all served repositories live under.
#[derive(Debug, Clone)]
pub struct RepoRoot {
    root: PathBuf,
}

impl RepoRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Join validated segments onto the root.
    pub fn resolve(&self, segments: &[&str]) -> Result<PathBuf> {
        if segments.is_empty() {
            return Err(Error::Validation("empty repository path".into()));
        }

        let mut candidate = self.root.clone();
        for segment in segments {
            validate_segment(segment)?;
            candidate.push(segment);
        }

        if !candidate.starts_with(&self.root) {
            return Err(Error::Validation("path escapes repository root".into()));
        }
        Ok(candidate)
    }

    /// Split a raw `a/b/c` path on `/` and resolve the pieces.
    pub fn resolve_raw(&self, raw: &str) -> Result<PathBuf> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Err(Error::Validation("empty repository path".into()));
        }
        let segments: Vec<&str> = trimmed.split('/').collect();
        self.resolve(&segments)
    }
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() || segment == "." {
        return Err(Error::Validation(format!("invalid path segment {segment:?}")));
    }
    if segment.contains("..") {
        return Err(Error::Validation(format!("traversal in path segment {segment:?}")));
    }
    if segment.contains('/') || segment.contains('\\') || segment.contains('\0') {
        return Err(Error::Validation(format!("separator in path segment {segment:?}")));
    }
    let path = Path::new(segment);
    if path.is_absolute() {
        return Err(Error::Validation(format!("absolute path segment {segment:?}")));
    }
    // The segment must survive normalization as exactly one normal component.
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(c)), None) if c == segment => Ok(()),
        _ => Err(Error::Validation(format!("invalid path segment {segment:?}"))),
    }
}
