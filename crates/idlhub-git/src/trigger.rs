//! Post-push inspection.
//!
//! After a `git-receive-pack` subprocess exits successfully, the inspector
//! resolves the new tip commit and scans its tree for interface-definition
//! sources. The caller decides what to enqueue; this module only answers
//! "did schemas land, and at which commit".

use std::path::Path;

use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Outcome of inspecting a freshly pushed repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedSchemas {
    /// Tip commit hash (`rev-parse HEAD`).
    pub commit: String,
    /// Tree paths recognized as schema sources, in tree order.
    pub schema_paths: Vec<String>,
}

/// Scans pushed trees for files with configured schema extensions.
#[derive(Debug, Clone)]
pub struct PushInspector {
    extensions: Vec<String>,
}

impl PushInspector {
    /// `extensions` entries include the dot, e.g. `".proto"`.
    pub fn new(extensions: Vec<String>) -> Self {
        Self { extensions }
    }

    /// Returns `None` for an empty repository or a tree without schema
    /// sources; both mean no downstream work.
    pub async fn inspect(&self, repo: &Path) -> Result<Option<PushedSchemas>> {
        let commit = match self.rev_parse_head(repo).await? {
            Some(commit) => commit,
            None => return Ok(None),
        };

        let names = self.list_tree(repo, &commit).await?;
        let schema_paths = self.matching_schemas(names);
        if schema_paths.is_empty() {
            debug!(repo = %repo.display(), %commit, "no schema sources in pushed tree");
            return Ok(None);
        }

        Ok(Some(PushedSchemas { commit, schema_paths }))
    }

    fn matching_schemas(&self, names: Vec<String>) -> Vec<String> {
        names
            .into_iter()
            .filter(|name| self.extensions.iter().any(|ext| name.ends_with(ext.as_str())))
            .collect()
    }

    async fn rev_parse_head(&self, repo: &Path) -> Result<Option<String>> {
        let output = Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(["rev-parse", "HEAD"])
            .output()
            .await
            .map_err(|err| Error::Process(format!("failed to spawn git rev-parse: {err}")))?;

        // rev-parse fails on a repository with no commits; that is not an
        // error for the trigger, there is simply nothing to generate.
        if !output.status.success() {
            return Ok(None);
        }
        let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if commit.is_empty() {
            return Ok(None);
        }
        Ok(Some(commit))
    }

    async fn list_tree(&self, repo: &Path, commit: &str) -> Result<Vec<String>> {
        let output = Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(["ls-tree", "-r", "--name-only", commit])
            .output()
            .await
            .map_err(|err| Error::Process(format!("failed to spawn git ls-tree: {err}")))?;

        if !output.status.success() {
            return Err(Error::Process(format!(
                "git ls-tree exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inspector() -> PushInspector {
        PushInspector::new(vec![".proto".into(), ".graphql".into()])
    }

    #[test]
    fn filters_by_configured_extensions() {
        let names = vec![
            "api/schema.proto".to_string(),
            "README.md".to_string(),
            "queries/users.graphql".to_string(),
            "src/main.rs".to_string(),
            "protobuf".to_string(),
        ];
        let matched = inspector().matching_schemas(names);
        assert_eq!(matched, vec!["api/schema.proto", "queries/users.graphql"]);
    }

    #[test]
    fn no_matches_yields_empty() {
        let matched = inspector().matching_schemas(vec!["a.rs".into(), "b.md".into()]);
        assert!(matched.is_empty());
    }
}
