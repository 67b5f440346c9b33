//! Repository existence and validity checks.

use std::path::{Path, PathBuf};

use crate::service::AccessMode;
use crate::{Error, Result};

/// A resolved, verified repository target.
#[derive(Debug, Clone)]
pub struct RepositoryRef {
    pub path: PathBuf,
    pub exists: bool,
    pub is_git_repo: bool,
    pub mode: AccessMode,
}

impl RepositoryRef {
    /// Confirm the resolved path exists and is a git repository (bare
    /// `HEAD` or worktree `.git` marker) before anything is spawned.
    pub fn verify(path: PathBuf, mode: AccessMode) -> Result<Self> {
        let exists = path.is_dir();
        let is_git_repo = exists && is_git_repository(&path);

        if !exists || !is_git_repo {
            return Err(Error::RepositoryNotFound(path.display().to_string()));
        }

        Ok(Self {
            path,
            exists,
            is_git_repo,
            mode,
        })
    }
}

fn is_git_repository(path: &Path) -> bool {
    path.join("HEAD").is_file() || path.join(".git").exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn missing_directory_is_not_found() {
        let dir = tempdir().unwrap();
        let err = RepositoryRef::verify(dir.path().join("absent"), AccessMode::Read);
        assert!(matches!(err, Err(Error::RepositoryNotFound(_))));
    }

    #[test]
    fn plain_directory_is_not_a_repository() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("plain");
        fs::create_dir(&plain).unwrap();
        let err = RepositoryRef::verify(plain, AccessMode::Read);
        assert!(matches!(err, Err(Error::RepositoryNotFound(_))));
    }

    #[test]
    fn bare_repository_verifies() {
        let dir = tempdir().unwrap();
        let bare = dir.path().join("bare.git");
        fs::create_dir(&bare).unwrap();
        fs::write(bare.join("HEAD"), "ref: refs/heads/main\n").unwrap();

        let repo = RepositoryRef::verify(bare.clone(), AccessMode::Write).unwrap();
        assert!(repo.exists);
        assert!(repo.is_git_repo);
        assert_eq!(repo.path, bare);
        assert_eq!(repo.mode, AccessMode::Write);
    }

    #[test]
    fn worktree_repository_verifies() {
        let dir = tempdir().unwrap();
        let work = dir.path().join("work");
        fs::create_dir_all(work.join(".git")).unwrap();
        assert!(RepositoryRef::verify(work, AccessMode::Read).is_ok());
    }
}
