//! Integration tests using the actual git CLI.
//!
//! Skipped entirely when no `git` binary is on PATH.

use std::path::Path;
use std::process::Command;

use idlhub_git::{GitRunner, GitService, PushInspector, SystemGitRunner};
use tempfile::tempdir;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args([
            "-c",
            "user.name=idlhub-test",
            "-c",
            "user.email=test@idlhub.invalid",
        ])
        .args(args)
        .status()
        .expect("run git");
    assert!(status.success(), "git {args:?} failed in {}", dir.display());
}

#[tokio::test]
async fn advertise_refs_speaks_for_a_bare_repo() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }

    let dir = tempdir().unwrap();
    let bare = dir.path().join("repo.git");
    std::fs::create_dir(&bare).unwrap();
    git(&bare, &["init", "--bare", "--quiet"]);

    let runner = SystemGitRunner::new();
    let refs = runner
        .advertise_refs(GitService::UploadPack, &bare)
        .await
        .expect("advertise refs");

    // Empty repo still advertises capabilities behind the zero id.
    let text = String::from_utf8_lossy(&refs);
    assert!(text.contains("capabilities^{}"), "got: {text}");
}

#[tokio::test]
async fn exchange_accepts_an_empty_request() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }

    let dir = tempdir().unwrap();
    let bare = dir.path().join("repo.git");
    std::fs::create_dir(&bare).unwrap();
    git(&bare, &["init", "--bare", "--quiet"]);

    let runner = SystemGitRunner::new();
    // A lone flush packet ends the negotiation before it starts.
    let response = runner
        .exchange(GitService::UploadPack, &bare, b"0000".to_vec())
        .await
        .expect("exchange");
    assert!(response.is_empty() || response.starts_with(b"0008NAK") || response.starts_with(b"0007"));
}

#[tokio::test]
async fn inspector_finds_pushed_schemas() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }

    let dir = tempdir().unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir(&work).unwrap();
    git(&work, &["init", "--quiet"]);

    std::fs::create_dir(work.join("api")).unwrap();
    std::fs::write(work.join("api/schema.proto"), "syntax = \"proto3\";\n").unwrap();
    std::fs::write(work.join("README.md"), "# test\n").unwrap();
    git(&work, &["add", "."]);
    git(&work, &["commit", "--quiet", "-m", "add schema"]);

    let inspector = PushInspector::new(vec![".proto".to_string()]);
    let pushed = inspector
        .inspect(&work)
        .await
        .expect("inspect")
        .expect("schemas present");

    assert_eq!(pushed.commit.len(), 40);
    assert_eq!(pushed.schema_paths, vec!["api/schema.proto"]);
}

#[tokio::test]
async fn inspector_ignores_repos_without_schemas() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }

    let dir = tempdir().unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir(&work).unwrap();
    git(&work, &["init", "--quiet"]);

    // Empty repository: rev-parse HEAD fails, which means "nothing to do".
    let inspector = PushInspector::new(vec![".proto".to_string()]);
    assert_eq!(inspector.inspect(&work).await.unwrap(), None);

    std::fs::write(work.join("README.md"), "# test\n").unwrap();
    git(&work, &["add", "."]);
    git(&work, &["commit", "--quiet", "-m", "docs only"]);
    assert_eq!(inspector.inspect(&work).await.unwrap(), None);
}
