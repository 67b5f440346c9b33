//! Narrow subprocess abstraction around the native `git` binary.
//!
//! Every transport funnels through [`GitRunner`]: the smart-HTTP handlers
//! use the buffered `advertise_refs`/`exchange` calls, the SSH session uses
//! `spawn_session` for bidirectional streaming. Tests substitute the trait
//! with a mock so no process is ever spawned.

use std::path::Path;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::debug;

use crate::service::GitService;
use crate::{Error, Result};

#[async_trait]
pub trait GitRunner: Send + Sync {
    /// Run `git <service> --stateless-rpc --advertise-refs` and return its
    /// raw ref advertisement (without the pkt-line announcement header).
    async fn advertise_refs(&self, service: GitService, repo: &Path) -> Result<Vec<u8>>;

    /// Run one stateless-rpc round: the request body goes to the
    /// subprocess's stdin, its stdout is returned.
    async fn exchange(&self, service: GitService, repo: &Path, input: Vec<u8>) -> Result<Vec<u8>>;

    /// Spawn the service with piped stdio for a streaming session.
    async fn spawn_session(&self, service: GitService, repo: &Path) -> Result<GitSession>;
}

/// A live git subprocess with its stdio handles.
///
/// The child is spawned with `kill_on_drop`, so dropping the session (a
/// disconnected client) terminates the process instead of leaking it.
pub struct GitSession {
    child: Child,
}

impl GitSession {
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    pub async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }
}

/// Runs the real `git` binary.
#[derive(Debug, Clone, Default)]
pub struct SystemGitRunner;

impl SystemGitRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(&self, service: GitService, repo: &Path, stateless_rpc: bool, advertise: bool) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg(service.subcommand());
        if stateless_rpc {
            cmd.arg("--stateless-rpc");
        }
        if advertise {
            cmd.arg("--advertise-refs");
        }
        cmd.arg(repo)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl GitRunner for SystemGitRunner {
    async fn advertise_refs(&self, service: GitService, repo: &Path) -> Result<Vec<u8>> {
        debug!(service = service.as_str(), repo = %repo.display(), "advertising refs");
        let output = self
            .command(service, repo, true, true)
            .output()
            .await
            .map_err(|err| Error::Process(format!("failed to spawn git: {err}")))?;

        if !output.status.success() {
            return Err(Error::Process(format!(
                "{} exited with {}: {}",
                service.as_str(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    async fn exchange(&self, service: GitService, repo: &Path, input: Vec<u8>) -> Result<Vec<u8>> {
        debug!(service = service.as_str(), repo = %repo.display(), "running stateless rpc");
        let mut child = self
            .command(service, repo, true, false)
            .spawn()
            .map_err(|err| Error::Process(format!("failed to spawn git: {err}")))?;

        // Feed the body from a separate task so a subprocess that starts
        // responding early cannot deadlock against a blocked writer.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Process("git stdin unavailable".into()))?;
        let writer = tokio::spawn(async move {
            let _ = stdin.write_all(&input).await;
            let _ = stdin.shutdown().await;
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|err| Error::Process(format!("failed to wait for git: {err}")))?;
        let _ = writer.await;

        if !output.status.success() {
            return Err(Error::Process(format!(
                "{} exited with {}: {}",
                service.as_str(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    async fn spawn_session(&self, service: GitService, repo: &Path) -> Result<GitSession> {
        debug!(service = service.as_str(), repo = %repo.display(), "spawning session");
        let child = self
            .command(service, repo, false, false)
            .spawn()
            .map_err(|err| Error::Process(format!("failed to spawn git: {err}")))?;
        Ok(GitSession { child })
    }
}
