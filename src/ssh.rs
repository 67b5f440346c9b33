//! Git-over-SSH transport.
//!
//! Clients authenticate with a public key whose fingerprint resolves to a
//! user. An `exec` request carrying `git-upload-pack '<path>'` or
//! `git-receive-pack '<path>'` is authorized exactly like the HTTP surface
//! and then bridged byte-for-byte to a native git subprocess: channel data
//! feeds the child's stdin, stdout and stderr stream back on the channel,
//! and the child's exit code ends the session. Any other command is
//! refused.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, MethodSet};
use russh_keys::key::{KeyPair, PublicKey};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tracing::{debug, info, warn};

use idlhub_git::{GitRunner, GitService, RepoRoot, RepositoryRef, parse_ssh_command};

use crate::access::{CredentialResolver, AccessGate};
use crate::jobs::PushTrigger;

const STDERR_STREAM: u32 = 1;

/// Dependencies shared by every SSH connection.
#[derive(Clone)]
pub struct SshState {
    pub resolver: Arc<dyn CredentialResolver>,
    pub gate: Arc<dyn AccessGate>,
    pub repos: RepoRoot,
    pub runner: Arc<dyn GitRunner>,
    pub trigger: Arc<PushTrigger>,
}

pub struct SshServer {
    state: SshState,
    addr: String,
    config: Arc<server::Config>,
}

impl SshServer {
    /// Build the server, loading the host key from `host_key` or generating
    /// an ephemeral ed25519 key when none is configured.
    pub fn new(state: SshState, addr: String, host_key: Option<&Path>) -> anyhow::Result<Self> {
        let key = match host_key {
            Some(path) => russh_keys::load_secret_key(path, None)
                .with_context(|| format!("failed to load ssh host key {}", path.display()))?,
            None => {
                warn!("no ssh host key configured, generating an ephemeral one");
                KeyPair::generate_ed25519()
                    .context("failed to generate ephemeral ssh host key")?
            }
        };

        let config = server::Config {
            methods: MethodSet::PUBLICKEY,
            auth_rejection_time: Duration::from_secs(1),
            keys: vec![key],
            ..Default::default()
        };

        Ok(Self {
            state,
            addr,
            config: Arc::new(config),
        })
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(addr = %self.addr, "ssh transport listening");
        let config = self.config.clone();
        let addr = self.addr.clone();
        server::Server::run_on_address(&mut self, config, addr.as_str()).await?;
        Ok(())
    }
}

impl server::Server for SshServer {
    type Handler = SshConnection;

    fn new_client(&mut self, peer: Option<SocketAddr>) -> SshConnection {
        debug!(?peer, "ssh connection opened");
        SshConnection {
            state: self.state.clone(),
            user_id: None,
            stdin: HashMap::new(),
        }
    }
}

/// Resolve and authorize an exec command, in the same order as the HTTP
/// pipeline: parse and whitelist, confine the path, ask the gate, verify
/// the repository. The gate never sees an invalid path, and nothing is
/// spawned on any failure.
async fn resolve_session_target(
    state: &SshState,
    user_id: i64,
    command: &str,
) -> Result<(GitService, String, RepositoryRef), String> {
    let (service, raw_path) =
        parse_ssh_command(command).ok_or_else(|| "unsupported command".to_string())?;
    let repo = raw_path.trim_matches('/').to_string();

    let path = state.repos.resolve_raw(&repo).map_err(|err| err.to_string())?;

    match state.gate.validate(user_id, &repo, service.access()).await {
        Ok(true) => {}
        Ok(false) => return Err("access denied".to_string()),
        Err(err) => {
            warn!(%err, repo, "authorization check failed");
            return Err("internal error".to_string());
        }
    }

    let repo_ref = RepositoryRef::verify(path, service.access()).map_err(|err| err.to_string())?;
    Ok((service, repo, repo_ref))
}

/// Per-connection handler state.
pub struct SshConnection {
    state: SshState,
    user_id: Option<i64>,
    /// Stdin of the subprocess serving each active exec channel.
    stdin: HashMap<ChannelId, ChildStdin>,
}

impl SshConnection {
    async fn start_service(
        &mut self,
        channel: ChannelId,
        command: &str,
        session: &mut Session,
    ) -> anyhow::Result<()> {
        let Some(user_id) = self.user_id else {
            return self.refuse(channel, session, "not authenticated").await;
        };
        if self.stdin.contains_key(&channel) {
            return self.refuse(channel, session, "channel already has a session").await;
        }

        let (service, repo, repo_ref) =
            match resolve_session_target(&self.state, user_id, command).await {
                Ok(target) => target,
                Err(message) => return self.refuse(channel, session, &message).await,
            };

        let mut git = self.state.runner.spawn_session(service, &repo_ref.path).await?;
        if let Some(stdin) = git.take_stdin() {
            self.stdin.insert(channel, stdin);
        }
        let stdout = git
            .take_stdout()
            .context("git stdout unavailable")?;
        let stderr = git
            .take_stderr()
            .context("git stderr unavailable")?;

        let handle = session.handle();
        let trigger = self.state.trigger.clone();
        let repo_dir = repo_ref.path.clone();

        // stderr is pumped independently so a chatty subprocess cannot
        // stall the pack stream.
        let err_handle = handle.clone();
        tokio::spawn(async move {
            let mut stderr = stderr;
            let mut buf = [0u8; 8192];
            while let Ok(n) = stderr.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                if err_handle
                    .extended_data(channel, STDERR_STREAM, CryptoVec::from_slice(&buf[..n]))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut stdout = stdout;
            let mut buf = [0u8; 32768];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if handle
                            .data(channel, CryptoVec::from_slice(&buf[..n]))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }

            let code = match git.wait().await {
                Ok(status) => status.code().unwrap_or(1) as u32,
                Err(err) => {
                    warn!(%err, "failed to wait for git subprocess");
                    1
                }
            };

            if service == GitService::ReceivePack && code == 0 {
                trigger.after_push(&repo, &repo_dir).await;
            }

            let _ = handle.exit_status_request(channel, code).await;
            let _ = handle.eof(channel).await;
            let _ = handle.close(channel).await;
        });

        session.channel_success(channel);
        Ok(())
    }

    async fn refuse(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
        message: &str,
    ) -> anyhow::Result<()> {
        let line = format!("idlhub: {message}\r\n");
        let handle = session.handle();
        let _ = handle
            .extended_data(channel, STDERR_STREAM, CryptoVec::from_slice(line.as_bytes()))
            .await;
        session.channel_failure(channel);
        let _ = handle.close(channel).await;
        Ok(())
    }
}

#[async_trait]
impl server::Handler for SshConnection {
    type Error = anyhow::Error;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let fingerprint = public_key.fingerprint();
        match self.state.resolver.resolve_ssh_key(&fingerprint).await {
            Ok(Some(user_id)) => {
                debug!(user, user_id, "ssh key accepted");
                self.user_id = Some(user_id);
                Ok(Auth::Accept)
            }
            Ok(None) => {
                debug!(user, fingerprint, "unknown ssh key");
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                })
            }
            Err(err) => {
                warn!(%err, "ssh credential lookup failed");
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                })
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).to_string();
        debug!(%command, "ssh exec request");
        if let Err(err) = self.start_service(channel, &command, session).await {
            warn!(%err, "failed to start git session");
            self.refuse(channel, session, "internal error").await?;
        }
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(stdin) = self.stdin.get_mut(&channel) {
            if stdin.write_all(data).await.is_err() {
                self.stdin.remove(&channel);
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Dropping stdin closes the pipe; the subprocess sees EOF and
        // finishes its side of the exchange.
        self.stdin.remove(&channel);
        Ok(())
    }
}
