//! Job payloads and the units of work that process them.
//!
//! Three job kinds flow through the queue engine: invitation emails, push
//! triggers, and SDK generation. The actual email delivery and code
//! generation are injected behind traits; the data plane only schedules
//! and retries them.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use idlhub_git::{PushInspector, RepoRoot};
use idlhub_queue::{Job, JobPayload, NewJob, Queue, UnitOfWork};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::access::RepoDirectory;

/// Invitation email delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailJob {
    pub invite_id: i64,
    pub organization_id: i64,
    pub email: String,
    pub organization_name: String,
    pub invite_token: String,
}

impl JobPayload for EmailJob {
    const TABLE: &'static str = "email_jobs";
    const KIND: &'static str = "email";
}

/// "A push with schemas happened"; fans out into generation jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkTriggerJob {
    pub repository_id: i64,
    pub repo_path: String,
}

impl JobPayload for SdkTriggerJob {
    const TABLE: &'static str = "sdk_trigger_jobs";
    const KIND: &'static str = "sdk-trigger";
}

/// One SDK build for one commit and target language.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkGenerationJob {
    pub repository_id: i64,
    pub commit_hash: String,
    pub sdk_kind: String,
}

impl JobPayload for SdkGenerationJob {
    const TABLE: &'static str = "sdk_generation_jobs";
    const KIND: &'static str = "sdk-generation";
}

/// Delivers organization invites.
#[async_trait]
pub trait EmailSender: Send + Sync + 'static {
    async fn send_invite(&self, to: &str, org_name: &str, token: &str) -> anyhow::Result<()>;
}

/// Produces one SDK for one commit.
#[async_trait]
pub trait SdkGenerator: Send + Sync + 'static {
    async fn generate(
        &self,
        repository_id: i64,
        commit_hash: &str,
        sdk_kind: &str,
    ) -> anyhow::Result<()>;
}

/// Unit of work for [`EmailJob`].
pub struct EmailWork<S> {
    sender: S,
}

impl<S: EmailSender> EmailWork<S> {
    pub fn new(sender: S) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl<S: EmailSender> UnitOfWork<EmailJob> for EmailWork<S> {
    async fn run(&self, job: &Job<EmailJob>) -> anyhow::Result<()> {
        let payload = &job.payload;
        self.sender
            .send_invite(&payload.email, &payload.organization_name, &payload.invite_token)
            .await
    }
}

/// Unit of work for [`SdkGenerationJob`].
pub struct GenerationWork<G> {
    generator: G,
}

impl<G: SdkGenerator> GenerationWork<G> {
    pub fn new(generator: G) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl<G: SdkGenerator> UnitOfWork<SdkGenerationJob> for GenerationWork<G> {
    async fn run(&self, job: &Job<SdkGenerationJob>) -> anyhow::Result<()> {
        let payload = &job.payload;
        self.generator
            .generate(payload.repository_id, &payload.commit_hash, &payload.sdk_kind)
            .await
    }
}

/// Unit of work for [`SdkTriggerJob`]: re-inspect the repository at its
/// current tip and enqueue one generation job per configured target.
pub struct TriggerWork {
    repos: RepoRoot,
    inspector: PushInspector,
    generation: Queue<SdkGenerationJob>,
    targets: Vec<String>,
    max_attempts: i32,
}

impl TriggerWork {
    pub fn new(
        repos: RepoRoot,
        inspector: PushInspector,
        generation: Queue<SdkGenerationJob>,
        targets: Vec<String>,
        max_attempts: i32,
    ) -> Self {
        Self {
            repos,
            inspector,
            generation,
            targets,
            max_attempts,
        }
    }
}

#[async_trait]
impl UnitOfWork<SdkTriggerJob> for TriggerWork {
    async fn run(&self, job: &Job<SdkTriggerJob>) -> anyhow::Result<()> {
        let payload = &job.payload;
        let repo_dir = self.repos.resolve_raw(&payload.repo_path)?;

        let pushed = match self.inspector.inspect(&repo_dir).await? {
            Some(pushed) => pushed,
            // Schemas disappeared between push and trigger; nothing to do.
            None => return Ok(()),
        };

        let jobs = self
            .targets
            .iter()
            .map(|target| {
                NewJob::new(
                    SdkGenerationJob {
                        repository_id: payload.repository_id,
                        commit_hash: pushed.commit.clone(),
                        sdk_kind: target.clone(),
                    },
                    self.max_attempts,
                )
            })
            .collect();

        let ids = self.generation.enqueue_batch(jobs).await?;
        info!(
            repository_id = payload.repository_id,
            commit = %pushed.commit,
            jobs = ids.len(),
            "enqueued sdk generation"
        );
        Ok(())
    }
}

/// Post-write hook shared by both transports.
///
/// Runs after a `git-receive-pack` subprocess exits successfully. Inspects
/// the pushed repository and enqueues one trigger job when schema sources
/// are present. Never fails the push: the client's git exchange already
/// finished, so problems here are logged and retried by the queue, not
/// surfaced to the pusher.
pub struct PushTrigger {
    directory: Arc<dyn RepoDirectory>,
    inspector: PushInspector,
    triggers: Queue<SdkTriggerJob>,
    max_attempts: i32,
}

impl PushTrigger {
    pub fn new(
        directory: Arc<dyn RepoDirectory>,
        inspector: PushInspector,
        triggers: Queue<SdkTriggerJob>,
        max_attempts: i32,
    ) -> Self {
        Self {
            directory,
            inspector,
            triggers,
            max_attempts,
        }
    }

    pub async fn after_push(&self, repo_path: &str, repo_dir: &Path) {
        if let Err(err) = self.try_after_push(repo_path, repo_dir).await {
            warn!(repo = repo_path, error = %format!("{err:#}"), "push trigger failed");
        }
    }

    async fn try_after_push(&self, repo_path: &str, repo_dir: &Path) -> anyhow::Result<()> {
        if self.inspector.inspect(repo_dir).await?.is_none() {
            return Ok(());
        }

        let repository_id = match self.directory.repository_id(repo_path).await? {
            Some(id) => id,
            None => {
                warn!(repo = repo_path, "pushed repository is not registered");
                return Ok(());
            }
        };

        let id = self
            .triggers
            .enqueue(NewJob::new(
                SdkTriggerJob {
                    repository_id,
                    repo_path: repo_path.to_string(),
                },
                self.max_attempts,
            ))
            .await?;
        info!(repo = repo_path, job_id = id, "enqueued sdk trigger");
        Ok(())
    }
}

/// Email sender that only logs; real delivery is injected in production.
#[derive(Debug, Clone, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_invite(&self, to: &str, org_name: &str, _token: &str) -> anyhow::Result<()> {
        info!(%to, organization = org_name, "would send invitation email");
        Ok(())
    }
}

/// Generator that only logs; the generation pipeline is injected in
/// production.
#[derive(Debug, Clone, Default)]
pub struct LogSdkGenerator;

#[async_trait]
impl SdkGenerator for LogSdkGenerator {
    async fn generate(
        &self,
        repository_id: i64,
        commit_hash: &str,
        sdk_kind: &str,
    ) -> anyhow::Result<()> {
        info!(repository_id, commit = commit_hash, kind = sdk_kind, "would generate sdk");
        Ok(())
    }
}
