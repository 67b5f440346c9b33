//! Caller identity and per-repository authorization.
//!
//! Both transports resolve a transport credential (SSH public key or HTTP
//! Basic API key) into a [`CallerIdentity`] once per connection, then ask
//! the [`AccessGate`] a single boolean question per operation. The
//! management of users, keys and grants lives outside the data plane; this
//! module only reads.

use async_trait::async_trait;
use idlhub_git::AccessMode;
use sqlx::PgPool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("database error: {0}")]
    Backend(#[from] sqlx::Error),
}

/// How the caller proved who they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    SshKey,
    ApiKey,
}

/// Resolved once per connection; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: i64,
    pub method: AuthMethod,
}

/// Answers "may this identity perform {read,write} on this repository".
#[async_trait]
pub trait AccessGate: Send + Sync {
    async fn validate(
        &self,
        user_id: i64,
        repo_path: &str,
        mode: AccessMode,
    ) -> Result<bool, AccessError>;
}

/// Maps transport credentials to user ids.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve_api_key(&self, api_key: &str) -> Result<Option<i64>, AccessError>;
    async fn resolve_ssh_key(&self, fingerprint: &str) -> Result<Option<i64>, AccessError>;
}

/// Looks up the registry id of a repository by its relative path.
#[async_trait]
pub trait RepoDirectory: Send + Sync {
    async fn repository_id(&self, repo_path: &str) -> Result<Option<i64>, AccessError>;
}

/// Postgres-backed access checks over the `repository_access` grant table.
#[derive(Debug, Clone)]
pub struct PgAccessGate {
    pool: PgPool,
}

impl PgAccessGate {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccessGate for PgAccessGate {
    async fn validate(
        &self,
        user_id: i64,
        repo_path: &str,
        mode: AccessMode,
    ) -> Result<bool, AccessError> {
        let can_write: Option<bool> = sqlx::query_scalar(
            "SELECT can_write FROM repository_access WHERE user_id = $1 AND repo_path = $2",
        )
        .bind(user_id)
        .bind(repo_path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match (can_write, mode) {
            (None, _) => false,
            (Some(_), AccessMode::Read) => true,
            (Some(write), AccessMode::Write) => write,
        })
    }
}

/// Postgres-backed credential lookups.
#[derive(Debug, Clone)]
pub struct PgCredentialResolver {
    pool: PgPool,
}

impl PgCredentialResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialResolver for PgCredentialResolver {
    async fn resolve_api_key(&self, api_key: &str) -> Result<Option<i64>, AccessError> {
        let user_id = sqlx::query_scalar("SELECT user_id FROM api_keys WHERE api_key = $1")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user_id)
    }

    async fn resolve_ssh_key(&self, fingerprint: &str) -> Result<Option<i64>, AccessError> {
        let user_id = sqlx::query_scalar("SELECT user_id FROM ssh_keys WHERE fingerprint = $1")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user_id)
    }
}

/// Postgres-backed repository id lookups.
#[derive(Debug, Clone)]
pub struct PgRepoDirectory {
    pool: PgPool,
}

impl PgRepoDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RepoDirectory for PgRepoDirectory {
    async fn repository_id(&self, repo_path: &str) -> Result<Option<i64>, AccessError> {
        let id = sqlx::query_scalar("SELECT id FROM repositories WHERE path = $1")
            .bind(repo_path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }
}
