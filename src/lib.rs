pub mod access;
pub mod config;
pub mod jobs;
pub mod server;
pub mod ssh;

pub use access::{
    AccessGate, AuthMethod, CallerIdentity, CredentialResolver, PgAccessGate,
    PgCredentialResolver, PgRepoDirectory, RepoDirectory,
};
pub use config::{default_config_path, idlhub_dir, Config};
pub use idlhub_git::{GitRunner, PushInspector, RepoRoot, SystemGitRunner};
pub use jobs::{
    EmailJob, EmailWork, GenerationWork, LogEmailSender, LogSdkGenerator, PushTrigger,
    SdkGenerationJob, SdkTriggerJob, TriggerWork,
};
pub use server::{AppState, RegistryServer, StatsState};
pub use ssh::{SshServer, SshState};
