use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use idlhub::jobs::{
    EmailJob, EmailWork, LogEmailSender, LogSdkGenerator, GenerationWork, PushTrigger,
    SdkGenerationJob, SdkTriggerJob, TriggerWork,
};
use idlhub::{
    AppState, Config, PgAccessGate, PgCredentialResolver, PgRepoDirectory, RegistryServer,
    SshServer, SshState, StatsState,
};
use idlhub_git::{PushInspector, RepoRoot, SystemGitRunner};
use idlhub_queue::{Queue, Worker};

#[derive(Parser)]
#[command(name = "idlhub")]
#[command(about = "Self-hosted schema registry data plane", long_about = None)]
struct Cli {
    /// Path to the config file (defaults to ~/.idlhub/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the registry daemon
    Start {
        #[arg(long)]
        http_addr: Option<String>,
        #[arg(long)]
        ssh_addr: Option<String>,
    },
    /// Print job queue statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Start { http_addr, ssh_addr } => {
            start(config, http_addr, ssh_addr).await
        }
        Commands::Stats => stats(config).await,
    }
}

async fn start(config: Config, http_addr: Option<String>, ssh_addr: Option<String>) -> Result<()> {
    let http_addr = http_addr.unwrap_or_else(|| config.server.http_addr.clone());
    let ssh_addr = ssh_addr.unwrap_or_else(|| config.server.ssh_addr.clone());

    fs::create_dir_all(&config.storage.repo_root)
        .with_context(|| format!("failed to create {}", config.storage.repo_root))?;
    fs::create_dir_all(&config.storage.sdk_root)
        .with_context(|| format!("failed to create {}", config.storage.sdk_root))?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("failed to connect to database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let repos = RepoRoot::new(&config.storage.repo_root);
    let sdk_repos = RepoRoot::new(&config.storage.sdk_root);
    let runner = Arc::new(SystemGitRunner::new());
    let inspector = PushInspector::new(config.sdk.schema_extensions.clone());

    let gate = Arc::new(PgAccessGate::new(pool.clone()));
    let resolver = Arc::new(PgCredentialResolver::new(pool.clone()));
    let directory = Arc::new(PgRepoDirectory::new(pool.clone()));

    let email_queue = Queue::<EmailJob>::new(pool.clone());
    let trigger_queue = Queue::<SdkTriggerJob>::new(pool.clone());
    let generation_queue = Queue::<SdkGenerationJob>::new(pool.clone());

    let trigger = Arc::new(PushTrigger::new(
        directory,
        inspector.clone(),
        trigger_queue.clone(),
        config.queue.max_attempts,
    ));

    let poll_interval = Duration::from_millis(config.queue.poll_interval_ms);
    let mut workers = vec![
        Worker::new(email_queue.clone(), EmailWork::new(LogEmailSender))
            .poll_interval(poll_interval)
            .claim_limit(config.queue.claim_limit)
            .spawn(),
        Worker::new(
            trigger_queue.clone(),
            TriggerWork::new(
                repos.clone(),
                inspector.clone(),
                generation_queue.clone(),
                config.sdk.targets.clone(),
                config.queue.max_attempts,
            ),
        )
        .poll_interval(poll_interval)
        .claim_limit(config.queue.claim_limit)
        .spawn(),
        Worker::new(generation_queue.clone(), GenerationWork::new(LogSdkGenerator))
            .poll_interval(poll_interval)
            .claim_limit(config.queue.claim_limit)
            .spawn(),
    ];

    let state = AppState {
        gate: gate.clone(),
        resolver: resolver.clone(),
        repos: repos.clone(),
        sdk_repos,
        runner: runner.clone(),
        trigger: trigger.clone(),
        stats: Some(StatsState {
            email: email_queue,
            triggers: trigger_queue,
            generation: generation_queue,
        }),
    };

    let http = RegistryServer::new(state, http_addr.clone());
    info!(addr = %http_addr, "http transport listening");
    let http_task = tokio::spawn(http.run());

    let ssh = SshServer::new(
        SshState {
            resolver,
            gate,
            repos,
            runner,
            trigger,
        },
        ssh_addr,
        config.server.ssh_host_key.as_deref(),
    )?;
    let ssh_task = tokio::spawn(ssh.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
        result = http_task => {
            result.context("http server task failed")??;
        }
        result = ssh_task => {
            result.context("ssh server task failed")??;
        }
    }

    for worker in &mut workers {
        worker.stop().await;
    }
    Ok(())
}

async fn stats(config: Config) -> Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database.url)
        .await
        .context("failed to connect to database")?;

    let email = Queue::<EmailJob>::new(pool.clone()).counts().await?;
    let triggers = Queue::<SdkTriggerJob>::new(pool.clone()).counts().await?;
    let generation = Queue::<SdkGenerationJob>::new(pool).counts().await?;

    println!("email:          {email}");
    println!("sdk triggers:   {triggers}");
    println!("sdk generation: {generation}");
    Ok(())
}
