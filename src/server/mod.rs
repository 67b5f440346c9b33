mod auth;
mod git;
mod sdk;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use idlhub_git::{GitRunner, RepoRoot};
use idlhub_queue::Queue;
use serde_json::json;

use crate::access::{AccessGate, CredentialResolver};
use crate::jobs::{EmailJob, PushTrigger, SdkGenerationJob, SdkTriggerJob};

pub use auth::authenticate;

/// Shared state for the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<dyn AccessGate>,
    pub resolver: Arc<dyn CredentialResolver>,
    /// Source repositories (read/write).
    pub repos: RepoRoot,
    /// Generated SDK repositories (read-only mirror).
    pub sdk_repos: RepoRoot,
    pub runner: Arc<dyn GitRunner>,
    pub trigger: Arc<PushTrigger>,
    pub stats: Option<StatsState>,
}

/// Queue handles backing `/api/stats`.
#[derive(Clone)]
pub struct StatsState {
    pub email: Queue<EmailJob>,
    pub triggers: Queue<SdkTriggerJob>,
    pub generation: Queue<SdkGenerationJob>,
}

pub struct RegistryServer {
    state: AppState,
    addr: String,
}

impl RegistryServer {
    pub fn new(state: AppState, addr: String) -> Self {
        Self { state, addr }
    }

    pub fn router(&self) -> Router {
        Router::new()
            // Git smart HTTP protocol
            .route("/git/:repo/info/refs", get(git::info_refs))
            .route("/git/:repo/:service", post(git::service_rpc))
            // Read-only mirror of generated SDK repositories
            .route("/sdk/:org/:repo/:sdk/info/refs", get(sdk::info_refs))
            .route("/sdk/:org/:repo/:sdk/:service", post(sdk::service_rpc))
            .route("/api/stats", get(stats))
            .with_state(self.state.clone())
    }

    pub async fn run(self) -> Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

/// GET /api/stats - job table counts per kind
async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let Some(stats) = &state.stats else {
        return Json(json!({ "error": "stats unavailable" }));
    };

    let email = stats.email.counts().await;
    let triggers = stats.triggers.counts().await;
    let generation = stats.generation.counts().await;

    match (email, triggers, generation) {
        (Ok(email), Ok(triggers), Ok(generation)) => Json(json!({
            "email": counts_json(email),
            "sdk_trigger": counts_json(triggers),
            "sdk_generation": counts_json(generation),
        })),
        (email, triggers, generation) => {
            let err = [
                email.err().map(|e| e.to_string()),
                triggers.err().map(|e| e.to_string()),
                generation.err().map(|e| e.to_string()),
            ]
            .into_iter()
            .flatten()
            .next()
            .unwrap_or_default();
            Json(json!({ "error": err }))
        }
    }
}

fn counts_json(counts: idlhub_queue::JobCounts) -> serde_json::Value {
    json!({
        "pending": counts.pending,
        "processing": counts.processing,
        "completed": counts.completed,
        "failed": counts.failed,
    })
}
