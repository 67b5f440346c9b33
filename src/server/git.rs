//! Git smart HTTP protocol routes
//!
//! Routes:
//!   - GET  /git/:repo/info/refs?service=git-upload-pack|git-receive-pack
//!   - POST /git/:repo/git-upload-pack
//!   - POST /git/:repo/git-receive-pack
//!
//! Every request walks the same pipeline: authenticate, resolve the path
//! inside the repository root, authorize the implied operation, verify the
//! repository, then proxy to a native git subprocess. A write that
//! completes successfully fires the push trigger.

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use idlhub_git::{pkt::PktLineWriter, Error as GitError, GitService, RepositoryRef};
use tracing::warn;

use crate::access::CallerIdentity;
use crate::server::{authenticate, AppState};

#[derive(serde::Deserialize)]
pub struct InfoRefsQuery {
    service: String,
}

/// GET /git/:repo/info/refs?service=...
pub async fn info_refs(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    Query(query): Query<InfoRefsQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(service) = GitService::from_name(&query.service) else {
        return (StatusCode::BAD_REQUEST, "Unknown service").into_response();
    };

    let identity = match authenticate(&state, &headers).await {
        Ok(identity) => identity,
        Err(response) => return response,
    };

    let repo_ref = match resolve_and_authorize(&state, identity, &repo, service).await {
        Ok(repo_ref) => repo_ref,
        Err(response) => return response,
    };

    match state.runner.advertise_refs(service, &repo_ref.path).await {
        Ok(refs) => {
            let mut writer = PktLineWriter::new();
            writer.write_str(&format!("# service={}\n", service.as_str()));
            writer.flush();
            writer.write_raw(&refs);
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, service.advertisement_content_type())
                .header(header::CACHE_CONTROL, "no-cache")
                .body(Body::from(writer.into_bytes()))
                .unwrap()
        }
        Err(err) => error_response(err),
    }
}

/// POST /git/:repo/git-upload-pack | git-receive-pack
pub async fn service_rpc(
    State(state): State<AppState>,
    Path((repo, service_name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(service) = GitService::from_name(&service_name) else {
        return (StatusCode::BAD_REQUEST, "Unknown service").into_response();
    };

    let identity = match authenticate(&state, &headers).await {
        Ok(identity) => identity,
        Err(response) => return response,
    };

    let repo_ref = match resolve_and_authorize(&state, identity, &repo, service).await {
        Ok(repo_ref) => repo_ref,
        Err(response) => return response,
    };

    match state.runner.exchange(service, &repo_ref.path, body.to_vec()).await {
        Ok(output) => {
            // The pusher's exchange is complete; generation is decoupled
            // behind the queue and never delays this response's content.
            if service == GitService::ReceivePack {
                state.trigger.after_push(&repo, &repo_ref.path).await;
            }
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, service.result_content_type())
                .header(header::CACHE_CONTROL, "no-cache")
                .body(Body::from(output))
                .unwrap()
        }
        Err(err) => error_response(err),
    }
}

/// Resolve the untrusted repo segment, ask the gate, verify the repository.
pub(super) async fn resolve_and_authorize(
    state: &AppState,
    identity: CallerIdentity,
    repo: &str,
    service: GitService,
) -> Result<RepositoryRef, Response> {
    let path = match state.repos.resolve(&[repo]) {
        Ok(path) => path,
        Err(err) => return Err(error_response(err)),
    };

    match state
        .gate
        .validate(identity.user_id, repo, service.access())
        .await
    {
        Ok(true) => {}
        Ok(false) => return Err((StatusCode::FORBIDDEN, "Access denied").into_response()),
        Err(err) => {
            warn!(%err, repo, "authorization check failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "authorization check failed")
                .into_response());
        }
    }

    RepositoryRef::verify(path, service.access()).map_err(error_response)
}

pub(super) fn error_response(err: GitError) -> Response {
    let status = match &err {
        GitError::Validation(_) | GitError::Protocol(_) => StatusCode::BAD_REQUEST,
        GitError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        GitError::RepositoryNotFound(_) => StatusCode::NOT_FOUND,
        GitError::Process(_) | GitError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}
