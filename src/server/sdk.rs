//! Read-only mirror of generated SDK repositories.
//!
//! Routes:
//!   - GET  /sdk/:org/:repo/:sdk/info/refs?service=git-upload-pack
//!   - POST /sdk/:org/:repo/:sdk/git-upload-pack
//!
//! Identical framing to the source-repository surface, but only
//! `git-upload-pack` is permitted. Pushes are rejected with a fixed
//! response before credentials or the filesystem are ever consulted.

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use idlhub_git::{pkt::PktLineWriter, GitService, RepositoryRef};
use tracing::warn;

use crate::server::git::error_response;
use crate::server::{authenticate, AppState};

const READ_ONLY_BODY: &str = "SDK repositories are read-only";

#[derive(serde::Deserialize)]
pub struct InfoRefsQuery {
    service: String,
}

/// GET /sdk/:org/:repo/:sdk/info/refs?service=...
pub async fn info_refs(
    State(state): State<AppState>,
    Path((org, repo, sdk)): Path<(String, String, String)>,
    Query(query): Query<InfoRefsQuery>,
    headers: HeaderMap,
) -> Response {
    // Reject writes before anything else, credentials included.
    if query.service == GitService::ReceivePack.as_str() {
        return read_only_rejection();
    }
    let Some(service) = GitService::from_name(&query.service) else {
        return (StatusCode::BAD_REQUEST, "Unknown service").into_response();
    };

    let (_identity, mirror) =
        match authorize_mirror(&state, &headers, &org, &repo, &sdk).await {
            Ok(ok) => ok,
            Err(response) => return response,
        };

    match state.runner.advertise_refs(service, &mirror.path).await {
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

/// POST /sdk/:org/:repo/:sdk/:service
pub async fn service_rpc(
    State(state): State<AppState>,
    Path((org, repo, sdk, service_name)): Path<(String, String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if service_name == GitService::ReceivePack.as_str() {
        return read_only_rejection();
    }
    let Some(service) = GitService::from_name(&service_name) else {
        return (StatusCode::BAD_REQUEST, "Unknown service").into_response();
    };

    let (_identity, mirror) =
        match authorize_mirror(&state, &headers, &org, &repo, &sdk).await {
            Ok(ok) => ok,
            Err(response) => return response,
        };

    match state.runner.exchange(service, &mirror.path, body.to_vec()).await {
        Ok(output) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, service.result_content_type())
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from(output))
            .unwrap(),
        Err(err) => error_response(err),
    }
}

/// Authenticate and authorize a mirror read. Read access to the source
/// repository grants read access to its generated SDKs.
async fn authorize_mirror(
    state: &AppState,
    headers: &HeaderMap,
    org: &str,
    repo: &str,
    sdk: &str,
) -> Result<(crate::access::CallerIdentity, RepositoryRef), Response> {
    let identity = match authenticate(state, headers).await {
        Ok(identity) => identity,
        Err(response) => return Err(response),
    };

    let path = match state.sdk_repos.resolve(&[org, repo, sdk]) {
        Ok(path) => path,
        Err(err) => return Err(error_response(err)),
    };

    let source_repo = format!("{org}/{repo}");
    match state
        .gate
        .validate(identity.user_id, &source_repo, idlhub_git::AccessMode::Read)
        .await
    {
        Ok(true) => {}
        Ok(false) => return Err((StatusCode::FORBIDDEN, "Access denied").into_response()),
        Err(err) => {
            warn!(%err, repo = source_repo, "authorization check failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "authorization check failed")
                .into_response());
        }
    }

    let mirror = RepositoryRef::verify(path, idlhub_git::AccessMode::Read)
        .map_err(error_response)?;
    Ok((identity, mirror))
}

fn read_only_rejection() -> Response {
    (StatusCode::FORBIDDEN, READ_ONLY_BODY).into_response()
}
