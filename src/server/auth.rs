//! HTTP Basic authentication.
//!
//! The credential is an opaque API key carried in the password field; the
//! username is ignored. The key resolves to a user identity once per
//! request.

use axum::{
    body::Body,
    http::{header, HeaderMap, Response, StatusCode},
};
use base64::Engine;
use tracing::warn;

use crate::access::{AuthMethod, CallerIdentity};
use crate::server::AppState;

/// Resolve the request's Basic credential to a [`CallerIdentity`], or
/// produce the 401/500 response to return instead.
pub async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<CallerIdentity, Response<Body>> {
    let Some(api_key) = api_key_from_headers(headers) else {
        return Err(unauthorized());
    };

    match state.resolver.resolve_api_key(&api_key).await {
        Ok(Some(user_id)) => Ok(CallerIdentity {
            user_id,
            method: AuthMethod::ApiKey,
        }),
        Ok(None) => Err(unauthorized()),
        Err(err) => {
            warn!(%err, "credential lookup failed");
            Err(Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("credential lookup failed"))
                .unwrap())
        }
    }
}

fn api_key_from_headers(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;

    // "user:key"; the key is the password field, the username is ignored.
    let (_, key) = decoded.split_once(':')?;
    if key.is_empty() {
        return None;
    }
    Some(key.to_string())
}

pub fn unauthorized() -> Response<Body> {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::WWW_AUTHENTICATE, "Basic realm=\"idlhub\"")
        .body(Body::from("Unauthorized"))
        .unwrap()
}
