//! HTTP basic authentication for the scrape endpoint.

use crate::config::BasicAuthCredentials;
use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, WWW_AUTHENTICATE},
        HeaderMap, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;
use tracing::debug;

/// Challenge sent with every 401.
pub const CHALLENGE: &str = "Basic realm=\"probe\"";

/// State for the basic authentication middleware.
#[derive(Debug, Clone)]
pub struct BasicAuthState {
    pub credentials: BasicAuthCredentials,
}

/// Reject requests without matching basic credentials.
///
/// # Response
///
/// - Returns 401 Unauthorized with a `WWW-Authenticate` challenge if the
///   header is missing, malformed or carries the wrong credentials
/// - Continues to the next handler otherwise
pub async fn require_basic_auth(
    State(state): State<Arc<BasicAuthState>>,
    req: Request,
    next: Next,
) -> Response {
    if is_authorized(req.headers(), &state.credentials) {
        next.run(req).await
    } else {
        debug!(target: "probe.http.auth", "Rejected scrape without valid credentials");
        (
            StatusCode::UNAUTHORIZED,
            [(WWW_AUTHENTICATE, CHALLENGE)],
            "Unauthorized",
        )
            .into_response()
    }
}

fn is_authorized(headers: &HeaderMap, credentials: &BasicAuthCredentials) -> bool {
    let Some((scheme, encoded)) = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.trim().split_once(' '))
    else {
        return false;
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return false;
    }

    general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .and_then(|decoded| {
            decoded
                .split_once(':')
                .map(|(username, password)| credentials.matches(username, password))
        })
        .unwrap_or(false)
}
