use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use metrics::counter;
use subtle::ConstantTimeEq;
use tracing::warn;

use customer_registry_util::BasicCredentials;

use crate::router::AppState;

const CHALLENGE: &str = "Basic realm=\"customer-registry\"";

/// Reasons a request fails HTTP Basic authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingHeader,
    MalformedHeader,
    InvalidCredentials,
}

impl AuthFailure {
    fn metric_label(self) -> &'static str {
        match self {
            Self::MissingHeader => "missing_header",
            Self::MalformedHeader => "malformed_header",
            Self::InvalidCredentials => "invalid_credentials",
        }
    }
}

/// Rejects requests without valid Basic credentials unless the path is
/// listed as public.
pub async fn require_basic_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let security = state.security();
    if security.is_public(request.uri().path()) {
        return next.run(request).await;
    }

    match verify_basic_auth(&security.credentials, request.headers()) {
        Ok(()) => next.run(request).await,
        Err(failure) => {
            warn!(
                stage = "auth",
                path = %request.uri().path(),
                reason = failure.metric_label(),
                "rejected unauthenticated request"
            );
            counter!("auth_rejections_total", "reason" => failure.metric_label()).increment(1);
            unauthorized()
        }
    }
}

/// Checks the `Authorization` header against the configured credential pair.
pub fn verify_basic_auth(
    credentials: &BasicCredentials,
    headers: &HeaderMap,
) -> Result<(), AuthFailure> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthFailure::MissingHeader)?
        .to_str()
        .map_err(|_| AuthFailure::MalformedHeader)?;

    let (scheme, encoded) = value
        .trim()
        .split_once(' ')
        .ok_or(AuthFailure::MalformedHeader)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(AuthFailure::MalformedHeader);
    }

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthFailure::MalformedHeader)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthFailure::MalformedHeader)?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or(AuthFailure::MalformedHeader)?;

    let username_ok = username.as_bytes().ct_eq(credentials.username.as_bytes());
    let password_ok = password.as_bytes().ct_eq(credentials.password.as_bytes());
    if (username_ok & password_ok).into() {
        Ok(())
    } else {
        Err(AuthFailure::InvalidCredentials)
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, HeaderValue::from_static(CHALLENGE))],
    )
        .into_response()
}
