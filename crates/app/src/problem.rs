use std::{any::Any, collections::BTreeMap};

use axum::{
    extract::{Request, State},
    http::{StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::error;

use crate::router::AppState;
use crate::service::CustomerServiceError;

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ErrorBody {
    Detail {
        timestamp: String,
        status: u16,
        error: &'static str,
        message: String,
        path: String,
    },
    Fields {
        timestamp: String,
        status: u16,
        errors: BTreeMap<String, String>,
    },
}

/// Structured JSON error returned by every customer endpoint.
#[derive(Debug)]
pub struct ProblemResponse {
    status: StatusCode,
    body: ErrorBody,
}

impl ProblemResponse {
    pub fn not_found<S: Into<String>>(now: DateTime<Utc>, message: S, path: &str) -> Self {
        Self::detail(StatusCode::NOT_FOUND, "Customer not found", now, message, path)
    }

    pub fn internal<S: Into<String>>(now: DateTime<Utc>, message: S, path: &str) -> Self {
        Self::detail(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            now,
            message,
            path,
        )
    }

    pub fn route_not_found(now: DateTime<Utc>, path: &str) -> Self {
        Self::detail(
            StatusCode::NOT_FOUND,
            "Not Found",
            now,
            format!("No route for {path}"),
            path,
        )
    }

    pub fn method_not_allowed(now: DateTime<Utc>, path: &str) -> Self {
        Self::detail(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method Not Allowed",
            now,
            format!("Method not supported for {path}"),
            path,
        )
    }

    /// Builds a 400 response listing one message per offending field.
    pub fn invalid_fields<I, K, V>(now: DateTime<Utc>, errors: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let status = StatusCode::BAD_REQUEST;
        Self {
            status,
            body: ErrorBody::Fields {
                timestamp: to_rfc3339(now),
                status: status.as_u16(),
                errors: errors
                    .into_iter()
                    .map(|(field, message)| (field.into(), message.into()))
                    .collect(),
            },
        }
    }

    /// Translates a service failure into its HTTP representation.
    pub fn from_service_error(err: &CustomerServiceError, now: DateTime<Utc>, path: &str) -> Self {
        match err {
            CustomerServiceError::InvalidFormat(format) => {
                Self::invalid_fields(now, [(format.field(), format.to_string())])
            }
            CustomerServiceError::NotFound(_) => Self::not_found(now, err.to_string(), path),
            CustomerServiceError::OperationFailed { .. } => {
                Self::internal(now, err.to_string(), path)
            }
        }
    }

    fn detail<S: Into<String>>(
        status: StatusCode,
        error: &'static str,
        now: DateTime<Utc>,
        message: S,
        path: &str,
    ) -> Self {
        Self {
            status,
            body: ErrorBody::Detail {
                timestamp: to_rfc3339(now),
                status: status.as_u16(),
                error,
                message: message.into(),
                path: path.to_string(),
            },
        }
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Marks the bare 500 produced for a panicking handler so
/// [`render_unhandled`] can attach the request path.
#[derive(Debug, Clone)]
struct HandlerPanic(String);

/// Panic handler for `CatchPanicLayer::custom`.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "request handler panicked".to_string()
    };
    error!(stage = "http", panic = %detail, "request handler panicked");

    let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
    response.extensions_mut().insert(HandlerPanic(detail));
    response
}

/// Fallback for requests that match no route.
pub async fn route_not_found(State(state): State<AppState>, uri: Uri) -> ProblemResponse {
    ProblemResponse::route_not_found(state.now(), uri.path())
}

/// Fallback for a known path called with an unsupported method.
pub async fn method_not_allowed(State(state): State<AppState>, uri: Uri) -> ProblemResponse {
    ProblemResponse::method_not_allowed(state.now(), uri.path())
}

/// Outermost middleware: turns the bare 500 left by a caught panic into a
/// structured body carrying the request path.
pub async fn render_unhandled(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let response = next.run(request).await;

    let panic = response
        .extensions()
        .get::<HandlerPanic>()
        .map(|HandlerPanic(detail)| detail.clone());
    match panic {
        Some(detail) => ProblemResponse::internal(state.now(), detail, &path).into_response(),
        None => response,
    }
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use customer_registry_core::FormatError;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .expect("fixed time")
            .with_timezone(&Utc)
    }

    async fn body_json(problem: ProblemResponse) -> (StatusCode, Value) {
        let response = problem.into_response();
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body should read")
            .to_bytes();
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[tokio::test]
    async fn not_found_renders_detail_body() {
        let err = CustomerServiceError::NotFound(9);
        let (status, body) =
            body_json(ProblemResponse::from_service_error(&err, fixed_now(), "/api/customers/9"))
                .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body,
            json!({
                "timestamp": "2024-01-01T00:00:00.000Z",
                "status": 404,
                "error": "Customer not found",
                "message": "Customer with ID 9 not found.",
                "path": "/api/customers/9"
            })
        );
    }

    #[tokio::test]
    async fn invalid_format_renders_field_errors() {
        let err = CustomerServiceError::InvalidFormat(FormatError::InvalidPhone);
        let (status, body) =
            body_json(ProblemResponse::from_service_error(&err, fixed_now(), "/api/customers"))
                .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);
        assert_eq!(
            body["errors"]["phone"],
            "invalid phone number; it must contain 10 or 11 digits"
        );
        assert!(body.get("path").is_none());
    }

    #[tokio::test]
    async fn internal_error_keeps_message() {
        let (status, body) =
            body_json(ProblemResponse::internal(fixed_now(), "boom", "/api/customers")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
        assert_eq!(body["message"], "boom");
        assert_eq!(body["status"], 500);
    }

    #[tokio::test]
    async fn panic_payload_becomes_marked_internal_error() {
        let response = panic_response(Box::new("storage exploded"));

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let marker = response
            .extensions()
            .get::<HandlerPanic>()
            .expect("panic marker");
        assert_eq!(marker.0, "storage exploded");

        let response = panic_response(Box::new(42_u8));
        let marker = response
            .extensions()
            .get::<HandlerPanic>()
            .expect("panic marker");
        assert_eq!(marker.0, "request handler panicked");
    }
}
