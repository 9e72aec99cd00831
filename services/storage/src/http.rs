//! Request correlation and the error envelope shared by both services.

use crate::config::ApiConfig;
use crate::namespace::Namespace;
use axum::async_trait;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use std::convert::Infallible;
use std::error::Error as StdError;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id taken from `x-request-id` or generated per request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header_id(&parts.headers).unwrap_or_else(|| Uuid::new_v4().to_string());
        Ok(Self(id))
    }
}

fn header_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

/// Per-request bookkeeping: correlation id and execution budget
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    started: Instant,
    budget: Duration,
}

impl RequestContext {
    pub fn new(request_id: RequestId, budget: Duration) -> Self {
        Self {
            request_id: request_id.0,
            started: Instant::now(),
            budget,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Budget left before the request timeout fires
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    /// Success response carrying the correlation header
    pub fn respond<T: IntoResponse>(&self, body: T) -> Response {
        ([(REQUEST_ID_HEADER, self.request_id.clone())], body).into_response()
    }

    /// Record an unexpected failure with everything an operator needs.
    pub fn report_internal(&self, stage: &str, code: &str, err: &(dyn StdError + 'static)) {
        error!(
            request_id = %self.request_id,
            remaining_ms = self.remaining().as_millis() as u64,
            elapsed_ms = self.elapsed().as_millis() as u64,
            stage,
            code,
            error = %err,
            chain = ?error_chain(err),
            "Request failed with internal error"
        );
    }
}

/// Messages of `err` and all of its sources, outermost first
pub fn error_chain(err: &(dyn StdError + 'static)) -> Vec<String> {
    let mut chain = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    chain
}

/// Client-visible error body: `{"error", "message", "requestId", ...extra}`
#[derive(Debug, Clone)]
pub struct ErrorEnvelope {
    status: StatusCode,
    code: &'static str,
    message: String,
    request_id: String,
    extra: Map<String, Value>,
}

impl ErrorEnvelope {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            request_id: request_id.into(),
            extra: Map::new(),
        }
    }

    /// Attach an extra top-level field
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn body(&self) -> Value {
        let mut body = self.extra.clone();
        body.insert("error".to_string(), json!(self.code));
        body.insert("message".to_string(), json!(self.message));
        body.insert("requestId".to_string(), json!(self.request_id));
        Value::Object(body)
    }
}

impl IntoResponse for ErrorEnvelope {
    fn into_response(self) -> Response {
        let extra = Value::Object(self.extra.clone());
        if self.status.is_server_error() {
            error!(
                request_id = %self.request_id,
                code = self.code,
                message = %self.message,
                extra = %extra,
                "Request failed"
            );
        } else {
            warn!(
                request_id = %self.request_id,
                code = self.code,
                message = %self.message,
                extra = %extra,
                "Request rejected"
            );
        }

        (
            self.status,
            [(REQUEST_ID_HEADER, self.request_id.clone())],
            Json(self.body()),
        )
            .into_response()
    }
}

/// Envelope for a body the framework refused to buffer
pub fn body_rejection(rejection: BytesRejection, request_id: &str) -> ErrorEnvelope {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ErrorEnvelope::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "FILE_TOO_LARGE",
            "Request body exceeds the maximum accepted size",
            request_id,
        )
    } else {
        ErrorEnvelope::new(
            StatusCode::BAD_REQUEST,
            "INVALID_REQUEST",
            rejection.body_text(),
            request_id,
        )
    }
}

/// Pin the correlation id onto the request so handlers and the timeout
/// response agree on it, then bound the handler by the request budget.
async fn correlate_and_bound(
    State(budget): State<Duration>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_id = match header_id(req.headers()) {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                req.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            id
        }
    };

    let mut response = match tokio::time::timeout(budget, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            return ErrorEnvelope::new(
                StatusCode::GATEWAY_TIMEOUT,
                "REQUEST_TIMEOUT",
                format!("Request exceeded the {}s budget", budget.as_secs()),
                request_id,
            )
            .into_response();
        }
    };

    // Framework-generated responses (unknown route, wrong method) carry no id
    if !response.headers().contains_key(REQUEST_ID_HEADER) {
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
    }
    response
}

/// Wrap a service router in the layers every endpoint shares: body limit,
/// correlation with request budget, tracing and CORS.
pub fn with_common_layers(router: Router, config: &ApiConfig) -> Router {
    router
        .layer(DefaultBodyLimit::max(config.body_limit()))
        .layer(middleware::from_fn_with_state(
            config.request_timeout(),
            correlate_and_bound,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(config))
}

fn cors_layer(config: &ApiConfig) -> CorsLayer {
    if !config.cors_enabled {
        return CorsLayer::new();
    }

    if config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Liveness body shared by both services
pub fn health_body(service: &str) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": service,
    }))
}

/// Readiness: the namespace layout exists, creating it if this is the
/// first successful check
pub async fn readiness(namespace: &Namespace) -> (StatusCode, Json<Value>) {
    let root = namespace.root().to_string_lossy().into_owned();

    match namespace.ensure_layout().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ready", "namespace": root })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready", "namespace": root, "error": e.to_string() })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use axum::routing::post;
    use bytes::Bytes;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_request_id_from_header() {
        let (mut parts, _) = Request::builder()
            .header(REQUEST_ID_HEADER, "req-123")
            .body(())
            .unwrap()
            .into_parts();

        let RequestId(id) = RequestId::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(id, "req-123");
    }

    #[tokio::test]
    async fn test_request_id_generated_when_missing() {
        let (mut parts, _) = Request::builder().body(()).unwrap().into_parts();

        let RequestId(id) = RequestId::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_envelope_body_shape() {
        let envelope = ErrorEnvelope::new(StatusCode::NOT_FOUND, "NOT_FOUND", "missing", "req-1")
            .with("fileId", "abc")
            .with("error", "ignored");

        let body = envelope.body();
        assert_eq!(body["error"], "NOT_FOUND");
        assert_eq!(body["message"], "missing");
        assert_eq!(body["requestId"], "req-1");
        assert_eq!(body["fileId"], "abc");
    }

    #[test]
    fn test_envelope_response_carries_status_and_header() {
        let response =
            ErrorEnvelope::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", "bad", "req-2")
                .into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-2");
    }

    #[tokio::test]
    async fn test_readiness_reports_unusable_root() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let (status, Json(body)) = readiness(&Namespace::new(&blocker)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "not_ready");

        let (status, Json(body)) = readiness(&Namespace::new(temp_dir.path())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert!(temp_dir.path().join("outputs").is_dir());
    }

    #[test]
    fn test_remaining_budget_never_underflows() {
        let ctx = RequestContext::new(RequestId("r".to_string()), Duration::ZERO);
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_error_chain_walks_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = crate::namespace::NamespaceError::Write {
            path: "/mnt/efs/models/a.bin".into(),
            source: io,
        };

        let chain = error_chain(&err);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1], "disk full");
    }

    fn layered(config: &ApiConfig) -> Router {
        async fn slow() -> &'static str {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "late"
        }

        async fn echo(request_id: RequestId, body: Result<Bytes, BytesRejection>) -> Response {
            match body {
                Ok(body) => (StatusCode::OK, body).into_response(),
                Err(rejection) => body_rejection(rejection, &request_id.0).into_response(),
            }
        }

        let router = Router::new()
            .route("/slow", post(slow))
            .route("/echo", post(echo));
        with_common_layers(router, config)
    }

    async fn envelope_of(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_elapsed_budget_returns_timeout_envelope() {
        let config = ApiConfig {
            request_timeout_secs: 1,
            ..ApiConfig::default()
        };
        let req = Request::builder()
            .method("POST")
            .uri("/slow")
            .header(REQUEST_ID_HEADER, "req-slow")
            .body(Body::empty())
            .unwrap();

        let resp = layered(&config).oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(resp.headers()[REQUEST_ID_HEADER], "req-slow");
        let body = envelope_of(resp).await;
        assert_eq!(body["error"], "REQUEST_TIMEOUT");
        assert_eq!(body["requestId"], "req-slow");
    }

    #[tokio::test]
    async fn test_oversized_body_returns_envelope_with_header() {
        let config = ApiConfig {
            max_body_bytes: 16,
            ..ApiConfig::default()
        };
        let req = Request::builder()
            .method("POST")
            .uri("/echo")
            .header(REQUEST_ID_HEADER, "req-big")
            .body(Body::from(vec![b'x'; 64]))
            .unwrap();

        let resp = layered(&config).oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(resp.headers()[REQUEST_ID_HEADER], "req-big");
        let body = envelope_of(resp).await;
        assert_eq!(body["error"], "FILE_TOO_LARGE");
        assert_eq!(body["requestId"], "req-big");
    }

    #[tokio::test]
    async fn test_generated_id_is_shared_with_handler_and_response() {
        let config = ApiConfig {
            max_body_bytes: 16,
            ..ApiConfig::default()
        };
        let req = Request::builder()
            .method("POST")
            .uri("/echo")
            .body(Body::from(vec![b'x'; 64]))
            .unwrap();

        let resp = layered(&config).oneshot(req).await.unwrap();

        let header = resp.headers()[REQUEST_ID_HEADER].to_str().unwrap().to_string();
        assert!(Uuid::parse_str(&header).is_ok());
        let body = envelope_of(resp).await;
        assert_eq!(body["requestId"], header.as_str());
    }

    #[tokio::test]
    async fn test_unknown_route_still_carries_request_id() {
        let req = Request::builder()
            .uri("/nowhere")
            .header(REQUEST_ID_HEADER, "req-404")
            .body(Body::empty())
            .unwrap();

        let resp = layered(&ApiConfig::default()).oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.headers()[REQUEST_ID_HEADER], "req-404");
    }
}
