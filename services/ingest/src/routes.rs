use crate::request::{IngestRequest, ObjectCreated};
use crate::service::{human_size, IngestReceipt, IngestionError, IngestionService};
use artifact_storage::config::ApiConfig;
use artifact_storage::http::{body_rejection, health_body, readiness, with_common_layers};
use artifact_storage::http::{ErrorEnvelope, RequestContext, RequestId};
use axum::{
    extract::{rejection::BytesRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<IngestionService>,
    pub service_name: String,
    pub request_timeout: Duration,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let router = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/ingest", post(ingest))
        .route("/notifications/s3", post(object_created))
        .with_state(state);

    with_common_layers(router, config)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    health_body(&state.service_name)
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    readiness(state.service.namespace()).await
}

/// `POST /ingest`: publish from the origin store or an inline payload
#[instrument(skip_all, fields(request_id = %request_id.0))]
async fn ingest(
    State(state): State<AppState>,
    request_id: RequestId,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let ctx = RequestContext::new(request_id, state.request_timeout);
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return body_rejection(rejection, ctx.request_id()).into_response(),
    };

    let result = match IngestRequest::parse(&body) {
        Ok(IngestRequest::FromStore { key }) => {
            info!(key = %key, "Ingesting from object store");
            state.service.ingest_from_store(&key).await
        }
        Ok(IngestRequest::Inline { data, filename }) => {
            info!(filename = %filename, "Ingesting inline payload");
            state.service.ingest_inline(&data, &filename).await
        }
        Err(e) => Err(e),
    };

    respond(&ctx, result)
}

/// `POST /notifications/s3`: publish the object named by an object-created event
#[instrument(skip_all, fields(request_id = %request_id.0))]
async fn object_created(
    State(state): State<AppState>,
    request_id: RequestId,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let ctx = RequestContext::new(request_id, state.request_timeout);
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return body_rejection(rejection, ctx.request_id()).into_response(),
    };

    let result = match ObjectCreated::parse(&body) {
        Ok(event) => {
            info!(bucket = %event.bucket, key = %event.key, size = event.size, "Object created event");
            state.service.ingest_notification(&event).await
        }
        Err(e) => Err(e),
    };

    respond(&ctx, result)
}

fn respond(ctx: &RequestContext, result: Result<IngestReceipt, IngestionError>) -> Response {
    match result {
        Ok(receipt) => {
            info!(
                file_id = %receipt.file_id,
                efs_path = %receipt.efs_path,
                elapsed_ms = ctx.elapsed().as_millis() as u64,
                "Ingestion succeeded"
            );
            ctx.respond(Json(receipt))
        }
        Err(err) => error_envelope(ctx, err).into_response(),
    }
}

/// Shape an ingestion failure for the client
fn error_envelope(ctx: &RequestContext, err: IngestionError) -> ErrorEnvelope {
    let id = ctx.request_id();
    let code = err.code();

    match &err {
        IngestionError::InvalidRequest(message) => {
            ErrorEnvelope::new(StatusCode::BAD_REQUEST, code, message.as_str(), id)
        }
        IngestionError::InvalidKey(e) => {
            ErrorEnvelope::new(StatusCode::BAD_REQUEST, code, e.to_string(), id)
        }
        IngestionError::ObjectNotFound { key } => ErrorEnvelope::new(
            StatusCode::NOT_FOUND,
            code,
            format!("S3 object not found: {key}"),
            id,
        )
        .with("key", key.as_str()),
        IngestionError::AccessDenied { key } => ErrorEnvelope::new(
            StatusCode::FORBIDDEN,
            code,
            format!("Access denied to S3 object: {key}"),
            id,
        )
        .with("key", key.as_str()),
        IngestionError::TooLarge { actual, max, key } => {
            let envelope = ErrorEnvelope::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                code,
                format!(
                    "File size {actual} bytes exceeds maximum of {}",
                    human_size(*max)
                ),
                id,
            )
            .with("maxSize", human_size(*max))
            .with("actualSize", *actual);
            match key {
                Some(key) => envelope.with("key", key.as_str()),
                None => envelope,
            }
        }
        IngestionError::MissingBucket => {
            ctx.report_internal("configuration", code, &err);
            ErrorEnvelope::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                code,
                "S3 bucket not configured",
                id,
            )
        }
        IngestionError::Mount(_) => {
            ctx.report_internal("init", code, &err);
            ErrorEnvelope::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                code,
                "Failed to initialize shared namespace",
                id,
            )
            .with("stage", "init")
        }
        IngestionError::Publish(_) | IngestionError::ObjectStore(_) => {
            ctx.report_internal("handler", code, &err);
            ErrorEnvelope::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                code,
                "An unexpected error occurred",
                id,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use artifact_storage::http::REQUEST_ID_HEADER;
    use artifact_storage::namespace::Namespace;
    use artifact_storage::object_store::{ObjectStore, ObjectStoreError};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::path::Path;
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Origin store with a single object in bucket `artifacts`
    struct FixedStore;

    #[async_trait]
    impl ObjectStore for FixedStore {
        async fn get_object(
            &self,
            bucket: &str,
            key: &str,
            _limit: u64,
        ) -> Result<Bytes, ObjectStoreError> {
            match key {
                "models/foo.bin" => Ok(Bytes::from_static(b"weights")),
                "models/private.bin" => Err(ObjectStoreError::AccessDenied {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }),
                _ => Err(ObjectStoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }),
            }
        }

        async fn put_object(
            &self,
            _bucket: &str,
            _key: &str,
            _body: Bytes,
            _content_type: &str,
        ) -> Result<(), ObjectStoreError> {
            Ok(())
        }
    }

    fn test_app(root: &Path, bucket: Option<&str>, max: u64) -> Router {
        test_app_with(root, bucket, max, &ApiConfig::default())
    }

    fn test_app_with(root: &Path, bucket: Option<&str>, max: u64, config: &ApiConfig) -> Router {
        let service = IngestionService::new(
            Arc::new(Namespace::new(root)),
            Arc::new(FixedStore),
            bucket.map(str::to_string),
            max,
        );
        let state = AppState {
            service: Arc::new(service),
            service_name: "ingest-service".to_string(),
            request_timeout: Duration::from_secs(30),
        };
        create_router(state, config)
    }

    async fn post(app: Router, uri: &str, body: impl Into<Body>) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header(REQUEST_ID_HEADER, "req-test")
            .body(body.into())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        assert_eq!(resp.headers()[REQUEST_ID_HEADER], "req-test");
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn handler_inline_hello_returns_receipt() {
        let temp_dir = TempDir::new().unwrap();
        let app = test_app(temp_dir.path(), None, 1 << 30);

        let (status, body) = post(
            app,
            "/ingest",
            json!({"data": "hello", "filename": "data.bin"}).to_string(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sizeBytes"], 5);
        assert_eq!(body["s3Key"], "data.bin");
        assert_eq!(body["fileId"].as_str().unwrap().len(), 36);
        assert!(body["efsPath"].as_str().unwrap().ends_with("models/data.bin"));
    }

    #[tokio::test]
    async fn handler_replay_returns_same_identifier() {
        let temp_dir = TempDir::new().unwrap();
        let app = test_app(temp_dir.path(), Some("artifacts"), 1 << 30);
        let request = json!({"key": "models/foo.bin"}).to_string();

        let (_, first) = post(app.clone(), "/ingest", request.clone()).await;
        let (status, second) = post(app, "/ingest", request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["fileId"], second["fileId"]);
        assert_eq!(second["sizeBytes"], 7);
    }

    #[tokio::test]
    async fn handler_malformed_json_returns_400_envelope() {
        let temp_dir = TempDir::new().unwrap();
        let app = test_app(temp_dir.path(), None, 1 << 30);

        let (status, body) = post(app, "/ingest", "{oops").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_REQUEST");
        assert_eq!(body["message"], "Request body must be valid JSON");
        assert_eq!(body["requestId"], "req-test");
    }

    #[tokio::test]
    async fn handler_traversal_key_returns_400() {
        let temp_dir = TempDir::new().unwrap();
        let app = test_app(temp_dir.path(), Some("artifacts"), 1 << 30);

        let (status, body) = post(app, "/ingest", json!({"key": "models/../x"}).to_string()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn handler_oversized_payload_returns_413_without_write() {
        let temp_dir = TempDir::new().unwrap();
        let app = test_app(temp_dir.path(), None, 4);

        let (status, body) = post(
            app,
            "/ingest",
            json!({"data": "hello", "filename": "five.bin"}).to_string(),
        )
        .await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "FILE_TOO_LARGE");
        assert_eq!(body["maxSize"], "4B");
        assert_eq!(body["actualSize"], 5);
        assert!(!temp_dir.path().join("models/five.bin").exists());
    }

    #[tokio::test]
    async fn handler_body_over_transport_limit_returns_envelope() {
        let temp_dir = TempDir::new().unwrap();
        let config = ApiConfig {
            max_body_bytes: 16,
            ..ApiConfig::default()
        };
        let app = test_app_with(temp_dir.path(), None, 1 << 30, &config);

        let (status, body) = post(
            app,
            "/ingest",
            json!({"data": "a payload well past sixteen bytes", "filename": "big.bin"}).to_string(),
        )
        .await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"], "FILE_TOO_LARGE");
        assert_eq!(body["requestId"], "req-test");
        assert!(!temp_dir.path().join("models/big.bin").exists());
    }

    #[tokio::test]
    async fn handler_key_naming_a_directory_returns_400() {
        let temp_dir = TempDir::new().unwrap();
        let app = test_app(temp_dir.path(), None, 1 << 30);

        let (status, _) = post(
            app.clone(),
            "/ingest",
            json!({"data": "nested", "filename": "models/sub/a.bin"}).to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = post(
            app,
            "/ingest",
            json!({"data": "hello", "filename": "models/sub"}).to_string(),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_REQUEST");
        assert!(temp_dir.path().join("models/sub").is_dir());
    }

    #[tokio::test]
    async fn handler_missing_bucket_returns_configuration_error() {
        let temp_dir = TempDir::new().unwrap();
        let app = test_app(temp_dir.path(), None, 1 << 30);

        let (status, body) = post(app, "/ingest", json!({"key": "models/foo.bin"}).to_string()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "CONFIGURATION_ERROR");
    }

    #[tokio::test]
    async fn handler_store_errors_map_to_status() {
        let temp_dir = TempDir::new().unwrap();
        let app = test_app(temp_dir.path(), Some("artifacts"), 1 << 30);

        let (status, body) = post(
            app.clone(),
            "/ingest",
            json!({"key": "models/missing.bin"}).to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "S3_NOT_FOUND");
        assert_eq!(body["key"], "models/missing.bin");

        let (status, body) = post(
            app,
            "/ingest",
            json!({"key": "models/private.bin"}).to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "S3_ACCESS_DENIED");
    }

    #[tokio::test]
    async fn handler_mount_failure_returns_500_with_stage() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("mount");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let app = test_app(&blocker, None, 1 << 30);

        let (status, body) = post(app, "/ingest", json!({"data": "x"}).to_string()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "MOUNT_FAILED");
        assert_eq!(body["stage"], "init");
    }

    #[tokio::test]
    async fn handler_notification_publishes_decoded_key() {
        let temp_dir = TempDir::new().unwrap();
        let app = test_app(temp_dir.path(), None, 1 << 30);
        let event = json!({
            "Records": [{"s3": {"bucket": {"name": "artifacts"}, "object": {"key": "models/foo.bin", "size": 7}}}]
        });

        let (status, body) = post(app, "/notifications/s3", event.to_string()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["s3Key"], "models/foo.bin");
        assert_eq!(body["sizeBytes"], 7);
        assert!(temp_dir.path().join("models/foo.bin").is_file());
    }

    #[tokio::test]
    async fn handler_oversized_notification_returns_413_with_key() {
        let temp_dir = TempDir::new().unwrap();
        let app = test_app(temp_dir.path(), None, 1 << 30);
        let event = json!({
            "Records": [{"s3": {"bucket": {"name": "artifacts"}, "object": {"key": "models/huge.bin", "size": (1u64 << 30) + 1}}}]
        });

        let (status, body) = post(app, "/notifications/s3", event.to_string()).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["maxSize"], "1GB");
        assert_eq!(body["key"], "models/huge.bin");
    }

    #[tokio::test]
    async fn handler_health_and_ready() {
        let temp_dir = TempDir::new().unwrap();
        let app = test_app(temp_dir.path(), None, 1 << 30);

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let req = Request::builder().uri("/ready").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(temp_dir.path().join("outputs").is_dir());
    }
}
