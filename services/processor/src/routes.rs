use crate::request::PredictRequest;
use crate::service::{ProcessingError, ProcessingService};
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
    pub service: Arc<ProcessingService>,
    pub service_name: String,
    pub request_timeout: Duration,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let router = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/predict", post(predict))
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

/// `POST /predict`: digest a published artifact
#[instrument(skip_all, fields(request_id = %request_id.0))]
async fn predict(
    State(state): State<AppState>,
    request_id: RequestId,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let ctx = RequestContext::new(request_id, state.request_timeout);
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return body_rejection(rejection, ctx.request_id()).into_response(),
    };

    let request = match PredictRequest::parse(&body) {
        Ok(request) => request,
        Err(err) => return error_envelope(&ctx, err).into_response(),
    };

    info!(file_id = %request.file_id, model = %request.model, "Processing request");

    match state.service.process(&request.file_id, &request.model).await {
        Ok(outcome) => ctx.respond(Json(outcome)),
        Err(err) => error_envelope(&ctx, err).into_response(),
    }
}

/// Shape a processing failure for the client
fn error_envelope(ctx: &RequestContext, err: ProcessingError) -> ErrorEnvelope {
    let id = ctx.request_id();
    let code = err.code();

    match &err {
        ProcessingError::InvalidRequest(message) => {
            ErrorEnvelope::new(StatusCode::BAD_REQUEST, code, message.as_str(), id)
        }
        ProcessingError::InvalidKey(e) => {
            ErrorEnvelope::new(StatusCode::BAD_REQUEST, code, e.to_string(), id)
        }
        ProcessingError::NotFound { file_id, path } => ErrorEnvelope::new(
            StatusCode::NOT_FOUND,
            code,
            "Artifact not found in shared namespace",
            id,
        )
        .with("fileId", file_id.as_str())
        .with("path", path.as_str()),
        ProcessingError::Read(_) | ProcessingError::Encode(_) | ProcessingError::Write(_) => {
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
