//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to services for business logic.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::api::response::{api_error, api_success};
use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::protocol_constants::SERVICE_ID;
use crate::services::generation_service::{BatchPayload, GenerationOutcome};

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/api/stream/start", post(handle_stream_start))
        .route("/api/stream/stop", post(handle_stream_stop))
        .route("/api/stream/status", get(handle_stream_status))
        .route("/api/status", get(handle_stream_status))
        .route("/api/stream/text", post(handle_stream_text))
        .route("/api/generate", post(handle_generate))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health_check))
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Enforces the `x-api-key` header against `config.api_key` when one is
/// configured. No-op when the server was started without an API key.
async fn require_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    match &state.config.api_key {
        None => next.run(request).await,
        Some(expected) => {
            let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
            if provided == Some(expected.as_str()) {
                next.run(request).await
            } else {
                api_error(StatusCode::UNAUTHORIZED, "unauthorized", "missing or invalid x-api-key").into_response()
            }
        }
    }
}

async fn health_check() -> impl IntoResponse {
    api_success(json!({ "status": "ok", "service": SERVICE_ID }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamStartRequest {
    preset_id: String,
    #[serde(default)]
    debug: bool,
}

async fn handle_stream_start(
    State(state): State<AppState>,
    Json(payload): Json<StreamStartRequest>,
) -> AppResult<impl IntoResponse> {
    let snapshot = state.stream.start(&payload.preset_id, payload.debug).await?;
    Ok(api_success(snapshot))
}

async fn handle_stream_stop(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.stream.stop();
    api_success(snapshot)
}

async fn handle_stream_status(State(state): State<AppState>) -> impl IntoResponse {
    api_success(state.stream.status())
}

async fn handle_stream_text(
    State(state): State<AppState>,
    Json(payload): Json<BatchPayload>,
) -> AppResult<impl IntoResponse> {
    if payload.requests.is_empty() {
        return Err(AppError::Validation("at least one request is required".to_string()));
    }
    state.stream.enqueue_text(payload)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "ok": true }))))
}

async fn handle_generate(
    State(state): State<AppState>,
    Json(payload): Json<BatchPayload>,
) -> AppResult<Response> {
    let outcome = state
        .generation
        .process_batch(&payload, false, None)
        .await
        .map_err(AppError::from)?;

    let body = match outcome {
        GenerationOutcome::Streamed(results) => {
            let results: Vec<_> = results.iter().map(|r| result_json(&state, r)).collect();
            json!({ "results": results })
        }
        GenerationOutcome::Combined(result) => result_json(&state, &result),
    };

    Ok((StatusCode::OK, Json(body)).into_response())
}

/// Renders an `ActionResult` as response JSON, rewriting `output_path`
/// through the configured response-path base if one is set.
fn result_json(state: &AppState, result: &crate::services::generation_service::ActionResult) -> serde_json::Value {
    json!({
        "requestId": result.request_id,
        "outputPath": state.config.rewrite_response_path(&result.output_path),
        "durationMs": result.duration_ms,
        "motionIds": result.motion_ids,
        "cacheHit": result.cache_hit,
    })
}
