//! HTTP trigger endpoint over the [`Runner`].
//!
//! Probe runs are synchronous and can take minutes, so every run goes to the
//! blocking pool. Requests are validated before a run starts.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::orchestrator::{FailureKind, PlatformReport, ProbeRequest, Runner};
use crate::platform::PlatformId;

/// A request rejected before any run started, or a server-side failure.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status.as_u16(), self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerQuery {
    pub platform: Option<String>,
    #[serde(rename = "type")]
    pub response_type: Option<String>,
}

pub fn build_app(runner: Arc<Runner>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/trigger", get(trigger))
        .route("/trigger/all", get(trigger_all))
        .layer(CorsLayer::permissive())
        .with_state(runner)
}

/// Bind `addr` and serve until the process exits.
pub async fn serve(runner: Arc<Runner>, addr: &str) -> Result<()> {
    let app = build_app(runner);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "trigger server listening");
    axum::serve(listener, app).await.context("server failed")
}

async fn index() -> impl IntoResponse {
    Json(json!({ "message": "The server is running" }))
}

async fn trigger(
    State(runner): State<Arc<Runner>>,
    Query(query): Query<TriggerQuery>,
) -> Result<Response, ApiError> {
    let (Some(platform), Some(response_type)) =
        (present(query.platform), present(query.response_type))
    else {
        return Err(ApiError::bad_request("Missing platform or type"));
    };
    let platform: PlatformId = platform
        .parse()
        .map_err(|e: crate::platform::UnknownPlatform| ApiError::bad_request(e.to_string()))?;
    check_type(&runner, &response_type)?;

    info!(%platform, %response_type, "trigger received");
    let request = ProbeRequest::new(platform, response_type);
    let timeout = runner.config().server.run_timeout();
    let report = tokio::task::spawn_blocking(move || runner.run_platform(&request, timeout))
        .await
        .map_err(|e| {
            error!(%platform, error = %e, "run task failed");
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    Ok((status_for(&report), Json(report)).into_response())
}

async fn trigger_all(
    State(runner): State<Arc<Runner>>,
    Query(query): Query<TriggerQuery>,
) -> Result<Response, ApiError> {
    let Some(response_type) = present(query.response_type) else {
        return Err(ApiError::bad_request("Missing type"));
    };
    check_type(&runner, &response_type)?;

    info!(%response_type, "fan-out trigger received");
    let timeout = runner.config().server.run_timeout();
    let rt = response_type.clone();
    let results = tokio::task::spawn_blocking(move || runner.fan_out(&rt, timeout))
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(json!({ "type": response_type, "results": results })).into_response())
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn check_type(runner: &Runner, response_type: &str) -> Result<(), ApiError> {
    let allowed = &runner.config().server.response_types;
    if allowed.iter().any(|t| t == response_type) {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!(
            "Invalid type, need {}",
            either_of(allowed)
        )))
    }
}

/// `["A", "B", "C"]` -> `"A, B or C"`.
fn either_of(items: &[String]) -> String {
    match items.split_last() {
        None => String::new(),
        Some((last, [])) => last.clone(),
        Some((last, rest)) => format!("{} or {last}", rest.join(", ")),
    }
}

fn status_for(report: &PlatformReport) -> StatusCode {
    match report.failure_kind() {
        None => StatusCode::OK,
        Some(FailureKind::TimedOut) => StatusCode::REQUEST_TIMEOUT,
        Some(FailureKind::Unreachable) => StatusCode::BAD_GATEWAY,
        Some(FailureKind::Other) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
