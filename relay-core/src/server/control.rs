use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use crate::supervisor::{
    SessionSnapshot, SessionStatus, Started, StopOutcome, SupervisorError,
};

use super::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Info,
    Error,
}

/// Body returned by start, stop and restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub status: OutcomeStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtsp_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hls_url: Option<String>,
}

impl ControlResponse {
    fn started(started: Started, message: &str) -> Self {
        Self {
            status: OutcomeStatus::Success,
            message: message.to_string(),
            rtsp_url: Some(started.source),
            hls_url: Some(started.hls_url.to_string()),
        }
    }

    fn stopped(outcome: StopOutcome) -> Self {
        let status = match outcome {
            StopOutcome::AlreadyIdle => OutcomeStatus::Info,
            StopOutcome::Graceful | StopOutcome::Forced => OutcomeStatus::Success,
        };
        Self {
            status,
            message: outcome.message().to_string(),
            rtsp_url: None,
            hls_url: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            message: message.into(),
            rtsp_url: None,
            hls_url: None,
        }
    }
}

/// Body returned by `GET /api/stream/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub is_running: bool,
    pub rtsp_url: Option<String>,
    pub hls_url: Option<String>,
    pub state: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_exit: Option<String>,
}

impl From<SessionSnapshot> for StatusReport {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            is_running: snapshot.is_running(),
            hls_url: snapshot.hls_url().map(str::to_string),
            rtsp_url: snapshot.source,
            state: snapshot.status,
            session_id: snapshot.session_id,
            started_at: snapshot.started_at,
            last_exit: snapshot.last_exit,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub rtsp_url: Option<String>,
}

pub(crate) async fn start_stream(
    State(state): State<AppState>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> Response {
    let source = match payload {
        Ok(Json(request)) => request.rtsp_url.unwrap_or_default(),
        Err(rejection) => {
            warn!(%rejection, "rejected start request body");
            String::new()
        }
    };
    match state.supervisor.start(source).await {
        Ok(started) => reply(ControlResponse::started(
            started,
            "Stream started successfully",
        )),
        Err(err) => failure(err),
    }
}

pub(crate) async fn stop_stream(State(state): State<AppState>) -> Response {
    match state.supervisor.stop().await {
        Ok(outcome) => reply(ControlResponse::stopped(outcome)),
        Err(err) => failure(err),
    }
}

pub(crate) async fn restart_stream(State(state): State<AppState>) -> Response {
    match state.supervisor.restart().await {
        Ok(started) => reply(ControlResponse::started(
            started,
            "Stream restarted successfully",
        )),
        Err(err) => failure(err),
    }
}

pub(crate) async fn stream_status(State(state): State<AppState>) -> Response {
    match state.supervisor.status().await {
        Ok(snapshot) => (StatusCode::OK, Json(StatusReport::from(snapshot))).into_response(),
        Err(err) => failure(err),
    }
}

pub(crate) async fn health(State(state): State<AppState>) -> Response {
    match state.supervisor.status().await {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "healthy", "stream": snapshot.status })),
        )
            .into_response(),
        Err(err) => failure(err),
    }
}

fn reply(body: ControlResponse) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

fn failure(err: SupervisorError) -> Response {
    let status = match err {
        SupervisorError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_REQUEST,
    };
    if err.is_launch_failure() {
        error!(%err, "transcoder launch failed");
    } else {
        warn!(%err, "stream control request failed");
    }
    (status, Json(ControlResponse::error(err.to_string()))).into_response()
}
