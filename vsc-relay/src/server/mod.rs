/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! HTTP surfaces.
//!
//! Two routers, served on separate listeners:
//!
//! * [`webhook_router`] – what SmartRace posts to (`POST /`, `POST /webhook`).
//! * [`control_router`] – status, event log, settings and manual test
//!   triggers for the dashboard.
//!
//! Handlers are thin: each one calls a single [`EngineHandle`] method and
//! maps the result to JSON.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::engine::{EngineHandle, StatusReport};
use crate::error::EngineError;
use crate::event_log::EventLogEntry;
use crate::output::Channel;
use crate::settings::{PulseSettings, SettingsUpdate};

// ── Errors ────────────────────────────────────────────────────────────────────

/// Error type for every handler.  Always renders
/// `{"status":"error","reason":…}`.
#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    BadRequest(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(EngineError::Malformed(_)) => StatusCode::BAD_REQUEST,
            ApiError::Engine(EngineError::Settings(e)) if e.is_validation() => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Engine(EngineError::Settings(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Engine(EngineError::Actuator(_) | EngineError::Unavailable) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let reason = match &self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Engine(e) => e.to_string(),
        };
        if status.is_server_error() {
            warn!(%status, %reason, "request failed");
        }
        (status, Json(json!({ "status": "error", "reason": reason }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Webhook listener ──────────────────────────────────────────────────────────

pub fn webhook_router(engine: EngineHandle) -> Router {
    Router::new()
        .route("/", post(receive_webhook))
        .route("/webhook", post(receive_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Acknowledges every well-formed event, including duplicates and
/// unrecognised types; only a malformed payload is an error.
async fn receive_webhook(State(engine): State<EngineHandle>, body: Bytes) -> ApiResult<Json<Value>> {
    let ack = engine.submit_webhook(&body).await?;
    Ok(Json(json!({
        "status": "ok",
        "event_type": ack.event.event_type,
        "event_id": ack.event.event_id,
        "decision": ack.decision.label(),
    })))
}

// ── Control listener ──────────────────────────────────────────────────────────

pub fn control_router(engine: EngineHandle) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/events", get(events))
        .route("/api/settings", get(get_settings).post(update_settings))
        .route("/api/test/{channel}", post(manual_test))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn status(State(engine): State<EngineHandle>) -> ApiResult<Json<StatusReport>> {
    Ok(Json(engine.status().await?))
}

async fn events(State(engine): State<EngineHandle>) -> Json<Vec<EventLogEntry>> {
    Json(engine.events())
}

async fn get_settings(State(engine): State<EngineHandle>) -> Json<PulseSettings> {
    Json(engine.settings())
}

async fn update_settings(State(engine): State<EngineHandle>, body: Bytes) -> ApiResult<Json<Value>> {
    let update: SettingsUpdate = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid settings body: {e}")))?;
    let settings = engine.update_settings(update).await?;
    Ok(Json(json!({ "status": "ok", "settings": settings })))
}

async fn manual_test(
    State(engine): State<EngineHandle>,
    Path(channel): Path<String>,
) -> ApiResult<Json<Value>> {
    let channel = channel
        .parse::<u8>()
        .ok()
        .and_then(Channel::from_number)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown channel {channel:?}, expected 1 or 2")))?;

    let duration = engine.settings().pulse_duration;
    engine.manual_test(channel).await?;
    Ok(Json(json!({
        "status": "ok",
        "channel": channel.number(),
        "duration": duration,
    })))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
