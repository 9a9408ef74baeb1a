/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error types for the VSC relay controller.
//!
//! One enum per failure layer:
//!
//! * [`IngestError`] – a webhook payload could not be normalised
//!   (the *MalformedEvent* family).
//! * [`SettingsError`] – a pulse-settings update was rejected
//!   (*InvalidConfiguration*) or could not be persisted.
//! * [`ActuationFault`] – the output driver failed to change a line.
//! * [`ActuatorError`] – a pulse could not be queued or never ran.
//! * [`EngineError`] – what callers of the
//!   [`EngineHandle`](crate::engine::EngineHandle) see.
//!
//! Re-delivered deploys (*DuplicateEvent*) are not errors: they are a
//! [`Decision`](crate::vsc::Decision) the state machine returns, logged and
//! acknowledged like any other event.
//!
//! The HTTP layer maps them as follows:
//!
//! | Error | Status |
//! |---|---|
//! | `EngineError::Malformed` | `400 Bad Request` |
//! | `EngineError::Settings(InvalidConfiguration / NotFinite)` | `422 Unprocessable Entity` |
//! | `EngineError::Settings(Persist / Serialize)` | `500 Internal Server Error` |
//! | `EngineError::Actuator` | `503 Service Unavailable` |
//! | `EngineError::Unavailable` | `503 Service Unavailable` |

use std::path::PathBuf;

use thiserror::Error;

use crate::output::Channel;

// ── Ingest ────────────────────────────────────────────────────────────────────

/// Why a webhook payload was rejected before reaching the decision path.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The body is not valid JSON.
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The body is JSON but not an object.
    #[error("payload must be a JSON object")]
    NotAnObject,

    /// Neither `event_type` nor `type` carries a non-empty string.
    #[error("payload has no event_type")]
    MissingEventType,

    /// `event_data.event_id` is present but not an integer in `u64` range.
    #[error("event_id must be a non-negative 64-bit integer, got {0}")]
    NonNumericEventId(String),

    /// `time` is present but not a millisecond count in `u64` range.
    #[error("time must be a non-negative 64-bit number of milliseconds, got {0}")]
    NonNumericTime(String),

    /// `duration` is present but negative, non-numeric or longer than
    /// [`MAX_VSC_DURATION`](crate::ingest::MAX_VSC_DURATION).
    #[error("duration must be between 0 and 86400 seconds, got {0}")]
    InvalidDuration(String),
}

// ── Settings ──────────────────────────────────────────────────────────────────

/// Why a settings update was not committed.
///
/// Whatever the variant, the previously active settings stay in force.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A field is outside its allowed range.
    #[error("{field} must be between {min} and {max} seconds, got {value}")]
    InvalidConfiguration {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// A field is NaN or infinite.
    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },

    /// Writing the settings file failed.
    #[error("failed to persist settings to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Encoding the settings as JSON failed.
    #[error("failed to encode settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl SettingsError {
    /// `true` when the caller sent a bad value (as opposed to a storage fault).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SettingsError::InvalidConfiguration { .. } | SettingsError::NotFinite { .. }
        )
    }
}

// ── Output driver ─────────────────────────────────────────────────────────────

/// The output driver failed to change a line.
///
/// Logged by the actuator; the VSC session still advances so a hardware
/// hiccup never leaves the race stuck in one state.
#[derive(Debug, Error)]
pub enum ActuationFault {
    /// Writing a sysfs GPIO attribute failed.
    #[error("GPIO line {line} ({channel}): {source}")]
    Io {
        channel: Channel,
        line: u32,
        #[source]
        source: std::io::Error,
    },

    /// An `embedded-hal` pin reported an error.
    #[error("output pin for {channel} failed: {detail}")]
    Pin { channel: Channel, detail: String },
}

// ── Actuator ──────────────────────────────────────────────────────────────────

/// A pulse request that could not be carried out.
#[derive(Debug, Error)]
pub enum ActuatorError {
    /// The actuator has been shut down and accepts no more requests.
    #[error("pulse actuator is shut down")]
    ShutDown,

    /// The request was queued but dropped before the line was asserted
    /// (shutdown during the start delay or while queued).
    #[error("pulse on {0} was cancelled before it started")]
    Cancelled(Channel),
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Errors returned by [`EngineHandle`](crate::engine::EngineHandle) calls.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The webhook payload was malformed; nothing reached the state machine.
    #[error("malformed event: {0}")]
    Malformed(#[from] IngestError),

    /// A settings update was rejected.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// A manual pulse could not be queued.
    #[error(transparent)]
    Actuator(#[from] ActuatorError),

    /// The decision path has stopped (shutdown in progress).
    #[error("decision path is not running")]
    Unavailable,
}
