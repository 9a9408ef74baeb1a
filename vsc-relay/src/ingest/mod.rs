/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Webhook payload normalisation.
//!
//! SmartRace posts JSON of the form:
//!
//! ```json
//! { "event_type": "race.vsc_deployed", "event_data": { "event_id": 1 }, "time": 1000 }
//! ```
//!
//! [`normalize`] maps that onto the state machine's alphabet.  It is a pure
//! function: the serialisation point is the engine, not this module.
//!
//! Accepted variations, seen from different app versions:
//! * `type` instead of `event_type`;
//! * event data under `event_data`, `event.data` or `data`;
//! * `event_id` as a number or a numeric string;
//! * the deploy aliases in [`DEPLOY_TYPES`] and retract aliases in
//!   [`RETRACT_TYPES`].
//!
//! Numbers are untrusted: ids and times must fit a `u64`, and a VSC
//! `duration` may not exceed [`MAX_VSC_DURATION`].

use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::IngestError;
use crate::vsc::{EventId, VscInput};

/// Longest VSC countdown a payload may announce.
pub const MAX_VSC_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Event types that deploy the virtual safety car.
pub const DEPLOY_TYPES: &[&str] = &[
    "race.vsc_deployed",
    "vscDeployed",
    "vsc_deployed",
    "vsc_started",
    "VSC_DEPLOYED",
];

/// Event types that retract it.
pub const RETRACT_TYPES: &[&str] = &[
    "race.vsc_retracted",
    "vsc_Withdrawn",
    "vsc_withdrawn",
    "vscEnded",
    "vsc_ended",
    "VSC_WITHDRAWN",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Deploy,
    Retract,
    Unrecognized,
}

pub fn classify(event_type: &str) -> EventKind {
    if DEPLOY_TYPES.contains(&event_type) {
        EventKind::Deploy
    } else if RETRACT_TYPES.contains(&event_type) {
        EventKind::Retract
    } else {
        EventKind::Unrecognized
    }
}

/// A webhook payload after normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    /// Event type exactly as sent.
    pub event_type: String,
    pub kind: EventKind,
    pub event_id: EventId,
    /// `true` when the payload had no id and one was derived from a timestamp.
    pub synthetic_id: bool,
    /// Upstream `time` field, milliseconds.
    pub sent_at_ms: Option<u64>,
    /// VSC duration announced by the payload.  `Some(ZERO)` explicitly
    /// disables the countdown; `None` leaves it to the daemon default.
    pub vsc_duration: Option<Duration>,
    /// Compact JSON of the whole payload, for the event log.
    pub summary: String,
}

impl NormalizedEvent {
    /// State machine input.  A deploy without a `duration` gets
    /// `default_countdown`.
    pub fn input(&self, default_countdown: Option<Duration>) -> VscInput {
        match self.kind {
            EventKind::Deploy => VscInput::Deploy {
                event_id: self.event_id,
                countdown: self
                    .vsc_duration
                    .or(default_countdown)
                    .filter(|d| !d.is_zero()),
            },
            EventKind::Retract => VscInput::Retract {
                event_id: self.event_id,
            },
            EventKind::Unrecognized => VscInput::Unrecognized {
                event_type: self.event_type.clone(),
            },
        }
    }
}

/// Normalise a raw webhook body.
///
/// `received_at_ms` (Unix milliseconds) seeds the synthetic event id when the
/// payload carries neither `event_id` nor `time`.
///
/// # Errors
/// An [`IngestError`] for anything that is not a well-formed event; the
/// caller acknowledges failure and drops it.
pub fn normalize(body: &[u8], received_at_ms: u64) -> Result<NormalizedEvent, IngestError> {
    let value: Value = serde_json::from_slice(body)?;
    let root = value.as_object().ok_or(IngestError::NotAnObject)?;

    let event_type = ["event_type", "type"]
        .iter()
        .filter_map(|k| root.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .ok_or(IngestError::MissingEventType)?
        .to_string();

    let data = event_data(root);

    let sent_at_ms = match root.get("time") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            as_u64(v)
                .ok_or_else(|| IngestError::NonNumericTime(v.to_string()))?,
        ),
    };

    let (event_id, synthetic_id) = match data.and_then(|d| d.get("event_id")) {
        None | Some(Value::Null) => (EventId(sent_at_ms.unwrap_or(received_at_ms)), true),
        Some(v) => (
            parse_event_id(v).ok_or_else(|| IngestError::NonNumericEventId(v.to_string()))?,
            false,
        ),
    };

    let vsc_duration = match data.and_then(|d| d.get("duration")) {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            non_negative(v)
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .filter(|d| *d <= MAX_VSC_DURATION)
                .ok_or_else(|| IngestError::InvalidDuration(v.to_string()))?,
        ),
    };

    Ok(NormalizedEvent {
        kind: classify(&event_type),
        event_type,
        event_id,
        synthetic_id,
        sent_at_ms,
        vsc_duration,
        summary: value.to_string(),
    })
}

/// First object found under `event_data`, `event.data` or `data`.
fn event_data(root: &Map<String, Value>) -> Option<&Map<String, Value>> {
    root.get("event_data")
        .and_then(Value::as_object)
        .or_else(|| {
            root.get("event")
                .and_then(|e| e.get("data"))
                .and_then(Value::as_object)
        })
        .or_else(|| root.get("data").and_then(Value::as_object))
}

fn parse_event_id(v: &Value) -> Option<EventId> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).and_then(f64_to_u64))
            .map(EventId),
        Value::String(s) => s.trim().parse().ok().map(EventId),
        _ => None,
    }
}

/// A non-negative number that fits a `u64`, truncated.
fn as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
    .or_else(|| non_negative(v).and_then(f64_to_u64))
}

fn f64_to_u64(f: f64) -> Option<u64> {
    // 2^64 is the first f64 above u64::MAX.
    (f >= 0.0 && f < 18_446_744_073_709_551_616.0).then_some(f as u64)
}

/// A finite, non-negative number, given as a JSON number or numeric string.
fn non_negative(v: &Value) -> Option<f64> {
    let f = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (f.is_finite() && f >= 0.0).then_some(f)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
