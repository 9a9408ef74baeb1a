/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Virtual safety car state machine.
//!
//! Decides, for every input, which pulse (if any) to schedule.  The machine is
//! synchronous and owns no timers: it returns a [`Decision`] and the engine
//! carries it out (fires the pulse, arms the countdown).
//!
//! # Transitions
//!
//! | From | Input | To | Pulse |
//! |---|---|---|---|
//! | `Idle` | `deploy(id)` | `Deployed` | relay 1, `delay = relay1_delay` |
//! | `Deployed` | `deploy(same id)` | `Deployed` | none (duplicate) |
//! | `Deployed` | `deploy(other id)` | per [`RedeployPolicy`] | none / relay 1 |
//! | `Deployed` | `retract(any id)` | `Retracted` → `Idle` | relay 2, immediate |
//! | `Deployed` | countdown expired (current session) | `Retracted` → `Idle` | relay 2, immediate |
//! | `Idle` | `retract(*)` | `Idle` | none (no-op) |
//! | any | unrecognised | unchanged | none |
//!
//! `Retracted` is transient: the machine passes through it and rests in
//! `Idle`, so [`VscStateMachine::status`] never reports it.
//!
//! # Countdown
//! A deploy may carry the VSC duration.  The session then records a deadline
//! and the decision tells the engine to arm a timer tagged with the session's
//! generation.  An expiry whose generation no longer matches the active
//! session (retracted early, or replaced) is stale and ignored.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::actuator::{PulseRequest, PulseSource};
use crate::output::Channel;
use crate::settings::PulseSettings;

// ── Identity & status ─────────────────────────────────────────────────────────

/// Upstream event identifier, used to recognise re-delivered deploys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VscStatus {
    /// Rest state, no VSC session.
    Idle,
    /// A VSC session is active.
    Deployed,
    /// Transient: the session is closing.
    Retracted,
}

impl fmt::Display for VscStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VscStatus::Idle => "idle",
            VscStatus::Deployed => "deployed",
            VscStatus::Retracted => "retracted",
        })
    }
}

/// What to do with a deploy carrying a *different* event id while a session
/// is already active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedeployPolicy {
    /// Ignore it: no second relay 1 pulse, current session unchanged.
    #[default]
    Suppress,
    /// Replace the active session with the new one and pulse relay 1 again.
    Restart,
}

// ── Inputs & decisions ────────────────────────────────────────────────────────

/// The machine's input alphabet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VscInput {
    Deploy {
        event_id: EventId,
        /// VSC duration announced by the upstream application.
        countdown: Option<Duration>,
    },
    Retract {
        event_id: EventId,
    },
    CountdownExpired {
        generation: u64,
    },
    Unrecognized {
        event_type: String,
    },
}

/// Countdown the engine must arm after a deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    pub generation: u64,
    pub after: Duration,
}

/// Outcome of one [`VscStateMachine::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// New session; relay 1 pulse scheduled.
    Deployed {
        event_id: EventId,
        pulse: PulseRequest,
        countdown: Option<Countdown>,
        /// Session closed by a [`RedeployPolicy::Restart`].
        replaced: Option<EventId>,
    },
    /// Session closed by a retract; relay 2 pulse scheduled.
    Retracted {
        /// Id of the session that was closed.
        session: EventId,
        /// Id carried by the retract event.
        requested: EventId,
        pulse: PulseRequest,
    },
    /// Session closed by its countdown; relay 2 pulse scheduled.
    TimerEnded { session: EventId, pulse: PulseRequest },
    /// Same deploy re-delivered; suppressed.
    Duplicate { event_id: EventId },
    /// Different deploy while active; suppressed by policy.
    RedeploySuppressed { active: EventId, incoming: EventId },
    /// Retract with no active session.
    NoOpRetract { event_id: EventId },
    /// Countdown for a session that is no longer active.
    StaleCountdown { generation: u64 },
    /// Event type outside the alphabet.
    Unrecognized { event_type: String },
}

impl Decision {
    /// The pulse to fire, if any.
    pub fn pulse(&self) -> Option<PulseRequest> {
        match self {
            Decision::Deployed { pulse, .. }
            | Decision::Retracted { pulse, .. }
            | Decision::TimerEnded { pulse, .. } => Some(*pulse),
            _ => None,
        }
    }

    /// The countdown to arm, if any.
    pub fn countdown(&self) -> Option<Countdown> {
        match self {
            Decision::Deployed { countdown, .. } => *countdown,
            _ => None,
        }
    }

    /// Short, stable name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Deployed { .. } => "deployed",
            Decision::Retracted { .. } => "retracted",
            Decision::TimerEnded { .. } => "timer_ended",
            Decision::Duplicate { .. } => "duplicate",
            Decision::RedeploySuppressed { .. } => "redeploy_suppressed",
            Decision::NoOpRetract { .. } => "noop_retract",
            Decision::StaleCountdown { .. } => "stale_countdown",
            Decision::Unrecognized { .. } => "unrecognized",
        }
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Wall-clock and monotonic time of one input, taken once by the caller.
#[derive(Debug, Clone, Copy)]
pub struct Stamp {
    pub at: Instant,
    pub wall: DateTime<Utc>,
}

impl Stamp {
    pub fn now() -> Self {
        Self {
            at: Instant::now(),
            wall: Utc::now(),
        }
    }
}

/// One deployment cycle.
#[derive(Debug, Clone)]
pub struct VscSession {
    pub event_id: EventId,
    pub deployed_at: DateTime<Utc>,
    /// Distinguishes this session's countdown from earlier ones.
    pub generation: u64,
    pub countdown_deadline: Option<Instant>,
}

/// Read-only view for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VscSnapshot {
    pub status: VscStatus,
    pub event_id: Option<EventId>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub countdown_remaining_secs: Option<f64>,
}

// ── Machine ───────────────────────────────────────────────────────────────────

/// The state machine.  Mutated only from the engine's decision path.
#[derive(Debug)]
pub struct VscStateMachine {
    status: VscStatus,
    session: Option<VscSession>,
    policy: RedeployPolicy,
    generations: u64,
}

impl Default for VscStateMachine {
    fn default() -> Self {
        Self::new(RedeployPolicy::default())
    }
}

impl VscStateMachine {
    pub fn new(policy: RedeployPolicy) -> Self {
        Self {
            status: VscStatus::Idle,
            session: None,
            policy,
            generations: 0,
        }
    }

    pub fn status(&self) -> VscStatus {
        self.status
    }

    pub fn session(&self) -> Option<&VscSession> {
        self.session.as_ref()
    }

    pub fn policy(&self) -> RedeployPolicy {
        self.policy
    }

    pub fn snapshot(&self, now: Instant) -> VscSnapshot {
        let session = self.session.as_ref();
        VscSnapshot {
            status: self.status,
            event_id: session.map(|s| s.event_id),
            deployed_at: session.map(|s| s.deployed_at),
            countdown_remaining_secs: session
                .and_then(|s| s.countdown_deadline)
                .map(|d| d.saturating_duration_since(now).as_secs_f64()),
        }
    }

    /// Feed one input.  `settings` is the snapshot every pulse built here
    /// captures.
    pub fn step(&mut self, input: VscInput, settings: &PulseSettings, now: Stamp) -> Decision {
        match input {
            VscInput::Deploy {
                event_id,
                countdown,
            } => self.on_deploy(event_id, countdown, settings, now),
            VscInput::Retract { event_id } => self.on_retract(event_id, settings),
            VscInput::CountdownExpired { generation } => self.on_countdown(generation, settings),
            VscInput::Unrecognized { event_type } => {
                warn!(event_type = %event_type, "unrecognised event, no action taken");
                Decision::Unrecognized { event_type }
            }
        }
    }

    fn on_deploy(
        &mut self,
        event_id: EventId,
        countdown: Option<Duration>,
        settings: &PulseSettings,
        now: Stamp,
    ) -> Decision {
        let mut replaced = None;

        if let Some(active) = &self.session {
            if active.event_id == event_id {
                warn!(%event_id, "duplicate deploy suppressed");
                return Decision::Duplicate { event_id };
            }
            match self.policy {
                RedeployPolicy::Suppress => {
                    warn!(
                        active = %active.event_id,
                        incoming = %event_id,
                        "deploy with a different id while deployed – suppressed by policy"
                    );
                    return Decision::RedeploySuppressed {
                        active: active.event_id,
                        incoming: event_id,
                    };
                }
                RedeployPolicy::Restart => {
                    info!(
                        active = %active.event_id,
                        incoming = %event_id,
                        "deploy with a different id while deployed – restarting session"
                    );
                    replaced = Some(active.event_id);
                }
            }
        }

        self.generations += 1;
        let generation = self.generations;

        // A countdown whose deadline is not representable is not armed.
        let armed = countdown.and_then(|after| Some((after, now.at.checked_add(after)?)));
        if armed.is_none() {
            if let Some(after) = countdown {
                warn!(%event_id, secs = after.as_secs_f64(), "countdown out of range, not armed");
            }
        }
        let countdown = armed.map(|(after, _)| Countdown { generation, after });

        self.session = Some(VscSession {
            event_id,
            deployed_at: now.wall,
            generation,
            countdown_deadline: armed.map(|(_, deadline)| deadline),
        });
        self.transition(VscStatus::Deployed);

        let pulse = PulseRequest {
            channel: Channel::Start,
            delay: settings.relay1_delay(),
            duration: settings.pulse_duration(),
            source: PulseSource::VscStart,
        };

        info!(
            %event_id,
            delay_ms = pulse.delay.as_millis() as u64,
            duration_ms = pulse.duration.as_millis() as u64,
            countdown_secs = countdown.map(|c| c.after.as_secs_f64()),
            "VSC deployed – relay 1 scheduled"
        );

        Decision::Deployed {
            event_id,
            pulse,
            countdown,
            replaced,
        }
    }

    fn on_retract(&mut self, requested: EventId, settings: &PulseSettings) -> Decision {
        let Some(session) = self.close_session() else {
            warn!(event_id = %requested, "retract while idle – nothing to retract");
            return Decision::NoOpRetract {
                event_id: requested,
            };
        };

        if session.event_id != requested {
            info!(
                session = %session.event_id,
                requested = %requested,
                "retract id differs from deploy id – closing current session anyway"
            );
        }

        let pulse = PulseRequest::immediate(
            Channel::End,
            settings.pulse_duration(),
            PulseSource::VscRetract,
        );
        info!(session = %session.event_id, "VSC retracted – relay 2 scheduled");

        Decision::Retracted {
            session: session.event_id,
            requested,
            pulse,
        }
    }

    fn on_countdown(&mut self, generation: u64, settings: &PulseSettings) -> Decision {
        let current = self.session.as_ref().map(|s| s.generation);
        if current != Some(generation) {
            debug!(generation, ?current, "stale countdown ignored");
            return Decision::StaleCountdown { generation };
        }

        let Some(session) = self.close_session() else {
            return Decision::StaleCountdown { generation };
        };

        let pulse = PulseRequest::immediate(
            Channel::End,
            settings.pulse_duration(),
            PulseSource::VscTimerEnd,
        );
        info!(session = %session.event_id, "VSC countdown ended – relay 2 scheduled");

        Decision::TimerEnded {
            session: session.event_id,
            pulse,
        }
    }

    /// Deployed → Retracted → Idle.  Returns the closed session.
    fn close_session(&mut self) -> Option<VscSession> {
        let session = self.session.take()?;
        self.transition(VscStatus::Retracted);
        self.transition(VscStatus::Idle);
        Some(session)
    }

    fn transition(&mut self, to: VscStatus) {
        debug!(from = %self.status, to = %to, "VSC transition");
        self.status = to;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
