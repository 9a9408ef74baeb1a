/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The decision path.
//!
//! Every state-affecting action – webhook events, manual test pulses,
//! settings updates and countdown expiries – is a [`Command`] on one mpsc
//! queue, processed one at a time by a single task that owns the
//! [`VscStateMachine`] and the [`SettingsStore`].
//!
//! ```text
//!  webhook ──normalize──┐
//!  manual test ─────────┤                      ┌──► PulseActuator ──► OutputDriver
//!  settings update ─────┼──► mpsc ──► Engine ──┤
//!  countdown timer ─────┘     (FIFO)           └──► EventLog
//! ```
//!
//! # Design decisions
//!
//! | Concern | Approach |
//! |---|---|
//! | Ordering | Commands are handled in arrival order; a deploy followed by a retract always sees the deploy's transition |
//! | State ownership | Machine and settings are owned by the engine task – no shared mutable state |
//! | Readers | Settings via `watch`, event log via its own `RwLock`, VSC snapshot via a `Status` command |
//! | Actuation | Fire-and-forget: the engine never awaits a pulse, so the queue never stalls on a hold |
//! | Countdown | A timer task posts `CountdownExpired` back into the same queue; deploys without a `duration` use the configured default |
//! | Pulse order | A session's relay 2 pulse is gated on its relay 1 pulse having released |
//! | Faults | An actuation failure is logged; the session still advances |

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::actuator::{PulseActuator, PulseGate, PulseHandle, PulseRequest, PulseSource};
use crate::error::{ActuatorError, EngineError, SettingsError};
use crate::event_log::{EventLog, EventLogEntry};
use crate::ingest::{self, NormalizedEvent};
use crate::output::Channel;
use crate::settings::{PulseSettings, SettingsStore, SettingsUpdate};
use crate::vsc::{Countdown, Decision, Stamp, VscInput, VscSnapshot, VscStateMachine};

/// Depth of the command queue.
const QUEUE_DEPTH: usize = 64;

// ── Commands ──────────────────────────────────────────────────────────────────

/// Result of a webhook event on the decision path.
#[derive(Debug)]
pub struct WebhookAck {
    pub event: NormalizedEvent,
    pub decision: Decision,
    /// Completion of the pulse the decision scheduled, if any.
    pub pulse: Option<PulseHandle>,
}

enum Command {
    Event {
        event: NormalizedEvent,
        reply: oneshot::Sender<WebhookAck>,
    },
    ManualTest {
        channel: Channel,
        reply: oneshot::Sender<Result<PulseHandle, ActuatorError>>,
    },
    UpdateSettings {
        update: SettingsUpdate,
        reply: oneshot::Sender<Result<PulseSettings, SettingsError>>,
    },
    CountdownExpired {
        generation: u64,
    },
    Status {
        reply: oneshot::Sender<VscSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Owner of all decision-path state.  Consumed by [`Engine::spawn`].
pub struct Engine {
    machine: VscStateMachine,
    settings: SettingsStore,
    actuator: PulseActuator,
    log: Arc<EventLog>,
    /// Countdown for deploys that announce no duration.
    default_countdown: Option<Duration>,
    /// Release of the current session's relay 1 pulse.
    start_gate: Option<PulseGate>,
}

impl Engine {
    pub fn new(
        machine: VscStateMachine,
        settings: SettingsStore,
        actuator: PulseActuator,
        log: Arc<EventLog>,
    ) -> Self {
        Self {
            machine,
            settings,
            actuator,
            log,
            default_countdown: None,
            start_gate: None,
        }
    }

    /// Arm a countdown of `after` for every deploy without a `duration`.
    /// `None` or zero disables it.
    pub fn with_default_countdown(mut self, after: Option<Duration>) -> Self {
        self.default_countdown = after.filter(|d| !d.is_zero());
        self
    }

    /// Start the decision-path task.
    pub fn spawn(self) -> (EngineHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let handle = EngineHandle {
            tx: tx.clone(),
            settings: self.settings.subscribe(),
            log: self.log.clone(),
            actuator: self.actuator.clone(),
            started: std::time::Instant::now(),
        };
        let task = tokio::spawn(self.run(rx, tx.downgrade()));
        (handle, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>, tx: mpsc::WeakSender<Command>) {
        info!(policy = ?self.machine.policy(), "decision path running");

        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Event { event, reply } => {
                    let ack = self.on_event(event, &tx);
                    let _ = reply.send(ack);
                }
                Command::ManualTest { channel, reply } => {
                    let _ = reply.send(self.on_manual_test(channel));
                }
                Command::UpdateSettings { update, reply } => {
                    let _ = reply.send(self.settings.update(update));
                }
                Command::CountdownExpired { generation } => {
                    let decision = self.machine.step(
                        VscInput::CountdownExpired { generation },
                        &self.settings.get(),
                        Stamp::now(),
                    );
                    self.fire(decision.pulse());
                }
                Command::Status { reply } => {
                    let _ = reply.send(self.machine.snapshot(tokio::time::Instant::now()));
                }
                Command::Shutdown { reply } => {
                    info!("decision path stopping");
                    let _ = reply.send(());
                    break;
                }
            }
        }

        debug!("decision path stopped");
    }

    fn on_event(&mut self, event: NormalizedEvent, tx: &mpsc::WeakSender<Command>) -> WebhookAck {
        info!(
            event_type = %event.event_type,
            event_id = %event.event_id,
            synthetic_id = event.synthetic_id,
            "event received"
        );
        self.log
            .append(EventLogEntry::new(event.event_type.clone(), event.summary.clone()));

        let decision = self.machine.step(
            event.input(self.default_countdown),
            &self.settings.get(),
            Stamp::now(),
        );

        if let Some(countdown) = decision.countdown() {
            arm_countdown(countdown, tx.clone());
        }
        let pulse = self.fire(decision.pulse());

        debug!(decision = decision.label(), "event decided");
        WebhookAck {
            event,
            decision,
            pulse,
        }
    }

    fn on_manual_test(&mut self, channel: Channel) -> Result<PulseHandle, ActuatorError> {
        let request = PulseRequest::immediate(
            channel,
            self.settings.get().pulse_duration(),
            PulseSource::ManualTest,
        );
        info!(%channel, "manual test pulse");
        self.actuator.fire(request)
    }

    /// Hand `pulse` to the actuator.  A failure here is logged only: the
    /// state machine has already advanced.
    ///
    /// A session's relay 2 pulse never asserts before its relay 1 pulse has
    /// released, even when the retract arrives during the relay 1 delay.
    fn fire(&mut self, pulse: Option<PulseRequest>) -> Option<PulseHandle> {
        let request = pulse?;
        let after = match request.source {
            PulseSource::VscRetract | PulseSource::VscTimerEnd => self.start_gate.take(),
            PulseSource::VscStart | PulseSource::ManualTest => None,
        };
        if after.as_ref().is_some_and(|g| !g.is_open()) {
            info!(source = %request.source, "relay 2 held until relay 1 pulse has ended");
        }

        match self.actuator.fire_after(request, after) {
            Ok(handle) => {
                if request.source == PulseSource::VscStart {
                    self.start_gate = Some(handle.gate());
                }
                Some(handle)
            }
            Err(e) => {
                error!(
                    channel = %request.channel,
                    source = %request.source,
                    error = %e,
                    "pulse could not be scheduled"
                );
                if request.source == PulseSource::VscStart {
                    self.start_gate = None;
                }
                None
            }
        }
    }
}

fn arm_countdown(countdown: Countdown, tx: mpsc::WeakSender<Command>) {
    debug!(
        generation = countdown.generation,
        secs = countdown.after.as_secs_f64(),
        "countdown armed"
    );
    tokio::spawn(async move {
        sleep(countdown.after).await;
        let Some(tx) = tx.upgrade() else {
            return;
        };
        if tx
            .send(Command::CountdownExpired {
                generation: countdown.generation,
            })
            .await
            .is_err()
        {
            debug!("countdown expired after decision path stopped");
        }
    });
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Snapshot served by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub vsc: VscSnapshot,
    pub relay1_on: bool,
    pub relay2_on: bool,
    pub settings: PulseSettings,
    pub uptime_secs: u64,
    pub last_event: Option<EventLogEntry>,
}

/// Cloneable front door to the decision path.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
    settings: watch::Receiver<PulseSettings>,
    log: Arc<EventLog>,
    actuator: PulseActuator,
    started: std::time::Instant,
}

impl EngineHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| EngineError::Unavailable)?;
        rx.await.map_err(|_| EngineError::Unavailable)
    }

    /// Normalise a raw webhook body and run it through the decision path.
    ///
    /// # Errors
    /// [`EngineError::Malformed`] for a bad payload (nothing reaches the
    /// state machine or the event log); [`EngineError::Unavailable`] during
    /// shutdown.
    pub async fn submit_webhook(&self, body: &[u8]) -> Result<WebhookAck, EngineError> {
        let event = match ingest::normalize(body, unix_millis()) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, bytes = body.len(), "malformed webhook payload discarded");
                return Err(e.into());
            }
        };
        self.submit_event(event).await
    }

    /// Run an already normalised event through the decision path.
    pub async fn submit_event(&self, event: NormalizedEvent) -> Result<WebhookAck, EngineError> {
        self.request(|reply| Command::Event { event, reply }).await
    }

    /// Immediate pulse on `channel` with the current pulse duration.
    pub async fn manual_test(&self, channel: Channel) -> Result<PulseHandle, EngineError> {
        Ok(self
            .request(|reply| Command::ManualTest { channel, reply })
            .await??)
    }

    pub async fn update_settings(&self, update: SettingsUpdate) -> Result<PulseSettings, EngineError> {
        Ok(self
            .request(|reply| Command::UpdateSettings { update, reply })
            .await??)
    }

    /// Latest committed settings.  Does not go through the queue.
    pub fn settings(&self) -> PulseSettings {
        *self.settings.borrow()
    }

    pub fn events(&self) -> Vec<EventLogEntry> {
        self.log.snapshot()
    }

    pub async fn vsc(&self) -> Result<VscSnapshot, EngineError> {
        self.request(|reply| Command::Status { reply }).await
    }

    pub async fn status(&self) -> Result<StatusReport, EngineError> {
        let vsc = self.vsc().await?;
        let [relay1_on, relay2_on] = self.actuator.levels();
        Ok(StatusReport {
            vsc,
            relay1_on,
            relay2_on,
            settings: self.settings(),
            uptime_secs: self.started.elapsed().as_secs(),
            last_event: self.log.last(),
        })
    }

    /// Stop the decision path after the commands already queued.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tempfile::TempDir;
    use tokio::time::Instant;

    use crate::output::SimulatedOutputs;
    use crate::vsc::{EventId, RedeployPolicy, VscStatus};

    struct Rig {
        out: Arc<SimulatedOutputs>,
        handle: EngineHandle,
        actuator: PulseActuator,
    }

    fn rig(delay: f64, duration: f64) -> Rig {
        rig_with(delay, duration, RedeployPolicy::Suppress)
    }

    fn rig_with(delay: f64, duration: f64, policy: RedeployPolicy) -> Rig {
        let settings = SettingsStore::in_memory(PulseSettings {
            pulse_duration: duration,
            relay1_delay: delay,
        });
        build(settings, policy, None)
    }

    fn build(settings: SettingsStore, policy: RedeployPolicy, default_countdown: Option<Duration>) -> Rig {
        let out = Arc::new(SimulatedOutputs::new());
        let actuator = PulseActuator::start(out.clone());
        let engine = Engine::new(
            VscStateMachine::new(policy),
            settings,
            actuator.clone(),
            Arc::new(EventLog::default()),
        )
        .with_default_countdown(default_countdown);
        let (handle, _task) = engine.spawn();
        Rig {
            out,
            handle,
            actuator,
        }
    }

    fn body(event_type: &str, id: u64, time: u64) -> Vec<u8> {
        json!({ "event_type": event_type, "event_data": { "event_id": id }, "time": time })
            .to_string()
            .into_bytes()
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn deploy_then_retract_end_to_end() {
        let r = rig(2.0, 0.5);
        let t0 = Instant::now();

        let ack = r
            .handle
            .submit_webhook(&body("race.vsc_deployed", 1, 1000))
            .await
            .unwrap();
        assert!(matches!(ack.decision, Decision::Deployed { .. }));
        let start = ack.pulse.unwrap().completion().await.unwrap();
        assert_eq!(start.asserted_at - t0, ms(2000));
        assert_eq!(start.released_at - t0, ms(2500));

        tokio::time::sleep_until(t0 + ms(3000)).await;
        let ack = r
            .handle
            .submit_webhook(&body("race.vsc_retracted", 1, 3000))
            .await
            .unwrap();
        let end = ack.pulse.unwrap().completion().await.unwrap();
        assert_eq!(end.request.channel, Channel::End);
        assert_eq!(end.asserted_at - t0, ms(3000));
        assert_eq!(end.released_at - t0, ms(3500));

        assert_eq!(r.handle.vsc().await.unwrap().status, VscStatus::Idle);
        assert_eq!(r.out.edges().len(), 4);
        assert_eq!(r.handle.events().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_deliveries_pulse_relay1_once() {
        let r = rig(0.0, 0.2);

        for _ in 0..3 {
            r.handle
                .submit_webhook(&body("race.vsc_deployed", 9, 1000))
                .await
                .unwrap();
        }
        tokio::time::sleep(ms(1000)).await;

        let start = r.out.edges_for(Channel::Start);
        assert_eq!(start.iter().filter(|e| e.asserted).count(), 1);
        // Every delivery is still logged.
        assert_eq!(r.handle.events().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retract_while_idle_produces_no_pulse() {
        let r = rig(0.0, 0.2);
        let ack = r
            .handle
            .submit_webhook(&body("race.vsc_retracted", 1, 0))
            .await
            .unwrap();
        assert!(matches!(ack.decision, Decision::NoOpRetract { .. }));
        assert!(ack.pulse.is_none());
        tokio::time::sleep(ms(500)).await;
        assert!(r.out.edges().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_payload_is_rejected_and_engine_keeps_serving() {
        let r = rig(0.0, 0.2);

        let err = r.handle.submit_webhook(br#"{"foo":"bar"}"#).await.unwrap_err();
        assert!(matches!(err, EngineError::Malformed(_)));
        assert!(r.handle.events().is_empty());

        let ack = r
            .handle
            .submit_webhook(&body("race.vsc_deployed", 1, 0))
            .await
            .unwrap();
        assert!(ack.pulse.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn unrecognized_event_is_logged_without_pulse() {
        let r = rig(0.0, 0.2);
        let ack = r
            .handle
            .submit_webhook(br#"{"event_type":"race.finished","time":5}"#)
            .await
            .unwrap();
        assert!(matches!(ack.decision, Decision::Unrecognized { .. }));
        assert!(ack.pulse.is_none());
        assert_eq!(r.handle.events()[0].event_type, "race.finished");
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_settings_keep_previous_values_for_next_pulse() {
        let r = rig(1.0, 0.5);

        let err = r
            .handle
            .update_settings(SettingsUpdate {
                pulse_duration: Some(6.0),
                relay1_delay: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Settings(ref e) if e.is_validation()));

        let err = r
            .handle
            .update_settings(SettingsUpdate {
                pulse_duration: None,
                relay1_delay: Some(-1.0),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Settings(_)));

        let t0 = Instant::now();
        let ack = r
            .handle
            .submit_webhook(&body("race.vsc_deployed", 1, 0))
            .await
            .unwrap();
        let report = ack.pulse.unwrap().completion().await.unwrap();
        assert_eq!(report.asserted_at - t0, ms(1000));
        assert_eq!(report.released_at - report.asserted_at, ms(500));
    }

    #[tokio::test(start_paused = true)]
    async fn settings_change_does_not_alter_pending_pulse() {
        let r = rig(2.0, 0.5);
        let t0 = Instant::now();

        let ack = r
            .handle
            .submit_webhook(&body("race.vsc_deployed", 1, 0))
            .await
            .unwrap();
        let updated = r
            .handle
            .update_settings(SettingsUpdate {
                pulse_duration: Some(3.0),
                relay1_delay: Some(0.0),
            })
            .await
            .unwrap();
        assert_eq!(r.handle.settings(), updated);

        let report = ack.pulse.unwrap().completion().await.unwrap();
        assert_eq!(report.asserted_at - t0, ms(2000));
        assert_eq!(report.released_at - report.asserted_at, ms(500));

        // The next pulse uses the new duration.
        let manual = r.handle.manual_test(Channel::End).await.unwrap();
        let report = manual.completion().await.unwrap();
        assert_eq!(report.released_at - report.asserted_at, ms(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_manual_tests_on_one_channel_do_not_overlap() {
        let r = rig(0.0, 0.4);

        let submits = (0..5).map(|_| {
            let h = r.handle.clone();
            tokio::spawn(async move { h.manual_test(Channel::Start).await.unwrap() })
        });
        let mut handles = Vec::new();
        for s in submits {
            handles.push(s.await.unwrap());
        }
        for h in handles {
            h.completion().await.unwrap();
        }

        let edges = r.out.edges_for(Channel::Start);
        assert_eq!(edges.len(), 10);
        for pair in edges.chunks(2) {
            assert!(pair[0].asserted && !pair[1].asserted);
            assert_eq!(pair[1].at - pair[0].at, ms(400));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn manual_test_during_start_delay_is_not_blocked() {
        let r = rig(5.0, 0.5);
        let t0 = Instant::now();

        r.handle
            .submit_webhook(&body("race.vsc_deployed", 1, 0))
            .await
            .unwrap();
        let manual = r.handle.manual_test(Channel::Start).await.unwrap();
        let report = manual.completion().await.unwrap();
        assert_eq!(report.asserted_at - t0, Duration::ZERO);
        assert_eq!(report.request.source, PulseSource::ManualTest);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_pulses_relay2_when_vsc_ends() {
        let r = rig(0.0, 0.5);
        let t0 = Instant::now();

        r.handle
            .submit_webhook(
                json!({
                    "event_type": "race.vsc_deployed",
                    "event_data": { "event_id": 3, "duration": 10 }
                })
                .to_string()
                .as_bytes(),
            )
            .await
            .unwrap();

        tokio::time::sleep(ms(11_000)).await;

        let end = r.out.edges_for(Channel::End);
        assert_eq!(end.len(), 2);
        assert_eq!(end[0].at - t0, ms(10_000));
        assert_eq!(r.handle.vsc().await.unwrap().status, VscStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn early_retract_disarms_countdown() {
        let r = rig(0.0, 0.5);

        r.handle
            .submit_webhook(
                json!({
                    "event_type": "race.vsc_deployed",
                    "event_data": { "event_id": 3, "duration": 10 }
                })
                .to_string()
                .as_bytes(),
            )
            .await
            .unwrap();
        tokio::time::sleep(ms(2000)).await;
        r.handle
            .submit_webhook(&body("race.vsc_retracted", 3, 0))
            .await
            .unwrap();
        tokio::time::sleep(ms(20_000)).await;

        let end_pulses = r
            .out
            .edges_for(Channel::End)
            .iter()
            .filter(|e| e.asserted)
            .count();
        assert_eq!(end_pulses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retract_during_start_delay_keeps_pulse_order() {
        let r = rig(5.0, 0.5);
        let t0 = Instant::now();

        let deploy = r
            .handle
            .submit_webhook(&body("race.vsc_deployed", 1, 0))
            .await
            .unwrap();
        tokio::time::sleep_until(t0 + ms(1000)).await;
        let retract = r
            .handle
            .submit_webhook(&body("race.vsc_retracted", 1, 1000))
            .await
            .unwrap();
        assert_eq!(r.handle.vsc().await.unwrap().status, VscStatus::Idle);

        let start = deploy.pulse.unwrap().completion().await.unwrap();
        let end = retract.pulse.unwrap().completion().await.unwrap();
        assert_eq!(start.asserted_at - t0, ms(5000));
        assert_eq!(start.released_at - t0, ms(5500));
        assert_eq!(end.asserted_at - t0, ms(5500));
        assert_eq!(end.released_at - t0, ms(6000));

        let order: Vec<_> = r.out.edges().iter().map(|e| (e.channel, e.asserted)).collect();
        assert_eq!(
            order,
            vec![
                (Channel::Start, true),
                (Channel::Start, false),
                (Channel::End, true),
                (Channel::End, false),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_shorter_than_start_delay_keeps_pulse_order() {
        let r = rig(5.0, 0.5);
        let t0 = Instant::now();

        r.handle
            .submit_webhook(
                json!({
                    "event_type": "race.vsc_deployed",
                    "event_data": { "event_id": 2, "duration": 1 }
                })
                .to_string()
                .as_bytes(),
            )
            .await
            .unwrap();
        tokio::time::sleep(ms(10_000)).await;

        let start = r.out.edges_for(Channel::Start);
        let end = r.out.edges_for(Channel::End);
        assert_eq!(start[0].at - t0, ms(5000));
        assert_eq!(end[0].at - t0, ms(5500));
        assert_eq!(r.handle.vsc().await.unwrap().status, VscStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn retract_after_start_pulse_fires_immediately() {
        let r = rig(0.0, 0.5);
        let t0 = Instant::now();

        r.handle
            .submit_webhook(&body("race.vsc_deployed", 1, 0))
            .await
            .unwrap();
        tokio::time::sleep_until(t0 + ms(2000)).await;
        let ack = r
            .handle
            .submit_webhook(&body("race.vsc_retracted", 1, 2000))
            .await
            .unwrap();
        let end = ack.pulse.unwrap().completion().await.unwrap();
        assert_eq!(end.asserted_at - t0, ms(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn deploy_without_duration_ends_after_default_countdown() {
        let settings = SettingsStore::in_memory(PulseSettings {
            pulse_duration: 0.5,
            relay1_delay: 0.0,
        });
        let r = build(settings, RedeployPolicy::Suppress, Some(Duration::from_secs(60)));
        let t0 = Instant::now();

        r.handle
            .submit_webhook(&body("race.vsc_deployed", 1, 0))
            .await
            .unwrap();
        let snap = r.handle.vsc().await.unwrap();
        assert_eq!(snap.countdown_remaining_secs, Some(60.0));

        tokio::time::sleep(ms(59_000)).await;
        assert!(r.out.edges_for(Channel::End).is_empty());
        assert_eq!(r.handle.vsc().await.unwrap().status, VscStatus::Deployed);

        tokio::time::sleep(ms(2_000)).await;
        let end = r.out.edges_for(Channel::End);
        assert_eq!(end.len(), 2);
        assert_eq!(end[0].at - t0, ms(60_000));
        assert_eq!(r.handle.vsc().await.unwrap().status, VscStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_overrides_default_countdown() {
        let settings = SettingsStore::in_memory(PulseSettings::default());
        let r = build(settings, RedeployPolicy::Suppress, Some(Duration::from_secs(60)));

        let ack = r
            .handle
            .submit_webhook(
                json!({
                    "event_type": "race.vsc_deployed",
                    "event_data": { "event_id": 1, "duration": 0 }
                })
                .to_string()
                .as_bytes(),
            )
            .await
            .unwrap();
        assert!(ack.decision.countdown().is_none());
        assert_eq!(r.handle.vsc().await.unwrap().countdown_remaining_secs, None);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_numbers_are_rejected_and_engine_keeps_serving() {
        let r = rig(0.0, 0.2);
        let bad = [
            json!({ "event_type": "race.vsc_deployed", "event_data": { "event_id": 1, "duration": 1e19 } }),
            json!({ "event_type": "race.vsc_deployed", "event_data": { "event_id": 1, "duration": 1e30 } }),
            json!({ "event_type": "race.vsc_deployed", "event_data": { "event_id": 1e30 } }),
            json!({ "event_type": "race.vsc_deployed", "event_data": { "event_id": 1 }, "time": 1e30 }),
        ];

        for payload in bad {
            let err = r
                .handle
                .submit_webhook(payload.to_string().as_bytes())
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::Malformed(_)), "{payload}: {err:?}");
            assert_eq!(r.handle.vsc().await.unwrap().status, VscStatus::Idle);
        }

        let ack = r
            .handle
            .submit_webhook(&body("race.vsc_deployed", 1, 0))
            .await
            .unwrap();
        assert!(ack.pulse.is_some());
        let ack = r
            .handle
            .submit_webhook(&body("race.vsc_retracted", 1, 0))
            .await
            .unwrap();
        assert!(matches!(ack.decision, Decision::Retracted { .. }));
        assert!(r.handle.manual_test(Channel::End).await.is_ok());
    }

    #[tokio::test]
    async fn settings_update_is_persisted_from_the_decision_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("smartrace_config.json");
        let r = build(SettingsStore::load(path.clone()), RedeployPolicy::Suppress, None);

        let updated = r
            .handle
            .update_settings(SettingsUpdate {
                pulse_duration: Some(1.5),
                relay1_delay: Some(2.0),
            })
            .await
            .unwrap();
        assert_eq!(r.handle.settings(), updated);
        assert!(r.handle.manual_test(Channel::Start).await.is_ok());

        let reloaded = SettingsStore::load(path);
        assert_eq!(
            reloaded.get(),
            PulseSettings {
                pulse_duration: 1.5,
                relay1_delay: 2.0,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn restart_policy_pulses_relay1_for_new_id() {
        let r = rig_with(0.0, 0.2, RedeployPolicy::Restart);
        r.handle
            .submit_webhook(&body("race.vsc_deployed", 1, 0))
            .await
            .unwrap();
        let ack = r
            .handle
            .submit_webhook(&body("race.vsc_deployed", 2, 0))
            .await
            .unwrap();
        assert!(ack.pulse.is_some());
        assert_eq!(r.handle.vsc().await.unwrap().event_id, Some(EventId(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn state_advances_even_when_actuator_is_down() {
        let r = rig(0.0, 0.2);
        r.actuator.shutdown();

        let ack = r
            .handle
            .submit_webhook(&body("race.vsc_deployed", 1, 0))
            .await
            .unwrap();
        assert!(ack.pulse.is_none());
        assert_eq!(r.handle.vsc().await.unwrap().status, VscStatus::Deployed);

        assert!(matches!(
            r.handle.manual_test(Channel::End).await,
            Err(EngineError::Actuator(ActuatorError::ShutDown))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_levels_settings_and_last_event() {
        let r = rig(0.0, 1.0);
        r.handle
            .submit_webhook(&body("race.vsc_deployed", 1, 0))
            .await
            .unwrap();
        tokio::time::sleep(ms(100)).await;

        let status = r.handle.status().await.unwrap();
        assert!(status.relay1_on);
        assert!(!status.relay2_on);
        assert_eq!(status.vsc.status, VscStatus::Deployed);
        assert_eq!(status.settings.pulse_duration, 1.0);
        assert_eq!(status.last_event.unwrap().event_type, "race.vsc_deployed");
    }

    #[tokio::test]
    async fn shutdown_stops_the_decision_path() {
        let r = rig(0.0, 0.2);
        r.handle.shutdown().await.unwrap();
        assert!(matches!(
            r.handle.vsc().await,
            Err(EngineError::Unavailable)
        ));
    }
}
