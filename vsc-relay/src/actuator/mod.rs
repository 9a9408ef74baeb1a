/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Pulse actuator – turns [`PulseRequest`]s into clean high/low pulses.
//!
//! ```text
//!  fire(req) ──► delay timer (per request, only if delay > 0)
//!                    │
//!                    ▼
//!             per-channel FIFO ──► worker: assert → hold(duration) → deassert
//! ```
//!
//! # Guarantees
//! * Requests on **different** channels run concurrently (one worker each).
//! * Requests on the **same** channel are serialised: a request that becomes
//!   due while the channel is mid-pulse queues behind it and never cuts the
//!   running pulse short.
//! * The start delay runs in its own timer task, so a delayed relay 1 pulse
//!   does not hold up a manual test on relay 1 (or anything else).
//! * [`PulseActuator::fire_after`] holds a request back until an earlier
//!   pulse, on any channel, has released its line (see [`PulseGate`]).
//! * Once a line is asserted the pulse runs to completion; there is no
//!   cancellation of an in-flight pulse.
//! * [`PulseActuator::shutdown`] drops every request that has not asserted yet
//!   and drives both lines low.  A worker never asserts after the sweep: the
//!   assert and the sweep take the same per-channel edge lock.
//! * Parameters are captured when the request is built; later settings
//!   changes never alter a queued or running pulse.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{ActuationFault, ActuatorError};
use crate::output::{Channel, OutputDriver};

// ── Request ───────────────────────────────────────────────────────────────────

/// Why a pulse was requested.  Carried into every log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseSource {
    /// VSC deployed – start signal on relay 1.
    VscStart,
    /// VSC retracted – end signal on relay 2.
    VscRetract,
    /// VSC countdown ran out – end signal on relay 2.
    VscTimerEnd,
    /// Operator test trigger from the dashboard.
    ManualTest,
}

impl fmt::Display for PulseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PulseSource::VscStart => "vsc_start",
            PulseSource::VscRetract => "vsc_retract",
            PulseSource::VscTimerEnd => "vsc_timer_end",
            PulseSource::ManualTest => "manual_test",
        })
    }
}

/// One unit of work for the actuator.  Consumed exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseRequest {
    pub channel: Channel,
    /// Wait before asserting (`Duration::ZERO` = immediately).
    pub delay: Duration,
    /// Time the line stays asserted.
    pub duration: Duration,
    pub source: PulseSource,
}

impl PulseRequest {
    /// An immediate pulse.
    pub fn immediate(channel: Channel, duration: Duration, source: PulseSource) -> Self {
        Self {
            channel,
            delay: Duration::ZERO,
            duration,
            source,
        }
    }
}

/// What happened to a pulse once it ran.
#[derive(Debug)]
pub struct PulseReport {
    pub request: PulseRequest,
    pub asserted_at: Instant,
    pub released_at: Instant,
    /// First driver failure seen during the pulse, if any.
    pub fault: Option<ActuationFault>,
}

/// Completion handle returned by [`PulseActuator::fire`].
///
/// Dropping it does not affect the pulse.
#[derive(Debug)]
pub struct PulseHandle {
    channel: Channel,
    done: oneshot::Receiver<PulseReport>,
    released: watch::Receiver<bool>,
}

impl PulseHandle {
    /// Gate that opens when this pulse has released its line.
    pub fn gate(&self) -> PulseGate {
        PulseGate(self.released.clone())
    }

    /// Wait for the pulse to finish.
    ///
    /// # Errors
    /// [`ActuatorError::Cancelled`] if the request was dropped before the line
    /// was asserted (shutdown).
    pub async fn completion(self) -> Result<PulseReport, ActuatorError> {
        self.done
            .await
            .map_err(|_| ActuatorError::Cancelled(self.channel))
    }
}

/// Opens once a pulse has deasserted, or once it can no longer assert
/// (dropped by shutdown).
#[derive(Debug, Clone)]
pub struct PulseGate(watch::Receiver<bool>);

impl PulseGate {
    pub fn is_open(&self) -> bool {
        *self.0.borrow() || self.0.has_changed().is_err()
    }

    pub async fn opened(mut self) {
        // Err means the pulse was dropped: nothing left to wait for.
        let _ = self.0.wait_for(|released| *released).await;
    }
}

struct Job {
    request: PulseRequest,
    done: oneshot::Sender<PulseReport>,
    released: watch::Sender<bool>,
}

// ── Actuator ──────────────────────────────────────────────────────────────────

struct Inner {
    driver: Arc<dyn OutputDriver>,
    queues: [mpsc::UnboundedSender<Job>; 2],
    /// Current level per channel, as last driven by this actuator.
    levels: [AtomicBool; 2],
    /// Serialises "check shutdown + assert" against the shutdown sweep.
    edge_locks: [Mutex<()>; 2],
    shutdown: watch::Sender<bool>,
}

/// Cheaply cloneable handle to the actuator and its two channel workers.
#[derive(Clone)]
pub struct PulseActuator {
    inner: Arc<Inner>,
}

impl PulseActuator {
    /// Drive both lines low and spawn one worker per channel.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(driver: Arc<dyn OutputDriver>) -> Self {
        for channel in Channel::ALL {
            if let Err(fault) = driver.set(channel, false) {
                error!(%channel, error = %fault, "failed to drive output low at startup");
            }
        }

        let (start_tx, start_rx) = mpsc::unbounded_channel();
        let (end_tx, end_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let inner = Arc::new(Inner {
            driver,
            queues: [start_tx, end_tx],
            levels: Default::default(),
            edge_locks: Default::default(),
            shutdown,
        });

        tokio::spawn(run_worker(inner.clone(), Channel::Start, start_rx));
        tokio::spawn(run_worker(inner.clone(), Channel::End, end_rx));

        info!("pulse actuator started");
        Self { inner }
    }

    /// Schedule `request`.  Never blocks: the delay and the hold both run in
    /// background tasks.
    ///
    /// # Errors
    /// [`ActuatorError::ShutDown`] once [`shutdown`](Self::shutdown) has run.
    pub fn fire(&self, request: PulseRequest) -> Result<PulseHandle, ActuatorError> {
        self.fire_after(request, None)
    }

    /// Like [`fire`](Self::fire), but the request's delay only starts once
    /// `after` has opened.
    pub fn fire_after(
        &self,
        request: PulseRequest,
        after: Option<PulseGate>,
    ) -> Result<PulseHandle, ActuatorError> {
        if self.is_shut_down() {
            return Err(ActuatorError::ShutDown);
        }

        let (done, rx) = oneshot::channel();
        let (released, released_rx) = watch::channel(false);
        let job = Job {
            request,
            done,
            released,
        };
        let handle = PulseHandle {
            channel: request.channel,
            done: rx,
            released: released_rx,
        };
        let after = after.filter(|gate| !gate.is_open());

        debug!(
            channel = %request.channel,
            source = %request.source,
            delay_ms = request.delay.as_millis() as u64,
            duration_ms = request.duration.as_millis() as u64,
            waits = after.is_some(),
            "pulse requested"
        );

        if request.delay.is_zero() && after.is_none() {
            self.enqueue(job)?;
        } else {
            let actuator = self.clone();
            let mut shutdown = self.inner.shutdown.subscribe();
            let delay = request.delay;
            let due = async move {
                if let Some(gate) = after {
                    gate.opened().await;
                }
                sleep(delay).await;
            };
            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = shutdown.wait_for(|stop| *stop) => {
                        debug!(channel = %job.request.channel, "delayed pulse dropped by shutdown");
                    }
                    _ = due => {
                        if actuator.enqueue(job).is_err() {
                            debug!("delayed pulse dropped: actuator shut down");
                        }
                    }
                }
            });
        }

        Ok(handle)
    }

    fn enqueue(&self, job: Job) -> Result<(), ActuatorError> {
        let queue = &self.inner.queues[job.request.channel.index()];
        queue.send(job).map_err(|_| ActuatorError::ShutDown)
    }

    /// Current level of `channel` as driven by the actuator.
    pub fn is_asserted(&self, channel: Channel) -> bool {
        self.inner.levels[channel.index()].load(Ordering::SeqCst)
    }

    /// `[relay 1, relay 2]` levels.
    pub fn levels(&self) -> [bool; 2] {
        Channel::ALL.map(|ch| self.is_asserted(ch))
    }

    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Stop accepting requests, drop everything not yet asserted and drive
    /// every line low.  Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);

        for channel in Channel::ALL {
            let _edge = self.inner.edge_locks[channel.index()]
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match self.inner.driver.set(channel, false) {
                Ok(()) => debug!(%channel, "deasserted by shutdown sweep"),
                Err(fault) => warn!(%channel, error = %fault, "shutdown sweep could not deassert"),
            }
            self.inner.levels[channel.index()].store(false, Ordering::SeqCst);
        }

        info!("pulse actuator shut down, all outputs low");
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

async fn run_worker(inner: Arc<Inner>, channel: Channel, mut queue: mpsc::UnboundedReceiver<Job>) {
    let mut shutdown = inner.shutdown.subscribe();

    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => break,
            job = queue.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        run_pulse(&inner, job).await;
    }

    debug!(%channel, "channel worker stopped");
}

async fn run_pulse(inner: &Inner, job: Job) {
    let Job {
        request,
        done,
        released,
    } = job;
    let channel = request.channel;
    let idx = channel.index();

    let mut fault = {
        let _edge = inner.edge_locks[idx]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *inner.shutdown.borrow() {
            debug!(%channel, "pulse dropped: shutdown before assert");
            return;
        }
        let result = inner.driver.set(channel, true);
        if result.is_ok() {
            inner.levels[idx].store(true, Ordering::SeqCst);
        }
        result.err()
    };
    let asserted_at = Instant::now();

    match &fault {
        None => info!(
            %channel,
            source = %request.source,
            duration_ms = request.duration.as_millis() as u64,
            "relay ON (pulse start)"
        ),
        Some(e) => error!(%channel, source = %request.source, error = %e, "failed to assert relay"),
    }

    sleep(request.duration).await;

    if let Err(e) = inner.driver.set(channel, false) {
        error!(%channel, source = %request.source, error = %e, "failed to deassert relay");
        fault.get_or_insert(e);
    }
    inner.levels[idx].store(false, Ordering::SeqCst);
    let released_at = Instant::now();

    info!(
        %channel,
        source = %request.source,
        held_ms = (released_at - asserted_at).as_millis() as u64,
        "relay OFF (pulse end)"
    );

    released.send_replace(true);
    let _ = done.send(PulseReport {
        request,
        asserted_at,
        released_at,
        fault,
    });
}

// ── Tests ─────────────────────────────────────────────────────────────────────
