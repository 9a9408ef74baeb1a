/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Output driver boundary – the two relay lines.
//!
//! Everything above this module talks to the hardware through
//! [`OutputDriver::set`].  Three backends are provided:
//!
//! | Backend | Use |
//! |---|---|
//! | [`SimulatedOutputs`] | no GPIO present ("test mode"), unit tests |
//! | [`sysfs::SysfsGpio`] | Linux `/sys/class/gpio` lines (Raspberry Pi) |
//! | [`pins::PinPair`] | any pair of `embedded-hal` output pins |

pub mod pins;
pub mod sysfs;

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::error::ActuationFault;

// ── Channel ───────────────────────────────────────────────────────────────────

/// One of the two physical outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Relay 1 – start signal, pulsed when the VSC is deployed.
    Start,
    /// Relay 2 – end signal, pulsed when the VSC ends.
    End,
}

impl Channel {
    /// Both channels, in wiring order.
    pub const ALL: [Channel; 2] = [Channel::Start, Channel::End];

    /// The operator-facing relay number (1 or 2).
    pub fn number(self) -> u8 {
        match self {
            Channel::Start => 1,
            Channel::End => 2,
        }
    }

    /// Parse the operator-facing relay number.
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Channel::Start),
            2 => Some(Channel::End),
            _ => None,
        }
    }

    /// Zero-based index for per-channel arrays.
    pub fn index(self) -> usize {
        self.number() as usize - 1
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "relay {}", self.number())
    }
}

// ── Driver trait ──────────────────────────────────────────────────────────────

/// Drives a relay line high (`asserted = true`) or low.
///
/// Implementations must return promptly; the actuator calls `set` from its
/// per-channel workers and from the shutdown sweep.
pub trait OutputDriver: Send + Sync {
    fn set(&self, channel: Channel, asserted: bool) -> Result<(), ActuationFault>;
}

// ── Simulated backend ─────────────────────────────────────────────────────────

/// Number of edges [`SimulatedOutputs`] remembers.
const EDGE_HISTORY: usize = 64;

/// A level change seen by [`SimulatedOutputs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub channel: Channel,
    pub asserted: bool,
    pub at: Instant,
}

/// In-memory outputs used when no GPIO hardware is available.
///
/// Keeps the current level of each channel plus the last [`EDGE_HISTORY`]
/// edges, timestamped with the tokio clock so paused-time tests can check
/// exact assertion instants.
#[derive(Debug, Default)]
pub struct SimulatedOutputs {
    levels: [AtomicBool; 2],
    edges: Mutex<VecDeque<Edge>>,
}

impl SimulatedOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current level of `channel`.
    pub fn level(&self, channel: Channel) -> bool {
        self.levels[channel.index()].load(Ordering::SeqCst)
    }

    /// Recorded edges, oldest first.
    pub fn edges(&self) -> Vec<Edge> {
        self.edges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// Recorded edges for one channel, oldest first.
    pub fn edges_for(&self, channel: Channel) -> Vec<Edge> {
        self.edges()
            .into_iter()
            .filter(|e| e.channel == channel)
            .collect()
    }
}

impl OutputDriver for SimulatedOutputs {
    fn set(&self, channel: Channel, asserted: bool) -> Result<(), ActuationFault> {
        let previous = self.levels[channel.index()].swap(asserted, Ordering::SeqCst);
        if previous == asserted {
            return Ok(());
        }

        debug!(%channel, asserted, "simulated output edge");
        let mut edges = self.edges.lock().unwrap_or_else(PoisonError::into_inner);
        if edges.len() == EDGE_HISTORY {
            edges.pop_front();
        }
        edges.push_back(Edge {
            channel,
            asserted,
            at: Instant::now(),
        });
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
