/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! VSC relay controller
//!
//! Turns SmartRace virtual-safety-car webhooks into timed pulses on two
//! relay outputs: relay 1 when the VSC is deployed, relay 2 when it ends.
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── output/     – output driver trait, simulated / sysfs / embedded-hal backends
//! ├── actuator/   – per-channel pulse scheduling (delay, hold, no overlap)
//! ├── vsc/        – VSC state machine and its decisions
//! ├── ingest/     – webhook payload normalisation
//! ├── engine/     – the single serialised decision path + cloneable handle
//! ├── settings/   – validated, persisted pulse timing
//! ├── event_log   – last N events for display
//! ├── config/     – daemon YAML configuration
//! ├── server/     – webhook and control HTTP routers
//! └── error       – error taxonomy
//! ```

pub mod actuator;
pub mod config;
pub mod engine;
pub mod error;
pub mod event_log;
pub mod ingest;
pub mod output;
pub mod server;
pub mod settings;
pub mod vsc;
