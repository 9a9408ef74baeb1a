/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Pulse settings store.
//!
//! Holds the two tunables every new pulse is built from and persists them as
//! a small JSON file, compatible with the legacy `smartrace_config.json`:
//!
//! ```json
//! { "pulse_duration": 0.5, "relay1_delay": 5.0 }
//! ```
//!
//! The store has a single writer (the engine's decision path) and any number
//! of readers, which observe immutable snapshots through a
//! [`watch::Receiver`].  A change only affects pulses built *after* it; a
//! queued or running pulse keeps the values it captured.

use std::io::Write;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::SettingsError;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Allowed `pulse_duration`, seconds.
pub const PULSE_DURATION_RANGE: RangeInclusive<f64> = 0.1..=5.0;

/// Allowed `relay1_delay`, seconds.
pub const RELAY1_DELAY_RANGE: RangeInclusive<f64> = 0.0..=30.0;

pub const DEFAULT_PULSE_DURATION: f64 = 0.5;
pub const DEFAULT_RELAY1_DELAY: f64 = 5.0;

// ── Data ──────────────────────────────────────────────────────────────────────

/// An immutable snapshot of the pulse settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulseSettings {
    /// Time each relay stays on, seconds.
    pub pulse_duration: f64,
    /// Wait between a VSC deploy and the relay 1 pulse, seconds.
    pub relay1_delay: f64,
}

impl Default for PulseSettings {
    fn default() -> Self {
        Self {
            pulse_duration: DEFAULT_PULSE_DURATION,
            relay1_delay: DEFAULT_RELAY1_DELAY,
        }
    }
}

impl PulseSettings {
    pub fn pulse_duration(&self) -> Duration {
        Duration::from_secs_f64(self.pulse_duration)
    }

    pub fn relay1_delay(&self) -> Duration {
        Duration::from_secs_f64(self.relay1_delay)
    }

    /// Check both fields against their ranges.
    pub fn validate(&self) -> Result<(), SettingsError> {
        check("pulse_duration", self.pulse_duration, &PULSE_DURATION_RANGE)?;
        check("relay1_delay", self.relay1_delay, &RELAY1_DELAY_RANGE)?;
        Ok(())
    }
}

fn check(field: &'static str, value: f64, range: &RangeInclusive<f64>) -> Result<(), SettingsError> {
    if !value.is_finite() {
        return Err(SettingsError::NotFinite { field });
    }
    if !range.contains(&value) {
        return Err(SettingsError::InvalidConfiguration {
            field,
            value,
            min: *range.start(),
            max: *range.end(),
        });
    }
    Ok(())
}

/// A partial update; absent fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub pulse_duration: Option<f64>,
    #[serde(default)]
    pub relay1_delay: Option<f64>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self.pulse_duration.is_none() && self.relay1_delay.is_none()
    }

    /// `base` with this update applied (unvalidated).
    pub fn apply_to(&self, base: PulseSettings) -> PulseSettings {
        PulseSettings {
            pulse_duration: self.pulse_duration.unwrap_or(base.pulse_duration),
            relay1_delay: self.relay1_delay.unwrap_or(base.relay1_delay),
        }
    }
}

/// On-disk layout.  Every field is optional so a partially written or older
/// file still yields usable values.
#[derive(Debug, Deserialize)]
struct SettingsFile {
    pulse_duration: Option<f64>,
    relay1_delay: Option<f64>,
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// Owns the current [`PulseSettings`] and its backing file.
#[derive(Debug)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    tx: watch::Sender<PulseSettings>,
}

impl SettingsStore {
    /// A store that never touches the disk.
    pub fn in_memory(settings: PulseSettings) -> Self {
        let (tx, _) = watch::channel(settings);
        Self { path: None, tx }
    }

    /// Load from `path`, falling back to defaults when the file is missing or
    /// corrupt.  Never fails: a relay box must come up even with a bad file.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = Self::read_file(&path);
        info!(
            path = %path.display(),
            pulse_duration = settings.pulse_duration,
            relay1_delay = settings.relay1_delay,
            "pulse settings loaded"
        );
        let (tx, _) = watch::channel(settings);
        Self {
            path: Some(path),
            tx,
        }
    }

    fn read_file(path: &Path) -> PulseSettings {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no settings file, using defaults");
                return PulseSettings::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read settings file, using defaults");
                return PulseSettings::default();
            }
        };

        let file: SettingsFile = match serde_json::from_str(&content) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt settings file, using defaults");
                return PulseSettings::default();
            }
        };

        let defaults = PulseSettings::default();
        PulseSettings {
            pulse_duration: field_or_default(
                "pulse_duration",
                file.pulse_duration,
                defaults.pulse_duration,
                &PULSE_DURATION_RANGE,
            ),
            relay1_delay: field_or_default(
                "relay1_delay",
                file.relay1_delay,
                defaults.relay1_delay,
                &RELAY1_DELAY_RANGE,
            ),
        }
    }

    /// Current snapshot.
    pub fn get(&self) -> PulseSettings {
        *self.tx.borrow()
    }

    /// Reader handle that always sees the latest committed snapshot.
    pub fn subscribe(&self) -> watch::Receiver<PulseSettings> {
        self.tx.subscribe()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Validate, persist and commit `update`.
    ///
    /// All fields are validated before anything changes; on any error the
    /// previous settings remain active.  The new values are committed in
    /// memory only after they reached the disk, so the file and the running
    /// configuration never disagree.
    ///
    /// # Errors
    /// * [`SettingsError::InvalidConfiguration`] / [`SettingsError::NotFinite`]
    ///   for a bad value.
    /// * [`SettingsError::Persist`] if the file cannot be written.
    pub fn update(&mut self, update: SettingsUpdate) -> Result<PulseSettings, SettingsError> {
        let current = self.get();
        if update.is_empty() {
            return Ok(current);
        }

        let next = update.apply_to(current);
        if let Err(e) = next.validate() {
            warn!(error = %e, "settings update rejected");
            return Err(e);
        }

        // Synchronous on the decision path: the file is a few dozen bytes and
        // must be on disk before the new values are committed.
        if let Some(path) = &self.path {
            persist(path, &next)?;
        }
        self.tx.send_replace(next);

        info!(
            pulse_duration = next.pulse_duration,
            relay1_delay = next.relay1_delay,
            "pulse settings updated"
        );
        Ok(next)
    }
}

fn field_or_default(
    field: &'static str,
    value: Option<f64>,
    default: f64,
    range: &RangeInclusive<f64>,
) -> f64 {
    match value {
        None => default,
        Some(v) => match check(field, v, range) {
            Ok(()) => v,
            Err(e) => {
                warn!(error = %e, default, "ignoring persisted value");
                default
            }
        },
    }
}

/// Atomically replace `path` with `settings` (temp file in the same
/// directory, then rename).
fn persist(path: &Path, settings: &PulseSettings) -> Result<(), SettingsError> {
    let json = serde_json::to_vec_pretty(settings)?;
    let io = |source| SettingsError::Persist {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(io)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(io)?;
    tmp.write_all(&json).map_err(io)?;
    tmp.as_file().sync_all().map_err(io)?;
    tmp.persist(path).map_err(|e| io(e.error))?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
