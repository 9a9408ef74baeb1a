//! Daemon configuration loading.
//!
//! The daemon reads an optional YAML file; every field may be omitted.
//!
//! ```yaml
//! webhook_listen: "0.0.0.0:9091"
//! control_listen: "0.0.0.0:9090"
//! settings_file: "/var/lib/vsc-relay/smartrace_config.json"
//! event_log_capacity: 5
//! redeploy_policy: suppress        # or: restart
//! default_vsc_duration: 60         # seconds; 0 or null disables
//! output:
//!   backend: sysfs                 # or: simulated
//!   start_line: 18
//!   end_line: 23
//!   sysfs_root: "/sys/class/gpio"
//! ```
//!
//! Pulse timing is *not* configured here: it lives in the settings file and
//! may change at runtime (see [`crate::settings`]).
//!
//! `default_vsc_duration` is the countdown armed for a deploy whose payload
//! announces no `duration`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::event_log;
use crate::ingest::MAX_VSC_DURATION;
use crate::output::sysfs::DEFAULT_SYSFS_ROOT;
use crate::vsc::RedeployPolicy;

pub const DEFAULT_WEBHOOK_LISTEN: &str = "0.0.0.0:9091";
pub const DEFAULT_CONTROL_LISTEN: &str = "0.0.0.0:9090";
pub const DEFAULT_SETTINGS_FILE: &str = "smartrace_config.json";
pub const DEFAULT_START_LINE: u32 = 18;
pub const DEFAULT_END_LINE: u32 = 23;
pub const DEFAULT_VSC_DURATION: Duration = Duration::from_secs(60);

// ── Private YAML deserialization types ────────────────────────────────────────

/// Maps directly onto the YAML file layout.  Callers use [`DaemonConfig`].
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DaemonConfigFile {
    webhook_listen: Option<SocketAddr>,
    control_listen: Option<SocketAddr>,
    settings_file: Option<PathBuf>,
    event_log_capacity: Option<usize>,
    #[serde(default)]
    redeploy_policy: RedeployPolicy,
    /// Absent means the default; an explicit `null` disables.
    #[serde(default = "default_vsc_duration_secs")]
    default_vsc_duration: Option<f64>,
    #[serde(default)]
    output: OutputEntry,
}

impl Default for DaemonConfigFile {
    fn default() -> Self {
        Self {
            webhook_listen: None,
            control_listen: None,
            settings_file: None,
            event_log_capacity: None,
            redeploy_policy: RedeployPolicy::default(),
            default_vsc_duration: default_vsc_duration_secs(),
            output: OutputEntry::default(),
        }
    }
}

fn default_vsc_duration_secs() -> Option<f64> {
    Some(DEFAULT_VSC_DURATION.as_secs_f64())
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OutputEntry {
    #[serde(default)]
    backend: BackendKind,
    start_line: Option<u32>,
    end_line: Option<u32>,
    sysfs_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum BackendKind {
    #[default]
    Simulated,
    Sysfs,
}

// ── Public data structures ────────────────────────────────────────────────────

/// Which output driver the daemon builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputBackend {
    /// In-memory outputs; nothing leaves the process.
    Simulated,
    /// Linux sysfs GPIO lines.
    Sysfs {
        root: PathBuf,
        start_line: u32,
        end_line: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub webhook_listen: SocketAddr,
    pub control_listen: SocketAddr,
    pub settings_file: PathBuf,
    pub event_log_capacity: usize,
    pub redeploy_policy: RedeployPolicy,
    /// Countdown for deploys without a `duration`; `None` disables it.
    pub default_vsc_duration: Option<Duration>,
    pub output: OutputBackend,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfigFile::default().into()
    }
}

impl From<DaemonConfigFile> for DaemonConfig {
    fn from(file: DaemonConfigFile) -> Self {
        let output = match file.output.backend {
            BackendKind::Simulated => OutputBackend::Simulated,
            BackendKind::Sysfs => OutputBackend::Sysfs {
                root: file
                    .output
                    .sysfs_root
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SYSFS_ROOT)),
                start_line: file.output.start_line.unwrap_or(DEFAULT_START_LINE),
                end_line: file.output.end_line.unwrap_or(DEFAULT_END_LINE),
            },
        };

        Self {
            webhook_listen: file.webhook_listen.unwrap_or_else(default_webhook_listen),
            control_listen: file.control_listen.unwrap_or_else(default_control_listen),
            settings_file: file
                .settings_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE)),
            event_log_capacity: file
                .event_log_capacity
                .unwrap_or(event_log::DEFAULT_CAPACITY),
            redeploy_policy: file.redeploy_policy,
            default_vsc_duration: file
                .default_vsc_duration
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .filter(|d| !d.is_zero()),
            output,
        }
    }
}

fn default_webhook_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9091))
}

fn default_control_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}

impl DaemonConfig {
    /// Parses `path`.  Absent fields take their defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid YAML, names
    /// an unknown field, or sets `default_vsc_duration` out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading daemon configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        // An empty document deserialises to `None`, not to an empty map.
        let file: Option<DaemonConfigFile> = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;
        let file = file.unwrap_or_default();
        if let Some(secs) = file.default_vsc_duration {
            if !(0.0..=MAX_VSC_DURATION.as_secs_f64()).contains(&secs) {
                bail!(
                    "default_vsc_duration must be between 0 and {} seconds, got {secs}",
                    MAX_VSC_DURATION.as_secs()
                );
            }
        }
        let config = DaemonConfig::from(file);

        debug!(?config, "daemon configuration");
        Ok(config)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
