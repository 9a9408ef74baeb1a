/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! SmartRace simulator for manual testing of a running `vsc-relay`.
//!
//! ```text
//! smartrace-sim deploy --id 1
//! smartrace-sim retract --id 1
//! smartrace-sim test 2
//! smartrace-sim settings --pulse-duration 0.5 --relay1-delay 2
//! smartrace-sim status
//! smartrace-sim scenario scenarios/vsc_cycle.yaml
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "smartrace-sim", about = "SmartRace webhook simulator for vsc-relay")]
struct Cli {
    /// Base URL of the webhook listener.
    #[arg(long, default_value = "http://127.0.0.1:9091")]
    webhook_url: String,

    /// Base URL of the control listener.
    #[arg(long, default_value = "http://127.0.0.1:9090")]
    control_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Post a VSC deployed event.
    Deploy {
        #[arg(long, default_value_t = 1)]
        id: u64,
        /// VSC duration in seconds; omitted uses the daemon default, 0 disables.
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Post a VSC retracted event.
    Retract {
        #[arg(long, default_value_t = 1)]
        id: u64,
    },
    /// Post an arbitrary JSON body to the webhook listener.
    Raw { body: String },
    /// Fire a manual test pulse on relay 1 or 2.
    Test { channel: u8 },
    /// Update pulse settings; omitted values are left unchanged.
    Settings {
        #[arg(long)]
        pulse_duration: Option<f64>,
        #[arg(long)]
        relay1_delay: Option<f64>,
    },
    /// Print the controller status.
    Status,
    /// Replay a YAML scenario.
    Scenario { path: PathBuf },
}

// ── Scenario file ─────────────────────────────────────────────────────────────

/// ```yaml
/// steps:
///   - settings: { pulse_duration: 0.5, relay1_delay: 2 }
///   - deploy: { id: 1 }
///   - wait: 3.0
///   - retract: { id: 1 }
///   - wait: 1.0
///   - status
/// ```
#[derive(Debug, Deserialize)]
struct Scenario {
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Step {
    Deploy {
        id: u64,
        #[serde(default)]
        duration: Option<f64>,
    },
    Retract {
        id: u64,
    },
    Raw(Value),
    Test(u8),
    Settings {
        #[serde(default)]
        pulse_duration: Option<f64>,
        #[serde(default)]
        relay1_delay: Option<f64>,
    },
    /// Seconds.
    Wait(f64),
    Status,
}

// ── Client ────────────────────────────────────────────────────────────────────

struct Client {
    http: reqwest::Client,
    webhook_url: String,
    control_url: String,
}

impl Client {
    async fn webhook(&self, body: Value) -> Result<Value> {
        info!(%body, "→ webhook");
        let resp = self
            .http
            .post(format!("{}/webhook", self.webhook_url))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Cannot reach webhook listener at {}", self.webhook_url))?;
        read(resp).await
    }

    async fn deploy(&self, id: u64, duration: Option<f64>) -> Result<Value> {
        let mut data = json!({ "event_id": id });
        if let Some(d) = duration {
            data["duration"] = json!(d);
        }
        self.webhook(json!({
            "event_type": "race.vsc_deployed",
            "event_data": data,
            "time": now_ms(),
        }))
        .await
    }

    async fn retract(&self, id: u64) -> Result<Value> {
        self.webhook(json!({
            "event_type": "race.vsc_retracted",
            "event_data": { "event_id": id },
            "time": now_ms(),
        }))
        .await
    }

    async fn test(&self, channel: u8) -> Result<Value> {
        let resp = self
            .http
            .post(format!("{}/api/test/{channel}", self.control_url))
            .send()
            .await
            .with_context(|| format!("Cannot reach control listener at {}", self.control_url))?;
        read(resp).await
    }

    async fn settings(&self, pulse_duration: Option<f64>, relay1_delay: Option<f64>) -> Result<Value> {
        let mut body = json!({});
        if let Some(v) = pulse_duration {
            body["pulse_duration"] = json!(v);
        }
        if let Some(v) = relay1_delay {
            body["relay1_delay"] = json!(v);
        }
        let resp = self
            .http
            .post(format!("{}/api/settings", self.control_url))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Cannot reach control listener at {}", self.control_url))?;
        read(resp).await
    }

    async fn status(&self) -> Result<Value> {
        let resp = self
            .http
            .get(format!("{}/api/status", self.control_url))
            .send()
            .await
            .with_context(|| format!("Cannot reach control listener at {}", self.control_url))?;
        read(resp).await
    }

    async fn run_step(&self, step: Step) -> Result<()> {
        let reply = match step {
            Step::Deploy { id, duration } => self.deploy(id, duration).await?,
            Step::Retract { id } => self.retract(id).await?,
            Step::Raw(body) => self.webhook(body).await?,
            Step::Test(channel) => self.test(channel).await?,
            Step::Settings {
                pulse_duration,
                relay1_delay,
            } => self.settings(pulse_duration, relay1_delay).await?,
            Step::Wait(secs) => {
                info!(secs, "waiting");
                tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).await;
                return Ok(());
            }
            Step::Status => self.status().await?,
        };
        println!("{}", serde_json::to_string_pretty(&reply)?);
        Ok(())
    }

    async fn run_scenario(&self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open scenario file: {}", path.display()))?;
        let scenario: Scenario = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        info!("Replaying {} step(s) from {}", scenario.steps.len(), path.display());
        for (i, step) in scenario.steps.into_iter().enumerate() {
            info!(step = i + 1, ?step, "step");
            self.run_step(step).await?;
        }
        Ok(())
    }
}

/// Decode a JSON reply.  Error statuses are reported, not fatal, so a
/// scenario can exercise rejected input.
async fn read(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    if status.is_server_error() {
        bail!("server error {status}: {body}");
    }
    if !status.is_success() {
        warn!(%status, %body, "request rejected");
    }
    Ok(body)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let client = Client {
        http: reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("Cannot build HTTP client")?,
        webhook_url: cli.webhook_url.trim_end_matches('/').to_string(),
        control_url: cli.control_url.trim_end_matches('/').to_string(),
    };

    match cli.command {
        Command::Scenario { path } => client.run_scenario(&path).await,
        Command::Deploy { id, duration } => client.run_step(Step::Deploy { id, duration }).await,
        Command::Retract { id } => client.run_step(Step::Retract { id }).await,
        Command::Raw { body } => {
            let body: Value = serde_json::from_str(&body).context("Raw body is not JSON")?;
            client.run_step(Step::Raw(body)).await
        }
        Command::Test { channel } => client.run_step(Step::Test(channel)).await,
        Command::Settings {
            pulse_duration,
            relay1_delay,
        } => {
            client
                .run_step(Step::Settings {
                    pulse_duration,
                    relay1_delay,
                })
                .await
        }
        Command::Status => client.run_step(Step::Status).await,
    }
}
