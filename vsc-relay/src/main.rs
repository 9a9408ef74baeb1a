/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use vsc_relay::actuator::PulseActuator;
use vsc_relay::config::{DaemonConfig, OutputBackend};
use vsc_relay::engine::Engine;
use vsc_relay::event_log::EventLog;
use vsc_relay::output::sysfs::SysfsGpio;
use vsc_relay::output::{OutputDriver, SimulatedOutputs};
use vsc_relay::server;
use vsc_relay::settings::SettingsStore;
use vsc_relay::vsc::VscStateMachine;

// ── CLI argument definition ───────────────────────────────────────────────────

/// VSC relay controller.
///
/// Example:
///   vsc-relay --config /etc/vsc-relay.yaml --settings-file /var/lib/vsc-relay/smartrace_config.json
#[derive(Debug, Parser)]
#[command(
    name = "vsc-relay",
    about = "SmartRace VSC webhook to relay pulse controller",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML daemon configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Address for the webhook listener (overrides the config file).
    #[arg(long = "webhook-listen")]
    webhook_listen: Option<SocketAddr>,

    /// Address for the control listener (overrides the config file).
    #[arg(long = "control-listen")]
    control_listen: Option<SocketAddr>,

    /// Path of the persisted pulse settings (overrides the config file).
    #[arg(short = 's', long = "settings-file")]
    settings_file: Option<PathBuf>,

    /// Use in-memory outputs instead of GPIO.
    #[arg(long = "simulate", default_value_t = false)]
    simulate: bool,
}

impl Cli {
    fn daemon_config(&self) -> Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::load_from_file(path)?,
            None => {
                warn!("No configuration file provided, using defaults");
                DaemonConfig::default()
            }
        };
        if let Some(addr) = self.webhook_listen {
            config.webhook_listen = addr;
        }
        if let Some(addr) = self.control_listen {
            config.control_listen = addr;
        }
        if let Some(path) = &self.settings_file {
            config.settings_file = path.clone();
        }
        if self.simulate {
            config.output = OutputBackend::Simulated;
        }
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("vsc-relay starting up...");

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.daemon_config()?;
    info!(
        webhook_listen = %config.webhook_listen,
        control_listen = %config.control_listen,
        settings_file  = %config.settings_file.display(),
        event_log      = config.event_log_capacity,
        policy         = ?config.redeploy_policy,
        vsc_duration   = ?config.default_vsc_duration,
        output         = ?config.output,
        "Configuration"
    );

    // Outputs are driven low before anything can pulse them.
    let actuator = PulseActuator::start(output_driver(&config.output));
    let settings = SettingsStore::load(config.settings_file.clone());
    let engine = Engine::new(
        VscStateMachine::new(config.redeploy_policy),
        settings,
        actuator.clone(),
        Arc::new(EventLog::new(config.event_log_capacity)),
    )
    .with_default_countdown(config.default_vsc_duration);
    let (handle, engine_task) = engine.spawn();

    let webhook_listener = TcpListener::bind(config.webhook_listen)
        .await
        .with_context(|| format!("Cannot bind webhook listener on {}", config.webhook_listen))?;
    let control_listener = TcpListener::bind(config.control_listen)
        .await
        .with_context(|| format!("Cannot bind control listener on {}", config.control_listen))?;
    info!(addr = %config.webhook_listen, "webhook listener ready");
    info!(addr = %config.control_listen, "control listener ready");

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown requested");
        let _ = stop_tx.send(true);
    });

    let webhook = axum::serve(webhook_listener, server::webhook_router(handle.clone()))
        .with_graceful_shutdown(stopped(stop_rx.clone()))
        .into_future();
    let control = axum::serve(control_listener, server::control_router(handle.clone()))
        .with_graceful_shutdown(stopped(stop_rx))
        .into_future();

    let (webhook_result, control_result) = tokio::join!(webhook, control);

    // Listeners are closed: drain the decision path, then sweep the outputs.
    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "decision path already stopped");
    }
    if let Err(e) = engine_task.await {
        error!(error = %e, "decision path task failed");
    }
    actuator.shutdown();
    info!("outputs released, bye");

    webhook_result.context("webhook listener failed")?;
    control_result.context("control listener failed")?;
    Ok(())
}

/// Build the configured driver.  A sysfs backend that cannot be opened falls
/// back to simulated outputs so the controller still serves its API.
fn output_driver(backend: &OutputBackend) -> Arc<dyn OutputDriver> {
    match backend {
        OutputBackend::Simulated => {
            info!("using simulated outputs (test mode)");
            Arc::new(SimulatedOutputs::new())
        }
        OutputBackend::Sysfs {
            root,
            start_line,
            end_line,
        } => match SysfsGpio::open(root, *start_line, *end_line) {
            Ok(gpio) => {
                info!(start_line, end_line, root = %root.display(), "using sysfs GPIO outputs");
                Arc::new(gpio)
            }
            Err(e) => {
                warn!(error = %e, "GPIO unavailable, falling back to simulated outputs (test mode)");
                Arc::new(SimulatedOutputs::new())
            }
        },
    }
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
