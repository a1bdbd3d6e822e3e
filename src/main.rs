//! Parking slot monitor
//!
//! Polls one ultrasonic distance sensor per parking slot, keeps a shared
//! record of free slots consistent across every instance writing to it, and
//! shows the live "available / total" count.
//!
//! Module structure:
//! - `domain/` - Core types (SlotId, SlotRecord, OccupancyReading)
//! - `io/` - External interfaces (GPIO, slot store, displays, Prometheus)
//! - `services/` - Sensing and reconciliation (PulseTimer, Sampler, Reconciler, SensorLoop)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use parking_monitor::infra::{Config, GpioBackend, Metrics};
use parking_monitor::io::{
    build_store, open_bindings, AvailabilityDisplay, LogDisplay, MqttDisplay,
};
use parking_monitor::services::{ReconciliationEngine, SensorLoop};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, info_span, warn, Instrument};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const EXIT_CONFIG: u8 = 2;
const EXIT_STORE: u8 = 3;
const EXIT_HARDWARE: u8 = 4;

/// Parking slot monitor - ultrasonic occupancy with a shared availability record
#[derive(Parser, Debug)]
#[command(name = "parking-monitor", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/parking.toml")]
    config: String,

    /// Use simulated sensors regardless of the configured GPIO backend
    #[arg(long)]
    simulate: bool,
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_requested() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "sigterm_handler_unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize structured logging with configurable level via RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let instance_id = Uuid::now_v7();

    run(args).instrument(info_span!("monitor", instance_id = %instance_id)).await
}

async fn run(args: Args) -> ExitCode {
    info!(version = env!("CARGO_PKG_VERSION"), git = env!("GIT_HASH"), "parking-monitor starting");

    let config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(config_file = %args.config, error = %format!("{e:#}"), "config_invalid");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let config =
        if args.simulate { config.with_gpio_backend(GpioBackend::Simulated) } else { config };

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        slots = config.slots().len(),
        gpio_backend = ?config.gpio_backend(),
        store_backend = ?config.store_backend(),
        threshold_cm = config.distance_threshold_cm(),
        poll_interval_ms = config.poll_interval().as_millis() as u64,
        prometheus_port = config.prometheus_port(),
        "config_loaded"
    );

    let bindings = match open_bindings(&config) {
        Ok(bindings) => bindings,
        Err(e) => {
            error!(error = %format!("{e:#}"), "gpio_setup_failed");
            return ExitCode::from(EXIT_HARDWARE);
        }
    };

    let store = match build_store(&config) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %format!("{e:#}"), "store_setup_failed");
            return ExitCode::from(EXIT_STORE);
        }
    };

    let metrics = Arc::new(Metrics::new());
    let reconciler =
        ReconciliationEngine::new(store, config.store_max_attempts(), metrics.clone());

    let mut displays: Vec<Box<dyn AvailabilityDisplay>> = Vec::new();
    if config.display_log() {
        displays.push(Box::new(LogDisplay::new()));
    }
    if config.mqtt_enabled() {
        displays.push(Box::new(MqttDisplay::new(&config)));
    }

    let mut sensor_loop =
        SensorLoop::new(&config, bindings, reconciler, displays, metrics.clone());
    if let Err(e) = sensor_loop.initialize().await {
        error!(error = %e, "store_initialization_failed");
        return ExitCode::from(EXIT_STORE);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = parking_monitor::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "prometheus_server_error");
            }
        });
    }

    // Periodic metrics summary
    let report_metrics = metrics.clone();
    let report_interval = config.metrics_interval_secs();
    if report_interval > 0 {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(report_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                report_metrics.report().log();
            }
        });
    }

    tokio::spawn(async move {
        shutdown_requested().await;
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    sensor_loop.run(shutdown_rx).await;

    metrics.report().log();
    info!("parking-monitor shutdown complete");
    ExitCode::SUCCESS
}
