//! Superfan daemon entry point: loads configuration, detects the board,
//! wires the sensor and control layers together, and runs until signalled.

mod config;

use config::Config;
use sf_control::{ControlLoop, ControlParams, FanCurve, ZoneRuntime};
use sf_ipmi::Commander;
use sf_sensors::CombinedSensorReader;
use sf_transport::{LocalBmcTransport, LocalNvmeTransport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_CONFIG_PATH: &str = "/etc/superfan/config.json";

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

fn load_config(path: &str) -> anyhow::Result<Config> {
    let config = if std::path::Path::new(path).exists() {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)?
    } else {
        warn!(path, "no configuration file found, using defaults");
        Config::default()
    };
    config.validate()?;
    Ok(config)
}

fn init_logging() {
    let log_level = std::env::var("SUPERFAN_LOG").unwrap_or_else(|_| "info".to_string());
    let use_journald = std::path::Path::new("/run/systemd/journal/socket").exists();

    if use_journald {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
                return;
            }
            Err(err) => {
                eprintln!("failed to create journald layer: {err}, falling back to stdout");
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(log_level)
        .init();
}

fn build_control_loop(config: &Config) -> anyhow::Result<(Arc<ControlLoop>, CombinedSensorReader, Vec<ZoneRuntime>, ControlParams)> {
    let bmc_transport: Arc<dyn sf_transport::BmcTransport> =
        Arc::new(LocalBmcTransport::new(&config.ipmi.interface, &config.ipmi.host, &config.ipmi.username, &config.ipmi.password));
    let nvme_transport: Arc<dyn sf_transport::NvmeTransport> = Arc::new(LocalNvmeTransport::new());

    let commander = Arc::new(Commander::open_with_h12_overrides(
        bmc_transport,
        config.safety.permit_fan_off,
        config.safety.min_working_fans,
        &config.h12_overrides(),
    )?);
    info!(board = ?commander.board(), "board detected");

    let discovery_patterns: Vec<String> = config
        .fans
        .zones
        .values()
        .flat_map(|zone| zone.sensors.clone())
        .collect();
    let reader = CombinedSensorReader::new(
        commander.clone(),
        nvme_transport,
        config.watchdog_timeout(),
        config.safety.min_temp_readings,
        if discovery_patterns.is_empty() { None } else { Some(discovery_patterns) },
    );

    let mut zones = Vec::new();
    for (name, spec) in &config.fans.zones {
        let zone_config = config.zone_config(name, spec)?;
        let base = FanCurve::linear(spec.curve.clone(), config.fans.min_speed, config.fans.max_speed)
            .map_err(|reason| anyhow::anyhow!("invalid curve for zone {name}: {reason}"))?;
        // Every zone's curve is hysteresis-wrapped with `temperature.hysteresis`,
        // matching the "hysteresis (°C)" control-loop parameter of spec.md §4.12.
        let curve = FanCurve::hysteresis(base, config.temperature.hysteresis);
        zones.push(ZoneRuntime::new(zone_config, curve));
    }

    let params = ControlParams {
        polling_interval: config.polling_interval(),
        monitor_interval: config.monitor_interval(),
        ramp_step: config.fans.ramp_step,
        min_speed: config.fans.min_speed,
        max_speed: config.fans.max_speed,
        watchdog_timeout: config.watchdog_timeout(),
    };

    let control_loop = Arc::new(ControlLoop::new(commander));
    Ok((control_loop, reader, zones, params))
}

fn main() -> anyhow::Result<()> {
    init_logging();
    info!("superfand {VERSION} starting");

    let config_path = std::env::var("SUPERFAN_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "fatal configuration error");
            std::process::exit(1);
        }
    };

    let (control_loop, reader, zones, params) = build_control_loop(&config)?;
    let restore_on_exit = config.safety.restore_on_exit;

    let shutdown_handle = control_loop.clone();
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        SHUTDOWN.store(true, Ordering::SeqCst);
        shutdown_handle.stop(restore_on_exit);
        std::process::exit(0);
    })
    .unwrap_or_else(|err| warn!(%err, "failed to install signal handler, shutdown via signals may be unclean"));

    control_loop.start(reader, zones, params)?;
    info!("control loop running");

    while !SHUTDOWN.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_secs(1));
    }

    control_loop.stop(restore_on_exit);
    Ok(())
}
