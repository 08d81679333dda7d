//! The control-loop worker (C12). One dedicated OS thread owns the
//! `Commander`, the `CombinedSensorReader`, and every zone's `FanCurve`
//! exclusively; `start`/`stop`/`status` on the public handle are serialized
//! by a single mutex guarding the lifecycle fields, per spec.md §5.

use crate::engine::FanCurve;
use crate::safety;
use crate::zone::{self, ZoneConfig};
use parking_lot::Mutex;
use sf_error::{Result, SuperfanError};
use sf_ipmi::{BoardProfile, Commander, FanMode, Zone as WireZone};
use sf_sensors::CombinedSensorReader;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Tick cadence and ramp parameters resolved from configuration.
#[derive(Debug, Clone, Copy)]
pub struct ControlParams {
    pub polling_interval: Duration,
    pub monitor_interval: Duration,
    pub ramp_step: f32,
    pub min_speed: f32,
    pub max_speed: f32,
    pub watchdog_timeout: Duration,
}

/// A zone's curve plus the running `ZoneState` spec.md §4.12 tracks.
pub struct ZoneRuntime {
    pub config: ZoneConfig,
    pub curve: FanCurve,
    pub last_commanded: f32,
    pub last_target: f32,
    /// The H12 speed step behind the last successful command, if any; used
    /// to surface `expected_rpms` in the status snapshot (spec.md §6). An
    /// owned copy since it may come from a config-overridden table, not just
    /// the compiled-in `sf_ipmi::H12_STEPS`.
    pub last_step: Option<sf_ipmi::SpeedStep>,
}

impl ZoneRuntime {
    pub fn new(config: ZoneConfig, curve: FanCurve) -> Self {
        Self {
            config,
            curve,
            last_commanded: 0.0,
            last_target: 0.0,
            last_step: None,
        }
    }
}

/// The H12 fan group whose RPM range best represents `zone`'s expected
/// envelope: the CPU zone drives the `FANA*` group exactly; the chassis
/// zone drives both `high_rpm` and `low_rpm` groups, so the higher-RPM
/// group is reported as the representative range.
fn representative_group(kind: WireZone) -> sf_ipmi::FanGroup {
    match kind {
        WireZone::Cpu => sf_ipmi::FanGroup::Cpu,
        WireZone::Chassis => sf_ipmi::FanGroup::HighRpm,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Emergency,
}

#[derive(Debug, Clone, Default)]
pub struct FanSpeedStatus {
    pub current_percent: f32,
    pub target_percent: f32,
    pub expected_rpm: Option<u32>,
}

/// The UI-facing status interface of spec.md §6.
#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub running: bool,
    pub emergency: bool,
    pub temperatures: HashMap<String, f32>,
    pub fan_speeds: HashMap<String, FanSpeedStatus>,
}

struct Lifecycle {
    running: bool,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            running: false,
            cancel: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

/// Everything the spawned worker thread needs; bundled so `start` doesn't
/// have to thread a long argument list through `thread::spawn`.
struct WorkerSeed {
    commander: Arc<Commander>,
    reader: CombinedSensorReader,
    zones: Vec<ZoneRuntime>,
    params: ControlParams,
    cancel: Arc<AtomicBool>,
    snapshot: Arc<Mutex<StatusSnapshot>>,
}

/// Public handle: `start`/`stop` manage the worker thread's lifecycle,
/// `status` reads the latest published snapshot. No restart after stop —
/// reconstructing a clean `CombinedSensorReader`/curve state for a second
/// start is out of scope; build a fresh `ControlLoop` instead.
pub struct ControlLoop {
    commander: Arc<Commander>,
    lifecycle: Mutex<Lifecycle>,
    snapshot: Arc<Mutex<StatusSnapshot>>,
}

impl ControlLoop {
    pub fn new(commander: Arc<Commander>) -> Self {
        Self {
            commander,
            lifecycle: Mutex::new(Lifecycle::default()),
            snapshot: Arc::new(Mutex::new(StatusSnapshot::default())),
        }
    }

    /// `Stopped -> Running`. A no-op if already running.
    pub fn start(
        &self,
        mut reader: CombinedSensorReader,
        mut zones: Vec<ZoneRuntime>,
        params: ControlParams,
    ) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.running {
            return Ok(());
        }

        self.commander.set_fan_mode(FanMode::Full)?;

        reader.update();
        for zone in zones.iter_mut().filter(|z| z.config.enabled) {
            prime(&self.commander, &reader, zone);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let seed = WorkerSeed {
            commander: self.commander.clone(),
            reader,
            zones,
            params,
            cancel: cancel.clone(),
            snapshot: self.snapshot.clone(),
        };

        let handle = thread::Builder::new()
            .name("superfan-control".to_string())
            .spawn(move || worker_loop(seed))
            .map_err(|err| SuperfanError::generic(format!("failed to spawn control worker: {err}")))?;

        lifecycle.cancel = cancel;
        lifecycle.handle = Some(handle);
        lifecycle.running = true;
        self.snapshot.lock().running = true;
        Ok(())
    }

    /// Signal the worker, join it, then best-effort restore standard mode.
    /// Idempotent.
    pub fn stop(&self, restore_on_exit: bool) {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.running {
            return;
        }

        lifecycle.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = lifecycle.handle.take() {
            let _ = handle.join();
        }
        lifecycle.running = false;

        if restore_on_exit {
            if let Err(err) = self.commander.set_fan_mode(FanMode::Standard) {
                warn!(%err, "failed to restore standard fan mode on stop");
            }
        }

        self.snapshot.lock().running = false;
    }

    pub fn status(&self) -> StatusSnapshot {
        self.snapshot.lock().clone()
    }
}

/// Resolve the initial speed for one zone at start-up: the curve's value at
/// the current delta if a sensor matched, else a safe default (50% on H12,
/// the curve's own floor otherwise).
fn prime(commander: &Commander, reader: &CombinedSensorReader, zone: &mut ZoneRuntime) {
    let percent = match zone::delta(&zone.config, reader) {
        Some(delta_c) => zone.curve.speed_for(delta_c).percent(),
        None => {
            warn!(zone = %zone.config.name, "no sensor reading at start, using safe default speed");
            if commander.board() == BoardProfile::H12 {
                50.0
            } else {
                zone.curve.min_speed()
            }
        }
    };

    match commander.set_fan_speed(percent.round().clamp(0.0, 100.0) as u8, zone.config.kind) {
        Ok(encoding) => {
            zone.last_commanded = encoding.reported_percent as f32;
            zone.last_target = percent;
            zone.last_step = encoding.step;
        }
        Err(err) => warn!(zone = %zone.config.name, %err, "failed to prime initial fan speed"),
    }
}

fn worker_loop(seed: WorkerSeed) {
    let WorkerSeed {
        commander,
        mut reader,
        mut zones,
        params,
        cancel,
        snapshot,
    } = seed;

    let mut mode = Mode::Normal;
    let mut last_successful_update = Instant::now();
    let mut last_commanded_any_zone = zones.first().map(|z| z.last_commanded);

    while !cancel.load(Ordering::Relaxed) {
        let now = Instant::now();
        let zone_configs: Vec<ZoneConfig> = zones.iter().map(|z| z.config.clone()).collect();

        let eval = safety::evaluate(
            &commander,
            &mut reader,
            &zone_configs,
            params.watchdog_timeout,
            last_successful_update,
            last_commanded_any_zone,
            now,
        );

        if eval.had_signal {
            last_successful_update = now;
        }

        let was_emergency = mode == Mode::Emergency;
        mode = if eval.safe { Mode::Normal } else { Mode::Emergency };

        if mode == Mode::Emergency {
            if let Some(reason) = eval.reason {
                warn!(%reason, "safety monitor tripped, entering emergency mode");
            }
        } else if was_emergency {
            info!("safety monitor recovered, resuming normal control");
        }

        match mode {
            Mode::Normal => tick_normal(&commander, &reader, &mut zones, &params),
            Mode::Emergency => tick_emergency(&commander, &mut zones),
        }

        last_commanded_any_zone = zones.first().map(|z| z.last_commanded);
        publish_snapshot(&snapshot, &reader, &zones, mode == Mode::Emergency);

        let interval = if mode == Mode::Emergency {
            params.monitor_interval
        } else {
            params.polling_interval
        };
        sleep_cancelable(interval, &cancel);

        if cancel.load(Ordering::Relaxed) {
            break;
        }
    }
}

/// Per-zone change-threshold gate (spec.md §9 reconciliation): apply the
/// ramp cap always, and additionally suppress commands below the gate.
fn change_threshold(curve: &FanCurve) -> f32 {
    if curve.is_stable_step() {
        5.0
    } else {
        1.0
    }
}

fn tick_normal(commander: &Commander, reader: &CombinedSensorReader, zones: &mut [ZoneRuntime], params: &ControlParams) {
    for zone in zones.iter_mut().filter(|z| z.config.enabled) {
        let Some(delta_c) = zone::delta(&zone.config, reader) else {
            warn!(zone = %zone.config.name, "no valid sensor reading for zone, holding last speed");
            continue;
        };

        let target = zone.curve.speed_for(delta_c).percent();
        zone.last_target = target;

        let current = zone.last_commanded;
        let gate = change_threshold(&zone.curve);
        if (target - current).abs() < gate {
            continue;
        }

        let step = (target - current).abs().min(params.ramp_step);
        let next = (current + step * (target - current).signum()).clamp(params.min_speed, params.max_speed);

        match commander.set_fan_speed(next.round().clamp(0.0, 100.0) as u8, zone.config.kind) {
            Ok(encoding) => {
                zone.last_commanded = encoding.reported_percent as f32;
                zone.last_step = encoding.step;
                info!(zone = %zone.config.name, target, commanded = zone.last_commanded, "fan speed updated");
            }
            Err(err) => warn!(zone = %zone.config.name, %err, "failed to set fan speed"),
        }
    }
}

/// Command both zones to 100%, regardless of which zones are configured;
/// fall back to standard mode as a last resort if the post-verify still
/// fails.
fn tick_emergency(commander: &Commander, zones: &mut [ZoneRuntime]) {
    for kind in [WireZone::Chassis, WireZone::Cpu] {
        match commander.set_fan_speed(100, kind) {
            Ok(encoding) => {
                for zone in zones.iter_mut().filter(|z| z.config.kind == kind) {
                    zone.last_commanded = encoding.reported_percent as f32;
                    zone.last_target = 100.0;
                    zone.last_step = encoding.step;
                }
            }
            Err(err) => warn!(?kind, %err, "emergency max-speed command failed"),
        }
    }

    match commander.verify_fan_speed(100, 10.0) {
        Ok(true) => {}
        Ok(false) => {
            warn!("emergency fan verification failed, falling back to standard mode");
            if let Err(err) = commander.set_fan_mode(FanMode::Standard) {
                warn!(%err, "fallback to standard mode failed");
            }
        }
        Err(err) => warn!(%err, "emergency fan verification could not run"),
    }
}

fn publish_snapshot(snapshot: &Mutex<StatusSnapshot>, reader: &CombinedSensorReader, zones: &[ZoneRuntime], emergency: bool) {
    let mut temperatures = HashMap::new();
    for name in reader.names() {
        if let Some(stats) = reader.stats(&name) {
            temperatures.insert(name, stats.current);
        }
    }

    let fan_speeds = zones
        .iter()
        .map(|zone| {
            let expected_rpm = zone.last_step.map(|step| {
                let range = step.range_for(representative_group(zone.config.kind));
                range.stable.unwrap_or(range.max)
            });
            (
                zone.config.name.clone(),
                FanSpeedStatus {
                    current_percent: zone.last_commanded,
                    target_percent: zone.last_target,
                    expected_rpm,
                },
            )
        })
        .collect();

    let mut guard = snapshot.lock();
    *guard = StatusSnapshot {
        running: true,
        emergency,
        temperatures,
        fan_speeds,
    };
}

fn sleep_cancelable(total: Duration, cancel: &AtomicBool) {
    const SLICE: Duration = Duration::from_millis(100);
    let mut remaining = total;
    while remaining > Duration::ZERO && !cancel.load(Ordering::Relaxed) {
        let slice = remaining.min(SLICE);
        thread::sleep(slice);
        remaining -= slice;
    }
}
