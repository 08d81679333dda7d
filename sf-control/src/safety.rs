//! Periodic safety evaluation (C11). Invoked at the top of every control
//! iteration, in the fixed order spec.md §4.11 prescribes.

use crate::zone::{max_matched_temperature, ZoneConfig};
use sf_error::SafetyReason;
use sf_ipmi::Commander;
use sf_sensors::CombinedSensorReader;
use std::time::{Duration, Instant};
use tracing::warn;

/// Tolerance applied to the post-tick fan-speed verification (step 5).
const VERIFY_TOLERANCE_PCT: f32 = 10.0;

pub struct SafetyEvaluation {
    pub safe: bool,
    pub reason: Option<SafetyReason>,
    /// Whether this evaluation observed at least one numeric reading;
    /// callers use this to drive the staleness watchdog.
    pub had_signal: bool,
}

impl SafetyEvaluation {
    fn unsafe_with(reason: SafetyReason, had_signal: bool) -> Self {
        Self {
            safe: false,
            reason: Some(reason),
            had_signal,
        }
    }

    fn safe(had_signal: bool) -> Self {
        Self {
            safe: true,
            reason: None,
            had_signal,
        }
    }
}

/// Run the five-step safety evaluation described in spec.md §4.11.
#[allow(clippy::too_many_arguments)]
pub fn evaluate(
    commander: &Commander,
    reader: &mut CombinedSensorReader,
    zones: &[ZoneConfig],
    watchdog_timeout: Duration,
    last_successful_update: Instant,
    last_commanded_for_any_zone: Option<f32>,
    now: Instant,
) -> SafetyEvaluation {
    reader.update();

    if reader.last_had_critical() {
        return SafetyEvaluation::unsafe_with(SafetyReason::CriticalSensor, true);
    }

    let names = reader.names();
    let had_signal = names.iter().any(|name| reader.stats(name).is_some());
    if !had_signal {
        return SafetyEvaluation::unsafe_with(SafetyReason::NoSignal, false);
    }

    for zone in zones.iter().filter(|z| z.enabled) {
        if let Some(max_temp) = max_matched_temperature(&zone.sensors, reader) {
            if max_temp >= zone.critical_max {
                warn!(zone = %zone.name, max_temp, critical_max = zone.critical_max, "zone exceeded critical temperature");
                return SafetyEvaluation::unsafe_with(SafetyReason::ZoneCritical, had_signal);
            }
        }
    }

    if now.saturating_duration_since(last_successful_update) > watchdog_timeout {
        return SafetyEvaluation::unsafe_with(SafetyReason::WatchdogExpired, had_signal);
    }

    if let Some(target) = last_commanded_for_any_zone {
        match commander.verify_fan_speed(target.round() as u8, VERIFY_TOLERANCE_PCT) {
            Ok(true) => {}
            Ok(false) => return SafetyEvaluation::unsafe_with(SafetyReason::FanVerifyFailed, had_signal),
            Err(err) => {
                warn!(%err, "fan verification failed to read sensors");
                return SafetyEvaluation::unsafe_with(SafetyReason::FanVerifyFailed, had_signal);
            }
        }
    }

    SafetyEvaluation::safe(had_signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_ipmi::Zone as WireZone;
    use sf_transport::testing::{FakeBmcTransport, FakeNvmeTransport};
    use std::sync::Arc;

    fn commander_with(fake: Arc<FakeBmcTransport>) -> Commander {
        fake.push_ok("dmidecode -s system-product-name", "SYS-2029U");
        fake.push_ok("mc info", "Product Name : X11DPH-T");
        Commander::open(fake, false, 2).unwrap()
    }

    fn reader_for(fake: Arc<FakeBmcTransport>) -> CombinedSensorReader {
        CombinedSensorReader::new(
            Arc::new(commander_with(fake)),
            Arc::new(FakeNvmeTransport::new()),
            Duration::from_secs(120),
            1,
            None,
        )
    }

    fn zone(name: &str, kind: WireZone, target: f32, critical_max: f32, pattern: &str) -> ZoneConfig {
        ZoneConfig {
            name: name.to_string(),
            kind,
            enabled: true,
            target,
            warning_max: critical_max - 10.0,
            critical_max,
            sensors: vec![pattern.to_string()],
        }
    }

    #[test]
    fn critical_sensor_state_trips_immediately() {
        let fake = Arc::new(FakeBmcTransport::new());
        fake.push_ok("sdr list", "CPU1 Temp | 95.000 degrees C | cr");
        let mut reader = reader_for(fake.clone());
        let commander = commander_with(fake);
        let now = Instant::now();

        let eval = evaluate(
            &commander,
            &mut reader,
            &[],
            Duration::from_secs(90),
            now,
            None,
            now,
        );
        assert!(!eval.safe);
        assert_eq!(eval.reason, Some(SafetyReason::CriticalSensor));
    }

    #[test]
    fn no_readings_is_unsafe() {
        let fake = Arc::new(FakeBmcTransport::new());
        fake.push_ok("sdr list", "");
        let mut reader = reader_for(fake.clone());
        let commander = commander_with(fake);
        let now = Instant::now();

        let eval = evaluate(
            &commander,
            &mut reader,
            &[],
            Duration::from_secs(90),
            now,
            None,
            now,
        );
        assert!(!eval.safe);
        assert_eq!(eval.reason, Some(SafetyReason::NoSignal));
    }

    #[test]
    fn zone_over_critical_trips_unsafe() {
        let fake = Arc::new(FakeBmcTransport::new());
        fake.push_ok("sdr list", "CPU1 Temp | 92.000 degrees C | ok");
        let mut reader = reader_for(fake.clone());
        let commander = commander_with(fake);
        let zones = vec![zone("cpu", WireZone::Cpu, 65.0, 90.0, "CPU*")];
        let now = Instant::now();

        let eval = evaluate(
            &commander,
            &mut reader,
            &zones,
            Duration::from_secs(90),
            now,
            None,
            now,
        );
        assert!(!eval.safe);
        assert_eq!(eval.reason, Some(SafetyReason::ZoneCritical));
    }

    #[test]
    fn stale_readings_trip_watchdog() {
        let fake = Arc::new(FakeBmcTransport::new());
        fake.push_ok("sdr list", "CPU1 Temp | 50.000 degrees C | ok");
        let mut reader = reader_for(fake.clone());
        let commander = commander_with(fake);
        let last_update = Instant::now();
        let now = last_update + Duration::from_secs(200);

        let eval = evaluate(
            &commander,
            &mut reader,
            &[],
            Duration::from_secs(90),
            last_update,
            None,
            now,
        );
        assert!(!eval.safe);
        assert_eq!(eval.reason, Some(SafetyReason::WatchdogExpired));
    }

    #[test]
    fn nominal_conditions_are_safe() {
        let fake = Arc::new(FakeBmcTransport::new());
        fake.push_ok("sdr list", "CPU1 Temp | 50.000 degrees C | ok\nFAN1 | 1700 RPM | ok\nFAN2 | 1300 RPM | ok");
        let mut reader = reader_for(fake.clone());
        let commander = commander_with(fake);
        let zones = vec![zone("cpu", WireZone::Cpu, 65.0, 90.0, "CPU*")];
        let now = Instant::now();

        let eval = evaluate(
            &commander,
            &mut reader,
            &zones,
            Duration::from_secs(90),
            now,
            Some(50.0),
            now,
        );
        assert!(eval.safe);
        assert!(eval.reason.is_none());
    }
}
