//! Stateful façade over board detection, command validation, and dispatch
//! (C5). Every raw command passes through [`CommandValidator`] before
//! dispatch; every dispatch gets up to three attempts with a 1s delay,
//! retrying only on `DeviceBusy`.

use crate::board::{self, BoardProfile, FanGroup, FanMode, SpeedEncoding, SpeedStep, SpeedStepOverride, Zone};
use crate::validator::CommandValidator;
use sf_error::{Result, SuperfanError};
use sf_sensors::{parse_sdr, IpmiSensorSource, SensorReading};
use sf_transport::BmcTransport;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);
const FAN_POST_VERIFY_RPM_TOLERANCE_PCT: f32 = 30.0;

/// Stateful façade: detect board, set mode, set speed, read SDR, verify RPM.
pub struct Commander {
    transport: Arc<dyn BmcTransport>,
    board: BoardProfile,
    validator: CommandValidator,
    permit_off: bool,
    min_working_fans: usize,
    /// The H12 step table this commander actually dispatches against:
    /// `board::H12_STEPS` with `fans.board_config.speed_steps` overrides
    /// (spec.md §6) applied. Ignored for every other board generation.
    h12_steps: Vec<SpeedStep>,
}

impl Commander {
    /// Detect the board generation and construct a ready-to-use commander
    /// against the compiled-in H12 step table. Fails closed with
    /// `UnknownBoard` if detection cannot resolve.
    pub fn open(
        transport: Arc<dyn BmcTransport>,
        permit_off: bool,
        min_working_fans: usize,
    ) -> Result<Self> {
        Self::open_with_h12_overrides(transport, permit_off, min_working_fans, &[])
    }

    /// As [`Self::open`], but resolving H12 steps against `board::H12_STEPS`
    /// retuned by `h12_overrides` (spec.md §6
    /// `fans.board_config.speed_steps.{step}`) rather than the compiled-in
    /// table verbatim.
    pub fn open_with_h12_overrides(
        transport: Arc<dyn BmcTransport>,
        permit_off: bool,
        min_working_fans: usize,
        h12_overrides: &[(String, SpeedStepOverride)],
    ) -> Result<Self> {
        let probe = transport.clone();
        let board = board::detect(|cmd| probe.execute(cmd))?;
        if board == BoardProfile::Unknown {
            return Err(SuperfanError::UnknownBoard);
        }
        let h12_steps = board::resolve_h12_steps(h12_overrides);
        let floor_pct = board.minimum_percent(permit_off);
        let floor_byte = board.encode_speed_with(floor_pct, &h12_steps).byte;
        info!(?board, floor_pct, "board generation detected");
        Ok(Self {
            transport,
            board,
            validator: CommandValidator::new(floor_byte, permit_off),
            permit_off,
            min_working_fans,
            h12_steps,
        })
    }

    pub fn board(&self) -> BoardProfile {
        self.board
    }

    pub fn get_fan_mode(&self) -> Result<FanMode> {
        let response = self.dispatch(&self.board.mode_query())?;
        let byte = sf_transport::raw::parse_hex_byte(response.trim())?;
        FanMode::from_byte(byte).ok_or(SuperfanError::InvalidResponse(byte))
    }

    pub fn set_fan_mode(&self, mode: FanMode) -> Result<()> {
        self.dispatch(&self.board.mode_set(mode))?;
        let observed = self.get_fan_mode()?;
        if observed != mode {
            return Err(SuperfanError::ModeVerifyFailed {
                expected: format!("{mode:?}"),
                actual: format!("{observed:?}"),
            });
        }
        Ok(())
    }

    pub fn get_sensor_readings(&self) -> Result<Vec<SensorReading>> {
        let output = self.dispatch_raw_command("sdr list")?;
        Ok(parse_sdr(&output, Instant::now()))
    }

    /// See spec.md §4.5.1: applies the board minimum, resolves the
    /// operating point, dispatches, and post-verifies, falling back to
    /// `FanMode::Standard` on any failure.
    pub fn set_fan_speed(&self, percent: u8, zone: Zone) -> Result<SpeedEncoding> {
        let floor = self.board.minimum_percent(self.permit_off);
        let clamped = percent.clamp(floor, 100);
        let encoding = self.board.encode_speed_with(clamped, &self.h12_steps);
        let command = self.board.speed_set(zone, encoding.byte);

        if let Err(err) = self.dispatch(&command) {
            self.fallback_to_standard();
            return Err(err);
        }

        if let Err(err) = self.post_verify(&encoding) {
            self.fallback_to_standard();
            return Err(err);
        }

        Ok(encoding)
    }

    fn post_verify(&self, encoding: &SpeedEncoding) -> Result<()> {
        let readings = self.get_sensor_readings()?;
        let working: Vec<&SensorReading> = readings
            .iter()
            .filter(|r| FanGroup::classify(&r.name).is_some() && r.value.is_some())
            .collect();

        if working.len() < 2 {
            warn!(count = working.len(), "fewer than 2 fan sensors reporting RPM");
            return Ok(());
        }

        if let Some(step) = encoding.step {
            for reading in &working {
                let group = FanGroup::classify(&reading.name).expect("filtered above");
                let range = step.range_for(group);
                let rpm = reading.value.unwrap_or(0.0);
                if (rpm as u32) < range.min {
                    return Err(SuperfanError::FanUnsafe(format!(
                        "{} reported {rpm} rpm, below {:?} group minimum {}",
                        reading.name, group, range.min
                    )));
                }
                if (rpm as u32) > range.max {
                    warn!(sensor = %reading.name, rpm, max = range.max, "fan RPM above expected range");
                }
                if let Some(stable) = range.stable {
                    let deviation = (rpm - stable as f32).abs() / stable as f32 * 100.0;
                    if deviation > FAN_POST_VERIFY_RPM_TOLERANCE_PCT {
                        warn!(sensor = %reading.name, rpm, stable, deviation, "fan RPM deviates from stable");
                    }
                }
            }
        }

        Ok(())
    }

    /// Partition FAN* readings into groups; resolve the expected step
    /// (H12 by mapping target to step; otherwise any positive RPM counts as
    /// working, since only H12 carries an RPM table); return true iff at
    /// least `min_working_fans` pass.
    pub fn verify_fan_speed(&self, target_percent: u8, tolerance_percent: f32) -> Result<bool> {
        let readings = self.get_sensor_readings()?;
        let expected_step = matches!(self.board, BoardProfile::H12)
            .then(|| board::step_for_percent_in(&self.h12_steps, target_percent));

        let mut passing = 0usize;
        for reading in &readings {
            let Some(group) = FanGroup::classify(&reading.name) else {
                continue;
            };
            if matches!(reading.state, sf_sensors::SensorState::NoReading) {
                continue;
            }
            let Some(rpm) = reading.value else { continue };

            // Non-H12 boards carry no RPM table; require at least a nominal
            // positive RPM so a truly stalled fan (0 RPM) still fails.
            let min = expected_step
                .map(|step| step.range_for(group).min)
                .unwrap_or(1);
            let required = min as f32 * (1.0 - tolerance_percent / 100.0);
            if rpm >= required {
                passing += 1;
            }
        }

        Ok(passing >= self.min_working_fans)
    }

    fn fallback_to_standard(&self) {
        if let Err(err) = self.set_fan_mode(FanMode::Standard) {
            warn!(%err, "best-effort fallback to standard mode failed");
        }
    }

    fn dispatch(&self, command: &sf_transport::RawCommand) -> Result<String> {
        self.validator.validate(command)?;
        self.dispatch_raw_command(&command.render())
    }

    fn dispatch_raw_command(&self, rendered: &str) -> Result<String> {
        let mut last_err = None;
        for attempt in 0..RETRY_ATTEMPTS {
            match self.transport.execute(rendered) {
                Ok(output) => return Ok(output),
                Err(SuperfanError::DeviceBusy(msg)) => {
                    last_err = Some(SuperfanError::DeviceBusy(msg));
                    if attempt + 1 < RETRY_ATTEMPTS {
                        thread::sleep(RETRY_DELAY);
                    }
                }
                Err(other) => return Err(other),
            }
        }
        Err(last_err.unwrap_or_else(|| SuperfanError::generic("dispatch failed with no attempts")))
    }
}

impl IpmiSensorSource for Commander {
    fn get_sensor_readings(&self) -> Result<Vec<SensorReading>> {
        Commander::get_sensor_readings(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_transport::testing::FakeBmcTransport;

    fn open_x11(fake: Arc<FakeBmcTransport>) -> Commander {
        fake.push_ok("dmidecode -s system-product-name", "SYS-2029U-TN24R4T");
        fake.push_ok("mc info", "Product Name : X11DPH-T\nFirmware Revision : 2.10");
        Commander::open(fake, false, 2).unwrap()
    }

    #[test]
    fn open_detects_board_and_sets_floor() {
        let fake = Arc::new(FakeBmcTransport::new());
        let commander = open_x11(fake);
        assert_eq!(commander.board(), BoardProfile::X11);
    }

    #[test]
    fn get_fan_mode_parses_response_byte() {
        let fake = Arc::new(FakeBmcTransport::new());
        let commander = open_x11(fake.clone());
        fake.push_ok("raw 0x30 0x45 0x00", "01");
        assert_eq!(commander.get_fan_mode().unwrap(), FanMode::Full);
    }

    #[test]
    fn get_fan_mode_rejects_unknown_byte() {
        let fake = Arc::new(FakeBmcTransport::new());
        let commander = open_x11(fake.clone());
        fake.push_ok("raw 0x30 0x45 0x00", "03");
        assert!(matches!(
            commander.get_fan_mode(),
            Err(SuperfanError::InvalidResponse(0x03))
        ));
    }

    #[test]
    fn set_fan_mode_verifies_readback() {
        let fake = Arc::new(FakeBmcTransport::new());
        let commander = open_x11(fake.clone());
        fake.push_ok("raw 0x30 0x45 0x01 0x01", "ok");
        fake.push_ok("raw 0x30 0x45 0x00", "01");
        commander.set_fan_mode(FanMode::Full).unwrap();
    }

    #[test]
    fn set_fan_mode_fails_when_readback_disagrees() {
        let fake = Arc::new(FakeBmcTransport::new());
        let commander = open_x11(fake.clone());
        fake.push_ok("raw 0x30 0x45 0x01 0x01", "ok");
        fake.push_ok("raw 0x30 0x45 0x00", "00");
        assert!(matches!(
            commander.set_fan_mode(FanMode::Full),
            Err(SuperfanError::ModeVerifyFailed { .. })
        ));
    }

    #[test]
    fn dispatch_retries_on_device_busy_then_succeeds() {
        let fake = Arc::new(FakeBmcTransport::new());
        let commander = open_x11(fake.clone());
        fake.push_response(
            "raw 0x30 0x45 0x00",
            Err(SuperfanError::DeviceBusy("busy".to_string())),
        );
        fake.push_ok("raw 0x30 0x45 0x00", "00");
        assert_eq!(commander.get_fan_mode().unwrap(), FanMode::Standard);
        assert_eq!(fake.call_count("raw 0x30 0x45 0x00"), 2);
    }

    #[test]
    fn dispatch_does_not_retry_command_failed() {
        let fake = Arc::new(FakeBmcTransport::new());
        let commander = open_x11(fake.clone());
        fake.set_default(Err(SuperfanError::CommandFailed("nope".to_string())));
        assert!(commander.get_fan_mode().is_err());
        assert_eq!(fake.call_count("raw 0x30 0x45 0x00"), 1);
    }

    #[test]
    fn set_fan_speed_on_h12_snaps_to_step_and_reports_threshold() {
        let fake = Arc::new(FakeBmcTransport::new());
        fake.push_ok("dmidecode -s system-product-name", "SYS-H12SSL-NT");
        let commander = Commander::open(fake.clone(), false, 2).unwrap();

        fake.push_ok("raw 0x30 0x70 0x66 0x01 0x00 0x40", "ok");
        fake.push_ok(
            "sdr list",
            "FAN1 | 1700 RPM | ok\nFAN2 | 1300 RPM | ok\nCPU1 Temp | 40.000 degrees C | ok",
        );

        let encoding = commander.set_fan_speed(55, Zone::Chassis).unwrap();
        assert_eq!(encoding.byte, 0x40);
        assert_eq!(encoding.reported_percent, 50);
    }

    #[test]
    fn set_fan_speed_falls_back_to_standard_on_dispatch_failure() {
        let fake = Arc::new(FakeBmcTransport::new());
        let commander = open_x11(fake.clone());
        fake.push_response(
            "raw 0x30 0x70 0x66 0x01 0x00 0x80",
            Err(SuperfanError::CommandFailed("nope".to_string())),
        );
        fake.push_ok("raw 0x30 0x45 0x01 0x00", "ok");
        fake.push_ok("raw 0x30 0x45 0x00", "00");

        let result = commander.set_fan_speed(50, Zone::Chassis);
        assert!(result.is_err());
        assert_eq!(fake.call_count("raw 0x30 0x45 0x01 0x00"), 1);
    }

    #[test]
    fn verify_fan_speed_requires_min_working_fans() {
        let fake = Arc::new(FakeBmcTransport::new());
        let commander = open_x11(fake.clone());
        fake.push_ok("sdr list", "FAN1 | 0 RPM | ok\nFAN2 | 0 RPM | ok");
        assert!(!commander.verify_fan_speed(50, 10.0).unwrap());
    }

    #[test]
    fn h12_override_retunes_dispatched_byte_and_threshold() {
        let fake = Arc::new(FakeBmcTransport::new());
        fake.push_ok("dmidecode -s system-product-name", "SYS-H12SSL-NT");
        let overrides = vec![(
            "medium".to_string(),
            SpeedStepOverride {
                threshold_pct: Some(50),
                byte: Some(0x50),
                ..Default::default()
            },
        )];
        let commander =
            Commander::open_with_h12_overrides(fake.clone(), false, 2, &overrides).unwrap();

        fake.push_ok("raw 0x30 0x70 0x66 0x01 0x00 0x50", "ok");
        fake.push_ok(
            "sdr list",
            "FAN1 | 1700 RPM | ok\nFAN2 | 1300 RPM | ok\nCPU1 Temp | 40.000 degrees C | ok",
        );

        let encoding = commander.set_fan_speed(55, Zone::Chassis).unwrap();
        assert_eq!(encoding.byte, 0x50);
        assert_eq!(encoding.reported_percent, 50);
    }
}
