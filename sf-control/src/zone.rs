//! Cooling-zone data model and sensor-to-zone binding (C10 `ZoneBinder`).

use sf_ipmi::Zone as WireZone;
use sf_sensors::{glob_to_regex, CombinedSensorReader};

/// A named cooling zone (spec.md §3 `Zone`).
#[derive(Debug, Clone)]
pub struct ZoneConfig {
    pub name: String,
    /// The wire-level zone identity used when commanding the BMC.
    pub kind: WireZone,
    pub enabled: bool,
    pub target: f32,
    pub warning_max: f32,
    pub critical_max: f32,
    /// Glob patterns (`*`, `?`) matched case-insensitively, substring
    /// semantics, against sensor names.
    pub sensors: Vec<String>,
}

/// For each glob in `zone.sensors`, enumerate matching sensor names across
/// `reader`; take the max current temperature across all matched valid
/// sensors; return `max(0, max_temp - target)`, or `None` if nothing
/// matched.
pub fn delta(zone: &ZoneConfig, reader: &CombinedSensorReader) -> Option<f32> {
    max_matched_temperature(&zone.sensors, reader).map(|max_temp| (max_temp - zone.target).max(0.0))
}

/// Shared by `delta` and the safety monitor's per-zone critical check
/// (spec.md §4.11 step 3 reuses "the same glob logic as §4.10").
pub fn max_matched_temperature(patterns: &[String], reader: &CombinedSensorReader) -> Option<f32> {
    let regexes: Vec<_> = patterns.iter().map(|p| glob_to_regex(p)).collect();
    let mut max_temp: Option<f32> = None;

    for name in reader.names() {
        if !regexes.iter().any(|re| re.is_match(&name)) {
            continue;
        }
        if let Some(stats) = reader.stats(&name) {
            max_temp = Some(max_temp.map_or(stats.current, |m: f32| m.max(stats.current)));
        }
    }

    max_temp
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_sensors::IpmiSensorSource;
    use sf_transport::testing::FakeNvmeTransport;
    use std::sync::Arc;
    use std::time::Duration;

    struct FixedIpmiSource {
        readings: Vec<sf_sensors::SensorReading>,
    }

    impl IpmiSensorSource for FixedIpmiSource {
        fn get_sensor_readings(&self) -> sf_error::Result<Vec<sf_sensors::SensorReading>> {
            Ok(self.readings.clone())
        }
    }

    fn reader_with(readings: Vec<sf_sensors::SensorReading>) -> CombinedSensorReader {
        let ipmi = Arc::new(FixedIpmiSource { readings });
        let nvme = Arc::new(FakeNvmeTransport::new());
        let mut reader = CombinedSensorReader::new(ipmi, nvme, Duration::from_secs(60), 1, None);
        reader.update();
        reader
    }

    fn zone(target: f32, patterns: &[&str]) -> ZoneConfig {
        ZoneConfig {
            name: "cpu".to_string(),
            kind: WireZone::Cpu,
            enabled: true,
            target,
            warning_max: 80.0,
            critical_max: 90.0,
            sensors: patterns.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn delta_is_max_across_matched_sensors_minus_target() {
        use sf_sensors::{SensorReading, SensorState};
        use std::time::Instant;
        let now = Instant::now();
        let reader = reader_with(vec![
            SensorReading::new("CPU1 Temp", Some(70.0), SensorState::Ok, now),
            SensorReading::new("CPU2 Temp", Some(65.0), SensorState::Ok, now),
        ]);
        let z = zone(65.0, &["CPU*"]);
        assert_eq!(delta(&z, &reader), Some(5.0));
    }

    #[test]
    fn delta_floors_at_zero_below_target() {
        use sf_sensors::{SensorReading, SensorState};
        use std::time::Instant;
        let reader = reader_with(vec![SensorReading::new(
            "CPU1 Temp",
            Some(40.0),
            SensorState::Ok,
            Instant::now(),
        )]);
        let z = zone(65.0, &["CPU*"]);
        assert_eq!(delta(&z, &reader), Some(0.0));
    }

    #[test]
    fn delta_is_none_when_no_sensor_matches() {
        let reader = reader_with(vec![]);
        let z = zone(65.0, &["CPU*"]);
        assert_eq!(delta(&z, &reader), None);
    }
}
