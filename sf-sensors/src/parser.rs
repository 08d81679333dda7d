//! Pure textual parsing of `sdr list` output and `nvme smart-log` text into
//! [`SensorReading`]s (C6). Does no I/O.

use crate::reading::{SensorReading, SensorState};
use std::time::Instant;

/// Parse `ipmitool sdr list` output captured at `now`.
///
/// Grounded on `commander.py::get_sensor_readings`: rows are `|`-delimited
/// `name | value | state [| ...]`; a line reporting a mismatched response id
/// attaches that id to the most recently emitted reading rather than
/// producing a reading of its own.
pub fn parse_sdr(output: &str, now: Instant) -> Vec<SensorReading> {
    let mut readings: Vec<SensorReading> = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(id) = extract_unexpected_id(line) {
            if let Some(last) = readings.last_mut() {
                last.response_id = Some(id);
            }
            continue;
        }

        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() < 3 {
            continue;
        }

        let name = fields[0].trim().to_string();
        let value_field = fields[1].trim();
        let state_field = fields[2].trim();

        let mut state = SensorState::from_token(state_field);
        let value = if matches!(state, SensorState::NoReading) {
            None
        } else {
            match parse_sdr_value(value_field) {
                Some(v) => Some(v),
                None => {
                    state = SensorState::NoReading;
                    None
                }
            }
        };

        readings.push(SensorReading::new(name, value, state, now));
    }

    readings
}

/// Extraction rule from spec.md §4.6: split the first `(` off, strip the
/// unit tokens, then parse as hex if `0x`-prefixed else as decimal.
fn parse_sdr_value(raw: &str) -> Option<f32> {
    let before_paren = raw.split('(').next().unwrap_or(raw).trim();
    let stripped: String = before_paren
        .replace("degrees", "")
        .replace('°', "")
        .replace("RPM", "")
        .replace('C', "")
        .split_whitespace()
        .collect();

    if stripped.is_empty() || stripped.eq_ignore_ascii_case("na") {
        return None;
    }

    if let Some(hex) = stripped.strip_prefix("0x").or_else(|| stripped.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok().map(|v| v as f32);
    }

    stripped.parse::<f32>().ok()
}

/// Returns `Some(id)` when the line reports a response-id mismatch.
fn extract_unexpected_id(line: &str) -> Option<u64> {
    let marker = "Received a response with unexpected ID:";
    let idx = line.find(marker)?;
    line[idx + marker.len()..]
        .trim()
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

/// Parse `nvme smart-log` output into one synthesized reading named
/// `NVMe_<device_name>`.
///
/// Grounded on the temperature-field scan in
/// `original_source/src/superfan/control/manager.py`'s NVMe temperature
/// handling: the first case-insensitive `temperature` line wins.
pub fn parse_smart_log(output: &str, device_name: &str, now: Instant) -> Option<SensorReading> {
    for line in output.lines() {
        if !line.to_ascii_lowercase().contains("temperature") {
            continue;
        }
        let after_colon = line.splitn(2, ':').nth(1)?;
        let before_paren = after_colon.split('(').next().unwrap_or(after_colon);
        let stripped: String = before_paren
            .replace("degrees", "")
            .replace('°', "")
            .replace('C', "")
            .split_whitespace()
            .collect();
        if let Ok(value) = stripped.parse::<f32>() {
            return Some(SensorReading::new(
                format!("NVMe_{device_name}"),
                Some(value),
                SensorState::Ok,
                now,
            ));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_degree_celsius_value() {
        let readings = parse_sdr("CPU1 Temp        | 45.000 degrees C | ok", Instant::now());
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].name, "CPU1 Temp");
        assert_eq!(readings[0].value, Some(45.0));
        assert!(!readings[0].is_critical());
    }

    #[test]
    fn parses_kelvin_parenthetical_value() {
        let readings = parse_sdr("CPU1 Temp | 45(318K) | ok", Instant::now());
        assert_eq!(readings[0].value, Some(45.0));
    }

    #[test]
    fn parses_rpm_value() {
        let readings = parse_sdr("FAN1 | 1420 RPM | ok", Instant::now());
        assert_eq!(readings[0].value, Some(1420.0));
    }

    #[test]
    fn parses_hex_value() {
        let readings = parse_sdr("Fan Mode | 0x01 | ok", Instant::now());
        assert_eq!(readings[0].value, Some(1.0));
    }

    #[test]
    fn na_value_forces_no_reading() {
        let readings = parse_sdr("FAN2 | na | ns", Instant::now());
        assert_eq!(readings[0].value, None);
        assert!(!readings[0].is_valid());
    }

    #[test]
    fn critical_state_is_preserved() {
        let readings = parse_sdr("CPU1 Temp | 95.000 degrees C | cr", Instant::now());
        assert!(readings[0].is_critical());
    }

    #[test]
    fn unparseable_value_forces_ns() {
        let readings = parse_sdr("Weird | garbage | ok", Instant::now());
        assert_eq!(readings[0].value, None);
        assert!(!readings[0].is_valid());
    }

    #[test]
    fn unexpected_id_attaches_to_most_recent_reading() {
        let readings = parse_sdr(
            "CPU1 Temp | 45.000 degrees C | ok\nReceived a response with unexpected ID: 7",
            Instant::now(),
        );
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].response_id, Some(7));
    }

    #[test]
    fn smart_log_extracts_temperature() {
        let log = "Smart Log for NVME device:nvme0n1\ntemperature : 35 C\navailable_spare : 100%";
        let reading = parse_smart_log(log, "nvme0n1", Instant::now()).unwrap();
        assert_eq!(reading.name, "NVMe_nvme0n1");
        assert_eq!(reading.value, Some(35.0));
        assert!(reading.is_valid());
    }

    #[test]
    fn smart_log_without_temperature_returns_none() {
        let log = "available_spare : 100%";
        assert!(parse_smart_log(log, "nvme0n1", Instant::now()).is_none());
    }
}
