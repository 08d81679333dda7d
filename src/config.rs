//! The configuration contract (spec.md §6) as a concrete, deserializable
//! struct. Loading from disk is an external collaborator's job; this module
//! owns the shape, the defaults, and the validation the daemon depends on.

use serde::{Deserialize, Serialize};
use sf_control::ZoneConfig;
use sf_ipmi::Zone as WireZone;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ipmi: IpmiConfig,
    #[serde(default)]
    pub temperature: TemperatureConfig,
    #[serde(default)]
    pub fans: FansConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpmiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_interface")]
    pub interface: String,
}

impl Default for IpmiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            username: default_username(),
            password: default_password(),
            interface: default_interface(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemperatureConfig {
    #[serde(default = "default_hysteresis")]
    pub hysteresis: f32,
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            hysteresis: default_hysteresis(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FansConfig {
    #[serde(default = "default_polling_interval_secs")]
    pub polling_interval: u64,
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval: u64,
    #[serde(default = "default_min_speed")]
    pub min_speed: f32,
    #[serde(default = "default_max_speed")]
    pub max_speed: f32,
    #[serde(default = "default_ramp_step")]
    pub ramp_step: f32,
    #[serde(default)]
    pub zones: BTreeMap<String, ZoneSpec>,
    #[serde(default)]
    pub board_config: BoardConfigSection,
}

impl Default for FansConfig {
    fn default() -> Self {
        Self {
            polling_interval: default_polling_interval_secs(),
            monitor_interval: default_monitor_interval_secs(),
            min_speed: default_min_speed(),
            max_speed: default_max_speed(),
            ramp_step: default_ramp_step(),
            zones: BTreeMap::new(),
            board_config: BoardConfigSection::default(),
        }
    }
}

/// One entry of `fans.zones`. `kind`/`curve` are validated and resolved
/// into runtime types (`sf_ipmi::Zone`, `sf_control::FanCurve`) at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `"chassis"` or `"cpu"`.
    pub kind: String,
    pub target: f32,
    pub warning_max: f32,
    pub critical_max: f32,
    pub sensors: Vec<String>,
    /// `[[delta_c, percent], ...]`, interpreted as a `Linear` curve.
    pub curve: Vec<(f32, f32)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BoardConfigSection {
    /// H12-only: per-step overrides of the built-in table. Left empty, the
    /// compiled-in `sf_ipmi::H12_STEPS` table applies unmodified.
    #[serde(default)]
    pub speed_steps: BTreeMap<String, SpeedStepConfig>,
}

/// One `fans.board_config.speed_steps.{step}` entry. Every field is
/// optional: an absent field leaves the compiled-in default for that step
/// untouched, only the fields actually present retune it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpeedStepConfig {
    #[serde(default)]
    pub threshold: Option<u8>,
    #[serde(default)]
    pub hex_speed: Option<u8>,
    #[serde(default)]
    pub rpm_ranges: Option<RpmRangesConfig>,
}

impl SpeedStepConfig {
    /// Every `RpmRangeConfig` this entry sets, for bounds validation.
    fn rpm_range_entries(&self) -> Vec<&RpmRangeConfig> {
        let Some(ranges) = &self.rpm_ranges else {
            return Vec::new();
        };
        let mut entries = Vec::new();
        if let Some(chassis) = &ranges.chassis {
            entries.extend(chassis.high_rpm.as_ref());
            entries.extend(chassis.low_rpm.as_ref());
        }
        entries.extend(ranges.cpu.as_ref());
        entries
    }

    fn to_override(&self) -> sf_ipmi::SpeedStepOverride {
        let chassis = self.rpm_ranges.as_ref().and_then(|r| r.chassis.as_ref());
        sf_ipmi::SpeedStepOverride {
            threshold_pct: self.threshold,
            byte: self.hex_speed,
            high_rpm: chassis.and_then(|c| c.high_rpm.as_ref()).map(RpmRangeConfig::to_range),
            low_rpm: chassis.and_then(|c| c.low_rpm.as_ref()).map(RpmRangeConfig::to_range),
            cpu: self
                .rpm_ranges
                .as_ref()
                .and_then(|r| r.cpu.as_ref())
                .map(RpmRangeConfig::to_range),
        }
    }
}

/// `rpm_ranges.{chassis,cpu}` per spec.md §6: chassis carries separate
/// high-RPM/low-RPM groups, CPU is a single range.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RpmRangesConfig {
    #[serde(default)]
    pub chassis: Option<ChassisRpmRangesConfig>,
    #[serde(default)]
    pub cpu: Option<RpmRangeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChassisRpmRangesConfig {
    #[serde(default)]
    pub high_rpm: Option<RpmRangeConfig>,
    #[serde(default)]
    pub low_rpm: Option<RpmRangeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpmRangeConfig {
    pub min: u32,
    pub max: u32,
    #[serde(default)]
    pub stable: Option<u32>,
}

impl RpmRangeConfig {
    fn to_range(&self) -> sf_ipmi::RpmRange {
        sf_ipmi::RpmRange {
            min: self.min,
            max: self.max,
            stable: self.stable,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_watchdog_timeout_secs")]
    pub watchdog_timeout: u64,
    #[serde(default = "default_min_temp_readings")]
    pub min_temp_readings: usize,
    #[serde(default = "default_min_working_fans")]
    pub min_working_fans: usize,
    #[serde(default = "default_true")]
    pub restore_on_exit: bool,
    #[serde(default)]
    pub permit_fan_off: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout: default_watchdog_timeout_secs(),
            min_temp_readings: default_min_temp_readings(),
            min_working_fans: default_min_working_fans(),
            restore_on_exit: true,
            permit_fan_off: false,
        }
    }
}

impl Config {
    /// Resolve `fans.polling_interval` as a `Duration`.
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.fans.polling_interval)
    }

    /// Resolve `fans.monitor_interval` as a `Duration`.
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.fans.monitor_interval)
    }

    /// Resolve `safety.watchdog_timeout` as a `Duration`.
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_secs(self.safety.watchdog_timeout)
    }

    /// Validate cross-field constraints a plain `#[serde(default)]` can't
    /// express (spec.md §7 `Config::{Missing, InvalidValue}`, fatal at
    /// startup).
    pub fn validate(&self) -> sf_error::Result<()> {
        if self.fans.min_speed > self.fans.max_speed {
            return Err(sf_error::SuperfanError::invalid_config(
                "fans.min_speed",
                "must not exceed fans.max_speed",
            ));
        }
        if self.fans.zones.is_empty() {
            return Err(sf_error::SuperfanError::invalid_config(
                "fans.zones",
                "at least one zone must be configured",
            ));
        }
        for (name, zone) in &self.fans.zones {
            parse_zone_kind(&zone.kind).map_err(|_| {
                sf_error::SuperfanError::invalid_config(
                    format!("fans.zones.{name}.kind"),
                    "must be \"chassis\" or \"cpu\"",
                )
            })?;
            if zone.curve.is_empty() {
                return Err(sf_error::SuperfanError::invalid_config(
                    format!("fans.zones.{name}.curve"),
                    "must have at least one point",
                ));
            }
        }
        for (step_name, step) in &self.fans.board_config.speed_steps {
            if !sf_ipmi::H12_STEP_NAMES.contains(&step_name.as_str()) {
                return Err(sf_error::SuperfanError::invalid_config(
                    format!("fans.board_config.speed_steps.{step_name}"),
                    "must name a known H12 step (off, very_low, low, medium, high, full)",
                ));
            }
            for range in step.rpm_range_entries() {
                if range.min > range.max {
                    return Err(sf_error::SuperfanError::invalid_config(
                        format!("fans.board_config.speed_steps.{step_name}.rpm_ranges"),
                        "min must not exceed max",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Build the H12 override list [`sf_ipmi::Commander::open_with_h12_overrides`]
    /// consults, from `fans.board_config.speed_steps` (spec.md §6).
    pub fn h12_overrides(&self) -> Vec<(String, sf_ipmi::SpeedStepOverride)> {
        self.fans
            .board_config
            .speed_steps
            .iter()
            .map(|(name, step)| (name.clone(), step.to_override()))
            .collect()
    }

    /// Resolve one zone spec into the runtime `ZoneConfig` `sf-control`
    /// understands.
    pub fn zone_config(&self, name: &str, spec: &ZoneSpec) -> sf_error::Result<ZoneConfig> {
        let kind = parse_zone_kind(&spec.kind)
            .map_err(|_| sf_error::SuperfanError::invalid_config(format!("fans.zones.{name}.kind"), "must be \"chassis\" or \"cpu\""))?;
        Ok(ZoneConfig {
            name: name.to_string(),
            kind,
            enabled: spec.enabled,
            target: spec.target,
            warning_max: spec.warning_max,
            critical_max: spec.critical_max,
            sensors: spec.sensors.clone(),
        })
    }
}

fn parse_zone_kind(raw: &str) -> Result<WireZone, ()> {
    match raw.to_ascii_lowercase().as_str() {
        "chassis" => Ok(WireZone::Chassis),
        "cpu" => Ok(WireZone::Cpu),
        _ => Err(()),
    }
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_username() -> String {
    "ADMIN".to_string()
}
fn default_password() -> String {
    "ADMIN".to_string()
}
fn default_interface() -> String {
    "lanplus".to_string()
}
fn default_hysteresis() -> f32 {
    3.0
}
fn default_polling_interval_secs() -> u64 {
    5
}
fn default_monitor_interval_secs() -> u64 {
    2
}
fn default_min_speed() -> f32 {
    20.0
}
fn default_max_speed() -> f32 {
    100.0
}
fn default_ramp_step() -> f32 {
    5.0
}
fn default_watchdog_timeout_secs() -> u64 {
    90
}
fn default_min_temp_readings() -> usize {
    1
}
fn default_min_working_fans() -> usize {
    2
}
fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ipmi: IpmiConfig::default(),
            temperature: TemperatureConfig::default(),
            fans: FansConfig::default(),
            safety: SafetyConfig::default(),
        }
    }
}
