//! Per-generation command templates, speed-step tables, and RPM ranges (C4).

use sf_error::{Result, SuperfanError};
use sf_transport::RawCommand;

/// Which physical fan zone a speed command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Chassis,
    Cpu,
}

/// The four fan-control modes a Supermicro BMC accepts, in mode-byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanMode {
    Standard,
    Full,
    Optimal,
    HeavyIo,
}

impl FanMode {
    pub fn to_byte(self) -> u8 {
        match self {
            FanMode::Standard => 0x00,
            FanMode::Full => 0x01,
            FanMode::Optimal => 0x02,
            FanMode::HeavyIo => 0x04,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(FanMode::Standard),
            0x01 => Some(FanMode::Full),
            0x02 => Some(FanMode::Optimal),
            0x04 => Some(FanMode::HeavyIo),
            _ => None,
        }
    }
}

/// A physical fan cohort for RPM verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanGroup {
    HighRpm,
    LowRpm,
    Cpu,
}

impl FanGroup {
    /// Classifies a sensor name per spec.md §4 naming convention: `FANA*` is
    /// the CPU group, `FAN1`/`FAN5` are the high-RPM group, other `FAN*` are
    /// low-RPM. Returns `None` for non-fan sensor names.
    pub fn classify(sensor_name: &str) -> Option<Self> {
        let upper = sensor_name.to_ascii_uppercase();
        if !upper.starts_with("FAN") {
            return None;
        }
        if upper.starts_with("FANA") {
            return Some(FanGroup::Cpu);
        }
        if upper.starts_with("FAN1") || upper.starts_with("FAN5") {
            return Some(FanGroup::HighRpm);
        }
        Some(FanGroup::LowRpm)
    }
}

/// Expected RPM envelope for one group at one speed step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RpmRange {
    pub min: u32,
    pub max: u32,
    pub stable: Option<u32>,
}

/// A discrete H12 operating point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedStep {
    pub name: &'static str,
    pub threshold_pct: u8,
    pub byte: u8,
    pub high_rpm: RpmRange,
    pub low_rpm: RpmRange,
    pub cpu: RpmRange,
}

impl SpeedStep {
    pub fn range_for(&self, group: FanGroup) -> RpmRange {
        match group {
            FanGroup::HighRpm => self.high_rpm,
            FanGroup::LowRpm => self.low_rpm,
            FanGroup::Cpu => self.cpu,
        }
    }
}

/// The single source of truth for H12's discrete speed-step table (spec.md
/// §4.4).
pub const H12_STEPS: &[SpeedStep] = &[
    SpeedStep {
        name: "off",
        threshold_pct: 0,
        byte: 0x00,
        high_rpm: RpmRange { min: 0, max: 1820, stable: None },
        low_rpm: RpmRange { min: 0, max: 1400, stable: None },
        cpu: RpmRange { min: 0, max: 3640, stable: None },
    },
    SpeedStep {
        name: "very_low",
        threshold_pct: 12,
        byte: 0x10,
        high_rpm: RpmRange { min: 0, max: 1820, stable: None },
        low_rpm: RpmRange { min: 0, max: 1400, stable: None },
        cpu: RpmRange { min: 0, max: 3640, stable: None },
    },
    SpeedStep {
        name: "low",
        threshold_pct: 25,
        byte: 0x20,
        high_rpm: RpmRange { min: 0, max: 1820, stable: None },
        low_rpm: RpmRange { min: 0, max: 1400, stable: None },
        cpu: RpmRange { min: 0, max: 3640, stable: None },
    },
    SpeedStep {
        name: "medium",
        threshold_pct: 50,
        byte: 0x40,
        high_rpm: RpmRange { min: 0, max: 1820, stable: None },
        low_rpm: RpmRange { min: 0, max: 1400, stable: None },
        cpu: RpmRange { min: 0, max: 3640, stable: None },
    },
    SpeedStep {
        name: "high",
        threshold_pct: 75,
        byte: 0x60,
        high_rpm: RpmRange { min: 0, max: 1820, stable: None },
        low_rpm: RpmRange { min: 0, max: 1400, stable: None },
        cpu: RpmRange { min: 0, max: 3640, stable: None },
    },
    SpeedStep {
        name: "full",
        threshold_pct: 100,
        byte: 0xff,
        high_rpm: RpmRange { min: 0, max: 1820, stable: Some(1680) },
        low_rpm: RpmRange { min: 0, max: 1400, stable: Some(1400) },
        cpu: RpmRange { min: 0, max: 3640, stable: Some(3640) },
    },
];

/// The fixed set of H12 step names, in ascending threshold order. Config
/// overrides may only retune an existing step, never add or rename one.
pub const H12_STEP_NAMES: &[&str] = &["off", "very_low", "low", "medium", "high", "full"];

/// Select the step whose threshold is the greatest `<= percent`, saturating
/// to `full` above 100 and to the first step below its threshold. `table`
/// must be sorted ascending by `threshold_pct`, as [`H12_STEPS`] and
/// [`resolve_h12_steps`]'s output both are. Pass `H12_STEPS` itself to
/// resolve against the compiled-in defaults.
pub fn step_for_percent_in(table: &[SpeedStep], percent: u8) -> SpeedStep {
    *table
        .iter()
        .rev()
        .find(|step| step.threshold_pct <= percent)
        .unwrap_or(&table[0])
}

/// A per-step override of the compiled-in H12 table, as accepted by
/// spec.md §6's `fans.board_config.speed_steps.{step}` configuration key.
/// `None` fields leave the compiled-in default for that field untouched;
/// the step's `name` is fixed by which compiled-in entry it overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpeedStepOverride {
    pub threshold_pct: Option<u8>,
    pub byte: Option<u8>,
    pub high_rpm: Option<RpmRange>,
    pub low_rpm: Option<RpmRange>,
    pub cpu: Option<RpmRange>,
}

/// Apply named overrides onto [`H12_STEPS`], producing the runtime table a
/// [`crate::Commander`] actually consults. Entries naming a step not in the
/// compiled-in table are ignored by this function; callers validate step
/// names against the compiled-in set before reaching here (spec.md §7
/// `Config::InvalidValue` is a construction-time concern, not this
/// function's).
pub fn resolve_h12_steps(overrides: &[(String, SpeedStepOverride)]) -> Vec<SpeedStep> {
    let mut steps: Vec<SpeedStep> = H12_STEPS.to_vec();
    for (name, over) in overrides {
        let Some(step) = steps.iter_mut().find(|s| s.name == name) else {
            continue;
        };
        if let Some(v) = over.threshold_pct {
            step.threshold_pct = v;
        }
        if let Some(v) = over.byte {
            step.byte = v;
        }
        if let Some(v) = over.high_rpm {
            step.high_rpm = v;
        }
        if let Some(v) = over.low_rpm {
            step.low_rpm = v;
        }
        if let Some(v) = over.cpu {
            step.cpu = v;
        }
    }
    steps.sort_by_key(|s| s.threshold_pct);
    steps
}

/// Per-generation board profile. Detection runs once at startup; `Unknown`
/// must prevent any fan command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardProfile {
    X9,
    X10,
    X11,
    H12,
    X13,
    Unknown,
}

/// The outcome of resolving a requested percent to a dispatchable operating
/// point.
#[derive(Debug, Clone, Copy)]
pub struct SpeedEncoding {
    pub byte: u8,
    /// The commanded percent as actually reported (the step threshold for
    /// H12, the clamped request otherwise).
    pub reported_percent: u8,
    /// The H12 step behind this encoding, if any. An owned copy rather than
    /// a `'static` reference because it may come from a runtime-overridden
    /// table (`Commander`'s resolved `h12_steps`), not just [`H12_STEPS`].
    pub step: Option<SpeedStep>,
}

impl BoardProfile {
    /// Minimum percent a speed command may request, before snapping to a
    /// step. §9 resolves the "20% floor vs allow off" ambiguity toward a
    /// non-zero floor unless the caller explicitly permits off.
    pub fn minimum_percent(self, permit_off: bool) -> u8 {
        if permit_off {
            return 0;
        }
        match self {
            BoardProfile::H12 => 20,
            _ => 5,
        }
    }

    /// Resolve a requested (already floor-clamped) percent to the wire byte
    /// and the percent that should be reported as actually commanded, using
    /// the compiled-in H12 table. Equivalent to
    /// `encode_speed_with(percent, H12_STEPS)`.
    pub fn encode_speed(self, percent: u8) -> SpeedEncoding {
        self.encode_speed_with(percent, H12_STEPS)
    }

    /// As [`Self::encode_speed`], but resolving H12 steps against `h12_steps`
    /// instead of the compiled-in default — this is how `Commander` applies
    /// `fans.board_config.speed_steps` overrides (spec.md §6). Ignored for
    /// every generation but H12.
    pub fn encode_speed_with(self, percent: u8, h12_steps: &[SpeedStep]) -> SpeedEncoding {
        let percent = percent.min(100);
        match self {
            BoardProfile::H12 => {
                let step = step_for_percent_in(h12_steps, percent);
                SpeedEncoding {
                    byte: step.byte,
                    reported_percent: step.threshold_pct,
                    step: Some(step),
                }
            }
            _ => {
                let byte = ((percent as u32 * 255 + 50) / 100).clamp(0x04, 0xff) as u8;
                SpeedEncoding {
                    byte,
                    reported_percent: percent,
                    step: None,
                }
            }
        }
    }

    /// Compose the mode-query command.
    pub fn mode_query(self) -> RawCommand {
        RawCommand::new(0x30, 0x45, vec![0x00])
    }

    /// Compose the mode-set command.
    pub fn mode_set(self, mode: FanMode) -> RawCommand {
        RawCommand::new(0x30, 0x45, vec![0x01, mode.to_byte()])
    }

    /// Compose the speed-set command for `zone` using an already-encoded
    /// wire byte.
    pub fn speed_set(self, zone: Zone, byte: u8) -> RawCommand {
        match self {
            BoardProfile::X9 => {
                let group = match zone {
                    Zone::Chassis => 0x10,
                    Zone::Cpu => 0x11,
                };
                RawCommand::new(0x30, 0x91, vec![0x5A, 0x03, group, byte])
            }
            _ => {
                let zone_id = match zone {
                    Zone::Chassis => 0x00,
                    Zone::Cpu => 0x01,
                };
                RawCommand::new(0x30, 0x70, vec![0x66, 0x01, zone_id, byte])
            }
        }
    }
}

/// Detect the board generation. Order: DMI product string (reliable for
/// H12 specifically), then `mc info` board markers, then `mc info`
/// firmware-revision-major as a last resort. Grounded on
/// `original_source/.../commander.py::detect_board_generation`.
pub fn detect<F>(mut run: F) -> Result<BoardProfile>
where
    F: FnMut(&str) -> Result<String>,
{
    if let Ok(dmi) = run("dmidecode -s system-product-name") {
        if dmi.to_ascii_lowercase().contains("h12") {
            return Ok(BoardProfile::H12);
        }
    }

    if let Ok(mc_info) = run("mc info") {
        if let Some(profile) = from_markers(&mc_info) {
            return Ok(profile);
        }
        if let Some(profile) = from_firmware_revision(&mc_info) {
            return Ok(profile);
        }
    }

    Err(SuperfanError::UnknownBoard)
}

fn from_markers(mc_info: &str) -> Option<BoardProfile> {
    let lower = mc_info.to_ascii_lowercase();
    let has_any = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));
    if has_any(&["x13", "h13", "b13"]) {
        Some(BoardProfile::X13)
    } else if has_any(&["h12", "b12"]) {
        Some(BoardProfile::H12)
    } else if has_any(&["x11", "h11", "b11"]) {
        Some(BoardProfile::X11)
    } else if has_any(&["x10", "h10", "b10"]) {
        Some(BoardProfile::X10)
    } else if has_any(&["x9", "h9", "b9"]) {
        Some(BoardProfile::X9)
    } else {
        None
    }
}

fn from_firmware_revision(mc_info: &str) -> Option<BoardProfile> {
    for line in mc_info.lines() {
        if !line.to_ascii_lowercase().contains("firmware revision") {
            continue;
        }
        let value = line.splitn(2, ':').nth(1)?.trim();
        let major: u32 = value.split('.').next()?.trim().parse().ok()?;
        return match major {
            3 => Some(BoardProfile::X13),
            2 => Some(BoardProfile::X11),
            1 => Some(BoardProfile::X10),
            _ => None,
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h12_snaps_to_step_threshold() {
        let encoding = BoardProfile::H12.encode_speed(55);
        assert_eq!(encoding.byte, 0x40);
        assert_eq!(encoding.reported_percent, 50);
    }

    #[test]
    fn h12_saturates_below_first_threshold() {
        let encoding = BoardProfile::H12.encode_speed(5);
        assert_eq!(encoding.byte, 0x00);
    }

    #[test]
    fn non_h12_uses_continuous_byte_map() {
        let encoding = BoardProfile::X11.encode_speed(100);
        assert_eq!(encoding.byte, 0xff);
        let encoding = BoardProfile::X11.encode_speed(50);
        assert_eq!(encoding.byte, 0x80);
    }

    #[test]
    fn continuous_byte_never_drops_to_zero() {
        let encoding = BoardProfile::X11.encode_speed(0);
        assert_eq!(encoding.byte, 0x04);
    }

    #[test]
    fn x9_uses_distinct_template() {
        let cmd = BoardProfile::X9.speed_set(Zone::Cpu, 0x80);
        assert_eq!(cmd.netfn, 0x30);
        assert_eq!(cmd.cmd, 0x91);
        assert_eq!(cmd.data, vec![0x5A, 0x03, 0x11, 0x80]);
    }

    #[test]
    fn standard_generations_use_shared_template() {
        let cmd = BoardProfile::X11.speed_set(Zone::Chassis, 0x80);
        assert_eq!(cmd.cmd, 0x70);
        assert_eq!(cmd.data, vec![0x66, 0x01, 0x00, 0x80]);
    }

    #[test]
    fn detect_prefers_dmi_for_h12() {
        let profile = detect(|cmd| {
            if cmd.starts_with("dmidecode") {
                Ok("System Product Name: SYS-H12SSL-NT".to_string())
            } else {
                Ok(String::new())
            }
        })
        .unwrap();
        assert_eq!(profile, BoardProfile::H12);
    }

    #[test]
    fn detect_falls_back_to_mc_info_markers() {
        let profile = detect(|cmd| {
            if cmd.starts_with("dmidecode") {
                Ok("System Product Name: Unknown".to_string())
            } else {
                Ok("Manufacturer Name : Supermicro\nProduct Name : X11SSL".to_string())
            }
        })
        .unwrap();
        assert_eq!(profile, BoardProfile::X11);
    }

    #[test]
    fn detect_falls_back_to_firmware_revision() {
        let profile = detect(|cmd| {
            if cmd.starts_with("dmidecode") {
                Ok(String::new())
            } else {
                Ok("Firmware Revision : 2.10".to_string())
            }
        })
        .unwrap();
        assert_eq!(profile, BoardProfile::X11);
    }

    #[test]
    fn detect_fails_closed_when_unresolvable() {
        let result = detect(|_| Ok(String::new()));
        assert!(matches!(result, Err(SuperfanError::UnknownBoard)));
    }

    #[test]
    fn fan_group_classifies_by_naming_convention() {
        assert_eq!(FanGroup::classify("FANA1"), Some(FanGroup::Cpu));
        assert_eq!(FanGroup::classify("FAN1"), Some(FanGroup::HighRpm));
        assert_eq!(FanGroup::classify("FAN5"), Some(FanGroup::HighRpm));
        assert_eq!(FanGroup::classify("FAN2"), Some(FanGroup::LowRpm));
        assert_eq!(FanGroup::classify("CPU1 Temp"), None);
    }
}
