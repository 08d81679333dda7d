//! Unified error handling for the superfan daemon
//!
//! One error type shared by every crate in the workspace, following the
//! same grouping-by-subsystem style as a typical `thiserror` crate root:
//! each group gets its own comment banner and maps to one of the error
//! kinds from the design's error-handling policy.

use std::fmt;

/// Result type alias using [`SuperfanError`]
pub type Result<T> = std::result::Result<T, SuperfanError>;

/// Unified error type for all superfan operations
#[derive(thiserror::Error, Debug)]
pub enum SuperfanError {
    // ============================================================================
    // Transport errors (C1 BmcTransport / C2 NvmeTransport)
    // ============================================================================
    #[error("IPMI session unavailable: {0}")]
    ConnectionLost(String),

    #[error("IPMI device busy: {0}")]
    DeviceBusy(String),

    #[error("IPMI command failed: {0}")]
    CommandFailed(String),

    #[error("NVMe transport error: {0}")]
    NvmeTransport(String),

    // ============================================================================
    // Validation errors (C3 CommandValidator)
    // ============================================================================
    #[error("command ({netfn:#04x}, {cmd:#04x}) is blacklisted for safety")]
    Blacklisted { netfn: u8, cmd: u8 },

    #[error("malformed hex token in raw command: {0}")]
    Malformed(String),

    #[error("unsafe fan mode byte: {0:#04x}")]
    UnsafeMode(u8),

    #[error("unsafe fan speed byte: {0:#04x} (below floor {1:#04x})")]
    UnsafeSpeed(u8, u8),

    // ============================================================================
    // Board / Commander errors (C4, C5)
    // ============================================================================
    #[error("board generation could not be determined")]
    UnknownBoard,

    #[error("fan mode change did not verify: expected {expected:?}, read back {actual:?}")]
    ModeVerifyFailed { expected: String, actual: String },

    #[error("invalid response byte from BMC: {0:#04x}")]
    InvalidResponse(u8),

    #[error("fan speed unsafe after dispatch: {0}")]
    FanUnsafe(String),

    // ============================================================================
    // Parsing errors (C6 SensorParser) — non-fatal, logged and dropped
    // ============================================================================
    #[error("failed to parse SDR line: {0}")]
    SdrLine(String),

    #[error("failed to parse NVMe SMART log: {0}")]
    SmartLog(String),

    // ============================================================================
    // Configuration errors — fatal at startup
    // ============================================================================
    #[error("missing required configuration: {0}")]
    MissingConfig(String),

    #[error("invalid configuration value for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ============================================================================
    // Generic
    // ============================================================================
    #[error("{0}")]
    Generic(String),
}

impl SuperfanError {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<String> for SuperfanError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

impl From<&str> for SuperfanError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}

/// Reason code enumeration produced by the safety monitor (C11); kept here
/// since every crate that logs a safety trip needs to name the reason the
/// same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyReason {
    CriticalSensor,
    NoSignal,
    ZoneCritical,
    WatchdogExpired,
    FanVerifyFailed,
}

impl fmt::Display for SafetyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SafetyReason::CriticalSensor => "a sensor reported critical state",
            SafetyReason::NoSignal => "no temperature readings from any source",
            SafetyReason::ZoneCritical => "a zone exceeded its critical temperature",
            SafetyReason::WatchdogExpired => "sensor readings are stale (watchdog expired)",
            SafetyReason::FanVerifyFailed => "fan speed verification failed",
        };
        f.write_str(s)
    }
}
