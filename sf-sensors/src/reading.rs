//! Point-in-time sensor observations (C3 data model: `SensorReading`).

use std::time::{Duration, Instant};

/// Canonicalized sensor state, one of `{ok, cr, ns}` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    Ok,
    Critical,
    NoReading,
}

impl SensorState {
    /// Parse the canonicalized three-letter BMC state token.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "ok" => SensorState::Ok,
            "cr" => SensorState::Critical,
            _ => SensorState::NoReading,
        }
    }
}

/// A single point-in-time observation from a sensor.
#[derive(Debug, Clone)]
pub struct SensorReading {
    pub name: String,
    pub value: Option<f32>,
    pub timestamp: Instant,
    pub state: SensorState,
    /// IPMI transaction correlation id, attached post hoc by the parser
    /// when the BMC emits a "Received a response with unexpected ID" line.
    pub response_id: Option<u64>,
}

impl SensorReading {
    pub fn new(name: impl Into<String>, value: Option<f32>, state: SensorState, timestamp: Instant) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp,
            state,
            response_id: None,
        }
    }

    /// Age of this reading relative to `now`.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.timestamp)
    }

    /// A reading is valid iff its state is not `NoReading` and a value is present.
    pub fn is_valid(&self) -> bool {
        !matches!(self.state, SensorState::NoReading) && self.value.is_some()
    }

    pub fn is_critical(&self) -> bool {
        matches!(self.state, SensorState::Critical)
    }
}
