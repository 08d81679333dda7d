//! Rolling per-sensor history with timeout eviction (C7 `SensorStore`'s
//! per-name bucket).

use crate::reading::SensorReading;
use std::collections::VecDeque;
use std::time::Duration;

/// Aggregate statistics over the valid readings currently held for one
/// sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub current: f32,
    pub min: f32,
    pub max: f32,
    pub avg: f32,
    pub stdev: Option<f32>,
}

/// Bounded history of readings for a single sensor name.
pub struct SensorHistory {
    readings: VecDeque<SensorReading>,
    reading_timeout: Duration,
    min_readings: usize,
}

impl SensorHistory {
    pub fn new(reading_timeout: Duration, min_readings: usize) -> Self {
        Self {
            readings: VecDeque::new(),
            reading_timeout,
            min_readings: min_readings.max(1),
        }
    }

    /// Push a new reading and evict entries that have aged out, using the
    /// new reading's own timestamp as the reference "now".
    pub fn append(&mut self, reading: SensorReading) {
        let now = reading.timestamp;
        self.readings.push_back(reading);
        while let Some(front) = self.readings.front() {
            if front.age(now) > self.reading_timeout {
                self.readings.pop_front();
            } else {
                break;
            }
        }
    }

    /// Most recent reading regardless of validity.
    pub fn latest(&self) -> Option<&SensorReading> {
        self.readings.back()
    }

    /// `Some` iff at least `min_readings` valid (non-expired, non-`ns`)
    /// readings are currently held. `current` is the most recent *valid*
    /// reading's value, not necessarily the last one appended.
    pub fn stats(&self) -> Option<Stats> {
        let valid: Vec<f32> = self
            .readings
            .iter()
            .filter(|r| r.is_valid())
            .filter_map(|r| r.value)
            .collect();

        if valid.len() < self.min_readings {
            return None;
        }

        let current = self
            .readings
            .iter()
            .rev()
            .find(|r| r.is_valid())
            .and_then(|r| r.value)?;

        let min = valid.iter().copied().fold(f32::INFINITY, f32::min);
        let max = valid.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let avg = valid.iter().sum::<f32>() / valid.len() as f32;

        let stdev = if valid.len() > 1 {
            let variance =
                valid.iter().map(|v| (v - avg).powi(2)).sum::<f32>() / (valid.len() - 1) as f32;
            Some(variance.sqrt())
        } else {
            None
        };

        Some(Stats {
            current,
            min,
            max,
            avg,
            stdev,
        })
    }
}
