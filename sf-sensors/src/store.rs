//! `map<name, SensorHistory>` keyed store (C7).

use crate::history::{SensorHistory, Stats};
use crate::reading::SensorReading;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

pub struct SensorStore {
    histories: HashMap<String, SensorHistory>,
    reading_timeout: Duration,
    min_readings: usize,
}

impl SensorStore {
    pub fn new(reading_timeout: Duration, min_readings: usize) -> Self {
        Self {
            histories: HashMap::new(),
            reading_timeout,
            min_readings,
        }
    }

    pub fn append(&mut self, reading: SensorReading) {
        self.histories
            .entry(reading.name.clone())
            .or_insert_with(|| SensorHistory::new(self.reading_timeout, self.min_readings))
            .append(reading);
    }

    pub fn stats(&self, name: &str) -> Option<Stats> {
        self.histories.get(name).and_then(SensorHistory::stats)
    }

    pub fn names(&self) -> HashSet<String> {
        self.histories.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::SensorState;
    use std::time::Instant;

    #[test]
    fn append_groups_readings_by_name() {
        let mut store = SensorStore::new(Duration::from_secs(60), 1);
        let now = Instant::now();
        store.append(SensorReading::new("CPU1 Temp", Some(40.0), SensorState::Ok, now));
        store.append(SensorReading::new("CPU2 Temp", Some(42.0), SensorState::Ok, now));

        assert_eq!(store.names().len(), 2);
        assert_eq!(store.stats("CPU1 Temp").unwrap().current, 40.0);
        assert_eq!(store.stats("CPU2 Temp").unwrap().current, 42.0);
    }

    #[test]
    fn missing_name_has_no_stats() {
        let store = SensorStore::new(Duration::from_secs(60), 1);
        assert!(store.stats("nonexistent").is_none());
    }
}
