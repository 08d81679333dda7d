//! Merges an IPMI sensor source and NVMe SMART telemetry behind one name
//! space (C8).

use crate::history::Stats;
use crate::parser;
use crate::reading::SensorReading;
use crate::store::SensorStore;
use regex::Regex;
use sf_transport::NvmeTransport;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Decouples `CombinedSensorReader` from `sf-ipmi`'s `Commander` so the two
/// crates don't form a dependency cycle (`sf-ipmi` depends on `sf-sensors`
/// for `SensorReading`/`parser`, not the other way around). `Commander`
/// implements this trait.
pub trait IpmiSensorSource: Send + Sync {
    fn get_sensor_readings(&self) -> sf_error::Result<Vec<SensorReading>>;
}

/// Compile one glob pattern (`*`, `?`) into a case-insensitive, unanchored
/// substring-search regular expression.
pub fn glob_to_regex(pattern: &str) -> Regex {
    let mut escaped = String::with_capacity(pattern.len() * 2);
    for ch in pattern.chars() {
        match ch {
            '*' => escaped.push_str(".*"),
            '?' => escaped.push('.'),
            _ => escaped.push_str(&regex::escape(&ch.to_string())),
        }
    }
    Regex::new(&format!("(?i){escaped}")).unwrap_or_else(|_| Regex::new(".^").unwrap())
}

/// Merges an IPMI `SensorStore` and an NVMe `SensorStore`.
pub struct CombinedSensorReader {
    ipmi_source: Arc<dyn IpmiSensorSource>,
    nvme_transport: Arc<dyn NvmeTransport>,
    ipmi_store: SensorStore,
    nvme_store: SensorStore,
    patterns: Vec<Regex>,
    last_had_critical: bool,
}

impl CombinedSensorReader {
    pub fn new(
        ipmi_source: Arc<dyn IpmiSensorSource>,
        nvme_transport: Arc<dyn NvmeTransport>,
        reading_timeout: Duration,
        min_readings: usize,
        patterns: Option<Vec<String>>,
    ) -> Self {
        Self {
            ipmi_source,
            nvme_transport,
            ipmi_store: SensorStore::new(reading_timeout, min_readings),
            nvme_store: SensorStore::new(reading_timeout, min_readings),
            patterns: patterns
                .unwrap_or_default()
                .iter()
                .map(|p| glob_to_regex(p))
                .collect(),
            last_had_critical: false,
        }
    }

    fn accepts(&self, name: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|re| re.is_match(name))
    }

    /// Pull a fresh batch of readings from both sources and merge them in.
    pub fn update(&mut self) {
        self.last_had_critical = false;
        match self.ipmi_source.get_sensor_readings() {
            Ok(readings) => {
                for reading in readings {
                    if reading.is_critical() {
                        self.last_had_critical = true;
                    }
                    // A response-id mismatch is advisory only — never fails
                    // the read, just logged (spec.md §3 "Response-id
                    // mismatches are observable but never fatal").
                    if let Some(id) = reading.response_id {
                        warn!(sensor = %reading.name, response_id = id, "BMC reported a response with an unexpected transaction id");
                    }
                    if self.accepts(&reading.name) {
                        self.ipmi_store.append(reading);
                    }
                }
            }
            Err(err) => warn!(%err, "failed to read IPMI sensors"),
        }

        let devices = match self.nvme_transport.list() {
            Ok(devices) => devices,
            Err(err) => {
                debug!(%err, "no NVMe devices enumerated");
                return;
            }
        };

        let now = Instant::now();
        for path in devices {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.to_string_lossy().to_string());

            match self.nvme_transport.smart_log(&path) {
                Ok(log) => {
                    if let Some(reading) = parser::parse_smart_log(&log, &name, now) {
                        if self.accepts(&reading.name) {
                            self.nvme_store.append(reading);
                        }
                    }
                }
                Err(err) => warn!(%err, device = %name, "failed to read NVMe SMART log"),
            }
        }
    }

    /// Dispatches by name prefix: `NVMe_…` goes to the NVMe store, anything
    /// else to the IPMI store.
    pub fn stats(&self, name: &str) -> Option<Stats> {
        if name.starts_with("NVMe_") {
            self.nvme_store.stats(name)
        } else {
            self.ipmi_store.stats(name)
        }
    }

    pub fn names(&self) -> HashSet<String> {
        self.ipmi_store
            .names()
            .into_iter()
            .chain(self.nvme_store.names())
            .collect()
    }

    /// Whether the most recent `update()` saw any sensor in `Critical`
    /// state, regardless of whether it matched a discovery pattern. Used by
    /// the safety monitor (step 1 of spec.md §4.11).
    pub fn last_had_critical(&self) -> bool {
        self.last_had_critical
    }
}
