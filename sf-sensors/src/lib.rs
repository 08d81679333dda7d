//! Sensor acquisition layer: raw reading types, a pure textual parser, a
//! rolling per-sensor history store, and the combined IPMI/NVMe reader that
//! sits in front of both.

mod combined;
mod history;
mod parser;
mod reading;
mod store;

pub use combined::{glob_to_regex, CombinedSensorReader, IpmiSensorSource};
pub use history::{SensorHistory, Stats};
pub use parser::{parse_sdr, parse_smart_log};
pub use reading::{SensorReading, SensorState};
pub use store::SensorStore;
