//! Fan-curve engine, zone binding, safety supervisor, and the control-loop
//! worker (C9-C12).

pub mod control_loop;
pub mod engine;
pub mod safety;
pub mod zone;

pub use control_loop::{ControlLoop, ControlParams, FanSpeedStatus, StatusSnapshot, ZoneRuntime};
pub use engine::{CurveResult, FanCurve};
pub use safety::SafetyEvaluation;
pub use zone::{delta, max_matched_temperature, ZoneConfig};
