pub mod curve;

pub use curve::{CurveResult, FanCurve};
