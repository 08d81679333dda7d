//! BMC command layer: validation, board detection, and the stateful
//! commander façade that sits in front of a [`sf_transport::BmcTransport`].

mod board;
mod commander;
mod validator;

pub use board::{
    resolve_h12_steps, step_for_percent_in, BoardProfile, FanGroup, FanMode, RpmRange,
    SpeedEncoding, SpeedStep, SpeedStepOverride, Zone, H12_STEPS, H12_STEP_NAMES,
};
pub use commander::Commander;
pub use validator::CommandValidator;
