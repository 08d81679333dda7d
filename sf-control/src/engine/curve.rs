//! Tagged-variant fan-curve engine (C9). Deliberate redesign from the
//! source's curve class hierarchy: one `FanCurve` enum with a single
//! `speed_for` operation; `Hysteresis` wraps another variant by
//! composition, not inheritance. Curves never perform I/O.

use sf_ipmi::{SpeedStep, H12_STEPS};

/// The result of evaluating a curve at one Δt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CurveResult {
    Percent(f32),
    Step {
        percent: f32,
        byte: u8,
        step: &'static SpeedStep,
    },
}

impl CurveResult {
    pub fn percent(&self) -> f32 {
        match self {
            CurveResult::Percent(p) => *p,
            CurveResult::Step { percent, .. } => *percent,
        }
    }
}

/// Temperature-delta to target-speed mapping. All variants clamp to
/// `[min_speed, max_speed]`.
#[derive(Debug, Clone)]
pub enum FanCurve {
    Linear {
        points: Vec<(f32, f32)>,
        min_speed: f32,
        max_speed: f32,
    },
    Step {
        steps: Vec<(f32, f32)>,
        min_speed: f32,
        max_speed: f32,
    },
    /// Maps Δt to one of the fixed H12 speed-step tiers.
    StableStep,
    Hysteresis {
        inner: Box<FanCurve>,
        width: f32,
        last: Option<(f32, CurveResult)>,
    },
}

impl FanCurve {
    /// Points must be strictly increasing in Δt, unique, with speeds in
    /// `[0, 100]`, and `min_speed <= max_speed`.
    pub fn linear(points: Vec<(f32, f32)>, min_speed: f32, max_speed: f32) -> Result<Self, String> {
        validate_points(&points)?;
        validate_bounds(min_speed, max_speed)?;
        Ok(FanCurve::Linear {
            points,
            min_speed,
            max_speed,
        })
    }

    pub fn step(steps: Vec<(f32, f32)>, min_speed: f32, max_speed: f32) -> Result<Self, String> {
        validate_points(&steps)?;
        validate_bounds(min_speed, max_speed)?;
        Ok(FanCurve::Step {
            steps,
            min_speed,
            max_speed,
        })
    }

    pub fn stable_step() -> Self {
        FanCurve::StableStep
    }

    pub fn hysteresis(inner: FanCurve, width: f32) -> Self {
        FanCurve::Hysteresis {
            inner: Box::new(inner),
            width: width.abs(),
            last: None,
        }
    }

    /// Whether this curve (looking through any `Hysteresis` wrapper) is a
    /// `StableStep`, which uses a wider default change-threshold gate.
    pub fn is_stable_step(&self) -> bool {
        match self {
            FanCurve::StableStep => true,
            FanCurve::Hysteresis { inner, .. } => inner.is_stable_step(),
            _ => false,
        }
    }

    /// The curve's own floor, used as the "safe default" speed when a zone
    /// has no valid sensor reading to drive it at start-up.
    pub fn min_speed(&self) -> f32 {
        match self {
            FanCurve::Linear { min_speed, .. } => *min_speed,
            FanCurve::Step { min_speed, .. } => *min_speed,
            FanCurve::StableStep => H12_STEPS[0].threshold_pct as f32,
            FanCurve::Hysteresis { inner, .. } => inner.min_speed(),
        }
    }

    pub fn speed_for(&mut self, delta_c: f32) -> CurveResult {
        match self {
            FanCurve::Linear {
                points,
                min_speed,
                max_speed,
            } => CurveResult::Percent(clamp(interpolate(points, delta_c), *min_speed, *max_speed)),
            FanCurve::Step {
                steps,
                min_speed,
                max_speed,
            } => CurveResult::Percent(clamp(step_lookup(steps, delta_c), *min_speed, *max_speed)),
            FanCurve::StableStep => {
                let step = stable_step_for_delta(delta_c);
                CurveResult::Step {
                    percent: step.threshold_pct as f32,
                    byte: step.byte,
                    step,
                }
            }
            FanCurve::Hysteresis { inner, width, last } => match last {
                None => {
                    let result = inner.speed_for(delta_c);
                    *last = Some((delta_c, result));
                    result
                }
                Some((last_delta, last_result)) => {
                    if (delta_c - *last_delta).abs() >= *width {
                        let result = inner.speed_for(delta_c);
                        *last = Some((delta_c, result));
                        result
                    } else {
                        *last_result
                    }
                }
            },
        }
    }
}

fn validate_points(points: &[(f32, f32)]) -> Result<(), String> {
    if points.is_empty() {
        return Err("curve must have at least one point".to_string());
    }
    for window in points.windows(2) {
        if window[1].0 <= window[0].0 {
            return Err("curve points must be strictly increasing in delta".to_string());
        }
    }
    for &(delta, speed) in points {
        if delta < 0.0 {
            return Err("curve delta must be non-negative".to_string());
        }
        if !(0.0..=100.0).contains(&speed) {
            return Err("curve speed must be within [0, 100]".to_string());
        }
    }
    Ok(())
}

fn validate_bounds(min_speed: f32, max_speed: f32) -> Result<(), String> {
    if min_speed > max_speed {
        return Err("min_speed must not exceed max_speed".to_string());
    }
    Ok(())
}

fn clamp(value: f32, min: f32, max: f32) -> f32 {
    value.max(min).min(max)
}

/// Binary-search `points` by Δt; interpolate linearly between bracketing
/// points; saturate at either endpoint.
fn interpolate(points: &[(f32, f32)], delta_c: f32) -> f32 {
    if delta_c <= points[0].0 {
        return points[0].1;
    }
    let last = points[points.len() - 1];
    if delta_c >= last.0 {
        return last.1;
    }

    let idx = points.partition_point(|&(d, _)| d <= delta_c);
    let (d0, s0) = points[idx - 1];
    let (d1, s1) = points[idx];
    let fraction = (delta_c - d0) / (d1 - d0);
    s0 + fraction * (s1 - s0)
}

/// Return the speed at the greatest threshold `<= delta_c`; floor at the
/// first step below its threshold.
fn step_lookup(steps: &[(f32, f32)], delta_c: f32) -> f32 {
    steps
        .iter()
        .rev()
        .find(|&&(threshold, _)| threshold <= delta_c)
        .map(|&(_, speed)| speed)
        .unwrap_or(steps[0].1)
}

fn stable_step_for_delta(delta_c: f32) -> &'static SpeedStep {
    let name = if delta_c >= 15.0 {
        "full"
    } else if delta_c >= 10.0 {
        "high"
    } else if delta_c >= 5.0 {
        "medium"
    } else {
        "low"
    };
    H12_STEPS
        .iter()
        .find(|s| s.name == name)
        .unwrap_or(&H12_STEPS[0])
}
