use crate::integrator::Trajectory;
use crate::mechanics::{EnergyEvaluator, PhysicalParameters, State};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Column order of [`TrajectoryFrame::to_row`], for tabular export.
pub const FRAME_COLUMNS: [&str; 12] = [
    "t", "theta1", "theta2", "omega1", "omega2", "x1", "y1", "x2", "y2", "T", "V", "E",
];

/// Kinematics and energy of one sample. Positions are relative to the pivot,
/// y pointing up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryFrame {
    pub t: f64,
    pub theta1: f64,
    pub theta2: f64,
    pub omega1: f64,
    pub omega2: f64,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    #[serde(rename = "T")]
    pub kinetic: f64,
    #[serde(rename = "V")]
    pub potential: f64,
    #[serde(rename = "E")]
    pub energy: f64,
}

impl TrajectoryFrame {
    pub fn to_row(&self) -> [f64; 12] {
        [
            self.t,
            self.theta1,
            self.theta2,
            self.omega1,
            self.omega2,
            self.x1,
            self.y1,
            self.x2,
            self.y2,
            self.kinetic,
            self.potential,
            self.energy,
        ]
    }

    pub fn state(&self) -> State {
        State::new(self.theta1, self.theta2, self.omega1, self.omega2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BobVelocities {
    pub vx1: f64,
    pub vy1: f64,
    pub vx2: f64,
    pub vy2: f64,
}

/// Cartesian bob positions `(x1, y1, x2, y2)`.
pub fn bob_positions(params: &PhysicalParameters, state: &State) -> (f64, f64, f64, f64) {
    let x1 = params.l1 * state.theta1.sin();
    let y1 = -params.l1 * state.theta1.cos();
    let x2 = x1 + params.l2 * state.theta2.sin();
    let y2 = y1 - params.l2 * state.theta2.cos();
    (x1, y1, x2, y2)
}

pub fn bob_velocities(params: &PhysicalParameters, state: &State) -> BobVelocities {
    let vx1 = params.l1 * state.theta1.cos() * state.omega1;
    let vy1 = params.l1 * state.theta1.sin() * state.omega1;
    BobVelocities {
        vx1,
        vy1,
        vx2: vx1 + params.l2 * state.theta2.cos() * state.omega2,
        vy2: vy1 + params.l2 * state.theta2.sin() * state.omega2,
    }
}

fn frame(t: f64, state: &State, params: &PhysicalParameters) -> TrajectoryFrame {
    let (x1, y1, x2, y2) = bob_positions(params, state);
    let v = bob_velocities(params, state);
    let kinetic = 0.5 * params.m1 * (v.vx1 * v.vx1 + v.vy1 * v.vy1)
        + 0.5 * params.m2 * (v.vx2 * v.vx2 + v.vy2 * v.vy2);
    let potential = params.m1 * params.g * y1 + params.m2 * params.g * y2;
    TrajectoryFrame {
        t,
        theta1: state.theta1,
        theta2: state.theta2,
        omega1: state.omega1,
        omega2: state.omega2,
        x1,
        y1,
        x2,
        y2,
        kinetic,
        potential,
        energy: kinetic + potential,
    }
}

/// One frame per trajectory sample, in time order. Never fails.
pub fn analyze(trajectory: &Trajectory, params: &PhysicalParameters) -> Vec<TrajectoryFrame> {
    trajectory
        .iter()
        .map(|(t, state)| frame(t, state, params))
        .collect()
}

/// Bob velocities per sample; not part of the frame unless asked for.
pub fn velocity_series(trajectory: &Trajectory, params: &PhysicalParameters) -> Vec<BobVelocities> {
    trajectory
        .states()
        .iter()
        .map(|state| bob_velocities(params, state))
        .collect()
}

/// Below this fraction of the potential-well depth the mean energy is treated
/// as zero and the drift is normalized by the well depth instead.
const NEAR_ZERO_MEAN: f64 = 1e-3;

/// Energy of both bobs hanging at rest, measured from the pivot level.
pub fn potential_well_depth(params: &PhysicalParameters) -> f64 {
    params.g * (params.m1 * params.l1 + params.m2 * (params.l1 + params.l2))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnergyReport {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Denominator of `drift`: `|mean|`, or the well depth when the mean is
    /// numerically zero.
    pub scale: f64,
    /// `(max - min) / scale`.
    pub drift: f64,
}

impl EnergyReport {
    pub fn from_frames(frames: &[TrajectoryFrame], params: &PhysicalParameters) -> Option<Self> {
        if frames.is_empty() {
            return None;
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for frame in frames {
            min = min.min(frame.energy);
            max = max.max(frame.energy);
            sum += frame.energy;
        }
        let mean = sum / frames.len() as f64;
        let depth = potential_well_depth(params);
        let scale = if mean.abs() >= NEAR_ZERO_MEAN * depth {
            mean.abs()
        } else {
            depth
        };
        Some(Self {
            min,
            max,
            mean,
            scale,
            drift: (max - min) / scale,
        })
    }
}

/// Primary self-check of integration quality; `None` for an empty sequence.
pub fn energy_drift(frames: &[TrajectoryFrame], params: &PhysicalParameters) -> Option<f64> {
    EnergyReport::from_frames(frames, params).map(|report| report.drift)
}

/// Per-frame deviation from the mean energy, in percent of the report scale.
pub fn energy_deviation_percent(
    frames: &[TrajectoryFrame],
    params: &PhysicalParameters,
) -> Vec<f64> {
    match EnergyReport::from_frames(frames, params) {
        Some(report) => {
            let sign = if report.mean < 0.0 { -1.0 } else { 1.0 };
            frames
                .iter()
                .map(|frame| (frame.energy - report.mean) / (sign * report.scale) * 100.0)
                .collect()
        }
        None => Vec::new(),
    }
}

/// Agreement between per-frame kinematic energy and the compiled symbolic
/// energy expression.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnergyCrossCheck {
    pub max_abs_difference: f64,
    pub max_relative_difference: f64,
}

pub fn cross_check_energy(
    frames: &[TrajectoryFrame],
    evaluator: &EnergyEvaluator,
    params: &PhysicalParameters,
) -> EnergyCrossCheck {
    let times: Vec<f64> = frames.iter().map(|f| f.t).collect();
    let states: Vec<State> = frames.iter().map(TrajectoryFrame::state).collect();
    let symbolic = evaluator.energy.evaluate_batch(&times, params, &states);

    let mut check = EnergyCrossCheck {
        max_abs_difference: 0.0,
        max_relative_difference: 0.0,
    };
    for (frame, value) in frames.iter().zip(symbolic) {
        let diff = (frame.energy - value).abs();
        let scale = frame.energy.abs().max(value.abs()).max(f64::MIN_POSITIVE);
        check.max_abs_difference = check.max_abs_difference.max(diff);
        check.max_relative_difference = check.max_relative_difference.max(diff / scale);
    }
    check
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DivergenceSummary {
    /// Distance between the second bobs at each shared sample.
    pub distances: Vec<f64>,
    pub max_distance: f64,
    /// First time the distance reached the threshold, if it did.
    pub threshold_time: Option<f64>,
}

/// Euclidean distance between the second bobs of two runs on the same grid.
pub fn second_bob_divergence(
    a: &[TrajectoryFrame],
    b: &[TrajectoryFrame],
    threshold: f64,
) -> Result<DivergenceSummary> {
    if a.is_empty() || b.is_empty() {
        bail!("Both frame sequences must contain at least one sample.");
    }
    if threshold <= 0.0 {
        bail!("Divergence threshold must be positive.");
    }

    let mut distances = Vec::with_capacity(a.len().min(b.len()));
    let mut threshold_time = None;
    for (fa, fb) in a.iter().zip(b) {
        if (fa.t - fb.t).abs() > 1e-9 * fa.t.abs().max(1.0) {
            bail!(
                "Frame sequences are sampled on different grids (t = {} vs {}).",
                fa.t,
                fb.t
            );
        }
        let distance = (fa.x2 - fb.x2).hypot(fa.y2 - fb.y2);
        if threshold_time.is_none() && distance >= threshold {
            threshold_time = Some(fa.t);
        }
        distances.push(distance);
    }

    let max_distance = distances.iter().cloned().fold(0.0, f64::max);
    Ok(DivergenceSummary {
        distances,
        max_distance,
        threshold_time,
    })
}
