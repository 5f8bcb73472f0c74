//! Small-oscillation analysis about the hanging equilibrium.
//!
//! Near rest the equations of motion reduce to `theta'' = A theta`, with `A`
//! the Jacobian of the angular accelerations with respect to the angles. The
//! eigenvalues of `-A` are the squared normal-mode frequencies.

use crate::error::{PendulumError, PendulumResult};
use crate::mechanics::{MechanicsModel, PhysicalParameters, State};
use nalgebra::linalg::SVD;
use nalgebra::DMatrix;
use serde::Serialize;
use tracing::debug;

const IMAGINARY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormalMode {
    /// Angular frequency in rad/s.
    pub frequency: f64,
    /// Unit-norm shape `(theta1, theta2)` with a non-negative first entry.
    pub shape: [f64; 2],
}

impl NormalMode {
    pub fn period(&self) -> f64 {
        std::f64::consts::TAU / self.frequency
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalModes {
    /// Slow mode first.
    pub modes: [NormalMode; 2],
    /// `d(alpha_i)/d(theta_j)` at rest.
    pub stiffness: [[f64; 2]; 2],
    #[serde(skip)]
    shape_inverse: [[f64; 2]; 2],
}

impl NormalModes {
    pub fn linearize(model: &MechanicsModel, params: &PhysicalParameters) -> PendulumResult<Self> {
        params.validate()?;
        let rest = State::default();
        let mut stiffness = [[0.0; 2]; 2];
        for (i, row) in model.stiffness.iter().enumerate() {
            for (j, entry) in row.iter().enumerate() {
                stiffness[i][j] = entry.evaluate_at(0.0, params, &rest);
            }
        }

        let restoring = DMatrix::from_row_slice(
            2,
            2,
            &[
                -stiffness[0][0],
                -stiffness[0][1],
                -stiffness[1][0],
                -stiffness[1][1],
            ],
        );
        let eigenvalues = restoring.complex_eigenvalues();

        let mut squared = [0.0; 2];
        for (slot, lambda) in squared.iter_mut().zip(eigenvalues.iter()) {
            if lambda.im.abs() > IMAGINARY_TOLERANCE * lambda.re.abs().max(1.0) {
                return Err(linearization(format!(
                    "restoring matrix has complex eigenvalue {} + {}i",
                    lambda.re, lambda.im
                )));
            }
            if lambda.re <= 0.0 {
                return Err(linearization(format!(
                    "equilibrium is not stable (eigenvalue {})",
                    lambda.re
                )));
            }
            *slot = lambda.re;
        }
        squared.sort_by(f64::total_cmp);

        let modes = [
            NormalMode {
                frequency: squared[0].sqrt(),
                shape: mode_shape(&restoring, squared[0])?,
            },
            NormalMode {
                frequency: squared[1].sqrt(),
                shape: mode_shape(&restoring, squared[1])?,
            },
        ];

        let shapes = DMatrix::from_row_slice(
            2,
            2,
            &[
                modes[0].shape[0],
                modes[1].shape[0],
                modes[0].shape[1],
                modes[1].shape[1],
            ],
        );
        let inverse = shapes
            .try_inverse()
            .ok_or_else(|| linearization("mode shapes are linearly dependent".to_string()))?;

        debug!(
            slow = modes[0].frequency,
            fast = modes[1].frequency,
            "Normal modes about the hanging equilibrium"
        );

        Ok(Self {
            modes,
            stiffness,
            shape_inverse: [
                [inverse[(0, 0)], inverse[(0, 1)]],
                [inverse[(1, 0)], inverse[(1, 1)]],
            ],
        })
    }

    pub fn frequencies(&self) -> [f64; 2] {
        [self.modes[0].frequency, self.modes[1].frequency]
    }

    /// Closed-form solution of the linearized equations at time `t`.
    pub fn small_angle_response(&self, initial: &State, t: f64) -> State {
        let project = |a: f64, b: f64| {
            [
                self.shape_inverse[0][0] * a + self.shape_inverse[0][1] * b,
                self.shape_inverse[1][0] * a + self.shape_inverse[1][1] * b,
            ]
        };
        let amplitude = project(initial.theta1, initial.theta2);
        let rate = project(initial.omega1, initial.omega2);

        let mut theta = [0.0; 2];
        let mut omega = [0.0; 2];
        for (k, mode) in self.modes.iter().enumerate() {
            let w = mode.frequency;
            let (sin, cos) = (w * t).sin_cos();
            let q = amplitude[k] * cos + rate[k] / w * sin;
            let q_dot = -amplitude[k] * w * sin + rate[k] * cos;
            for i in 0..2 {
                theta[i] += mode.shape[i] * q;
                omega[i] += mode.shape[i] * q_dot;
            }
        }
        State::new(theta[0], theta[1], omega[0], omega[1])
    }
}

fn linearization(reason: String) -> PendulumError {
    PendulumError::Linearization { reason }
}

fn mode_shape(restoring: &DMatrix<f64>, squared_frequency: f64) -> PendulumResult<[f64; 2]> {
    let mut shifted = restoring.clone();
    for i in 0..2 {
        shifted[(i, i)] -= squared_frequency;
    }
    let svd = SVD::new(shifted, false, true);
    let null_index = svd.singular_values.imin();
    let v_t = svd
        .v_t
        .ok_or_else(|| linearization("failed to compute mode shape".to_string()))?;
    let row = v_t.row(null_index);
    let mut shape = [row[0], row[1]];
    let norm = shape[0].hypot(shape[1]);
    if norm == 0.0 {
        return Err(linearization("degenerate mode shape".to_string()));
    }
    let sign = if shape[0] < 0.0 { -1.0 } else { 1.0 };
    for entry in &mut shape {
        *entry *= sign / norm;
    }
    Ok(shape)
}

#[cfg(test)]
mod tests {
    use super::NormalModes;
    use crate::mechanics::{MechanicsModel, PhysicalParameters, State};

    fn unit_params() -> PhysicalParameters {
        PhysicalParameters {
            m1: 1.0,
            m2: 1.0,
            l1: 1.0,
            l2: 1.0,
            g: 9.81,
        }
    }

    #[test]
    fn unit_pendulum_frequencies_match_closed_form() {
        let model = MechanicsModel::derive().expect("derivation should succeed");
        let modes = NormalModes::linearize(&model, &unit_params()).expect("stable");
        let g = 9.81;
        let sqrt2 = std::f64::consts::SQRT_2;
        let [slow, fast] = modes.frequencies();
        assert!((slow * slow - g * (2.0 - sqrt2)).abs() < 1e-9);
        assert!((fast * fast - g * (2.0 + sqrt2)).abs() < 1e-9);

        // In-phase slow mode, anti-phase fast mode, both with ratio sqrt(2).
        let s = modes.modes[0].shape;
        let f = modes.modes[1].shape;
        assert!((s[1] / s[0] - sqrt2).abs() < 1e-8);
        assert!((f[1] / f[0] + sqrt2).abs() < 1e-8);
    }

    #[test]
    fn stiffness_of_unit_pendulum() {
        let model = MechanicsModel::derive().expect("derivation should succeed");
        let modes = NormalModes::linearize(&model, &unit_params()).expect("stable");
        let g = 9.81;
        let expected = [[-2.0 * g, g], [2.0 * g, -2.0 * g]];
        for i in 0..2 {
            for j in 0..2 {
                assert!((modes.stiffness[i][j] - expected[i][j]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn response_starts_at_initial_state() {
        let model = MechanicsModel::derive().expect("derivation should succeed");
        let params = PhysicalParameters {
            m1: 2.0,
            m2: 0.7,
            l1: 1.3,
            l2: 0.6,
            g: 9.81,
        };
        let modes = NormalModes::linearize(&model, &params).expect("stable");
        let initial = State::new(0.01, -0.02, 0.03, 0.005);
        let response = modes.small_angle_response(&initial, 0.0);
        for (a, b) in response.to_array().iter().zip(initial.to_array()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn pure_mode_oscillates_at_its_frequency() {
        let model = MechanicsModel::derive().expect("derivation should succeed");
        let modes = NormalModes::linearize(&model, &unit_params()).expect("stable");
        let mode = modes.modes[0];
        let eps = 0.01;
        let initial = State::new(eps * mode.shape[0], eps * mode.shape[1], 0.0, 0.0);
        let half_period = modes.small_angle_response(&initial, 0.5 * mode.period());
        assert!((half_period.theta1 + initial.theta1).abs() < 1e-12);
        assert!((half_period.theta2 + initial.theta2).abs() < 1e-12);
    }

    #[test]
    fn rejects_invalid_parameters() {
        let model = MechanicsModel::derive().expect("derivation should succeed");
        let params = PhysicalParameters {
            g: 0.0,
            ..unit_params()
        };
        assert!(NormalModes::linearize(&model, &params).is_err());
    }
}
