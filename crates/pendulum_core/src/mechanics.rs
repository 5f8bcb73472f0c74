//! Lagrangian derivation of the two-link planar pendulum.
//!
//! Bob positions are written in terms of the joint angles, differentiated
//! along the trajectory, assembled into `L = T - V`, and pushed through the
//! Euler–Lagrange operator. The two resulting equations are linear in the
//! angular accelerations and are solved by Cramer's rule, leaving closed
//! forms in `{m1, m2, l1, l2, g, theta1, theta2, omega1, omega2}`.

use crate::equation_engine::{CompiledExpression, Compiler};
use crate::error::{DerivationStage, PendulumError, PendulumResult};
use crate::symbolic::{Expr, Symbol};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Masses, lengths and gravitational acceleration for one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalParameters {
    pub m1: f64,
    pub m2: f64,
    pub l1: f64,
    pub l2: f64,
    pub g: f64,
}

impl Default for PhysicalParameters {
    fn default() -> Self {
        Self {
            m1: 1.0,
            m2: 1.0,
            l1: 1.0,
            l2: 1.0,
            g: 9.81,
        }
    }
}

impl PhysicalParameters {
    pub fn validate(&self) -> PendulumResult<()> {
        crate::error::require_positive("m1", self.m1)?;
        crate::error::require_positive("m2", self.m2)?;
        crate::error::require_positive("l1", self.l1)?;
        crate::error::require_positive("l2", self.l2)?;
        crate::error::require_positive("g", self.g)
    }

    pub fn total_length(&self) -> f64 {
        self.l1 + self.l2
    }
}

/// Joint angles (radians, never wrapped) and angular velocities (rad/s).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct State {
    pub theta1: f64,
    pub theta2: f64,
    pub omega1: f64,
    pub omega2: f64,
}

impl State {
    pub const DIMENSION: usize = 4;

    pub fn new(theta1: f64, theta2: f64, omega1: f64, omega2: f64) -> Self {
        Self {
            theta1,
            theta2,
            omega1,
            omega2,
        }
    }

    pub fn to_array(self) -> [f64; 4] {
        [self.theta1, self.theta2, self.omega1, self.omega2]
    }

    pub fn from_array(values: [f64; 4]) -> Self {
        Self::new(values[0], values[1], values[2], values[3])
    }

    pub fn validate(&self) -> PendulumResult<()> {
        let named = [
            ("theta1", self.theta1),
            ("theta2", self.theta2),
            ("omega1", self.omega1),
            ("omega2", self.omega2),
        ];
        for (name, value) in named {
            if !value.is_finite() {
                return Err(PendulumError::InvalidState { name, value });
            }
        }
        Ok(())
    }
}

/// Output of the derivation. Only the compiler looks inside.
#[derive(Debug, Clone)]
pub struct SymbolicModel {
    pub(crate) lagrangian: Expr,
    pub(crate) energy: Expr,
    pub(crate) accelerations: [Expr; 2],
    /// `d(alpha_i)/d(theta_j)`, used for the small-oscillation linearization.
    pub(crate) stiffness: [[Expr; 2]; 2],
}

impl SymbolicModel {
    pub fn lagrangian(&self) -> &Expr {
        &self.lagrangian
    }

    pub fn accelerations(&self) -> &[Expr; 2] {
        &self.accelerations
    }
}

fn sym(symbol: Symbol) -> Expr {
    Expr::symbol(symbol)
}

/// Kinetic and potential energy of the linkage, in state symbols.
fn energies() -> (Expr, Expr) {
    let (l1, l2) = (sym(Symbol::L1), sym(Symbol::L2));
    let (theta1, theta2) = (sym(Symbol::Theta1), sym(Symbol::Theta2));

    let x1 = l1.clone() * theta1.clone().sin();
    let y1 = -(l1 * theta1.cos());
    let x2 = x1.clone() + l2.clone() * theta2.clone().sin();
    let y2 = y1.clone() - l2 * theta2.cos();

    let v1_sq = x1.time_derivative().powi(2) + y1.time_derivative().powi(2);
    let v2_sq = x2.time_derivative().powi(2) + y2.time_derivative().powi(2);

    let half = Expr::number(0.5);
    let kinetic = half.clone() * sym(Symbol::M1) * v1_sq + half * sym(Symbol::M2) * v2_sq;
    let potential = sym(Symbol::M1) * sym(Symbol::G) * y1 + sym(Symbol::M2) * sym(Symbol::G) * y2;
    (kinetic, potential)
}

/// `d/dt(dL/d(omega)) - dL/d(theta)` for one generalized coordinate.
fn euler_lagrange(lagrangian: &Expr, coordinate: Symbol) -> PendulumResult<Expr> {
    let velocity = coordinate.rate().ok_or_else(|| {
        PendulumError::derivation(
            DerivationStage::EulerLagrange,
            format!("{} is not a generalized coordinate", coordinate.name()),
        )
    })?;
    let momentum = lagrangian.diff(velocity);
    Ok(momentum.time_derivative() - lagrangian.diff(coordinate))
}

/// Splits `equation` into `a1*alpha1 + a2*alpha2 + rest`.
fn linear_coefficients(equation: &Expr) -> PendulumResult<([Expr; 2], Expr)> {
    let mut coefficients = [Expr::zero(), Expr::zero()];
    for (slot, alpha) in coefficients
        .iter_mut()
        .zip([Symbol::Alpha1, Symbol::Alpha2])
    {
        let coefficient = equation.diff(alpha);
        if coefficient.contains(Symbol::Alpha1) || coefficient.contains(Symbol::Alpha2) {
            return Err(PendulumError::derivation(
                DerivationStage::EulerLagrange,
                format!("equation is not linear in {}", alpha.name()),
            ));
        }
        *slot = coefficient;
    }
    let rest = equation
        .substitute(Symbol::Alpha1, &Expr::zero())
        .substitute(Symbol::Alpha2, &Expr::zero());
    Ok((coefficients, rest))
}

/// Derives the closed-form angular accelerations and the total energy.
///
/// Deterministic and pure. Expensive relative to a single evaluation, so it
/// is meant to run once and be compiled into a [`MechanicsModel`].
pub fn derive() -> PendulumResult<SymbolicModel> {
    info!("Deriving double pendulum equations of motion");

    let (kinetic, potential) = energies();
    let lagrangian = kinetic.clone() - potential.clone();
    if lagrangian.is_zero() {
        return Err(PendulumError::derivation(
            DerivationStage::Lagrangian,
            "lagrangian vanished identically",
        ));
    }
    let energy = kinetic + potential;

    let eq1 = euler_lagrange(&lagrangian, Symbol::Theta1)?;
    let eq2 = euler_lagrange(&lagrangian, Symbol::Theta2)?;
    let ([a11, a12], b1) = linear_coefficients(&eq1)?;
    let ([a21, a22], b2) = linear_coefficients(&eq2)?;

    // a * alpha = -b
    let determinant = a11.clone() * a22.clone() - a12.clone() * a21.clone();
    if determinant.is_zero() {
        return Err(PendulumError::derivation(
            DerivationStage::LinearSolve,
            "mass matrix determinant is identically zero",
        ));
    }
    let alpha1 = (a12 * b2.clone() - a22 * b1.clone()) / determinant.clone();
    let alpha2 = (a21 * b1 - a11 * b2) / determinant;

    for (index, expr) in [&alpha1, &alpha2].into_iter().enumerate() {
        if expr.contains(Symbol::Alpha1) || expr.contains(Symbol::Alpha2) {
            return Err(PendulumError::derivation(
                DerivationStage::LinearSolve,
                format!("acceleration {} still depends on an acceleration", index + 1),
            ));
        }
    }

    let stiffness = [
        [alpha1.diff(Symbol::Theta1), alpha1.diff(Symbol::Theta2)],
        [alpha2.diff(Symbol::Theta1), alpha2.diff(Symbol::Theta2)],
    ];

    debug!(
        lagrangian_nodes = lagrangian.node_count(),
        alpha1_nodes = alpha1.node_count(),
        alpha2_nodes = alpha2.node_count(),
        "Derivation complete"
    );
    debug!(alpha1 = %alpha1, "Angular acceleration of the inner link");

    Ok(SymbolicModel {
        lagrangian,
        energy,
        accelerations: [alpha1, alpha2],
        stiffness,
    })
}

/// Compiled acceleration pair. Stateless; share by reference across threads.
#[derive(Debug, Clone)]
pub struct AccelerationEvaluators {
    pub accel1: CompiledExpression,
    pub accel2: CompiledExpression,
}

#[derive(Debug, Clone)]
pub struct EnergyEvaluator {
    pub energy: CompiledExpression,
}

/// Caller-owned handle produced once per process and passed to every
/// simulator. Holds nothing mutable.
#[derive(Debug, Clone)]
pub struct MechanicsModel {
    pub accelerations: AccelerationEvaluators,
    pub energy: EnergyEvaluator,
    pub(crate) stiffness: [[CompiledExpression; 2]; 2],
}

impl MechanicsModel {
    /// Runs the derivation and compiles the result.
    pub fn derive() -> PendulumResult<Self> {
        let symbolic = derive()?;
        Self::compile(&symbolic)
    }

    /// Compiles every expression of `model`. The same input always yields
    /// the same bytecode.
    pub fn compile(model: &SymbolicModel) -> PendulumResult<Self> {
        let compiler = Compiler::new();
        let [alpha1, alpha2] = &model.accelerations;
        let stiffness = [
            [
                compiler.compile(&model.stiffness[0][0])?,
                compiler.compile(&model.stiffness[0][1])?,
            ],
            [
                compiler.compile(&model.stiffness[1][0])?,
                compiler.compile(&model.stiffness[1][1])?,
            ],
        ];
        Ok(Self {
            accelerations: AccelerationEvaluators {
                accel1: compiler.compile(alpha1)?,
                accel2: compiler.compile(alpha2)?,
            },
            energy: EnergyEvaluator {
                energy: compiler.compile(&model.energy)?,
            },
            stiffness,
        })
    }

    pub fn angular_accelerations(&self, params: &PhysicalParameters, state: &State) -> [f64; 2] {
        let args = crate::equation_engine::arguments(0.0, params, state);
        [
            self.accelerations.accel1.evaluate(&args),
            self.accelerations.accel2.evaluate(&args),
        ]
    }

    pub fn total_energy(&self, params: &PhysicalParameters, state: &State) -> f64 {
        let args = crate::equation_engine::arguments(0.0, params, state);
        self.energy.energy.evaluate(&args)
    }
}

#[cfg(test)]
mod tests {
    use super::{derive, MechanicsModel, PhysicalParameters, State};
    use crate::symbolic::Symbol;

    /// Textbook closed form for point masses on massless rods.
    fn reference_accelerations(p: &PhysicalParameters, s: &State) -> [f64; 2] {
        let delta = s.theta1 - s.theta2;
        let den = 2.0 * p.m1 + p.m2 - p.m2 * (2.0 * delta).cos();
        let a1 = (-p.g * (2.0 * p.m1 + p.m2) * s.theta1.sin()
            - p.m2 * p.g * (s.theta1 - 2.0 * s.theta2).sin()
            - 2.0
                * delta.sin()
                * p.m2
                * (s.omega2 * s.omega2 * p.l2 + s.omega1 * s.omega1 * p.l1 * delta.cos()))
            / (p.l1 * den);
        let a2 = (2.0
            * delta.sin()
            * (s.omega1 * s.omega1 * p.l1 * (p.m1 + p.m2)
                + p.g * (p.m1 + p.m2) * s.theta1.cos()
                + s.omega2 * s.omega2 * p.l2 * p.m2 * delta.cos()))
            / (p.l2 * den);
        [a1, a2]
    }

    #[test]
    fn derived_expressions_depend_only_on_state_and_parameters() {
        let model = derive().expect("derivation should succeed");
        for expr in model.accelerations() {
            assert!(!expr.contains(Symbol::Alpha1));
            assert!(!expr.contains(Symbol::Alpha2));
            assert!(!expr.contains(Symbol::Time));
            assert!(expr.contains(Symbol::Theta1));
            assert!(expr.contains(Symbol::G));
        }
        assert!(model.lagrangian().contains(Symbol::Omega2));
    }

    #[test]
    fn accelerations_match_textbook_closed_form() {
        let model = MechanicsModel::derive().expect("derivation should succeed");
        let params = PhysicalParameters {
            m1: 1.3,
            m2: 0.7,
            l1: 0.9,
            l2: 1.4,
            g: 9.81,
        };
        let states = [
            State::new(0.3, -0.8, 1.1, -2.0),
            State::new(std::f64::consts::FRAC_PI_2, std::f64::consts::FRAC_PI_2, 0.0, 0.0),
            State::new(7.5, -13.0, 4.0, 9.0),
        ];
        for state in &states {
            let derived = model.angular_accelerations(&params, state);
            let expected = reference_accelerations(&params, state);
            for i in 0..2 {
                assert!(
                    (derived[i] - expected[i]).abs() < 1e-10 * (1.0 + expected[i].abs()),
                    "alpha{} mismatch at {:?}: {} vs {}",
                    i + 1,
                    state,
                    derived[i],
                    expected[i]
                );
            }
        }
    }

    #[test]
    fn downward_rest_is_an_equilibrium() {
        let model = MechanicsModel::derive().expect("derivation should succeed");
        let accel = model.angular_accelerations(&PhysicalParameters::default(), &State::default());
        assert_eq!(accel[0], 0.0);
        assert_eq!(accel[1], 0.0);
    }

    #[test]
    fn energy_at_rest_is_pure_potential() {
        let model = MechanicsModel::derive().expect("derivation should succeed");
        let params = PhysicalParameters::default();
        let energy = model.total_energy(&params, &State::default());
        let expected = -params.m1 * params.g * params.l1
            - params.m2 * params.g * (params.l1 + params.l2);
        assert!((energy - expected).abs() < 1e-12);
    }

    #[test]
    fn parameter_validation_rejects_non_positive_values() {
        let params = PhysicalParameters {
            l2: 0.0,
            ..PhysicalParameters::default()
        };
        let err = params.validate().expect_err("zero length must be rejected");
        assert!(err.to_string().contains("l2"));

        let params = PhysicalParameters {
            g: f64::NAN,
            ..PhysicalParameters::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn compilation_is_deterministic() {
        let symbolic = derive().expect("derivation should succeed");
        let first = MechanicsModel::compile(&symbolic).expect("compiles");
        let second = MechanicsModel::compile(&symbolic).expect("compiles");
        assert_eq!(
            first.accelerations.accel1.bytecode(),
            second.accelerations.accel1.bytecode()
        );
        assert_eq!(
            first.accelerations.accel2.bytecode(),
            second.accelerations.accel2.bytecode()
        );
        assert_eq!(first.energy.energy.bytecode(), second.energy.energy.bytecode());
        assert!(!first.accelerations.accel1.bytecode().ops.is_empty());
    }

    #[test]
    fn state_round_trips_through_array() {
        let state = State::new(0.1, -0.2, 0.3, -0.4);
        assert_eq!(state.to_array(), [0.1, -0.2, 0.3, -0.4]);
        assert_eq!(State::from_array(state.to_array()), state);
    }

    #[test]
    fn state_validation_rejects_non_finite_values() {
        let state = State::new(0.0, f64::INFINITY, 0.0, 0.0);
        let err = state.validate().expect_err("infinite angle must be rejected");
        assert!(err.to_string().contains("theta2"));
    }
}
