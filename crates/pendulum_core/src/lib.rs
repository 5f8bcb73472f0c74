//! The `pendulum_core` crate derives, integrates and analyses the planar double pendulum.
//!
//! The equations of motion are not written by hand: they are derived once from the
//! Lagrangian by a small symbolic engine, compiled to bytecode, and handed to the
//! integrator through a caller-owned `MechanicsModel`.
//!
//! Key components:
//! - **Symbolic**: `Expr` trees with differentiation, substitution and simplification.
//! - **Mechanics**: Lagrangian, Euler-Lagrange equations and their solve for the accelerations.
//! - **Equation Engine**: Bytecode VM evaluating the derived expressions.
//! - **Solvers / Integrator**: Adaptive Tsit5 sampled on a uniform output grid.
//! - **Analysis / Modes**: Cartesian kinematics, energy checks and normal-mode linearization.
pub mod analysis;
pub mod config;
pub mod equation_engine;
pub mod error;
pub mod integrator;
pub mod mechanics;
pub mod modes;
pub mod solvers;
pub mod symbolic;
pub mod traits;

pub use config::{SimulationConfig, SolverSettings};
pub use error::{PendulumError, PendulumResult};
pub use integrator::{simulate, IntegrationWarning, SimulationRun, Simulator, Trajectory};
pub use mechanics::{MechanicsModel, PhysicalParameters, State};
