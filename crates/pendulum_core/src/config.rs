//! Run configuration.
//!
//! Everything here is plain serde data so callers can load it from whatever
//! format they like; missing fields fall back to the reference run.

use crate::error::{require_positive, PendulumError, PendulumResult};
use crate::mechanics::{PhysicalParameters, State};
use crate::solvers::StepController;
use serde::{Deserialize, Serialize};

/// Settings for the adaptive integrator.
///
/// `dt` of a run only defines the output grid; these tolerances decide how
/// finely the solver subdivides each output interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub rtol: f64,
    pub atol: f64,
    /// Attempted steps allowed between two consecutive output samples.
    pub max_steps_per_sample: usize,
    /// Smallest internal step before the run is declared stuck.
    pub min_step: f64,
    /// Fixed first step; `None` picks one from the initial derivative.
    pub initial_step: Option<f64>,
    pub safety: f64,
    pub min_factor: f64,
    pub max_factor: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        let controller = StepController::default();
        Self {
            rtol: 1e-9,
            atol: 1e-9,
            max_steps_per_sample: 500,
            min_step: 1e-14,
            initial_step: None,
            safety: controller.safety,
            min_factor: controller.min_factor,
            max_factor: controller.max_factor,
        }
    }
}

impl SolverSettings {
    /// Same settings with both tolerances set to `tol`.
    pub fn with_tolerance(self, tol: f64) -> Self {
        Self {
            rtol: tol,
            atol: tol,
            ..self
        }
    }

    pub fn controller(&self) -> StepController {
        StepController {
            safety: self.safety,
            min_factor: self.min_factor,
            max_factor: self.max_factor,
        }
    }

    pub fn validate(&self) -> PendulumResult<()> {
        require_positive("rtol", self.rtol)?;
        require_positive("atol", self.atol)?;
        require_positive("min_step", self.min_step)?;
        require_positive("safety", self.safety)?;
        require_positive("min_factor", self.min_factor)?;
        require_positive("max_factor", self.max_factor)?;
        if let Some(step) = self.initial_step {
            require_positive("initial_step", step)?;
        }
        if self.max_steps_per_sample == 0 {
            return Err(PendulumError::InvalidParameter {
                name: "max_steps_per_sample",
                value: 0.0,
            });
        }
        if self.min_factor > 1.0 || self.max_factor < 1.0 {
            return Err(PendulumError::InvalidParameter {
                name: "min_factor/max_factor",
                value: self.min_factor / self.max_factor,
            });
        }
        Ok(())
    }
}

/// A complete description of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub parameters: PhysicalParameters,
    pub initial_state: State,
    pub t_max: f64,
    pub dt: f64,
    pub solver: SolverSettings,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            parameters: PhysicalParameters::default(),
            initial_state: State::new(
                std::f64::consts::FRAC_PI_2,
                std::f64::consts::FRAC_PI_2,
                0.0,
                0.0,
            ),
            t_max: 20.0,
            dt: 0.05,
            solver: SolverSettings::default(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> PendulumResult<()> {
        self.parameters.validate()?;
        self.initial_state.validate()?;
        require_positive("t_max", self.t_max)?;
        require_positive("dt", self.dt)?;
        self.solver.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::{SimulationConfig, SolverSettings};

    #[test]
    fn defaults_reproduce_reference_run() {
        let config = SimulationConfig::default();
        config.validate().expect("defaults are valid");
        assert_eq!(config.t_max, 20.0);
        assert_eq!(config.dt, 0.05);
        assert_eq!(config.parameters.g, 9.81);
        assert_eq!(config.solver.rtol, 1e-9);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let json = r#"{ "t_max": 5.0, "parameters": { "m1": 2.0, "m2": 1.0, "l1": 1.0, "l2": 0.5, "g": 9.81 }, "solver": { "rtol": 1e-6 } }"#;
        let config: SimulationConfig = serde_json::from_str(json).expect("valid config");
        assert_eq!(config.t_max, 5.0);
        assert_eq!(config.dt, 0.05);
        assert_eq!(config.parameters.l2, 0.5);
        assert_eq!(config.solver.rtol, 1e-6);
        assert_eq!(config.solver.atol, 1e-9);
        assert_eq!(config.solver.max_steps_per_sample, 500);
    }

    #[test]
    fn validate_rejects_bad_grid_and_tolerances() {
        let config = SimulationConfig {
            dt: 0.0,
            ..SimulationConfig::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("dt"));

        let config = SimulationConfig {
            t_max: -1.0,
            ..SimulationConfig::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("t_max"));

        let solver = SolverSettings {
            max_steps_per_sample: 0,
            ..SolverSettings::default()
        };
        assert!(solver.validate().is_err());
        assert!(SolverSettings::default().with_tolerance(-1e-3).validate().is_err());
    }
}
