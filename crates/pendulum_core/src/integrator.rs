//! Trajectory integration on a uniform output grid.

use crate::config::{SimulationConfig, SolverSettings};
use crate::equation_engine::ARITY;
use crate::error::{require_positive, PendulumResult};
use crate::mechanics::{AccelerationEvaluators, MechanicsModel, PhysicalParameters, State};
use crate::solvers::{initial_step, Tsit5};
use crate::traits::{AdaptiveSteppable, DynamicalSystem, ErrorTolerance};
use serde::Serialize;
use std::cell::RefCell;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Order of the propagated Tsit5 solution, used to pick the first step.
const METHOD_ORDER: usize = 5;

const MAX_PREALLOCATED_SAMPLES: usize = 1 << 16;

/// The first-order system `(theta', omega') = (omega, alpha(theta, omega))`.
pub struct PendulumSystem<'a> {
    evaluators: &'a AccelerationEvaluators,
    params: PhysicalParameters,
    // Scratch space for the VM; keeps `apply` allocation free. Makes the
    // system !Sync, so each run builds its own.
    stack: RefCell<Vec<f64>>,
}

impl<'a> PendulumSystem<'a> {
    pub fn new(evaluators: &'a AccelerationEvaluators, params: PhysicalParameters) -> Self {
        Self {
            evaluators,
            params,
            stack: RefCell::new(Vec::with_capacity(64)),
        }
    }
}

impl DynamicalSystem<f64> for PendulumSystem<'_> {
    fn dimension(&self) -> usize {
        State::DIMENSION
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        let p = &self.params;
        let args: [f64; ARITY] = [t, p.m1, p.m2, p.l1, p.l2, p.g, x[0], x[1], x[2], x[3]];
        let mut stack = self.stack.borrow_mut();
        out[0] = x[2];
        out[1] = x[3];
        out[2] = self.evaluators.accel1.evaluate_with(&args, &mut stack);
        out[3] = self.evaluators.accel2.evaluate_with(&args, &mut stack);
    }
}

/// Number of grid points `i*dt` strictly below `t_max`.
pub fn sample_count(t_max: f64, dt: f64) -> usize {
    if !(t_max > 0.0 && dt > 0.0) {
        return 0;
    }
    let mut count = (t_max / dt).ceil() as usize;
    while count > 0 && (count - 1) as f64 * dt >= t_max {
        count -= 1;
    }
    while (count as f64) * dt < t_max {
        count += 1;
    }
    count
}

/// Uniformly sampled states over `[0, t_max)`. Read-only once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    times: Vec<f64>,
    states: Vec<State>,
    dt: f64,
    t_max: f64,
}

impl Trajectory {
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn t_max(&self) -> f64 {
        self.t_max
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Samples a complete run would contain.
    pub fn expected_len(&self) -> usize {
        sample_count(self.t_max, self.dt)
    }

    pub fn is_truncated(&self) -> bool {
        self.len() < self.expected_len()
    }

    pub fn last(&self) -> Option<(f64, &State)> {
        self.times.last().copied().zip(self.states.last())
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &State)> + '_ {
        self.times.iter().copied().zip(self.states.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum IntegrationFailure {
    /// The controller asked for a step below `min_step`.
    StepSizeUnderflow { step: f64 },
    /// `max_steps_per_sample` attempts did not reach the next sample.
    TooMuchWork { attempts: usize },
    NonFiniteState,
}

impl std::fmt::Display for IntegrationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrationFailure::StepSizeUnderflow { step } => {
                write!(f, "step size {step:e} fell below the minimum")
            }
            IntegrationFailure::TooMuchWork { attempts } => {
                write!(f, "{attempts} attempted steps did not reach the next sample")
            }
            IntegrationFailure::NonFiniteState => f.write_str("state became non-finite"),
        }
    }
}

/// Recoverable solver diagnostic attached to a truncated run.
#[derive(Error, Debug, Clone, Copy, PartialEq, Serialize)]
#[error("Integration stopped at t = {time}: {failure} ({samples_completed}/{samples_requested} samples)")]
pub struct IntegrationWarning {
    pub failure: IntegrationFailure,
    pub time: f64,
    pub samples_completed: usize,
    pub samples_requested: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SolverStats {
    pub accepted_steps: usize,
    pub rejected_steps: usize,
}

/// A trajectory plus whatever the solver had to say about producing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationRun {
    pub trajectory: Trajectory,
    pub warning: Option<IntegrationWarning>,
    pub stats: SolverStats,
}

impl SimulationRun {
    pub fn is_complete(&self) -> bool {
        self.warning.is_none()
    }
}

/// Integrates the pendulum for one parameter set.
///
/// Borrows a [`MechanicsModel`] so one derivation serves any number of
/// simulators; the simulator itself is `Sync`.
#[derive(Debug, Clone, Copy)]
pub struct Simulator<'a> {
    model: &'a MechanicsModel,
    params: PhysicalParameters,
    settings: SolverSettings,
}

impl<'a> Simulator<'a> {
    pub fn new(model: &'a MechanicsModel, params: PhysicalParameters) -> PendulumResult<Self> {
        params.validate()?;
        Ok(Self {
            model,
            params,
            settings: SolverSettings::default(),
        })
    }

    pub fn with_settings(self, settings: SolverSettings) -> PendulumResult<Self> {
        settings.validate()?;
        Ok(Self { settings, ..self })
    }

    pub fn params(&self) -> &PhysicalParameters {
        &self.params
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    pub fn model(&self) -> &'a MechanicsModel {
        self.model
    }

    /// Produces samples at `t_i = i*dt` for every `t_i < t_max`.
    ///
    /// Invalid input is an `Err`. Solver trouble is not: the samples already
    /// computed are returned together with an [`IntegrationWarning`].
    pub fn run(&self, initial: State, t_max: f64, dt: f64) -> PendulumResult<SimulationRun> {
        require_positive("t_max", t_max)?;
        require_positive("dt", dt)?;
        initial.validate()?;

        let requested = sample_count(t_max, dt);
        info!(t_max, dt, samples = requested, "Starting simulation");

        let system = PendulumSystem::new(&self.model.accelerations, self.params);
        let mut solver =
            Tsit5::<f64>::with_controller(State::DIMENSION, self.settings.controller());
        let tolerance = ErrorTolerance {
            rtol: self.settings.rtol,
            atol: self.settings.atol,
        };

        // a long valid grid must not allocate everything before integrating
        let reserve = requested.min(MAX_PREALLOCATED_SAMPLES);
        let mut times = Vec::with_capacity(reserve);
        let mut states = Vec::with_capacity(reserve);
        times.push(0.0);
        states.push(initial);

        let mut y = initial.to_array();
        let mut t = 0.0;
        let mut h = self
            .settings
            .initial_step
            .unwrap_or_else(|| initial_step(&system, t, &y, METHOD_ORDER, tolerance));
        let mut stats = SolverStats::default();
        let mut failure = None;

        'samples: for i in 1..requested {
            let target = i as f64 * dt;
            let mut attempts = 0usize;

            while t < target {
                if attempts >= self.settings.max_steps_per_sample {
                    failure = Some(IntegrationFailure::TooMuchWork { attempts });
                    break 'samples;
                }
                let remaining = target - t;
                let hits_target = h >= remaining;
                if !hits_target && h < self.settings.min_step {
                    failure = Some(IntegrationFailure::StepSizeUnderflow { step: h });
                    break 'samples;
                }
                let step = if hits_target { remaining } else { h };

                attempts += 1;
                let attempt = solver.try_step(&system, &mut t, &mut y, step, tolerance);
                if attempt.accepted() {
                    stats.accepted_steps += 1;
                    if y.iter().any(|v| !v.is_finite()) {
                        failure = Some(IntegrationFailure::NonFiniteState);
                        break 'samples;
                    }
                    if hits_target {
                        t = target;
                        // a shortened final step says little about the
                        // step size the dynamics allow
                        h = h.max(attempt.next_dt);
                    } else {
                        h = attempt.next_dt;
                    }
                } else {
                    stats.rejected_steps += 1;
                    h = attempt.next_dt;
                }
            }

            times.push(target);
            states.push(State::from_array(y));
        }

        let warning = failure.map(|failure| IntegrationWarning {
            failure,
            time: t,
            samples_completed: states.len(),
            samples_requested: requested,
        });
        match &warning {
            Some(w) => warn!(
                time = w.time,
                completed = w.samples_completed,
                requested = w.samples_requested,
                failure = %w.failure,
                "Integration stopped early; trajectory truncated"
            ),
            None => debug!(
                accepted = stats.accepted_steps,
                rejected = stats.rejected_steps,
                "Simulation complete"
            ),
        }

        Ok(SimulationRun {
            trajectory: Trajectory {
                times,
                states,
                dt,
                t_max,
            },
            warning,
            stats,
        })
    }

    /// Runs two initial states concurrently, e.g. a base case and a slightly
    /// perturbed one for sensitivity studies.
    pub fn run_pair(
        &self,
        first: State,
        second: State,
        t_max: f64,
        dt: f64,
    ) -> PendulumResult<(SimulationRun, SimulationRun)> {
        let (a, b) = rayon::join(
            || self.run(first, t_max, dt),
            || self.run(second, t_max, dt),
        );
        Ok((a?, b?))
    }
}

/// Validates `config` and performs the run it describes.
pub fn simulate(model: &MechanicsModel, config: &SimulationConfig) -> PendulumResult<SimulationRun> {
    config.validate()?;
    Simulator::new(model, config.parameters)?
        .with_settings(config.solver)?
        .run(config.initial_state, config.t_max, config.dt)
}
