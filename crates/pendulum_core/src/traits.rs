use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars by the VM and the solvers.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// A first-order ODE system `x' = f(t, x)`.
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// out: buffer to write dx/dt into
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// Tolerances used by an adaptive stepper to scale its local error estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorTolerance<T: Scalar> {
    pub rtol: T,
    pub atol: T,
}

/// Result of one attempted adaptive step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepAttempt<T: Scalar> {
    /// Scaled RMS error norm; the step is acceptable when this is <= 1.
    pub error_norm: T,
    /// Step size the controller proposes for the next attempt.
    pub next_dt: T,
}

impl<T: Scalar> StepAttempt<T> {
    pub fn accepted(&self) -> bool {
        self.error_norm <= T::one()
    }
}

/// A solver that attempts steps with local error control.
pub trait AdaptiveSteppable<T: Scalar> {
    /// Attempts one step of size `dt` from `(t, state)`.
    ///
    /// On acceptance `t` and `state` are advanced; on rejection both are left
    /// untouched. Either way a step size for the next attempt is proposed.
    fn try_step(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: &mut T,
        state: &mut [T],
        dt: T,
        tolerance: ErrorTolerance<T>,
    ) -> StepAttempt<T>;
}
