use crate::traits::{AdaptiveSteppable, DynamicalSystem, ErrorTolerance, Scalar, StepAttempt};

fn lit<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

// Tsitouras 5(4) tableau.
const C2: f64 = 0.161;
const C3: f64 = 0.327;
const C4: f64 = 0.9;
const C5: f64 = 0.9800255409045097;

const A21: f64 = 0.161;

const A31: f64 = -0.008480655492356989;
const A32: f64 = 0.335480655492357;

const A41: f64 = 2.897153057105493;
const A42: f64 = -6.359448489975075;
const A43: f64 = 4.3622954328695815;

const A51: f64 = 5.325864828439257;
const A52: f64 = -11.748883564062828;
const A53: f64 = 7.4955393428898365;
const A54: f64 = -0.09249506636175525;

const A61: f64 = 5.86145544294642;
const A62: f64 = -12.92096931784711;
const A63: f64 = 8.159367898576159;
const A64: f64 = -0.071584973281401;
const A65: f64 = -0.028269050394068383;

// 5th order weights (also the last row of A, which makes the method FSAL).
const B1: f64 = 0.09646076681806523;
const B2: f64 = 0.01;
const B3: f64 = 0.4798896504144996;
const B4: f64 = 1.379008574103742;
const B5: f64 = -3.290069515436081;
const B6: f64 = 2.324710524099774;

// Difference between the 5th and embedded 4th order weights.
const E1: f64 = -0.00178001105222577714;
const E2: f64 = -0.0008164344596567469;
const E3: f64 = 0.007880878010261995;
const E4: f64 = -0.1447110071732629;
const E5: f64 = 0.5823571654525552;
const E6: f64 = -0.45808210592918697;
const E7: f64 = 0.015151515151515152;

/// Order of the embedded error estimator; the controller exponent is 1/(q+1).
const ESTIMATOR_ORDER: f64 = 4.0;

/// Step-size controller limits for [`Tsit5`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepController {
    pub safety: f64,
    pub min_factor: f64,
    pub max_factor: f64,
}

impl Default for StepController {
    fn default() -> Self {
        Self {
            safety: 0.9,
            min_factor: 0.2,
            max_factor: 5.0,
        }
    }
}

/// Tsitouras 5/4 solver with embedded error estimation.
///
/// The seventh stage is evaluated at the accepted point and reused as the
/// first stage of the next step.
pub struct Tsit5<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    k5: Vec<T>,
    k6: Vec<T>,
    k7: Vec<T>,
    tmp: Vec<T>,
    candidate: Vec<T>,
    first_stage_ready: bool,
    controller: StepController,
}

impl<T: Scalar> Tsit5<T> {
    pub fn new(dim: usize) -> Self {
        Self::with_controller(dim, StepController::default())
    }

    pub fn with_controller(dim: usize, controller: StepController) -> Self {
        let z = T::zero();
        Self {
            k1: vec![z; dim],
            k2: vec![z; dim],
            k3: vec![z; dim],
            k4: vec![z; dim],
            k5: vec![z; dim],
            k6: vec![z; dim],
            k7: vec![z; dim],
            tmp: vec![z; dim],
            candidate: vec![z; dim],
            first_stage_ready: false,
            controller,
        }
    }

    fn scaled_error(&self, state: &[T], dt: T, tolerance: ErrorTolerance<T>) -> T {
        let (e1, e2, e3, e4) = (lit::<T>(E1), lit::<T>(E2), lit::<T>(E3), lit::<T>(E4));
        let (e5, e6, e7) = (lit::<T>(E5), lit::<T>(E6), lit::<T>(E7));

        let mut sum = T::zero();
        for i in 0..state.len() {
            let local = dt
                * (e1 * self.k1[i]
                    + e2 * self.k2[i]
                    + e3 * self.k3[i]
                    + e4 * self.k4[i]
                    + e5 * self.k5[i]
                    + e6 * self.k6[i]
                    + e7 * self.k7[i]);
            let scale =
                tolerance.atol + tolerance.rtol * state[i].abs().max(self.candidate[i].abs());
            let ratio = local / scale;
            sum = sum + ratio * ratio;
        }
        let n = T::from_usize(state.len().max(1)).unwrap_or_else(T::one);
        (sum / n).sqrt()
    }
}

impl<T: Scalar> AdaptiveSteppable<T> for Tsit5<T> {
    fn try_step(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: &mut T,
        state: &mut [T],
        dt: T,
        tolerance: ErrorTolerance<T>,
    ) -> StepAttempt<T> {
        let t0 = *t;

        // k1 (carried over from the previous accepted step when possible)
        if !self.first_stage_ready {
            system.apply(t0, state, &mut self.k1);
            self.first_stage_ready = true;
        }

        // k2
        let a21 = lit::<T>(A21);
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * (a21 * self.k1[i]);
        }
        system.apply(t0 + lit::<T>(C2) * dt, &self.tmp, &mut self.k2);

        // k3
        let (a31, a32) = (lit::<T>(A31), lit::<T>(A32));
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * (a31 * self.k1[i] + a32 * self.k2[i]);
        }
        system.apply(t0 + lit::<T>(C3) * dt, &self.tmp, &mut self.k3);

        // k4
        let (a41, a42, a43) = (lit::<T>(A41), lit::<T>(A42), lit::<T>(A43));
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * (a41 * self.k1[i] + a42 * self.k2[i] + a43 * self.k3[i]);
        }
        system.apply(t0 + lit::<T>(C4) * dt, &self.tmp, &mut self.k4);

        // k5
        let (a51, a52, a53, a54) = (lit::<T>(A51), lit::<T>(A52), lit::<T>(A53), lit::<T>(A54));
        for i in 0..state.len() {
            self.tmp[i] = state[i]
                + dt * (a51 * self.k1[i] + a52 * self.k2[i] + a53 * self.k3[i] + a54 * self.k4[i]);
        }
        system.apply(t0 + lit::<T>(C5) * dt, &self.tmp, &mut self.k5);

        // k6
        let (a61, a62, a63) = (lit::<T>(A61), lit::<T>(A62), lit::<T>(A63));
        let (a64, a65) = (lit::<T>(A64), lit::<T>(A65));
        for i in 0..state.len() {
            self.tmp[i] = state[i]
                + dt * (a61 * self.k1[i]
                    + a62 * self.k2[i]
                    + a63 * self.k3[i]
                    + a64 * self.k4[i]
                    + a65 * self.k5[i]);
        }
        system.apply(t0 + dt, &self.tmp, &mut self.k6);

        // 5th order candidate
        let (b1, b2, b3) = (lit::<T>(B1), lit::<T>(B2), lit::<T>(B3));
        let (b4, b5, b6) = (lit::<T>(B4), lit::<T>(B5), lit::<T>(B6));
        for i in 0..state.len() {
            self.candidate[i] = state[i]
                + dt * (b1 * self.k1[i]
                    + b2 * self.k2[i]
                    + b3 * self.k3[i]
                    + b4 * self.k4[i]
                    + b5 * self.k5[i]
                    + b6 * self.k6[i]);
        }

        // k7 = f(t + dt, candidate)
        system.apply(t0 + dt, &self.candidate, &mut self.k7);

        let mut error_norm = self.scaled_error(state, dt, tolerance);
        if !error_norm.is_finite() {
            error_norm = T::infinity();
        }

        let controller = self.controller;
        let min_factor = lit::<T>(controller.min_factor);
        let max_factor = lit::<T>(controller.max_factor);
        let mut factor = if error_norm == T::zero() {
            max_factor
        } else if error_norm.is_infinite() {
            min_factor
        } else {
            let exponent = lit::<T>(-1.0 / (ESTIMATOR_ORDER + 1.0));
            (lit::<T>(controller.safety) * error_norm.powf(exponent))
                .max(min_factor)
                .min(max_factor)
        };

        let attempt = StepAttempt {
            error_norm,
            next_dt: dt,
        };
        if attempt.accepted() {
            state.copy_from_slice(&self.candidate);
            std::mem::swap(&mut self.k1, &mut self.k7);
            *t = t0 + dt;
        } else {
            factor = factor.min(T::one());
        }

        StepAttempt {
            next_dt: dt * factor,
            ..attempt
        }
    }
}

/// Starting step size for an explicit method of the given order
/// (Hairer, Nørsett & Wanner, Solving ODEs I, II.4).
pub fn initial_step<T: Scalar>(
    system: &impl DynamicalSystem<T>,
    t0: T,
    y0: &[T],
    order: usize,
    tolerance: ErrorTolerance<T>,
) -> T {
    let dim = y0.len();
    let n = T::from_usize(dim.max(1)).unwrap_or_else(T::one);
    let scale: Vec<T> = y0
        .iter()
        .map(|y| tolerance.atol + tolerance.rtol * y.abs())
        .collect();
    let rms = |values: &[T]| -> T {
        let mut sum = T::zero();
        for (v, s) in values.iter().zip(&scale) {
            let r = *v / *s;
            sum = sum + r * r;
        }
        (sum / n).sqrt()
    };

    let mut f0 = vec![T::zero(); dim];
    system.apply(t0, y0, &mut f0);
    let d0 = rms(y0);
    let d1 = rms(&f0);

    let threshold = lit::<T>(1e-5);
    let h0 = if d0 < threshold || d1 < threshold {
        lit::<T>(1e-6)
    } else {
        lit::<T>(0.01) * d0 / d1
    };

    let y1: Vec<T> = y0.iter().zip(&f0).map(|(y, f)| *y + h0 * *f).collect();
    let mut f1 = vec![T::zero(); dim];
    system.apply(t0 + h0, &y1, &mut f1);
    let diff: Vec<T> = f1.iter().zip(&f0).map(|(a, b)| *a - *b).collect();
    let d2 = rms(&diff) / h0;

    let dmax = d1.max(d2);
    let h1 = if dmax <= lit::<T>(1e-15) {
        lit::<T>(1e-6).max(h0 * lit::<T>(1e-3))
    } else {
        let exponent = T::one() / T::from_usize(order + 1).unwrap_or_else(T::one);
        (lit::<T>(0.01) / dmax).powf(exponent)
    };

    (lit::<T>(100.0) * h0).min(h1)
}
