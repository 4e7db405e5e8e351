//! Stiff ODE integration.
//!
//! The driver advances a [`OdeSystem`] over a time span with a variable
//! order backward differentiation formula (BDF) method and samples the
//! solution at requested output times.
//! Jacobians are estimated numerically assuming every component depends
//! only on itself and its immediate neighbours.

mod bdf;
mod jacobian;
mod tridiagonal;

pub use bdf::*;
pub use jacobian::*;
pub use tridiagonal::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Right-hand side of `dy/dt = f(t, y)`.
///
/// Implementations must be pure, the integrator evaluates them an
/// arbitrary number of times and in any order.
pub trait OdeSystem: Sync {
    /// Number of state components.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write `f(t, y)` into `dydt`.
    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorOptions {
    /// Relative tolerance.
    pub rtol: f64,

    /// Absolute tolerance.
    pub atol: f64,

    /// Largest allowed step size, unbounded by default.
    #[serde(skip_serializing_if = "is_unbounded")]
    pub max_step: f64,

    /// Initial step size, selected automatically when `None`.
    pub first_step: Option<f64>,

    /// Accepted step budget, exceeding it is a convergence failure.
    pub max_steps: usize,
}

fn is_unbounded(value: &f64) -> bool {
    value.is_infinite()
}

impl Default for IntegratorOptions {
    fn default() -> Self {
        IntegratorOptions {
            rtol: 1e-3,
            atol: 1e-6,
            max_step: f64::INFINITY,
            first_step: None,
            max_steps: 100_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegrationError {
    #[error("state has {actual} components, system expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid time span [{t0}, {t_end}]")]
    InvalidTimeSpan { t0: f64, t_end: f64 },

    #[error("invalid output times: {0}")]
    InvalidOutputTimes(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("initial state contains non-finite values")]
    NonFiniteInitialState,

    #[error("required step size fell below {min_step:e} at t = {t}")]
    StepSizeTooSmall { t: f64, min_step: f64 },

    #[error("exceeded the budget of {max_steps} steps at t = {t}")]
    StepBudgetExhausted { t: f64, max_steps: usize },
}

impl IntegrationError {
    /// Furthest time reached for failures that happen while stepping.
    pub fn t_reached(&self) -> Option<f64> {
        match self {
            IntegrationError::StepSizeTooSmall { t, .. }
            | IntegrationError::StepBudgetExhausted { t, .. } => Some(*t),
            _ => None,
        }
    }

    pub fn is_convergence_failure(&self) -> bool {
        self.t_reached().is_some()
    }
}

/// Work counters of one integration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrationStats {
    pub steps: usize,
    pub rejected_steps: usize,
    pub rhs_evaluations: usize,
    pub jacobian_evaluations: usize,
    pub lu_decompositions: usize,
}

/// States sampled at the requested output times.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub states: Vec<Vec<f64>>,
    pub stats: IntegrationStats,
}

impl Trajectory {
    /// State at the last output time.
    pub fn last_state(&self) -> Option<&[f64]> {
        self.states.last().map(Vec::as_slice)
    }
}

/// Output times must be non-decreasing, inside the span and include both ends.
pub fn validate_output_times(
    t_span: (f64, f64),
    output_times: &[f64],
) -> Result<(), IntegrationError> {
    let (t0, t_end) = t_span;
    if !t0.is_finite() || !t_end.is_finite() || t_end < t0 {
        return Err(IntegrationError::InvalidTimeSpan { t0, t_end });
    }
    let (Some(&first), Some(&last)) = (output_times.first(), output_times.last()) else {
        return Err(IntegrationError::InvalidOutputTimes(
            "no output times".to_string(),
        ));
    };
    if first != t0 || last != t_end {
        return Err(IntegrationError::InvalidOutputTimes(format!(
            "must start at {t0} and end at {t_end}, got {first} .. {last}"
        )));
    }
    if output_times.windows(2).any(|w| !(w[1] >= w[0])) {
        return Err(IntegrationError::InvalidOutputTimes(
            "must be non-decreasing".to_string(),
        ));
    }
    Ok(())
}

/// Integrate `system` from `y0` over `t_span`, returning the state at each
/// of `output_times`.
pub fn integrate<S: OdeSystem + ?Sized>(
    system: &S,
    y0: &[f64],
    t_span: (f64, f64),
    output_times: &[f64],
    options: &IntegratorOptions,
) -> Result<Trajectory, IntegrationError> {
    profiling::scope!("integrate");
    if y0.len() != system.len() {
        return Err(IntegrationError::DimensionMismatch {
            expected: system.len(),
            actual: y0.len(),
        });
    }
    validate_output_times(t_span, output_times)?;
    if y0.iter().any(|v| !v.is_finite()) {
        return Err(IntegrationError::NonFiniteInitialState);
    }

    let (t0, t_end) = t_span;
    let mut states = Vec::with_capacity(output_times.len());
    let mut next = 0;
    while next < output_times.len() && output_times[next] <= t0 {
        states.push(y0.to_vec());
        next += 1;
    }

    if t_end == t0 {
        return Ok(Trajectory {
            times: output_times.to_vec(),
            states,
            stats: IntegrationStats::default(),
        });
    }

    let mut solver = BdfSolver::new(system, t0, y0, t_end, options)?;
    while solver.t() < t_end {
        if solver.stats().steps >= options.max_steps {
            return Err(IntegrationError::StepBudgetExhausted {
                t: solver.t(),
                max_steps: options.max_steps,
            });
        }
        solver.step()?;
        while next < output_times.len() && output_times[next] <= solver.t() {
            states.push(solver.interpolate(output_times[next]));
            next += 1;
        }
    }

    let stats = *solver.stats();
    debug!(
        steps = stats.steps,
        rejected = stats.rejected_steps,
        rhs = stats.rhs_evaluations,
        jacobians = stats.jacobian_evaluations,
        lu = stats.lu_decompositions,
        "integration finished"
    );
    Ok(Trajectory {
        times: output_times.to_vec(),
        states,
        stats,
    })
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    /// dy/dt = -k y, one uncoupled component per rate.
    struct Decay {
        rates: Vec<f64>,
    }

    impl OdeSystem for Decay {
        fn len(&self) -> usize {
            self.rates.len()
        }

        fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
            for ((d, &v), &k) in dydt.iter_mut().zip(y).zip(&self.rates) {
                *d = -k * v;
            }
        }
    }

    #[test]
    fn exponential_decay() {
        let system = Decay {
            rates: vec![0.5, 2.0],
        };
        let times = [0.0, 0.5, 1.0, 2.0];
        let options = IntegratorOptions {
            rtol: 1e-8,
            atol: 1e-10,
            ..Default::default()
        };
        let traj = integrate(&system, &[1.0, 3.0], (0.0, 2.0), &times, &options).unwrap();
        assert_eq!(traj.states.len(), times.len());
        for (t, state) in times.iter().zip(&traj.states) {
            assert_approx_eq!(f64, state[0], (-0.5 * t).exp(), epsilon = 1e-5);
            assert_approx_eq!(f64, state[1], 3.0 * (-2.0 * t).exp(), epsilon = 1e-5);
        }
        assert!(traj.stats.steps > 0);
    }

    #[test]
    fn stiff_decay_takes_few_steps() {
        // Explicit methods would need ~1e6 steps for stability here.
        let system = Decay {
            rates: vec![1e6, 1.0],
        };
        let options = IntegratorOptions::default();
        let traj = integrate(&system, &[1.0, 1.0], (0.0, 10.0), &[0.0, 10.0], &options).unwrap();
        let last = traj.last_state().unwrap();
        assert!(last[0].abs() < 1e-3);
        assert_approx_eq!(f64, last[1], (-10.0f64).exp(), epsilon = 1e-3);
        assert!(traj.stats.steps < 2000, "{} steps", traj.stats.steps);
    }

    #[test]
    fn step_budget() {
        let system = Decay { rates: vec![1.0] };
        let options = IntegratorOptions {
            max_steps: 3,
            rtol: 1e-10,
            atol: 1e-12,
            ..Default::default()
        };
        let err = integrate(&system, &[1.0], (0.0, 100.0), &[0.0, 100.0], &options).unwrap_err();
        assert!(err.is_convergence_failure());
        match err {
            IntegrationError::StepBudgetExhausted { t, max_steps } => {
                assert_eq!(max_steps, 3);
                assert!(t > 0.0 && t < 100.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn request_validation() {
        let system = Decay { rates: vec![1.0] };
        let options = IntegratorOptions::default();
        assert!(matches!(
            integrate(&system, &[1.0, 2.0], (0.0, 1.0), &[0.0, 1.0], &options),
            Err(IntegrationError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            integrate(&system, &[1.0], (0.0, 1.0), &[0.5, 1.0], &options),
            Err(IntegrationError::InvalidOutputTimes(_))
        ));
        assert!(matches!(
            integrate(&system, &[1.0], (0.0, 1.0), &[0.0, 0.7, 0.2, 1.0], &options),
            Err(IntegrationError::InvalidOutputTimes(_))
        ));
        assert!(matches!(
            integrate(&system, &[1.0], (1.0, 0.0), &[1.0, 0.0], &options),
            Err(IntegrationError::InvalidTimeSpan { .. })
        ));
        assert!(matches!(
            integrate(&system, &[f64::NAN], (0.0, 1.0), &[0.0, 1.0], &options),
            Err(IntegrationError::NonFiniteInitialState)
        ));
    }

    #[test]
    fn empty_span() {
        let system = Decay { rates: vec![1.0] };
        let traj = integrate(
            &system,
            &[4.0],
            (0.0, 0.0),
            &[0.0, 0.0],
            &IntegratorOptions::default(),
        )
        .unwrap();
        assert_eq!(traj.states, vec![vec![4.0], vec![4.0]]);
    }
}
