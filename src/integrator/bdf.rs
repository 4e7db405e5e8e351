//! Variable order BDF stepper.
//!
//! The solution history is kept as backward differences `D[0..=order+2]`
//! of the interpolating polynomial on an equally spaced grid of width
//! `h_abs`. Changing the step size rescales the differences instead of
//! restarting. Orders 1 to 5 use the NDF `kappa` corrections.

use super::*;
use nalgebra::{DMatrix, DVector};
use tracing::{debug, trace, warn};

pub const MAX_ORDER: usize = 5;
const NEWTON_MAXITER: usize = 4;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 10.0;
const KAPPA: [f64; MAX_ORDER + 1] = [0.0, -0.1850, -1.0 / 9.0, -0.0823, -0.0415, 0.0];

/// Root mean square of `x / scale`.
fn scaled_rms(x: &DVector<f64>, scale: &DVector<f64>) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    let sum: f64 = x.iter().zip(scale.iter()).map(|(v, s)| (v / s) * (v / s)).sum();
    (sum / x.len() as f64).sqrt()
}

/// Gap between |t| and the next representable value above it.
fn ulp(t: f64) -> f64 {
    let a = t.abs();
    f64::from_bits(a.to_bits() + 1) - a
}

/// Matrix relating differences on grids of spacing `h` and `factor * h`.
fn compute_r(order: usize, factor: f64) -> DMatrix<f64> {
    let mut m = DMatrix::zeros(order + 1, order + 1);
    for j in 0..=order {
        m[(0, j)] = 1.0;
    }
    for i in 1..=order {
        for j in 1..=order {
            m[(i, j)] = (i as f64 - 1.0 - factor * j as f64) / i as f64;
        }
    }
    for i in 1..=order {
        for j in 0..=order {
            m[(i, j)] *= m[(i - 1, j)];
        }
    }
    m
}

/// Rescale the first `order + 1` differences for a step size change.
fn change_differences(d: &mut DMatrix<f64>, order: usize, factor: f64) {
    let ru = compute_r(order, factor) * compute_r(order, 1.0);
    let updated = d.columns(0, order + 1) * ru;
    d.columns_mut(0, order + 1).copy_from(&updated);
}

struct NewtonOutcome {
    converged: bool,
    iterations: usize,
    y: DVector<f64>,
    d: DVector<f64>,
}

pub struct BdfSolver<'a, S: OdeSystem + ?Sized> {
    system: &'a S,
    t: f64,
    t_bound: f64,
    y: DVector<f64>,
    rtol: f64,
    atol: f64,
    max_step: f64,
    h_abs: f64,
    order: usize,
    n_equal_steps: usize,
    newton_tol: f64,
    gamma: [f64; MAX_ORDER + 1],
    alpha: [f64; MAX_ORDER + 1],
    error_const: [f64; MAX_ORDER + 1],
    d: DMatrix<f64>,
    jac: Tridiagonal,
    lu: Option<TridiagonalLu>,
    stats: IntegrationStats,
}

impl<'a, S: OdeSystem + ?Sized> BdfSolver<'a, S> {
    pub fn new(
        system: &'a S,
        t0: f64,
        y0: &[f64],
        t_bound: f64,
        options: &IntegratorOptions,
    ) -> Result<Self, IntegrationError> {
        let n = system.len();
        if y0.len() != n {
            return Err(IntegrationError::DimensionMismatch {
                expected: n,
                actual: y0.len(),
            });
        }
        if !(t_bound > t0) {
            return Err(IntegrationError::InvalidTimeSpan { t0, t_end: t_bound });
        }
        if !(options.atol >= 0.0) {
            return Err(IntegrationError::InvalidOptions(format!(
                "atol must be non-negative, got {}",
                options.atol
            )));
        }
        if !(options.max_step > 0.0) {
            return Err(IntegrationError::InvalidOptions(format!(
                "max_step must be positive, got {}",
                options.max_step
            )));
        }
        let min_rtol = 100.0 * f64::EPSILON;
        let rtol = if options.rtol < min_rtol {
            warn!(rtol = options.rtol, "rtol too small, using {min_rtol:e}");
            min_rtol
        } else {
            options.rtol
        };

        let mut stats = IntegrationStats::default();
        let y = DVector::from_column_slice(y0);
        let mut f = DVector::zeros(n);
        system.rhs(t0, y.as_slice(), f.as_mut_slice());
        stats.rhs_evaluations += 1;

        let h_abs = match options.first_step {
            Some(h) if h > 0.0 && h <= t_bound - t0 => h,
            Some(h) => {
                return Err(IntegrationError::InvalidOptions(format!(
                    "first_step {h} outside (0, {}]",
                    t_bound - t0
                )))
            }
            None => {
                let (h, evaluations) = select_initial_step(
                    system,
                    t0,
                    &y,
                    &f,
                    t_bound,
                    options.max_step,
                    rtol,
                    options.atol,
                );
                stats.rhs_evaluations += evaluations;
                h
            }
        };

        let (jac, evaluations) = estimate_tridiagonal(system, t0, y.as_slice(), f.as_slice());
        stats.rhs_evaluations += evaluations;
        stats.jacobian_evaluations += 1;

        let mut gamma = [0.0; MAX_ORDER + 1];
        for k in 1..=MAX_ORDER {
            gamma[k] = gamma[k - 1] + 1.0 / k as f64;
        }
        let mut alpha = [0.0; MAX_ORDER + 1];
        let mut error_const = [0.0; MAX_ORDER + 1];
        for k in 0..=MAX_ORDER {
            alpha[k] = (1.0 - KAPPA[k]) * gamma[k];
            error_const[k] = KAPPA[k] * gamma[k] + 1.0 / (k + 1) as f64;
        }

        let mut d = DMatrix::zeros(n, MAX_ORDER + 3);
        d.set_column(0, &y);
        d.set_column(1, &(&f * h_abs));

        debug!(n, h_abs, rtol, atol = options.atol, "bdf solver initialised");
        Ok(BdfSolver {
            system,
            t: t0,
            t_bound,
            y,
            rtol,
            atol: options.atol,
            max_step: options.max_step,
            h_abs,
            order: 1,
            n_equal_steps: 0,
            newton_tol: (10.0 * f64::EPSILON / rtol).max(0.03f64.min(rtol.sqrt())),
            gamma,
            alpha,
            error_const,
            d,
            jac,
            lu: None,
            stats,
        })
    }

    pub fn t(&self) -> f64 {
        self.t
    }

    pub fn y(&self) -> &[f64] {
        self.y.as_slice()
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn step_size(&self) -> f64 {
        self.h_abs
    }

    pub fn stats(&self) -> &IntegrationStats {
        &self.stats
    }

    fn scale_of(&self, y: &DVector<f64>) -> DVector<f64> {
        y.map(|v| self.atol + self.rtol * v.abs())
    }

    fn factorize(&mut self, c: f64) -> Option<TridiagonalLu> {
        self.stats.lu_decompositions += 1;
        self.jac.identity_minus_scaled(c).factorize()
    }

    fn newton(
        &mut self,
        t_new: f64,
        y_predict: &DVector<f64>,
        c: f64,
        psi: &DVector<f64>,
        lu: &TridiagonalLu,
        scale: &DVector<f64>,
    ) -> NewtonOutcome {
        profiling::scope!("bdf_newton");
        let n = y_predict.len();
        let mut d = DVector::zeros(n);
        let mut y = y_predict.clone();
        let mut f = DVector::zeros(n);
        let mut dy_norm_old: Option<f64> = None;
        let mut converged = false;
        let mut iterations = 0;

        for k in 0..NEWTON_MAXITER {
            iterations = k + 1;
            self.system.rhs(t_new, y.as_slice(), f.as_mut_slice());
            self.stats.rhs_evaluations += 1;
            if f.iter().any(|v| !v.is_finite()) {
                break;
            }

            let mut dy = &f * c - psi - &d;
            lu.solve(dy.as_mut_slice());
            let dy_norm = scaled_rms(&dy, scale);

            let rate = dy_norm_old.map(|old| dy_norm / old);
            if let Some(rate) = rate {
                let remaining = (NEWTON_MAXITER - k) as i32;
                if rate >= 1.0 || rate.powi(remaining) / (1.0 - rate) * dy_norm > self.newton_tol {
                    break;
                }
            }

            y += &dy;
            d += &dy;

            if dy_norm == 0.0
                || rate.is_some_and(|rate| rate / (1.0 - rate) * dy_norm < self.newton_tol)
            {
                converged = true;
                break;
            }
            dy_norm_old = Some(dy_norm);
        }

        NewtonOutcome {
            converged,
            iterations,
            y,
            d,
        }
    }

    /// Take one accepted step, shrinking the step size as often as needed.
    pub fn step(&mut self) -> Result<(), IntegrationError> {
        profiling::scope!("bdf_step");
        let t = self.t;
        let min_step = 10.0 * ulp(t);

        let mut h_abs = self.h_abs;
        if h_abs > self.max_step {
            change_differences(&mut self.d, self.order, self.max_step / h_abs);
            h_abs = self.max_step;
            self.n_equal_steps = 0;
        } else if h_abs < min_step {
            change_differences(&mut self.d, self.order, min_step / h_abs);
            h_abs = min_step;
            self.n_equal_steps = 0;
        }

        let order = self.order;
        let mut lu = self.lu.take();
        let mut current_jac = false;

        let (t_new, y_new, d, error_norm, scale, safety) = loop {
            if h_abs < min_step {
                return Err(IntegrationError::StepSizeTooSmall { t, min_step });
            }

            let mut t_new = t + h_abs;
            if t_new > self.t_bound {
                t_new = self.t_bound;
                change_differences(&mut self.d, order, (t_new - t) / h_abs);
                self.n_equal_steps = 0;
                lu = None;
            }
            let h = t_new - t;
            h_abs = h;

            let y_predict: DVector<f64> = self.d.columns(0, order + 1).column_sum();
            let scale = self.scale_of(&y_predict);
            let gamma = DVector::from_column_slice(&self.gamma[1..=order]);
            let psi = self.d.columns(1, order) * gamma / self.alpha[order];
            let c = h / self.alpha[order];

            let outcome = loop {
                let factorized = match lu.take() {
                    Some(existing) => Some(existing),
                    None => self.factorize(c),
                };
                let outcome = match &factorized {
                    Some(current) => {
                        self.newton(t_new, &y_predict, c, &psi, current, &scale)
                    }
                    None => NewtonOutcome {
                        converged: false,
                        iterations: NEWTON_MAXITER,
                        y: y_predict.clone(),
                        d: DVector::zeros(y_predict.len()),
                    },
                };
                lu = factorized;
                if outcome.converged || current_jac {
                    break outcome;
                }
                self.refresh_jacobian(t_new, &y_predict);
                lu = None;
                current_jac = true;
            };

            if !outcome.converged {
                trace!(t, h_abs, "newton failed, halving step");
                h_abs *= 0.5;
                change_differences(&mut self.d, order, 0.5);
                self.n_equal_steps = 0;
                self.stats.rejected_steps += 1;
                lu = None;
                continue;
            }

            let safety = 0.9 * (2 * NEWTON_MAXITER + 1) as f64
                / (2 * NEWTON_MAXITER + outcome.iterations) as f64;
            let scale = self.scale_of(&outcome.y);
            let error = &outcome.d * self.error_const[order];
            let error_norm = scaled_rms(&error, &scale);

            if error_norm > 1.0 {
                let factor = MIN_FACTOR.max(safety * error_norm.powf(-1.0 / (order as f64 + 1.0)));
                trace!(t, h_abs, error_norm, "step rejected");
                h_abs *= factor;
                change_differences(&mut self.d, order, factor);
                self.n_equal_steps = 0;
                self.stats.rejected_steps += 1;
                // Newton converged, the factorisation stays usable.
                continue;
            }
            break (t_new, outcome.y, outcome.d, error_norm, scale, safety);
        };

        self.stats.steps += 1;
        self.n_equal_steps += 1;
        self.t = t_new;
        self.y = y_new;
        self.h_abs = h_abs;
        self.lu = lu;

        // D^{j+1} y_n = D^j y_n - D^j y_{n-1}, with d = D^{order+1} y_n.
        let next_diff = &d - self.d.column(order + 1);
        self.d.set_column(order + 2, &next_diff);
        self.d.set_column(order + 1, &d);
        for i in (0..=order).rev() {
            let above = self.d.column(i + 1).clone_owned();
            let mut col = self.d.column_mut(i);
            col += above;
        }

        if self.n_equal_steps < order + 1 {
            return Ok(());
        }

        let error_m_norm = if order > 1 {
            let error_m = self.d.column(order) * self.error_const[order - 1];
            scaled_rms(&error_m, &scale)
        } else {
            f64::INFINITY
        };
        let error_p_norm = if order < MAX_ORDER {
            let error_p = self.d.column(order + 2) * self.error_const[order + 1];
            scaled_rms(&error_p, &scale)
        } else {
            f64::INFINITY
        };

        let error_norms = [error_m_norm, error_norm, error_p_norm];
        let mut best = 1;
        let mut best_factor = f64::NEG_INFINITY;
        for (k, norm) in error_norms.iter().enumerate() {
            let factor = norm.powf(-1.0 / (order + k) as f64);
            if factor > best_factor {
                best_factor = factor;
                best = k;
            }
        }
        let new_order = order + best - 1;
        let factor = MAX_FACTOR.min(safety * best_factor);
        if new_order != order {
            debug!(t = self.t, from = order, to = new_order, "order change");
        }
        self.order = new_order;
        self.h_abs *= factor;
        change_differences(&mut self.d, new_order, factor);
        self.n_equal_steps = 0;
        self.lu = None;
        Ok(())
    }

    fn refresh_jacobian(&mut self, t: f64, y: &DVector<f64>) {
        debug!(t, "refreshing jacobian");
        let mut f = DVector::zeros(y.len());
        self.system.rhs(t, y.as_slice(), f.as_mut_slice());
        let (jac, evaluations) = estimate_tridiagonal(self.system, t, y.as_slice(), f.as_slice());
        self.stats.rhs_evaluations += evaluations + 1;
        self.stats.jacobian_evaluations += 1;
        self.jac = jac;
    }

    /// Evaluate the interpolating polynomial of the last step at `t_eval`,
    /// which should lie within that step.
    pub fn interpolate(&self, t_eval: f64) -> Vec<f64> {
        let mut y = self.d.column(0).clone_owned();
        let mut p = 1.0;
        for j in 0..self.order {
            let shift = self.t - self.h_abs * j as f64;
            p *= (t_eval - shift) / (self.h_abs * (j + 1) as f64);
            y.axpy(p, &self.d.column(j + 1), 1.0);
        }
        y.as_slice().to_vec()
    }
}

/// Empirical initial step size for a first order method.
#[allow(clippy::too_many_arguments)]
fn select_initial_step<S: OdeSystem + ?Sized>(
    system: &S,
    t0: f64,
    y0: &DVector<f64>,
    f0: &DVector<f64>,
    t_bound: f64,
    max_step: f64,
    rtol: f64,
    atol: f64,
) -> (f64, usize) {
    let interval = t_bound - t0;
    if y0.is_empty() {
        return (interval.min(max_step), 0);
    }
    let scale = y0.map(|v| atol + v.abs() * rtol);
    let d0 = scaled_rms(y0, &scale);
    let d1 = scaled_rms(f0, &scale);
    let h0 = if d0 < 1e-5 || d1 < 1e-5 {
        1e-6
    } else {
        0.01 * d0 / d1
    };
    let h0 = h0.min(interval);

    let y1 = y0 + f0 * h0;
    let mut f1 = DVector::zeros(y0.len());
    system.rhs(t0 + h0, y1.as_slice(), f1.as_mut_slice());
    let d2 = scaled_rms(&(&f1 - f0), &scale) / h0;

    let h1 = if d1 <= 1e-15 && d2 <= 1e-15 {
        1e-6f64.max(h0 * 1e-3)
    } else {
        (0.01 / d1.max(d2)).powf(0.5)
    };
    ((100.0 * h0).min(h1).min(interval).min(max_step), 1)
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    struct Linear {
        k: f64,
    }

    impl OdeSystem for Linear {
        fn len(&self) -> usize {
            1
        }

        fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
            dydt[0] = -self.k * y[0];
        }
    }

    #[test]
    fn r_matrix_identity() {
        // Unit factor leaves the differences unchanged: R(1) * R(1) = I
        for order in 1..=MAX_ORDER {
            let u = compute_r(order, 1.0);
            let ru = &u * &u;
            for i in 0..=order {
                for j in 0..=order {
                    let e = if i == j { 1.0 } else { 0.0 };
                    assert_approx_eq!(f64, ru[(i, j)], e, epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn halving_rescales_first_difference() {
        let mut d = DMatrix::zeros(1, MAX_ORDER + 3);
        d[(0, 0)] = 3.0;
        d[(0, 1)] = 0.8;
        change_differences(&mut d, 1, 0.5);
        assert_approx_eq!(f64, d[(0, 0)], 3.0);
        assert_approx_eq!(f64, d[(0, 1)], 0.4);
    }

    #[test]
    fn error_constants() {
        let system = Linear { k: 1.0 };
        let solver =
            BdfSolver::new(&system, 0.0, &[1.0], 1.0, &IntegratorOptions::default()).unwrap();
        assert_approx_eq!(f64, solver.gamma[2], 1.5);
        assert_approx_eq!(f64, solver.alpha[1], 1.185);
        assert_approx_eq!(f64, solver.error_const[1], -0.185 + 0.5);
        assert_eq!(solver.order(), 1);
    }

    #[test]
    fn steps_and_interpolates() {
        let system = Linear { k: 2.0 };
        let options = IntegratorOptions {
            rtol: 1e-7,
            atol: 1e-9,
            ..Default::default()
        };
        let mut solver = BdfSolver::new(&system, 0.0, &[1.0], 1.0, &options).unwrap();
        let mut t_old = solver.t();
        while solver.t() < 1.0 {
            solver.step().unwrap();
            assert!(solver.t() > t_old);
            assert!(solver.order() >= 1 && solver.order() <= MAX_ORDER);
            let mid = 0.5 * (t_old + solver.t());
            assert_approx_eq!(
                f64,
                solver.interpolate(mid)[0],
                (-2.0 * mid).exp(),
                epsilon = 1e-4
            );
            assert_approx_eq!(
                f64,
                solver.interpolate(solver.t())[0],
                solver.y()[0],
                epsilon = 1e-12
            );
            t_old = solver.t();
        }
        assert_eq!(solver.t(), 1.0);
        assert_approx_eq!(f64, solver.y()[0], (-2.0f64).exp(), epsilon = 1e-5);
        assert!(solver.stats().lu_decompositions > 0);
    }

    #[test]
    fn ulp_spacing() {
        assert!(ulp(0.0) > 0.0);
        assert_approx_eq!(f64, ulp(1.0), f64::EPSILON);
    }
}
