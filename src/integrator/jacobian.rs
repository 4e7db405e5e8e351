use super::{OdeSystem, Tridiagonal};

/// Columns `j` with the same `j % GROUPS` never touch a common row of a
/// tridiagonal Jacobian, so they can be perturbed together.
const GROUPS: usize = 3;

/// Forward-difference estimate of a nearest-neighbour coupled Jacobian.
///
/// `f0` must hold `system.rhs(t, y)`. Costs `min(3, n)` evaluations,
/// the count is returned alongside the estimate.
pub fn estimate_tridiagonal<S: OdeSystem + ?Sized>(
    system: &S,
    t: f64,
    y: &[f64],
    f0: &[f64],
) -> (Tridiagonal, usize) {
    profiling::scope!("estimate_tridiagonal");
    let n = y.len();
    debug_assert_eq!(f0.len(), n);
    let mut jac = Tridiagonal::zeros(n);
    let mut y_perturbed = y.to_vec();
    let mut f_perturbed = vec![0.0; n];
    let mut steps = vec![0.0; n];
    let root_eps = f64::EPSILON.sqrt();
    let mut evaluations = 0;

    for group in 0..GROUPS.min(n) {
        for j in (group..n).step_by(GROUPS) {
            let target = y[j] + root_eps * y[j].abs().max(1.0);
            // Use the representable step actually taken.
            steps[j] = target - y[j];
            y_perturbed[j] = target;
        }

        system.rhs(t, &y_perturbed, &mut f_perturbed);
        evaluations += 1;

        for j in (group..n).step_by(GROUPS) {
            let h = steps[j];
            if j > 0 {
                jac.upper[j - 1] = (f_perturbed[j - 1] - f0[j - 1]) / h;
            }
            jac.diag[j] = (f_perturbed[j] - f0[j]) / h;
            if j + 1 < n {
                jac.lower[j + 1] = (f_perturbed[j + 1] - f0[j + 1]) / h;
            }
            y_perturbed[j] = y[j];
        }
    }
    (jac, evaluations)
}
