/// Tridiagonal matrix stored by diagonals.
/// `lower[0]` and `upper[n - 1]` are unused and kept at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Tridiagonal {
    pub lower: Vec<f64>,
    pub diag: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Tridiagonal {
    pub fn zeros(n: usize) -> Self {
        Tridiagonal {
            lower: vec![0.0; n],
            diag: vec![0.0; n],
            upper: vec![0.0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.diag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diag.is_empty()
    }

    /// `I - c * self`, the Newton matrix of an implicit step.
    pub fn identity_minus_scaled(&self, c: f64) -> Self {
        Tridiagonal {
            lower: self.lower.iter().map(|a| -c * a).collect(),
            diag: self.diag.iter().map(|b| 1.0 - c * b).collect(),
            upper: self.upper.iter().map(|u| -c * u).collect(),
        }
    }

    /// `out = self * x`
    pub fn mul_vec(&self, x: &[f64], out: &mut [f64]) {
        let n = self.len();
        debug_assert_eq!(x.len(), n);
        debug_assert_eq!(out.len(), n);
        for i in 0..n {
            let mut v = self.diag[i] * x[i];
            if i > 0 {
                v += self.lower[i] * x[i - 1];
            }
            if i + 1 < n {
                v += self.upper[i] * x[i + 1];
            }
            out[i] = v;
        }
    }

    /// Thomas algorithm elimination, without pivoting.
    /// Returns `None` if a pivot vanishes or is not finite.
    pub fn factorize(&self) -> Option<TridiagonalLu> {
        let n = self.len();
        let mut pivots = vec![0.0; n];
        let mut upper_prime = vec![0.0; n];
        for i in 0..n {
            let pivot = if i == 0 {
                self.diag[0]
            } else {
                self.diag[i] - self.lower[i] * upper_prime[i - 1]
            };
            if pivot == 0.0 || !pivot.is_finite() {
                return None;
            }
            pivots[i] = pivot;
            if i + 1 < n {
                upper_prime[i] = self.upper[i] / pivot;
            }
        }
        Some(TridiagonalLu {
            lower: self.lower.clone(),
            pivots,
            upper_prime,
        })
    }
}

/// Factorised tridiagonal system, reusable for many right-hand sides.
#[derive(Debug, Clone)]
pub struct TridiagonalLu {
    lower: Vec<f64>,
    pivots: Vec<f64>,
    upper_prime: Vec<f64>,
}

impl TridiagonalLu {
    /// Solve in place, `rhs` is overwritten with the solution.
    pub fn solve(&self, rhs: &mut [f64]) {
        let n = self.pivots.len();
        debug_assert_eq!(rhs.len(), n);
        if n == 0 {
            return;
        }
        // Forward sweep
        rhs[0] /= self.pivots[0];
        for i in 1..n {
            rhs[i] = (rhs[i] - self.lower[i] * rhs[i - 1]) / self.pivots[i];
        }
        // Back substitution
        for i in (0..n - 1).rev() {
            rhs[i] -= self.upper_prime[i] * rhs[i + 1];
        }
    }
}
