//! Finite-difference right-hand side of the spherically symmetric heat
//! equation
//!
//! ∂T/∂t = α (∂²T/∂r² + (2/r)(∂T/∂r))
//!
//! on a uniform radial mesh with a per-index diffusivity.
//! The center uses the r → 0 limit of the spherical Laplacian and the outer
//! most sample is held at its initial value.

use crate::error::ConfigError;
use crate::integrator::OdeSystem;
use crate::material::MaterialTable;
use crate::mesh::RadialMesh;
use rayon::prelude::*;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct DiffusionOperator {
    radii: Vec<f64>,
    diffusivity: Vec<f64>,
    dr: f64,
    chunk_size: usize,
}

impl DiffusionOperator {
    pub fn new(
        mesh: &RadialMesh,
        materials: &MaterialTable,
        chunk_size: usize,
    ) -> Result<Self, ConfigError> {
        if materials.len() != mesh.len() {
            return Err(ConfigError::LengthMismatch {
                what: "material table",
                expected: mesh.len(),
                actual: materials.len(),
            });
        }
        Ok(DiffusionOperator {
            radii: mesh.radii().to_vec(),
            diffusivity: materials.diffusivity_field(),
            dr: mesh.dr(),
            chunk_size: chunk_size.max(1),
        })
    }

    pub fn dr(&self) -> f64 {
        self.dr
    }

    /// Interior update for `1 <= i <= n - 2`.
    #[inline]
    fn interior(&self, i: usize, temps: &[f64]) -> f64 {
        let dr = self.dr;
        let left = temps[i - 1];
        let middle = temps[i];
        let right = temps[i + 1];
        self.diffusivity[i]
            * ((right - 2.0 * middle + left) / (dr * dr)
                + (2.0 / self.radii[i]) * (right - middle) / dr)
    }

    /// Symmetric limit at r = 0.
    #[inline]
    fn center(&self, temps: &[f64]) -> f64 {
        6.0 * self.diffusivity[0] * (temps[1] - temps[0]) / (self.dr * self.dr)
    }

    /// Allocating convenience wrapper around [`OdeSystem::rhs`].
    pub fn evaluate(&self, temps: &[f64]) -> Vec<f64> {
        let mut dtdt = vec![0.0; temps.len()];
        self.rhs(0.0, temps, &mut dtdt);
        dtdt
    }
}

impl OdeSystem for DiffusionOperator {
    fn len(&self) -> usize {
        self.radii.len()
    }

    fn rhs(&self, _t: f64, temps: &[f64], dtdt: &mut [f64]) {
        profiling::scope!("diffusion_rhs");
        let n = self.radii.len();
        debug_assert_eq!(temps.len(), n);
        debug_assert_eq!(dtdt.len(), n);
        let chunk_size = self.chunk_size;

        dtdt.par_chunks_mut(chunk_size)
            .enumerate()
            .for_each(|(chunk_index, chunk)| {
                let offset = chunk_index * chunk_size;
                for (j, value_mut) in chunk.iter_mut().enumerate() {
                    let i = offset + j;
                    *value_mut = if i == 0 || i + 1 >= n {
                        0.0
                    } else {
                        self.interior(i, temps)
                    };
                }
            });

        // Boundaries after the interior pass.
        if n > 1 {
            dtdt[0] = self.center(temps);
            dtdt[n - 1] = 0.0;
        } else if n == 1 {
            dtdt[0] = 0.0;
        }
    }
}
