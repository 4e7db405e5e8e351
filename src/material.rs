//! Materials and the per-index diffusivity table.

use crate::error::ConfigError;
use crate::mesh::RadialMesh;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Bulk thermal properties of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Thermal conductivity W/(m·K)
    pub conductivity: f64,
    /// Density kg/m³
    pub density: f64,
    /// Specific heat J/(kg·K)
    pub specific_heat: f64,
}

impl Material {
    pub fn new(conductivity: f64, density: f64, specific_heat: f64) -> Self {
        Material {
            conductivity,
            density,
            specific_heat,
        }
    }

    /// Thermal diffusivity α = k/(ρc) in m²/s
    pub fn diffusivity(&self) -> f64 {
        self.conductivity / (self.density * self.specific_heat)
    }

    pub fn water() -> Self {
        Self::new(0.6, 1000.0, 4184.0)
    }

    pub fn steel() -> Self {
        Self::new(50.0, 7800.0, 500.0)
    }

    pub fn air() -> Self {
        Self::new(0.025, 1.2, 1005.0)
    }

    pub(crate) fn validate(&self, layer: usize) -> Result<(), ConfigError> {
        let fields = [
            ("conductivity", self.conductivity),
            ("density", self.density),
            ("specific heat", self.specific_heat),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidMaterial {
                    layer,
                    reason: format!("{name} must be positive and finite, got {value}"),
                });
            }
        }
        Ok(())
    }
}

/// A contiguous run of mesh indices sharing one diffusivity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialLayer {
    pub index_start: usize,
    pub index_end: usize,
    pub diffusivity: f64,
}

impl MaterialLayer {
    pub fn range(&self) -> Range<usize> {
        self.index_start..self.index_end
    }
}

/// Ordered breakpoint table mapping a mesh index to its diffusivity.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialTable {
    layers: Vec<MaterialLayer>,
}

impl MaterialTable {
    /// `breakpoints` are cumulative counts `[0, b1, .., N]`, one more entry
    /// than `diffusivities`.
    pub fn from_breakpoints(
        breakpoints: &[usize],
        diffusivities: &[f64],
    ) -> Result<Self, ConfigError> {
        if diffusivities.is_empty() {
            return Err(ConfigError::NoLayers);
        }
        if breakpoints.len() != diffusivities.len() + 1 {
            return Err(ConfigError::LengthMismatch {
                what: "material breakpoints",
                expected: diffusivities.len() + 1,
                actual: breakpoints.len(),
            });
        }
        if breakpoints[0] != 0 {
            return Err(ConfigError::BrokenPartition(format!(
                "first layer starts at {}",
                breakpoints[0]
            )));
        }

        let mut layers = Vec::with_capacity(diffusivities.len());
        for (layer, (bounds, &diffusivity)) in
            breakpoints.windows(2).zip(diffusivities).enumerate()
        {
            if bounds[1] <= bounds[0] {
                return Err(ConfigError::BrokenPartition(format!(
                    "layer {layer} covers [{}, {})",
                    bounds[0], bounds[1]
                )));
            }
            if !diffusivity.is_finite() || diffusivity <= 0.0 {
                return Err(ConfigError::InvalidMaterial {
                    layer,
                    reason: format!("diffusivity must be positive, got {diffusivity}"),
                });
            }
            layers.push(MaterialLayer {
                index_start: bounds[0],
                index_end: bounds[1],
                diffusivity,
            });
        }
        Ok(MaterialTable { layers })
    }

    /// Table for a mesh, one material per mesh layer.
    pub fn for_mesh(mesh: &RadialMesh, materials: &[Material]) -> Result<Self, ConfigError> {
        if materials.len() != mesh.layer_count() {
            return Err(ConfigError::LengthMismatch {
                what: "materials per mesh layer",
                expected: mesh.layer_count(),
                actual: materials.len(),
            });
        }
        for (layer, material) in materials.iter().enumerate() {
            material.validate(layer)?;
        }
        let diffusivities: Vec<f64> = materials.iter().map(Material::diffusivity).collect();
        Self::from_breakpoints(mesh.breakpoints(), &diffusivities)
    }

    pub fn layers(&self) -> &[MaterialLayer] {
        &self.layers
    }

    /// Number of indices covered.
    pub fn len(&self) -> usize {
        self.layers.last().map_or(0, |l| l.index_end)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Which layer owns `index`.
    pub fn layer_of(&self, index: usize) -> usize {
        debug_assert!(index < self.len(), "{index} outside table of {}", self.len());
        self.layers.partition_point(|l| l.index_end <= index)
    }

    pub fn diffusivity(&self, index: usize) -> f64 {
        self.layers[self.layer_of(index)].diffusivity
    }

    /// Diffusivity expanded to one value per index.
    pub fn diffusivity_field(&self) -> Vec<f64> {
        let mut field = Vec::with_capacity(self.len());
        for layer in &self.layers {
            field.extend(std::iter::repeat(layer.diffusivity).take(layer.index_end - layer.index_start));
        }
        field
    }
}
