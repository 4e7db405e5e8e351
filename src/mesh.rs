//! Radial mesh construction.
//!
//! Layers are described by their outer radius and a point count.
//! The mesh itself is a single uniform sampling of `[0, R]` where `R` is the
//! outermost radius and the number of samples is the total point count.
//! Layer breakpoints are cumulative point counts, so the index where a layer
//! starts only approximates its physical inner radius.
//! Stage chaining relies on these fixed index counts, do not snap them.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// One layer of the mesh description.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshSegment {
    /// Outer radius of the layer in meters.
    pub outer_radius: f64,

    /// Number of samples attributed to the layer.
    pub point_count: usize,
}

impl MeshSegment {
    pub fn new(outer_radius: f64, point_count: usize) -> Self {
        MeshSegment {
            outer_radius,
            point_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RadialMesh {
    radii: Vec<f64>,
    dr: f64,
    breakpoints: Vec<usize>,
    segments: Vec<MeshSegment>,
}

impl RadialMesh {
    /// Build the uniform mesh for the ordered layer list, innermost first.
    pub fn build(segments: &[MeshSegment]) -> Result<Self, ConfigError> {
        if segments.is_empty() {
            return Err(ConfigError::NoLayers);
        }

        let mut previous = 0.0;
        let mut breakpoints = Vec::with_capacity(segments.len() + 1);
        breakpoints.push(0);
        for (layer, segment) in segments.iter().enumerate() {
            if !segment.outer_radius.is_finite() || segment.outer_radius <= previous {
                return Err(ConfigError::NonIncreasingRadius {
                    layer,
                    radius: segment.outer_radius,
                    previous,
                });
            }
            if segment.point_count < 2 {
                return Err(ConfigError::TooFewPoints {
                    layer,
                    point_count: segment.point_count,
                });
            }
            previous = segment.outer_radius;
            breakpoints.push(breakpoints[layer] + segment.point_count);
        }

        let n = breakpoints[segments.len()];
        let outer = previous;
        let dr = outer / (n - 1) as f64;
        let radii = (0..n)
            .map(|i| {
                if i == n - 1 {
                    outer
                } else {
                    i as f64 * dr
                }
            })
            .collect();

        Ok(RadialMesh {
            radii,
            dr,
            breakpoints,
            segments: segments.to_vec(),
        })
    }

    /// Number of mesh points.
    pub fn len(&self) -> usize {
        self.radii.len()
    }

    pub fn is_empty(&self) -> bool {
        self.radii.is_empty()
    }

    /// Uniform spacing between consecutive samples.
    pub fn dr(&self) -> f64 {
        self.dr
    }

    pub fn radii(&self) -> &[f64] {
        &self.radii
    }

    pub fn radius(&self, index: usize) -> f64 {
        self.radii[index]
    }

    pub fn outer_radius(&self) -> f64 {
        self.radii[self.radii.len() - 1]
    }

    /// Cumulative point counts, starting with 0 and ending with `len()`.
    pub fn breakpoints(&self) -> &[usize] {
        &self.breakpoints
    }

    pub fn layer_count(&self) -> usize {
        self.segments.len()
    }

    /// Index range owned by a layer.
    pub fn layer_range(&self, layer: usize) -> Range<usize> {
        self.breakpoints[layer]..self.breakpoints[layer + 1]
    }

    pub fn segments(&self) -> &[MeshSegment] {
        &self.segments
    }

    /// Spacing the layer would have if it were sampled on its own thickness.
    /// Only informative, the mesh is uniform.
    pub fn nominal_spacing(&self, layer: usize) -> f64 {
        let inner = if layer == 0 {
            0.0
        } else {
            self.segments[layer - 1].outer_radius
        };
        let segment = &self.segments[layer];
        (segment.outer_radius - inner) / (segment.point_count - 1) as f64
    }

    /// Distance between the radius sampled at a layer's starting breakpoint
    /// and the layer's configured inner radius.
    pub fn boundary_offset(&self, layer: usize) -> f64 {
        let inner = if layer == 0 {
            0.0
        } else {
            self.segments[layer - 1].outer_radius
        };
        self.radii[self.breakpoints[layer]] - inner
    }

    /// Radii converted to millimeters, for reporting.
    pub fn distances_mm(&self) -> Vec<f64> {
        self.radii.iter().map(|r| r * 1000.0).collect()
    }
}
