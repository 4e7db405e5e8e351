use crate::par_slice;
use std::ops::Range;

/// Offset between Kelvin and Celsius.
pub const KELVIN_OFFSET: f64 = 273.15;

/// Absolute temperatures (K), one per mesh point.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureProfile {
    values: Vec<f64>,
}

impl TemperatureProfile {
    pub fn new(values: Vec<f64>) -> Self {
        TemperatureProfile { values }
    }

    /// Every point at the same temperature.
    pub fn uniform(len: usize, temperature: f64) -> Self {
        TemperatureProfile {
            values: vec![temperature; len],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.values
    }

    /// First `len` values, or all of them if the profile is shorter.
    pub fn prefix(&self, len: usize) -> &[f64] {
        &self.values[..len.min(self.values.len())]
    }

    /// Mean over `range`. The range is clipped to the profile like a NumPy
    /// slice, `None` if nothing is left.
    pub fn mean_over(&self, range: Range<usize>) -> Option<f64> {
        let end = range.end.min(self.values.len());
        if range.start >= end {
            return None;
        }
        let slice = &self.values[range.start..end];
        let chunk_size = (slice.len() / rayon::current_num_threads()).max(1024);
        Some(par_slice::sum(slice, chunk_size) / slice.len() as f64)
    }

    pub fn mean(&self) -> Option<f64> {
        self.mean_over(0..self.values.len())
    }

    pub fn max(&self) -> Option<f64> {
        par_slice::max(&self.values, 1024)
    }

    pub fn min(&self) -> Option<f64> {
        par_slice::min(&self.values, 1024)
    }

    pub fn to_celsius(&self) -> Vec<f64> {
        self.values.iter().map(|t| t - KELVIN_OFFSET).collect()
    }
}

impl From<Vec<f64>> for TemperatureProfile {
    fn from(values: Vec<f64>) -> Self {
        TemperatureProfile::new(values)
    }
}

impl AsRef<[f64]> for TemperatureProfile {
    fn as_ref(&self) -> &[f64] {
        &self.values
    }
}
