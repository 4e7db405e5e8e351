//! Pipeline configuration.
//!
//! Everything a run needs is described by an immutable [`PipelineConfig`],
//! usually read from JSON. Each stage lists its layers innermost first.

use crate::error::ConfigError;
use crate::integrator::IntegratorOptions;
use crate::material::Material;
use crate::mesh::MeshSegment;
use crate::operator::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Label used in logs and reports.
    #[serde(default)]
    pub name: String,

    /// Outer radius in meters.
    pub outer_radius: f64,

    pub point_count: usize,

    /// Thermal conductivity W/(m·K)
    pub conductivity: f64,

    /// Density kg/m³
    pub density: f64,

    /// Specific heat J/(kg·K)
    pub specific_heat: f64,

    /// Initial temperature (K) for points not taken from a snapshot.
    /// Falls back to the stage's ambient temperature.
    #[serde(default)]
    pub initial_temperature: Option<f64>,
}

impl LayerConfig {
    pub fn new(
        name: &str,
        outer_radius: f64,
        point_count: usize,
        material: Material,
        initial_temperature: Option<f64>,
    ) -> Self {
        LayerConfig {
            name: name.to_string(),
            outer_radius,
            point_count,
            conductivity: material.conductivity,
            density: material.density,
            specific_heat: material.specific_heat,
            initial_temperature,
        }
    }

    pub fn material(&self) -> Material {
        Material::new(self.conductivity, self.density, self.specific_heat)
    }

    pub fn segment(&self) -> MeshSegment {
        MeshSegment::new(self.outer_radius, self.point_count)
    }
}

/// Labelled index range whose mean is reported after a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRange {
    pub label: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stage name, also the name its snapshot is saved under.
    pub name: String,

    pub layers: Vec<LayerConfig>,

    /// Integrated time span is `[0, duration]` seconds.
    pub duration: f64,

    /// Sampling times, `[0, duration]` when empty.
    #[serde(default)]
    pub output_times: Vec<f64>,

    /// Number of leading points copied from the seed snapshot.
    /// `None` starts from the layer initial temperatures only.
    #[serde(default)]
    pub reuse_prefix_length: Option<usize>,

    /// Snapshot to seed from, the previous stage by default.
    #[serde(default)]
    pub seed_snapshot: Option<String>,

    /// Temperature (K) of layers without their own initial temperature.
    pub ambient_temperature: f64,

    /// Number of leading points saved as this stage's snapshot,
    /// the whole profile when `None`.
    #[serde(default)]
    pub persist_prefix_length: Option<usize>,

    #[serde(default)]
    pub report_ranges: Vec<ReportRange>,
}

impl StageConfig {
    pub fn segments(&self) -> Vec<MeshSegment> {
        self.layers.iter().map(LayerConfig::segment).collect()
    }

    pub fn materials(&self) -> Vec<Material> {
        self.layers.iter().map(LayerConfig::material).collect()
    }

    pub fn point_count(&self) -> usize {
        self.layers.iter().map(|l| l.point_count).sum()
    }

    /// Output times with the `[0, duration]` default applied.
    pub fn resolved_output_times(&self) -> Vec<f64> {
        if self.output_times.is_empty() {
            vec![0.0, self.duration]
        } else {
            self.output_times.clone()
        }
    }

    /// Checks that do not need a mesh.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.layers.is_empty() {
            return Err(ConfigError::NoLayers);
        }
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(ConfigError::InvalidTimes(format!(
                "stage '{}': duration must be positive, got {}",
                self.name, self.duration
            )));
        }
        let times = self.resolved_output_times();
        if times.first() != Some(&0.0) || times.last() != Some(&self.duration) {
            return Err(ConfigError::InvalidTimes(format!(
                "stage '{}': output times must start at 0 and end at {}",
                self.name, self.duration
            )));
        }
        if times.windows(2).any(|w| !(w[1] >= w[0])) {
            return Err(ConfigError::InvalidTimes(format!(
                "stage '{}': output times must be non-decreasing",
                self.name
            )));
        }
        if !self.ambient_temperature.is_finite() || self.ambient_temperature <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "ambient_temperature",
                value: self.ambient_temperature.to_string(),
                reason: "must be a positive absolute temperature".to_string(),
            });
        }
        for (layer, l) in self.layers.iter().enumerate() {
            if let Some(t) = l.initial_temperature {
                if !t.is_finite() || t <= 0.0 {
                    return Err(ConfigError::InvalidMaterial {
                        layer,
                        reason: format!("initial temperature must be positive, got {t}"),
                    });
                }
            }
        }
        let n = self.point_count();
        if let Some(k) = self.reuse_prefix_length {
            if k > n {
                return Err(ConfigError::ReusePrefixTooLong {
                    requested: k,
                    available: n,
                });
            }
        }
        if let Some(k) = self.persist_prefix_length {
            if k == 0 || k > n {
                return Err(ConfigError::InvalidValue {
                    key: "persist_prefix_length",
                    value: k.to_string(),
                    reason: format!("must be in 1..={n}"),
                });
            }
        }
        Ok(())
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub stages: Vec<StageConfig>,

    #[serde(default)]
    pub integrator: IntegratorOptions,

    /// Chunk size used to parallelise operator evaluation.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "chunk_size",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        let mut names = HashSet::new();
        for (i, stage) in self.stages.iter().enumerate() {
            if !names.insert(stage.name.as_str()) {
                return Err(ConfigError::DuplicateStage(stage.name.clone()));
            }
            stage.validate()?;
            if stage.reuse_prefix_length.is_some() && stage.seed_snapshot.is_none() && i == 0 {
                return Err(ConfigError::NoSeedSource(stage.name.clone()));
            }
        }
        Ok(())
    }

    pub fn stage(&self, name: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Snapshot a stage seeds from, if it reuses one.
    pub fn seed_of(&self, index: usize) -> Result<Option<String>, ConfigError> {
        let stage = &self.stages[index];
        if stage.reuse_prefix_length.is_none() {
            return Ok(None);
        }
        match (&stage.seed_snapshot, index) {
            (Some(name), _) => Ok(Some(name.clone())),
            (None, 0) => Err(ConfigError::NoSeedSource(stage.name.clone())),
            (None, i) => Ok(Some(self.stages[i - 1].name.clone())),
        }
    }

    /// Pre-cooled steel sphere in a cup: a cooldown in air followed by an
    /// espresso shot poured around it.
    pub fn espresso() -> Self {
        let chilled = 203.0;
        let room = 293.0;
        let coffee = 338.0;
        let water = Material::water();
        let cooldown = StageConfig {
            name: "cooldown".to_string(),
            layers: vec![
                LayerConfig::new("water", 0.014, 1400, water, Some(chilled)),
                LayerConfig::new("steel", 0.015, 100, Material::steel(), Some(chilled)),
                LayerConfig::new("air", 0.065, 5000, Material::air(), None),
            ],
            duration: 15.0,
            output_times: vec![0.0, 15.0],
            reuse_prefix_length: None,
            seed_snapshot: None,
            ambient_temperature: room,
            persist_prefix_length: Some(1500),
            report_ranges: vec![ReportRange {
                label: "core".to_string(),
                start: 0,
                end: 1400,
            }],
        };
        let shot = StageConfig {
            name: "espresso_shot".to_string(),
            layers: vec![
                LayerConfig::new("water", 0.014, 1400, water, None),
                LayerConfig::new("steel", 0.015, 100, Material::steel(), None),
                LayerConfig::new("coffee", 0.0229, 790, water, Some(coffee)),
                LayerConfig::new("air", 0.065, 5000, Material::air(), None),
            ],
            duration: 13.0,
            output_times: vec![0.0, 0.5, 1.0, 2.0, 5.0, 13.0],
            reuse_prefix_length: Some(1500),
            seed_snapshot: None,
            ambient_temperature: room,
            persist_prefix_length: Some(2290),
            report_ranges: vec![ReportRange {
                label: "coffee".to_string(),
                start: 1500,
                end: 2290,
            }],
        };
        PipelineConfig {
            stages: vec![cooldown, shot],
            integrator: IntegratorOptions::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}
