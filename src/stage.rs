//! One simulation stage: mesh, materials, initial condition and the
//! integration producing its result.

use crate::config::{LayerConfig, ReportRange, StageConfig};
use crate::error::{ConfigError, Error, Result};
use crate::integrator::{integrate, IntegrationStats, IntegratorOptions};
use crate::material::MaterialTable;
use crate::mesh::RadialMesh;
use crate::operator::DiffusionOperator;
use crate::par_slice;
use crate::profile::TemperatureProfile;
use std::ops::Range;
use tracing::info;

/// Snapshot values handed to a stage together with the snapshot's name.
#[derive(Debug, Clone, Copy)]
pub struct Seed<'a> {
    pub snapshot: &'a str,
    pub values: &'a [f64],
}

/// Initial profile: the first `reuse` points come from `seed`, every other
/// point gets its layer's initial temperature (or `ambient`).
pub fn assemble_initial_profile(
    mesh: &RadialMesh,
    layers: &[LayerConfig],
    ambient: f64,
    seed: &[f64],
    reuse: usize,
    chunk_size: usize,
) -> std::result::Result<TemperatureProfile, ConfigError> {
    let n = mesh.len();
    if layers.len() != mesh.layer_count() {
        return Err(ConfigError::LengthMismatch {
            what: "layer configurations",
            expected: mesh.layer_count(),
            actual: layers.len(),
        });
    }
    if reuse > n {
        return Err(ConfigError::ReusePrefixTooLong {
            requested: reuse,
            available: n,
        });
    }
    if reuse > seed.len() {
        return Err(ConfigError::LengthMismatch {
            what: "seed profile",
            expected: reuse,
            actual: seed.len(),
        });
    }

    let mut values = vec![0.0; n];
    values[..reuse].copy_from_slice(&seed[..reuse]);
    for (layer, config) in layers.iter().enumerate() {
        let range = mesh.layer_range(layer);
        let start = range.start.max(reuse);
        if start >= range.end {
            continue;
        }
        let temperature = config.initial_temperature.unwrap_or(ambient);
        par_slice::set_value(&mut values[start..range.end], temperature, chunk_size);
    }
    Ok(TemperatureProfile::new(values))
}

/// A fully assembled, immutable stage.
#[derive(Debug, Clone)]
pub struct Stage {
    name: String,
    mesh: RadialMesh,
    materials: MaterialTable,
    operator: DiffusionOperator,
    initial_profile: TemperatureProfile,
    time_span: (f64, f64),
    output_times: Vec<f64>,
    persist_prefix_length: usize,
    report_ranges: Vec<ReportRange>,
}

impl Stage {
    /// Validate `config` and assemble the stage. A seed is required exactly
    /// when the stage reuses a snapshot prefix.
    pub fn build(config: &StageConfig, seed: Option<Seed<'_>>, chunk_size: usize) -> Result<Self> {
        config.validate()?;
        let mesh = RadialMesh::build(&config.segments())?;
        let materials = MaterialTable::for_mesh(&mesh, &config.materials())?;
        let operator = DiffusionOperator::new(&mesh, &materials, chunk_size)?;

        let (seed_values, reuse): (&[f64], usize) = match (config.reuse_prefix_length, seed) {
            (None, _) => (&[], 0),
            (Some(_), None) => return Err(ConfigError::NoSeedSource(config.name.clone()).into()),
            (Some(k), Some(seed)) => {
                if seed.values.len() < k {
                    return Err(Error::SnapshotTooShort {
                        stage: config.name.clone(),
                        snapshot: seed.snapshot.to_string(),
                        required: k,
                        available: seed.values.len(),
                    });
                }
                (seed.values, k)
            }
        };
        let initial_profile = assemble_initial_profile(
            &mesh,
            &config.layers,
            config.ambient_temperature,
            seed_values,
            reuse,
            chunk_size,
        )?;

        Ok(Stage {
            name: config.name.clone(),
            persist_prefix_length: config.persist_prefix_length.unwrap_or(mesh.len()),
            mesh,
            materials,
            operator,
            initial_profile,
            time_span: (0.0, config.duration),
            output_times: config.resolved_output_times(),
            report_ranges: config.report_ranges.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mesh(&self) -> &RadialMesh {
        &self.mesh
    }

    pub fn materials(&self) -> &MaterialTable {
        &self.materials
    }

    pub fn operator(&self) -> &DiffusionOperator {
        &self.operator
    }

    pub fn initial_profile(&self) -> &TemperatureProfile {
        &self.initial_profile
    }

    pub fn time_span(&self) -> (f64, f64) {
        self.time_span
    }

    pub fn output_times(&self) -> &[f64] {
        &self.output_times
    }

    pub fn run(&self, options: &IntegratorOptions) -> Result<StageResult> {
        info!(
            stage = %self.name,
            points = self.mesh.len(),
            layers = self.mesh.layer_count(),
            duration = self.time_span.1,
            "running stage"
        );
        let trajectory = integrate(
            &self.operator,
            self.initial_profile.as_slice(),
            self.time_span,
            &self.output_times,
            options,
        )
        .map_err(|source| match source.t_reached() {
            Some(t_reached) => Error::Convergence {
                stage: self.name.clone(),
                t_reached,
                source,
            },
            None => Error::Integration {
                stage: self.name.clone(),
                source,
            },
        })?;

        info!(
            stage = %self.name,
            steps = trajectory.stats.steps,
            rejected = trajectory.stats.rejected_steps,
            rhs_evaluations = trajectory.stats.rhs_evaluations,
            "stage finished"
        );
        Ok(StageResult {
            stage: self.name.clone(),
            mesh: self.mesh.clone(),
            times: trajectory.times,
            profiles: trajectory
                .states
                .into_iter()
                .map(TemperatureProfile::new)
                .collect(),
            stats: trajectory.stats,
            persist_prefix_length: self.persist_prefix_length,
            report_ranges: self.report_ranges.clone(),
        })
    }
}

/// Profiles of a finished stage, one per output time.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub stage: String,
    pub mesh: RadialMesh,
    pub times: Vec<f64>,
    pub profiles: Vec<TemperatureProfile>,
    pub stats: IntegrationStats,
    pub persist_prefix_length: usize,
    pub report_ranges: Vec<ReportRange>,
}

impl StageResult {
    /// Profile at the last output time.
    pub fn final_profile(&self) -> &TemperatureProfile {
        // Output times always include the end of the span.
        &self.profiles[self.profiles.len() - 1]
    }

    /// The prefix of the final profile handed to the next stage.
    pub fn snapshot(&self) -> &[f64] {
        self.final_profile().prefix(self.persist_prefix_length)
    }

    /// Mean of the final profile over `range`.
    pub fn final_mean(&self, range: Range<usize>) -> Option<f64> {
        self.final_profile().mean_over(range)
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use crate::material::Material;
    use float_cmp::assert_approx_eq;

    fn layers() -> Vec<LayerConfig> {
        vec![
            LayerConfig::new("water", 0.014, 14, Material::water(), Some(203.0)),
            LayerConfig::new("steel", 0.015, 4, Material::steel(), Some(203.0)),
            LayerConfig::new("air", 0.065, 20, Material::air(), None),
        ]
    }

    fn stage_config() -> StageConfig {
        StageConfig {
            name: "small".to_string(),
            layers: layers(),
            duration: 1.0,
            output_times: vec![],
            reuse_prefix_length: None,
            seed_snapshot: None,
            ambient_temperature: 293.0,
            persist_prefix_length: Some(18),
            report_ranges: vec![],
        }
    }

    #[test]
    fn fresh_initial_profile() {
        let mesh = RadialMesh::build(&stage_config().segments()).unwrap();
        let profile = assemble_initial_profile(&mesh, &layers(), 293.0, &[], 0, 5).unwrap();
        assert_eq!(profile.len(), 38);
        assert!(profile.as_slice()[..18].iter().all(|&t| t == 203.0));
        assert!(profile.as_slice()[18..].iter().all(|&t| t == 293.0));
    }

    #[test]
    fn seeded_prefix_can_cut_a_layer() {
        let mesh = RadialMesh::build(&stage_config().segments()).unwrap();
        let seed: Vec<f64> = (0..16).map(|i| 100.0 + i as f64).collect();
        let profile = assemble_initial_profile(&mesh, &layers(), 293.0, &seed, 16, 5).unwrap();
        assert_eq!(&profile.as_slice()[..16], seed.as_slice());
        assert_eq!(&profile.as_slice()[16..18], &[203.0, 203.0]);
        assert_eq!(profile.as_slice()[37], 293.0);

        assert!(matches!(
            assemble_initial_profile(&mesh, &layers(), 293.0, &seed, 17, 5),
            Err(ConfigError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn seed_requirements() {
        let mut config = stage_config();
        config.reuse_prefix_length = Some(18);
        assert!(matches!(
            Stage::build(&config, None, 8),
            Err(Error::Config(ConfigError::NoSeedSource(_)))
        ));

        let short = vec![250.0; 10];
        let err = Stage::build(
            &config,
            Some(Seed {
                snapshot: "previous",
                values: &short,
            }),
            8,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::SnapshotTooShort {
                required: 18,
                available: 10,
                ..
            }
        ));
    }

    #[test]
    fn runs_and_warms() {
        let stage = Stage::build(&stage_config(), None, 8).unwrap();
        assert_eq!(stage.output_times(), &[0.0, 1.0]);
        let result = stage.run(&IntegratorOptions::default()).unwrap();
        assert_eq!(result.profiles.len(), 2);
        assert_eq!(result.profiles[0], *stage.initial_profile());
        assert_eq!(result.snapshot().len(), 18);
        assert_eq!(result.final_profile().as_slice()[37], 293.0);
        let core = result.final_mean(0..18).unwrap();
        assert!(core > 203.0 && core < 293.0, "core mean {core}");
        assert!(result.stats.steps > 0);
    }

    #[test]
    fn step_budget_is_a_convergence_failure() {
        let stage = Stage::build(&stage_config(), None, 8).unwrap();
        let options = IntegratorOptions {
            max_steps: 2,
            ..Default::default()
        };
        match stage.run(&options).unwrap_err() {
            Error::Convergence {
                stage, t_reached, ..
            } => {
                assert_eq!(stage, "small");
                assert!(t_reached > 0.0 && t_reached < 1.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn final_mean() {
        let stage = Stage::build(&stage_config(), None, 8).unwrap();
        let result = stage.run(&IntegratorOptions::default()).unwrap();
        let all = result.final_profile().mean().unwrap();
        assert_approx_eq!(f64, result.final_mean(0..1000).unwrap(), all);
    }
}
