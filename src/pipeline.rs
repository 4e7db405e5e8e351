//! Runs stages in order, handing snapshots from one stage to the next
//! through a [`SnapshotStore`].

use crate::config::PipelineConfig;
use crate::error::{ConfigError, Error, Result};
use crate::snapshot::SnapshotStore;
use crate::stage::{Seed, Stage, StageResult};
use tracing::info;

pub struct Pipeline<S: SnapshotStore> {
    config: PipelineConfig,
    store: S,
}

impl<S: SnapshotStore> Pipeline<S> {
    pub fn new(config: PipelineConfig, store: S) -> Result<Self> {
        config.validate()?;
        Ok(Pipeline { config, store })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Run every stage in order. Each stage's snapshot is saved under its
    /// name before the next stage starts.
    pub fn run(&mut self) -> Result<Vec<StageResult>> {
        let mut results = Vec::with_capacity(self.config.stages.len());
        for index in 0..self.config.stages.len() {
            results.push(self.run_index(index)?);
        }
        Ok(results)
    }

    /// Run a single stage, seeding it from whatever the store holds.
    pub fn run_stage(&mut self, name: &str) -> Result<StageResult> {
        let index = self
            .config
            .stages
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| ConfigError::UnknownStage(name.to_string()))?;
        self.run_index(index)
    }

    fn run_index(&mut self, index: usize) -> Result<StageResult> {
        profiling::scope!("run_stage");
        let stage_config = &self.config.stages[index];
        let seed_name = self.config.seed_of(index)?;
        let seed_values = match &seed_name {
            Some(snapshot) => {
                info!(stage = %stage_config.name, %snapshot, "loading seed snapshot");
                Some(
                    self.store
                        .load(snapshot)
                        .map_err(|source| Error::Snapshot {
                            stage: stage_config.name.clone(),
                            snapshot: snapshot.clone(),
                            source,
                        })?,
                )
            }
            None => None,
        };
        let seed = seed_name
            .as_deref()
            .zip(seed_values.as_deref())
            .map(|(snapshot, values)| Seed { snapshot, values });

        let stage = Stage::build(stage_config, seed, self.config.chunk_size)?;
        let result = stage.run(&self.config.integrator)?;

        let snapshot = result.snapshot();
        info!(stage = %result.stage, len = snapshot.len(), "saving snapshot");
        self.store
            .save(&result.stage, snapshot)
            .map_err(|source| Error::Snapshot {
                stage: result.stage.clone(),
                snapshot: result.stage.clone(),
                source,
            })?;
        Ok(result)
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use crate::config::{LayerConfig, StageConfig};
    use crate::error::PersistenceError;
    use crate::material::Material;
    use crate::snapshot::MemoryStore;

    fn small() -> PipelineConfig {
        let first = StageConfig {
            name: "first".to_string(),
            layers: vec![
                LayerConfig::new("water", 0.01, 10, Material::water(), Some(203.0)),
                LayerConfig::new("air", 0.03, 20, Material::air(), None),
            ],
            duration: 0.5,
            output_times: vec![],
            reuse_prefix_length: None,
            seed_snapshot: None,
            ambient_temperature: 293.0,
            persist_prefix_length: Some(10),
            report_ranges: vec![],
        };
        let second = StageConfig {
            name: "second".to_string(),
            layers: vec![
                LayerConfig::new("water", 0.01, 10, Material::water(), None),
                LayerConfig::new("coffee", 0.02, 10, Material::water(), Some(338.0)),
                LayerConfig::new("air", 0.04, 20, Material::air(), None),
            ],
            duration: 0.5,
            output_times: vec![],
            reuse_prefix_length: Some(10),
            seed_snapshot: None,
            ambient_temperature: 293.0,
            persist_prefix_length: None,
            report_ranges: vec![],
        };
        PipelineConfig {
            stages: vec![first, second],
            integrator: Default::default(),
            chunk_size: 4,
        }
    }

    #[test]
    fn chains_snapshots() {
        let mut pipeline = Pipeline::new(small(), MemoryStore::new()).unwrap();
        let results = pipeline.run().unwrap();
        assert_eq!(results.len(), 2);

        let handed = pipeline.store().load("first").unwrap();
        assert_eq!(handed.len(), 10);
        assert_eq!(handed.as_slice(), results[0].snapshot());
        assert_eq!(&results[1].profiles[0].as_slice()[..10], handed.as_slice());
        assert_eq!(pipeline.store().load("second").unwrap().len(), 40);
    }

    #[test]
    fn single_stage_needs_its_seed() {
        let mut pipeline = Pipeline::new(small(), MemoryStore::new()).unwrap();
        match pipeline.run_stage("second").unwrap_err() {
            Error::Snapshot {
                stage,
                snapshot,
                source: PersistenceError::Missing(_),
            } => {
                assert_eq!(stage, "second");
                assert_eq!(snapshot, "first");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            pipeline.run_stage("third"),
            Err(Error::Config(ConfigError::UnknownStage(_)))
        ));

        pipeline.run_stage("first").unwrap();
        pipeline.run_stage("second").unwrap();
    }
}
