use crate::config::PipelineConfig;
use crate::error::{ConfigError, Error, Result};
use crate::pipeline::Pipeline;
use crate::report;
use crate::snapshot::NpyStore;
use crate::stage::StageResult;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    /// Chilled steel sphere cooled in air, then soaked in espresso.
    Espresso,
}

/// Layered sphere heat diffusion
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Pipeline configuration (JSON). Overrides --preset.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Built-in pipeline used when no configuration file is given.
    #[arg(long, value_enum, default_value_t = Preset::Espresso)]
    pub preset: Preset,

    /// Directory holding `<stage>.npy` snapshots, will be created.
    #[arg(short, long, default_value = "snapshots")]
    pub snapshot_dir: PathBuf,

    /// Run only this stage, seeding it from the snapshot directory.
    #[arg(long)]
    pub stage: Option<String>,

    /// Write one `<stage>.csv` per stage into this directory.
    #[arg(long)]
    pub csv_dir: Option<PathBuf>,

    /// The number of threads to use, rayon's default when absent.
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Chunk size to use for parallelism, overrides the configuration.
    #[arg(short, long)]
    pub chunk_size: Option<usize>,

    /// Log level when RUST_LOG is not set (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Write the resolved configuration to this file and exit.
    #[arg(long)]
    pub write_config: Option<PathBuf>,
}

impl Args {
    /// Configuration file or preset, with command line overrides applied.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => {
                info!(?path, "loading configuration");
                PipelineConfig::from_file(path)?
            }
            None => match self.preset {
                Preset::Espresso => PipelineConfig::espresso(),
            },
        };
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn init_thread_pool(&self) -> Result<()> {
        let Some(threads) = self.threads else {
            return Ok(());
        };
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| ConfigError::InvalidValue {
                key: "threads",
                value: threads.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Everything the binary does after logging is set up.
    pub fn execute(&self) -> Result<Vec<StageResult>> {
        self.init_thread_pool()?;
        let config = self.pipeline_config()?;

        if let Some(path) = &self.write_config {
            config.to_file(path)?;
            info!(?path, "configuration written");
            return Ok(Vec::new());
        }

        let mut pipeline = Pipeline::new(config, NpyStore::new(&self.snapshot_dir))?;
        let results = match &self.stage {
            Some(name) => vec![pipeline.run_stage(name)?],
            None => pipeline.run()?,
        };

        for result in &results {
            info!("{}", result.summary());
            if let Some(dir) = &self.csv_dir {
                report::write_csv_file(result, dir).map_err(|source| Error::Output {
                    path: dir.clone(),
                    source,
                })?;
            }
        }
        Ok(results)
    }
}
