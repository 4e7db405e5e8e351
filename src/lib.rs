//! Radial heat diffusion through concentric spherical layers.

pub mod cli;
pub mod config;
pub mod error;
pub mod integrator;
pub mod material;
pub mod mesh;
pub mod operator;
pub mod par_slice;
pub mod pipeline;
pub mod profile;
pub mod report;
pub mod snapshot;
pub mod stage;

pub use num_traits::{Num, One, Zero};

/// Element types usable with the parallel slice helpers.
pub trait NumTrait: Num + Copy + Send + Sync {}
impl<T: Num + Copy + Send + Sync> NumTrait for T {}

pub use config::{LayerConfig, PipelineConfig, ReportRange, StageConfig};
pub use error::{ConfigError, Error, PersistenceError, Result};
pub use integrator::{integrate, IntegrationError, IntegratorOptions, OdeSystem, Trajectory};
pub use material::{Material, MaterialTable};
pub use mesh::{MeshSegment, RadialMesh};
pub use operator::DiffusionOperator;
pub use pipeline::Pipeline;
pub use profile::TemperatureProfile;
pub use snapshot::{MemoryStore, NpyStore, SnapshotStore};
pub use stage::{Stage, StageResult};
