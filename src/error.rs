use std::path::PathBuf;
use thiserror::Error;

use crate::integrator::IntegrationError;

/// Top-level error type for stage construction and pipeline runs.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// The integrator rejected a stage request that passed configuration checks.
    #[error("stage '{stage}': {source}")]
    Integration {
        stage: String,
        #[source]
        source: IntegrationError,
    },

    #[error("stage '{stage}' failed to converge, furthest time reached t = {t_reached}: {source}")]
    Convergence {
        stage: String,
        t_reached: f64,
        #[source]
        source: IntegrationError,
    },

    #[error("stage '{stage}' depends on snapshot '{snapshot}': {source}")]
    Snapshot {
        stage: String,
        snapshot: String,
        #[source]
        source: PersistenceError,
    },

    #[error("stage '{stage}' reuses {required} points of snapshot '{snapshot}', which only has {available}")]
    SnapshotTooShort {
        stage: String,
        snapshot: String,
        required: usize,
        available: usize,
    },

    #[error("failed to write {path:?}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors detected while validating a mesh, material table or stage recipe.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("layer {layer}: outer radius {radius} must be finite and greater than {previous}")]
    NonIncreasingRadius {
        layer: usize,
        radius: f64,
        previous: f64,
    },

    #[error("layer {layer}: needs at least 2 points, got {point_count}")]
    TooFewPoints { layer: usize, point_count: usize },

    #[error("no layers configured")]
    NoLayers,

    #[error("layer {layer}: {reason}")]
    InvalidMaterial { layer: usize, reason: String },

    #[error("{what}: expected length {expected}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("material layers do not partition the mesh: {0}")]
    BrokenPartition(String),

    #[error("invalid time configuration: {0}")]
    InvalidTimes(String),

    #[error("reuse prefix of {requested} points exceeds the {available} mesh points")]
    ReusePrefixTooLong { requested: usize, available: usize },

    #[error("stage '{0}' reuses a snapshot but has no stage before it and no seed_snapshot")]
    NoSeedSource(String),

    #[error("duplicate stage name '{0}'")]
    DuplicateStage(String),

    #[error("unknown stage '{0}'")]
    UnknownStage(String),

    #[error("invalid value '{key}' = {value}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("configuration IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by snapshot stores.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot '{0}' not found")]
    Missing(String),

    #[error("snapshot '{name}' is malformed: {reason}")]
    Malformed { name: String, reason: String },

    #[error("snapshot '{name}' IO error: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience type alias for results using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
