use std::path::PathBuf;

use thiserror::Error;

/// Rejected settings. Raised by `RelaxCalc` construction, before any
/// structure conversion or energy evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Optimizer cannot be None")]
    MissingOptimizer,

    #[error("Unknown optimizer '{0}' (expected one of: {known})", known = crate::solvers::optimizer_names().join(", "))]
    UnknownOptimizer(String),

    #[error("Trajectory interval must be a positive integer")]
    InvalidInterval,

    #[error("fmax must be finite and non-negative, got {0}")]
    InvalidFmax(f64),

    #[error("Cell factor must be finite and positive, got {0}")]
    InvalidCellFactor(f64),
}

#[derive(Error, Debug)]
pub enum RelaxError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The input could not be adapted to (or from) the native representation.
    #[error("Structure conversion failed: {0}")]
    Conversion(#[source] anyhow::Error),

    /// Passed through untouched from the energy model.
    #[error(transparent)]
    Calculator(anyhow::Error),

    #[error("No calculator is attached to the atoms")]
    NoCalculator,

    #[error("Optimizer breakdown: {0}")]
    Optimizer(String),

    #[error("Trajectory I/O failed: {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Trajectory serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RelaxError>;
