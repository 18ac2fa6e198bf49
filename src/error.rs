//! Error types for the capture session and its boundaries.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON export failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),
}

/// Rejected session settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("capacity must be greater than 0")]
    ZeroCapacity,

    #[error("tick interval must be greater than 0")]
    ZeroTickInterval,

    #[error("payload cap must be greater than 0")]
    ZeroPayloadCap,

    #[error("payload cap {cap} exceeds the maximum of {max} bytes")]
    PayloadCapTooLarge { cap: usize, max: usize },

    #[error("payload cap {config} does not match the generator's cap {generator}")]
    PayloadCapMismatch { config: usize, generator: usize },
}

/// Failures of the external packet analysis collaborator.
///
/// These never reach the session; they are turned into a fixed display
/// string at the analysis boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("analysis credentials not found in ${0}")]
    MissingCredentials(String),

    #[error("analysis transport failed: {0}")]
    Transport(String),

    #[error("analysis returned an empty response")]
    EmptyResponse,
}

pub type Result<T> = std::result::Result<T, Error>;
