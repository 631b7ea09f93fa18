//! Error types for tractscore.
//!
//! Library crates use [`TractScoreError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all tractscore operations.
#[derive(Debug, thiserror::Error)]
pub enum TractScoreError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A dataset selector matched no registered descriptor.
    #[error("config error: unknown dataset `{name}`")]
    UnknownDataset { name: String },

    /// A data invariant (e.g. tract id uniqueness) was violated.
    #[error("data integrity error: {message}")]
    DataIntegrity { message: String },

    /// A stage of one dataset's pipeline unit failed.
    #[error("dataset `{dataset}` failed during {stage}: {source}")]
    Job {
        dataset: String,
        stage: String,
        source: Box<TractScoreError>,
    },

    /// Network/HTTP error while fetching a data source.
    #[error("network error: {0}")]
    Network(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Tabular input parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Stage ordering or artifact validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Workbook or archive encoding error.
    #[error("artifact error: {0}")]
    Artifact(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TractScoreError>;

impl TractScoreError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a data integrity error from any displayable message.
    pub fn data_integrity(msg: impl Into<String>) -> Self {
        Self::DataIntegrity {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attribute an error to one stage of one dataset's job.
    pub fn job(dataset: impl Into<String>, stage: impl Into<String>, source: TractScoreError) -> Self {
        Self::Job {
            dataset: dataset.into(),
            stage: stage.into(),
            source: Box::new(source),
        }
    }

    /// Whether this is a configuration error, looking through job wrappers.
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Config { .. } | Self::UnknownDataset { .. } => true,
            Self::Job { source, .. } => source.is_configuration(),
            _ => false,
        }
    }

    /// Whether this is a data integrity error, looking through job wrappers.
    pub fn is_data_integrity(&self) -> bool {
        match self {
            Self::DataIntegrity { .. } => true,
            Self::Job { source, .. } => source.is_data_integrity(),
            _ => false,
        }
    }
}
