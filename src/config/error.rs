//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Configuration file not found, searched: {searched:?}")]
    ConfigFileNotFound { searched: Vec<PathBuf> },

    #[error("Failed to read configuration file {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in {path}: {message}")]
    InvalidYaml { path: String, message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Invalid engine: {0} (expected lsf, pbs, slurm or unix)")]
    InvalidEngine(String),
}

impl ConfigurationError {
    pub fn config_file_not_found(searched: Vec<PathBuf>) -> Self {
        Self::ConfigFileNotFound { searched }
    }

    pub fn file_read_error(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_yaml(path: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidYaml {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;
