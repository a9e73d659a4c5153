//! Manifest and settings errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("manifest is not valid KDL: {0}")]
    Parse(#[from] kdl::KdlError),

    #[error("manifest is missing {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("{0} is defined more than once")]
    Duplicate(String),

    #[error("cannot read manifest: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
