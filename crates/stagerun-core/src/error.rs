//! Error types for stagerun.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("build history unavailable: {0}")]
    History(String),

    #[error("notification failed: {0}")]
    Notification(String),
}

pub type Result<T> = std::result::Result<T, Error>;
