//! Job orchestration for stagerun.
//!
//! Runs each build job through its fixed stage sequence and dispatches the
//! jobs of a build matrix.

pub mod matrix_runner;
pub mod orchestrator;
pub mod supersede;

#[cfg(test)]
pub(crate) mod testing;

pub use matrix_runner::{MatrixResult, MatrixRunner};
pub use orchestrator::{JobEvent, JobOrchestrator};
