//! Command runners for stagerun.
//!
//! Provides runner implementations for stage commands:
//! - Local shell processes

pub mod shell;

pub use shell::LocalShellRunner;
pub use stagerun_core::executor::{
    CommandHandle, CommandResult, CommandRunner, CommandSpec, LogLine, LogStream,
};
