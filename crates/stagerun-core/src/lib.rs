//! Core domain types and traits for the stagerun build orchestrator.
//!
//! This crate contains:
//! - Run identifiers
//! - The build environment descriptor a job runs with
//! - Stage and job definitions
//! - The command runner trait and its types
//! - Build-history and notifier traits

pub mod environment;
pub mod error;
pub mod executor;
pub mod history;
pub mod id;
pub mod job;
pub mod notify;
pub mod stage;

pub use error::{Error, Result};
pub use id::RunId;
