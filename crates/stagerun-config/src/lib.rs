//! Configuration for stagerun.
//!
//! This crate handles:
//! - Build manifests (stagerun.kdl)
//! - Build matrix expansion
//! - Runner settings from the host CI environment
//! - Variable interpolation

pub mod error;
pub mod manifest;
pub mod matrix;
pub mod settings;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use manifest::{BuildManifest, MatrixConfig, WebhookConfig, load_manifest, parse_manifest};
pub use settings::RunnerSettings;
pub use variables::VariableContext;
