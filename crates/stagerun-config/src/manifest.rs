//! Build manifest parsing.
//!
//! A manifest is a KDL document with one node per section:
//!
//! ```kdl
//! environment {
//!     global {
//!         PYTHONUNBUFFERED "1"
//!     }
//!     matrix fast-finish=#true {
//!         entry {
//!             PYTHON "C:\\Miniconda36-x64"
//!             PYTHON_VERSION "3.6"
//!             PYTHON_ARCH "64"
//!         }
//!         axis "HDF5_VERSION" "1.8" "1.10"
//!         exclude {
//!             HDF5_VERSION "1.8"
//!         }
//!     }
//! }
//!
//! install {
//!     run "choco install miniconda3" unless-exists="${env.PYTHON}"
//!     run "python -m pip install --upgrade pip setuptools"
//! }
//! build_script { run "dir" }
//! test_script { run "python main.py" }
//! after_test { run "dir" }
//!
//! notifications {
//!     webhook "https://hooks.example.com/build" on-status-change=#true
//! }
//! ```

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};
use stagerun_core::environment::MatrixEntry;
use stagerun_core::notify::NotificationFilter;
use stagerun_core::stage::{Command, Shell, StageKind, StagePlan};
use std::collections::HashSet;
use std::path::Path;

/// A parsed build manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildManifest {
    /// Variables shared by every job.
    pub global: Vec<(String, String)>,
    pub matrix: MatrixConfig,
    /// Commands of each stage.
    pub plan: StagePlan,
    pub notifications: Vec<WebhookConfig>,
}

/// The `environment.matrix` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Explicitly listed entries.
    pub entries: Vec<MatrixEntry>,
    /// Axes crossed with the entries, in declaration order.
    pub axes: Vec<(String, Vec<String>)>,
    /// Partial entries; a combination matching all of one exclude's variables is dropped.
    pub excludes: Vec<MatrixEntry>,
    /// Stop starting jobs once one has failed.
    pub fast_finish: bool,
}

/// A webhook from the `notifications` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Target URL, may contain variables.
    pub url: String,
    pub filter: NotificationFilter,
    /// Key for signing the request body.
    pub secret: Option<String>,
}

/// Read and parse a manifest file.
pub fn load_manifest(path: impl AsRef<Path>) -> ConfigResult<BuildManifest> {
    let content = std::fs::read_to_string(path.as_ref())?;
    parse_manifest(&content)
}

/// Parse a build manifest from KDL text.
pub fn parse_manifest(kdl: &str) -> ConfigResult<BuildManifest> {
    let doc: KdlDocument = kdl.parse()?;

    let mut manifest = BuildManifest::default();
    let mut seen = HashSet::new();

    for node in doc.nodes() {
        let section = node.name().value();
        let is_known = matches!(
            section,
            "environment"
                | "init"
                | "install"
                | "build_script"
                | "test_script"
                | "after_test"
                | "notifications"
        );
        if is_known && !seen.insert(section) {
            return Err(ConfigError::Duplicate(format!("section '{}'", section)));
        }

        match section {
            "environment" => parse_environment(node, &mut manifest)?,
            "notifications" => manifest.notifications = parse_notifications(node)?,
            _ => {
                if let Some(stage) = stage_for_section(section) {
                    let commands = parse_commands(node, stage)?;
                    if let Some(slot) = manifest.plan.commands_mut(stage) {
                        *slot = commands;
                    }
                } else {
                    tracing::debug!(section = %section, "Ignoring unknown manifest section");
                }
            }
        }
    }

    Ok(manifest)
}

fn stage_for_section(section: &str) -> Option<StageKind> {
    StageKind::COMMAND_STAGES
        .into_iter()
        .find(|stage| stage.manifest_key() == section)
}

fn parse_environment(node: &KdlNode, manifest: &mut BuildManifest) -> ConfigResult<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };

    for child in children.nodes() {
        match child.name().value() {
            "global" => {
                let vars = parse_variable_block(child, "environment.global")?;
                manifest.global = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
            }
            "matrix" => manifest.matrix = parse_matrix(child)?,
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "environment".to_string(),
                    message: format!("unknown node '{}'", other),
                });
            }
        }
    }

    Ok(())
}

fn parse_matrix(node: &KdlNode) -> ConfigResult<MatrixConfig> {
    let mut matrix = MatrixConfig {
        fast_finish: get_bool_prop(node, "fast-finish").unwrap_or(false),
        ..Default::default()
    };

    let Some(children) = node.children() else {
        return Ok(matrix);
    };

    for child in children.nodes() {
        match child.name().value() {
            "entry" => {
                let entry = parse_variable_block(child, "matrix entry")?;
                if entry.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "matrix entry".to_string(),
                        message: "entry defines no variables".to_string(),
                    });
                }
                matrix.entries.push(entry);
            }
            "axis" => {
                let mut args = get_all_value_args(child).into_iter();
                let name = args
                    .next()
                    .ok_or_else(|| ConfigError::MissingField("axis name".to_string()))?;
                let values: Vec<String> = args.collect();
                if values.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: format!("axis '{}'", name),
                        message: "axis has no values".to_string(),
                    });
                }
                if matrix.axes.iter().any(|(existing, _)| *existing == name) {
                    return Err(ConfigError::Duplicate(format!("axis '{}'", name)));
                }
                matrix.axes.push((name, values));
            }
            "exclude" => {
                matrix.excludes.push(parse_variable_block(child, "matrix exclude")?);
            }
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "matrix".to_string(),
                    message: format!("unknown node '{}'", other),
                });
            }
        }
    }

    Ok(matrix)
}

/// Children of the form `NAME "value"`.
fn parse_variable_block(node: &KdlNode, field: &str) -> ConfigResult<MatrixEntry> {
    let mut vars = MatrixEntry::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value().to_string();
            let value = get_first_value_arg(child).ok_or_else(|| ConfigError::InvalidValue {
                field: field.to_string(),
                message: format!("variable '{}' has no value", key),
            })?;
            vars.set(key, value);
        }
    }
    Ok(vars)
}

fn parse_commands(node: &KdlNode, stage: StageKind) -> ConfigResult<Vec<Command>> {
    let mut commands = Vec::new();

    let Some(children) = node.children() else {
        return Ok(commands);
    };

    for child in children.nodes() {
        if child.name().value() != "run" {
            return Err(ConfigError::InvalidValue {
                field: stage.manifest_key().to_string(),
                message: format!("expected 'run', found '{}'", child.name().value()),
            });
        }

        let script = get_first_string_arg(child).ok_or_else(|| {
            ConfigError::MissingField(format!("command for '{}'", stage.manifest_key()))
        })?;

        let shell = match get_string_prop(child, "shell") {
            Some(name) => Shell::parse(&name).ok_or_else(|| ConfigError::InvalidValue {
                field: "shell".to_string(),
                message: format!("unknown shell: {}", name),
            })?,
            None => Shell::default(),
        };

        commands.push(Command {
            script,
            shell,
            unless_exists: get_string_prop(child, "unless-exists"),
        });
    }

    Ok(commands)
}

fn parse_notifications(node: &KdlNode) -> ConfigResult<Vec<WebhookConfig>> {
    let mut hooks = Vec::new();

    let Some(children) = node.children() else {
        return Ok(hooks);
    };

    for child in children.nodes() {
        match child.name().value() {
            "webhook" => {
                let url = get_first_string_arg(child)
                    .or_else(|| get_string_prop(child, "url"))
                    .ok_or_else(|| ConfigError::MissingField("webhook url".to_string()))?;

                // URLs with variables are checked after interpolation.
                if !url.contains("${") {
                    validate_url(&url)?;
                }

                let defaults = NotificationFilter::default();
                hooks.push(WebhookConfig {
                    url,
                    filter: NotificationFilter {
                        on_success: get_bool_prop(child, "on-success").unwrap_or(defaults.on_success),
                        on_failure: get_bool_prop(child, "on-failure").unwrap_or(defaults.on_failure),
                        on_status_change: get_bool_prop(child, "on-status-change")
                            .unwrap_or(defaults.on_status_change),
                    },
                    secret: get_string_prop(child, "secret"),
                });
            }
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "notifications".to_string(),
                    message: format!("unknown provider: {}", other),
                });
            }
        }
    }

    Ok(hooks)
}

/// Check that a webhook URL is absolute http(s).
pub fn validate_url(raw: &str) -> ConfigResult<url::Url> {
    let parsed = url::Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        field: "webhook url".to_string(),
        message: format!("{}: {}", raw, e),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(ConfigError::InvalidValue {
            field: "webhook url".to_string(),
            message: format!("unsupported scheme: {}", scheme),
        }),
    }
}

// Helper functions for extracting values from KDL nodes

fn value_to_string(value: &KdlValue) -> Option<String> {
    if let Some(s) = value.as_string() {
        Some(s.to_string())
    } else if let Some(i) = value.as_integer() {
        Some(i.to_string())
    } else if let Some(f) = value.as_float() {
        Some(f.to_string())
    } else {
        value.as_bool().map(|b| b.to_string())
    }
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_value_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| value_to_string(e.value()))
}

fn get_all_value_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| value_to_string(e.value()))
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}
