//! Runner settings read from the host CI environment.
//!
//! Each setting is read from a `STAGERUN_*` variable first and falls back to
//! the variable AppVeyor agents export, so a manifest runs unchanged on such
//! an agent.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use stagerun_core::environment::BuildContext;

/// Default build-history API base URL.
pub const DEFAULT_HISTORY_URL: &str = "https://ci.appveyor.com/api";

/// Number of history records fetched for the supersede check.
pub const DEFAULT_HISTORY_DEPTH: u32 = 50;

/// Settings of one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    pub build_number: Option<u64>,
    pub pull_request: Option<u64>,
    pub account: Option<String>,
    pub project: Option<String>,
    pub branch: Option<String>,
    /// Base URL of the build-history API.
    pub history_url: String,
    /// Bearer token for the history API.
    pub api_token: Option<String>,
    /// History records fetched per query.
    pub history_depth: u32,
    /// Matrix jobs run concurrently by the local runner.
    pub max_parallel: usize,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            build_number: None,
            pull_request: None,
            account: None,
            project: None,
            branch: None,
            history_url: DEFAULT_HISTORY_URL.to_string(),
            api_token: None,
            history_depth: DEFAULT_HISTORY_DEPTH,
            max_parallel: 1,
        }
    }
}

impl RunnerSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| -> Option<(String, String)> {
            keys.iter().find_map(|key| {
                lookup(key)
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .map(|v| (key.to_string(), v))
            })
        };

        let defaults = Self::default();

        Ok(Self {
            build_number: parse_number(first(&["STAGERUN_BUILD_NUMBER", "APPVEYOR_BUILD_NUMBER"]))?,
            pull_request: parse_number(first(&[
                "STAGERUN_PULL_REQUEST_NUMBER",
                "APPVEYOR_PULL_REQUEST_NUMBER",
            ]))?,
            account: first(&["STAGERUN_ACCOUNT_NAME", "APPVEYOR_ACCOUNT_NAME"]).map(|(_, v)| v),
            project: first(&["STAGERUN_PROJECT_SLUG", "APPVEYOR_PROJECT_SLUG"]).map(|(_, v)| v),
            branch: first(&["STAGERUN_REPO_BRANCH", "APPVEYOR_REPO_BRANCH"]).map(|(_, v)| v),
            history_url: first(&["STAGERUN_HISTORY_URL", "APPVEYOR_API_URL"])
                .map(|(_, v)| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.history_url),
            api_token: first(&["STAGERUN_API_TOKEN"]).map(|(_, v)| v),
            history_depth: parse_number(first(&["STAGERUN_HISTORY_DEPTH"]))?
                .unwrap_or(defaults.history_depth),
            max_parallel: parse_number::<usize>(first(&["STAGERUN_MAX_PARALLEL"]))?
                .map(|n| n.max(1))
                .unwrap_or(defaults.max_parallel),
        })
    }

    /// The build context jobs of this run carry.
    pub fn build_context(&self) -> BuildContext {
        BuildContext {
            build_number: self.build_number,
            pull_request: self.pull_request,
            account: self.account.clone(),
            project: self.project.clone(),
            branch: self.branch.clone(),
        }
    }

    /// Whether the history API can be queried for this project.
    pub fn has_history(&self) -> bool {
        self.account.is_some() && self.project.is_some()
    }
}

fn parse_number<T: std::str::FromStr>(found: Option<(String, String)>) -> ConfigResult<Option<T>> {
    match found {
        None => Ok(None),
        Some((key, raw)) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: key,
                message: format!("expected a number, found '{}'", raw),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(vars: &[(&str, &str)]) -> ConfigResult<RunnerSettings> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RunnerSettings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_environment() {
        let settings = settings_from(&[]).unwrap();
        assert_eq!(settings.build_number, None);
        assert_eq!(settings.history_url, DEFAULT_HISTORY_URL);
        assert_eq!(settings.history_depth, 50);
        assert_eq!(settings.max_parallel, 1);
        assert!(!settings.has_history());
    }

    #[test]
    fn test_appveyor_fallbacks() {
        let settings = settings_from(&[
            ("APPVEYOR_BUILD_NUMBER", "211"),
            ("APPVEYOR_PULL_REQUEST_NUMBER", "42"),
            ("APPVEYOR_ACCOUNT_NAME", "acme"),
            ("APPVEYOR_PROJECT_SLUG", "vecto"),
        ])
        .unwrap();

        assert_eq!(settings.build_number, Some(211));
        assert_eq!(settings.pull_request, Some(42));
        assert!(settings.has_history());

        let context = settings.build_context();
        assert_eq!(context.account.as_deref(), Some("acme"));
        assert_eq!(context.pull_request, Some(42));
    }

    #[test]
    fn test_stagerun_variables_win() {
        let settings = settings_from(&[
            ("STAGERUN_BUILD_NUMBER", "7"),
            ("APPVEYOR_BUILD_NUMBER", "211"),
            ("STAGERUN_HISTORY_URL", "http://localhost:8080/api/"),
        ])
        .unwrap();
        assert_eq!(settings.build_number, Some(7));
        assert_eq!(settings.history_url, "http://localhost:8080/api");
    }

    #[test]
    fn test_blank_values_are_unset() {
        let settings = settings_from(&[("APPVEYOR_PULL_REQUEST_NUMBER", "  ")]).unwrap();
        assert_eq!(settings.pull_request, None);
    }

    #[test]
    fn test_invalid_number_rejected() {
        let err = settings_from(&[("STAGERUN_BUILD_NUMBER", "abc")]).unwrap_err();
        match err {
            ConfigError::InvalidValue { field, .. } => assert_eq!(field, "STAGERUN_BUILD_NUMBER"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_max_parallel_at_least_one() {
        let settings = settings_from(&[("STAGERUN_MAX_PARALLEL", "0")]).unwrap();
        assert_eq!(settings.max_parallel, 1);
    }
}
