//! Variable interpolation for build manifests.
//!
//! Supports variables like:
//! - `${env.NAME}` - Job variable, falling back to the runner's process environment
//! - `${matrix.NAME}` - Variable of the job's matrix entry
//! - `${build.number}` - Build number
//! - `${build.pull_request}` - Pull request number (empty outside pull requests)
//! - `${build.account}` - Account name
//! - `${build.project}` - Project slug
//! - `${build.branch}` - Branch being built
//! - `${job.number}` - Position of the job in the matrix
//! - `${job.name}` - Job name
//! - `${stage.name}` - Current stage name
//! - `${timestamp}` - Unix timestamp
//! - `${date}` - ISO date (YYYY-MM-DD)
//! - `${datetime}` - ISO datetime

use regex::Regex;
use stagerun_core::environment::{BuildContext, BuildEnvironment};
use stagerun_core::stage::StageKind;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Variables available for interpolation within one job.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    /// Variables exported to the job's commands.
    pub env: HashMap<String, String>,
    /// Runner process environment, consulted after `env`.
    pub process_env: HashMap<String, String>,
    /// The job's matrix entry.
    pub matrix: HashMap<String, String>,
    pub build: BuildContext,
    pub job_number: usize,
    pub job_name: String,
    pub stage: Option<StageKind>,
}

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for one job. Does not read the process environment.
    pub fn for_environment(environment: &BuildEnvironment) -> Self {
        Self {
            env: environment.variables(),
            process_env: HashMap::new(),
            matrix: environment
                .matrix
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            build: environment.context.clone(),
            job_number: environment.job_number,
            job_name: environment.job_name.clone(),
            stage: None,
        }
    }

    /// Make the runner's process environment visible through `${env.*}`.
    pub fn populate_process_env(&mut self) {
        self.process_env = std::env::vars().collect();
    }

    pub fn with_stage(mut self, stage: StageKind) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["env", name] => self
                .env
                .get(*name)
                .or_else(|| self.process_env.get(*name))
                .cloned(),
            ["matrix", name] => self.matrix.get(*name).cloned(),

            ["build", "number"] => self.build.build_number.map(|n| n.to_string()),
            ["build", "pull_request"] => Some(
                self.build
                    .pull_request
                    .map(|n| n.to_string())
                    .unwrap_or_default(),
            ),
            ["build", "account"] => self.build.account.clone(),
            ["build", "project"] => self.build.project.clone(),
            ["build", "branch"] => self.build.branch.clone(),

            ["job", "number"] => Some(self.job_number.to_string()),
            ["job", "name"] => Some(self.job_name.clone()),

            ["stage", "name"] => self.stage.map(|s| s.to_string()),

            ["timestamp"] => Some(chrono::Utc::now().timestamp().to_string()),
            ["date"] => Some(chrono::Utc::now().format("%Y-%m-%d").to_string()),
            ["datetime"] => Some(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),

            _ => None,
        }
    }

    /// Interpolate all variables in a string.
    /// Unknown variables are left as written.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// Names of variables in `input` that do not resolve.
    pub fn unresolved(&self, input: &str) -> Vec<String> {
        VAR_REGEX
            .captures_iter(input)
            .filter(|caps| self.resolve(&caps[1]).is_none())
            .map(|caps| caps[1].to_string())
            .collect()
    }
}
