//! The immutable environment a build job runs with.
//!
//! Nothing a stage does can change it: every command receives its variables
//! from this descriptor instead of from mutated process state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Variables of one build matrix entry, kept in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixEntry {
    vars: Vec<(String, String)>,
}

impl MatrixEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable, replacing an earlier value with the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.vars.iter_mut().find(|(k, _)| *k == name) {
            Some((_, v)) => *v = value,
            None => self.vars.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Human readable label, e.g. `PYTHON_VERSION=3.6, PYTHON_ARCH=64`.
    pub fn label(&self) -> String {
        self.vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Identification of the build this job belongs to, taken from the host CI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    pub build_number: Option<u64>,
    pub pull_request: Option<u64>,
    pub account: Option<String>,
    pub project: Option<String>,
    pub branch: Option<String>,
}

/// Everything one job needs to know about where and how it runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildEnvironment {
    /// Position of this job in the expanded matrix (1-based).
    pub job_number: usize,
    /// Display name of the job.
    pub job_name: String,
    /// Variables shared by every job of the manifest.
    pub global: Vec<(String, String)>,
    /// This job's matrix entry.
    pub matrix: MatrixEntry,
    /// The build this job is part of.
    pub context: BuildContext,
}

impl BuildEnvironment {
    /// Variables exported to every command of the job.
    ///
    /// Matrix values take precedence over global ones; the `STAGERUN_*`
    /// context variables are always present.
    pub fn variables(&self) -> HashMap<String, String> {
        let mut vars: HashMap<String, String> = self.global.iter().cloned().collect();
        for (k, v) in self.matrix.iter() {
            vars.insert(k.to_string(), v.to_string());
        }

        vars.insert("CI".to_string(), "true".to_string());
        vars.insert("STAGERUN".to_string(), "true".to_string());
        vars.insert("STAGERUN_JOB_NUMBER".to_string(), self.job_number.to_string());
        vars.insert("STAGERUN_JOB_NAME".to_string(), self.job_name.clone());

        if let Some(number) = self.context.build_number {
            vars.insert("STAGERUN_BUILD_NUMBER".to_string(), number.to_string());
        }
        if let Some(pr) = self.context.pull_request {
            vars.insert("STAGERUN_PULL_REQUEST_NUMBER".to_string(), pr.to_string());
        }
        if let Some(account) = &self.context.account {
            vars.insert("STAGERUN_ACCOUNT_NAME".to_string(), account.clone());
        }
        if let Some(project) = &self.context.project {
            vars.insert("STAGERUN_PROJECT_SLUG".to_string(), project.clone());
        }
        if let Some(branch) = &self.context.branch {
            vars.insert("STAGERUN_REPO_BRANCH".to_string(), branch.clone());
        }

        vars
    }
}
