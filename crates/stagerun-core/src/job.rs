//! Build jobs and their outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::RunId;
use crate::environment::BuildEnvironment;
use crate::stage::{StageKind, StagePlan};

/// One job of the expanded build matrix.
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub id: RunId,
    pub environment: Arc<BuildEnvironment>,
    pub plan: Arc<StagePlan>,
}

impl BuildJob {
    pub fn new(environment: BuildEnvironment, plan: Arc<StagePlan>) -> Self {
        Self {
            id: RunId::new(),
            environment: Arc::new(environment),
            plan,
        }
    }

    pub fn name(&self) -> &str {
        &self.environment.job_name
    }

    pub fn number(&self) -> usize {
        self.environment.job_number
    }
}

/// How a stage ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageState {
    Succeeded,
    Failed { message: String },
    Skipped { reason: String },
}

impl StageState {
    pub fn is_success(&self) -> bool {
        matches!(self, StageState::Succeeded)
    }
}

/// Final status of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Succeeded,
    /// A command stage failed; later command stages were skipped.
    Failed { stage: StageKind, message: String },
    /// A newer build for the same pull request exists.
    Superseded { newer_build: u64 },
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Succeeded)
    }

    pub fn outcome(&self) -> BuildOutcome {
        if self.is_success() {
            BuildOutcome::Success
        } else {
            BuildOutcome::Failure
        }
    }
}

/// Pass/fail as reported to the host and to webhooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildOutcome {
    Success,
    Failure,
}

/// Everything known about a finished job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub id: RunId,
    pub number: usize,
    pub name: String,
    pub status: JobStatus,
    /// State of every stage that was reached or skipped, in execution order.
    pub stages: Vec<(StageKind, StageState)>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    pub fn stage_state(&self, stage: StageKind) -> Option<&StageState> {
        self.stages
            .iter()
            .find(|(kind, _)| *kind == stage)
            .map(|(_, state)| state)
    }

    /// Stages whose commands actually ran, in order.
    pub fn executed_stages(&self) -> Vec<StageKind> {
        self.stages
            .iter()
            .filter(|(_, state)| matches!(state, StageState::Succeeded | StageState::Failed { .. }))
            .map(|(kind, _)| *kind)
            .collect()
    }
}
