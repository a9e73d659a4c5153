//! Build history access.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::job::BuildOutcome;

/// Status of a build as reported by the history API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
    Queued,
    Starting,
    Running,
    Success,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl BuildState {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            BuildState::Success | BuildState::Failed | BuildState::Cancelled
        )
    }

    /// Outcome of a finished build.
    pub fn outcome(self) -> Option<BuildOutcome> {
        match self {
            BuildState::Success => Some(BuildOutcome::Success),
            BuildState::Failed | BuildState::Cancelled => Some(BuildOutcome::Failure),
            _ => None,
        }
    }
}

/// One build in the project's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub build_number: u64,
    pub pull_request: Option<u64>,
    pub branch: Option<String>,
    pub state: BuildState,
}

/// Read access to the project's recent builds.
#[async_trait]
pub trait BuildHistory: Send + Sync {
    /// Most recent builds, newest first.
    async fn recent_builds(&self) -> Result<Vec<BuildRecord>>;
}
