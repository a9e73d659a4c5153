//! Build notifications.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::BuildOutcome;
use crate::{Result, RunId};

/// Kind of event a notifier can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Failure,
    StatusChanged,
}

impl From<BuildOutcome> for NotificationKind {
    fn from(outcome: BuildOutcome) -> Self {
        match outcome {
            BuildOutcome::Success => NotificationKind::Success,
            BuildOutcome::Failure => NotificationKind::Failure,
        }
    }
}

/// Which event kinds a notifier wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationFilter {
    pub on_success: bool,
    pub on_failure: bool,
    pub on_status_change: bool,
}

impl Default for NotificationFilter {
    fn default() -> Self {
        Self {
            on_success: true,
            on_failure: true,
            on_status_change: false,
        }
    }
}

impl NotificationFilter {
    pub fn accepts(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::Success => self.on_success,
            NotificationKind::Failure => self.on_failure,
            NotificationKind::StatusChanged => self.on_status_change,
        }
    }
}

/// Payload delivered to notifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub outcome: BuildOutcome,
    /// Outcome of the previous build, set for status changes.
    pub previous_outcome: Option<BuildOutcome>,
    pub job_id: RunId,
    pub job_number: usize,
    pub job_name: String,
    pub build_number: Option<u64>,
    pub pull_request: Option<u64>,
    pub account: Option<String>,
    pub project: Option<String>,
    /// Human readable summary of the job status.
    pub message: String,
    pub finished_at: DateTime<Utc>,
}

/// Delivers notification events.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> String;

    /// Whether this notifier wants events of `kind`.
    fn accepts(&self, kind: NotificationKind) -> bool {
        let _ = kind;
        true
    }

    async fn notify(&self, event: &NotificationEvent) -> Result<()>;
}
