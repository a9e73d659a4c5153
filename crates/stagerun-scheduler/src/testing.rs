//! Scripted collaborators for orchestrator tests.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use stagerun_core::executor::{
    CommandHandle, CommandResult, CommandRunner, CommandSpec, LogLine, LogStream,
};
use stagerun_core::history::{BuildHistory, BuildRecord};
use stagerun_core::notify::{NotificationEvent, NotificationFilter, NotificationKind, Notifier};
use stagerun_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;

/// Runner that records scripts and exits with scripted codes (0 by default).
#[derive(Default)]
pub struct ScriptedRunner {
    exit_codes: HashMap<String, i32>,
    unspawnable: Vec<String>,
    pub calls: Mutex<Vec<CommandSpec>>,
    results: Mutex<HashMap<stagerun_core::RunId, i32>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exit_code(mut self, script: &str, code: i32) -> Self {
        self.exit_codes.insert(script.to_string(), code);
        self
    }

    pub fn unspawnable(mut self, script: &str) -> Self {
        self.unspawnable.push(script.to_string());
        self
    }

    /// Scripts run so far, in order.
    pub fn scripts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|spec| spec.script().to_string())
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn spawn(&self, spec: CommandSpec) -> Result<CommandHandle> {
        let script = spec.script().to_string();
        if self.unspawnable.contains(&script) {
            return Err(Error::ExecutionFailed(format!("no such program: {}", script)));
        }
        let code = self.exit_codes.get(&script).copied().unwrap_or(0);
        self.results.lock().unwrap().insert(spec.id, code);
        let handle = CommandHandle {
            id: spec.id,
            pid: None,
            runner_name: self.name().to_string(),
        };
        self.calls.lock().unwrap().push(spec);
        Ok(handle)
    }

    async fn logs(&self, handle: &CommandHandle) -> Result<BoxStream<'static, LogLine>> {
        let line = LogLine {
            timestamp: Utc::now(),
            stream: LogStream::Stdout,
            content: format!("output of {}", handle.id),
        };
        Ok(Box::pin(futures::stream::iter(vec![line])))
    }

    async fn wait(&self, handle: &CommandHandle) -> Result<CommandResult> {
        let code = self
            .results
            .lock()
            .unwrap()
            .remove(&handle.id)
            .ok_or_else(|| Error::NotFound(handle.id.to_string()))?;
        Ok(CommandResult {
            exit_code: Some(code),
            started_at: Utc::now(),
            finished_at: Utc::now(),
        })
    }
}

/// History returning fixed records, or failing.
pub struct StaticHistory {
    records: Option<Vec<BuildRecord>>,
    pub queries: Mutex<usize>,
}

impl StaticHistory {
    pub fn new(records: Vec<BuildRecord>) -> Self {
        Self {
            records: Some(records),
            queries: Mutex::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            records: None,
            queries: Mutex::new(0),
        }
    }
}

#[async_trait]
impl BuildHistory for StaticHistory {
    async fn recent_builds(&self) -> Result<Vec<BuildRecord>> {
        *self.queries.lock().unwrap() += 1;
        self.records
            .clone()
            .ok_or_else(|| Error::History("connection refused".to_string()))
    }
}

/// Notifier recording what it was sent.
pub struct RecordingNotifier {
    filter: NotificationFilter,
    fail: bool,
    pub received: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    pub fn new(filter: NotificationFilter) -> Self {
        Self {
            filter,
            fail: false,
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(filter: NotificationFilter) -> Self {
        Self {
            fail: true,
            ..Self::new(filter)
        }
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.received.lock().unwrap().iter().map(|e| e.kind).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> String {
        "recording".to_string()
    }

    fn accepts(&self, kind: NotificationKind) -> bool {
        self.filter.accepts(kind)
    }

    async fn notify(&self, event: &NotificationEvent) -> Result<()> {
        self.received.lock().unwrap().push(event.clone());
        if self.fail {
            Err(Error::Notification("endpoint returned 500".to_string()))
        } else {
            Ok(())
        }
    }
}
