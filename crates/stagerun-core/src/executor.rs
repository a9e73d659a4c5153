//! Command runner trait and its types.
//!
//! Runners execute the shell invocations of a stage, one at a time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::stage::Shell;
use crate::{Result, RunId};

/// A fully resolved process invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub id: RunId,
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Working directory; the runner's own directory when unset.
    pub working_dir: Option<PathBuf>,
    /// Complete set of variables added to the runner's base environment.
    pub env: HashMap<String, String>,
}

impl CommandSpec {
    /// Hand `script` to `shell`.
    pub fn shell(shell: Shell, script: impl Into<String>) -> Self {
        let (program, leading) = shell.invocation();
        let mut args: Vec<String> = leading.iter().map(|a| a.to_string()).collect();
        args.push(script.into());
        Self {
            id: RunId::new(),
            program: program.to_string(),
            args,
            working_dir: None,
            env: HashMap::new(),
        }
    }

    /// The script text when this spec came from [`CommandSpec::shell`].
    pub fn script(&self) -> &str {
        self.args.last().map(String::as_str).unwrap_or_default()
    }
}

/// Handle to a spawned command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandHandle {
    pub id: RunId,
    /// OS process id, when the runner has one.
    pub pid: Option<u32>,
    /// Name of the runner that owns the process.
    pub runner_name: String,
}

/// Result of a finished command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A line of command output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Trait for command runners.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Name of this runner.
    fn name(&self) -> &'static str;

    /// Start a command.
    async fn spawn(&self, spec: CommandSpec) -> Result<CommandHandle>;

    /// Output of a spawned command. The stream ends when the process closes its output.
    async fn logs(&self, handle: &CommandHandle) -> Result<BoxStream<'static, LogLine>>;

    /// Wait for a command to exit.
    async fn wait(&self, handle: &CommandHandle) -> Result<CommandResult>;
}
