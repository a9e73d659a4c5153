//! Local shell runner implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use stagerun_core::executor::*;
use stagerun_core::{Error, Result, RunId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

const LOG_BUFFER: usize = 256;

struct RunningProcess {
    child: Child,
    logs: Option<mpsc::Receiver<LogLine>>,
    started_at: DateTime<Utc>,
}

/// Runs commands as child processes of the orchestrator.
///
/// Children inherit the orchestrator's environment; the variables of the
/// [`CommandSpec`] are added on top.
pub struct LocalShellRunner {
    working_dir: Option<PathBuf>,
    processes: Mutex<HashMap<RunId, RunningProcess>>,
}

impl LocalShellRunner {
    pub fn new() -> Self {
        Self {
            working_dir: None,
            processes: Mutex::new(HashMap::new()),
        }
    }

    /// Run commands in `working_dir` unless a spec names its own.
    pub fn with_working_dir(working_dir: PathBuf) -> Self {
        Self {
            working_dir: Some(working_dir),
            processes: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for LocalShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward lines of one output pipe until it closes.
///
/// Keeps draining after the receiver is gone so the child never blocks on a full pipe.
fn forward_lines<R>(reader: R, stream: LogStream, tx: mpsc::Sender<LogLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(content)) => {
                    let line = LogLine {
                        timestamp: Utc::now(),
                        stream,
                        content: content.trim_end().to_string(),
                    };
                    let _ = tx.send(line).await;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Error reading command output");
                    break;
                }
            }
        }
    });
}

#[async_trait]
impl CommandRunner for LocalShellRunner {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn spawn(&self, spec: CommandSpec) -> Result<CommandHandle> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = spec.working_dir.as_ref().or(self.working_dir.as_ref()) {
            command.current_dir(dir);
        }

        debug!(program = %spec.program, args = ?spec.args, "Spawning process");

        let mut child = command.spawn().map_err(|e| {
            Error::ExecutionFailed(format!("failed to start '{}': {}", spec.program, e))
        })?;

        let (tx, rx) = mpsc::channel(LOG_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, LogStream::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, LogStream::Stderr, tx.clone());
        }
        drop(tx);

        let pid = child.id();
        info!(command_id = %spec.id, pid = ?pid, "Process started");

        self.processes.lock().await.insert(
            spec.id,
            RunningProcess {
                child,
                logs: Some(rx),
                started_at: Utc::now(),
            },
        );

        Ok(CommandHandle {
            id: spec.id,
            pid,
            runner_name: self.name().to_string(),
        })
    }

    async fn logs(&self, handle: &CommandHandle) -> Result<BoxStream<'static, LogLine>> {
        let mut processes = self.processes.lock().await;
        let process = processes
            .get_mut(&handle.id)
            .ok_or_else(|| Error::NotFound(format!("command {}", handle.id)))?;

        let rx = process.logs.take().ok_or_else(|| {
            Error::InvalidInput(format!("logs of command {} already taken", handle.id))
        })?;

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    /// Output not taken through [`CommandRunner::logs`] before this call is discarded.
    async fn wait(&self, handle: &CommandHandle) -> Result<CommandResult> {
        let process = self
            .processes
            .lock()
            .await
            .remove(&handle.id)
            .ok_or_else(|| Error::NotFound(format!("command {}", handle.id)))?;

        let RunningProcess {
            mut child,
            logs,
            started_at,
        } = process;
        drop(logs);

        let status = child
            .wait()
            .await
            .map_err(|e| Error::ExecutionFailed(format!("failed to wait for command: {}", e)))?;

        let exit_code = status.code();
        debug!(command_id = %handle.id, exit_code = ?exit_code, "Process exited");

        Ok(CommandResult {
            exit_code,
            started_at,
            finished_at: Utc::now(),
        })
    }
}
