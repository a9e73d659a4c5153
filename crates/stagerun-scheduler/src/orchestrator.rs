//! Job orchestrator - runs the stages of one build job in their fixed order.
//!
//! A job runs init, install, build, test and after-test commands strictly in
//! sequence. The first failing command fails its stage and skips every later
//! command stage. The notify stage runs regardless and never changes the
//! job's status.

use chrono::Utc;
use futures::StreamExt;
use stagerun_config::VariableContext;
use stagerun_core::executor::{CommandRunner, CommandSpec, LogLine};
use stagerun_core::history::{BuildHistory, BuildRecord};
use stagerun_core::job::{BuildJob, BuildOutcome, JobReport, JobStatus, StageState};
use stagerun_core::notify::{NotificationEvent, NotificationKind, Notifier};
use stagerun_core::stage::{Command, StageKind};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::supersede;

/// How long output forwarding may lag behind an exited command.
const LOG_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Event emitted during job execution. `job` is the job's matrix number.
#[derive(Debug, Clone)]
pub enum JobEvent {
    JobStarted {
        job: usize,
        name: String,
    },
    Superseded {
        job: usize,
        newer_build: u64,
    },
    StageStarted {
        job: usize,
        stage: StageKind,
    },
    StageSkipped {
        job: usize,
        stage: StageKind,
        reason: String,
    },
    CommandStarted {
        job: usize,
        stage: StageKind,
        command: String,
    },
    CommandSkipped {
        job: usize,
        stage: StageKind,
        command: String,
        reason: String,
    },
    StageLog {
        job: usize,
        stage: StageKind,
        line: LogLine,
    },
    StageCompleted {
        job: usize,
        stage: StageKind,
        success: bool,
    },
    NotificationSent {
        job: usize,
        notifier: String,
        kind: NotificationKind,
    },
    NotificationFailed {
        job: usize,
        notifier: String,
        error: String,
    },
    JobCompleted {
        job: usize,
        success: bool,
    },
}

/// Runs build jobs.
#[derive(Clone)]
pub struct JobOrchestrator {
    runner: Arc<dyn CommandRunner>,
    history: Option<Arc<dyn BuildHistory>>,
    notifiers: Vec<Arc<dyn Notifier>>,
    /// Directory commands run in and relative guard paths resolve against.
    working_dir: Option<PathBuf>,
    supersede_check: bool,
}

impl JobOrchestrator {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            history: None,
            notifiers: Vec::new(),
            working_dir: None,
            supersede_check: true,
        }
    }

    pub fn with_history(mut self, history: Arc<dyn BuildHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn with_working_dir(mut self, working_dir: PathBuf) -> Self {
        self.working_dir = Some(working_dir);
        self
    }

    /// Enable or disable the pull-request supersede check (enabled by default).
    pub fn with_supersede_check(mut self, enabled: bool) -> Self {
        self.supersede_check = enabled;
        self
    }

    /// Execute a job, returning a channel of events and a handle to get the final report.
    pub fn execute(
        &self,
        job: BuildJob,
    ) -> (
        mpsc::Receiver<JobEvent>,
        tokio::task::JoinHandle<JobReport>,
    ) {
        let (tx, rx) = mpsc::channel(100);
        let orchestrator = self.clone();

        let handle = tokio::spawn(async move { orchestrator.run(&job, &tx).await });

        (rx, handle)
    }

    /// Run a job to completion, sending events to `tx`.
    pub async fn run(&self, job: &BuildJob, tx: &mpsc::Sender<JobEvent>) -> JobReport {
        let number = job.number();
        let started_at = Utc::now();

        info!(job = number, name = %job.name(), "Starting job");
        let _ = tx
            .send(JobEvent::JobStarted {
                job: number,
                name: job.name().to_string(),
            })
            .await;

        let history = self.load_history(job).await;
        let context = &job.environment.context;

        let mut stages: Vec<(StageKind, StageState)> = Vec::new();
        let mut status = JobStatus::Succeeded;

        let newer_build = if self.supersede_check {
            history
                .as_deref()
                .and_then(|records| supersede::find_newer_build(records, context))
        } else {
            None
        };

        if let Some(newer_build) = newer_build {
            warn!(
                job = number,
                newer_build, "Newer build exists for this pull request, failing early"
            );
            let _ = tx
                .send(JobEvent::Superseded {
                    job: number,
                    newer_build,
                })
                .await;
            status = JobStatus::Superseded { newer_build };
            for stage in StageKind::COMMAND_STAGES {
                stages.push((
                    stage,
                    StageState::Skipped {
                        reason: format!("superseded by build {}", newer_build),
                    },
                ));
            }
        } else {
            let mut var_ctx = VariableContext::for_environment(&job.environment);
            var_ctx.populate_process_env();
            let env = job.environment.variables();

            for (stage, commands) in job.plan.iter() {
                if let JobStatus::Failed { stage: failed, .. } = &status {
                    let reason = format!("{} stage failed", failed);
                    let _ = tx
                        .send(JobEvent::StageSkipped {
                            job: number,
                            stage,
                            reason: reason.clone(),
                        })
                        .await;
                    stages.push((stage, StageState::Skipped { reason }));
                    continue;
                }

                if commands.is_empty() {
                    stages.push((
                        stage,
                        StageState::Skipped {
                            reason: "no commands".to_string(),
                        },
                    ));
                    continue;
                }

                let _ = tx
                    .send(JobEvent::StageStarted { job: number, stage })
                    .await;

                let stage_ctx = var_ctx.clone().with_stage(stage);
                match self
                    .run_stage(number, stage, commands, &stage_ctx, &env, tx)
                    .await
                {
                    Ok(()) => {
                        info!(job = number, stage = %stage, "Stage completed successfully");
                        stages.push((stage, StageState::Succeeded));
                        let _ = tx
                            .send(JobEvent::StageCompleted {
                                job: number,
                                stage,
                                success: true,
                            })
                            .await;
                    }
                    Err(message) => {
                        error!(job = number, stage = %stage, error = %message, "Stage failed");
                        stages.push((
                            stage,
                            StageState::Failed {
                                message: message.clone(),
                            },
                        ));
                        let _ = tx
                            .send(JobEvent::StageCompleted {
                                job: number,
                                stage,
                                success: false,
                            })
                            .await;
                        status = JobStatus::Failed { stage, message };
                    }
                }
            }
        }

        let notify_state = self.notify(job, &status, history.as_deref(), tx).await;
        stages.push((StageKind::Notify, notify_state));

        let success = status.is_success();
        info!(job = number, success, "Job finished");
        let _ = tx
            .send(JobEvent::JobCompleted {
                job: number,
                success,
            })
            .await;

        JobReport {
            id: job.id,
            number,
            name: job.name().to_string(),
            status,
            stages,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Read the build history when something needs it. Failures are not fatal.
    async fn load_history(&self, job: &BuildJob) -> Option<Vec<BuildRecord>> {
        let history = self.history.as_ref()?;

        let needed_for_supersede =
            self.supersede_check && job.environment.context.pull_request.is_some();
        let needed_for_status_change = self
            .notifiers
            .iter()
            .any(|n| n.accepts(NotificationKind::StatusChanged));

        if !needed_for_supersede && !needed_for_status_change {
            return None;
        }

        match history.recent_builds().await {
            Ok(records) => Some(records),
            Err(e) => {
                warn!(job = job.number(), error = %e, "Could not read build history, continuing");
                None
            }
        }
    }

    /// Run the commands of one stage, stopping at the first failure.
    async fn run_stage(
        &self,
        job: usize,
        stage: StageKind,
        commands: &[Command],
        var_ctx: &VariableContext,
        env: &HashMap<String, String>,
        tx: &mpsc::Sender<JobEvent>,
    ) -> Result<(), String> {
        for command in commands {
            let script = var_ctx.interpolate(&command.script);

            if let Some(guard) = &command.unless_exists {
                let guard = var_ctx.interpolate(guard);
                if self.resolve_path(&guard).exists() {
                    info!(job, stage = %stage, path = %guard, "Skipping command, path already exists");
                    let _ = tx
                        .send(JobEvent::CommandSkipped {
                            job,
                            stage,
                            command: script,
                            reason: format!("{} exists", guard),
                        })
                        .await;
                    continue;
                }
            }

            let _ = tx
                .send(JobEvent::CommandStarted {
                    job,
                    stage,
                    command: script.clone(),
                })
                .await;

            let mut spec = CommandSpec::shell(command.shell, script.clone());
            spec.env = env.clone();
            spec.working_dir = self.working_dir.clone();

            let handle = self
                .runner
                .spawn(spec)
                .await
                .map_err(|e| format!("failed to start `{}`: {}", script, e))?;

            let log_task = match self.runner.logs(&handle).await {
                Ok(mut stream) => {
                    let tx = tx.clone();
                    Some(tokio::spawn(async move {
                        while let Some(line) = stream.next().await {
                            let _ = tx.send(JobEvent::StageLog { job, stage, line }).await;
                        }
                    }))
                }
                Err(e) => {
                    warn!(job, stage = %stage, error = %e, "Command output unavailable");
                    None
                }
            };

            let result = self
                .runner
                .wait(&handle)
                .await
                .map_err(|e| format!("failed to wait for `{}`: {}", script, e));

            if let Some(mut task) = log_task {
                if tokio::time::timeout(LOG_DRAIN_GRACE, &mut task).await.is_err() {
                    task.abort();
                }
            }

            let result = result?;
            if !result.success() {
                return Err(match result.exit_code {
                    Some(code) => format!("`{}` exited with code {}", script, code),
                    None => format!("`{}` was terminated by a signal", script),
                });
            }
        }

        Ok(())
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        match &self.working_dir {
            Some(dir) => dir.join(path),
            None => Path::new(path).to_path_buf(),
        }
    }

    /// Deliver the job's outcome to every subscribed notifier. Best effort.
    async fn notify(
        &self,
        job: &BuildJob,
        status: &JobStatus,
        history: Option<&[BuildRecord]>,
        tx: &mpsc::Sender<JobEvent>,
    ) -> StageState {
        if self.notifiers.is_empty() {
            return StageState::Skipped {
                reason: "no notifiers configured".to_string(),
            };
        }

        let outcome = status.outcome();
        let previous =
            history.and_then(|records| supersede::previous_outcome(records, &job.environment.context));

        let mut kinds = vec![NotificationKind::from(outcome)];
        if previous.is_some_and(|p| p != outcome) {
            kinds.push(NotificationKind::StatusChanged);
        }

        let mut failures = Vec::new();
        for notifier in &self.notifiers {
            for kind in kinds.iter().copied().filter(|k| notifier.accepts(*k)) {
                let event = notification_event(job, status, kind, outcome, previous);
                match notifier.notify(&event).await {
                    Ok(()) => {
                        info!(job = job.number(), notifier = %notifier.name(), ?kind, "Notification sent");
                        let _ = tx
                            .send(JobEvent::NotificationSent {
                                job: job.number(),
                                notifier: notifier.name(),
                                kind,
                            })
                            .await;
                    }
                    Err(e) => {
                        warn!(job = job.number(), notifier = %notifier.name(), error = %e, "Notification failed");
                        let _ = tx
                            .send(JobEvent::NotificationFailed {
                                job: job.number(),
                                notifier: notifier.name(),
                                error: e.to_string(),
                            })
                            .await;
                        failures.push(format!("{}: {}", notifier.name(), e));
                    }
                }
            }
        }

        if failures.is_empty() {
            StageState::Succeeded
        } else {
            StageState::Failed {
                message: failures.join("; "),
            }
        }
    }
}

fn notification_event(
    job: &BuildJob,
    status: &JobStatus,
    kind: NotificationKind,
    outcome: BuildOutcome,
    previous: Option<BuildOutcome>,
) -> NotificationEvent {
    let context = &job.environment.context;
    NotificationEvent {
        kind,
        outcome,
        previous_outcome: previous,
        job_id: job.id,
        job_number: job.number(),
        job_name: job.name().to_string(),
        build_number: context.build_number,
        pull_request: context.pull_request,
        account: context.account.clone(),
        project: context.project.clone(),
        message: status_message(status),
        finished_at: Utc::now(),
    }
}

/// One-line description of a job status.
pub fn status_message(status: &JobStatus) -> String {
    match status {
        JobStatus::Succeeded => "build succeeded".to_string(),
        JobStatus::Failed { stage, message } => format!("{} stage failed: {}", stage, message),
        JobStatus::Superseded { newer_build } => {
            format!("superseded by newer build {}", newer_build)
        }
    }
}
