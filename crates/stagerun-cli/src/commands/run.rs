//! Local build matrix execution command.

use anyhow::{Context, Result};
use stagerun_client::{HistoryClient, WebhookNotifier};
use stagerun_config::manifest::validate_url;
use stagerun_config::matrix::plan_jobs;
use stagerun_config::{RunnerSettings, VariableContext, WebhookConfig, load_manifest};
use stagerun_core::environment::BuildContext;
use stagerun_core::executor::LogStream;
use stagerun_core::job::{BuildJob, JobStatus, StageState};
use stagerun_core::notify::Notifier;
use stagerun_executor::LocalShellRunner;
use stagerun_scheduler::{JobEvent, JobOrchestrator, MatrixResult, MatrixRunner};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Flags of `stagerun run`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Only run the job with this number.
    pub only_job: Option<usize>,
    /// Overrides the configured parallelism.
    pub max_parallel: Option<usize>,
    pub skip_supersede_check: bool,
}

/// Run a manifest's build matrix on this machine. Fails when any job failed.
pub async fn run_local(config_path: &str, options: &RunOptions) -> Result<()> {
    let settings = RunnerSettings::from_env().context("Invalid runner settings")?;
    let result = execute(Path::new(config_path), options, &settings).await?;

    print_summary(&result);

    if result.success() {
        println!("\n✓ Build succeeded!");
        Ok(())
    } else {
        anyhow::bail!("Build failed");
    }
}

/// Run the build matrix, printing job events as they arrive.
pub async fn execute(
    config_path: &Path,
    options: &RunOptions,
    settings: &RunnerSettings,
) -> Result<MatrixResult> {
    let manifest = load_manifest(config_path)
        .with_context(|| format!("Failed to load manifest: {}", config_path.display()))?;
    let context = settings.build_context();

    let plan = Arc::new(manifest.plan.clone());
    let mut jobs: Vec<BuildJob> = plan_jobs(&manifest, &context)
        .into_iter()
        .map(|environment| BuildJob::new(environment, plan.clone()))
        .collect();

    if let Some(number) = options.only_job {
        jobs.retain(|job| job.number() == number);
        if jobs.is_empty() {
            anyhow::bail!("No job number {} in the build matrix", number);
        }
    }

    println!("Build matrix: {} job(s)", jobs.len());

    // Commands run in the directory holding the manifest
    let working_dir = config_path
        .parent()
        .map(|p| {
            if p.as_os_str().is_empty() {
                Path::new(".")
            } else {
                p
            }
        })
        .unwrap_or(Path::new("."))
        .canonicalize()
        .context("Failed to resolve working directory")?;

    println!("Working directory: {}", working_dir.display());

    let runner = LocalShellRunner::with_working_dir(working_dir.clone());
    let mut orchestrator = JobOrchestrator::new(Arc::new(runner))
        .with_working_dir(working_dir)
        .with_supersede_check(!options.skip_supersede_check);

    if settings.has_history() {
        let history = HistoryClient::new(
            &settings.history_url,
            settings.account.as_deref().unwrap_or_default(),
            settings.project.as_deref().unwrap_or_default(),
            settings.history_depth,
        )
        .context("Invalid build history URL")?;
        let history = match &settings.api_token {
            Some(token) => history.with_token(token),
            None => history,
        };
        info!(url = %history.url(), "Using build history");
        orchestrator = orchestrator.with_history(Arc::new(history));
    } else if context.pull_request.is_some() {
        warn!("No account or project configured, skipping the supersede check");
    }

    for notifier in build_notifiers(&manifest.notifications, &manifest.global, &context) {
        orchestrator = orchestrator.with_notifier(notifier);
    }

    let matrix = MatrixRunner::new(orchestrator)
        .with_max_parallel(options.max_parallel.unwrap_or(settings.max_parallel))
        .with_fast_finish(manifest.matrix.fast_finish);

    println!("\n--- Starting build ---\n");

    let (mut rx, result_handle) = matrix.execute(jobs);

    while let Some(event) = rx.recv().await {
        print_event(&event);
    }

    result_handle.await.context("Build task failed")
}

fn print_summary(result: &MatrixResult) {
    println!("\n--- Job Summary ---");
    for report in &result.reports {
        let status = match &report.status {
            JobStatus::Succeeded => "✓ succeeded".to_string(),
            JobStatus::Failed { stage, message } => format!("✗ {} failed: {}", stage, message),
            JobStatus::Superseded { newer_build } => {
                format!("⊘ superseded by build {}", newer_build)
            }
        };
        println!("  job {} ({}) - {}", report.number, report.name, status);
        for (stage, state) in &report.stages {
            let state = match state {
                StageState::Succeeded => "✓ succeeded".to_string(),
                StageState::Failed { message } => format!("✗ failed: {}", message),
                StageState::Skipped { reason } => format!("⊘ skipped: {}", reason),
            };
            println!("      {} - {}", stage, state);
        }
    }
    for number in &result.not_started {
        println!("  job {} - ○ not started (fast finish)", number);
    }
}

fn print_event(event: &JobEvent) {
    match event {
        JobEvent::JobStarted { job, name } => println!("▶ Job {} ({}) started", job, name),
        JobEvent::Superseded { job, newer_build } => {
            println!("⊘ Job {}: newer build {} exists for this pull request", job, newer_build)
        }
        JobEvent::StageStarted { job, stage } => println!("▶ [{}] Stage '{}' started", job, stage),
        JobEvent::StageSkipped { job, stage, reason } => {
            println!("⊘ [{}] Stage '{}' skipped: {}", job, stage, reason)
        }
        JobEvent::CommandStarted { job, stage, command } => {
            println!("  [{}:{}] $ {}", job, stage, command)
        }
        JobEvent::CommandSkipped {
            job,
            stage,
            command,
            reason,
        } => println!("  [{}:{}] skipped `{}`: {}", job, stage, command, reason),
        JobEvent::StageLog { job, stage, line } => {
            let stream_marker = match line.stream {
                LogStream::Stdout => " ",
                LogStream::Stderr => "!",
            };
            println!("  [{}:{}]{} {}", job, stage, stream_marker, line.content);
        }
        JobEvent::StageCompleted {
            job,
            stage,
            success,
        } => {
            if *success {
                println!("✓ [{}] Stage '{}' completed successfully\n", job, stage);
            } else {
                println!("✗ [{}] Stage '{}' failed\n", job, stage);
            }
        }
        JobEvent::NotificationSent {
            job,
            notifier,
            kind,
        } => println!("  [{}] notified {} ({:?})", job, notifier, kind),
        JobEvent::NotificationFailed {
            job,
            notifier,
            error,
        } => println!("  [{}] notification to {} failed: {}", job, notifier, error),
        JobEvent::JobCompleted { job, success } => {
            if *success {
                println!("--- Job {} succeeded ---\n", job);
            } else {
                println!("--- Job {} failed ---\n", job);
            }
        }
    }
}

/// Build the webhook notifiers, resolving variables in their URLs and secrets.
///
/// `${env.*}` sees the manifest's global variables, then the process
/// environment. Webhooks that do not resolve to a valid URL are logged and
/// left out; they never stop the build.
fn build_notifiers(
    configs: &[WebhookConfig],
    global: &[(String, String)],
    context: &BuildContext,
) -> Vec<Arc<dyn Notifier>> {
    let mut vars = VariableContext {
        env: global.iter().cloned().collect(),
        build: context.clone(),
        ..Default::default()
    };
    vars.populate_process_env();

    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
    for config in configs {
        let unresolved = vars.unresolved(&config.url);
        if !unresolved.is_empty() {
            warn!(
                url = %config.url,
                unresolved = %unresolved.join(", "),
                "Webhook URL uses unknown variables, skipping webhook"
            );
            continue;
        }

        let url = vars.interpolate(&config.url);
        if let Err(e) = validate_url(&url) {
            warn!(url = %config.url, error = %e, "Invalid webhook URL, skipping webhook");
            continue;
        }

        let mut notifier = match WebhookNotifier::new(&url, config.filter) {
            Ok(notifier) => notifier,
            Err(e) => {
                warn!(url = %config.url, error = %e, "Invalid webhook URL, skipping webhook");
                continue;
            }
        };
        if let Some(secret) = &config.secret {
            notifier = notifier.with_secret(vars.interpolate(secret));
        }
        notifiers.push(Arc::new(notifier));
    }
    notifiers
}
