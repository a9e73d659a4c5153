//! Dispatches the jobs of a build matrix through a [`JobOrchestrator`].

use crate::orchestrator::{JobEvent, JobOrchestrator};
use stagerun_core::job::{BuildJob, JobReport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{error, info};

/// Outcome of a whole matrix run.
#[derive(Debug, Clone, Default)]
pub struct MatrixResult {
    /// Reports of the jobs that ran, ordered by job number.
    pub reports: Vec<JobReport>,
    /// Jobs never started because fast-finish stopped the matrix.
    pub not_started: Vec<usize>,
}

impl MatrixResult {
    /// True when every job ran and succeeded.
    pub fn success(&self) -> bool {
        self.not_started.is_empty() && self.reports.iter().all(|r| r.status.is_success())
    }

    pub fn failed_jobs(&self) -> Vec<&JobReport> {
        self.reports
            .iter()
            .filter(|r| !r.status.is_success())
            .collect()
    }
}

/// Runs matrix jobs with bounded parallelism.
pub struct MatrixRunner {
    orchestrator: JobOrchestrator,
    max_parallel: usize,
    fast_finish: bool,
}

impl MatrixRunner {
    pub fn new(orchestrator: JobOrchestrator) -> Self {
        Self {
            orchestrator,
            max_parallel: 1,
            fast_finish: false,
        }
    }

    /// Jobs allowed to run at once (at least one).
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Stop starting new jobs once one has failed.
    pub fn with_fast_finish(mut self, fast_finish: bool) -> Self {
        self.fast_finish = fast_finish;
        self
    }

    /// Execute all jobs, returning a channel of events and a handle to get the result.
    pub fn execute(
        &self,
        jobs: Vec<BuildJob>,
    ) -> (
        mpsc::Receiver<JobEvent>,
        tokio::task::JoinHandle<MatrixResult>,
    ) {
        let (tx, rx) = mpsc::channel(100);
        let orchestrator = self.orchestrator.clone();
        let max_parallel = self.max_parallel;
        let fast_finish = self.fast_finish;

        let handle = tokio::spawn(async move {
            let failed = Arc::new(AtomicBool::new(false));
            let semaphore = Arc::new(Semaphore::new(max_parallel));
            let mut join_set = JoinSet::new();
            let mut result = MatrixResult::default();

            info!(jobs = jobs.len(), max_parallel, fast_finish, "Starting build matrix");

            for job in jobs {
                // Permits are taken in job order so jobs start in matrix order.
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    result.not_started.push(job.number());
                    continue;
                };

                if fast_finish && failed.load(Ordering::SeqCst) {
                    info!(job = job.number(), "Fast finish, job not started");
                    result.not_started.push(job.number());
                    continue;
                }

                let orchestrator = orchestrator.clone();
                let failed = failed.clone();
                let tx = tx.clone();
                join_set.spawn(async move {
                    let report = orchestrator.run(&job, &tx).await;
                    if !report.status.is_success() {
                        failed.store(true, Ordering::SeqCst);
                    }
                    drop(permit);
                    report
                });
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(report) => result.reports.push(report),
                    Err(e) => error!(error = %e, "Job task panicked"),
                }
            }

            result.reports.sort_by_key(|r| r.number);
            result.not_started.sort_unstable();

            info!(
                ran = result.reports.len(),
                failed = result.failed_jobs().len(),
                not_started = result.not_started.len(),
                "Build matrix finished"
            );
            result
        });

        (rx, handle)
    }
}
