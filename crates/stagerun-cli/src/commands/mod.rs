//! CLI command implementations.

pub mod run;

use anyhow::{Context, Result};
use stagerun_config::matrix::plan_jobs;
use stagerun_config::{RunnerSettings, load_manifest};

pub fn validate(path: &str) -> Result<()> {
    let manifest = load_manifest(path).with_context(|| format!("Configuration error in {}", path))?;
    let jobs = plan_jobs(&manifest, &Default::default());
    println!("Configuration is valid");
    println!(
        "  {} job(s), {} command(s), {} webhook(s)",
        jobs.len(),
        manifest.plan.total_commands(),
        manifest.notifications.len()
    );
    Ok(())
}

pub fn matrix(path: &str, json: bool) -> Result<()> {
    let manifest =
        load_manifest(path).with_context(|| format!("Failed to load manifest: {}", path))?;
    let settings = RunnerSettings::from_env().context("Invalid runner settings")?;
    let jobs = plan_jobs(&manifest, &settings.build_context());

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    for job in &jobs {
        println!("job {}: {}", job.job_number, job.job_name);
        for (name, value) in job.matrix.iter() {
            println!("    {}={}", name, value);
        }
    }
    if manifest.matrix.fast_finish {
        println!("fast-finish: enabled");
    }
    Ok(())
}
