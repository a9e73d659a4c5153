//! stagerun CLI tool.

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "stagerun")]
#[command(about = "Matrix build orchestrator for CI workers", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, env = "STAGERUN_LOG_FORMAT", value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the build matrix described by a manifest
    Run {
        /// Path to the manifest
        #[arg(short, long, default_value = "stagerun.kdl")]
        config: String,
        /// Only run the job with this number
        #[arg(long)]
        job: Option<usize>,
        /// Jobs to run at once (defaults to STAGERUN_MAX_PARALLEL or 1)
        #[arg(long)]
        max_parallel: Option<usize>,
        /// Do not check the build history for newer pull request builds
        #[arg(long)]
        skip_supersede_check: bool,
    },
    /// Validate a manifest
    Validate {
        /// Path to the manifest
        #[arg(default_value = "stagerun.kdl")]
        path: String,
    },
    /// Print the jobs a manifest's matrix expands to
    Matrix {
        /// Path to the manifest
        #[arg(default_value = "stagerun.kdl")]
        path: String,
        /// Print the jobs as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Run {
            config,
            job,
            max_parallel,
            skip_supersede_check,
        } => {
            let options = commands::run::RunOptions {
                only_job: job,
                max_parallel,
                skip_supersede_check,
            };
            commands::run::run_local(&config, &options).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
        Commands::Matrix { path, json } => {
            commands::matrix(&path, json)?;
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
