//! scene-pipeline CLI
//!
//! Runs the pipeline workers and REST API, or talks to the pipeline database directly
//! to submit a source or inspect a job.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use scene_pipeline::{Config, Error, JobId, Pipeline, Result, run_with_shutdown};

#[derive(Parser)]
#[command(name = "scene-pipeline")]
#[command(about = "Split, analyze and graph screenplays through durable stage queues", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the stage workers and the REST API until SIGINT/SIGTERM
    Serve,

    /// Store a source file, create its job and queue it for chunking
    Submit {
        /// Source text file
        file: PathBuf,

        /// Name recorded as the job's source reference (defaults to the file name)
        #[arg(long)]
        source_ref: Option<String>,
    },

    /// Print a job and its units as JSON
    Status {
        /// Job ID
        job_id: JobId,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,scene_pipeline=debug")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "scene-pipeline failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::from_toml_file(path).await?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Submit { file, source_ref } => submit(config, file, source_ref).await,
        Commands::Status { job_id } => status(config, job_id).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    let pipeline = Pipeline::new(config).await?;
    pipeline.start_workers().await?;

    let api = pipeline.spawn_api_server();
    run_with_shutdown(pipeline).await?;

    match api.await {
        Ok(result) => result,
        Err(e) => Err(Error::ApiServerError(e.to_string())),
    }
}

async fn submit(config: Config, file: PathBuf, source_ref: Option<String>) -> Result<()> {
    let text = tokio::fs::read_to_string(&file).await?;
    let source_ref = source_ref.unwrap_or_else(|| {
        file.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string())
    });

    let pipeline = Pipeline::new(config).await?;
    let job = pipeline.submit_text(&source_ref, &text).await?;
    println!("{}", job.id);

    pipeline.shutdown().await
}

async fn status(config: Config, job_id: JobId) -> Result<()> {
    let pipeline = Pipeline::new(config).await?;

    let job = pipeline.get_job(job_id).await?;
    let units = pipeline.list_units(job_id).await?;
    let report = serde_json::json!({ "job": job, "units": units });
    println!("{}", serde_json::to_string_pretty(&report)?);

    pipeline.shutdown().await
}
