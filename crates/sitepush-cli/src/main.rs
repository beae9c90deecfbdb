//! sitepush CLI tool.

use clap::{Parser, ValueEnum};
use sitepush_pipeline::PipelineExit;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "sitepush", version)]
#[command(about = "Build a static site and deploy it to Netlify", long_about = None)]
struct Cli {
    /// Site source directory
    #[arg(long, default_value = ".")]
    source: PathBuf,

    /// Project file (defaults to sitepush.kdl in the source directory, if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Artifact directory, overriding the project file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Netlify API base URL
    #[arg(long, env = "NETLIFY_API_URL")]
    api_url: Option<String>,

    /// Display locale for dates and sizes (default en-AU)
    #[arg(long)]
    locale: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Build only, without deploying
    #[arg(long)]
    skip_deploy: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let options = commands::run::RunOptions {
        source: cli.source,
        config: cli.config,
        output: cli.output,
        api_url: cli.api_url,
        locale: cli.locale,
        skip_deploy: cli.skip_deploy,
    };

    let result = commands::run::run(options).await;
    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }
    ExitCode::from(exit_code(&result))
}

/// Exit status for a run. Failures outside the pipeline stages (a panicked
/// task, for one) get `INTERNAL_ERROR` so they never read as a build error.
fn exit_code(result: &anyhow::Result<PipelineExit>) -> u8 {
    match result {
        Ok(exit) => exit.code(),
        Err(_) => INTERNAL_ERROR,
    }
}

/// `EX_SOFTWARE` from sysexits.h.
const INTERNAL_ERROR: u8 = 70;
