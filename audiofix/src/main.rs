use audiofix_core::config::Config;
use audiofix_core::error::FixtureError;
use audiofix_core::format::ContainerFormat;
use audiofix_pipeline::outcome::{EXIT_FIXTURE_FAILURE, EXIT_INVALID_CONFIG, exit_code_for};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing::{error, info};

mod app;

#[derive(Parser, Debug)]
#[command(author, version, about = "audiofix - audio fixture generator and decode verifier", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Regenerate fixtures and commit the manifest
    Generate(GenerateArgs),
    /// Decode the fixtures in the manifest and compare them with their references
    Verify(VerifyArgs),
}

#[derive(clap::Args, Debug)]
pub struct GenerateArgs {
    /// Fixture directory (overrides general.target_dir)
    #[arg(short, long)]
    pub target_dir: Option<Utf8PathBuf>,

    /// Only regenerate these formats, comma separated
    #[arg(short, long, value_delimiter = ',')]
    pub format: Vec<ContainerFormat>,

    /// Overwrite fixtures that no longer match the manifest
    #[arg(long)]
    pub force: bool,

    /// Validate the matrix and probe encoders without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Concurrent encoder processes
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Per-fixture encoder timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(clap::Args, Debug)]
pub struct VerifyArgs {
    /// Fixture directory (overrides general.target_dir)
    #[arg(short, long)]
    pub target_dir: Option<Utf8PathBuf>,

    /// Only verify these formats, comma separated
    #[arg(short, long, value_delimiter = ',')]
    pub format: Vec<ContainerFormat>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(config_path) => Config::load_from_path(config_path),
        None => Config::discover(),
    };

    // Initialize logging
    let log_level = if args.verbose {
        "debug"
    } else {
        config
            .as_ref()
            .map(|c| c.general.log_level.as_str())
            .unwrap_or("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    info!("Starting audiofix v{}", env!("CARGO_PKG_VERSION"));

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_INVALID_CONFIG);
        }
    };

    let result = match args.command {
        Command::Generate(generate) => app::generate(config, generate).await,
        Command::Verify(verify) => app::verify(config, verify).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!("{:#}", err);
            let code = err
                .downcast_ref::<FixtureError>()
                .map(|e| exit_code_for(e.kind()))
                .unwrap_or(EXIT_FIXTURE_FAILURE);
            ExitCode::from(code)
        }
    }
}
