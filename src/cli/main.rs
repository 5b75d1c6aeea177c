//! uk-edu-etl - load UK education datasets into the analytics database

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use uk_education_etl::cli::commands::history::{HistoryArgs, handle_history};
use uk_education_etl::cli::commands::pipelines::{
    LoadArgs, RunArgs, handle_datasets, handle_list, handle_load, handle_run,
};
use uk_education_etl::cli::commands::status::handle_status;
use uk_education_etl::cli::{CliContext, CliError};

#[derive(Parser)]
#[command(name = "uk-edu-etl")]
#[command(about = "ETL pipelines for UK education datasets", long_about = None)]
#[command(version)]
struct Cli {
    /// Dataset configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory searched for source files
    #[arg(long, global = true)]
    data_root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered pipelines
    List,
    /// List discoverable source files per dataset
    Datasets,
    /// Run a named pipeline
    Run(RunArgs),
    /// Detect the pipeline for a file and run it
    Load(LoadArgs),
    /// Show the load history and totals
    History(HistoryArgs),
    /// Show database connectivity, row counts and recent loads
    Status,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let ctx = CliContext::load(cli.config.as_deref(), cli.data_root.as_deref())?;

    match &cli.command {
        Commands::List => handle_list(&ctx),
        Commands::Datasets => handle_datasets(&ctx),
        Commands::Run(args) => handle_run(&ctx, args),
        Commands::Load(args) => handle_load(&ctx, args),
        Commands::History(args) => handle_history(&ctx, args),
        Commands::Status => handle_status(&ctx),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\nError: {}", e.user_message());
            ExitCode::FAILURE
        }
    }
}
