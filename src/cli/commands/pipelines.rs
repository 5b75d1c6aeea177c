//! Pipeline commands: list, datasets, run, load

use std::path::{Path, PathBuf};

use clap::Args;
use tracing::info;

use crate::cli::commands::CliContext;
use crate::cli::error::CliError;
use crate::cli::output::{format_dataset_files, format_pipelines};
use crate::pipeline::{PipelineError, PipelineOptions, PipelineReport};

/// Arguments for `run`
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Registered pipeline name (see `list`)
    pub pipeline: String,

    /// Source file; defaults to the largest discovered file for the pipeline
    pub file: Option<PathBuf>,

    /// Academic year tag such as 2023-24; detected from the path when omitted
    #[arg(long)]
    pub academic_year: Option<String>,

    /// Extract, transform and validate without writing anything
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for `load`
#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Source file; the pipeline is detected from its path
    pub file: PathBuf,

    /// Academic year tag such as 2023-24; detected from the path when omitted
    #[arg(long)]
    pub academic_year: Option<String>,

    /// Extract, transform and validate without writing anything
    #[arg(long)]
    pub dry_run: bool,
}

fn options(academic_year: &Option<String>, dry_run: bool) -> PipelineOptions {
    let options = PipelineOptions::new().dry_run(dry_run);
    match academic_year {
        Some(year) => options.with_academic_year(year.clone()),
        None => options,
    }
}

fn require_file(path: &Path) -> Result<(), CliError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(CliError::FileNotFound(path.to_path_buf()))
    }
}

fn finish(report: PipelineReport) -> Result<(), CliError> {
    report.print_summary();
    if report.is_success() {
        Ok(())
    } else {
        Err(CliError::RunFailed {
            pipeline: report.pipeline,
            errors: report.errors.len(),
        })
    }
}

/// Handle the list command
pub fn handle_list(ctx: &CliContext) -> Result<(), CliError> {
    print!("{}", format_pipelines(&ctx.registry.list()));
    Ok(())
}

/// Handle the datasets command
pub fn handle_datasets(ctx: &CliContext) -> Result<(), CliError> {
    println!("Data root: {}", ctx.config.data_root.display());
    for dataset in ctx.config.dataset_names() {
        let files = ctx.config.discover_files(dataset)?;
        print!("{}", format_dataset_files(dataset, &files));
    }
    Ok(())
}

/// Handle the run command
pub fn handle_run(ctx: &CliContext, args: &RunArgs) -> Result<(), CliError> {
    if !ctx.registry.contains(&args.pipeline) {
        return Err(PipelineError::NotFound {
            name: args.pipeline.clone(),
            available: ctx.registry.names(),
        }
        .into());
    }

    let file = match &args.file {
        Some(file) => file.clone(),
        None => {
            let latest = ctx
                .config
                .latest_file(&args.pipeline)?
                .ok_or_else(|| CliError::NoFiles(args.pipeline.clone()))?;
            info!(file = %latest.path.display(), size_mb = latest.size_mb(), "Using largest discovered file");
            latest.path
        }
    };
    require_file(&file)?;

    let db = ctx.connect()?;
    let report = ctx.registry.run(
        &args.pipeline,
        &file,
        options(&args.academic_year, args.dry_run),
        &ctx.config,
        db.as_ref(),
    )?;
    finish(report)
}

/// Handle the load command
pub fn handle_load(ctx: &CliContext, args: &LoadArgs) -> Result<(), CliError> {
    require_file(&args.file)?;

    let db = ctx.connect()?;
    let report = ctx
        .registry
        .smart_run(
            &args.file,
            options(&args.academic_year, args.dry_run),
            &ctx.config,
            db.as_ref(),
        )?
        .ok_or_else(|| CliError::DetectionFailed(args.file.clone()))?;
    finish(report)
}
