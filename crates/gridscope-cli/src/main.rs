// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of GridScope.

//! GridScope - batch extraction and analysis of metered consumption data.
//!
//! One subcommand per pipeline step: `extract` pulls readings from the
//! Dexcell API into a CSV, and `quality` / `trend` / `out-of-hours` each run
//! one analysis over that CSV plus the same client configuration.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gridscope_analysis::{dataset, out_of_hours, quality, trend};
use gridscope_extract::{
    DEFAULT_API_BASE_URL, Extractor, ReadingsClient, RetryPolicy, write_readings_csv,
};
use gridscope_types::load_config;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "gridscope")]
#[command(author, version, about = "Metered consumption extraction and analysis", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull readings for every configured device and save them as CSV
    Extract(ExtractArgs),

    /// Analyze hourly data completeness, zero and negative values
    Quality(AnalysisArgs),

    /// Compare consumption between the two halves of the window
    Trend(TrendArgs),

    /// Split daily consumption into working hours and out-of-hours
    OutOfHours(OutOfHoursArgs),
}

#[derive(Parser)]
struct ExtractArgs {
    /// Path to the client configuration JSON
    #[arg(short, long)]
    config: PathBuf,

    /// Where to write the extracted readings CSV
    #[arg(short, long, default_value = "extracted_data.csv")]
    output: PathBuf,

    /// Maximum concurrent API requests (1 = strictly sequential)
    #[arg(long, default_value_t = 5)]
    workers: usize,

    /// Base URL of the readings API
    #[arg(long, default_value = DEFAULT_API_BASE_URL)]
    api_url: String,
}

#[derive(Parser)]
struct AnalysisArgs {
    /// Path to the client configuration JSON
    #[arg(short, long)]
    config: PathBuf,

    /// Path to the extracted readings CSV
    #[arg(short, long)]
    data: PathBuf,

    /// Directory for the CSV and text reports
    #[arg(short, long, default_value = ".")]
    out: PathBuf,
}

#[derive(Parser)]
struct TrendArgs {
    #[command(flatten)]
    common: AnalysisArgs,

    /// Percentage change beyond which a trend is flagged
    #[arg(long, default_value_t = trend::DEFAULT_TREND_THRESHOLD)]
    threshold: f64,
}

#[derive(Parser)]
struct OutOfHoursArgs {
    #[command(flatten)]
    common: AnalysisArgs,

    /// Out-of-hours percentage beyond which a device-day is flagged
    #[arg(long, default_value_t = out_of_hours::DEFAULT_OUT_OF_HOURS_THRESHOLD)]
    threshold: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gridscope_cli=info".parse().unwrap())
                .add_directive("gridscope_extract=info".parse().unwrap())
                .add_directive("gridscope_analysis=info".parse().unwrap())
                .add_directive("gridscope_types=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Extract(args) => run_extract(args).await,
        Commands::Quality(args) => run_quality(args),
        Commands::Trend(args) => run_trend(args),
        Commands::OutOfHours(args) => run_out_of_hours(args),
    }
}

async fn run_extract(args: ExtractArgs) -> Result<()> {
    let config = load_config(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    info!("Config loaded from {}", args.config.display());

    let client = ReadingsClient::new(args.api_url, RetryPolicy::default())?;
    let extractor = Extractor::new(client, args.workers);
    let (readings, summary) = extractor.run(&config).await;

    if !write_readings_csv(&readings, &args.output)? {
        info!("Nothing extracted, no CSV written");
        return Ok(());
    }

    info!(
        "Extract finished: {}/{} tasks succeeded ({:.1}%), {} readings saved to {}",
        summary.succeeded,
        summary.total_tasks,
        summary.success_rate(),
        summary.total_readings,
        args.output.display()
    );
    Ok(())
}

fn load_inputs(
    args: &AnalysisArgs,
) -> Result<(gridscope_types::AnalysisConfig, dataset::Dataset)> {
    let config = load_config(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    let data = dataset::load_dataset(&config, &args.data)
        .with_context(|| format!("failed to load extract {}", args.data.display()))?;
    Ok((config, data))
}

fn report_paths(out_dir: &Path, stem: &str) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output directory {}", out_dir.display()))?;
    Ok((
        out_dir.join(format!("{stem}_report.csv")),
        out_dir.join(format!("{stem}_summary.txt")),
    ))
}

fn run_quality(args: AnalysisArgs) -> Result<()> {
    let (config, data) = load_inputs(&args)?;
    let results = quality::analyze_quality(&config, &data);

    let (csv_path, txt_path) = report_paths(&args.out, "quality")?;
    quality::write_quality_csv(&results, &csv_path)?;
    quality::write_quality_report(&results, &data, &txt_path)?;

    let flagged = results.iter().filter(|r| r.is_flagged).count();
    info!(
        "Quality analysis finished: {} devices analyzed, {} flagged",
        results.len(),
        flagged
    );
    Ok(())
}

fn run_trend(args: TrendArgs) -> Result<()> {
    let (config, data) = load_inputs(&args.common)?;
    let results = trend::analyze_trends(&config, &data, args.threshold)?;

    let (csv_path, txt_path) = report_paths(&args.common.out, "trend")?;
    trend::write_trend_csv(&results, &csv_path)?;
    trend::write_trend_report(&results, &data, args.threshold, &txt_path)?;

    let flagged = results.iter().filter(|r| r.is_flagged).count();
    info!(
        "Trend analysis finished: {} devices analyzed, {} flagged at {}%",
        results.len(),
        flagged,
        args.threshold
    );
    Ok(())
}

fn run_out_of_hours(args: OutOfHoursArgs) -> Result<()> {
    let (config, data) = load_inputs(&args.common)?;
    let results = out_of_hours::analyze_out_of_hours(&config, &data, args.threshold)?;

    let (csv_path, txt_path) = report_paths(&args.common.out, "out_of_hours")?;
    out_of_hours::write_out_of_hours_csv(&results, &csv_path)?;
    out_of_hours::write_out_of_hours_report(&results, &data, args.threshold, &txt_path)?;

    info!(
        "Out-of-hours analysis finished: {} flagged device-days at {}%",
        results.len(),
        args.threshold
    );
    Ok(())
}
