//! # Load Generator Statistics Collector - Main Entry Point
//!
//! Folds the metrics record snapshots written by the agents of one driver
//! into a single run record, scores it and writes the results.
//!
//! ## Architecture Overview
//!
//! The main function performs these key operations:
//! 1. **Initialize logging**: Colorized console output plus an optional log file
//! 2. **Parse arguments**: Processes command-line configuration
//! 3. **Load the run configuration**: Validated once, immutable afterwards
//! 4. **Load snapshots**: All files are read and decoded concurrently
//! 5. **Fold**: Records are merged on a pool of scoped threads
//! 6. **Score and write**: JSON results, optional summary text and detail tables
//!
//! ## Error Handling
//!
//! Unreadable or incompatible snapshots abort the run with an error. A run
//! that misses its targets is not an error; it only changes the exit status
//! when `--fail-on-violation` is given.

use anyhow::{Context, Result};
use clap::Parser;
use loadgen_stats::{
    cli::{load_snapshot, Args},
    fold_parallel, logging,
    report::render_detail,
    results::{DriverResults, ResultsManager},
    score,
    utils::{format_duration_ns, format_ops_rate, print_table_row, print_table_separator},
    DriverSummary, MetricsRecord, RunConfig,
};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let guard = logging::init(args.verbose, args.log_file.as_deref())?;

    info!("Starting load generator statistics collector");
    debug!("Configuration: {:?}", args);

    let passed = run(&args).await?;

    if !passed && args.fail_on_violation {
        warn!("Run failed its targets");
        // Flush the log file before exiting.
        drop(guard);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(args: &Args) -> Result<bool> {
    let config = RunConfig::from_file(&args.config)?;
    let workers = args.fold_workers()?;

    let records = load_snapshots(args).await?;
    let count = records.len();
    info!(
        "Loaded {} record snapshots, folding with {} workers",
        count, workers
    );

    let merged = tokio::task::spawn_blocking(move || fold_parallel(records, workers))
        .await
        .context("Fold task failed")??;
    let Some(mut merged) = merged else {
        anyhow::bail!("No records to fold");
    };
    merged.wrap();

    let summary = score(&merged, &config)?;
    print_console_summary(&summary, &merged, &config);

    if let Some(detail) = &args.detail {
        std::fs::write(detail, render_detail(&merged, &config))
            .with_context(|| format!("Failed to write detail to {}", detail.display()))?;
        info!("Detail written to: {:?}", detail);
    }

    let mut results = ResultsManager::new(&args.output_file)?;
    if let Some(summary_text) = &args.summary_text {
        results.enable_summary_text(summary_text);
    }
    results.add_results(DriverResults::new(summary, count));
    let final_results = results.finalize()?;

    Ok(final_results.passed)
}

/// Read every snapshot concurrently, keeping the command-line order.
async fn load_snapshots(args: &Args) -> Result<Vec<MetricsRecord>> {
    let mut tasks = JoinSet::new();
    for (index, path) in args.records.iter().cloned().enumerate() {
        let format = args.format;
        tasks.spawn(async move { (index, load_snapshot(path, format).await) });
    }

    let mut loaded: Vec<Option<MetricsRecord>> = vec![None; args.records.len()];
    while let Some(joined) = tasks.join_next().await {
        let (index, record) = joined.context("Snapshot loader panicked")?;
        loaded[index] = Some(record?);
    }
    Ok(loaded.into_iter().flatten().collect())
}

fn print_console_summary(summary: &DriverSummary, record: &MetricsRecord, config: &RunConfig) {
    println!();
    println!(
        "Driver {}: {} ({}), {} users, passed = {}",
        summary.driver_name,
        format_ops_rate(summary.metric.value),
        summary.metric.unit,
        summary.users,
        summary.passed
    );

    let widths = [20, 12, 10, 12, 12];
    print_table_separator(&widths);
    print_table_row(&["Operation", "Successes", "Mix", "Avg", "p90"], &widths);
    print_table_separator(&widths);
    let unit_nanos = config.response_time_unit.nanos() as f64;
    for (index, mix) in summary.mix.operations.iter().enumerate() {
        let response = &summary.response_times.operations[index];
        let to_text = |value: Option<f64>| {
            value
                .map(|v| format_duration_ns((v * unit_nanos) as u64))
                .unwrap_or_else(|| "-".to_string())
        };
        let successes = mix.successes.to_string();
        let ratio = format!("{:.4}", mix.mix);
        let avg = to_text(response.avg);
        let p90 = to_text(response.p90th);
        print_table_row(
            &[
                mix.name.as_str(),
                successes.as_str(),
                ratio.as_str(),
                avg.as_str(),
                p90.as_str(),
            ],
            &widths,
        );
    }
    print_table_separator(&widths);
    debug!("Merged record:\n{}", record);
}
