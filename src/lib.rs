//! # Load Generator Statistics Library
//!
//! The statistics core of a load-generating benchmark driver. Every virtual
//! user records its operations into a private [`MetricsRecord`]; records are
//! folded thread -> agent -> run and the merged result is scored against the
//! driver's response time, mix and delay targets.
//!
//! ## Architecture Overview
//!
//! The library is organized into several key modules:
//!
//! - `bucket`: Histogram and graph bucket layouts derived from the run configuration
//! - `config`: The immutable run configuration and its validation
//! - `record`: The per-thread metrics record and its flat counter matrices
//! - `accumulate`: The recording calls made after every operation attempt
//! - `merge`: Associative record merging and sequential/parallel folds
//! - `custom`: Extension point for driver-specific statistics
//! - `scoring`: Percentiles, SLA checks and the pass/fail verdict
//! - `report`: Summary text, detail tables and histogram flattening
//! - `results`: JSON output of scored runs
//! - `cli`, `logging`, `utils`: Collector plumbing
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use loadgen_stats::{
//!     accumulate::SuccessSample, fold_records, score, BucketScheme, MetricsRecord, OpId,
//!     RunConfig,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = RunConfig::from_file("run.json".as_ref())?;
//!     let scheme = BucketScheme::from_config(&config);
//!
//!     let mut per_thread = Vec::new();
//!     for _ in 0..4 {
//!         let mut record = MetricsRecord::new(config.operation_names(), scheme);
//!         record.record_success(&SuccessSample {
//!             op: OpId(0),
//!             invoke_time: 0,
//!             respond_time: 12_000_000,
//!             pause_time: 0,
//!             elapsed_since_run_start: 90_000_000_000,
//!             in_ramp: false,
//!         });
//!         record.wrap();
//!         per_thread.push(record);
//!     }
//!
//!     if let Some(run) = fold_records(per_thread)? {
//!         let summary = score(&run, &config)?;
//!         println!("passed: {}", summary.passed);
//!     }
//!     Ok(())
//! }
//! ```

/// Bucket layouts for response time, delay and graph series
pub mod bucket;

/// Command-line interface of the collector binary
///
/// Argument parsing using clap plus the snapshot formats records are
/// exchanged in (JSON and bincode).
pub mod cli;

pub mod config;

pub mod accumulate;

pub mod custom;

pub mod logging;

/// Record merging
///
/// Every field of a record merges with an associative and commutative
/// operator, so folds may be grouped and ordered freely.
pub mod merge;

pub mod record;

/// Text renderings of scored runs
pub mod report;

/// Result collection and JSON output
///
/// Wraps driver summaries with metadata (version, timestamp, report id and
/// system information) and writes them out.
pub mod results;

pub mod scoring;

pub mod utils;

pub use bucket::{BucketScheme, DelayBuckets, GraphBuckets, HistogramLayout, ResponseBuckets};
pub use config::{CycleKind, RunConfig, RunControl, TimeUnit};
pub use custom::{CustomMetrics, CustomResult};
pub use merge::{fold_parallel, fold_records};
pub use record::{MetricsRecord, OpId, OpMatrix, OpStats};
pub use results::ResultsManager;
pub use scoring::{score, DriverSummary};

/// The current version of the library
///
/// Populated from Cargo.toml and written into result metadata.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
///
/// Histogram shape defaults used when a run configuration does not
/// override them, plus collector defaults.
pub mod defaults {
    /// Width of a coarse response bucket, in fine buckets
    pub const RESPONSE_BUCKET_RATIO: u64 = 10;

    /// Fine response buckets per operation
    ///
    /// Together with the coarse buckets this keeps 370 counters per
    /// operation while resolving the region around the targets finely.
    pub const FINE_RESPONSE_BUCKETS: usize = 300;

    /// Coarse response buckets per operation
    pub const COARSE_RESPONSE_BUCKETS: usize = 70;

    /// Fine range as a multiple of the largest 90th percentile target
    pub const FINE_SPAN_FACTOR: f64 = 1.5;

    /// Delay histogram buckets per operation
    pub const DELAY_BUCKETS: usize = 100;

    /// Default output file name
    pub const OUTPUT_FILE: &str = "run_summary.json";
}
