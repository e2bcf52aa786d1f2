//! # Utility Functions and Helper Module
//!
//! Small helpers shared by the collector and the library: human-readable
//! formatting for console output, validation of configuration numbers, and
//! the worker count used for parallel folds.
//!
//! ## Key Functionality Categories
//!
//! - **Formatting**: Human-readable display of durations and operation rates
//! - **Validation**: Configuration value checks with clear error messages
//! - **System Information**: Default worker count from the available cores
//! - **Display Helpers**: Console table rows and separators
//!
//! ## Usage Examples
//!
//! ```rust
//! use loadgen_stats::utils::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! assert_eq!(format_duration_ns(1_500_000), "1.50ms");
//! assert_eq!(format_ops_rate(1500.0), "1.50K ops/s");
//!
//! validate_percent("mix deviation", 2.0)?;
//! # Ok(())
//! # }
//! ```

use anyhow::{bail, Result};
use std::time::Duration;

/// Convert nanoseconds to a human-readable duration string
///
/// Convenience wrapper around [`format_duration`] for the nanosecond values
/// that records store.
///
/// ## Examples
///
/// ```rust
/// # use loadgen_stats::utils::format_duration_ns;
/// assert_eq!(format_duration_ns(500), "500ns");
/// assert_eq!(format_duration_ns(1500), "1.50μs");
/// assert_eq!(format_duration_ns(1500000), "1.50ms");
/// ```
pub fn format_duration_ns(ns: u64) -> String {
    format_duration(Duration::from_nanos(ns))
}

/// Format a duration in a human-readable way
///
/// ## Unit Selection Logic
///
/// - **Nanoseconds**: < 1,000 ns (e.g., "500ns")
/// - **Microseconds**: < 1,000,000 ns (e.g., "1.50μs")
/// - **Milliseconds**: < 1,000,000,000 ns (e.g., "25.75ms")
/// - **Seconds**: < 60 seconds (e.g., "5.25s")
/// - **Minutes and Hours**: For longer durations (e.g., "5m 30s", "2h 15m 30s")
///
/// ## Examples
///
/// ```rust
/// # use loadgen_stats::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

/// Format an operation rate with K/M scaling
///
/// ```rust
/// # use loadgen_stats::utils::format_ops_rate;
/// assert_eq!(format_ops_rate(750.0), "750.00 ops/s");
/// assert_eq!(format_ops_rate(2300000.0), "2.30M ops/s");
/// ```
pub fn format_ops_rate(ops_per_second: f64) -> String {
    if ops_per_second < 1000.0 {
        format!("{:.2} ops/s", ops_per_second)
    } else if ops_per_second < 1_000_000.0 {
        format!("{:.2}K ops/s", ops_per_second / 1000.0)
    } else {
        format!("{:.2}M ops/s", ops_per_second / 1_000_000.0)
    }
}

/// Validate a percentage (tolerance or deviation)
///
/// ## Validation Rules
///
/// - **Finite**: NaN and infinities are rejected
/// - **Minimum**: 0 (a zero tolerance only accepts exact matches)
///
/// Values above 100 are accepted; a tolerance that wide simply never fails.
pub fn validate_percent(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        bail!("{} must be a finite percentage, got {}", name, value);
    }
    if value < 0.0 {
        bail!("{} cannot be negative, got {}%", name, value);
    }
    Ok(())
}

/// Validate a non-negative finite quantity such as a target or a ceiling.
pub fn validate_non_negative(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        bail!("{} must be a non-negative number, got {}", name, value);
    }
    Ok(())
}

/// Validate the number of parallel fold workers
///
/// ## Validation Rules
///
/// - **Minimum**: 1 worker
/// - **Maximum**: 1024 workers
pub fn validate_workers(workers: usize) -> Result<()> {
    if workers == 0 {
        bail!("Worker count cannot be zero");
    }
    if workers > 1024 {
        bail!("Worker count {} is too high (maximum 1024)", workers);
    }
    Ok(())
}

/// Default number of fold workers: one per logical core.
pub fn default_workers() -> usize {
    num_cpus::get().max(1)
}

/// Print a table row with specified column widths
///
/// ```text
/// | Operation      | Successes | p90        |
/// ```
pub fn print_table_row(columns: &[&str], widths: &[usize]) {
    print!("|");
    for (i, column) in columns.iter().enumerate() {
        let width = widths.get(i).copied().unwrap_or(10);
        print!(" {:width$} |", column, width = width);
    }
    println!();
}

/// Print a table separator matching [`print_table_row`] widths.
pub fn print_table_separator(widths: &[usize]) {
    print!("+");
    for &width in widths {
        print!("{}", "-".repeat(width + 2));
        print!("+");
    }
    println!();
}
