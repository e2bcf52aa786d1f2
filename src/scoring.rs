//! # Scoring
//!
//! Turns a fully merged [`MetricsRecord`] into a [`DriverSummary`]: the
//! headline metric, the mix, response time and delay checks, any custom
//! results, and the overall verdict.
//!
//! SLA violations are ordinary outcomes reported through the `passed`
//! fields. Only a record that is malformed or does not match the configuration
//! is an error.

use crate::config::{CycleKind, RunConfig, TimeUnit};
use crate::custom::{CustomMetrics, CustomResult};
use crate::record::{MetricsRecord, OpId};
use anyhow::{bail, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;
use tracing::{debug, warn};

/// The 90th percentile expressed in permille.
pub const P90_PERMILLE: u64 = 900;

/// Targeted think times at or below this many seconds are treated as zero.
pub const ZERO_THINK_TIME_SECS: f64 = 0.001;

/// Index of the bucket at which the cumulative count first reaches
/// `ceil(total * permille / 1000)`. Returns `row.len()` if the row never
/// gets there and `None` when there are no samples.
pub fn percentile_bucket(row: &[u64], total: u64, permille: u64) -> Option<usize> {
    if total == 0 {
        return None;
    }
    let target = (total * permille + 999) / 1000;
    let mut cumulative = 0u64;
    for (index, count) in row.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return Some(index);
        }
    }
    Some(row.len())
}

/// Conservative 90th percentile of an operation, in nanoseconds: the start
/// boundary of the bucket after the one where 90% of samples are reached.
pub fn p90_nanos(record: &MetricsRecord, op: OpId) -> Option<u64> {
    let total = record.op(op).tx_count_steady;
    percentile_bucket(record.response_histogram().row(op), total, P90_PERMILLE)
        .map(|index| record.scheme().response.lower_bound(index + 1))
}

/// Delay deviation check. Think times targeting (nearly) zero cannot
/// deviate meaningfully and always pass.
pub fn delay_within_tolerance(
    kind: CycleKind,
    actual_avg: f64,
    targeted_avg: f64,
    deviation_percent: f64,
) -> bool {
    if kind == CycleKind::ThinkTime && targeted_avg <= ZERO_THINK_TIME_SECS {
        return true;
    }
    if targeted_avg == 0.0 {
        return actual_avg == 0.0;
    }
    (actual_avg - targeted_avg).abs() / targeted_avg <= deviation_percent / 100.0
}

/// Headline metric with its unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub unit: String,
    pub value: f64,
}

/// Total steady state operations with their unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpsTotal {
    pub unit: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixCheck {
    pub name: String,
    pub background: bool,
    pub successes: u64,
    pub failures: u64,
    pub mix: f64,
    pub required_mix: f64,
    pub allowed_deviation_percent: f64,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixSection {
    /// Foreground deviation as a fraction.
    pub allowed_deviation: f64,
    pub operations: Vec<MixCheck>,
}

/// Response time check of one operation, in the run's response time unit.
/// Operations without steady state successes have no values and no verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseCheck {
    pub name: String,
    pub background: bool,
    pub target_90th: f64,
    pub avg: Option<f64>,
    pub max: Option<f64>,
    pub p90th: Option<f64>,
    pub passed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSection {
    pub unit: TimeUnit,
    pub operations: Vec<ResponseCheck>,
}

/// Delay check of one operation, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayCheck {
    pub name: String,
    pub background: bool,
    pub kind: CycleKind,
    pub targeted_avg: Option<f64>,
    pub actual_avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub passed: Option<bool>,
}

/// Scored result of one driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverSummary {
    pub driver_name: String,
    pub metric: MetricValue,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_ops: OpsTotal,
    pub users: u32,
    /// Cycle time sum over steady state seconds; approximates the number of
    /// users by Little's law.
    pub rt_x_tps: f64,
    pub passed: bool,
    pub mix: MixSection,
    pub response_times: ResponseSection,
    pub delay_times: Vec<DelayCheck>,
    pub misc_stats: Vec<CustomResult>,
}

/// Collect custom results, tolerating a failing or sloppy extension.
pub fn collect_custom_results(attachment: &dyn CustomMetrics) -> Vec<CustomResult> {
    match attachment.results() {
        Ok(elements) => elements
            .into_iter()
            .filter_map(|element| {
                if element.is_none() {
                    warn!(
                        "Missing element returned from custom metrics {:?}, ignored",
                        attachment
                    );
                }
                element
            })
            .collect(),
        Err(e) => {
            warn!("Failed to collect custom metrics results: {:#}", e);
            Vec::new()
        }
    }
}

/// Score a merged record against its run configuration.
pub fn score(record: &MetricsRecord, config: &RunConfig) -> Result<DriverSummary> {
    let names = config.operation_names();
    if record.operations() != names.as_slice() {
        bail!(
            "Record operations {:?} do not match driver '{}' operations {:?}",
            record.operations(),
            config.driver_name,
            names
        );
    }
    record.validate()?;

    let steady_secs = config.steady_state_secs() as f64;
    let mix = score_mix(record, config);
    let response_times = score_response_times(record, config);
    let delay_times = score_delays(record, config);
    let misc_stats = record
        .attachment()
        .map(collect_custom_results)
        .unwrap_or_default();

    let metric_count: u64 = config
        .operations
        .iter()
        .zip(record.stats())
        .filter(|(operation, _)| operation.count_to_metric)
        .map(|(_, stats)| stats.tx_count_steady)
        .sum();
    let total_count: u64 = record.stats().iter().map(|s| s.tx_count_steady).sum();

    let passed = mix.operations.iter().all(|check| check.passed)
        && response_times
            .operations
            .iter()
            .all(|check| check.passed != Some(false))
        && delay_times.iter().all(|check| check.passed != Some(false))
        && misc_stats.iter().all(|stat| stat.passed != Some(false));

    let start_time = record.start_time();
    let end_time = start_time.and_then(|start| {
        let end = ChronoDuration::from_std(StdDuration::from_millis(record.end_time_ms()))
            .ok()
            .and_then(|offset| start.checked_add_signed(offset));
        if end.is_none() {
            warn!("End time offset {} ms is out of range, ignored", record.end_time_ms());
        }
        end
    });

    debug!(
        "Scored driver '{}': {} steady state operations, passed = {}",
        config.driver_name, total_count, passed
    );

    Ok(DriverSummary {
        driver_name: config.driver_name.clone(),
        metric: MetricValue {
            unit: config.metric_unit.clone(),
            value: metric_count as f64 / steady_secs,
        },
        start_time,
        end_time,
        total_ops: OpsTotal {
            unit: config.ops_unit.clone(),
            count: total_count,
        },
        users: record.thread_count(),
        rt_x_tps: record.cycle_sum() as f64 / (steady_secs * 1e9),
        passed,
        mix,
        response_times,
        delay_times,
        misc_stats,
    })
}

fn score_mix(record: &MetricsRecord, config: &RunConfig) -> MixSection {
    let fg = config.foreground_count();
    let counts: Vec<u64> = record.stats().iter().map(|s| s.tx_count_steady).collect();
    let fg_total: u64 = counts[..fg].iter().sum();
    let bg_total: u64 = counts[fg..].iter().sum();

    let operations = config
        .operations
        .iter()
        .enumerate()
        .map(|(index, operation)| {
            let op = OpId(index);
            let background = config.is_background(op);
            let group_total = if background { bg_total } else { fg_total };
            let mix = if group_total > 0 {
                counts[index] as f64 / group_total as f64
            } else {
                0.0
            };
            let (required_mix, allowed) = config.target_mix(op);
            let deviation = 100.0 * (mix - required_mix).abs();
            MixCheck {
                name: operation.name.clone(),
                background,
                successes: counts[index],
                failures: record.op(op).err_count_steady,
                mix,
                required_mix,
                allowed_deviation_percent: allowed,
                passed: deviation <= allowed,
            }
        })
        .collect();

    MixSection {
        allowed_deviation: config.foreground_mix.deviation_percent / 100.0,
        operations,
    }
}

fn score_response_times(record: &MetricsRecord, config: &RunConfig) -> ResponseSection {
    let unit = config.response_time_unit;
    let operations = config
        .operations
        .iter()
        .enumerate()
        .map(|(index, operation)| {
            let op = OpId(index);
            let stats = record.op(op);
            let mut check = ResponseCheck {
                name: operation.name.clone(),
                background: config.is_background(op),
                target_90th: operation.max_90th,
                avg: None,
                max: None,
                p90th: None,
                passed: None,
            };
            if let Some(p90) = p90_nanos(record, op) {
                let avg = stats.resp_sum_steady as f64 / stats.tx_count_steady as f64;
                check.avg = Some(unit.from_nanos(avg));
                check.max = Some(unit.from_nanos(stats.resp_max as f64));
                check.p90th = Some(unit.from_nanos(p90 as f64));
                check.passed = Some(p90 <= unit.to_nanos(operation.max_90th));
            }
            check
        })
        .collect();

    ResponseSection { unit, operations }
}

fn score_delays(record: &MetricsRecord, config: &RunConfig) -> Vec<DelayCheck> {
    config
        .operations
        .iter()
        .enumerate()
        .map(|(index, operation)| {
            let op = OpId(index);
            let stats = record.op(op);
            let kind = operation.cycle.kind;
            let mut check = DelayCheck {
                name: operation.name.clone(),
                background: config.is_background(op),
                kind,
                targeted_avg: None,
                actual_avg: None,
                min: None,
                max: None,
                passed: None,
            };
            if stats.delay_count_steady > 0 {
                let count = stats.delay_count_steady as f64 * 1e9;
                let actual = stats.delay_sum as f64 / count;
                let targeted = stats.targeted_delay_sum as f64 / count;
                check.actual_avg = Some(actual);
                check.targeted_avg = Some(targeted);
                check.min = stats.delay_min().map(|min| min as f64 / 1e9);
                check.max = Some(stats.delay_max as f64 / 1e9);
                check.passed = Some(delay_within_tolerance(
                    kind,
                    actual,
                    targeted,
                    operation.cycle.deviation_percent,
                ));
            }
            check
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulate::{DelayMeasurement, DelaySample, SuccessSample};
    use crate::bucket::BucketScheme;
    use crate::config::tests::sample_config;
    use crate::custom::tests::{BrokenStats, CacheStats};
    use crate::logging::tests::capture_logs;
    use crate::record::OpMatrix;
    use chrono::TimeZone;

    fn record_for(config: &RunConfig) -> MetricsRecord {
        MetricsRecord::new(config.operation_names(), BucketScheme::from_config(config))
    }

    fn succeed(record: &mut MetricsRecord, op: usize, times: usize, response_nanos: i64) {
        for _ in 0..times {
            record.record_success(&SuccessSample {
                op: OpId(op),
                invoke_time: 0,
                respond_time: response_nanos,
                pause_time: 0,
                elapsed_since_run_start: 1,
                in_ramp: false,
            });
        }
    }

    fn think(record: &mut MetricsRecord, op: usize, actual: u64, targeted: u64) {
        record.record_delay(&DelaySample {
            previous_op: Some(OpId(op)),
            measured: DelayMeasurement {
                cycle_time: Some(actual),
                delay_time: Some(actual),
            },
            targeted_delay: targeted,
            primary_mix: op < 2,
        });
    }

    /// A record that satisfies every target of the sample configuration.
    fn passing_record(config: &RunConfig) -> MetricsRecord {
        let mut record = record_for(config);
        succeed(&mut record, 0, 70, 100_000_000);
        succeed(&mut record, 1, 30, 900_000_000);
        succeed(&mut record, 2, 10, 400_000_000);
        for op in 0..3 {
            think(&mut record, op, 1_000_000_000, 1_000_000_000);
        }
        record
    }

    #[test]
    fn test_percentile_bucket_scenario() {
        let row = [0, 0, 3, 7, 0, 0];
        assert_eq!(percentile_bucket(&row, 10, P90_PERMILLE), Some(3));
        assert_eq!(percentile_bucket(&row, 0, P90_PERMILLE), None);
        assert_eq!(percentile_bucket(&[1, 0], 5, P90_PERMILLE), Some(2));
    }

    #[test]
    fn test_percentile_rounds_target_up() {
        // ceil(0.9 * 11) = 10, not 9.
        let row = [9, 1, 1];
        assert_eq!(percentile_bucket(&row, 11, P90_PERMILLE), Some(1));
        let row = [10, 0, 1];
        assert_eq!(percentile_bucket(&row, 11, P90_PERMILLE), Some(0));
    }

    #[test]
    fn test_p90_reports_next_bucket_start() {
        let config = sample_config();
        let mut record = record_for(&config);
        // Fine buckets are 10ms wide for a 2s largest target.
        succeed(&mut record, 0, 3, 25_000_000);
        succeed(&mut record, 0, 7, 35_000_000);

        assert_eq!(p90_nanos(&record, OpId(0)), Some(40_000_000));
        assert_eq!(p90_nanos(&record, OpId(1)), None);
    }

    #[test]
    fn test_delay_tolerance_rules() {
        assert!(delay_within_tolerance(CycleKind::ThinkTime, 9.0, 0.0, 5.0));
        assert!(delay_within_tolerance(CycleKind::ThinkTime, 9.0, 0.0005, 5.0));
        assert!(!delay_within_tolerance(CycleKind::CycleTime, 9.0, 0.0, 5.0));
        assert!(delay_within_tolerance(CycleKind::CycleTime, 0.0, 0.0, 5.0));
        assert!(delay_within_tolerance(CycleKind::CycleTime, 1.04, 1.0, 5.0));
        assert!(!delay_within_tolerance(CycleKind::ThinkTime, 1.06, 1.0, 5.0));
    }

    #[test]
    fn test_passing_run() {
        let config = sample_config();
        let record = passing_record(&config);
        let summary = score(&record, &config).unwrap();

        assert!(summary.passed);
        assert_eq!(summary.total_ops.count, 110);
        assert_eq!(summary.users, 1);
        // Audit does not count toward the metric.
        assert!((summary.metric.value - 100.0 / 300.0).abs() < 1e-12);
        assert!((summary.mix.operations[0].mix - 0.7).abs() < 1e-12);
        assert!((summary.mix.operations[2].mix - 1.0).abs() < 1e-12);
        assert!(summary.mix.operations[2].background);

        let browse = &summary.response_times.operations[0];
        assert_eq!(browse.avg, Some(100.0));
        assert_eq!(browse.p90th, Some(110.0));
        assert_eq!(browse.passed, Some(true));

        let delay = &summary.delay_times[0];
        assert_eq!(delay.actual_avg, Some(1.0));
        assert_eq!(delay.min, Some(1.0));
        assert_eq!(delay.passed, Some(true));
        // Only the two foreground cycles count.
        assert!((summary.rt_x_tps - 2.0 / 300.0).abs() < 1e-12);
    }

    #[test]
    fn test_mix_deviation_fails_run() {
        let mut config = sample_config();
        config.foreground_mix.ratios = vec![0.5, 0.5];
        config.foreground_mix.deviation_percent = 5.0;
        let mut record = record_for(&config);
        succeed(&mut record, 0, 60, 1_000);
        succeed(&mut record, 1, 40, 1_000);
        succeed(&mut record, 2, 5, 1_000);

        let summary = score(&record, &config).unwrap();
        assert!(!summary.mix.operations[0].passed);
        assert!(!summary.mix.operations[1].passed);
        assert!(summary.mix.operations[2].passed);
        assert!(!summary.passed);
    }

    #[test]
    fn test_response_ceiling_fails_run() {
        let config = sample_config();
        let mut record = passing_record(&config);
        // Push Browse past its 500ms target.
        succeed(&mut record, 0, 700, 600_000_000);
        succeed(&mut record, 1, 300, 900_000_000);

        let summary = score(&record, &config).unwrap();
        assert_eq!(summary.response_times.operations[0].passed, Some(false));
        assert!(!summary.passed);
    }

    #[test]
    fn test_operation_without_successes_is_not_evaluated() {
        let config = sample_config();
        let mut record = record_for(&config);
        succeed(&mut record, 0, 70, 100_000_000);
        succeed(&mut record, 1, 30, 900_000_000);

        let summary = score(&record, &config).unwrap();
        let audit = &summary.response_times.operations[2];
        assert_eq!(audit.avg, None);
        assert_eq!(audit.p90th, None);
        assert_eq!(audit.passed, None);
        assert_eq!(summary.delay_times[2].passed, None);
        assert_eq!(summary.mix.operations[2].mix, 0.0);
    }

    #[test]
    fn test_zero_think_time_target_is_skipped() {
        let config = sample_config();
        let mut record = record_for(&config);
        think(&mut record, 0, 3_000_000_000, 0);
        succeed(&mut record, 0, 70, 100_000_000);
        succeed(&mut record, 1, 30, 900_000_000);
        succeed(&mut record, 2, 10, 400_000_000);

        let summary = score(&record, &config).unwrap();
        assert_eq!(summary.delay_times[0].targeted_avg, Some(0.0));
        assert_eq!(summary.delay_times[0].actual_avg, Some(3.0));
        assert_eq!(summary.delay_times[0].passed, Some(true));
        assert!(summary.passed);
    }

    #[test]
    fn test_custom_results_fold_into_verdict() {
        let config = sample_config();
        let record = passing_record(&config).with_attachment(Box::new(CacheStats {
            hits: 10,
            misses: 5,
            max_misses: 2,
        }));

        let summary = score(&record, &config).unwrap();
        assert_eq!(summary.misc_stats.len(), 2);
        assert_eq!(summary.misc_stats[1].passed, Some(false));
        assert!(!summary.passed);
    }

    #[test]
    fn test_custom_results_error_is_not_fatal() {
        let config = sample_config();
        let record = passing_record(&config).with_attachment(Box::new(BrokenStats));

        let summary = score(&record, &config).unwrap();
        assert!(summary.misc_stats.is_empty());
        assert!(summary.passed);
    }

    #[test]
    fn test_custom_results_log_problems() {
        let cache = CacheStats {
            hits: 1,
            misses: 0,
            max_misses: 1,
        };
        let mut results = Vec::new();
        let logs = capture_logs(|| results = collect_custom_results(&cache));
        assert_eq!(results.len(), 2);
        assert!(logs.contains("Missing element returned from custom metrics"), "{}", logs);

        let logs = capture_logs(|| results = collect_custom_results(&BrokenStats));
        assert!(results.is_empty());
        assert!(logs.contains("Failed to collect custom metrics results"), "{}", logs);
        assert!(logs.contains("statistics backend unavailable"), "{}", logs);
    }

    #[test]
    fn test_malformed_record_is_rejected() {
        let config = sample_config();
        let mut record = passing_record(&config);
        record.resp_hist = OpMatrix::new(3, 2);
        assert!(score(&record, &config).is_err());
    }

    #[test]
    fn test_out_of_range_end_time_is_dropped() {
        let config = sample_config();
        let mut record =
            passing_record(&config).with_start_time(Utc.timestamp_opt(1_000, 0).unwrap());
        record.end_time_ms = u64::MAX;

        let summary = score(&record, &config).unwrap();
        assert!(summary.start_time.is_some());
        assert_eq!(summary.end_time, None);

        record.end_time_ms = 2_500;
        let summary = score(&record, &config).unwrap();
        assert_eq!(summary.end_time, Some(Utc.timestamp_opt(1_002, 500_000_000).unwrap()));
    }

    #[test]
    fn test_mismatched_record_is_rejected() {
        let config = sample_config();
        let record = MetricsRecord::new(
            vec!["Other".to_string()],
            BucketScheme::from_config(&config),
        );
        assert!(score(&record, &config).is_err());
    }
}
