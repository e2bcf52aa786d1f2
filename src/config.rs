//! # Run Configuration
//!
//! The immutable description of a run that the bucket scheme and the scorer
//! consume. It is loaded once (usually from JSON written by the harness),
//! validated, and then passed by reference wherever it is needed.

use crate::bucket::HistogramLayout;
use crate::record::OpId;
use crate::utils::{validate_non_negative, validate_percent};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Unit used to express response time targets and to display response times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[default]
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl TimeUnit {
    /// Number of nanoseconds in one unit.
    pub fn nanos(self) -> u64 {
        match self {
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Nanoseconds => 1,
        }
    }

    /// Convert a value in this unit to whole nanoseconds. Negative values
    /// become zero.
    pub fn to_nanos(self, value: f64) -> u64 {
        (value * self.nanos() as f64).round() as u64
    }

    /// Convert nanoseconds to this unit.
    pub fn from_nanos(self, nanos: f64) -> f64 {
        nanos / self.nanos() as f64
    }
}

impl std::fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeUnit::Seconds => write!(f, "seconds"),
            TimeUnit::Milliseconds => write!(f, "milliseconds"),
            TimeUnit::Microseconds => write!(f, "microseconds"),
            TimeUnit::Nanoseconds => write!(f, "nanoseconds"),
        }
    }
}

/// How the pause between two operations of a user is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    /// Time between two successive invocations.
    CycleTime,
    /// Time between the previous response and the next invocation.
    ThinkTime,
}

impl std::fmt::Display for CycleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleKind::CycleTime => write!(f, "cycleTime"),
            CycleKind::ThinkTime => write!(f, "thinkTime"),
        }
    }
}

/// Delay settings of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSpec {
    pub kind: CycleKind,
    /// Allowed deviation of the actual average delay, in percent.
    pub deviation_percent: f64,
    /// Upper end of the delay histogram, in seconds.
    pub histogram_max_secs: f64,
}

/// Targets of one operation type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    pub name: String,
    /// 90th percentile response time ceiling, in the run's response time unit.
    pub max_90th: f64,
    pub cycle: CycleSpec,
    /// Whether successes of this operation count toward the headline metric.
    #[serde(default = "default_true")]
    pub count_to_metric: bool,
}

/// Target ratios of one mix group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixSpec {
    pub ratios: Vec<f64>,
    /// Allowed deviation from each ratio, in percentage points.
    pub deviation_percent: f64,
}

/// How the run length is controlled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunControl {
    /// Fixed ramp up, steady state and ramp down durations.
    Time {
        ramp_up_secs: u64,
        steady_state_secs: u64,
        ramp_down_secs: u64,
    },
    /// Fixed number of cycles bounded by a maximum run time.
    Cycles {
        max_run_hours: f64,
        steady_state_secs: u64,
    },
}

impl RunControl {
    pub fn steady_state_secs(&self) -> u64 {
        match self {
            RunControl::Time {
                steady_state_secs, ..
            }
            | RunControl::Cycles {
                steady_state_secs, ..
            } => *steady_state_secs,
        }
    }

    pub fn is_cycle_controlled(&self) -> bool {
        matches!(self, RunControl::Cycles { .. })
    }
}

/// Complete configuration of one driver's run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub driver_name: String,
    #[serde(default = "default_metric_unit")]
    pub metric_unit: String,
    #[serde(default = "default_ops_unit")]
    pub ops_unit: String,
    #[serde(default)]
    pub response_time_unit: TimeUnit,
    pub graph_interval_secs: u64,
    pub run_control: RunControl,
    pub operations: Vec<OperationSpec>,
    /// Primary mix. Its operations are the first `ratios.len()` entries of
    /// `operations`.
    pub foreground_mix: MixSpec,
    /// Background mix covering the remaining operations, if any.
    #[serde(default)]
    pub background_mix: Option<MixSpec>,
    #[serde(default)]
    pub histogram: HistogramLayout,
}

fn default_true() -> bool {
    true
}

fn default_metric_unit() -> String {
    "ops/sec".to_string()
}

fn default_ops_unit() -> String {
    "operations".to_string()
}

impl RunConfig {
    /// Load and validate a configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read run configuration {}", path.display()))?;
        Self::from_json(&text)
            .with_context(|| format!("Invalid run configuration {}", path.display()))
    }

    /// Parse and validate a configuration from a JSON string.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: RunConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the structural rules every consumer relies on.
    pub fn validate(&self) -> Result<()> {
        if self.operations.is_empty() {
            bail!("Driver '{}' defines no operations", self.driver_name);
        }
        if self.graph_interval_secs == 0 {
            bail!("Graph interval must be at least one second");
        }
        if self.run_control.steady_state_secs() == 0 {
            bail!("Steady state duration must be greater than zero");
        }
        if let RunControl::Cycles { max_run_hours, .. } = self.run_control {
            if !max_run_hours.is_finite() || max_run_hours <= 0.0 {
                bail!("Maximum run time must be positive, got {} hours", max_run_hours);
            }
        }

        let fg = self.foreground_mix.ratios.len();
        let bg = self
            .background_mix
            .as_ref()
            .map_or(0, |mix| mix.ratios.len());
        if fg == 0 {
            bail!("Foreground mix must contain at least one operation");
        }
        if fg + bg != self.operations.len() {
            bail!(
                "Mix defines {} operations but the driver has {}",
                fg + bg,
                self.operations.len()
            );
        }
        validate_percent("foreground mix deviation", self.foreground_mix.deviation_percent)?;
        if let Some(mix) = &self.background_mix {
            validate_percent("background mix deviation", mix.deviation_percent)?;
        }

        for op in &self.operations {
            validate_non_negative(&format!("{} 90th percentile target", op.name), op.max_90th)?;
            validate_non_negative(
                &format!("{} delay histogram maximum", op.name),
                op.cycle.histogram_max_secs,
            )?;
            validate_percent(&format!("{} delay deviation", op.name), op.cycle.deviation_percent)?;
        }

        self.histogram.validate()
    }

    pub fn operation_names(&self) -> Vec<String> {
        self.operations.iter().map(|op| op.name.clone()).collect()
    }

    pub fn steady_state_secs(&self) -> u64 {
        self.run_control.steady_state_secs()
    }

    /// Number of operations that belong to the foreground mix.
    pub fn foreground_count(&self) -> usize {
        self.foreground_mix.ratios.len()
    }

    pub fn is_background(&self, op: OpId) -> bool {
        op.index() >= self.foreground_count()
    }

    /// Target ratio and allowed deviation (percent) for an operation.
    pub fn target_mix(&self, op: OpId) -> (f64, f64) {
        let fg = self.foreground_count();
        if op.index() < fg {
            (
                self.foreground_mix.ratios[op.index()],
                self.foreground_mix.deviation_percent,
            )
        } else {
            self.background_mix
                .as_ref()
                .and_then(|mix| {
                    mix.ratios
                        .get(op.index() - fg)
                        .map(|ratio| (*ratio, mix.deviation_percent))
                })
                .unwrap_or((0.0, 0.0))
        }
    }

    /// Largest 90th percentile target across all operations, in nanoseconds.
    pub fn max_90th_nanos(&self) -> u64 {
        let max = self
            .operations
            .iter()
            .map(|op| op.max_90th)
            .fold(0.0_f64, f64::max);
        self.response_time_unit.to_nanos(max)
    }

    /// Largest delay histogram ceiling across all operations, in nanoseconds.
    pub fn max_delay_ceiling_nanos(&self) -> u64 {
        let max = self
            .operations
            .iter()
            .map(|op| op.cycle.histogram_max_secs)
            .fold(0.0_f64, f64::max);
        TimeUnit::Seconds.to_nanos(max)
    }
}
