//! # Bucket Scheme
//!
//! Derives the histogram and graph bucket layouts shared by every
//! [`MetricsRecord`](crate::record::MetricsRecord) of a run.
//!
//! ## Response Time Buckets
//!
//! Response times use two resolutions. Fine buckets cover the range up to
//! 1.5x the largest configured 90th percentile target, which is where
//! pass/fail decisions are made. Beyond that, coarse buckets that are
//! `ratio` times wider cover the next 3.5x. Anything past the coarse range
//! collapses into the final bucket. With the default 300 fine and 70 coarse
//! buckets this is 370 buckets per operation instead of the 1000 a uniform
//! layout would need for the same precision near the target.
//!
//! ## Delay and Graph Buckets
//!
//! Delay (cycle/think) times use a fixed number of uniform buckets sized
//! from the largest configured delay histogram ceiling. The time-series
//! graphs are bucketed by the configured graph interval over the run span.

use crate::config::{RunConfig, RunControl};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Smallest bucket width ever produced, in nanoseconds.
///
/// A zero target or ceiling would otherwise yield zero-width buckets and a
/// division by zero when locating a sample.
pub const MIN_BUCKET_NANOS: u64 = 1;

/// Clip a raw bucket index into `[0, count)`.
///
/// Every histogram and graph locates its bucket through this function so
/// that overflowing samples always land in the last bucket.
pub fn clip_bucket(raw: u64, count: usize) -> usize {
    let last = count.saturating_sub(1) as u64;
    raw.min(last) as usize
}

/// Tunable shape of the response and delay histograms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramLayout {
    pub fine_buckets: usize,
    pub coarse_buckets: usize,
    /// Width of a coarse bucket in fine buckets.
    pub ratio: u64,
    /// Fine range as a multiple of the largest 90th percentile target.
    pub fine_span: f64,
    pub delay_buckets: usize,
}

impl Default for HistogramLayout {
    fn default() -> Self {
        Self {
            fine_buckets: crate::defaults::FINE_RESPONSE_BUCKETS,
            coarse_buckets: crate::defaults::COARSE_RESPONSE_BUCKETS,
            ratio: crate::defaults::RESPONSE_BUCKET_RATIO,
            fine_span: crate::defaults::FINE_SPAN_FACTOR,
            delay_buckets: crate::defaults::DELAY_BUCKETS,
        }
    }
}

impl HistogramLayout {
    pub fn validate(&self) -> Result<()> {
        if self.fine_buckets == 0 {
            bail!("Histogram layout needs at least one fine bucket");
        }
        if self.ratio == 0 {
            bail!("Coarse bucket ratio must be at least 1");
        }
        if self.delay_buckets == 0 {
            bail!("Histogram layout needs at least one delay bucket");
        }
        if !self.fine_span.is_finite() || self.fine_span <= 0.0 {
            bail!(
                "Fine span factor must be a positive number, got {}",
                self.fine_span
            );
        }
        Ok(())
    }
}

/// Dual-resolution response time bucket layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseBuckets {
    fine_size: u64,
    fine_count: usize,
    coarse_count: usize,
    ratio: u64,
}

impl ResponseBuckets {
    /// Build a layout from explicit sizes. `fine_size` and `ratio` are
    /// floored at their smallest usable values.
    pub fn new(fine_size: u64, fine_count: usize, coarse_count: usize, ratio: u64) -> Self {
        Self {
            fine_size: fine_size.max(MIN_BUCKET_NANOS),
            fine_count: fine_count.max(1),
            coarse_count,
            ratio: ratio.max(1),
        }
    }

    /// Derive the layout from the largest 90th percentile target.
    pub fn from_target(max_90th_nanos: u64, layout: &HistogramLayout) -> Self {
        let fine_count = layout.fine_buckets.max(1);
        let fine_size =
            (max_90th_nanos as f64 * layout.fine_span / fine_count as f64).floor() as u64;
        Self::new(fine_size, fine_count, layout.coarse_buckets, layout.ratio)
    }

    pub fn fine_size(&self) -> u64 {
        self.fine_size
    }

    pub fn fine_count(&self) -> usize {
        self.fine_count
    }

    pub fn coarse_size(&self) -> u64 {
        self.fine_size.saturating_mul(self.ratio)
    }

    pub fn coarse_count(&self) -> usize {
        self.coarse_count
    }

    pub fn ratio(&self) -> u64 {
        self.ratio
    }

    /// Upper (exclusive) bound of the fine range.
    pub fn fine_max(&self) -> u64 {
        self.fine_size.saturating_mul(self.fine_count as u64)
    }

    /// Upper (exclusive) bound of the coarse range.
    pub fn coarse_max(&self) -> u64 {
        self.fine_max()
            .saturating_add(self.coarse_size().saturating_mul(self.coarse_count as u64))
    }

    /// Total number of buckets per operation.
    pub fn len(&self) -> usize {
        self.fine_count + self.coarse_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locate the bucket for a response time.
    pub fn index_of(&self, response_nanos: u64) -> usize {
        let fine_max = self.fine_max();
        let raw = if response_nanos < fine_max {
            response_nanos / self.fine_size
        } else if response_nanos < self.coarse_max() {
            (response_nanos - fine_max) / self.coarse_size() + self.fine_count as u64
        } else {
            u64::MAX
        };
        clip_bucket(raw, self.len())
    }

    /// Start boundary of bucket `index`, in nanoseconds. Indices past the
    /// last bucket map to the end of the coarse range.
    pub fn lower_bound(&self, index: usize) -> u64 {
        if index < self.fine_count {
            index as u64 * self.fine_size
        } else if index < self.len() {
            (index - self.fine_count) as u64 * self.coarse_size() + self.fine_max()
        } else {
            self.coarse_max()
        }
    }
}

/// Uniform delay time bucket layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayBuckets {
    size: u64,
    count: usize,
}

impl DelayBuckets {
    pub fn new(size: u64, count: usize) -> Self {
        Self {
            size: size.max(MIN_BUCKET_NANOS),
            count: count.max(1),
        }
    }

    /// Size the buckets so that `count` of them span `ceiling_nanos`.
    pub fn from_ceiling(ceiling_nanos: u64, count: usize) -> Self {
        let count = count.max(1);
        let per = count as u64;
        let size = ceiling_nanos / per + u64::from(ceiling_nanos % per != 0);
        Self::new(size, count)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn index_of(&self, delay_nanos: u64) -> usize {
        clip_bucket(delay_nanos / self.size, self.count)
    }

    pub fn lower_bound(&self, index: usize) -> u64 {
        index as u64 * self.size
    }
}

/// Time-series bucket layout for the throughput and response graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphBuckets {
    interval_nanos: u64,
    count: usize,
}

impl GraphBuckets {
    pub fn new(interval_nanos: u64, count: usize) -> Self {
        Self {
            interval_nanos: interval_nanos.max(MIN_BUCKET_NANOS),
            count: count.max(1),
        }
    }

    /// Size the graph from the run timing. Time-controlled runs get one
    /// bucket per interval over ramp up, steady state and ramp down plus a
    /// spare; cycle-controlled runs cover the maximum run time.
    pub fn from_run(control: &RunControl, interval_secs: u64) -> Self {
        let interval_secs = interval_secs.max(1);
        let count = match *control {
            RunControl::Time {
                ramp_up_secs,
                steady_state_secs,
                ramp_down_secs,
            } => 1 + (ramp_up_secs + steady_state_secs + ramp_down_secs) / interval_secs,
            RunControl::Cycles { max_run_hours, .. } => {
                (3600.0 * max_run_hours / interval_secs as f64).ceil() as u64
            }
        };
        Self::new(interval_secs.saturating_mul(1_000_000_000), count as usize)
    }

    pub fn interval_nanos(&self) -> u64 {
        self.interval_nanos
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Locate the graph bucket for a time offset from the run start.
    pub fn index_of(&self, elapsed_nanos: u64) -> usize {
        clip_bucket(elapsed_nanos / self.interval_nanos, self.count)
    }
}

/// All bucket layouts for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketScheme {
    pub response: ResponseBuckets,
    pub delay: DelayBuckets,
    pub graph: GraphBuckets,
}

impl BucketScheme {
    pub fn new(response: ResponseBuckets, delay: DelayBuckets, graph: GraphBuckets) -> Self {
        Self {
            response,
            delay,
            graph,
        }
    }

    /// Compute the scheme for a validated run configuration.
    pub fn from_config(config: &RunConfig) -> Self {
        let layout = &config.histogram;
        let response = ResponseBuckets::from_target(config.max_90th_nanos(), layout);
        let delay =
            DelayBuckets::from_ceiling(config.max_delay_ceiling_nanos(), layout.delay_buckets);
        let graph = GraphBuckets::from_run(&config.run_control, config.graph_interval_secs);
        tracing::debug!(
            fine_size = response.fine_size(),
            coarse_size = response.coarse_size(),
            delay_size = delay.size(),
            graph_buckets = graph.len(),
            "Derived bucket scheme"
        );
        Self::new(response, delay, graph)
    }

    /// Reject layouts no constructor can produce, such as zero-width or
    /// zero-count buckets read back from a snapshot.
    pub fn validate(&self) -> Result<()> {
        let response = &self.response;
        if response.fine_size < MIN_BUCKET_NANOS || response.fine_count == 0 || response.ratio == 0
        {
            bail!(
                "Invalid response bucket layout: fine size {}, fine count {}, ratio {}",
                response.fine_size,
                response.fine_count,
                response.ratio
            );
        }
        if self.delay.size < MIN_BUCKET_NANOS || self.delay.count == 0 {
            bail!(
                "Invalid delay bucket layout: size {}, count {}",
                self.delay.size,
                self.delay.count
            );
        }
        if self.graph.interval_nanos < MIN_BUCKET_NANOS || self.graph.count == 0 {
            bail!(
                "Invalid graph bucket layout: interval {}, count {}",
                self.graph.interval_nanos,
                self.graph.count
            );
        }
        Ok(())
    }
}
