//! # Sample Accumulation
//!
//! The three recording calls a virtual user makes against its own
//! [`MetricsRecord`]: one per successful operation, one per failed
//! operation, and one per measured delay. Each record has a single writer,
//! so none of these synchronize.
//!
//! All timestamps are nanoseconds on the driver's monotonic clock. The
//! caller passes everything the call needs; the record holds no reference
//! back to the thread that owns it.

use crate::config::CycleKind;
use crate::record::{MetricsRecord, OpId};
use tracing::warn;

/// Timing of one successful operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuccessSample {
    pub op: OpId,
    pub invoke_time: i64,
    pub respond_time: i64,
    /// Time the operation spent paused inside its timed section.
    pub pause_time: i64,
    /// `respond_time` relative to the start of the run.
    pub elapsed_since_run_start: i64,
    pub in_ramp: bool,
}

impl SuccessSample {
    /// Raw response time, possibly negative.
    pub fn response_time(&self) -> i64 {
        self.respond_time - self.invoke_time - self.pause_time
    }
}

/// Steady state window on the driver clock, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SteadyWindow {
    pub start: i64,
    pub end: i64,
}

impl SteadyWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// True when the interval `[from, to]` lies inside the window.
    pub fn contains(&self, from: i64, to: i64) -> bool {
        from >= self.start && to <= self.end
    }
}

/// Timestamps needed to measure the delay before an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayTiming {
    pub kind: CycleKind,
    pub invoke_time: i64,
    /// Invocation time of the previous operation in the same mix.
    pub previous_invoke: i64,
    /// Response time of the previous operation, `None` if it failed before
    /// responding.
    pub previous_respond: Option<i64>,
    pub window: SteadyWindow,
}

/// Result of [`DelayTiming::measure`]. `None` means not measurable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DelayMeasurement {
    pub cycle_time: Option<u64>,
    pub delay_time: Option<u64>,
}

impl DelayTiming {
    /// Derive the cycle time and the delay for this invocation.
    ///
    /// Both endpoints must lie in the steady state window. A think time
    /// whose previous operation never responded falls back to the cycle
    /// time.
    pub fn measure(&self) -> DelayMeasurement {
        let cycle_time = self.span(self.previous_invoke);
        let delay_time = match self.kind {
            CycleKind::CycleTime => cycle_time,
            CycleKind::ThinkTime => match self.previous_respond {
                Some(respond) => self.span(respond),
                None => cycle_time,
            },
        };
        DelayMeasurement {
            cycle_time,
            delay_time,
        }
    }

    fn span(&self, from: i64) -> Option<u64> {
        if !self.window.contains(from, self.invoke_time) {
            return None;
        }
        u64::try_from(self.invoke_time - from).ok()
    }
}

/// One delay observation attributed to the operation that preceded it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelaySample {
    /// Operation the delay follows, `None` on a user's first cycle.
    pub previous_op: Option<OpId>,
    pub measured: DelayMeasurement,
    /// Delay the driver aimed for, in nanoseconds.
    pub targeted_delay: u64,
    /// Whether the cycle belongs to the primary (foreground) mix.
    pub primary_mix: bool,
}

impl MetricsRecord {
    /// Record a successful operation.
    pub fn record_success(&mut self, sample: &SuccessSample) {
        let op = sample.op;
        if !self.ensure_op(op) {
            warn!("Ignoring success for unknown operation {}", op);
            return;
        }
        if self.thread_count == 0 {
            self.thread_count = 1;
        }
        self.note_response(sample.elapsed_since_run_start);

        let raw = sample.response_time();
        let response = if raw < 0 {
            warn!(
                "Pause time too large - invoke: {}, respond: {}, pause: {}",
                sample.invoke_time, sample.respond_time, sample.pause_time
            );
            0
        } else {
            raw as u64
        };

        if sample.elapsed_since_run_start > 0 {
            let bucket = self
                .scheme
                .graph
                .index_of(sample.elapsed_since_run_start as u64);
            self.throughput_graph.add(op, bucket, 1);
            self.resp_graph.add(op, bucket, response);
        }

        let stats = &mut self.stats[op.index()];
        stats.tx_count_total += 1;
        stats.resp_sum_total = stats.resp_sum_total.saturating_add(response);

        if !sample.in_ramp {
            stats.tx_count_steady += 1;
            stats.resp_sum_steady = stats.resp_sum_steady.saturating_add(response);
            stats.resp_max = stats.resp_max.max(response);
            let bucket = self.scheme.response.index_of(response);
            self.resp_hist.add(op, bucket, 1);
        }
    }

    /// Record an operation that failed. No response time is kept.
    pub fn record_failure(&mut self, op: OpId, in_ramp: bool) {
        if !self.ensure_op(op) {
            warn!("Ignoring failure for unknown operation {}", op);
            return;
        }
        if self.thread_count == 0 {
            self.thread_count = 1;
        }
        let stats = &mut self.stats[op.index()];
        stats.err_count_total += 1;
        if !in_ramp {
            stats.err_count_steady += 1;
        }
    }

    /// Record the delay preceding an invocation, whether or not the
    /// invocation later succeeds.
    pub fn record_delay(&mut self, sample: &DelaySample) {
        let Some(op) = sample.previous_op else {
            return;
        };
        if !self.ensure_op(op) {
            warn!("Ignoring delay for unknown operation {}", op);
            return;
        }

        // Background cycles would skew the Little's law check.
        if sample.primary_mix {
            if let Some(cycle) = sample.measured.cycle_time {
                self.cycle_sum = self.cycle_sum.saturating_add(cycle);
            }
        }

        let Some(delay) = sample.measured.delay_time else {
            return;
        };

        let stats = &mut self.stats[op.index()];
        stats.delay_count_steady += 1;
        stats.delay_sum = stats.delay_sum.saturating_add(delay);
        stats.targeted_delay_sum = stats.targeted_delay_sum.saturating_add(sample.targeted_delay);
        stats.delay_max = stats.delay_max.max(delay);
        stats.delay_min = stats.delay_min.min(delay);

        let buckets = self.scheme.delay;
        self.delay_hist.add(op, buckets.index_of(delay), 1);
        self.targeted_delay_hist
            .add(op, buckets.index_of(sample.targeted_delay), 1);
    }
}
