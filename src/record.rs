//! # Metrics Record
//!
//! The per-thread (or per-agent, or per-run) accumulator. A record is created
//! from the run's [`BucketScheme`] and operation names, written by exactly
//! one owner through the accumulation calls in [`crate::accumulate`], and
//! then folded into larger records by [`crate::merge`].
//!
//! Histograms and graphs are stored as flat [`OpMatrix`] arenas indexed by
//! `(OpId, bucket)`; all scalar per-operation counters live in [`OpStats`].

use crate::bucket::BucketScheme;
use crate::custom::CustomMetrics;
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of an operation type within the run's ordered operation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId(pub usize);

impl OpId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for OpId {
    fn from(index: usize) -> Self {
        OpId(index)
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Fixed-shape `operations x buckets` counter matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpMatrix {
    ops: usize,
    buckets: usize,
    cells: Vec<u64>,
}

impl OpMatrix {
    pub fn new(ops: usize, buckets: usize) -> Self {
        Self {
            ops,
            buckets,
            cells: vec![0; ops * buckets],
        }
    }

    /// Build a matrix from one row per operation. All rows must have the
    /// same length.
    pub fn from_rows(rows: Vec<Vec<u64>>) -> Result<Self> {
        let buckets = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().position(|row| row.len() != buckets) {
            bail!(
                "Row {} has {} buckets, expected {}",
                bad,
                rows[bad].len(),
                buckets
            );
        }
        let ops = rows.len();
        Ok(Self {
            ops,
            buckets,
            cells: rows.into_iter().flatten().collect(),
        })
    }

    pub fn ops(&self) -> usize {
        self.ops
    }

    pub fn buckets(&self) -> usize {
        self.buckets
    }

    pub fn get(&self, op: OpId, bucket: usize) -> u64 {
        self.cells[op.index() * self.buckets + bucket]
    }

    pub fn add(&mut self, op: OpId, bucket: usize, amount: u64) {
        let cell = &mut self.cells[op.index() * self.buckets + bucket];
        *cell = cell.saturating_add(amount);
    }

    pub fn set(&mut self, op: OpId, bucket: usize, value: u64) {
        self.cells[op.index() * self.buckets + bucket] = value;
    }

    pub fn row(&self, op: OpId) -> &[u64] {
        let start = op.index() * self.buckets;
        &self.cells[start..start + self.buckets]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u64]> + '_ {
        (0..self.ops).map(move |op| self.row(OpId(op)))
    }

    pub fn row_sum(&self, op: OpId) -> u64 {
        self.row(op).iter().sum()
    }

    /// True when no operation has a non-zero count in `bucket`.
    pub fn column_is_zero(&self, bucket: usize) -> bool {
        (0..self.ops).all(|op| self.get(OpId(op), bucket) == 0)
    }

    /// Check that the matrix is `ops x buckets` and that its storage holds
    /// exactly that many cells.
    pub fn check_shape(&self, name: &str, ops: usize, buckets: usize) -> Result<()> {
        if self.ops != ops || self.buckets != buckets {
            bail!(
                "{} is {}x{}, expected {}x{}",
                name,
                self.ops,
                self.buckets,
                ops,
                buckets
            );
        }
        if self.ops.checked_mul(self.buckets) != Some(self.cells.len()) {
            bail!(
                "{} holds {} cells for a {}x{} shape",
                name,
                self.cells.len(),
                self.ops,
                self.buckets
            );
        }
        Ok(())
    }

    /// Add `other` bucket-for-bucket. Both matrices must share one shape.
    pub fn merge_from(&mut self, other: &OpMatrix) -> Result<()> {
        if self.ops != other.ops || self.buckets != other.buckets {
            bail!(
                "Cannot merge a {}x{} matrix into a {}x{} matrix",
                other.ops,
                other.buckets,
                self.ops,
                self.buckets
            );
        }
        self.add_cells(other);
        Ok(())
    }

    pub(crate) fn add_cells(&mut self, other: &OpMatrix) {
        for (mine, theirs) in self.cells.iter_mut().zip(&other.cells) {
            *mine = mine.saturating_add(*theirs);
        }
    }
}

/// Scalar counters of one operation type. Times are in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpStats {
    pub tx_count_steady: u64,
    pub tx_count_total: u64,
    pub err_count_steady: u64,
    pub err_count_total: u64,
    /// Delay samples recorded during steady state.
    pub delay_count_steady: u64,
    pub resp_sum_steady: u64,
    pub resp_sum_total: u64,
    pub resp_max: u64,
    pub delay_sum: u64,
    pub targeted_delay_sum: u64,
    pub delay_max: u64,
    /// `u64::MAX` until the first delay sample.
    pub delay_min: u64,
}

impl Default for OpStats {
    fn default() -> Self {
        Self {
            tx_count_steady: 0,
            tx_count_total: 0,
            err_count_steady: 0,
            err_count_total: 0,
            delay_count_steady: 0,
            resp_sum_steady: 0,
            resp_sum_total: 0,
            resp_max: 0,
            delay_sum: 0,
            targeted_delay_sum: 0,
            delay_max: 0,
            delay_min: u64::MAX,
        }
    }
}

impl OpStats {
    /// Minimum delay, if any delay was recorded.
    pub fn delay_min(&self) -> Option<u64> {
        (self.delay_min != u64::MAX).then_some(self.delay_min)
    }
}

/// Statistics of one reporting unit (thread, agent or whole run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub(crate) operations: Vec<String>,
    pub(crate) scheme: BucketScheme,
    /// Threads this record represents.
    pub(crate) thread_count: u32,
    pub(crate) start_time: Option<DateTime<Utc>>,
    /// End of the run as a millisecond offset from `start_time`.
    pub(crate) end_time_ms: u64,
    /// Sum of primary-mix cycle times, for the Little's law cross-check.
    pub(crate) cycle_sum: u64,
    pub(crate) stats: Vec<OpStats>,
    pub(crate) resp_hist: OpMatrix,
    pub(crate) delay_hist: OpMatrix,
    pub(crate) targeted_delay_hist: OpMatrix,
    /// Successful operations per graph bucket, ramp periods included.
    pub(crate) throughput_graph: OpMatrix,
    /// Response time sums per graph bucket, divided by the throughput
    /// count of the same bucket at report time.
    pub(crate) resp_graph: OpMatrix,
    #[serde(skip)]
    pub(crate) last_elapsed_nanos: Option<u64>,
    #[serde(skip)]
    pub(crate) attachment: Option<Box<dyn CustomMetrics>>,
}

impl MetricsRecord {
    pub fn new(operations: Vec<String>, scheme: BucketScheme) -> Self {
        let ops = operations.len();
        Self {
            scheme,
            thread_count: 0,
            start_time: None,
            end_time_ms: 0,
            cycle_sum: 0,
            stats: vec![OpStats::default(); ops],
            resp_hist: OpMatrix::new(ops, scheme.response.len()),
            delay_hist: OpMatrix::new(ops, scheme.delay.len()),
            targeted_delay_hist: OpMatrix::new(ops, scheme.delay.len()),
            throughput_graph: OpMatrix::new(ops, scheme.graph.len()),
            resp_graph: OpMatrix::new(ops, scheme.graph.len()),
            last_elapsed_nanos: None,
            attachment: None,
            operations,
        }
    }

    pub fn with_start_time(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    pub fn with_attachment(mut self, attachment: Box<dyn CustomMetrics>) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn set_start_time(&mut self, start: DateTime<Utc>) {
        self.start_time = Some(start);
    }

    pub fn attach(&mut self, attachment: Box<dyn CustomMetrics>) {
        self.attachment = Some(attachment);
    }

    pub fn operations(&self) -> &[String] {
        &self.operations
    }

    pub fn op_count(&self) -> usize {
        self.operations.len()
    }

    pub fn scheme(&self) -> &BucketScheme {
        &self.scheme
    }

    pub fn thread_count(&self) -> u32 {
        self.thread_count
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time_ms(&self) -> u64 {
        self.end_time_ms
    }

    pub fn cycle_sum(&self) -> u64 {
        self.cycle_sum
    }

    pub fn op(&self, op: OpId) -> &OpStats {
        &self.stats[op.index()]
    }

    pub fn stats(&self) -> &[OpStats] {
        &self.stats
    }

    pub fn response_histogram(&self) -> &OpMatrix {
        &self.resp_hist
    }

    pub fn delay_histogram(&self) -> &OpMatrix {
        &self.delay_hist
    }

    pub fn targeted_delay_histogram(&self) -> &OpMatrix {
        &self.targeted_delay_hist
    }

    pub fn throughput_graph(&self) -> &OpMatrix {
        &self.throughput_graph
    }

    pub fn response_graph(&self) -> &OpMatrix {
        &self.resp_graph
    }

    pub fn attachment(&self) -> Option<&dyn CustomMetrics> {
        self.attachment.as_deref()
    }

    pub fn attachment_mut(&mut self) -> Option<&mut (dyn CustomMetrics + 'static)> {
        self.attachment.as_deref_mut()
    }

    /// Remember the latest response offset so that [`wrap`](Self::wrap) can
    /// derive the end time. Success samples call this automatically; drivers
    /// call it for failures that still produced a response.
    pub fn note_response(&mut self, elapsed_since_run_start: i64) {
        if let Ok(elapsed) = u64::try_from(elapsed_since_run_start) {
            self.last_elapsed_nanos = Some(elapsed);
        }
    }

    /// Finalize the end time before the record leaves its owner.
    pub fn wrap(&mut self) {
        if let Some(elapsed) = self.last_elapsed_nanos {
            self.end_time_ms = elapsed / 1_000_000;
        }
    }

    /// Aggregate steady state throughput over `steady_secs`.
    pub fn steady_tps(&self, steady_secs: f64) -> f64 {
        if steady_secs <= 0.0 {
            return 0.0;
        }
        let total: u64 = self.stats.iter().map(|s| s.tx_count_steady).sum();
        total as f64 / steady_secs
    }

    /// Check the record's internal consistency: a usable bucket scheme, one
    /// counter set per operation and every matrix shaped by the scheme.
    ///
    /// Records built through [`MetricsRecord::new`] always pass; decoded
    /// snapshots must be checked before they are merged or scored.
    pub fn validate(&self) -> Result<()> {
        self.scheme.validate()?;
        let ops = self.operations.len();
        if self.stats.len() != ops {
            bail!(
                "Record has {} operations but {} counter sets",
                ops,
                self.stats.len()
            );
        }
        let response = self.scheme.response.len();
        let delay = self.scheme.delay.len();
        let graph = self.scheme.graph.len();
        self.resp_hist.check_shape("Response histogram", ops, response)?;
        self.delay_hist.check_shape("Delay histogram", ops, delay)?;
        self.targeted_delay_hist.check_shape("Targeted delay histogram", ops, delay)?;
        self.throughput_graph.check_shape("Throughput graph", ops, graph)?;
        self.resp_graph.check_shape("Response graph", ops, graph)?;
        Ok(())
    }

    pub(crate) fn ensure_op(&self, op: OpId) -> bool {
        op.index() < self.stats.len()
    }
}

/// Field-by-field equality of everything that merges. The transient end
/// marker and the attachment are not compared.
impl PartialEq for MetricsRecord {
    fn eq(&self, other: &Self) -> bool {
        self.operations == other.operations
            && self.scheme == other.scheme
            && self.thread_count == other.thread_count
            && self.start_time == other.start_time
            && self.end_time_ms == other.end_time_ms
            && self.cycle_sum == other.cycle_sum
            && self.stats == other.stats
            && self.resp_hist == other.resp_hist
            && self.delay_hist == other.delay_hist
            && self.targeted_delay_hist == other.targeted_delay_hist
            && self.throughput_graph == other.throughput_graph
            && self.resp_graph == other.resp_graph
    }
}

fn write_row(f: &mut fmt::Formatter<'_>, row: &[u64]) -> fmt::Result {
    for value in row {
        write!(f, " {}", value)?;
    }
    writeln!(f)
}

impl fmt::Display for MetricsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "sumusers={}", self.thread_count)?;
        for (name, stats) in self.operations.iter().zip(&self.stats) {
            writeln!(f, "sum{}Count={}", name, stats.tx_count_steady)?;
            writeln!(f, "sum{}Resp={}", name, stats.resp_sum_steady)?;
            writeln!(f, "max{}Resp={}", name, stats.resp_max)?;
            writeln!(f, "sum{}Delay={}", name, stats.delay_sum)?;
            writeln!(f, "max{}Delay={}", name, stats.delay_max)?;
            writeln!(f, "min{}Delay={}", name, stats.delay_min)?;
        }
        writeln!(f, "Total cycle time = {}", self.cycle_sum)?;

        for (op, name) in self.operations.iter().enumerate() {
            let op = OpId(op);
            writeln!(f, "{} Response Times Histogram", name)?;
            write_row(f, self.resp_hist.row(op))?;
            writeln!(f, "{} Throughput Graph", name)?;
            write_row(f, self.throughput_graph.row(op))?;
            writeln!(f, "{} Response Time Graph", name)?;
            write_row(f, self.resp_graph.row(op))?;
            writeln!(f, "{} Cycle Times Histogram", name)?;
            write_row(f, self.delay_hist.row(op))?;
        }
        Ok(())
    }
}
