//! # Merge Engine
//!
//! Combines records thread -> agent -> run. Every field merges with an
//! associative and commutative operator (sum, max, min, earliest, latest),
//! so any grouping and any order of merges gives the same result. That is
//! what allows [`fold_parallel`] to split the inputs freely.

use crate::record::{MetricsRecord, OpStats};
use anyhow::{anyhow, bail, Context, Result};
use tracing::debug;

impl OpStats {
    fn merge_from(&mut self, other: &OpStats) {
        self.tx_count_steady += other.tx_count_steady;
        self.tx_count_total += other.tx_count_total;
        self.err_count_steady += other.err_count_steady;
        self.err_count_total += other.err_count_total;
        self.delay_count_steady += other.delay_count_steady;
        self.resp_sum_steady = self.resp_sum_steady.saturating_add(other.resp_sum_steady);
        self.resp_sum_total = self.resp_sum_total.saturating_add(other.resp_sum_total);
        self.delay_sum = self.delay_sum.saturating_add(other.delay_sum);
        self.targeted_delay_sum = self
            .targeted_delay_sum
            .saturating_add(other.targeted_delay_sum);
        self.resp_max = self.resp_max.max(other.resp_max);
        self.delay_max = self.delay_max.max(other.delay_max);
        self.delay_min = self.delay_min.min(other.delay_min);
    }
}

impl MetricsRecord {
    /// Check that both records are well formed and share their operations
    /// and bucket layout.
    pub fn ensure_compatible(&self, other: &MetricsRecord) -> Result<()> {
        if self.operations != other.operations {
            bail!(
                "Cannot merge records with different operations: {:?} vs {:?}",
                self.operations,
                other.operations
            );
        }
        if self.scheme != other.scheme {
            bail!("Cannot merge records with different bucket layouts");
        }
        self.validate().context("Cannot merge into a malformed record")?;
        other.validate().context("Cannot merge a malformed record")?;
        Ok(())
    }

    /// Merge `other` into this record.
    ///
    /// Nothing is modified when the records are incompatible or the
    /// attachments fail to merge.
    pub fn merge_from(&mut self, other: &MetricsRecord) -> Result<()> {
        self.ensure_compatible(other)?;

        let attachment = match (&self.attachment, &other.attachment) {
            (Some(mine), Some(theirs)) => {
                let mut merged = mine.clone_box();
                merged.merge(&**theirs)?;
                Some(merged)
            }
            (None, Some(theirs)) => Some(theirs.clone_box()),
            (_, None) => None,
        };
        if attachment.is_some() {
            self.attachment = attachment;
        }

        self.merge_counters(other);
        Ok(())
    }

    /// Consume both records and return their merge.
    pub fn merge(mut self, mut other: MetricsRecord) -> Result<MetricsRecord> {
        self.ensure_compatible(&other)?;

        if let Some(theirs) = other.attachment.take() {
            match self.attachment.as_mut() {
                Some(mine) => mine.merge(&*theirs)?,
                None => self.attachment = Some(theirs),
            }
        }

        self.merge_counters(&other);
        Ok(self)
    }

    /// Add every counter of `other`. Callers have checked compatibility, so
    /// all shapes match.
    fn merge_counters(&mut self, other: &MetricsRecord) {
        debug!("Adding cycle sum {} and {}", self.cycle_sum, other.cycle_sum);
        self.thread_count += other.thread_count;
        self.cycle_sum = self.cycle_sum.saturating_add(other.cycle_sum);

        for (mine, theirs) in self.stats.iter_mut().zip(&other.stats) {
            mine.merge_from(theirs);
        }

        self.resp_hist.add_cells(&other.resp_hist);
        self.delay_hist.add_cells(&other.delay_hist);
        self.targeted_delay_hist.add_cells(&other.targeted_delay_hist);
        self.throughput_graph.add_cells(&other.throughput_graph);
        self.resp_graph.add_cells(&other.resp_graph);

        self.start_time = match (self.start_time, other.start_time) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.end_time_ms = self.end_time_ms.max(other.end_time_ms);
        self.last_elapsed_nanos = match (self.last_elapsed_nanos, other.last_elapsed_nanos) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Fold records one after another. Returns `None` for an empty input.
pub fn fold_records<I>(records: I) -> Result<Option<MetricsRecord>>
where
    I: IntoIterator<Item = MetricsRecord>,
{
    let mut total: Option<MetricsRecord> = None;
    for record in records {
        total = Some(match total {
            Some(acc) => acc.merge(record)?,
            None => record,
        });
    }
    Ok(total)
}

/// Fold records on up to `workers` scoped threads, then fold the partial
/// results. Each thread owns its chunk, so no destination is ever shared.
pub fn fold_parallel(records: Vec<MetricsRecord>, workers: usize) -> Result<Option<MetricsRecord>> {
    let workers = workers.max(1);
    if workers == 1 || records.len() <= workers {
        return fold_records(records);
    }

    let chunk_len = (records.len() + workers - 1) / workers;
    let mut chunks = Vec::with_capacity(workers);
    let mut remaining = records.into_iter();
    loop {
        let chunk: Vec<MetricsRecord> = remaining.by_ref().take(chunk_len).collect();
        if chunk.is_empty() {
            break;
        }
        chunks.push(chunk);
    }
    debug!("Folding records in {} chunks of up to {}", chunks.len(), chunk_len);

    let partials = crossbeam::scope(|scope| {
        let handles: Vec<_> = chunks
            .into_iter()
            .map(|chunk| scope.spawn(move |_| fold_records(chunk)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| anyhow!("Record fold worker panicked"))?
            })
            .collect::<Result<Vec<_>>>()
    })
    .map_err(|_| anyhow!("Record fold scope panicked"))??;

    fold_records(partials.into_iter().flatten())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulate::{DelayMeasurement, DelaySample, SuccessSample};
    use crate::custom::tests::{BrokenStats, CacheStats};
    use crate::record::tests::{names, small_scheme};
    use crate::record::{OpId, OpMatrix};
    use chrono::{TimeZone, Utc};

    fn record_with(responses: &[i64], delays: &[u64]) -> MetricsRecord {
        let mut record = MetricsRecord::new(names(&["Browse", "Buy"]), small_scheme());
        for (i, response) in responses.iter().enumerate() {
            record.record_success(&SuccessSample {
                op: OpId(i % 2),
                invoke_time: 0,
                respond_time: *response,
                pause_time: 0,
                elapsed_since_run_start: 100 + i as i64 * 700,
                in_ramp: i % 3 == 0,
            });
        }
        for delay in delays {
            record.record_delay(&DelaySample {
                previous_op: Some(OpId(0)),
                measured: DelayMeasurement {
                    cycle_time: Some(*delay),
                    delay_time: Some(*delay),
                },
                targeted_delay: 400,
                primary_mix: true,
            });
        }
        record
    }

    #[test]
    fn test_merge_combines_every_field() {
        let a = record_with(&[5, 15, 25, 35], &[120, 900])
            .with_start_time(Utc.timestamp_opt(2_000, 0).unwrap());
        let mut b =
            record_with(&[45, 400], &[60]).with_start_time(Utc.timestamp_opt(1_000, 0).unwrap());
        b.record_failure(OpId(1), false);
        b.end_time_ms = 9_000;

        let merged = a.clone().merge(b.clone()).unwrap();

        assert_eq!(merged.thread_count(), 2);
        assert_eq!(merged.cycle_sum(), a.cycle_sum() + b.cycle_sum());
        assert_eq!(merged.start_time(), b.start_time());
        assert_eq!(merged.end_time_ms(), 9_000);
        let stats = merged.op(OpId(0));
        assert_eq!(
            stats.tx_count_total,
            a.op(OpId(0)).tx_count_total + b.op(OpId(0)).tx_count_total
        );
        assert_eq!(stats.delay_min, 60);
        assert_eq!(stats.delay_max, 900);
        assert_eq!(merged.op(OpId(1)).err_count_steady, 1);
        assert_eq!(merged.op(OpId(1)).resp_max, 400);
        for op in 0..2 {
            let op = OpId(op);
            assert_eq!(
                merged.response_histogram().row_sum(op),
                merged.op(op).tx_count_steady
            );
        }
    }

    #[test]
    fn test_merge_is_commutative() {
        let a = record_with(&[5, 15, 25, 35], &[120]);
        let b = record_with(&[45, 400, 3], &[60, 700]);

        let ab = a.clone().merge(b.clone()).unwrap();
        let ba = b.merge(a).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_merge_from_matches_merge() {
        let a = record_with(&[5, 15], &[120]);
        let b = record_with(&[45, 400, 3], &[60]);

        let mut in_place = a.clone();
        in_place.merge_from(&b).unwrap();
        assert_eq!(in_place, a.merge(b).unwrap());
    }

    #[test]
    fn test_merge_rejects_other_operations() {
        let a = MetricsRecord::new(names(&["Browse"]), small_scheme());
        let mut b = MetricsRecord::new(names(&["Checkout"]), small_scheme());
        assert!(b.merge_from(&a).is_err());
        assert!(a.merge(b).is_err());
    }

    #[test]
    fn test_failed_merge_leaves_target_untouched() {
        let mut target = record_with(&[5, 15], &[120]);
        let before = target.clone();
        let mut bad = record_with(&[25], &[60]);
        bad.throughput_graph = OpMatrix::new(2, 2);

        let err = target.merge_from(&bad).unwrap_err();
        assert!(format!("{:#}", err).contains("Throughput graph"), "{:#}", err);
        assert_eq!(target, before);
        assert_eq!(target.thread_count(), 1);
        assert_eq!(
            target.response_histogram().row_sum(OpId(0)),
            target.op(OpId(0)).tx_count_steady
        );

        assert!(before.merge(bad).is_err());
    }

    #[test]
    fn test_failed_attachment_merge_leaves_target_untouched() {
        let mut target = record_with(&[5], &[]).with_attachment(Box::new(CacheStats {
            hits: 4,
            misses: 1,
            max_misses: 3,
        }));
        let before = target.clone();
        let other = record_with(&[15], &[]).with_attachment(Box::new(BrokenStats));

        assert!(target.merge_from(&other).is_err());
        assert_eq!(target, before);
        let stats = target
            .attachment()
            .and_then(|a| a.as_any().downcast_ref::<CacheStats>())
            .unwrap();
        assert_eq!(stats.hits, 4);
    }

    #[test]
    fn test_attachment_merges_or_carries() {
        let plain = record_with(&[5], &[]);
        let attached = record_with(&[5], &[]).with_attachment(Box::new(CacheStats {
            hits: 4,
            misses: 1,
            max_misses: 3,
        }));

        let carried = plain.clone().merge(attached.clone()).unwrap();
        let stats = carried
            .attachment()
            .and_then(|a| a.as_any().downcast_ref::<CacheStats>())
            .unwrap();
        assert_eq!(stats.hits, 4);

        let mut both = attached.clone();
        both.merge_from(&attached).unwrap();
        let stats = both
            .attachment()
            .and_then(|a| a.as_any().downcast_ref::<CacheStats>())
            .unwrap();
        assert_eq!(stats.hits, 8);
        assert_eq!(stats.misses, 2);

        assert!(plain.clone().merge(plain).unwrap().attachment().is_none());
    }

    #[test]
    fn test_fold_empty_is_none() {
        assert!(fold_records(Vec::new()).unwrap().is_none());
        assert!(fold_parallel(Vec::new(), 4).unwrap().is_none());
    }

    #[test]
    fn test_fold_parallel_matches_sequential() {
        let records: Vec<_> = (0..13)
            .map(|i| record_with(&[i * 7 % 50, i * 31 % 300, 5], &[i as u64 * 40]))
            .collect();

        let sequential = fold_records(records.clone()).unwrap().unwrap();
        let parallel = fold_parallel(records, 4).unwrap().unwrap();
        assert_eq!(sequential, parallel);
        assert_eq!(parallel.thread_count(), 13);
    }
}
