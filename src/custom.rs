//! Extension point for driver-specific statistics.
//!
//! A [`MetricsRecord`](crate::record::MetricsRecord) may carry one attached
//! [`CustomMetrics`] value. The record never looks inside it: it clones it
//! with the record, merges it through [`CustomMetrics::merge`], and asks it
//! for [`CustomResult`] entries when the run is scored.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Driver-defined statistics that travel with a metrics record.
///
/// Implementations must make `merge` associative and commutative for the
/// run-level fold to be order independent.
pub trait CustomMetrics: Send + Sync + fmt::Debug {
    /// Deep copy behind a fresh box.
    fn clone_box(&self) -> Box<dyn CustomMetrics>;

    /// Fold `other` into `self`. `other` is normally the same concrete type;
    /// use [`as_any`](Self::as_any) to downcast it.
    fn merge(&mut self, other: &dyn CustomMetrics) -> Result<()>;

    /// Result entries for the run summary. `None` entries are skipped.
    fn results(&self) -> Result<Vec<Option<CustomResult>>>;

    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn CustomMetrics> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// One line of custom statistics in the run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomResult {
    pub description: Option<String>,
    pub result: Option<String>,
    pub target: Option<String>,
    pub allowed_deviation: Option<String>,
    /// An explicit `false` fails the run.
    pub passed: Option<bool>,
}

impl CustomResult {
    pub fn new(description: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            result: Some(result.into()),
            ..Self::default()
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_allowed_deviation(mut self, deviation: impl Into<String>) -> Self {
        self.allowed_deviation = Some(deviation.into());
        self
    }

    pub fn with_passed(mut self, passed: bool) -> Self {
        self.passed = Some(passed);
        self
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::anyhow;

    /// Counts cache hits and fails the run past a miss budget.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct CacheStats {
        pub hits: u64,
        pub misses: u64,
        pub max_misses: u64,
    }

    impl CustomMetrics for CacheStats {
        fn clone_box(&self) -> Box<dyn CustomMetrics> {
            Box::new(self.clone())
        }

        fn merge(&mut self, other: &dyn CustomMetrics) -> Result<()> {
            let other = other
                .as_any()
                .downcast_ref::<CacheStats>()
                .ok_or_else(|| anyhow!("cannot merge foreign custom metrics"))?;
            self.hits += other.hits;
            self.misses += other.misses;
            self.max_misses = self.max_misses.max(other.max_misses);
            Ok(())
        }

        fn results(&self) -> Result<Vec<Option<CustomResult>>> {
            Ok(vec![
                Some(CustomResult::new("Cache hits", self.hits.to_string())),
                None,
                Some(
                    CustomResult::new("Cache misses", self.misses.to_string())
                        .with_target(self.max_misses.to_string())
                        .with_passed(self.misses <= self.max_misses),
                ),
            ])
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Always fails to report.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct BrokenStats;

    impl CustomMetrics for BrokenStats {
        fn clone_box(&self) -> Box<dyn CustomMetrics> {
            Box::new(self.clone())
        }

        fn merge(&mut self, _other: &dyn CustomMetrics) -> Result<()> {
            Ok(())
        }

        fn results(&self) -> Result<Vec<Option<CustomResult>>> {
            Err(anyhow!("statistics backend unavailable"))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_boxed_clone_is_deep() {
        let original: Box<dyn CustomMetrics> = Box::new(CacheStats {
            hits: 3,
            misses: 1,
            max_misses: 2,
        });
        let mut copy = original.clone();
        copy.merge(original.as_ref()).unwrap();

        let copy = copy.as_any().downcast_ref::<CacheStats>().unwrap();
        let original = original.as_any().downcast_ref::<CacheStats>().unwrap();
        assert_eq!(copy.hits, 6);
        assert_eq!(original.hits, 3);
    }

    #[test]
    fn test_merge_rejects_other_types() {
        let mut stats = CacheStats::default();
        assert!(stats.merge(&BrokenStats).is_err());
    }

    #[test]
    fn test_result_builder() {
        let result = CustomResult::new("Queue depth", "12")
            .with_target("10")
            .with_allowed_deviation("5%")
            .with_passed(false);
        assert_eq!(result.description.as_deref(), Some("Queue depth"));
        assert_eq!(result.allowed_deviation.as_deref(), Some("5%"));
        assert_eq!(result.passed, Some(false));
    }
}
