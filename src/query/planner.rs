use std::sync::Arc;

use crate::query::QueryDesc;
use crate::storage::partition::Partition;

/// Represents a time range with inclusive start and end timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    /// Creates a new time range
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Checks whether data bounded by `[min_ts, max_ts]` can fall in this range.
    ///
    /// A partition starting inside the range overlaps if it starts no
    /// later than `end`; one starting before the range overlaps if it
    /// reaches `start`. Both bounds are inclusive.
    pub fn overlaps(&self, min_ts: i64, max_ts: i64) -> bool {
        if min_ts >= self.start {
            min_ts <= self.end
        } else {
            max_ts >= self.start
        }
    }
}

/// Returns the partitions whose bounds overlap the requested range
pub fn select_partitions(
    partitions: &[Arc<dyn Partition>],
    desc: &QueryDesc,
) -> Vec<Arc<dyn Partition>> {
    let range = desc.time_range();
    partitions
        .iter()
        .filter(|partition| range.overlaps(partition.min_timestamp(), partition.max_timestamp()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::NoopSink;
    use crate::storage::data::{Point, Row};
    use crate::storage::partition::MemoryPartition;

    #[test]
    fn test_partition_overlap() {
        // Partition bounds [10, 20]
        assert!(TimeRange::new(0, 10).overlaps(10, 20));
        assert!(TimeRange::new(20, 30).overlaps(10, 20));
        assert!(TimeRange::new(15, 25).overlaps(10, 20));
        assert!(TimeRange::new(5, 15).overlaps(10, 20));
        assert!(TimeRange::new(12, 18).overlaps(10, 20));
        assert!(TimeRange::new(0, 100).overlaps(10, 20));
        assert!(!TimeRange::new(21, 30).overlaps(10, 20));
        assert!(!TimeRange::new(0, 9).overlaps(10, 20));
    }

    #[test]
    fn test_select_partitions() {
        let early = MemoryPartition::detached(Arc::new(NoopSink));
        early
            .insert_rows(&[
                Row::new("a", "cpu", Point::new(10, 0.0)),
                Row::new("a", "cpu", Point::new(20, 0.0)),
            ])
            .unwrap();
        let late = MemoryPartition::detached(Arc::new(NoopSink));
        late.insert_rows(&[Row::new("a", "cpu", Point::new(30, 0.0))])
            .unwrap();
        let empty = MemoryPartition::detached(Arc::new(NoopSink));

        let partitions: Vec<Arc<dyn Partition>> =
            vec![Arc::new(early), Arc::new(late), Arc::new(empty)];

        let selected = select_partitions(&partitions, &QueryDesc::new("a", "cpu", 0, 10));
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].max_timestamp(), 20);

        let selected = select_partitions(&partitions, &QueryDesc::new("a", "cpu", 15, 30));
        assert_eq!(selected.len(), 2);

        let selected = select_partitions(&partitions, &QueryDesc::new("a", "cpu", 21, 29));
        assert!(selected.is_empty());
    }
}
