//! Batch planning — individual vs. batched round-trips, and chunking.
//!
//! Pure decisions over `(group size, batch config)`.  Order preservation
//! across chunks is positional: chunk ranges partition `0..len` in order.

use std::ops::Range;

use dadp_domain::config::BatchConfig;

/// How a group of values travels to the Engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BatchPlan {
    /// One round-trip per value.
    Individual,
    /// Batched round-trips, one per range.
    Batched(Vec<Range<usize>>),
}

/// Plan the round-trips for a group of `len` values.
pub(crate) fn plan(len: usize, cfg: &BatchConfig) -> BatchPlan {
    if cfg.disabled || len < cfg.min_size {
        return BatchPlan::Individual;
    }
    BatchPlan::Batched(chunk_ranges(len, cfg.max_size))
}

/// Partition `0..len` into consecutive ranges of at most `max` items.
pub(crate) fn chunk_ranges(len: usize, max: usize) -> Vec<Range<usize>> {
    let max = max.max(1);
    let mut ranges = Vec::with_capacity(len.div_ceil(max));
    let mut start = 0;
    while start < len {
        let end = (start + max).min(len);
        ranges.push(start..end);
        start = end;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(min: usize, max: usize) -> BatchConfig {
        BatchConfig {
            min_size: min,
            max_size: max,
            disabled: false,
        }
    }

    #[test]
    fn below_threshold_goes_individual() {
        assert_eq!(plan(99, &cfg(100, 10_000)), BatchPlan::Individual);
    }

    #[test]
    fn at_threshold_goes_batched() {
        assert_eq!(
            plan(100, &cfg(100, 10_000)),
            BatchPlan::Batched(vec![0..100])
        );
    }

    #[test]
    fn disabled_forces_individual() {
        let mut cfg = cfg(100, 10_000);
        cfg.disabled = true;
        assert_eq!(plan(5000, &cfg), BatchPlan::Individual);
    }

    #[test]
    fn two_max_plus_one_yields_three_chunks() {
        let ranges = chunk_ranges(2 * 500 + 1, 500);
        assert_eq!(ranges, vec![0..500, 500..1000, 1000..1001]);
    }

    #[test]
    fn exact_multiple_has_no_tail_chunk() {
        assert_eq!(chunk_ranges(1000, 500), vec![0..500, 500..1000]);
    }

    #[test]
    fn single_chunk_when_under_max() {
        assert_eq!(chunk_ranges(1500, 10_000), vec![0..1500]);
    }

    #[test]
    fn empty_group_has_no_chunks() {
        assert!(chunk_ranges(0, 500).is_empty());
    }
}
