//! New-entry detection against a timestamp watermark.
//!
//! Feeds are assumed to list entries newest first. The scan stops at the first
//! entry that is not newer than the watermark, so an upstream that reorders
//! its entries can hide newer items behind an older one. Those items are
//! dropped, not reported; [`out_of_order_after_cutoff`] exists so callers can
//! at least log when it happens.

use crate::feed::parser::FeedEntry;

/// Returns the leading run of entries published after `watermark`.
///
/// Entries without a timestamp cannot be proven old and are kept; the
/// formatter rejects them later.
pub fn detect_new(entries: Vec<FeedEntry>, watermark: i64) -> Vec<FeedEntry> {
    entries
        .into_iter()
        .take_while(|e| is_newer(e.published_at, watermark))
        .collect()
}

/// Counts entries past the early-exit cutoff that are nevertheless newer than
/// `watermark`. Non-zero means the upstream broke newest-first ordering.
pub fn out_of_order_after_cutoff(entries: &[FeedEntry], watermark: i64) -> usize {
    entries
        .iter()
        .skip_while(|e| is_newer(e.published_at, watermark))
        .filter(|e| is_newer(e.published_at, watermark))
        .count()
}

pub(crate) fn is_newer(published_at: Option<i64>, watermark: i64) -> bool {
    published_at.map_or(true, |t| t > watermark)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn at(ts: i64) -> FeedEntry {
        FeedEntry {
            title: Some(format!("entry {ts}")),
            link: None,
            summary: None,
            published_at: Some(ts),
            tags: BTreeSet::new(),
            images: Vec::new(),
        }
    }

    fn stamps(entries: &[FeedEntry]) -> Vec<i64> {
        entries.iter().filter_map(|e| e.published_at).collect()
    }

    #[test]
    fn test_stops_before_first_old_entry() {
        let entries = [100, 90, 80, 70].map(at).to_vec();
        assert_eq!(stamps(&detect_new(entries, 85)), vec![100, 90]);
    }

    #[test]
    fn test_equal_timestamp_is_not_new() {
        let entries = [100, 90].map(at).to_vec();
        assert_eq!(stamps(&detect_new(entries, 100)), Vec::<i64>::new());
    }

    #[test]
    fn test_out_of_order_entries_are_dropped() {
        // 95 is newer than the watermark but sits behind 80
        let entries = [100, 80, 95].map(at).to_vec();
        assert_eq!(out_of_order_after_cutoff(&entries, 85), 1);
        assert_eq!(stamps(&detect_new(entries, 85)), vec![100]);
    }

    #[test]
    fn test_missing_timestamp_is_kept() {
        let mut undated = at(0);
        undated.published_at = None;
        let entries = vec![undated, at(10)];
        assert_eq!(detect_new(entries, 50).len(), 1);
    }

    #[test]
    fn test_empty_input() {
        assert!(detect_new(Vec::new(), 0).is_empty());
    }

    proptest! {
        #[test]
        fn prop_returns_maximal_newer_prefix(
            mut ts in proptest::collection::vec(0i64..1_000, 0..40),
            watermark in 0i64..1_000,
        ) {
            ts.sort_unstable_by(|a, b| b.cmp(a));
            let entries: Vec<FeedEntry> = ts.iter().copied().map(at).collect();

            let expected: Vec<i64> = ts.iter().copied().filter(|t| *t > watermark).collect();
            prop_assert_eq!(stamps(&detect_new(entries.clone(), watermark)), expected);
            prop_assert_eq!(out_of_order_after_cutoff(&entries, watermark), 0);
        }

        #[test]
        fn prop_result_is_prefix_of_input(
            ts in proptest::collection::vec(0i64..1_000, 0..40),
            watermark in 0i64..1_000,
        ) {
            let entries: Vec<FeedEntry> = ts.iter().copied().map(at).collect();
            let found = stamps(&detect_new(entries, watermark));
            prop_assert!(found.iter().all(|t| *t > watermark));
            prop_assert_eq!(&ts[..found.len()], &found[..]);
            if found.len() < ts.len() {
                prop_assert!(ts[found.len()] <= watermark);
            }
        }
    }
}
