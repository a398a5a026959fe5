//! Tolerance-bounded binary search over the profile table
//!
//! Entries are compared by weighted score, but the branch direction is
//! chosen by comparing the midpoint's raw transfer rate with the target
//! score. With a transfer-rate weight of one and the other counters near
//! zero the two orders agree; with other weights the search can miss an
//! entry whose score matches.

use super::scoring::profile_score;
use crate::models::{TuningProfile, WeightsReference};

/// Outcome of a table search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// Index of an entry within tolerance of the target
    Found(usize),
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOutcome {
    pub result: MatchResult,
    /// Last midpoint visited, `None` when nothing was visited
    pub closest: Option<usize>,
}

impl SearchOutcome {
    pub fn found(&self) -> Option<usize> {
        match self.result {
            MatchResult::Found(index) => Some(index),
            MatchResult::NotFound => None,
        }
    }
}

/// Search the whole table for an entry scoring within `tolerance` of `target`
pub fn find_closest(
    entries: &[TuningProfile],
    target: f64,
    tolerance: f64,
    weights: &WeightsReference,
) -> SearchOutcome {
    find_closest_in(
        entries,
        0,
        entries.len() as isize - 1,
        target,
        tolerance,
        weights,
    )
}

/// Search `entries[lo..=hi]`
pub fn find_closest_in(
    entries: &[TuningProfile],
    lo: isize,
    hi: isize,
    target: f64,
    tolerance: f64,
    weights: &WeightsReference,
) -> SearchOutcome {
    let hi = hi.min(entries.len() as isize - 1);
    search(entries, lo.max(0), hi, target, tolerance, weights, None)
}

fn search(
    entries: &[TuningProfile],
    lo: isize,
    hi: isize,
    target: f64,
    tolerance: f64,
    weights: &WeightsReference,
    closest: Option<usize>,
) -> SearchOutcome {
    if lo > hi {
        return SearchOutcome {
            result: MatchResult::NotFound,
            closest,
        };
    }

    let mid = lo + (hi - lo) / 2;
    let entry = &entries[mid as usize];
    let closest = Some(mid as usize);

    if (target - profile_score(entry, weights)).abs() <= tolerance {
        return SearchOutcome {
            result: MatchResult::Found(mid as usize),
            closest,
        };
    }

    if entry.transfer_rate as f64 > target {
        search(entries, lo, mid - 1, target, tolerance, weights, closest)
    } else {
        search(entries, mid + 1, hi, target, tolerance, weights, closest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(keys: &[u64]) -> Vec<TuningProfile> {
        keys.iter()
            .map(|k| TuningProfile {
                transfer_rate: *k,
                ..Default::default()
            })
            .collect()
    }

    fn rate_only() -> WeightsReference {
        WeightsReference::default()
    }

    #[test]
    fn test_found_within_tolerance() {
        let table = entries(&[100, 500, 900]);
        let outcome = find_closest(&table, 510.0, 20.0, &rate_only());
        assert_eq!(outcome.result, MatchResult::Found(1));
        assert_eq!(outcome.closest, Some(1));
    }

    #[test]
    fn test_found_after_descending() {
        let table = entries(&[100, 200, 300, 400, 500, 600, 700]);
        let outcome = find_closest(&table, 195.0, 10.0, &rate_only());
        assert_eq!(outcome.found(), Some(1));
    }

    #[test]
    fn test_not_found_reports_last_midpoint() {
        let table = entries(&[100, 500, 900]);
        let outcome = find_closest(&table, 880.0, 5.0, &rate_only());
        assert_eq!(outcome.result, MatchResult::NotFound);
        assert_eq!(outcome.closest, Some(2));
    }

    #[test]
    fn test_empty_table_not_found() {
        let outcome = find_closest(&[], 100.0, 1000.0, &rate_only());
        assert_eq!(outcome.result, MatchResult::NotFound);
        assert_eq!(outcome.closest, None);
    }

    #[test]
    fn test_zero_tolerance_requires_exact_score() {
        let table = entries(&[100, 500, 900]);
        assert_eq!(find_closest(&table, 900.0, 0.0, &rate_only()).found(), Some(2));
        assert_eq!(find_closest(&table, 899.0, 0.0, &rate_only()).found(), None);
    }

    #[test]
    fn test_branch_uses_raw_transfer_rate_not_score() {
        // Scores are [50, 250, 450]. Entry 2 matches exactly, but the first
        // midpoint's raw key (500) exceeds the target (450), so the search
        // turns left and never reaches it.
        let weights = WeightsReference {
            transfer_rate_weight: 0.5,
            ..rate_only()
        };
        let table = entries(&[100, 500, 900]);

        let outcome = find_closest(&table, 450.0, 1.0, &weights);
        assert_eq!(outcome.result, MatchResult::NotFound);
        assert_eq!(outcome.closest, Some(0));
    }

    #[test]
    fn test_sub_range_search() {
        let table = entries(&[100, 500, 900]);
        let outcome = find_closest_in(&table, 2, 2, 500.0, 1.0, &rate_only());
        assert_eq!(outcome.result, MatchResult::NotFound);
        assert_eq!(outcome.closest, Some(2));
    }
}
