//! Table maintenance and matching engine
//!
//! This module holds the in-memory profile table and the algorithms that
//! operate on it:
//! - scoring: weighted scores, relative precision and tolerances
//! - table: the ordered, unique-keyed profile table
//! - augment: synthesis of new entries from a reference profile
//! - matching: tolerance-bounded binary search by score

mod augment;
mod matching;
mod scoring;
mod table;

#[cfg(test)]
mod tests;

pub use augment::{augment, derive_value, synthesize_profile, Direction, Synthesized};
pub use matching::{find_closest, find_closest_in, MatchResult, SearchOutcome};
pub use scoring::{
    digits, profile_score, relative_precision, sample_score, tolerance, weighted_score,
    ApproxFunction,
};
pub use table::{Neighbors, TableError, ValueTable};

use std::sync::{Arc, RwLock};

/// Profile table shared between control loops
pub type SharedTable = Arc<RwLock<ValueTable>>;

/// Wrap a table for sharing between loops
pub fn shared(table: ValueTable) -> SharedTable {
    Arc::new(RwLock::new(table))
}
