//! Ordered, unique-keyed table of tuning profiles
//!
//! Entries are kept sorted ascending by `transfer_rate` and no two entries
//! share a key. Capacity is fixed when the table is allocated; once the
//! table is full every insertion is refused without touching the entries.

use crate::models::TuningProfile;
use thiserror::Error;

/// Errors raised by table mutations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("transfer rate {0} is already in the table")]
    DuplicateKey(u64),

    #[error("table is full ({capacity} entries)")]
    CapacityExhausted { capacity: usize },

    #[error("index {index} is out of range for a table of {len} entries")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Entries on either side of an insertion point
#[derive(Debug, Clone, Copy)]
pub struct Neighbors<'a> {
    pub left: Option<&'a TuningProfile>,
    pub right: Option<&'a TuningProfile>,
}

/// Fixed-capacity table of profiles sorted by transfer rate
#[derive(Debug, Clone)]
pub struct ValueTable {
    rows: Vec<TuningProfile>,
    total_length: usize,
}

impl ValueTable {
    /// Allocate an empty table able to hold `total_length` entries
    pub fn with_capacity(total_length: usize) -> Self {
        Self {
            rows: Vec::with_capacity(total_length),
            total_length,
        }
    }

    /// Number of occupied entries
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.total_length
    }

    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.total_length
    }

    pub fn get(&self, index: usize) -> Option<&TuningProfile> {
        self.rows.get(index)
    }

    pub fn as_slice(&self) -> &[TuningProfile] {
        &self.rows
    }

    pub fn iter(&self) -> impl Iterator<Item = &TuningProfile> {
        self.rows.iter()
    }

    /// Smallest key in the table
    pub fn min_key(&self) -> Option<u64> {
        self.rows.first().map(|p| p.transfer_rate)
    }

    /// Largest key in the table
    pub fn max_key(&self) -> Option<u64> {
        self.rows.last().map(|p| p.transfer_rate)
    }

    /// Owned copy of the occupied entries
    pub fn snapshot(&self) -> Vec<TuningProfile> {
        self.rows.clone()
    }

    /// Index at which `key` keeps the table ordered.
    ///
    /// Scans from the start while entries are `<= key`; an exact match is
    /// reported as [`TableError::DuplicateKey`].
    pub fn find_insertion_point(&self, key: u64) -> Result<usize, TableError> {
        let mut index = 0;
        while let Some(entry) = self.rows.get(index) {
            if entry.transfer_rate > key {
                break;
            }
            if entry.transfer_rate == key {
                return Err(TableError::DuplicateKey(key));
            }
            index += 1;
        }
        Ok(index)
    }

    /// Shift the entries at and after `index` one slot to the right and
    /// return the opened slot.
    ///
    /// The slot holds a default profile until the caller overwrites it.
    pub fn make_room_at(&mut self, index: usize) -> Result<&mut TuningProfile, TableError> {
        if self.is_full() {
            return Err(TableError::CapacityExhausted {
                capacity: self.total_length,
            });
        }
        if index > self.rows.len() {
            return Err(TableError::IndexOutOfRange {
                index,
                len: self.rows.len(),
            });
        }
        self.rows.insert(index, TuningProfile::default());
        Ok(&mut self.rows[index])
    }

    /// Write `profile` into a freshly opened slot at `index`
    pub fn insert_at(&mut self, index: usize, profile: TuningProfile) -> Result<(), TableError> {
        debug_assert!(index
            .checked_sub(1)
            .and_then(|i| self.rows.get(i))
            .map_or(true, |prev| prev.transfer_rate < profile.transfer_rate));
        debug_assert!(self
            .rows
            .get(index)
            .map_or(true, |next| profile.transfer_rate < next.transfer_rate));

        *self.make_room_at(index)? = profile;
        Ok(())
    }

    /// Insert `profile` at its ordered position, returning the index used
    pub fn insert(&mut self, profile: TuningProfile) -> Result<usize, TableError> {
        if self.is_full() {
            return Err(TableError::CapacityExhausted {
                capacity: self.total_length,
            });
        }
        let index = self.find_insertion_point(profile.transfer_rate)?;
        self.insert_at(index, profile)?;
        Ok(index)
    }

    /// Entries that will sit left and right of a profile inserted at `pivot`
    pub fn neighbors(&self, pivot: usize) -> Neighbors<'_> {
        Neighbors {
            left: pivot.checked_sub(1).and_then(|i| self.rows.get(i)),
            right: self.rows.get(pivot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(key: u64) -> TuningProfile {
        TuningProfile {
            transfer_rate: key,
            ..Default::default()
        }
    }

    fn table(keys: &[u64], capacity: usize) -> ValueTable {
        let mut table = ValueTable::with_capacity(capacity);
        for key in keys {
            table.insert(profile(*key)).unwrap();
        }
        table
    }

    fn keys(table: &ValueTable) -> Vec<u64> {
        table.iter().map(|p| p.transfer_rate).collect()
    }

    #[test]
    fn test_find_insertion_point() {
        let t = table(&[100, 500, 900], 10);
        assert_eq!(t.find_insertion_point(50), Ok(0));
        assert_eq!(t.find_insertion_point(700), Ok(2));
        assert_eq!(t.find_insertion_point(1000), Ok(3));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut t = table(&[100, 500, 900], 10);
        assert_eq!(t.find_insertion_point(500), Err(TableError::DuplicateKey(500)));
        assert_eq!(t.insert(profile(500)), Err(TableError::DuplicateKey(500)));
        assert_eq!(keys(&t), vec![100, 500, 900]);
    }

    #[test]
    fn test_insert_keeps_order() {
        let mut t = table(&[100, 500, 900], 10);
        assert_eq!(t.insert(profile(700)), Ok(2));
        assert_eq!(keys(&t), vec![100, 500, 700, 900]);
    }

    #[test]
    fn test_out_of_order_inserts_end_sorted() {
        let t = table(&[900, 100, 500, 300, 1], 10);
        assert_eq!(keys(&t), vec![1, 100, 300, 500, 900]);
        assert_eq!(t.min_key(), Some(1));
        assert_eq!(t.max_key(), Some(900));
    }

    #[test]
    fn test_full_table_rejects_without_mutation() {
        let mut t = table(&[100, 500, 900], 3);
        assert!(t.is_full());
        assert_eq!(
            t.insert(profile(700)),
            Err(TableError::CapacityExhausted { capacity: 3 })
        );
        assert_eq!(keys(&t), vec![100, 500, 900]);
        assert!(t.make_room_at(0).is_err());
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn test_make_room_at_shifts_right() {
        let mut t = table(&[100, 900], 4);
        let slot = t.make_room_at(1).unwrap();
        slot.transfer_rate = 500;
        assert_eq!(keys(&t), vec![100, 500, 900]);
    }

    #[test]
    fn test_make_room_at_past_end_rejected() {
        let mut t = table(&[100], 4);
        assert_eq!(
            t.make_room_at(3).unwrap_err(),
            TableError::IndexOutOfRange { index: 3, len: 1 }
        );
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_neighbors_at_edges() {
        let t = table(&[100, 500, 900], 10);

        let first = t.neighbors(0);
        assert!(first.left.is_none());
        assert_eq!(first.right.map(|p| p.transfer_rate), Some(100));

        let middle = t.neighbors(2);
        assert_eq!(middle.left.map(|p| p.transfer_rate), Some(500));
        assert_eq!(middle.right.map(|p| p.transfer_rate), Some(900));

        let last = t.neighbors(3);
        assert_eq!(last.left.map(|p| p.transfer_rate), Some(900));
        assert!(last.right.is_none());
    }

    #[test]
    fn test_empty_table() {
        let t = ValueTable::with_capacity(0);
        assert!(t.is_empty());
        assert!(t.is_full());
        assert_eq!(t.max_key(), None);
        assert_eq!(t.find_insertion_point(42), Ok(0));
    }
}
