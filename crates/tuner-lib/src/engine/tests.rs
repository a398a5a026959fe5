//! Engine tests combining search and augmentation
//!
//! These drive the table the way the training loop does, with a seeded
//! generator, and check the table invariants after many insertions.

#[cfg(test)]
mod training_sequence_tests {
    use crate::engine::{
        augment, find_closest, relative_precision, tolerance, weighted_score, ApproxFunction,
        TableError, ValueTable,
    };
    use crate::models::{TuningProfile, WeightsReference};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn seed_table(capacity: usize) -> ValueTable {
        let mut table = ValueTable::with_capacity(capacity);
        for (key, ring) in [(1_000u64, 256u16), (50_000, 1024), (200_000, 4096)] {
            table
                .insert(TuningProfile {
                    transfer_rate: key,
                    rx_ring_size: ring,
                    tx_ring_size: ring,
                    net_core_somaxconn: 128,
                    tcp_rmem: [4096, 87380, 6_291_456],
                    ..Default::default()
                })
                .unwrap();
        }
        table
    }

    fn assert_strictly_ordered(table: &ValueTable) {
        let keys: Vec<u64> = table.iter().map(|p| p.transfer_rate).collect();
        assert!(
            keys.windows(2).all(|w| w[0] < w[1]),
            "keys not strictly ascending: {:?}",
            keys
        );
    }

    /// One training step; returns true when a profile was inserted
    fn step(table: &mut ValueTable, rng: &mut StdRng, weights: &WeightsReference) -> bool {
        let max = table.max_key().unwrap();
        let mut key = rng.gen_range(0..max);
        if key == 0 {
            key = table.min_key().unwrap();
        }

        let score = weighted_score(key, 0, 0, 0, weights);
        let epsilon = relative_precision(score, 0.5);
        let tol = tolerance(score, epsilon, ApproxFunction::Identity);

        let Some(reference) = find_closest(table.as_slice(), score, tol, weights).found() else {
            return false;
        };

        match augment(table, reference, key, epsilon, ApproxFunction::Identity, None) {
            Ok(_) => true,
            Err(TableError::DuplicateKey(_)) => false,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_random_training_keeps_invariants() {
        let weights = WeightsReference::default();
        let mut table = seed_table(200);
        let mut rng = StdRng::seed_from_u64(7);

        let mut inserted = 0;
        for _ in 0..5_000 {
            if table.is_full() {
                break;
            }
            if step(&mut table, &mut rng, &weights) {
                inserted += 1;
            }
        }

        assert!(inserted > 0);
        assert_eq!(table.len(), 3 + inserted);
        assert!(table.len() <= table.capacity());
        assert_strictly_ordered(&table);
    }

    #[test]
    fn test_training_stops_at_capacity() {
        let weights = WeightsReference::default();
        let mut table = seed_table(5);
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..50_000 {
            if table.is_full() {
                break;
            }
            step(&mut table, &mut rng, &weights);
        }

        assert!(table.is_full());
        assert_eq!(table.len(), 5);
        assert_strictly_ordered(&table);
    }

    #[test]
    fn test_lookup_example_from_scores() {
        let weights = WeightsReference::default();
        let mut table = ValueTable::with_capacity(3);
        for key in [100, 500, 900] {
            table
                .insert(TuningProfile {
                    transfer_rate: key,
                    ..Default::default()
                })
                .unwrap();
        }

        let outcome = find_closest(table.as_slice(), 510.0, 20.0, &weights);
        assert_eq!(outcome.found(), Some(1));
        assert_eq!(table.get(1).unwrap().transfer_rate, 500);
    }
}
