//! Bloom filter used as a cold-key doorkeeper.

use ahash::RandomState;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Seed-derivation constant, distinct per hash function.
const SEED_MIX: u64 = 0xc2b2_ae3d_27d4_eb4f;

/// A fixed-size Bloom filter over `m` bits with `k` hash functions.
///
/// `contains` has no false negatives: once a key is inserted it is
/// always reported as seen. Concurrent inserts race benignly on the
/// bit words (the only hazard is a spurious "seen", which the admission
/// policy tolerates).
#[derive(Debug)]
pub struct BloomFilter {
    words: Vec<AtomicU64>,
    num_bits: usize,
    hashers: Vec<RandomState>,
}

impl BloomFilter {
    /// Create a filter with `num_bits` bits and `num_hashes` hash
    /// functions, seeded deterministically from `seed`.
    ///
    /// # Panics
    ///
    /// Panics if `num_bits` or `num_hashes` is zero.
    pub fn with_seed(num_bits: usize, num_hashes: usize, seed: u64) -> Self {
        assert!(num_bits > 0, "bloom filter must have at least one bit");
        assert!(num_hashes > 0, "bloom filter needs at least one hash");

        let mut words = Vec::with_capacity(num_bits.div_ceil(64));
        words.resize_with(num_bits.div_ceil(64), || AtomicU64::new(0));

        let hashers = (0..num_hashes)
            .map(|i| {
                let base = seed.wrapping_add((i as u64 + 1).wrapping_mul(SEED_MIX));
                RandomState::with_seeds(
                    base,
                    base.rotate_left(13),
                    base.rotate_left(29),
                    base.rotate_left(43),
                )
            })
            .collect();

        Self {
            words,
            num_bits,
            hashers,
        }
    }

    /// Create a filter with a random seed.
    pub fn new(num_bits: usize, num_hashes: usize) -> Self {
        Self::with_seed(num_bits, num_hashes, rand::random())
    }

    #[inline]
    fn bit_for<K: Hash>(&self, hasher: &RandomState, key: &K) -> (usize, u64) {
        let bit = (hasher.hash_one(key) % self.num_bits as u64) as usize;
        (bit / 64, 1u64 << (bit % 64))
    }

    /// Mark `key` as seen.
    pub fn insert<K: Hash>(&self, key: &K) {
        for hasher in &self.hashers {
            let (word, mask) = self.bit_for(hasher, key);
            self.words[word].fetch_or(mask, Ordering::Relaxed);
        }
    }

    /// True if `key` may have been inserted; false means definitely not.
    pub fn contains<K: Hash>(&self, key: &K) -> bool {
        self.hashers.iter().all(|hasher| {
            let (word, mask) = self.bit_for(hasher, key);
            self.words[word].load(Ordering::Relaxed) & mask != 0
        })
    }

    /// Reset every bit.
    pub fn clear(&self) {
        for word in &self.words {
            word.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_false_negatives() {
        let bloom = BloomFilter::with_seed(2048, 5, 7);
        for i in 0..100 {
            bloom.insert(&format!("key-{i}"));
        }
        for i in 0..100 {
            assert!(bloom.contains(&format!("key-{i}")));
        }
    }

    #[test]
    fn unseen_keys_mostly_absent() {
        let bloom = BloomFilter::with_seed(4096, 5, 7);
        for i in 0..50 {
            bloom.insert(&format!("seen-{i}"));
        }
        // A roomy filter should report the vast majority of unseen keys
        // as absent; allow a little slack for false positives.
        let false_positives = (0..1000)
            .filter(|i| bloom.contains(&format!("unseen-{i}")))
            .count();
        assert!(false_positives < 50, "false positives: {false_positives}");
    }

    #[test]
    fn clear_resets_state() {
        let bloom = BloomFilter::with_seed(256, 3, 7);
        bloom.insert(&"k");
        assert!(bloom.contains(&"k"));
        bloom.clear();
        assert!(!bloom.contains(&"k"));
    }
}
