//! Count-Min Sketch for approximate access frequencies.
//!
//! A `depth x width` matrix of counters with one independently seeded
//! hash function per row. Estimates over-count (hash collisions only
//! ever add), never under-count, which is the property the admission
//! policy relies on.

use ahash::RandomState;
use parking_lot::RwLock;
use std::hash::Hash;
use std::sync::atomic::{AtomicU32, Ordering};

/// Golden-ratio constant used to derive per-row seeds from a base seed.
const SEED_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// Approximate frequency counter with one-sided error.
///
/// Increments and estimates are lock-free on the counter cells and may
/// run concurrently; [`decay`](CountMinSketch::decay) takes the sketch
/// exclusively while it halves every cell.
#[derive(Debug)]
pub struct CountMinSketch {
    width: usize,
    depth: usize,
    /// Row-major `depth x width` counter matrix.
    cells: Vec<AtomicU32>,
    /// One seeded hasher per row.
    hashers: Vec<RandomState>,
    /// Increments hold this shared; decay holds it exclusive.
    gate: RwLock<()>,
}

impl CountMinSketch {
    /// Create a sketch with the given dimensions and a caller-chosen
    /// seed. The same seed yields the same cell placement, which the
    /// tests rely on.
    ///
    /// # Panics
    ///
    /// Panics if `width` or `depth` is zero.
    pub fn with_seed(width: usize, depth: usize, seed: u64) -> Self {
        assert!(width > 0, "sketch width must be non-zero");
        assert!(depth > 0, "sketch depth must be non-zero");

        let mut cells = Vec::with_capacity(width * depth);
        cells.resize_with(width * depth, || AtomicU32::new(0));

        let hashers = (0..depth)
            .map(|row| {
                let base = seed.wrapping_add((row as u64 + 1).wrapping_mul(SEED_MIX));
                RandomState::with_seeds(
                    base,
                    base.rotate_left(17),
                    base.rotate_left(31),
                    base.rotate_left(47),
                )
            })
            .collect();

        Self {
            width,
            depth,
            cells,
            hashers,
            gate: RwLock::new(()),
        }
    }

    /// Create a sketch with a random seed.
    pub fn new(width: usize, depth: usize) -> Self {
        Self::with_seed(width, depth, rand::random())
    }

    /// Number of counters per row.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[inline]
    fn cell_index<K: Hash>(&self, row: usize, key: &K) -> usize {
        let hash = self.hashers[row].hash_one(key);
        row * self.width + (hash % self.width as u64) as usize
    }

    /// Record one access of `key`: adds 1 to one cell per row.
    ///
    /// Cells saturate at `u32::MAX` rather than wrapping.
    pub fn increment<K: Hash>(&self, key: &K) {
        let _shared = self.gate.read();
        for row in 0..self.depth {
            let cell = &self.cells[self.cell_index(row, key)];
            // Saturate instead of fetch_add so a pinned cell cannot wrap
            // to zero. The load/store race only loses increments, which
            // keeps the estimate one-sided.
            let current = cell.load(Ordering::Relaxed);
            if current < u32::MAX {
                cell.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Estimate the access count of `key`: the minimum of its cells.
    ///
    /// Never less than zero and, absent decay, never more than the true
    /// count plus collision noise; never an under-count.
    pub fn estimate<K: Hash>(&self, key: &K) -> u32 {
        let _shared = self.gate.read();
        let mut min = u32::MAX;
        for row in 0..self.depth {
            let count = self.cells[self.cell_index(row, key)].load(Ordering::Relaxed);
            min = min.min(count);
        }
        min
    }

    /// Halve every cell, aging out stale frequency so recency dominates
    /// over the long run. Takes the sketch exclusively.
    pub fn decay(&self) {
        let _exclusive = self.gate.write();
        for cell in &self.cells {
            let current = cell.load(Ordering::Relaxed);
            cell.store(current >> 1, Ordering::Relaxed);
        }
    }
}
