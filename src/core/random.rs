//! Injectable random source used by dice, sampling and selection fields.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// The minimal randomness contract the engine needs.
///
/// Any implementation works: the default is [`StdRng`], and
/// [`ScriptedRandom`] replays a fixed sequence for tests.
pub trait RandomSource {
    /// Pick an integer in `[low, high]`, both inclusive. `low <= high`.
    fn int_in_range(&mut self, low: i64, high: i64) -> i64;

    /// Choose an index in `0..len` uniformly. `len > 0`.
    fn choose_index(&mut self, len: usize) -> usize;
}

impl RandomSource for StdRng {
    fn int_in_range(&mut self, low: i64, high: i64) -> i64 {
        self.gen_range(low..=high)
    }

    fn choose_index(&mut self, len: usize) -> usize {
        self.gen_range(0..len)
    }
}

/// Build the default random source from a numeric seed.
pub fn seeded(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Hash a textual seed into a numeric one. Stable across runs on the same
/// pointer width; 32-bit and 64-bit targets derive different seeds.
pub fn seed_from_str(seed: &str) -> u64 {
    let mut hasher = FxHasher::default();
    seed.hash(&mut hasher);
    hasher.finish()
}

/// A random source that replays a scripted sequence of values.
///
/// Each draw takes the next value and wraps it into the requested range;
/// the script restarts from the beginning when exhausted. An empty script
/// always yields the lowest value of the range.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRandom {
    values: Vec<i64>,
    cursor: usize,
}

impl ScriptedRandom {
    pub fn new(values: impl IntoIterator<Item = i64>) -> Self {
        Self {
            values: values.into_iter().collect(),
            cursor: 0,
        }
    }

    fn next_value(&mut self) -> Option<i64> {
        if self.values.is_empty() {
            return None;
        }
        let value = self.values[self.cursor % self.values.len()];
        self.cursor += 1;
        Some(value)
    }
}

impl RandomSource for ScriptedRandom {
    fn int_in_range(&mut self, low: i64, high: i64) -> i64 {
        let Some(value) = self.next_value() else {
            return low;
        };
        if (low..=high).contains(&value) {
            return value;
        }
        let span = high - low + 1;
        low + (value - low).rem_euclid(span)
    }

    fn choose_index(&mut self, len: usize) -> usize {
        match self.next_value() {
            Some(value) => value.rem_euclid(len as i64) as usize,
            None => 0,
        }
    }
}
