//! Injected randomness for branch and latency draws.

use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of uniform draws. Every random decision in the pipeline goes through one.
pub trait RandomSource: Send + Sync {
    /// A uniform draw from the inclusive `range`.
    fn next_in(&self, range: RangeInclusive<u64>) -> u64;
}

/// Thread-local OS-seeded generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_in(&self, range: RangeInclusive<u64>) -> u64 {
        if range.start() >= range.end() {
            return *range.start();
        }
        rand::thread_rng().gen_range(range)
    }
}

/// Deterministic generator for reproducible runs.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_in(&self, range: RangeInclusive<u64>) -> u64 {
        if range.start() >= range.end() {
            return *range.start();
        }
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(range)
    }
}

/// Replays a fixed script of raw values, folded into each requested range.
///
/// Once the script is exhausted every draw returns the start of its range.
#[derive(Debug, Default)]
pub struct ScriptedRandom {
    values: Mutex<VecDeque<u64>>,
}

impl ScriptedRandom {
    pub fn new(values: impl IntoIterator<Item = u64>) -> Self {
        Self {
            values: Mutex::new(values.into_iter().collect()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.values.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl RandomSource for ScriptedRandom {
    fn next_in(&self, range: RangeInclusive<u64>) -> u64 {
        let (start, end) = (*range.start(), *range.end());
        let raw = self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match raw {
            Some(v) if end > start => start + v % (end - start + 1),
            _ => start,
        }
    }
}
