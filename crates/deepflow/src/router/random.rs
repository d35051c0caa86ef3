//! Injectable randomness for explore/exploit decisions.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

/// Source of uniform draws in `[0, 1)`
pub trait RandomSource: Send + Sync {
    fn next_f64(&self) -> f64;
}

/// Thread-local RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_f64(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Reproducible RNG from a fixed seed
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
    fn next_f64(&self) -> f64 {
        self.rng.lock().gen::<f64>()
    }
}

/// Replays a fixed sequence, then repeats the fallback value
#[derive(Debug)]
pub struct SequenceRandom {
    values: Mutex<VecDeque<f64>>,
    fallback: f64,
}

impl SequenceRandom {
    pub fn new(values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            values: Mutex::new(values.into_iter().collect()),
            fallback: 0.999,
        }
    }

    /// Sequence that never triggers exploration
    pub fn never() -> Self {
        Self::new(std::iter::empty())
    }

    pub fn with_fallback(mut self, fallback: f64) -> Self {
        self.fallback = fallback;
        self
    }
}

impl RandomSource for SequenceRandom {
    fn next_f64(&self) -> f64 {
        self.values.lock().pop_front().unwrap_or(self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_random_reproducible() {
        let a = SeededRandom::new(7);
        let b = SeededRandom::new(7);
        for _ in 0..5 {
            let x = a.next_f64();
            assert_eq!(x, b.next_f64());
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn test_sequence_random_replays_then_falls_back() {
        let r = SequenceRandom::new([0.01, 0.5]).with_fallback(0.9);
        assert_eq!(r.next_f64(), 0.01);
        assert_eq!(r.next_f64(), 0.5);
        assert_eq!(r.next_f64(), 0.9);
        assert_eq!(r.next_f64(), 0.9);
    }
}
