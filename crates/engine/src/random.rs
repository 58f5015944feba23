use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _, thread_rng};

/// Source of randomness for reply selection and scheduling delays.
///
/// The engine never touches a global RNG directly so tests (and replay
/// tooling) can swap in a deterministic implementation.
pub trait RandomSource: Send + Sync {
    /// Uniform index in `0..len`. `len` is never zero when called.
    fn pick(&self, len: usize) -> usize;

    /// Uniform delay in milliseconds in `min..=max`.
    fn delay_ms(&self, min: u64, max: u64) -> u64;
}

/// Default source backed by the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn pick(&self, len: usize) -> usize {
        thread_rng().gen_range(0..len)
    }

    fn delay_ms(&self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        thread_rng().gen_range(min..=max)
    }
}

/// Deterministic source seeded once; same seed, same sequence.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn pick(&self, len: usize) -> usize {
        let mut rng = self.rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        rng.gen_range(0..len)
    }

    fn delay_ms(&self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        let mut rng = self.rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        rng.gen_range(min..=max)
    }
}
