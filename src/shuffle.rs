use rand::seq::SliceRandom;

use crate::types::RunSeed;

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// SplitMix64 generator owned by the crate so shuffles do not depend on the
/// platform or on `rand`'s default generators.
#[derive(Debug, Clone)]
struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: RunSeed) -> Self {
        Self { state: seed }
    }

    fn step(&mut self) -> u64 {
        self.state = self.state.wrapping_add(GOLDEN_GAMMA);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

impl rand::RngCore for SplitMix64 {
    fn next_u32(&mut self) -> u32 {
        (self.step() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.step()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let word = self.step().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}

/// Seeded permutation source scoped to one request within one run.
///
/// A single shuffler is threaded through every class group of a request so
/// the pseudo-random stream is consumed in one fixed order; two shufflers
/// built from the same seed produce identical permutations.
#[derive(Debug, Clone)]
pub struct DeterministicShuffler {
    rng: SplitMix64,
}

impl DeterministicShuffler {
    /// Create a shuffler seeded with the run's seed.
    pub fn new(seed: RunSeed) -> Self {
        Self {
            rng: SplitMix64::new(seed),
        }
    }

    /// Shuffle `items` in place, advancing the shared stream.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }
}
