use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// Counters accumulated by evaluation contexts and merged back after a parallel pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalStats {
    pub formulas_evaluated: u64,
    pub random_draws: u64,
}

/// Interpreter-local mutable state.
///
/// Every worker evaluating a shard of a formula group owns a context forked from the engine's,
/// so no two threads share an RNG or scratch buffer. Forks are merged back once the shard is done.
#[derive(Debug, Clone)]
pub struct EvalContext {
    rng: StdRng,
    pub(crate) scratch: Vec<f64>,
    pub(crate) stats: EvalStats,
}

impl EvalContext {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            scratch: Vec::new(),
            stats: EvalStats::default(),
        }
    }

    /// A context for worker shard `shard`, seeded from this context's stream.
    pub fn fork(&mut self, shard: u64) -> EvalContext {
        let seed = self.rng.next_u64() ^ shard.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        EvalContext::new(seed)
    }

    pub fn merge(&mut self, other: EvalContext) {
        self.stats.formulas_evaluated += other.stats.formulas_evaluated;
        self.stats.random_draws += other.stats.random_draws;
    }

    pub fn next_random(&mut self) -> f64 {
        self.stats.random_draws += 1;
        self.rng.gen::<f64>()
    }

    pub fn stats(&self) -> EvalStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forks_are_deterministic_and_independent() {
        let mut a = EvalContext::new(42);
        let mut b = EvalContext::new(42);
        let mut fa = a.fork(3);
        let mut fb = b.fork(3);
        assert_eq!(fa.next_random(), fb.next_random());

        let mut other = a.fork(4);
        assert_ne!(fa.next_random(), other.next_random());

        a.merge(fa);
        assert_eq!(a.stats().random_draws, 2);
    }
}
