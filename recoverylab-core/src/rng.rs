//! Deterministic RNG hierarchy.
//!
//! A master seed generates deterministic sub-seeds for each
//! `(scope, key, iteration)` tuple, e.g. `("gbm", "DE", 0)` for the boosting
//! subsample stream of Germany's per-region model. Sub-seeds are derived via
//! BLAKE3, independently of thread scheduling order, so results are identical
//! regardless of thread count.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SEED: u64 = 42;

/// Deterministic RNG hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngHierarchy {
    master_seed: u64,
}

impl Default for RngHierarchy {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl RngHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Derive a deterministic sub-seed for `(scope, key, iteration)`.
    ///
    /// Scope and key are length-prefixed so `("ab", "c")` and `("a", "bc")`
    /// do not collide.
    pub fn sub_seed(&self, scope: &str, key: &str, iteration: u64) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        for part in [scope, key] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        hasher.update(&iteration.to_le_bytes());
        let digest = hasher.finalize();
        let head: [u8; 8] = digest.as_bytes()[..8].try_into().unwrap_or([0; 8]);
        u64::from_le_bytes(head)
    }

    /// Seeded generator for one stream, e.g. row subsampling of one region.
    pub fn rng_for(&self, scope: &str, key: &str, iteration: u64) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(scope, key, iteration))
    }
}
