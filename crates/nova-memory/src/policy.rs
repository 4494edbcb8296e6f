use serde::{Deserialize, Serialize};

/// Space accounting knobs for an [`crate::OverflowingLru`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Space the cache tries to stay within.
    pub space_limit: usize,
    /// Extra space that may be occupied before a retry sweep is forced.
    pub overflow: usize,
    /// Number of full sweeps retried when an insertion would exceed
    /// `space_limit + overflow`.
    pub sweep_retries: u32,
}

impl CachePolicy {
    pub const fn new(space_limit: usize, overflow: usize) -> Self {
        Self {
            space_limit,
            overflow,
            sweep_retries: 1,
        }
    }

    pub const fn with_sweep_retries(mut self, sweep_retries: u32) -> Self {
        self.sweep_retries = sweep_retries;
        self
    }

    /// Hard threshold above which a retry sweep is attempted.
    pub fn tolerated_space(&self) -> usize {
        self.space_limit.saturating_add(self.overflow)
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(1_000, 100)
    }
}
