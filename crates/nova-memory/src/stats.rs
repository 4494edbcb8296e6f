use serde::{Deserialize, Serialize};

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub space_limit: usize,
    pub current_space: usize,
    /// Space currently occupied beyond `space_limit`.
    pub overflow: usize,
    pub len: usize,
    /// Entries that are currently being negotiated for closing.
    pub closing: usize,
}

impl CacheStats {
    pub fn fill_ratio(&self) -> f64 {
        if self.space_limit == 0 {
            return f64::INFINITY;
        }
        (self.current_space as f64) / (self.space_limit as f64)
    }

    pub fn is_overflowing(&self) -> bool {
        self.overflow > 0
    }
}
