use std::fmt;

use tokio_util::sync::CancellationToken;

/// Why a candidate declined to be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefusalReason {
    /// The entry holds state that has not been persisted yet.
    UnsavedChanges,
    /// The entry is in use and cannot be released right now.
    InUse,
    /// Negotiation was cancelled before a decision was made.
    Cancelled,
}

/// Returned by an [`EvictionNegotiator`] to keep an entry resident.
///
/// A refusal never escapes an insertion: the cache skips the candidate and
/// moves on to the next-oldest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionRefused {
    pub reason: RefusalReason,
}

impl EvictionRefused {
    pub const fn new(reason: RefusalReason) -> Self {
        Self { reason }
    }

    pub const fn unsaved_changes() -> Self {
        Self::new(RefusalReason::UnsavedChanges)
    }

    pub const fn in_use() -> Self {
        Self::new(RefusalReason::InUse)
    }

    pub const fn cancelled() -> Self {
        Self::new(RefusalReason::Cancelled)
    }
}

impl fmt::Display for EvictionRefused {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            RefusalReason::UnsavedChanges => write!(f, "entry has unsaved changes"),
            RefusalReason::InUse => write!(f, "entry is in use"),
            RefusalReason::Cancelled => write!(f, "close negotiation cancelled"),
        }
    }
}

impl std::error::Error for EvictionRefused {}

/// Cache-specific policy hooks consulted while making space.
///
/// Implementations are called without the cache lock held and may call back
/// into the owning cache.
pub trait EvictionNegotiator<K, V>: Send + Sync {
    /// Space occupied by `value`. Defaults to one unit per entry.
    fn space_cost(&self, _key: &K, _value: &V) -> usize {
        1
    }

    /// Attempt to release the resources held by `value`.
    ///
    /// Returning `Ok(())` commits the eviction; returning a refusal keeps the
    /// entry resident.
    fn try_close(&self, key: &K, value: &V, cancel: &CancellationToken)
        -> Result<(), EvictionRefused>;
}

impl<K, V, F> EvictionNegotiator<K, V> for F
where
    F: Fn(&K, &V) -> Result<(), EvictionRefused> + Send + Sync,
{
    fn try_close(
        &self,
        key: &K,
        value: &V,
        _cancel: &CancellationToken,
    ) -> Result<(), EvictionRefused> {
        self(key, value)
    }
}
