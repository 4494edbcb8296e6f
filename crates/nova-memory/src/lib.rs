//! Bounded in-memory caches with negotiated eviction for Nova.
//!
//! The central type is [`OverflowingLru`], a least-recently-used cache whose
//! victims may *refuse* to be closed (for example a buffer with unsaved
//! edits). Refusals are absorbed: the cache keeps the entry resident and, if
//! it cannot reclaim enough space, accepts a bounded overrun instead of
//! failing the insertion.
//!
//! Negotiation happens through an [`EvictionNegotiator`] that is always
//! invoked *without* the cache lock held, so negotiators are free to call
//! back into the cache (or into code that does).

mod cache;
mod eviction;
mod policy;
mod stats;

pub use cache::{Cancelled, OverflowingLru};
pub use eviction::{EvictionNegotiator, EvictionRefused, RefusalReason};
pub use policy::CachePolicy;
pub use stats::CacheStats;
pub use tokio_util::sync::CancellationToken;
