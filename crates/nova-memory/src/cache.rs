use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use lru::LruCache;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::eviction::{EvictionNegotiator, EvictionRefused};
use crate::policy::CachePolicy;
use crate::stats::CacheStats;

/// An insertion or sweep was abandoned because its cancellation token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

struct Slot<V> {
    value: V,
    cost: usize,
    /// Bumped on every insertion so a commit can tell whether the key was
    /// re-inserted while its close was being negotiated.
    stamp: u64,
    closing: bool,
}

struct Candidate<K, V> {
    key: K,
    value: V,
    stamp: u64,
}

struct Core<K, V> {
    policy: CachePolicy,
    current_space: usize,
    next_stamp: u64,
    entries: LruCache<K, Slot<V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> Core<K, V> {
    fn occupied_excluding(&self, key: Option<&K>) -> usize {
        let own = key
            .and_then(|key| self.entries.peek(key))
            .map(|slot| slot.cost)
            .unwrap_or(0);
        self.current_space.saturating_sub(own)
    }

    /// Picks eviction candidates from least- to most-recently used until the
    /// projected occupancy drops to `target`, marking each one as closing.
    fn plan(
        &mut self,
        protect: Option<&K>,
        incoming: usize,
        target: usize,
        skip: &HashSet<K>,
    ) -> Vec<Candidate<K, V>> {
        let mut projected = self.occupied_excluding(protect).saturating_add(incoming);
        let mut keys = Vec::new();
        for (key, slot) in self.entries.iter().rev() {
            if projected <= target {
                break;
            }
            if slot.closing || protect == Some(key) || skip.contains(key) {
                continue;
            }
            projected = projected.saturating_sub(slot.cost);
            keys.push(key.clone());
        }

        let mut candidates = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(slot) = self.entries.peek_mut(&key) {
                slot.closing = true;
                candidates.push(Candidate {
                    value: slot.value.clone(),
                    stamp: slot.stamp,
                    key,
                });
            }
        }
        candidates
    }

    /// Finishes a negotiation. Returns `true` if the entry was evicted.
    fn commit(&mut self, candidate: &Candidate<K, V>, accepted: bool) -> bool {
        match self.entries.peek_mut(&candidate.key) {
            Some(slot) if slot.stamp == candidate.stamp => {
                slot.closing = false;
                if !accepted {
                    return false;
                }
            }
            _ => return false,
        }
        if let Some(slot) = self.entries.pop(&candidate.key) {
            self.current_space = self.current_space.saturating_sub(slot.cost);
        }
        true
    }

    fn insert(&mut self, key: K, value: V, cost: usize) -> Option<V> {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        let previous = self.entries.put(
            key,
            Slot {
                value,
                cost,
                stamp,
                closing: false,
            },
        );
        self.current_space = self.current_space.saturating_add(cost);
        previous.map(|slot| {
            self.current_space = self.current_space.saturating_sub(slot.cost);
            slot.value
        })
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.entries.pop(key)?;
        self.current_space = self.current_space.saturating_sub(slot.cost);
        Some(slot.value)
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            space_limit: self.policy.space_limit,
            current_space: self.current_space,
            overflow: self.current_space.saturating_sub(self.policy.space_limit),
            len: self.entries.len(),
            closing: self.entries.iter().filter(|(_, slot)| slot.closing).count(),
        }
    }
}

/// Thread-safe least-recently-used cache that tolerates refused evictions.
///
/// Insertions never fail because of space pressure. When the cache cannot
/// make room (every candidate refused), the new entry is inserted anyway and
/// the cache runs over its `space_limit`. Overflow is reclaimed lazily by
/// later insertions or explicitly via [`OverflowingLru::shrink`].
///
/// Entries with equal recency are evicted in insertion order.
pub struct OverflowingLru<K, V> {
    name: &'static str,
    core: Mutex<Core<K, V>>,
    negotiator: Box<dyn EvictionNegotiator<K, V>>,
}

impl<K, V> OverflowingLru<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
{
    pub fn new(
        name: &'static str,
        policy: CachePolicy,
        negotiator: impl EvictionNegotiator<K, V> + 'static,
    ) -> Self {
        Self {
            name,
            core: Mutex::new(Core {
                policy,
                current_space: 0,
                next_stamp: 0,
                entries: LruCache::unbounded(),
            }),
            negotiator: Box::new(negotiator),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn policy(&self) -> CachePolicy {
        self.core.lock().policy
    }

    pub fn stats(&self) -> CacheStats {
        self.core.lock().stats()
    }

    pub fn len(&self) -> usize {
        self.core.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached value and marks it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut core = self.core.lock();
        core.entries.get(key).map(|slot| slot.value.clone())
    }

    /// Returns the cached value without touching its recency.
    pub fn peek(&self, key: &K) -> Option<V> {
        let core = self.core.lock();
        core.entries.peek(key).map(|slot| slot.value.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.core.lock().entries.contains(key)
    }

    /// Resident entries ordered from least- to most-recently used.
    pub fn iter_resident(&self) -> Vec<(K, V)> {
        let core = self.core.lock();
        core.entries
            .iter()
            .rev()
            .map(|(key, slot)| (key.clone(), slot.value.clone()))
            .collect()
    }

    /// Inserts `value`, evicting older entries as needed. Returns the value
    /// previously stored under `key`.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        let never = CancellationToken::new();
        match self.put_cancellable(key, value, &never) {
            Ok(previous) => previous,
            Err(Cancelled) => None,
        }
    }

    /// Like [`OverflowingLru::put`], but gives up before inserting when
    /// `cancel` fires. Entries evicted before cancellation stay evicted.
    pub fn put_cancellable(
        &self,
        key: K,
        value: V,
        cancel: &CancellationToken,
    ) -> Result<Option<V>, Cancelled> {
        let cost = self.negotiator.space_cost(&key, &value);
        self.reclaim(Some(&key), cost, cancel)?;

        let mut core = self.core.lock();
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        let previous = core.insert(key, value, cost);
        self.report_overrun(&core);
        Ok(previous)
    }

    /// Inserts `value` unless another value is already resident under `key`.
    ///
    /// Returns the resident value: the existing one when the caller lost the
    /// race, `value` otherwise.
    pub fn put_if_absent(
        &self,
        key: K,
        value: V,
        cancel: &CancellationToken,
    ) -> Result<V, Cancelled> {
        if let Some(existing) = self.get(&key) {
            return Ok(existing);
        }

        let cost = self.negotiator.space_cost(&key, &value);
        self.reclaim(Some(&key), cost, cancel)?;

        let mut core = self.core.lock();
        if let Some(existing) = core.entries.get(&key) {
            return Ok(existing.value.clone());
        }
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        core.insert(key, value.clone(), cost);
        self.report_overrun(&core);
        Ok(value)
    }

    /// Negotiated removal of a single entry.
    ///
    /// Unlike eviction, a refusal is reported back to the caller.
    pub fn remove(&self, key: &K) -> Result<Option<V>, EvictionRefused> {
        let candidate = {
            let mut core = self.core.lock();
            let Some(slot) = core.entries.peek_mut(key) else {
                return Ok(None);
            };
            if slot.closing {
                return Err(EvictionRefused::in_use());
            }
            slot.closing = true;
            Candidate {
                key: key.clone(),
                value: slot.value.clone(),
                stamp: slot.stamp,
            }
        };

        let never = CancellationToken::new();
        let outcome = self
            .negotiator
            .try_close(&candidate.key, &candidate.value, &never);
        let removed = self.core.lock().commit(&candidate, outcome.is_ok());
        outcome?;
        Ok(removed.then_some(candidate.value))
    }

    /// Removes an entry without consulting the negotiator.
    pub fn force_remove(&self, key: &K) -> Option<V> {
        self.core.lock().remove(key)
    }

    /// Attempts to bring occupancy back within `space_limit`.
    pub fn shrink(&self) {
        let never = CancellationToken::new();
        let _ = self.reclaim(None, 0, &never);
    }

    pub fn set_space_limit(&self, space_limit: usize) {
        let shrinking = {
            let mut core = self.core.lock();
            let shrinking = space_limit < core.policy.space_limit;
            core.policy.space_limit = space_limit;
            shrinking
        };
        if shrinking {
            self.shrink();
        }
    }

    /// Negotiates closes until `incoming` more space fits under the limit,
    /// every candidate has been consulted, or `cancel` fires.
    fn reclaim(
        &self,
        protect: Option<&K>,
        incoming: usize,
        cancel: &CancellationToken,
    ) -> Result<(), Cancelled> {
        let mut refused: HashSet<K> = HashSet::new();
        let mut retries_left = self.core.lock().policy.sweep_retries;

        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }

            let candidates = {
                let mut core = self.core.lock();
                let limit = core.policy.space_limit;
                let projected = core.occupied_excluding(protect).saturating_add(incoming);
                if projected <= limit {
                    return Ok(());
                }

                let plan = core.plan(protect, incoming, limit, &refused);
                if plan.is_empty() {
                    // Every candidate was consulted once.
                    if projected > core.policy.tolerated_space()
                        && retries_left > 0
                        && !refused.is_empty()
                    {
                        retries_left -= 1;
                        refused.clear();
                        tracing::trace!(
                            target = "nova.memory",
                            cache = self.name,
                            projected,
                            limit,
                            "retrying full sweep past overflow tolerance"
                        );
                        continue;
                    }
                    return Ok(());
                }
                plan
            };

            for candidate in candidates {
                let outcome = if cancel.is_cancelled() {
                    Err(EvictionRefused::cancelled())
                } else {
                    self.negotiator
                        .try_close(&candidate.key, &candidate.value, cancel)
                };
                let evicted = self.core.lock().commit(&candidate, outcome.is_ok());
                if evicted {
                    tracing::trace!(
                        target = "nova.memory",
                        cache = self.name,
                        key = ?candidate.key,
                        "evicted entry"
                    );
                    continue;
                }
                if let Err(refusal) = outcome {
                    tracing::debug!(
                        target = "nova.memory",
                        cache = self.name,
                        key = ?candidate.key,
                        reason = %refusal,
                        "eviction refused; keeping entry resident"
                    );
                }
                refused.insert(candidate.key);
            }
        }
    }

    fn report_overrun(&self, core: &Core<K, V>) {
        let tolerated = core.policy.tolerated_space();
        if core.current_space > tolerated {
            tracing::warn!(
                target = "nova.memory",
                cache = self.name,
                current_space = core.current_space,
                space_limit = core.policy.space_limit,
                overflow = core.policy.overflow,
                "cache exceeds overflow tolerance; every eviction candidate refused"
            );
        }
    }
}

impl<K, V> fmt::Debug for OverflowingLru<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.core.lock().stats();
        f.debug_struct("OverflowingLru")
            .field("name", &self.name)
            .field("stats", &stats)
            .finish()
    }
}
