use std::collections::HashSet;
use std::sync::Arc;

use nova_memory::{CachePolicy, EvictionRefused, OverflowingLru};
use parking_lot::Mutex;
use proptest::prelude::*;

/// Entries whose key is in `pinned` refuse to close.
fn pinned_negotiator(
    pinned: Arc<Mutex<HashSet<u16>>>,
) -> impl Fn(&u16, &u8) -> Result<(), EvictionRefused> + Send + Sync {
    move |key: &u16, _: &u8| {
        if pinned.lock().contains(key) {
            Err(EvictionRefused::unsaved_changes())
        } else {
            Ok(())
        }
    }
}

proptest! {
    #[test]
    fn closeable_entries_keep_space_within_tolerance(
        limit in 1usize..8,
        overflow in 0usize..4,
        keys in proptest::collection::vec(0u16..32, 1..64),
    ) {
        let cache = OverflowingLru::new(
            "prop",
            CachePolicy::new(limit, overflow),
            |_: &u16, _: &u8| -> Result<(), EvictionRefused> { Ok(()) },
        );
        for key in keys {
            cache.put(key, 0);
            prop_assert!(cache.stats().current_space <= limit + overflow);
            prop_assert!(cache.contains(&key));
        }
    }

    #[test]
    fn refusing_entries_are_never_lost(
        limit in 1usize..6,
        overflow in 0usize..3,
        pinned_keys in proptest::collection::hash_set(0u16..16, 0..8),
        keys in proptest::collection::vec(0u16..16, 1..48),
    ) {
        let pinned = Arc::new(Mutex::new(pinned_keys.clone()));
        let cache = OverflowingLru::new(
            "prop",
            CachePolicy::new(limit, overflow),
            pinned_negotiator(pinned),
        );

        let mut seen_pinned = HashSet::new();
        for key in keys {
            cache.put(key, 0);
            if pinned_keys.contains(&key) {
                seen_pinned.insert(key);
            }
            for pinned in &seen_pinned {
                prop_assert!(cache.contains(pinned));
            }

            let stats = cache.stats();
            let refusing = seen_pinned.len();
            // Space above the tolerance is only ever taken by refusing entries
            // plus the entry that was just inserted.
            prop_assert!(stats.current_space <= (limit + overflow).max(refusing + 1));
        }
    }
}

#[test]
fn retry_sweep_reclaims_entries_that_were_saved_meanwhile() {
    let pinned = Arc::new(Mutex::new(HashSet::from([1u16, 2])));
    let cache = OverflowingLru::new(
        "retry",
        CachePolicy::new(2, 0),
        pinned_negotiator(pinned.clone()),
    );
    cache.put(1, 0);
    cache.put(2, 0);
    cache.put(3, 0);
    assert_eq!(cache.stats().overflow, 1);

    pinned.lock().clear();
    cache.shrink();
    let stats = cache.stats();
    assert_eq!(stats.overflow, 0);
    assert_eq!(stats.current_space, 2);
}

#[test]
fn shrinking_the_limit_sweeps_immediately() {
    let cache = OverflowingLru::new(
        "resize",
        CachePolicy::new(4, 0),
        |_: &u16, _: &u8| -> Result<(), EvictionRefused> { Ok(()) },
    );
    for key in 0..4 {
        cache.put(key, 0);
    }
    cache.set_space_limit(2);
    let resident: Vec<u16> = cache.iter_resident().into_iter().map(|(k, _)| k).collect();
    assert_eq!(resident, vec![2, 3]);
}
