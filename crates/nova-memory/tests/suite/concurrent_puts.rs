use std::sync::Arc;
use std::thread;

use nova_memory::{CachePolicy, EvictionRefused, OverflowingLru};

#[test]
fn concurrent_puts_keep_accounting_consistent() {
    let cache = Arc::new(OverflowingLru::new(
        "concurrent",
        CachePolicy::new(16, 4),
        |_: &u32, _: &u32| -> Result<(), EvictionRefused> { Ok(()) },
    ));

    let handles: Vec<_> = (0..4u32)
        .map(|thread| {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..500u32 {
                    let key = thread * 1_000 + i;
                    cache.put(key, i);
                    let _ = cache.get(&(key.saturating_sub(1)));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = cache.stats();
    assert_eq!(stats.current_space, stats.len);
    assert_eq!(stats.closing, 0);

    cache.shrink();
    assert!(cache.stats().current_space <= 16);
}
