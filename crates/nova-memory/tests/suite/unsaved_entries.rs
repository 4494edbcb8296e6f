use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nova_memory::{
    CachePolicy, CancellationToken, EvictionNegotiator, EvictionRefused, OverflowingLru,
};

#[derive(Debug)]
struct Buffer {
    dirty: AtomicBool,
}

impl Buffer {
    fn new(dirty: bool) -> Arc<Self> {
        Arc::new(Self {
            dirty: AtomicBool::new(dirty),
        })
    }
}

struct BufferNegotiator;

impl EvictionNegotiator<&'static str, Arc<Buffer>> for BufferNegotiator {
    fn try_close(
        &self,
        _key: &&'static str,
        value: &Arc<Buffer>,
        _cancel: &CancellationToken,
    ) -> Result<(), EvictionRefused> {
        if value.dirty.load(Ordering::SeqCst) {
            return Err(EvictionRefused::unsaved_changes());
        }
        Ok(())
    }
}

#[test]
fn dirty_buffer_survives_any_number_of_competing_puts() {
    let cache = OverflowingLru::new("buffers", CachePolicy::new(2, 1), BufferNegotiator);
    let dirty = Buffer::new(true);
    cache.put("dirty", dirty.clone());

    let names = ["a", "b", "c", "d", "e", "f", "g", "h"];
    for name in names {
        cache.put(name, Buffer::new(false));
        assert!(cache.contains(&"dirty"));
    }

    // Once saved, the buffer is an ordinary eviction candidate again.
    dirty.dirty.store(false, Ordering::SeqCst);
    cache.put("i", Buffer::new(false));
    assert!(!cache.contains(&"dirty"));
}

#[test]
fn explicit_remove_of_dirty_buffer_is_refused() {
    let cache = OverflowingLru::new("buffers", CachePolicy::new(2, 1), BufferNegotiator);
    cache.put("dirty", Buffer::new(true));
    assert!(cache.remove(&"dirty").is_err());
    assert!(cache.contains(&"dirty"));
}

#[test]
fn space_cost_override_is_respected() {
    struct Weighted;

    impl EvictionNegotiator<u8, usize> for Weighted {
        fn space_cost(&self, _key: &u8, value: &usize) -> usize {
            *value
        }

        fn try_close(
            &self,
            _key: &u8,
            _value: &usize,
            _cancel: &CancellationToken,
        ) -> Result<(), EvictionRefused> {
            Ok(())
        }
    }

    let cache = OverflowingLru::new("weighted", CachePolicy::new(10, 0), Weighted);
    cache.put(1, 4);
    cache.put(2, 4);
    cache.put(3, 4);
    let resident: Vec<u8> = cache.iter_resident().into_iter().map(|(k, _)| k).collect();
    assert_eq!(resident, vec![2, 3]);
    assert_eq!(cache.stats().current_space, 8);
}
