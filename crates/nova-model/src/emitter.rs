use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, ReentrantMutex};

use crate::delta::{DeltaBuilder, ElementDelta};

pub type DeltaListener = Arc<dyn Fn(&ElementDelta) + Send + Sync>;

/// Returned by [`DeltaEmitter::register_listener`]; used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Batch {
    depth: usize,
    builder: DeltaBuilder,
}

/// Collects deltas per outermost operation and publishes each batch once.
///
/// Batches are tracked per thread: nested operations on the same thread
/// contribute to their outermost caller's batch.
pub struct DeltaEmitter {
    batches: Mutex<HashMap<ThreadId, Batch>>,
    listeners: Mutex<Vec<(ListenerId, DeltaListener)>>,
    next_listener: AtomicU64,
    /// Serializes publication so batches reach listeners in the order their
    /// operations finished. Reentrant so a listener may run model operations.
    publish: ReentrantMutex<()>,
}

impl Default for DeltaEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaEmitter {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            publish: ReentrantMutex::new(()),
        }
    }

    pub fn register_listener(&self, listener: DeltaListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Starts (or nests into) an operation on the current thread. The batch
    /// is published when the outermost guard drops.
    pub fn begin(&self) -> OperationGuard<'_> {
        let mut batches = self.batches.lock();
        batches.entry(thread::current().id()).or_default().depth += 1;
        OperationGuard { emitter: self }
    }

    /// Whether the current thread is inside an operation.
    pub fn in_operation(&self) -> bool {
        self.batches
            .lock()
            .get(&thread::current().id())
            .is_some_and(|batch| batch.depth > 0)
    }

    /// Merges `delta` into the current thread's batch.
    pub fn add_delta(&self, delta: ElementDelta) {
        tracing::trace!(
            target = "nova.model",
            handle = %delta.handle,
            kind = ?delta.kind,
            flags = ?delta.flags,
            "recording delta"
        );
        let mut batches = self.batches.lock();
        batches
            .entry(thread::current().id())
            .or_default()
            .builder
            .add(delta);
    }

    /// Publishes the current thread's pending batch to every listener.
    ///
    /// Returns the published tree, or `None` if the batch was empty or an
    /// operation is still running on this thread.
    pub fn flush(&self) -> Option<ElementDelta> {
        let _publish = self.publish.lock();
        let batch = {
            let mut batches = self.batches.lock();
            let id = thread::current().id();
            if batches.get(&id).is_some_and(|batch| batch.depth > 0) {
                return None;
            }
            batches.remove(&id)?
        };
        let delta = batch.builder.finish()?;
        self.notify(&delta);
        Some(delta)
    }

    fn end(&self) {
        let id = thread::current().id();
        let outermost = {
            let mut batches = self.batches.lock();
            match batches.get_mut(&id) {
                Some(batch) if batch.depth > 1 => {
                    batch.depth -= 1;
                    false
                }
                Some(batch) => {
                    batch.depth = 0;
                    true
                }
                None => false,
            }
        };
        if outermost {
            self.flush();
        }
    }

    fn notify(&self, delta: &ElementDelta) {
        let listeners: Vec<DeltaListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        tracing::trace!(
            target = "nova.model",
            listeners = listeners.len(),
            affected = delta.affected().len(),
            "publishing delta batch"
        );
        for listener in listeners {
            listener(delta);
        }
    }
}

impl fmt::Debug for DeltaEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaEmitter")
            .field("pending_batches", &self.batches.lock().len())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

/// Keeps an operation open on the current thread.
#[must_use = "the operation ends when the guard is dropped"]
pub struct OperationGuard<'a> {
    emitter: &'a DeltaEmitter,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.emitter.end();
    }
}
