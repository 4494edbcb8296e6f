use std::collections::HashMap;
use std::sync::Arc;

use nova_memory::{
    CachePolicy, CacheStats, CancellationToken, Cancelled, EvictionNegotiator, EvictionRefused,
    OverflowingLru,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::body::ElementBody;
use crate::buffer::Buffer;
use crate::handle::Handle;

/// Sizing of the body store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Policy for the cache of openable bodies (roots, packages, units).
    pub units: CachePolicy,
    /// Policy for the cache of editable buffers.
    pub buffers: CachePolicy,
    /// Encoding passed to the resource layer when reading unit contents.
    pub encoding: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            units: CachePolicy::new(2_000, 200),
            buffers: CachePolicy::new(500, 50),
            encoding: "UTF-8".to_owned(),
        }
    }
}

type BufferCache = OverflowingLru<Handle, Arc<Buffer>>;
type MemberMap = HashMap<Handle, Arc<ElementBody>>;
type Pins = HashMap<Handle, usize>;

/// Closing a buffer fails while it holds unsaved edits or belongs to a live
/// working copy.
struct BufferNegotiator;

impl EvictionNegotiator<Handle, Arc<Buffer>> for BufferNegotiator {
    fn try_close(
        &self,
        _handle: &Handle,
        buffer: &Arc<Buffer>,
        _cancel: &CancellationToken,
    ) -> Result<(), EvictionRefused> {
        if buffer.has_unsaved_changes() {
            return Err(EvictionRefused::unsaved_changes());
        }
        if buffer.is_retained() {
            return Err(EvictionRefused::in_use());
        }
        buffer.close();
        Ok(())
    }
}

/// Closing a unit closes its buffer and drops the bodies of its members.
struct UnitNegotiator {
    buffers: Arc<BufferCache>,
    members: Arc<Mutex<MemberMap>>,
    pins: Arc<Mutex<Pins>>,
}

impl EvictionNegotiator<Handle, Arc<ElementBody>> for UnitNegotiator {
    fn try_close(
        &self,
        handle: &Handle,
        body: &Arc<ElementBody>,
        _cancel: &CancellationToken,
    ) -> Result<(), EvictionRefused> {
        if self.pins.lock().contains_key(handle) {
            return Err(EvictionRefused::in_use());
        }
        self.buffers.remove(handle)?;
        remove_members(&mut self.members.lock(), &body.children);
        Ok(())
    }
}

fn remove_members(members: &mut MemberMap, children: &[Handle]) {
    for child in children {
        if let Some(body) = members.remove(child) {
            remove_members(members, &body.children);
        }
    }
}

/// Process-independent mapping from handles to bodies and buffers.
///
/// Openable bodies and buffers live in two independently sized
/// [`OverflowingLru`] caches. Member bodies (types, fields, ...) are kept in a
/// plain map and are dropped together with their enclosing unit.
pub struct BodyStore {
    units: OverflowingLru<Handle, Arc<ElementBody>>,
    buffers: Arc<BufferCache>,
    members: Arc<Mutex<MemberMap>>,
    pins: Arc<Mutex<Pins>>,
    /// Serializes publishing opened units. A unit's members are in the map
    /// before its body becomes visible.
    install: Mutex<()>,
}

impl BodyStore {
    pub fn new(config: &StoreConfig) -> Self {
        let buffers = Arc::new(OverflowingLru::new(
            "buffers",
            config.buffers,
            BufferNegotiator,
        ));
        let members = Arc::new(Mutex::new(HashMap::new()));
        let pins = Arc::new(Mutex::new(HashMap::new()));
        let units = OverflowingLru::new(
            "units",
            config.units,
            UnitNegotiator {
                buffers: buffers.clone(),
                members: members.clone(),
                pins: pins.clone(),
            },
        );
        Self {
            units,
            buffers,
            members,
            pins,
            install: Mutex::new(()),
        }
    }

    /// Body of `handle` if resident. Openable bodies are marked most
    /// recently used.
    pub fn get(&self, handle: &Handle) -> Option<Arc<ElementBody>> {
        if handle.kind().is_openable() {
            self.units.get(handle)
        } else {
            self.members.lock().get(handle).cloned()
        }
    }

    pub fn peek(&self, handle: &Handle) -> Option<Arc<ElementBody>> {
        if handle.kind().is_openable() {
            self.units.peek(handle)
        } else {
            self.members.lock().get(handle).cloned()
        }
    }

    pub fn contains(&self, handle: &Handle) -> bool {
        self.peek(handle).is_some()
    }

    /// Installs `body`, possibly evicting other openable bodies. Never evicts
    /// `handle` itself.
    pub fn put(&self, handle: Handle, body: Arc<ElementBody>) {
        if handle.kind().is_openable() {
            self.units.put(handle, body);
        } else {
            self.members.lock().insert(handle, body);
        }
    }

    /// Installs a freshly opened unit unless another opener got there first.
    ///
    /// Returns the resident body and whether `body` was the one installed.
    /// Member bodies are only installed by the winner.
    pub fn install_opened(
        &self,
        handle: Handle,
        body: Arc<ElementBody>,
        members: Vec<(Handle, ElementBody)>,
        cancel: &CancellationToken,
    ) -> Result<(Arc<ElementBody>, bool), Cancelled> {
        let _install = self.install.lock();
        if let Some(resident) = self.units.peek(&handle) {
            return Ok((resident, false));
        }
        self.insert_members(members);
        match self.units.put_if_absent(handle, body.clone(), cancel) {
            Ok(resident) => {
                // Units are only published under the install lock, so only a
                // container body can have raced in here, and containers have
                // no members to undo.
                let installed = Arc::ptr_eq(&resident, &body);
                Ok((resident, installed))
            }
            Err(Cancelled) => {
                remove_members(&mut self.members.lock(), &body.children);
                Err(Cancelled)
            }
        }
    }

    fn insert_members(&self, members: Vec<(Handle, ElementBody)>) {
        let mut map = self.members.lock();
        for (member, member_body) in members {
            map.insert(member, Arc::new(member_body));
        }
    }

    /// Swaps in a re-parsed unit body, replacing the previous body's members.
    pub fn replace_opened(
        &self,
        handle: Handle,
        body: Arc<ElementBody>,
        members: Vec<(Handle, ElementBody)>,
    ) {
        let _install = self.install.lock();
        {
            let mut map = self.members.lock();
            if let Some(previous) = self.units.peek(&handle) {
                remove_members(&mut map, &previous.children);
            }
            for (member, member_body) in members {
                map.insert(member, Arc::new(member_body));
            }
        }
        self.units.put(handle, body);
    }

    /// Negotiated removal of an openable body and its buffer. Members go
    /// with their unit; removing one on its own is a no-op.
    pub fn remove(&self, handle: &Handle) -> Result<Option<Arc<ElementBody>>, EvictionRefused> {
        if !handle.kind().is_openable() {
            return Ok(None);
        }
        self.units.remove(handle)
    }

    /// Removes a body, its members and its buffer without negotiation. Used
    /// when the element is known to be gone or its edits are discarded.
    pub fn force_remove(&self, handle: &Handle) -> Option<Arc<ElementBody>> {
        if let Some(buffer) = self.buffers.force_remove(handle) {
            buffer.close();
        }
        let body = if handle.kind().is_openable() {
            self.units.force_remove(handle)
        } else {
            self.members.lock().remove(handle)
        };
        if let Some(body) = &body {
            remove_members(&mut self.members.lock(), &body.children);
        }
        body
    }

    /// Resident openable bodies, least recently used first.
    pub fn iter_resident(&self) -> Vec<(Handle, Arc<ElementBody>)> {
        self.units.iter_resident()
    }

    pub fn buffer(&self, handle: &Handle) -> Option<Arc<Buffer>> {
        self.buffers.get(handle)
    }

    pub fn peek_buffer(&self, handle: &Handle) -> Option<Arc<Buffer>> {
        self.buffers.peek(handle)
    }

    /// Installs `buffer` unless one is already resident for `handle`.
    pub fn install_buffer(&self, handle: Handle, buffer: Arc<Buffer>) -> Arc<Buffer> {
        let never = CancellationToken::new();
        match self.buffers.put_if_absent(handle, buffer.clone(), &never) {
            Ok(resident) => resident,
            Err(Cancelled) => buffer,
        }
    }

    /// Replaces the buffer for `handle`, closing any previous one.
    pub fn replace_buffer(&self, handle: Handle, buffer: Arc<Buffer>) {
        if let Some(previous) = self.buffers.put(handle, buffer) {
            previous.close();
        }
    }

    /// Marks `handle` as being opened. Pinned handles are never evicted.
    pub fn pin(&self, handle: &Handle) -> PinGuard<'_> {
        *self.pins.lock().entry(handle.clone()).or_insert(0) += 1;
        PinGuard {
            store: self,
            handle: handle.clone(),
        }
    }

    pub fn is_pinned(&self, handle: &Handle) -> bool {
        self.pins.lock().contains_key(handle)
    }

    pub fn unit_stats(&self) -> CacheStats {
        self.units.stats()
    }

    pub fn buffer_stats(&self) -> CacheStats {
        self.buffers.stats()
    }

    /// Retries eviction in both caches after earlier overrun.
    pub fn shrink(&self) {
        self.units.shrink();
        self.buffers.shrink();
    }

    fn unpin(&self, handle: &Handle) {
        let mut pins = self.pins.lock();
        if let Some(count) = pins.get_mut(handle) {
            *count -= 1;
            if *count == 0 {
                pins.remove(handle);
            }
        }
    }
}

impl std::fmt::Debug for BodyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyStore")
            .field("units", &self.units.stats())
            .field("buffers", &self.buffers.stats())
            .field("members", &self.members.lock().len())
            .finish()
    }
}

/// Releases a pin taken by [`BodyStore::pin`] when dropped.
pub struct PinGuard<'a> {
    store: &'a BodyStore,
    handle: Handle,
}

impl Drop for PinGuard<'_> {
    fn drop(&mut self) {
        self.store.unpin(&self.handle);
    }
}
