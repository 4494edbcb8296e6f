use std::collections::HashMap;

use parking_lot::Mutex;

use crate::handle::{EditScope, Handle, OwnerId};

/// Use count of a working copy.
///
/// `alive == false` with a non-zero `count` means the copy was destroyed
/// while `count` consumers still believed they held a reference; their late
/// releases are accounted for without resurrecting the copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UseCount {
    pub alive: bool,
    pub count: u32,
}

impl UseCount {
    pub const fn live() -> Self {
        Self {
            alive: true,
            count: 1,
        }
    }

    /// Adds a reference. A closed count stays closed.
    pub fn increment(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    /// Drops a reference. Returns `true` exactly on the live `1 -> 0`
    /// transition.
    pub fn decrement(&mut self) -> bool {
        if self.count == 0 {
            return false;
        }
        self.count -= 1;
        if self.count == 0 && self.alive {
            self.alive = false;
            return true;
        }
        false
    }

    pub fn close(&mut self) {
        self.alive = false;
    }
}

/// How a new working copy is keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sharing {
    /// One copy per (owner, unit), reference counted. For
    /// [`OwnerId::PRIMARY`] this is the unit's primary working copy.
    Shared,
    /// A fresh copy that is never reused by another create.
    Private,
}

#[derive(Debug, Clone)]
pub struct WorkingCopyRecord {
    /// Handle of the working copy itself.
    pub handle: Handle,
    pub uses: UseCount,
    /// Bumped every time the copy is (re)opened, so a late close can tell
    /// its own registration apart from a newer one.
    pub generation: u64,
}

/// Result of [`WorkingCopyRegistry::acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquired {
    /// An existing live record was reused; its count was incremented.
    Reused { handle: Handle, count: u32 },
    /// A destroyed record still has outstanding consumers; the count was
    /// incremented but the copy stays closed.
    Closed { handle: Handle, count: u32 },
    /// No live record existed; the caller must open the copy.
    Registered {
        handle: Handle,
        count: u32,
        generation: u64,
    },
}

/// Result of [`WorkingCopyRegistry::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Released {
    NotRegistered,
    /// Other consumers still hold the copy.
    StillInUse { count: u32 },
    /// A late release on a destroyed copy.
    AlreadyClosed { count: u32 },
    /// The last consumer released the copy; it must be closed now.
    LastUse { generation: u64 },
}

/// Result of [`WorkingCopyRegistry::destroy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destroyed {
    NotRegistered,
    AlreadyClosed,
    /// The copy was live and is now closed; `outstanding` consumers had not
    /// released it yet.
    Closed { outstanding: u32, generation: u64 },
}

#[derive(Debug, Default)]
struct Tables {
    /// Primary working copies keyed by the original unit. A destroyed record
    /// stays here, closed, until its outstanding consumers have released it.
    primary: HashMap<Handle, WorkingCopyRecord>,
    /// Shared working copies keyed by owner, then by original unit.
    shared: HashMap<OwnerId, HashMap<Handle, WorkingCopyRecord>>,
    /// Unshared working copies keyed by their own handle.
    private: HashMap<Handle, WorkingCopyRecord>,
    last_generation: u64,
}

impl Tables {
    fn record(&self, handle: &Handle) -> Option<&WorkingCopyRecord> {
        match handle.own_scope()? {
            EditScope::Primary => self.primary.get(&handle.original()),
            EditScope::Shared(owner) => self.shared.get(&owner)?.get(&handle.original()),
            EditScope::Private { .. } => self.private.get(handle),
        }
    }

    fn record_mut(&mut self, handle: &Handle) -> Option<&mut WorkingCopyRecord> {
        match handle.own_scope()? {
            EditScope::Primary => self.primary.get_mut(&handle.original()),
            EditScope::Shared(owner) => self
                .shared
                .get_mut(&owner)?
                .get_mut(&handle.original()),
            EditScope::Private { .. } => self.private.get_mut(handle),
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.last_generation += 1;
        self.last_generation
    }

    fn insert(&mut self, record: WorkingCopyRecord) {
        let handle = record.handle.clone();
        match handle.own_scope() {
            Some(EditScope::Primary) => {
                self.primary.insert(handle.original(), record);
            }
            Some(EditScope::Shared(owner)) => {
                self.shared
                    .entry(owner)
                    .or_default()
                    .insert(handle.original(), record);
            }
            Some(EditScope::Private { .. }) => {
                self.private.insert(handle, record);
            }
            None => {}
        }
    }

    fn remove(&mut self, handle: &Handle) -> Option<WorkingCopyRecord> {
        match handle.own_scope()? {
            EditScope::Primary => self.primary.remove(&handle.original()),
            EditScope::Shared(owner) => {
                let per_owner = self.shared.get_mut(&owner)?;
                let record = per_owner.remove(&handle.original());
                if per_owner.is_empty() {
                    self.shared.remove(&owner);
                }
                record
            }
            EditScope::Private { .. } => self.private.remove(handle),
        }
    }
}

/// Tracks live working copies and their use counts.
///
/// All counting mutations are serialized by a single registry lock.
#[derive(Debug, Default)]
pub struct WorkingCopyRegistry {
    tables: Mutex<Tables>,
}

impl WorkingCopyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live record for `handle`, if any.
    pub fn lookup(&self, handle: &Handle) -> Option<WorkingCopyRecord> {
        self.tables
            .lock()
            .record(handle)
            .filter(|record| record.uses.alive)
            .cloned()
    }

    /// Record for `handle` regardless of liveness.
    pub fn record(&self, handle: &Handle) -> Option<WorkingCopyRecord> {
        self.tables.lock().record(handle).cloned()
    }

    pub fn is_live(&self, handle: &Handle) -> bool {
        self.lookup(handle).is_some()
    }

    /// Adds a reference to `handle`, registering it with count 1 when no
    /// record exists.
    ///
    /// A closed record with outstanding consumers is only incremented unless
    /// `revive_closed` is set, in which case it becomes live again and keeps
    /// counting the outstanding consumers.
    pub fn acquire(&self, handle: &Handle, revive_closed: bool) -> Acquired {
        let mut tables = self.tables.lock();
        let generation = tables.next_generation();
        if let Some(record) = tables.record_mut(handle) {
            record.uses.increment();
            let count = record.uses.count;
            let handle = record.handle.clone();
            if record.uses.alive {
                return Acquired::Reused { handle, count };
            }
            if !revive_closed {
                return Acquired::Closed { handle, count };
            }
            record.uses.alive = true;
            record.generation = generation;
            return Acquired::Registered {
                handle,
                count,
                generation,
            };
        }
        tables.insert(WorkingCopyRecord {
            handle: handle.clone(),
            uses: UseCount::live(),
            generation,
        });
        Acquired::Registered {
            handle: handle.clone(),
            count: 1,
            generation,
        }
    }

    /// Undoes an [`Acquired::Registered`] whose copy could not be opened.
    pub fn abandon(&self, handle: &Handle) {
        let mut tables = self.tables.lock();
        let Some(record) = tables.record_mut(handle) else {
            return;
        };
        record.uses.close();
        record.uses.count = record.uses.count.saturating_sub(1);
        if record.uses.count == 0 {
            tables.remove(handle);
        }
    }

    /// Drops a reference to `handle`. The record leaves the registry once no
    /// consumer holds it.
    pub fn release(&self, handle: &Handle) -> Released {
        let mut tables = self.tables.lock();
        let Some(record) = tables.record_mut(handle) else {
            return Released::NotRegistered;
        };
        let was_alive = record.uses.alive;
        let last = record.uses.decrement();
        let count = record.uses.count;
        let generation = record.generation;
        if last {
            tables.remove(handle);
            return Released::LastUse { generation };
        }
        if !was_alive {
            if count == 0 {
                tables.remove(handle);
            }
            return Released::AlreadyClosed { count };
        }
        Released::StillInUse { count }
    }

    /// Closes `handle` regardless of its count. Shared and private records
    /// are dropped immediately; a primary record is kept, closed, so late
    /// releases can be accounted for.
    pub fn destroy(&self, handle: &Handle) -> Destroyed {
        let mut tables = self.tables.lock();
        let Some(record) = tables.record_mut(handle) else {
            return Destroyed::NotRegistered;
        };
        if !record.uses.alive {
            return Destroyed::AlreadyClosed;
        }
        record.uses.close();
        let outstanding = record.uses.count;
        let generation = record.generation;
        let primary = matches!(handle.own_scope(), Some(EditScope::Primary));
        if !primary || outstanding == 0 {
            tables.remove(handle);
        }
        Destroyed::Closed {
            outstanding,
            generation,
        }
    }

    /// Runs `close` under the registry lock unless `handle` has been opened
    /// again since `generation` ended. Returns whether `close` ran.
    ///
    /// Closing under the lock keeps a concurrent re-registration from
    /// installing its body before the old one is torn down.
    pub fn retire(&self, handle: &Handle, generation: u64, close: impl FnOnce()) -> bool {
        let tables = self.tables.lock();
        let current = match tables.record(handle) {
            None => true,
            Some(record) => record.generation == generation && !record.uses.alive,
        };
        if current {
            close();
        }
        current
    }

    /// Drops the shared record of `original` for `owner`, whatever its count.
    pub fn remove_shared(&self, original: &Handle, owner: OwnerId) -> Option<WorkingCopyRecord> {
        let handle = Handle::working_copy(original, EditScope::Shared(owner));
        let mut tables = self.tables.lock();
        tables.remove(&handle)
    }

    /// Live working copies belonging to `owner`.
    pub fn working_copies(&self, owner: OwnerId) -> Vec<Handle> {
        let tables = self.tables.lock();
        let mut out: Vec<Handle> = Vec::new();
        if owner.is_primary() {
            out.extend(
                tables
                    .primary
                    .values()
                    .filter(|record| record.uses.alive)
                    .map(|record| record.handle.clone()),
            );
        }
        if let Some(shared) = tables.shared.get(&owner) {
            out.extend(
                shared
                    .values()
                    .filter(|record| record.uses.alive)
                    .map(|record| record.handle.clone()),
            );
        }
        out.extend(
            tables
                .private
                .values()
                .filter(|record| {
                    record.uses.alive
                        && record.handle.own_scope().map(EditScope::owner) == Some(owner)
                })
                .map(|record| record.handle.clone()),
        );
        out.sort_by_cached_key(|handle| handle.to_string());
        out
    }
}
