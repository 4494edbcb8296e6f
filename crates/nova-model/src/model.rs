use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use nova_memory::{CacheStats, CancellationToken};
use parking_lot::Mutex;
use smol_str::SmolStr;

use crate::body::{ElementBody, OpenedUnit};
use crate::buffer::Buffer;
use crate::delta::{DeltaFlags, ElementDelta};
use crate::emitter::{DeltaEmitter, ListenerId};
use crate::error::{ModelError, ParseError, Result};
use crate::front_end::{CompilerFrontEnd, UnitContents};
use crate::handle::{EditScope, ElementKind, Handle, OwnerId};
use crate::resource::{ResourceEntry, ResourceLayer, ResourcePath};
use crate::store::{BodyStore, StoreConfig};
use crate::working_copy::{Acquired, Destroyed, Released, Sharing, UseCount, WorkingCopyRegistry};

/// The element model of one workspace session.
///
/// Owns the body store, the working-copy registry and the delta emitter, and
/// talks to the compiler front end and resource layer through the
/// collaborator traits. Every mutating operation publishes at most one delta
/// tree, when its outermost call returns.
pub struct ElementModel {
    store: BodyStore,
    registry: WorkingCopyRegistry,
    emitter: DeltaEmitter,
    front_end: Arc<dyn CompilerFrontEnd>,
    resources: Arc<dyn ResourceLayer>,
    roots: Vec<Handle>,
    encoding: String,
    next_owner: AtomicU32,
    next_session: AtomicU64,
    /// Serializes structural edits so validation and mutation see the same
    /// state.
    structure: Mutex<()>,
}

impl ElementModel {
    pub fn new<R>(
        config: &StoreConfig,
        front_end: Arc<dyn CompilerFrontEnd>,
        resources: Arc<dyn ResourceLayer>,
        roots: impl IntoIterator<Item = R>,
    ) -> Self
    where
        R: Into<SmolStr>,
    {
        let roots = roots.into_iter().map(Handle::root).collect();
        Self {
            store: BodyStore::new(config),
            registry: WorkingCopyRegistry::new(),
            emitter: DeltaEmitter::new(),
            front_end,
            resources,
            roots,
            encoding: config.encoding.clone(),
            next_owner: AtomicU32::new(1),
            next_session: AtomicU64::new(1),
            structure: Mutex::new(()),
        }
    }

    /// Allocates a new owner for shared working copies.
    pub fn new_owner(&self) -> OwnerId {
        OwnerId::from_raw(self.next_owner.fetch_add(1, Ordering::Relaxed))
    }

    pub fn roots(&self) -> &[Handle] {
        &self.roots
    }

    // --- listeners -------------------------------------------------------

    pub fn register_listener(
        &self,
        listener: impl Fn(&ElementDelta) + Send + Sync + 'static,
    ) -> ListenerId {
        self.emitter.register_listener(Arc::new(listener))
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.emitter.unregister_listener(id)
    }

    /// Runs `f` as one operation: deltas recorded by nested operations are
    /// published as a single tree once `f` returns, whether or not it
    /// succeeded.
    pub fn run<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let _op = self.emitter.begin();
        f(self)
    }

    // --- opening ---------------------------------------------------------

    /// Body of an openable element, opening it on a cache miss.
    pub fn open_unit(&self, handle: &Handle) -> Result<Arc<ElementBody>> {
        self.open_unit_cancellable(handle, &CancellationToken::new())
    }

    /// Like [`ElementModel::open_unit`]. A cancelled open leaves the store as
    /// if it had never been attempted.
    pub fn open_unit_cancellable(
        &self,
        handle: &Handle,
        cancel: &CancellationToken,
    ) -> Result<Arc<ElementBody>> {
        if !handle.kind().is_openable() {
            return Err(ModelError::invalid_state(handle, "element is not openable"));
        }
        if let Some(body) = self.store.get(handle) {
            return Ok(body);
        }
        if handle.is_working_copy() && !self.registry.is_live(handle) {
            return Err(ModelError::invalid_state(handle, "working copy is closed"));
        }
        if cancel.is_cancelled() {
            return Err(ModelError::Cancelled);
        }

        let _pin = self.store.pin(handle);
        if handle.kind() == ElementKind::CompilationUnit {
            return self.open_compilation_unit(handle, cancel);
        }
        let body = Arc::new(self.container_body(handle)?);
        let (resident, _) = self
            .store
            .install_opened(handle.clone(), body, Vec::new(), cancel)?;
        Ok(resident)
    }

    /// Body of any element. Members are materialized by opening their unit.
    pub fn element_body(&self, handle: &Handle) -> Result<Arc<ElementBody>> {
        if handle.kind().is_openable() {
            return self.open_unit(handle);
        }
        if let Some(body) = self.store.get(handle) {
            return Ok(body);
        }
        let unit = handle
            .enclosing_unit()
            .ok_or_else(|| ModelError::invalid_state(handle, "member outside a compilation unit"))?;
        self.open_unit(&unit)?;
        self.store
            .get(handle)
            .ok_or_else(|| ModelError::invalid_state(handle, "element does not exist"))
    }

    /// Editing buffer of a compilation unit, loading it from the resource
    /// layer when needed.
    pub fn buffer(&self, unit: &Handle) -> Result<Arc<Buffer>> {
        if let Some(buffer) = self.store.buffer(unit) {
            return Ok(buffer);
        }
        if unit.kind() != ElementKind::CompilationUnit {
            return Err(ModelError::invalid_state(unit, "only compilation units have buffers"));
        }
        if unit.is_working_copy() {
            return Err(ModelError::invalid_state(unit, "working copy is closed"));
        }
        let path = self.resource_path(unit)?;
        let text = self.read_text(unit, &path)?;
        let buffer = Arc::new(Buffer::new(unit.clone(), text));
        Ok(self.store.install_buffer(unit.clone(), buffer))
    }

    /// Closes an openable element's body and buffer. Fails when the buffer
    /// still has unsaved changes or the element is in use.
    ///
    /// Members are closed with their unit and cannot be closed on their own.
    pub fn close_unit(&self, handle: &Handle) -> Result<()> {
        if !handle.kind().is_openable() {
            return Err(ModelError::invalid_state(
                handle,
                "members are closed with their compilation unit",
            ));
        }
        if handle.is_working_copy() {
            return Err(ModelError::invalid_state(
                handle,
                "working copies are closed by discarding them",
            ));
        }
        match self.store.remove(handle) {
            Ok(_) => Ok(()),
            Err(refused) => Err(ModelError::invalid_state(
                handle,
                format!("cannot close: {refused}"),
            )),
        }
    }

    fn open_compilation_unit(
        &self,
        unit: &Handle,
        cancel: &CancellationToken,
    ) -> Result<Arc<ElementBody>> {
        let (contents, fresh_buffer) = match self.store.buffer(unit) {
            Some(buffer) => (
                UnitContents {
                    text: buffer.text(),
                    from_buffer: true,
                },
                None,
            ),
            None => {
                let path = self.resource_path(unit)?;
                let text = self.read_text(unit, &path)?;
                let buffer = Arc::new(Buffer::new(unit.clone(), text.clone()));
                (
                    UnitContents {
                        text,
                        from_buffer: false,
                    },
                    Some(buffer),
                )
            }
        };

        let OpenedUnit { body, members } = self.parse(unit, &contents, cancel)?;
        let (resident, installed) =
            self.store
                .install_opened(unit.clone(), Arc::new(body), members, cancel)?;
        if installed {
            tracing::trace!(target = "nova.model", unit = %unit, "opened compilation unit");
            if let Some(buffer) = fresh_buffer {
                self.store.install_buffer(unit.clone(), buffer);
            }
        }
        Ok(resident)
    }

    fn parse(
        &self,
        unit: &Handle,
        contents: &UnitContents,
        cancel: &CancellationToken,
    ) -> Result<OpenedUnit> {
        let opened = self
            .front_end
            .open(unit, contents, cancel)
            .map_err(|err| self.open_failed(unit, err))?;
        if cancel.is_cancelled() {
            return Err(ModelError::Cancelled);
        }
        Ok(opened)
    }

    fn container_body(&self, handle: &Handle) -> Result<ElementBody> {
        let children = match handle.kind() {
            ElementKind::Model => self.roots.clone(),
            ElementKind::Root => {
                let path = self.resource_path(handle)?;
                let mut packages = Vec::new();
                self.collect_packages(&path, "", &mut packages)
                    .map_err(|err| ModelError::io(&path, err))?;
                packages.sort();
                packages
                    .into_iter()
                    .map(|name| Handle::package(handle, name))
                    .collect()
            }
            ElementKind::Package => {
                let path = self.resource_path(handle)?;
                let mut entries = self
                    .list_or_empty(&path)
                    .map_err(|err| ModelError::io(&path, err))?;
                entries.sort();
                entries
                    .into_iter()
                    .filter(|entry| !entry.is_dir)
                    .map(|entry| Handle::unit(handle, entry.name))
                    .collect()
            }
            _ => return Err(ModelError::invalid_state(handle, "not a container")),
        };
        Ok(ElementBody::container(children))
    }

    /// Folders holding at least one file are packages; files directly below
    /// the root belong to the default package.
    fn collect_packages(
        &self,
        dir: &ResourcePath,
        package: &str,
        out: &mut Vec<String>,
    ) -> io::Result<()> {
        let entries = self.list_or_empty(dir)?;
        if entries.iter().any(|entry| !entry.is_dir) {
            out.push(package.to_owned());
        }
        for entry in entries.iter().filter(|entry| entry.is_dir) {
            let nested = if package.is_empty() {
                entry.name.clone()
            } else {
                format!("{package}.{}", entry.name)
            };
            self.collect_packages(&dir.join(&entry.name), &nested, out)?;
        }
        Ok(())
    }

    fn list_or_empty(&self, dir: &ResourcePath) -> io::Result<Vec<ResourceEntry>> {
        match self.resources.list(dir) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            other => other,
        }
    }

    fn resource_path(&self, handle: &Handle) -> Result<ResourcePath> {
        ResourcePath::for_handle(handle)
            .ok_or_else(|| ModelError::invalid_state(handle, "element has no resource"))
    }

    fn resource_exists(&self, handle: &Handle) -> bool {
        ResourcePath::for_handle(handle).is_some_and(|path| self.resources.is_accessible(&path))
    }

    fn read_text(&self, handle: &Handle, path: &ResourcePath) -> Result<Arc<str>> {
        let bytes = self
            .resources
            .read_bytes(path, &self.encoding)
            .map_err(|err| self.open_failed(handle, ParseError::Io(err)))?;
        match String::from_utf8(bytes) {
            Ok(text) => Ok(text.into()),
            Err(_) => Err(self.open_failed(
                handle,
                ParseError::Encoding {
                    encoding: self.encoding.clone(),
                },
            )),
        }
    }

    fn open_failed(&self, handle: &Handle, err: ParseError) -> ModelError {
        tracing::debug!(
            target = "nova.model",
            handle = %handle,
            error = %err,
            "failed to open element"
        );
        ModelError::open_failure(handle, err)
    }

    // --- working copies --------------------------------------------------

    /// Creates (or, for shared copies, reuses) a working copy of `original`.
    ///
    /// The copy starts from the original's current contents: its buffer when
    /// one is resident (unsaved edits included), otherwise its resource, or
    /// empty when the resource does not exist yet.
    pub fn create_working_copy(
        &self,
        original: &Handle,
        owner: OwnerId,
        sharing: Sharing,
    ) -> Result<Handle> {
        self.create_working_copy_cancellable(original, owner, sharing, &CancellationToken::new())
    }

    pub fn create_working_copy_cancellable(
        &self,
        original: &Handle,
        owner: OwnerId,
        sharing: Sharing,
        cancel: &CancellationToken,
    ) -> Result<Handle> {
        if original.kind() != ElementKind::CompilationUnit || original.is_working_copy() {
            return Err(ModelError::invalid_state(
                original,
                "working copies are created from original compilation units",
            ));
        }
        let scope = match sharing {
            Sharing::Shared if owner.is_primary() => EditScope::Primary,
            Sharing::Shared => EditScope::Shared(owner),
            Sharing::Private => EditScope::Private {
                owner,
                session: self.next_session.fetch_add(1, Ordering::Relaxed),
            },
        };
        let copy = Handle::working_copy(original, scope);

        let _op = self.emitter.begin();
        self.acquire_working_copy(&copy, true, cancel)?;
        Ok(copy)
    }

    /// Adds a use to an existing working copy handle, opening it afresh when
    /// it is not live.
    ///
    /// A copy destroyed while consumers still held it stays closed; the use
    /// is counted so the consumer's later discard balances.
    pub fn become_working_copy(&self, copy: &Handle) -> Result<()> {
        if copy.kind() != ElementKind::CompilationUnit || !copy.is_working_copy() {
            return Err(ModelError::invalid_state(copy, "not a working copy handle"));
        }
        let _op = self.emitter.begin();
        self.acquire_working_copy(copy, false, &CancellationToken::new())
    }

    fn acquire_working_copy(
        &self,
        copy: &Handle,
        revive_closed: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match self.registry.acquire(copy, revive_closed) {
            Acquired::Reused { count, .. } => {
                tracing::trace!(target = "nova.model", copy = %copy, count, "reusing working copy");
                Ok(())
            }
            Acquired::Closed { count, .. } => {
                tracing::debug!(
                    target = "nova.model",
                    copy = %copy,
                    count,
                    "use recorded on a destroyed working copy"
                );
                Ok(())
            }
            Acquired::Registered {
                count, generation, ..
            } => {
                if let Err(err) = self.open_working_copy(copy, cancel) {
                    self.registry.abandon(copy);
                    self.registry.retire(copy, generation, || {
                        self.store.force_remove(copy);
                    });
                    return Err(err);
                }
                tracing::debug!(target = "nova.model", copy = %copy, count, "opened working copy");
                self.emitter.add_delta(self.working_copy_opened_delta(copy));
                Ok(())
            }
        }
    }

    fn open_working_copy(&self, copy: &Handle, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ModelError::Cancelled);
        }
        let original = copy.original();
        let _pin = self.store.pin(copy);

        let (text, unsaved) = match self.store.peek_buffer(&original) {
            Some(buffer) => {
                let snapshot = buffer.snapshot();
                (snapshot.text, snapshot.has_unsaved_changes)
            }
            None => {
                let path = self.resource_path(&original)?;
                if self.resources.is_accessible(&path) {
                    (self.read_text(copy, &path)?, false)
                } else {
                    (Arc::from(""), true)
                }
            }
        };
        let buffer = if unsaved {
            Buffer::new_unsaved(copy.clone(), text.clone())
        } else {
            Buffer::new(copy.clone(), text.clone())
        };
        buffer.set_retained(true);

        let contents = UnitContents {
            text,
            from_buffer: true,
        };
        let OpenedUnit { body, members } = self.parse(copy, &contents, cancel)?;
        // The registration owns this key; anything resident is left over
        // from a close that has not reached the store yet.
        self.store.replace_opened(copy.clone(), Arc::new(body), members);
        self.store.replace_buffer(copy.clone(), Arc::new(buffer));
        Ok(())
    }

    /// Drops one use of `copy`. The last use closes it and publishes its
    /// removal. Returns `true` when this call closed the copy.
    ///
    /// Discarding a handle that is not registered is a no-op.
    pub fn discard_working_copy(&self, copy: &Handle) -> bool {
        let _op = self.emitter.begin();
        match self.registry.release(copy) {
            Released::NotRegistered => {
                tracing::trace!(target = "nova.model", copy = %copy, "discard of unknown working copy");
                false
            }
            Released::StillInUse { count } | Released::AlreadyClosed { count } => {
                tracing::trace!(target = "nova.model", copy = %copy, count, "working copy still in use");
                false
            }
            Released::LastUse { generation } => {
                self.close_working_copy(copy, generation);
                true
            }
        }
    }

    /// Closes `copy` regardless of its use count. A second destroy is a
    /// no-op. Returns `true` when this call closed the copy.
    pub fn destroy_working_copy(&self, copy: &Handle) -> bool {
        let _op = self.emitter.begin();
        match self.registry.destroy(copy) {
            Destroyed::NotRegistered | Destroyed::AlreadyClosed => false,
            Destroyed::Closed {
                outstanding,
                generation,
            } => {
                tracing::debug!(
                    target = "nova.model",
                    copy = %copy,
                    outstanding,
                    "destroying working copy"
                );
                self.close_working_copy(copy, generation);
                let original = copy.original();
                if !self.resource_exists(&original) {
                    // Nothing can reach the original's cached body any more.
                    self.store.force_remove(&original);
                }
                true
            }
        }
    }

    /// Removes the shared working copy of `original` for `owner` whatever its
    /// use count. Returns `false` when there was none.
    pub fn remove_shared_working_copy(&self, original: &Handle, owner: OwnerId) -> bool {
        let _op = self.emitter.begin();
        let Some(record) = self.registry.remove_shared(&original.original(), owner) else {
            return false;
        };
        if record.uses.alive {
            self.close_working_copy(&record.handle, record.generation);
        }
        true
    }

    /// Destroys every live working copy of `owner`. Returns how many were
    /// closed.
    pub fn shutdown(&self, owner: OwnerId) -> usize {
        let _op = self.emitter.begin();
        self.registry
            .working_copies(owner)
            .iter()
            .filter(|copy| self.destroy_working_copy(copy))
            .count()
    }

    fn close_working_copy(&self, copy: &Handle, generation: u64) {
        let retired = self.registry.retire(copy, generation, || {
            self.store.force_remove(copy);
        });
        if !retired {
            tracing::debug!(
                target = "nova.model",
                copy = %copy,
                "working copy reopened before close; keeping its body"
            );
        }
        self.emitter.add_delta(self.working_copy_closed_delta(copy));
    }

    fn working_copy_opened_delta(&self, copy: &Handle) -> ElementDelta {
        match copy.own_scope() {
            Some(EditScope::Primary) => {
                let original = copy.original();
                if self.resource_exists(&original) {
                    ElementDelta::changed(original, DeltaFlags::PRIMARY_WORKING_COPY)
                } else {
                    ElementDelta::added(original).with_flags(DeltaFlags::PRIMARY_WORKING_COPY)
                }
            }
            _ => ElementDelta::added(copy.clone()),
        }
    }

    fn working_copy_closed_delta(&self, copy: &Handle) -> ElementDelta {
        match copy.own_scope() {
            Some(EditScope::Primary) => {
                let original = copy.original();
                if self.resource_exists(&original) {
                    ElementDelta::changed(original, DeltaFlags::PRIMARY_WORKING_COPY)
                } else {
                    ElementDelta::removed(original).with_flags(DeltaFlags::PRIMARY_WORKING_COPY)
                }
            }
            _ => ElementDelta::removed(copy.clone()),
        }
    }

    /// Re-parses a working copy from its buffer and publishes the change.
    pub fn reconcile(&self, copy: &Handle) -> Result<Arc<ElementBody>> {
        self.reconcile_cancellable(copy, &CancellationToken::new())
    }

    pub fn reconcile_cancellable(
        &self,
        copy: &Handle,
        cancel: &CancellationToken,
    ) -> Result<Arc<ElementBody>> {
        if !self.registry.is_live(copy) {
            return Err(ModelError::invalid_state(copy, "not a live working copy"));
        }
        let buffer = self
            .store
            .peek_buffer(copy)
            .ok_or_else(|| ModelError::invalid_state(copy, "working copy has no buffer"))?;
        let _op = self.emitter.begin();
        let _pin = self.store.pin(copy);

        let contents = UnitContents {
            text: buffer.text(),
            from_buffer: true,
        };
        let OpenedUnit { body, members } = self.parse(copy, &contents, cancel)?;
        let previous = self.store.peek(copy);
        let mut flags = DeltaFlags::CONTENT | DeltaFlags::RECONCILED;
        if previous.as_ref().map(|previous| &previous.children) != Some(&body.children) {
            flags |= DeltaFlags::CHILDREN;
        }
        let body = Arc::new(body);
        self.store.replace_opened(copy.clone(), body.clone(), members);
        self.emitter.add_delta(ElementDelta::changed(copy.clone(), flags));
        Ok(body)
    }

    /// Writes a working copy's buffer to the original's resource.
    ///
    /// The original's cached body and buffer are dropped since they no longer
    /// match the resource.
    pub fn commit_working_copy(&self, copy: &Handle) -> Result<()> {
        if !self.registry.is_live(copy) {
            return Err(ModelError::invalid_state(copy, "not a live working copy"));
        }
        let buffer = self
            .store
            .peek_buffer(copy)
            .ok_or_else(|| ModelError::invalid_state(copy, "working copy has no buffer"))?;
        let original = copy.original();
        let path = self.resource_path(&original)?;

        let _op = self.emitter.begin();
        let existed = self.resources.is_accessible(&path);
        let package_existed = existed || self.package_has_units(&original)?;
        let snapshot = buffer.snapshot();
        self.resources
            .write_bytes(&path, snapshot.text.as_bytes())
            .map_err(|err| ModelError::io(&path, err))?;
        if buffer.version() == snapshot.version {
            buffer.mark_saved();
        }
        self.store.force_remove(&original);

        if existed {
            self.emitter.add_delta(ElementDelta::changed(
                original,
                DeltaFlags::CONTENT | DeltaFlags::PRIMARY_RESOURCE,
            ));
        } else {
            self.unit_added(&original, package_existed);
        }
        Ok(())
    }

    // --- structural edits ------------------------------------------------

    /// Creates a compilation unit named `name` in `package`.
    pub fn create_unit(&self, package: &Handle, name: &str, contents: &str) -> Result<Handle> {
        if package.kind() != ElementKind::Package || package.scope().is_some() {
            return Err(ModelError::invalid_state(package, "units are created in packages"));
        }
        if name.is_empty() {
            return Err(ModelError::invalid_state(package, "unit name is empty"));
        }
        let unit = Handle::unit(package, name);
        let path = self.resource_path(&unit)?;

        let _op = self.emitter.begin();
        let _structure = self.structure.lock();
        let siblings = self.open_unit(package)?;
        if siblings.has_child_named(name) || self.resources.is_accessible(&path) {
            return Err(ModelError::NameCollision {
                parent: package.clone(),
                name: name.to_owned(),
            });
        }
        let package_existed = self.package_has_units(&unit)?;
        self.resources
            .write_bytes(&path, contents.as_bytes())
            .map_err(|err| ModelError::io(&path, err))?;
        self.unit_added(&unit, package_existed);
        Ok(unit)
    }

    /// Renames a compilation unit within its package.
    pub fn rename_unit(&self, unit: &Handle, new_name: &str) -> Result<Handle> {
        self.check_editable_unit(unit)?;
        if new_name.is_empty() {
            return Err(ModelError::invalid_state(unit, "unit name is empty"));
        }
        if new_name == unit.name() {
            return Ok(unit.clone());
        }
        let package = unit
            .parent()
            .cloned()
            .ok_or_else(|| ModelError::invalid_state(unit, "unit has no package"))?;
        let renamed = Handle::unit(&package, new_name);
        let from = self.resource_path(unit)?;
        let to = self.resource_path(&renamed)?;

        let _op = self.emitter.begin();
        let _structure = self.structure.lock();
        if !self.resources.is_accessible(&from) {
            return Err(ModelError::invalid_state(unit, "unit does not exist"));
        }
        let siblings = self.open_unit(&package)?;
        if siblings.has_child_named(new_name) || self.resources.is_accessible(&to) {
            return Err(ModelError::NameCollision {
                parent: package,
                name: new_name.to_owned(),
            });
        }
        self.check_no_unsaved_changes(unit)?;

        let bytes = self
            .resources
            .read_bytes(&from, &self.encoding)
            .map_err(|err| ModelError::io(&from, err))?;
        self.resources
            .write_bytes(&to, &bytes)
            .map_err(|err| ModelError::io(&to, err))?;
        if let Err(err) = self.resources.delete(&from) {
            if let Err(cleanup) = self.resources.delete(&to) {
                tracing::warn!(
                    target = "nova.model",
                    path = %to,
                    error = %cleanup,
                    "failed to roll back rename target"
                );
            }
            return Err(ModelError::io(&from, err));
        }

        self.store.force_remove(unit);
        self.remove_from_parent(unit);
        self.add_to_parent(&renamed);
        self.emitter.add_delta(
            ElementDelta::removed(unit.clone()).with_moved_to(renamed.clone()),
        );
        self.emitter
            .add_delta(ElementDelta::added(renamed.clone()).with_moved_from(unit.clone()));
        Ok(renamed)
    }

    /// Deletes a compilation unit's resource. Live working copies of the unit
    /// stay open; closing them later reports the unit as gone.
    pub fn delete_unit(&self, unit: &Handle) -> Result<()> {
        self.check_editable_unit(unit)?;
        let path = self.resource_path(unit)?;

        let _op = self.emitter.begin();
        let _structure = self.structure.lock();
        if !self.resources.is_accessible(&path) {
            return Err(ModelError::invalid_state(unit, "unit does not exist"));
        }
        self.check_no_unsaved_changes(unit)?;
        self.resources
            .delete(&path)
            .map_err(|err| ModelError::io(&path, err))?;

        self.store.force_remove(unit);
        self.unit_removed(unit);
        Ok(())
    }

    fn check_editable_unit(&self, unit: &Handle) -> Result<()> {
        if unit.kind() != ElementKind::CompilationUnit || unit.is_working_copy() {
            return Err(ModelError::invalid_state(unit, "not an original compilation unit"));
        }
        Ok(())
    }

    fn check_no_unsaved_changes(&self, unit: &Handle) -> Result<()> {
        match self.store.peek_buffer(unit) {
            Some(buffer) if buffer.has_unsaved_changes() => Err(ModelError::invalid_state(
                unit,
                "buffer has unsaved changes",
            )),
            _ => Ok(()),
        }
    }

    /// Whether the package holding `unit` lists any unit on disk. Packages
    /// only exist while they do.
    fn package_has_units(&self, unit: &Handle) -> Result<bool> {
        let Some(package) = unit.parent() else {
            return Ok(true);
        };
        let path = self.resource_path(package)?;
        let entries = self
            .list_or_empty(&path)
            .map_err(|err| ModelError::io(&path, err))?;
        Ok(entries.iter().any(|entry| !entry.is_dir))
    }

    /// Patches cached containers and records the addition of `unit`. A
    /// package that did not exist before is reported as added itself.
    fn unit_added(&self, unit: &Handle, package_existed: bool) {
        if let Some(package) = unit.parent().filter(|_| !package_existed) {
            self.add_to_parent(package);
            self.emitter.add_delta(ElementDelta::added(package.clone()));
        }
        self.add_to_parent(unit);
        self.emitter.add_delta(ElementDelta::added(unit.clone()));
    }

    /// Counterpart of [`ElementModel::unit_added`] once `unit`'s resource is
    /// gone. A package left without units disappears from its root.
    fn unit_removed(&self, unit: &Handle) {
        self.remove_from_parent(unit);
        self.emitter.add_delta(ElementDelta::removed(unit.clone()));

        let Some(package) = unit.parent() else {
            return;
        };
        match self.package_has_units(unit) {
            Ok(true) => {}
            Ok(false) => {
                self.store.force_remove(package);
                self.remove_from_parent(package);
                self.emitter.add_delta(ElementDelta::removed(package.clone()));
            }
            Err(err) => {
                tracing::warn!(
                    target = "nova.model",
                    package = %package,
                    error = %err,
                    "failed to list package after removing a unit"
                );
            }
        }
    }

    fn add_to_parent(&self, child: &Handle) {
        let Some(parent) = child.parent() else {
            return;
        };
        if let Some(body) = self.store.peek(parent) {
            self.store
                .put(parent.clone(), Arc::new(body.with_child(child.clone())));
        }
    }

    fn remove_from_parent(&self, child: &Handle) {
        let Some(parent) = child.parent() else {
            return;
        };
        if let Some(body) = self.store.peek(parent) {
            self.store
                .put(parent.clone(), Arc::new(body.without_child(child)));
        }
    }

    // --- queries ---------------------------------------------------------

    pub fn is_working_copy(&self, handle: &Handle) -> bool {
        handle.is_working_copy() && self.registry.is_live(handle)
    }

    /// Use count of `copy`, including destroyed copies that still have
    /// outstanding consumers.
    pub fn use_count(&self, copy: &Handle) -> Option<UseCount> {
        self.registry.record(copy).map(|record| record.uses)
    }

    /// Live working copies of `owner`.
    pub fn working_copies(&self, owner: OwnerId) -> Vec<Handle> {
        self.registry.working_copies(owner)
    }

    /// Whether a body for `handle` is resident, without opening it.
    pub fn is_open(&self, handle: &Handle) -> bool {
        self.store.contains(handle)
    }

    /// Resident openable bodies, least recently used first.
    pub fn iter_resident(&self) -> Vec<(Handle, Arc<ElementBody>)> {
        self.store.iter_resident()
    }

    pub fn unit_stats(&self) -> CacheStats {
        self.store.unit_stats()
    }

    pub fn buffer_stats(&self) -> CacheStats {
        self.store.buffer_stats()
    }

    /// Retries eviction in both caches, e.g. after unsaved buffers were
    /// saved.
    pub fn shrink(&self) {
        self.store.shrink();
    }
}

impl std::fmt::Debug for ElementModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementModel")
            .field("roots", &self.roots)
            .field("store", &self.store)
            .field("emitter", &self.emitter)
            .finish_non_exhaustive()
    }
}
