use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::handle::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    Added,
    Removed,
    Changed,
}

/// Detail bits attached to a delta node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DeltaFlags(u32);

impl DeltaFlags {
    pub const NONE: DeltaFlags = DeltaFlags(0);
    /// The element's contents changed.
    pub const CONTENT: DeltaFlags = DeltaFlags(1 << 0);
    /// Children were added, removed or changed.
    pub const CHILDREN: DeltaFlags = DeltaFlags(1 << 1);
    /// The element became, or stopped being, a primary working copy.
    pub const PRIMARY_WORKING_COPY: DeltaFlags = DeltaFlags(1 << 2);
    /// The element was moved here from [`ElementDelta::moved_from`].
    pub const MOVED_FROM: DeltaFlags = DeltaFlags(1 << 3);
    /// The element was moved to [`ElementDelta::moved_to`].
    pub const MOVED_TO: DeltaFlags = DeltaFlags(1 << 4);
    /// The resource backing the element changed.
    pub const PRIMARY_RESOURCE: DeltaFlags = DeltaFlags(1 << 5);
    /// The element was re-parsed from its buffer.
    pub const RECONCILED: DeltaFlags = DeltaFlags(1 << 6);

    const NAMES: [(DeltaFlags, &'static str); 7] = [
        (Self::CONTENT, "CONTENT"),
        (Self::CHILDREN, "CHILDREN"),
        (Self::PRIMARY_WORKING_COPY, "PRIMARY_WORKING_COPY"),
        (Self::MOVED_FROM, "MOVED_FROM"),
        (Self::MOVED_TO, "MOVED_TO"),
        (Self::PRIMARY_RESOURCE, "PRIMARY_RESOURCE"),
        (Self::RECONCILED, "RECONCILED"),
    ];

    pub const fn contains(self, other: DeltaFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for DeltaFlags {
    type Output = DeltaFlags;

    fn bitor(self, rhs: Self) -> Self {
        DeltaFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for DeltaFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for DeltaFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// One node of a structural change tree.
///
/// Trees mirror the handle hierarchy: a published tree is rooted at
/// [`Handle::model`] and every intermediate node is a `Changed` delta with the
/// [`DeltaFlags::CHILDREN`] flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementDelta {
    pub handle: Handle,
    pub kind: DeltaKind,
    pub flags: DeltaFlags,
    pub moved_from: Option<Handle>,
    pub moved_to: Option<Handle>,
    pub children: Vec<ElementDelta>,
}

impl ElementDelta {
    pub fn new(handle: Handle, kind: DeltaKind, flags: DeltaFlags) -> Self {
        Self {
            handle,
            kind,
            flags,
            moved_from: None,
            moved_to: None,
            children: Vec::new(),
        }
    }

    pub fn added(handle: Handle) -> Self {
        Self::new(handle, DeltaKind::Added, DeltaFlags::NONE)
    }

    pub fn removed(handle: Handle) -> Self {
        Self::new(handle, DeltaKind::Removed, DeltaFlags::NONE)
    }

    pub fn changed(handle: Handle, flags: DeltaFlags) -> Self {
        Self::new(handle, DeltaKind::Changed, flags)
    }

    pub fn with_flags(mut self, flags: DeltaFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_moved_from(mut self, from: Handle) -> Self {
        self.flags |= DeltaFlags::MOVED_FROM;
        self.moved_from = Some(from);
        self
    }

    pub fn with_moved_to(mut self, to: Handle) -> Self {
        self.flags |= DeltaFlags::MOVED_TO;
        self.moved_to = Some(to);
        self
    }

    /// Finds the node for `handle` in this tree.
    pub fn find(&self, handle: &Handle) -> Option<&ElementDelta> {
        if &self.handle == handle {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(handle))
    }

    /// Leaf-most nodes that carry an actual change, in tree order.
    pub fn affected(&self) -> Vec<&ElementDelta> {
        let mut out = Vec::new();
        self.collect_affected(&mut out);
        out
    }

    fn collect_affected<'a>(&'a self, out: &mut Vec<&'a ElementDelta>) {
        if !self.is_children_only() {
            out.push(self);
        }
        for child in &self.children {
            child.collect_affected(out);
        }
    }

    fn is_children_only(&self) -> bool {
        self.kind == DeltaKind::Changed && self.flags == DeltaFlags::CHILDREN
    }

    fn child_mut(&mut self, handle: &Handle) -> Option<&mut ElementDelta> {
        self.children.iter_mut().find(|child| &child.handle == handle)
    }
}

/// Accumulates deltas for one batch and merges repeated changes to the same
/// element.
#[derive(Debug)]
pub struct DeltaBuilder {
    root: ElementDelta,
}

impl Default for DeltaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaBuilder {
    pub fn new() -> Self {
        Self {
            root: ElementDelta::changed(Handle::model(), DeltaFlags::CHILDREN),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Merges `delta` into the batch.
    ///
    /// Trees are walked down to the nodes that carry an actual change; each of
    /// those is merged at its position under the model root.
    pub fn add(&mut self, delta: ElementDelta) {
        if delta.is_children_only() && !delta.children.is_empty() {
            for child in delta.children {
                self.add(child);
            }
            return;
        }
        self.insert(delta);
    }

    /// The merged tree, or `None` when nothing changed.
    pub fn finish(self) -> Option<ElementDelta> {
        if self.is_empty() {
            None
        } else {
            Some(self.root)
        }
    }

    fn insert(&mut self, delta: ElementDelta) {
        if delta.handle == self.root.handle {
            self.root.flags |= delta.flags;
            return;
        }

        let path = delta.handle.path_from_model();
        // path[0] is the model root.
        let ancestors = &path[1..path.len() - 1];
        let mut node = &mut self.root;
        for ancestor in ancestors {
            if node.child_mut(ancestor).is_none() {
                node.children.push(ElementDelta::changed(
                    ancestor.clone(),
                    DeltaFlags::CHILDREN,
                ));
            }
            let Some(next) = node.child_mut(ancestor) else {
                return;
            };
            if next.kind != DeltaKind::Changed {
                // Additions and removals already cover their subtree.
                return;
            }
            next.flags |= DeltaFlags::CHILDREN;
            node = next;
        }

        let Some(index) = node
            .children
            .iter()
            .position(|child| child.handle == delta.handle)
        else {
            node.children.push(delta);
            return;
        };

        let existing = &mut node.children[index];
        match (existing.kind, delta.kind) {
            (DeltaKind::Added, DeltaKind::Removed) => {
                node.children.remove(index);
                self.prune(&path);
            }
            (DeltaKind::Added, _) => {
                existing.flags |= delta.flags;
                existing.moved_from = delta.moved_from.or(existing.moved_from.take());
            }
            (DeltaKind::Removed, DeltaKind::Added) => {
                existing.kind = DeltaKind::Changed;
                existing.flags = delta.flags | DeltaFlags::CONTENT;
                existing.moved_from = delta.moved_from;
                existing.moved_to = None;
                existing.children.clear();
            }
            (DeltaKind::Removed, _) => {}
            (DeltaKind::Changed, DeltaKind::Changed) => {
                existing.flags |= delta.flags;
                existing.children.extend(delta.children);
            }
            (DeltaKind::Changed, _) => {
                *existing = delta;
            }
        }
    }

    /// Drops `Changed(CHILDREN)` ancestors of `path` that no longer have
    /// children after a cancelled addition.
    fn prune(&mut self, path: &[Handle]) {
        for depth in (1..path.len() - 1).rev() {
            let ancestors = &path[1..depth];
            let mut node = &mut self.root;
            for ancestor in ancestors {
                let Some(next) = node.child_mut(ancestor) else {
                    return;
                };
                node = next;
            }
            let target = &path[depth];
            let empty = node
                .children
                .iter()
                .any(|child| {
                    &child.handle == target
                        && child.is_children_only()
                        && child.children.is_empty()
                });
            if !empty {
                return;
            }
            node.children.retain(|child| &child.handle != target);
        }
    }
}
