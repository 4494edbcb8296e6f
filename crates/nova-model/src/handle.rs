use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Structural kind of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    /// The single root of the element model.
    Model,
    /// A source folder.
    Root,
    Package,
    CompilationUnit,
    Type,
    Field,
    Method,
    Initializer,
}

impl ElementKind {
    /// Kinds whose bodies live in the unit cache and are opened on demand.
    pub fn is_openable(self) -> bool {
        matches!(
            self,
            ElementKind::Model | ElementKind::Root | ElementKind::Package | ElementKind::CompilationUnit
        )
    }
}

/// Identifies an owner of working copies.
///
/// [`OwnerId::PRIMARY`] is the default owner; other ids are handed out by
/// [`crate::ElementModel::new_owner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(u32);

impl OwnerId {
    pub const PRIMARY: OwnerId = OwnerId(0);

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn is_primary(self) -> bool {
        self == Self::PRIMARY
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

/// The editing namespace a working copy handle lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditScope {
    /// The single working copy of a unit owned by [`OwnerId::PRIMARY`].
    Primary,
    /// A working copy shared by every consumer of `owner`.
    Shared(OwnerId),
    /// An unshared working copy; `session` distinguishes copies of the same
    /// unit created by the same owner.
    Private { owner: OwnerId, session: u64 },
}

impl EditScope {
    pub fn owner(self) -> OwnerId {
        match self {
            EditScope::Primary => OwnerId::PRIMARY,
            EditScope::Shared(owner) | EditScope::Private { owner, .. } => owner,
        }
    }
}

#[derive(PartialEq, Eq, Hash)]
struct HandleData {
    kind: ElementKind,
    name: SmolStr,
    parent: Option<Handle>,
    occurrence: u32,
    scope: Option<EditScope>,
}

/// Immutable, value-compared identifier of a structural element.
///
/// Handles are cheap to clone and may be recreated at will: two handles built
/// independently for the same element compare and hash equal. A handle never
/// keeps its element's body alive.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Handle(Arc<HandleData>);

impl Handle {
    fn new(
        kind: ElementKind,
        name: impl Into<SmolStr>,
        parent: Option<Handle>,
        occurrence: u32,
        scope: Option<EditScope>,
    ) -> Self {
        Self(Arc::new(HandleData {
            kind,
            name: name.into(),
            parent,
            occurrence,
            scope,
        }))
    }

    /// The root of the element model.
    pub fn model() -> Self {
        Self::new(ElementKind::Model, "", None, 1, None)
    }

    /// A source folder, named by its path relative to the workspace.
    pub fn root(name: impl Into<SmolStr>) -> Self {
        Self::new(ElementKind::Root, name, Some(Self::model()), 1, None)
    }

    /// A package below `root`. The default package has an empty name.
    pub fn package(root: &Handle, name: impl Into<SmolStr>) -> Self {
        Self::new(ElementKind::Package, name, Some(root.clone()), 1, None)
    }

    pub fn unit(package: &Handle, name: impl Into<SmolStr>) -> Self {
        Self::new(ElementKind::CompilationUnit, name, Some(package.clone()), 1, None)
    }

    /// A member of `self`, e.g. a type in a unit or a method in a type.
    pub fn child(&self, kind: ElementKind, name: impl Into<SmolStr>) -> Self {
        Self::new(kind, name, Some(self.clone()), 1, None)
    }

    /// Same element with a different occurrence count, used to tell apart
    /// otherwise identical siblings (e.g. two initializers).
    pub fn with_occurrence(&self, occurrence: u32) -> Self {
        Self::new(
            self.0.kind,
            self.0.name.clone(),
            self.0.parent.clone(),
            occurrence,
            self.0.scope,
        )
    }

    /// The working copy handle of `original` in `scope`.
    pub fn working_copy(original: &Handle, scope: EditScope) -> Self {
        let original = original.original();
        Self::new(
            original.0.kind,
            original.0.name.clone(),
            original.0.parent.clone(),
            original.0.occurrence,
            Some(scope),
        )
    }

    pub fn kind(&self) -> ElementKind {
        self.0.kind
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn parent(&self) -> Option<&Handle> {
        self.0.parent.as_ref()
    }

    pub fn occurrence(&self) -> u32 {
        self.0.occurrence
    }

    /// The editing scope when this handle (or an ancestor) is a working copy.
    pub fn scope(&self) -> Option<EditScope> {
        self.0
            .scope
            .or_else(|| self.parent().and_then(|parent| parent.scope()))
    }

    /// The editing scope of this handle itself, ignoring ancestors.
    pub fn own_scope(&self) -> Option<EditScope> {
        self.0.scope
    }

    pub fn is_working_copy(&self) -> bool {
        self.0.scope.is_some()
    }

    /// The element this handle was derived from, with any editing scope
    /// stripped. Returns `self` for non-working-copy units.
    pub fn original(&self) -> Handle {
        if self.0.scope.is_none() {
            return self.clone();
        }
        Self::new(
            self.0.kind,
            self.0.name.clone(),
            self.0.parent.clone(),
            self.0.occurrence,
            None,
        )
    }

    /// Closest ancestor-or-self that is a compilation unit.
    pub fn enclosing_unit(&self) -> Option<Handle> {
        self.ancestors()
            .find(|handle| handle.kind() == ElementKind::CompilationUnit)
    }

    /// Iterates over `self` followed by each ancestor up to the model root.
    pub fn ancestors(&self) -> impl Iterator<Item = Handle> {
        std::iter::successors(Some(self.clone()), |handle| handle.parent().cloned())
    }

    /// Path from the model root down to `self` (inclusive).
    pub fn path_from_model(&self) -> Vec<Handle> {
        let mut path: Vec<Handle> = self.ancestors().collect();
        path.reverse();
        path
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({self})", self.0.kind)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.kind {
            ElementKind::Model => return f.write_str("<model>"),
            ElementKind::Root => f.write_str(&self.0.name)?,
            _ => {
                if let Some(parent) = self.parent() {
                    write!(f, "{parent}")?;
                }
                let separator = match self.0.kind {
                    ElementKind::Package | ElementKind::CompilationUnit => '/',
                    _ => '#',
                };
                write!(f, "{separator}{}", self.0.name)?;
            }
        }
        if self.0.occurrence > 1 {
            write!(f, "!{}", self.0.occurrence)?;
        }
        match self.0.scope {
            None => Ok(()),
            Some(EditScope::Primary) => f.write_str("[primary]"),
            Some(EditScope::Shared(owner)) => write!(f, "[{owner}]"),
            Some(EditScope::Private { owner, session }) => write!(f, "[{owner}:{session}]"),
        }
    }
}
