use smol_str::SmolStr;

use crate::handle::Handle;

/// Offset and length of an element within its unit's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourceRange {
    pub offset: usize,
    pub length: usize,
}

impl SourceRange {
    pub const fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    pub const fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// Kind-specific part of a body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Payload {
    /// Containers (model, roots, packages) carry nothing beyond children.
    #[default]
    Container,
    Unit {
        imports: Vec<SmolStr>,
    },
    Type {
        modifiers: Vec<SmolStr>,
        supertypes: Vec<SmolStr>,
    },
    Field {
        modifiers: Vec<SmolStr>,
        type_name: SmolStr,
        constant: Option<SmolStr>,
    },
    Method {
        modifiers: Vec<SmolStr>,
        return_type: SmolStr,
        parameters: Vec<SmolStr>,
    },
    Initializer {
        is_static: bool,
    },
}

/// Materialized state of an element ("info").
///
/// A body is owned by the store slot it occupies. Callers get shared,
/// read-only access; changes are made by building a new body and replacing
/// the slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ElementBody {
    pub children: Vec<Handle>,
    pub source_range: Option<SourceRange>,
    pub structure_known: bool,
    pub payload: Payload,
}

impl ElementBody {
    pub fn container(children: Vec<Handle>) -> Self {
        Self {
            children,
            source_range: None,
            structure_known: true,
            payload: Payload::Container,
        }
    }

    pub fn has_child_named(&self, name: &str) -> bool {
        self.children.iter().any(|child| child.name() == name)
    }

    /// Copy of `self` with `child` appended.
    pub fn with_child(&self, child: Handle) -> Self {
        let mut body = self.clone();
        if !body.children.contains(&child) {
            body.children.push(child);
        }
        body
    }

    /// Copy of `self` without `child`.
    pub fn without_child(&self, child: &Handle) -> Self {
        let mut body = self.clone();
        body.children.retain(|existing| existing != child);
        body
    }
}

/// Result of materializing a compilation unit: the unit's own body plus the
/// bodies of every member below it.
#[derive(Debug, Clone, Default)]
pub struct OpenedUnit {
    pub body: ElementBody,
    pub members: Vec<(Handle, ElementBody)>,
}
