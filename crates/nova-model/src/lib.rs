//! Bounded-memory element model.
//!
//! Structural elements of a workspace (roots, packages, compilation units and
//! their members) are named by cheap, value-compared [`Handle`]s. Their
//! materialized [`ElementBody`]s and editable [`Buffer`]s live in a
//! [`BodyStore`] made of two [`nova_memory::OverflowingLru`] caches whose
//! evictions are negotiated with the victim, so buffers with unsaved edits are
//! never dropped.
//!
//! [`ElementModel`] is the context object tying the store together with the
//! working-copy registry, the delta emitter, and the two collaborators it
//! relies on: a [`CompilerFrontEnd`] that parses units and a
//! [`ResourceLayer`] that stores bytes.

mod body;
mod buffer;
mod delta;
mod emitter;
mod error;
mod front_end;
mod handle;
mod model;
mod resource;
mod store;
mod working_copy;

pub mod testing;

pub use body::{ElementBody, OpenedUnit, Payload, SourceRange};
pub use buffer::{Buffer, BufferSnapshot};
pub use delta::{DeltaBuilder, DeltaFlags, DeltaKind, ElementDelta};
pub use emitter::{DeltaEmitter, DeltaListener, ListenerId, OperationGuard};
pub use error::{ModelError, ParseError, Result};
pub use front_end::{CompilerFrontEnd, UnitContents};
pub use handle::{EditScope, ElementKind, Handle, OwnerId};
pub use model::ElementModel;
pub use resource::{ResourceEntry, ResourceLayer, ResourcePath};
pub use store::{BodyStore, PinGuard, StoreConfig};
pub use working_copy::{
    Acquired, Destroyed, Released, Sharing, UseCount, WorkingCopyRecord, WorkingCopyRegistry,
};

pub use nova_memory::{CachePolicy, CacheStats, CancellationToken};
