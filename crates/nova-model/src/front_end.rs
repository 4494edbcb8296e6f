use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::body::OpenedUnit;
use crate::error::ParseError;
use crate::handle::Handle;

/// Source text handed to the compiler front end.
#[derive(Debug, Clone)]
pub struct UnitContents {
    pub text: Arc<str>,
    /// Whether the text comes from an editing buffer rather than disk.
    pub from_buffer: bool,
}

/// Materializes compilation unit bodies from source text.
///
/// Implementations may block (I/O, parsing); the model never calls them while
/// holding a store lock.
pub trait CompilerFrontEnd: Send + Sync {
    /// Parses `contents` into the body of `unit` and its members.
    ///
    /// Member handles in the result must descend from `unit`. Implementations
    /// should return [`ParseError::Cancelled`] promptly once `cancel` fires.
    fn open(
        &self,
        unit: &Handle,
        contents: &UnitContents,
        cancel: &CancellationToken,
    ) -> Result<OpenedUnit, ParseError>;
}
