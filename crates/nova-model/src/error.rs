use std::io;

use crate::handle::Handle;
use crate::resource::ResourcePath;

pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors reported by the compiler front end while materializing a body.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed input: {message}")]
    Malformed { message: String },

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("contents are not valid {encoding}")]
    Encoding { encoding: String },

    #[error("parse cancelled")]
    Cancelled,
}

/// Errors produced by element model operations.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to open {handle}: {source}")]
    OpenFailure {
        handle: Handle,
        #[source]
        source: ParseError,
    },

    #[error("io error on {path}: {source}")]
    Io {
        path: ResourcePath,
        #[source]
        source: io::Error,
    },

    #[error("{parent} already contains an element named {name:?}")]
    NameCollision { parent: Handle, name: String },

    #[error("invalid state for {handle}: {reason}")]
    InvalidState { handle: Handle, reason: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl ModelError {
    pub(crate) fn invalid_state(handle: &Handle, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            handle: handle.clone(),
            reason: reason.into(),
        }
    }

    pub(crate) fn open_failure(handle: &Handle, source: ParseError) -> Self {
        match source {
            ParseError::Cancelled => Self::Cancelled,
            source => Self::OpenFailure {
                handle: handle.clone(),
                source,
            },
        }
    }

    pub(crate) fn io(path: &ResourcePath, source: io::Error) -> Self {
        Self::Io {
            path: path.clone(),
            source,
        }
    }
}

impl From<nova_memory::Cancelled> for ModelError {
    fn from(_: nova_memory::Cancelled) -> Self {
        Self::Cancelled
    }
}
