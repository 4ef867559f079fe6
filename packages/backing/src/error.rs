//! Error types for the backing layer.
//!
//! Errors at this level are transport-focused. Whether a stream holds a
//! well-formed preference file is decided by the layers above.

/// Errors raised by a [`BackingStore`](crate::BackingStore).
#[derive(Debug)]
pub enum BackingError {
    /// Generic I/O or transport failure.
    Transport(Box<dyn std::error::Error + Send + Sync>),

    /// The operation is not supported by this store.
    ///
    /// For example, writing through a read-only collaborator.
    NotSupported,

    /// The location identifier cannot be mapped onto this store.
    InvalidLocation { location: String, message: String },
}

impl std::fmt::Display for BackingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackingError::Transport(e) => write!(f, "transport error: {}", e),
            BackingError::NotSupported => write!(f, "operation not supported"),
            BackingError::InvalidLocation { location, message } => {
                write!(f, "invalid location '{}': {}", location, message)
            }
        }
    }
}

impl std::error::Error for BackingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackingError::Transport(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BackingError {
    fn from(e: std::io::Error) -> Self {
        BackingError::Transport(Box::new(e))
    }
}
