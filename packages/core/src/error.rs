//! Error types for the preference tree.

use prefstore_backing::BackingError;

use crate::path::PathError;

/// Errors raised by preference nodes and the services built on them.
///
/// Type-coercion failures in the typed getters are deliberately absent: a
/// value that does not parse falls back to the caller's default.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Node {path} has been removed")]
    InvalidState { path: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Backing store failure at {location}: {message}")]
    BackingStore {
        location: String,
        message: String,
        #[source]
        source: Option<BackingError>,
    },

    #[error("Malformed import stream: {message}")]
    MalformedImport { message: String },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PathError> for Error {
    fn from(error: PathError) -> Self {
        Error::InvalidArgument {
            message: error.to_string(),
        }
    }
}

impl Error {
    pub(crate) fn removed(path: impl ToString) -> Self {
        Error::InvalidState {
            path: path.to_string(),
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn backing(location: &str, source: BackingError) -> Self {
        Error::BackingStore {
            location: location.to_string(),
            message: source.to_string(),
            source: Some(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn invalid_state_display() {
        let err = Error::removed("/instance/q");
        assert_eq!(err.to_string(), "Node /instance/q has been removed");
    }

    #[test]
    fn path_error_becomes_invalid_argument() {
        let err: Error = PathError::InvalidPath {
            message: "consecutive slashes".to_string(),
        }
        .into();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert!(err.to_string().contains("consecutive slashes"));
    }

    #[test]
    fn backing_store_keeps_source() {
        let err = Error::backing("instance/.settings/q.prefs", BackingError::NotSupported);
        let display = err.to_string();
        assert!(display.contains("instance/.settings/q.prefs"));
        assert!(display.contains("operation not supported"));
        assert!(err.source().is_some());
    }

    #[test]
    fn malformed_import_display() {
        let err = Error::MalformedImport {
            message: "empty stream".to_string(),
        };
        assert_eq!(err.to_string(), "Malformed import stream: empty stream");
    }

    #[test]
    fn io_error_converts() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
