//! The collaborator interface preference files are persisted through.

use std::sync::Arc;

use bytes::Bytes;

use crate::BackingError;

/// Byte-level access to the streams that hold preference files.
///
/// Locations are `/`-separated identifiers chosen by the scopes above
/// (for example `instance/.settings/org.example.prefs`). A store decides how
/// they map onto real storage.
///
/// # Object Safety
///
/// This trait is object-safe: the preference store holds an
/// `Arc<dyn BackingStore>`.
pub trait BackingStore: Send + Sync {
    /// Read the whole stream at `location`.
    ///
    /// # Returns
    ///
    /// * `Ok(None)` - Nothing is stored there (not an error condition).
    /// * `Ok(Some(bytes))` - The stream contents.
    /// * `Err(BackingError)` - A transport or system error occurred.
    fn read_bytes(&self, location: &str) -> Result<Option<Bytes>, BackingError>;

    /// Replace the stream at `location`, creating it if needed.
    fn write_bytes(&self, location: &str, data: Bytes) -> Result<(), BackingError>;

    /// Delete the stream at `location`. Returns whether anything was removed.
    fn delete(&self, location: &str) -> Result<bool, BackingError>;

    /// Names of the streams directly below `location`.
    ///
    /// A missing location has no children.
    fn list_children(&self, location: &str) -> Result<Vec<String>, BackingError>;

    /// Line separator to use when writing `location`.
    ///
    /// Stores that can see an existing stream report its convention so a
    /// rewrite does not churn line endings.
    fn line_separator(&self, _location: &str) -> String {
        "\n".to_string()
    }

    /// Run `op` under whatever exclusion rule the host storage requires for
    /// writes at `location`.
    fn run_exclusive(
        &self,
        _location: &str,
        op: &mut dyn FnMut() -> Result<(), BackingError>,
    ) -> Result<(), BackingError> {
        op()
    }
}

// Blanket implementations for shared handles and boxes

impl<T: BackingStore + ?Sized> BackingStore for Arc<T> {
    fn read_bytes(&self, location: &str) -> Result<Option<Bytes>, BackingError> {
        self.as_ref().read_bytes(location)
    }

    fn write_bytes(&self, location: &str, data: Bytes) -> Result<(), BackingError> {
        self.as_ref().write_bytes(location, data)
    }

    fn delete(&self, location: &str) -> Result<bool, BackingError> {
        self.as_ref().delete(location)
    }

    fn list_children(&self, location: &str) -> Result<Vec<String>, BackingError> {
        self.as_ref().list_children(location)
    }

    fn line_separator(&self, location: &str) -> String {
        self.as_ref().line_separator(location)
    }

    fn run_exclusive(
        &self,
        location: &str,
        op: &mut dyn FnMut() -> Result<(), BackingError>,
    ) -> Result<(), BackingError> {
        self.as_ref().run_exclusive(location, op)
    }
}

impl<T: BackingStore + ?Sized> BackingStore for Box<T> {
    fn read_bytes(&self, location: &str) -> Result<Option<Bytes>, BackingError> {
        self.as_ref().read_bytes(location)
    }

    fn write_bytes(&self, location: &str, data: Bytes) -> Result<(), BackingError> {
        self.as_ref().write_bytes(location, data)
    }

    fn delete(&self, location: &str) -> Result<bool, BackingError> {
        self.as_ref().delete(location)
    }

    fn list_children(&self, location: &str) -> Result<Vec<String>, BackingError> {
        self.as_ref().list_children(location)
    }

    fn line_separator(&self, location: &str) -> String {
        self.as_ref().line_separator(location)
    }

    fn run_exclusive(
        &self,
        location: &str,
        op: &mut dyn FnMut() -> Result<(), BackingError>,
    ) -> Result<(), BackingError> {
        self.as_ref().run_exclusive(location, op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// A minimal store that only implements the required methods.
    struct TestStore {
        data: Mutex<HashMap<String, Bytes>>,
    }

    impl BackingStore for TestStore {
        fn read_bytes(&self, location: &str) -> Result<Option<Bytes>, BackingError> {
            Ok(self.data.lock().unwrap().get(location).cloned())
        }

        fn write_bytes(&self, location: &str, data: Bytes) -> Result<(), BackingError> {
            self.data.lock().unwrap().insert(location.to_string(), data);
            Ok(())
        }

        fn delete(&self, location: &str) -> Result<bool, BackingError> {
            Ok(self.data.lock().unwrap().remove(location).is_some())
        }

        fn list_children(&self, _location: &str) -> Result<Vec<String>, BackingError> {
            Err(BackingError::NotSupported)
        }
    }

    fn new_store() -> TestStore {
        TestStore {
            data: Mutex::new(HashMap::new()),
        }
    }

    #[test]
    fn provided_methods_have_defaults() {
        let store = new_store();
        assert_eq!(store.line_separator("anything"), "\n");

        let mut ran = false;
        store
            .run_exclusive("anything", &mut || {
                ran = true;
                Ok(())
            })
            .unwrap();
        assert!(ran);
    }

    #[test]
    fn trait_objects_delegate() {
        let store: Arc<dyn BackingStore> = Arc::new(new_store());
        store
            .write_bytes("a/b", Bytes::from_static(b"k=v\n"))
            .unwrap();

        let boxed: Box<dyn BackingStore> = Box::new(store.clone());
        assert_eq!(
            boxed.read_bytes("a/b").unwrap(),
            Some(Bytes::from_static(b"k=v\n"))
        );
        assert!(boxed.delete("a/b").unwrap());
        assert_eq!(store.read_bytes("a/b").unwrap(), None);
        assert!(matches!(
            boxed.list_children("a"),
            Err(BackingError::NotSupported)
        ));
    }
}
