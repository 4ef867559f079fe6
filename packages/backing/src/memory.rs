use std::collections::BTreeMap;
use std::sync::RwLock;

use bytes::Bytes;

use crate::{BackingError, BackingStore};

/// A backing store that keeps every stream in memory.
///
/// Used by tests and by hosts that never persist preferences.
#[derive(Debug, Default)]
pub struct MemoryBackingStore {
    streams: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All locations currently holding a stream, in sorted order.
    pub fn locations(&self) -> Vec<String> {
        match self.streams.read() {
            Ok(streams) => streams.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        }
    }

    fn normalize(location: &str) -> String {
        location
            .split('/')
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn poisoned() -> BackingError {
        BackingError::Transport("memory backing store lock poisoned".into())
    }
}

impl BackingStore for MemoryBackingStore {
    fn read_bytes(&self, location: &str) -> Result<Option<Bytes>, BackingError> {
        let streams = self.streams.read().map_err(|_| Self::poisoned())?;
        Ok(streams.get(&Self::normalize(location)).cloned())
    }

    fn write_bytes(&self, location: &str, data: Bytes) -> Result<(), BackingError> {
        let mut streams = self.streams.write().map_err(|_| Self::poisoned())?;
        streams.insert(Self::normalize(location), data);
        Ok(())
    }

    fn delete(&self, location: &str) -> Result<bool, BackingError> {
        let mut streams = self.streams.write().map_err(|_| Self::poisoned())?;
        Ok(streams.remove(&Self::normalize(location)).is_some())
    }

    fn list_children(&self, location: &str) -> Result<Vec<String>, BackingError> {
        let streams = self.streams.read().map_err(|_| Self::poisoned())?;
        let base = Self::normalize(location);
        let prefix = if base.is_empty() {
            String::new()
        } else {
            format!("{}/", base)
        };

        let mut names: Vec<String> = streams
            .keys()
            .filter_map(|k| k.strip_prefix(prefix.as_str()))
            .filter_map(|rest| rest.split('/').next())
            .map(str::to_string)
            .collect();
        names.dedup();
        Ok(names)
    }
}
