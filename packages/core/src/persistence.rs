//! Lazy loading and flushing of load-level nodes.
//!
//! Each load-level node owns one backing stream: a properties file whose
//! tokens are `(relative path, key)` pairs flattened with
//! [`encode_path`](crate::codec::encode_path), plus a version entry.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use prefstore_backing::Bytes;

use crate::codec::{decode_path, encode_path};
use crate::error::{Error, Result};
use crate::export::ExportedPreferences;
use crate::node::Node;
use crate::path::NodePath;
use crate::properties;
use crate::store::{lock, NodeData, PendingEvents, PreferenceStore, StoreInner};

impl StoreInner {
    /// Make sure the load level owning `data` has been read.
    ///
    /// Nodes above the load level and nodes of unpersisted scopes have
    /// nothing to load.
    pub(crate) fn silent_load(&self, data: &Arc<NodeData>) -> Result<()> {
        let level = match self.load_level(&data.path) {
            Some(level) => level,
            None => return Ok(()),
        };
        if lock(&self.loaded).contains(&level) {
            return Ok(());
        }
        let level_data = if level == data.path {
            data.clone()
        } else {
            match self.existing(&level) {
                Some(level_data) => level_data,
                None => return Ok(()),
            }
        };
        self.load(&level_data)
    }

    fn load(&self, level: &Arc<NodeData>) -> Result<()> {
        let mut events = PendingEvents::default();
        {
            let _guard = lock(&level.load_lock);
            if lock(&self.loaded).contains(&level.path) {
                return Ok(());
            }
            self.read_into(level, &mut events)?;
            lock(&self.loaded).insert(level.path.clone());
        }
        events.fire();
        Ok(())
    }

    /// Read the stream of `level` and merge its tokens into the subtree
    /// without marking anything dirty.
    fn read_into(&self, level: &Arc<NodeData>, events: &mut PendingEvents) -> Result<()> {
        let entries = match self.read_stream(&level.path)? {
            Some(entries) => entries,
            None => return Ok(()),
        };

        for (token, value) in entries {
            let (relative, key) = decode_path(&token);
            let target = self.descend(level, &relative, events)?;
            lock(&target.state).values.insert(key, value);
        }
        Ok(())
    }

    /// The tokens stored for the load-level node at `path`, without the
    /// version entry. `None` when the node has no location or no stream.
    pub(crate) fn read_stream(&self, path: &NodePath) -> Result<Option<BTreeMap<String, String>>> {
        let location = match self.scope_for(path).and_then(|s| s.resolve_location(path)) {
            Some(location) => location,
            None => return Ok(None),
        };

        log::debug!("Loading preferences of {} from {}...", path, location);
        let bytes = self.backing.read_bytes(&location).map_err(|e| {
            log::error!("Failed to read preferences of {} from {}: {}", path, location, e);
            Error::backing(&location, e)
        })?;
        let bytes = match bytes {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        let mut entries = properties::parse(&properties::decode_bytes(&bytes)).map_err(|e| {
            log::error!("Malformed preference file {}: {}", location, e);
            Error::BackingStore {
                location: location.clone(),
                message: e.to_string(),
                source: None,
            }
        })?;
        entries.remove(&self.config.version_key);
        Ok(Some(entries))
    }

    /// Read the stored children of a node one level above a load level.
    pub(crate) fn initialize_children(&self, data: &Arc<NodeData>) -> Result<()> {
        let location = match self
            .scope_for(&data.path)
            .and_then(|s| s.children_location(&data.path))
        {
            Some(location) => location,
            None => return Ok(()),
        };

        let names = self.backing.list_children(&location).map_err(|e| {
            log::error!("Failed to list preference files in {}: {}", location, e);
            Error::backing(&location, e)
        })?;

        let mut events = PendingEvents::default();
        for name in names {
            if let Some(qualifier) = self.config.qualifier_of(&name) {
                self.child(data, qualifier, &mut events)?;
            }
        }
        events.fire();
        Ok(())
    }

    /// Flush a load-level node.
    ///
    /// Only this node's dirty flag is cleared; descendants keep theirs.
    pub(crate) fn flush_load_level(&self, level: &Arc<NodeData>) -> Result<()> {
        if level.reading.load(Ordering::Acquire) {
            return Ok(());
        }

        let _guard = lock(&level.flush_lock);
        {
            let mut state = lock(&level.state);
            if state.removed || !state.dirty {
                return Ok(());
            }
            state.dirty = false;
        }

        level.writing.store(true, Ordering::Release);
        let result = self.save(level);
        level.writing.store(false, Ordering::Release);

        if result.is_err() {
            lock(&level.state).dirty = true;
        }
        result
    }

    fn save(&self, level: &Arc<NodeData>) -> Result<()> {
        let location = match self
            .scope_for(&level.path)
            .and_then(|s| s.resolve_location(&level.path))
        {
            Some(location) => location,
            None => return Ok(()),
        };

        let mut entries = self.snapshot(level);
        let backing = &self.backing;
        let result = if entries.is_empty() {
            backing.run_exclusive(&location, &mut || {
                log::debug!("Removing empty preference file {}", location);
                backing.delete(&location).map(|_| ())
            })
        } else {
            entries.insert(
                self.config.version_key.clone(),
                self.config.version_value.clone(),
            );
            let text = properties::store(&entries, &backing.line_separator(&location));
            let data = Bytes::from(text);
            backing.run_exclusive(&location, &mut || {
                log::debug!("Saving preferences of {} to {}", level.path, location);
                backing.write_bytes(&location, data.clone())
            })
        };

        result.map_err(|e| {
            log::error!("Failed to save preferences of {} to {}: {}", level.path, location, e);
            Error::backing(&location, e)
        })
    }

    /// Every key in the subtree of `level`, as tokens relative to it.
    fn snapshot(&self, level: &Arc<NodeData>) -> BTreeMap<String, String> {
        let mut entries = BTreeMap::new();
        let mut pending = vec![(level.clone(), String::new())];

        while let Some((data, relative)) = pending.pop() {
            let (values, children) = {
                let state = lock(&data.state);
                if state.removed {
                    continue;
                }
                (state.values.clone(), state.children.clone())
            };
            for (key, value) in values {
                entries.insert(encode_path(&relative, &key), value);
            }
            for name in children {
                if let Some(child) = self.existing(&data.path.child(&name)) {
                    let child_relative = if relative.is_empty() {
                        name
                    } else {
                        format!("{}/{}", relative, name)
                    };
                    pending.push((child, child_relative));
                }
            }
        }
        entries
    }

    /// Forget loaded state rooted at `data` and delete its stream if it owns
    /// one. Callers hold `data.flush_lock`.
    pub(crate) fn purge(&self, data: &Arc<NodeData>) -> Result<()> {
        lock(&self.loaded).retain(|p| !p.has_prefix(&data.path));

        if self.load_level(&data.path).as_ref() != Some(&data.path) {
            return Ok(());
        }
        let location = match self
            .scope_for(&data.path)
            .and_then(|s| s.resolve_location(&data.path))
        {
            Some(location) => location,
            None => return Ok(()),
        };

        let backing = &self.backing;
        backing
            .run_exclusive(&location, &mut || {
                if !backing.delete(&location)? {
                    log::debug!("No preference file to remove at {}", location);
                }
                Ok(())
            })
            .map_err(|e| {
                log::error!("Failed to remove preference file {}: {}", location, e);
                Error::backing(&location, e)
            })
    }

    /// Existing load-level nodes whose stream lives at `location`.
    fn load_levels_at(&self, location: &str) -> Vec<Arc<NodeData>> {
        self.all_nodes()
            .into_iter()
            .filter(|data| self.load_level(&data.path).as_ref() == Some(&data.path))
            .filter(|data| {
                self.scope_for(&data.path)
                    .and_then(|s| s.resolve_location(&data.path))
                    .is_some_and(|l| l == location)
            })
            .collect()
    }
}

impl Node {
    /// Re-read this node's backing stream after it changed outside the
    /// store.
    ///
    /// The stream replaces the subtree contents: keys missing from it are
    /// removed and listeners see each individual change. Ignored while this
    /// node is being written.
    pub fn sync_from_backing(&self) -> Result<()> {
        self.data.check_removed()?;
        let level = match self.inner.load_level(&self.data.path) {
            Some(level) if level == self.data.path => self.data.clone(),
            Some(level) => match self.inner.existing(&level) {
                Some(level) => level,
                None => return Ok(()),
            },
            None => return Ok(()),
        };

        if level.writing.load(Ordering::Acquire) {
            log::warn!("Ignoring external change to {} while it is being written", level.path);
            return Ok(());
        }

        let mut tree = ExportedPreferences::new();
        tree.mark_export_root(&level.path);
        for (token, value) in self.inner.read_stream(&level.path)?.unwrap_or_default() {
            let (relative, key) = decode_path(&token);
            let path = level.path.join(&NodePath::parse(&relative)?);
            tree.put(&path, &key, &value);
        }

        lock(&self.inner.loaded).insert(level.path.clone());
        let store = PreferenceStore {
            inner: self.inner.clone(),
        };
        level.reading.store(true, Ordering::Release);
        let result = store.apply_tree(&tree, None, false);
        level.reading.store(false, Ordering::Release);

        lock(&level.state).dirty = false;
        result
    }

    /// Drop every value below this node's load level after its backing
    /// stream was deleted outside the store. The nodes stay.
    pub fn backing_deleted(&self) -> Result<()> {
        self.data.check_removed()?;
        let level = match self.inner.load_level(&self.data.path) {
            Some(level) => level,
            None => return Ok(()),
        };
        let level = match self.inner.existing(&level) {
            Some(level) => Node::from_data(self.inner.clone(), level),
            None => return Ok(()),
        };

        lock(&self.inner.loaded).retain(|p| !p.has_prefix(&level.data.path));
        level.accept(&mut |node| {
            node.clear()?;
            Ok(true)
        })?;
        lock(&level.data.state).dirty = false;
        Ok(())
    }
}

impl PreferenceStore {
    /// The backing stream at `location` changed outside the store.
    pub fn backing_changed(&self, location: &str) -> Result<()> {
        for level in self.inner.load_levels_at(location) {
            Node::from_data(self.inner.clone(), level).sync_from_backing()?;
        }
        Ok(())
    }

    /// The backing stream at `location` was deleted outside the store.
    pub fn backing_deleted(&self, location: &str) -> Result<()> {
        for level in self.inner.load_levels_at(location) {
            Node::from_data(self.inner.clone(), level).backing_deleted()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prefstore_backing::{BackingError, BackingStore, MemoryBackingStore};
    use std::sync::atomic::AtomicBool;
    use std::sync::{mpsc, Mutex};
    use std::thread;
    use std::time::Duration;

    fn setup() -> (Arc<MemoryBackingStore>, PreferenceStore) {
        let backing = Arc::new(MemoryBackingStore::new());
        let store = PreferenceStore::new(backing.clone());
        (backing, store)
    }

    fn stream(backing: &MemoryBackingStore, location: &str) -> Option<String> {
        backing
            .read_bytes(location)
            .unwrap()
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
    }

    const Q_FILE: &str = "instance/.settings/q.prefs";

    #[test]
    fn flush_writes_version_and_sorted_tokens() {
        let (backing, store) = setup();
        let q = store.node("/instance/q").unwrap();
        q.put("b", "2").unwrap();
        q.put("a", "1").unwrap();
        q.node("child").unwrap().put("c/d", "3").unwrap();
        q.node("child").unwrap().put("e", "4").unwrap();

        q.flush().unwrap();

        assert_eq!(
            stream(&backing, Q_FILE).unwrap(),
            "a=1\nb=2\nchild//c/d=3\nchild/e=4\npreferences.version=1\n"
        );
        assert!(!q.is_dirty());
    }

    #[test]
    fn flush_of_clean_node_writes_nothing() {
        let (backing, store) = setup();
        store.node("/instance/q").unwrap().flush().unwrap();
        assert!(backing.locations().is_empty());
    }

    #[test]
    fn empty_subtree_deletes_stream() {
        let (backing, store) = setup();
        let q = store.node("/instance/q").unwrap();
        q.put("a", "1").unwrap();
        q.flush().unwrap();
        assert!(stream(&backing, Q_FILE).is_some());

        q.remove("a").unwrap();
        q.flush().unwrap();
        assert_eq!(stream(&backing, Q_FILE), None);
    }

    #[test]
    fn lazy_load_reads_stream_once() {
        let (backing, store) = setup();
        backing
            .write_bytes(
                Q_FILE,
                Bytes::from_static(b"preferences.version=1\na=1\nsub/b=2\nsub//c/d=3\n"),
            )
            .unwrap();

        let q = store.node("/instance/q").unwrap();
        assert_eq!(q.get("a", None).unwrap(), Some("1".to_string()));
        assert_eq!(q.keys().unwrap(), vec!["a"]);
        let sub = q.node("sub").unwrap();
        assert_eq!(sub.get("b", None).unwrap(), Some("2".to_string()));
        assert_eq!(sub.get("c/d", None).unwrap(), Some("3".to_string()));
        assert!(!q.is_dirty());

        // Already loaded: later stream changes are not picked up implicitly.
        backing
            .write_bytes(Q_FILE, Bytes::from_static(b"a=changed\n"))
            .unwrap();
        assert_eq!(q.get("a", None).unwrap(), Some("1".to_string()));
    }

    #[test]
    fn loading_through_a_descendant() {
        let (backing, store) = setup();
        backing
            .write_bytes(Q_FILE, Bytes::from_static(b"x/y/k=v\n"))
            .unwrap();

        let y = store.node("/instance/q/x/y").unwrap();
        assert_eq!(y.get("k", None).unwrap(), Some("v".to_string()));
    }

    #[test]
    fn unreadable_stream_is_backing_store_error() {
        let (backing, store) = setup();
        backing
            .write_bytes(Q_FILE, Bytes::from_static(b"bad=\\u00zz\n"))
            .unwrap();

        let q = store.node("/instance/q").unwrap();
        assert!(matches!(
            q.get("bad", None),
            Err(Error::BackingStore { .. })
        ));
    }

    #[test]
    fn remove_node_deletes_stream_and_forgets_load() {
        let (backing, store) = setup();
        let q = store.node("/instance/q").unwrap();
        q.put("a", "1").unwrap();
        q.flush().unwrap();

        q.remove_node().unwrap();
        assert_eq!(stream(&backing, Q_FILE), None);

        let again = store.node("/instance/q").unwrap();
        assert_eq!(again.get("a", None).unwrap(), None);
    }

    #[test]
    fn removing_a_child_dirties_the_load_level() {
        let (backing, store) = setup();
        let q = store.node("/instance/q").unwrap();
        q.node("child").unwrap().put("k", "v").unwrap();
        q.put("keep", "1").unwrap();
        q.flush().unwrap();

        q.node("child").unwrap().remove_node().unwrap();
        assert!(q.is_dirty());
        q.flush().unwrap();
        assert_eq!(
            stream(&backing, Q_FILE).unwrap(),
            "keep=1\npreferences.version=1\n"
        );
    }

    #[test]
    fn project_children_come_from_settings_files() {
        let (backing, store) = setup();
        backing
            .write_bytes(
                "projects/p1/.settings/org.one.prefs",
                Bytes::from_static(b"k=1\n"),
            )
            .unwrap();
        backing
            .write_bytes(
                "projects/p1/.settings/notes.txt",
                Bytes::from_static(b""),
            )
            .unwrap();

        let project = store.node("/project/p1").unwrap();
        assert_eq!(project.children_names().unwrap(), vec!["org.one"]);
        assert!(project.node_exists("org.one").unwrap());
        assert_eq!(
            project.node("org.one").unwrap().get("k", None).unwrap(),
            Some("1".to_string())
        );
    }

    #[test]
    fn project_flush_lands_in_project_settings() {
        let (backing, store) = setup();
        let node = store.node("/project/p1/org.one").unwrap();
        node.put("k", "v").unwrap();
        store.node("/project").unwrap().flush().unwrap();

        assert_eq!(
            stream(&backing, "projects/p1/.settings/org.one.prefs").unwrap(),
            "k=v\npreferences.version=1\n"
        );
    }

    #[test]
    fn sync_rereads_stream() {
        let (backing, store) = setup();
        let q = store.node("/instance/q").unwrap();
        q.put("a", "1").unwrap();
        q.flush().unwrap();

        backing
            .write_bytes(Q_FILE, Bytes::from_static(b"a=1\nb=2\n"))
            .unwrap();
        q.sync().unwrap();
        assert_eq!(q.get("b", None).unwrap(), Some("2".to_string()));
    }

    #[test]
    fn external_change_reports_new_keys_and_drops_missing() {
        let (backing, store) = setup();
        let q = store.node("/instance/q").unwrap();
        q.put("a", "1").unwrap();
        q.put("gone", "x").unwrap();
        q.node("child").unwrap().put("c", "3").unwrap();
        q.flush().unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let e = events.clone();
        q.add_preference_change_listener(move |event| {
            e.lock().unwrap().push(format!(
                "{}:{:?}->{:?}",
                event.key, event.old_value, event.new_value
            ));
        })
        .unwrap();

        backing
            .write_bytes(
                Q_FILE,
                Bytes::from_static(b"preferences.version=1\na=1\nnew=n\nchild/c=3\n"),
            )
            .unwrap();
        store.backing_changed(Q_FILE).unwrap();

        assert_eq!(q.get("new", None).unwrap(), Some("n".to_string()));
        assert_eq!(q.get("gone", None).unwrap(), None);
        assert!(!q.is_dirty());
        let events = events.lock().unwrap().clone();
        assert!(events.contains(&"new:None->Some(\"n\")".to_string()));
        assert!(events.contains(&"gone:Some(\"x\")->None".to_string()));
        assert_eq!(
            q.node("child").unwrap().get("c", None).unwrap(),
            Some("3".to_string())
        );
    }

    #[test]
    fn external_delete_clears_but_keeps_nodes() {
        let (backing, store) = setup();
        let q = store.node("/instance/q").unwrap();
        q.put("a", "1").unwrap();
        q.node("child").unwrap().put("c", "3").unwrap();
        q.flush().unwrap();

        backing.delete(Q_FILE).unwrap();
        store.backing_deleted(Q_FILE).unwrap();

        assert!(q.node_exists("").unwrap());
        assert!(q.keys().unwrap().is_empty());
        assert!(q.node_exists("child").unwrap());
        assert!(q.node("child").unwrap().keys().unwrap().is_empty());
    }

    /// Fails every write, to check that dirty state survives a failed flush.
    struct ReadOnlyBacking;

    impl BackingStore for ReadOnlyBacking {
        fn read_bytes(&self, _location: &str) -> std::result::Result<Option<Bytes>, BackingError> {
            Ok(None)
        }

        fn write_bytes(&self, _location: &str, _data: Bytes) -> std::result::Result<(), BackingError> {
            Err(BackingError::NotSupported)
        }

        fn delete(&self, _location: &str) -> std::result::Result<bool, BackingError> {
            Err(BackingError::NotSupported)
        }

        fn list_children(&self, _location: &str) -> std::result::Result<Vec<String>, BackingError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn failed_flush_stays_dirty() {
        let store = PreferenceStore::new(Arc::new(ReadOnlyBacking));
        let q = store.node("/instance/q").unwrap();
        q.put("a", "1").unwrap();

        assert!(matches!(q.flush(), Err(Error::BackingStore { .. })));
        assert!(q.is_dirty());
    }

    /// Fails reads with a transport error while `failing` is set.
    struct FlakyReads {
        inner: MemoryBackingStore,
        failing: AtomicBool,
    }

    impl BackingStore for FlakyReads {
        fn read_bytes(&self, location: &str) -> std::result::Result<Option<Bytes>, BackingError> {
            if self.failing.load(Ordering::Acquire) {
                return Err(BackingError::Transport("disk unavailable".into()));
            }
            self.inner.read_bytes(location)
        }

        fn write_bytes(&self, location: &str, data: Bytes) -> std::result::Result<(), BackingError> {
            self.inner.write_bytes(location, data)
        }

        fn delete(&self, location: &str) -> std::result::Result<bool, BackingError> {
            self.inner.delete(location)
        }

        fn list_children(&self, location: &str) -> std::result::Result<Vec<String>, BackingError> {
            self.inner.list_children(location)
        }
    }

    #[test]
    fn failed_read_leaves_level_unloaded() {
        let backing = Arc::new(FlakyReads {
            inner: MemoryBackingStore::new(),
            failing: AtomicBool::new(true),
        });
        backing
            .inner
            .write_bytes(Q_FILE, Bytes::from_static(b"a=1\n"))
            .unwrap();
        let store = PreferenceStore::new(backing.clone());
        let q = store.node("/instance/q").unwrap();

        assert!(matches!(q.get("a", None), Err(Error::BackingStore { .. })));
        assert!(matches!(q.put("b", "2"), Err(Error::BackingStore { .. })));
        assert!(!lock(&store.inner.loaded).contains(q.path()));
        assert!(!q.is_dirty());

        backing.failing.store(false, Ordering::Release);
        assert_eq!(q.get("a", None).unwrap(), Some("1".to_string()));
        assert_eq!(q.get("b", None).unwrap(), None);
        assert!(lock(&store.inner.loaded).contains(q.path()));
    }

    /// Holds each write until the gate opens, announcing it first.
    struct GatedWrites {
        inner: MemoryBackingStore,
        entered: Mutex<mpsc::Sender<()>>,
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl BackingStore for GatedWrites {
        fn read_bytes(&self, location: &str) -> std::result::Result<Option<Bytes>, BackingError> {
            self.inner.read_bytes(location)
        }

        fn write_bytes(&self, location: &str, data: Bytes) -> std::result::Result<(), BackingError> {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.gate.lock().unwrap().recv();
            self.inner.write_bytes(location, data)
        }

        fn delete(&self, location: &str) -> std::result::Result<bool, BackingError> {
            self.inner.delete(location)
        }

        fn list_children(&self, location: &str) -> std::result::Result<Vec<String>, BackingError> {
            self.inner.list_children(location)
        }
    }

    #[test]
    fn remove_node_waits_for_a_running_flush() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let backing = Arc::new(GatedWrites {
            inner: MemoryBackingStore::new(),
            entered: Mutex::new(entered_tx),
            gate: Mutex::new(gate_rx),
        });
        let store = PreferenceStore::new(backing.clone());
        let q = store.node("/instance/q").unwrap();
        q.put("a", "1").unwrap();

        let flusher = {
            let q = q.clone();
            thread::spawn(move || q.flush())
        };
        entered_rx
            .recv_timeout(Duration::from_secs(30))
            .expect("flush never reached the backing store");

        let remover = {
            let q = q.clone();
            thread::spawn(move || q.remove_node())
        };
        thread::sleep(Duration::from_millis(50));
        gate_tx.send(()).unwrap();

        flusher.join().unwrap().unwrap();
        remover.join().unwrap().unwrap();
        assert_eq!(backing.inner.read_bytes(Q_FILE).unwrap(), None);
        assert!(!q.node_exists("").unwrap());
    }
}
