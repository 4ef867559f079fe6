//! Handles onto preference nodes.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{Error, Result};
use crate::listener::{
    ListenerId, NodeChangeEvent, NodeChangeKind, PreferenceChangeEvent,
};
use crate::path::NodePath;
use crate::store::{lock, NodeData, PendingEvents, StoreInner};

/// A node of the preference tree.
///
/// A handle stays bound to the node it was obtained for: once that node is
/// removed, every operation on the handle fails with
/// [`Error::InvalidState`], even if a new node is later created at the same
/// path.
#[derive(Clone)]
pub struct Node {
    pub(crate) inner: Arc<StoreInner>,
    pub(crate) data: Arc<NodeData>,
}

impl Node {
    pub(crate) fn from_data(inner: Arc<StoreInner>, data: Arc<NodeData>) -> Self {
        Self { inner, data }
    }

    /// The node name, `""` for the root.
    pub fn name(&self) -> &str {
        self.data.path.name()
    }

    pub fn path(&self) -> &NodePath {
        &self.data.path
    }

    pub fn absolute_path(&self) -> String {
        self.data.path.to_string()
    }

    pub fn parent(&self) -> Result<Option<Node>> {
        self.data.check_removed()?;
        Ok(self
            .data
            .path
            .parent()
            .and_then(|p| self.inner.existing(&p))
            .map(|data| Node::from_data(self.inner.clone(), data)))
    }

    /// Whether anything in this subtree changed since it was last flushed.
    pub fn is_dirty(&self) -> bool {
        lock(&self.data.state).dirty
    }

    /// Navigate to a node, creating missing nodes on the way.
    ///
    /// `""` is this node, a leading `/` starts at the tree root, anything
    /// else is relative.
    pub fn node(&self, path: &str) -> Result<Node> {
        self.data.check_removed()?;
        if path.is_empty() {
            return Ok(self.clone());
        }

        let relative = NodePath::parse(path)?;
        let start = if path.starts_with('/') {
            self.inner.root_data()
        } else {
            self.data.clone()
        };

        let mut events = PendingEvents::default();
        let result = self
            .inner
            .descend(&start, &relative.relative(), &mut events)
            .map(|data| Node::from_data(self.inner.clone(), data));
        events.fire();
        result
    }

    /// Whether the node at `path` exists. `""` asks about this node and is
    /// the one query allowed on a removed node.
    pub fn node_exists(&self, path: &str) -> Result<bool> {
        if path.is_empty() {
            return Ok(!self.data.is_removed());
        }
        self.data.check_removed()?;

        let relative = NodePath::parse(path)?;
        let mut current = if path.starts_with('/') {
            self.inner.root_data()
        } else {
            self.data.clone()
        };

        for name in relative.iter() {
            self.prepare(&current)?;
            let child_path = current.path.child(name);
            match self.inner.existing_child(&current, &child_path)? {
                Some(child) => current = child,
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    pub fn children_names(&self) -> Result<Vec<String>> {
        self.data.check_removed()?;
        self.prepare(&self.data)?;
        Ok(lock(&self.data.state).children.iter().cloned().collect())
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        self.data.check_removed()?;
        self.inner.silent_load(&self.data)?;
        Ok(lock(&self.data.state).values.keys().cloned().collect())
    }

    pub fn get(&self, key: &str, default: Option<&str>) -> Result<Option<String>> {
        self.data.check_removed()?;
        self.inner.silent_load(&self.data)?;
        let state = lock(&self.data.state);
        if state.removed {
            return Err(Error::removed(&self.data.path));
        }
        Ok(state
            .values
            .get(key)
            .cloned()
            .or_else(|| default.map(str::to_string)))
    }

    /// Set `key`. Listeners are told even when the value does not change.
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        self.data.check_removed()?;
        self.inner.silent_load(&self.data)?;
        let old = {
            let mut state = lock(&self.data.state);
            if state.removed {
                return Err(Error::removed(&self.data.path));
            }
            state.values.insert(key.to_string(), value.to_string())
        };
        self.inner.mark_dirty(&self.data);

        let mut events = PendingEvents::default();
        events.preference_changed(&self.data, key, old, Some(value.to_string()));
        events.fire();
        Ok(())
    }

    /// Remove `key`. Removing an absent key is a no-op.
    pub fn remove(&self, key: &str) -> Result<()> {
        self.data.check_removed()?;
        self.inner.silent_load(&self.data)?;
        let old = {
            let mut state = lock(&self.data.state);
            if state.removed {
                return Err(Error::removed(&self.data.path));
            }
            state.values.remove(key)
        };
        if old.is_none() {
            return Ok(());
        }
        self.inner.mark_dirty(&self.data);

        let mut events = PendingEvents::default();
        events.preference_changed(&self.data, key, old, None);
        events.fire();
        Ok(())
    }

    /// Remove every key of this node. Children are untouched.
    pub fn clear(&self) -> Result<()> {
        self.data.check_removed()?;
        self.inner.silent_load(&self.data)?;
        let old = {
            let mut state = lock(&self.data.state);
            if state.removed {
                return Err(Error::removed(&self.data.path));
            }
            std::mem::take(&mut state.values)
        };
        if old.is_empty() {
            return Ok(());
        }
        self.inner.mark_dirty(&self.data);

        let mut events = PendingEvents::default();
        for (key, value) in old {
            events.preference_changed(&self.data, &key, Some(value), None);
        }
        events.fire();
        Ok(())
    }

    /// Remove this node and its subtree.
    ///
    /// Children go first, so listeners see removals leaf to root. The node's
    /// backing stream (if it owns one) is deleted. The tree root and scope
    /// roots are never detached: their children are removed and their keys
    /// cleared instead.
    pub fn remove_node(&self) -> Result<()> {
        self.data.check_removed()?;
        self.prepare(&self.data)?;

        let names: Vec<String> = lock(&self.data.state).children.iter().cloned().collect();
        for name in names {
            if let Some(child) = self.inner.existing(&self.data.path.child(&name)) {
                let child = Node::from_data(self.inner.clone(), child);
                if !child.data.is_removed() {
                    child.remove_node()?;
                }
            }
        }

        if self.data.path.len() <= 1 {
            return self.clear();
        }

        // A flush in flight finishes before the stream is deleted and sees
        // the node removed afterwards.
        let purge_result = {
            let _guard = lock(&self.data.flush_lock);
            let result = self.inner.purge(&self.data);
            let mut state = lock(&self.data.state);
            if state.removed {
                return Ok(());
            }
            state.removed = true;
            state.values.clear();
            state.children.clear();
            result
        };

        let mut events = PendingEvents::default();
        if let Some(parent) = self
            .data
            .path
            .parent()
            .and_then(|p| self.inner.existing(&p))
        {
            lock(&parent.state).children.remove(self.name());
            self.inner.forget(&self.data);
            self.inner.mark_dirty(&parent);
            events.node_changed(NodeChangeKind::Removed, &parent, &self.data.path);
        } else {
            self.inner.forget(&self.data);
        }
        events.fire();

        purge_result
    }

    /// Write this node's part of the tree to its backing stream.
    ///
    /// Above the load level every child is flushed; below it the owning
    /// load-level node is flushed.
    pub fn flush(&self) -> Result<()> {
        self.data.check_removed()?;
        match self.inner.load_level(&self.data.path) {
            None => {
                let names: Vec<String> =
                    lock(&self.data.state).children.iter().cloned().collect();
                for name in names {
                    if let Some(child) = self.inner.existing(&self.data.path.child(&name)) {
                        Node::from_data(self.inner.clone(), child).flush()?;
                    }
                }
                Ok(())
            }
            Some(level) if level == self.data.path => self.inner.flush_load_level(&self.data),
            Some(level) => match self.inner.existing(&level) {
                Some(level) => self.inner.flush_load_level(&level),
                None => Ok(()),
            },
        }
    }

    /// Flush, then re-read the backing stream so later reads see what is
    /// stored.
    pub fn sync(&self) -> Result<()> {
        self.flush()?;
        match self.inner.load_level(&self.data.path) {
            None => {
                for name in self.children_names()? {
                    self.node(&name)?.sync()?;
                }
                Ok(())
            }
            Some(level) => {
                lock(&self.inner.loaded).remove(&level);
                self.inner.silent_load(&self.data)
            }
        }
    }

    /// Visit this node and its descendants, parents first. Returning
    /// `false` from the visitor skips the children of that node.
    pub fn accept(&self, visitor: &mut dyn FnMut(&Node) -> Result<bool>) -> Result<()> {
        self.data.check_removed()?;
        if !visitor(self)? {
            return Ok(());
        }
        for name in self.children_names()? {
            let child_path = self.data.path.child(&name);
            if let Some(child) = self.inner.existing(&child_path) {
                Node::from_data(self.inner.clone(), child).accept(visitor)?;
            }
        }
        Ok(())
    }

    pub fn add_node_change_listener(
        &self,
        listener: impl Fn(&NodeChangeEvent) + Send + Sync + 'static,
    ) -> Result<ListenerId> {
        self.data.check_removed()?;
        Ok(self.data.listeners.add_node_listener(Arc::new(listener)))
    }

    pub fn remove_node_change_listener(&self, id: ListenerId) -> Result<bool> {
        self.data.check_removed()?;
        Ok(self.data.listeners.remove_node_listener(id))
    }

    pub fn add_preference_change_listener(
        &self,
        listener: impl Fn(&PreferenceChangeEvent) + Send + Sync + 'static,
    ) -> Result<ListenerId> {
        self.data.check_removed()?;
        Ok(self.data.listeners.add_preference_listener(Arc::new(listener)))
    }

    pub fn remove_preference_change_listener(&self, id: ListenerId) -> Result<bool> {
        self.data.check_removed()?;
        Ok(self.data.listeners.remove_preference_listener(id))
    }

    /// Load the backing stream and discover stored children of `data`.
    fn prepare(&self, data: &Arc<NodeData>) -> Result<()> {
        self.inner.silent_load(data)?;
        if !data.children_initialized.swap(true, Ordering::AcqRel) {
            self.inner.initialize_children(data)?;
        }
        Ok(())
    }
}

/// Typed accessors. Values are stored as text; a stored value that does not
/// parse yields the default.
impl Node {
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(self.get(key, None)?.map_or(default, |v| parse_bool(&v, default)))
    }

    pub fn put_bool(&self, key: &str, value: bool) -> Result<()> {
        self.put(key, if value { "true" } else { "false" })
    }

    pub fn get_int(&self, key: &str, default: i32) -> Result<i32> {
        Ok(parse_or(self.get(key, None)?, default))
    }

    pub fn put_int(&self, key: &str, value: i32) -> Result<()> {
        self.put(key, &value.to_string())
    }

    pub fn get_long(&self, key: &str, default: i64) -> Result<i64> {
        Ok(parse_or(self.get(key, None)?, default))
    }

    pub fn put_long(&self, key: &str, value: i64) -> Result<()> {
        self.put(key, &value.to_string())
    }

    pub fn get_float(&self, key: &str, default: f32) -> Result<f32> {
        Ok(parse_or(self.get(key, None)?, default))
    }

    pub fn put_float(&self, key: &str, value: f32) -> Result<()> {
        self.put(key, &value.to_string())
    }

    pub fn get_double(&self, key: &str, default: f64) -> Result<f64> {
        Ok(parse_or(self.get(key, None)?, default))
    }

    pub fn put_double(&self, key: &str, value: f64) -> Result<()> {
        self.put(key, &value.to_string())
    }

    /// Byte arrays are stored as standard base64 text.
    pub fn get_byte_array(&self, key: &str, default: &[u8]) -> Result<Vec<u8>> {
        Ok(self
            .get(key, None)?
            .and_then(|v| BASE64.decode(v.as_bytes()).ok())
            .unwrap_or_else(|| default.to_vec()))
    }

    pub fn put_byte_array(&self, key: &str, value: &[u8]) -> Result<()> {
        self.put(key, &BASE64.encode(value))
    }
}

pub(crate) fn parse_bool(value: &str, default: bool) -> bool {
    if value.eq_ignore_ascii_case("true") {
        true
    } else if value.eq_ignore_ascii_case("false") {
        false
    } else {
        default
    }
}

pub(crate) fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl Eq for Node {}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.data.path.to_string())
            .finish()
    }
}
