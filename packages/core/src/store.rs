//! The preference store: owns the node arena, the registered scopes, the
//! loaded-path set and the lookup-order registry.
//!
//! Nodes live in a flat map keyed by absolute path. Parents are found by
//! path, never by pointer, and a [`Node`] is a cheap handle onto one entry.
//!
//! # Locking
//!
//! There is no tree-wide lock. Each node has its own state mutex; the arena
//! index, the loaded set and each listener list have their own locks too.
//! A thread holds at most one node state lock at a time, may take the arena
//! index lock while holding it, and never takes a node state lock while
//! holding the index. Listeners are invoked after every lock is released.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use prefstore_backing::BackingStore;

use crate::codec::decode_path;
use crate::config::StoreConfig;
use crate::defaults::{DefaultsProvider, NoDefaults};
use crate::error::{Error, Result};
use crate::listener::{
    ListenerRegistry, NodeChangeEvent, NodeChangeKind, PreferenceChangeEvent,
};
use crate::lookup::LookupService;
use crate::node::Node;
use crate::path::NodePath;
use crate::scope::{DefaultScope, ProjectScope, QualifierScope, Scope};

/// Store locks guard plain data that stays consistent across a panic, so a
/// poisoned lock is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub(crate) struct NodeState {
    pub(crate) values: BTreeMap<String, String>,
    pub(crate) children: BTreeSet<String>,
    pub(crate) dirty: bool,
    pub(crate) removed: bool,
}

pub(crate) struct NodeData {
    pub(crate) path: NodePath,
    pub(crate) state: Mutex<NodeState>,
    pub(crate) listeners: ListenerRegistry,
    /// Serializes lazy loads of a load-level node.
    pub(crate) load_lock: Mutex<()>,
    /// Serializes flushes of a load-level node.
    pub(crate) flush_lock: Mutex<()>,
    /// Set while an external change is being applied; flushes are skipped.
    pub(crate) reading: AtomicBool,
    /// Set while the node is being written; external change notices are ignored.
    pub(crate) writing: AtomicBool,
    pub(crate) children_initialized: AtomicBool,
}

impl NodeData {
    fn new(path: NodePath, values: BTreeMap<String, String>) -> Self {
        Self {
            path,
            state: Mutex::new(NodeState {
                values,
                ..NodeState::default()
            }),
            listeners: ListenerRegistry::default(),
            load_lock: Mutex::new(()),
            flush_lock: Mutex::new(()),
            reading: AtomicBool::new(false),
            writing: AtomicBool::new(false),
            children_initialized: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_removed(&self) -> bool {
        lock(&self.state).removed
    }

    pub(crate) fn check_removed(&self) -> Result<()> {
        if self.is_removed() {
            Err(Error::removed(&self.path))
        } else {
            Ok(())
        }
    }
}

enum Pending {
    Node(Arc<NodeData>, NodeChangeEvent),
    Preference(Arc<NodeData>, PreferenceChangeEvent),
}

/// Events collected while locks are held, delivered by [`PendingEvents::fire`].
#[derive(Default)]
pub(crate) struct PendingEvents {
    events: Vec<Pending>,
}

impl PendingEvents {
    pub(crate) fn node_changed(
        &mut self,
        kind: NodeChangeKind,
        parent: &Arc<NodeData>,
        child: &NodePath,
    ) {
        self.events.push(Pending::Node(
            parent.clone(),
            NodeChangeEvent {
                kind,
                parent: parent.path.to_string(),
                child: child.to_string(),
            },
        ));
    }

    pub(crate) fn preference_changed(
        &mut self,
        node: &Arc<NodeData>,
        key: &str,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        self.events.push(Pending::Preference(
            node.clone(),
            PreferenceChangeEvent {
                node: node.path.to_string(),
                key: key.to_string(),
                old_value,
                new_value,
            },
        ));
    }

    pub(crate) fn fire(self) {
        for pending in self.events {
            match pending {
                Pending::Node(target, event) => target.listeners.fire_node_event(&event),
                Pending::Preference(target, event) => {
                    target.listeners.fire_preference_event(&event)
                }
            }
        }
    }
}

pub(crate) struct StoreInner {
    pub(crate) config: StoreConfig,
    pub(crate) backing: Arc<dyn BackingStore>,
    root: Arc<NodeData>,
    nodes: RwLock<HashMap<NodePath, Arc<NodeData>>>,
    scopes: RwLock<BTreeMap<String, Arc<dyn Scope>>>,
    /// Load-level paths whose backing stream has been read.
    pub(crate) loaded: Mutex<HashSet<NodePath>>,
    pub(crate) lookup: LookupService,
}

impl StoreInner {
    pub(crate) fn existing(&self, path: &NodePath) -> Option<Arc<NodeData>> {
        read(&self.nodes).get(path).cloned()
    }

    pub(crate) fn root_data(&self) -> Arc<NodeData> {
        self.root.clone()
    }

    /// Detach `data` from the arena if it is still the entry for its path.
    pub(crate) fn forget(&self, data: &Arc<NodeData>) {
        let mut nodes = write(&self.nodes);
        if nodes
            .get(&data.path)
            .is_some_and(|current| Arc::ptr_eq(current, data))
        {
            nodes.remove(&data.path);
        }
    }

    /// All arena entries, for scans that map locations back to nodes.
    pub(crate) fn all_nodes(&self) -> Vec<Arc<NodeData>> {
        read(&self.nodes).values().cloned().collect()
    }

    pub(crate) fn scope_for(&self, path: &NodePath) -> Option<Arc<dyn Scope>> {
        let name = path.iter().next()?;
        read(&self.scopes).get(name).cloned()
    }

    /// The load-level ancestor of `path` (possibly `path` itself), or `None`
    /// when `path` sits above the load level or in an unpersisted scope.
    pub(crate) fn load_level(&self, path: &NodePath) -> Option<NodePath> {
        let depth = self.scope_for(path)?.load_level_depth()?;
        if path.len() < depth {
            None
        } else {
            Some(path.slice(0, depth))
        }
    }

    /// Segment index holding the qualifier for paths in the named scope.
    pub(crate) fn qualifier_index(&self, scope: &str) -> usize {
        read(&self.scopes)
            .get(scope)
            .and_then(|s| s.load_level_depth())
            .map(|depth| depth - 1)
            .unwrap_or(1)
    }

    /// Get or create the child `name` of `parent`.
    pub(crate) fn child(
        &self,
        parent: &Arc<NodeData>,
        name: &str,
        events: &mut PendingEvents,
    ) -> Result<Arc<NodeData>> {
        let path = parent.path.child(name);
        if let Some(existing) = self.existing_child(parent, &path)? {
            return Ok(existing);
        }

        let mut values = BTreeMap::new();
        let mut deferred_defaults = Vec::new();
        if parent.path.len() == 1 {
            if let Some(scope) = self.scope_for(&parent.path) {
                for (token, value) in scope.initialize_defaults(name) {
                    let (relative, key) = decode_path(&token);
                    if relative.is_empty() {
                        values.insert(key, value);
                    } else {
                        deferred_defaults.push((relative, key, value));
                    }
                }
            }
        }

        let data = {
            let mut state = lock(&parent.state);
            if state.removed {
                return Err(Error::removed(&parent.path));
            }
            if state.children.contains(name) {
                if let Some(existing) = self.existing(&path) {
                    return Ok(existing);
                }
            }

            let data = Arc::new(NodeData::new(path.clone(), values));
            state.children.insert(name.to_string());
            write(&self.nodes).insert(path.clone(), data.clone());
            data
        };
        events.node_changed(NodeChangeKind::Added, parent, &path);

        for (relative, key, value) in deferred_defaults {
            let target = self.descend(&data, &relative, events)?;
            lock(&target.state).values.insert(key, value);
        }
        Ok(data)
    }

    /// The child at `path` if `parent` already lists it.
    pub(crate) fn existing_child(
        &self,
        parent: &Arc<NodeData>,
        path: &NodePath,
    ) -> Result<Option<Arc<NodeData>>> {
        let state = lock(&parent.state);
        if state.removed {
            return Err(Error::removed(&parent.path));
        }
        if state.children.contains(path.name()) {
            Ok(self.existing(path))
        } else {
            Ok(None)
        }
    }

    /// Walk `relative` (a `/`-separated path, empty segments ignored) from
    /// `start`, creating nodes as needed.
    pub(crate) fn descend(
        &self,
        start: &Arc<NodeData>,
        relative: &str,
        events: &mut PendingEvents,
    ) -> Result<Arc<NodeData>> {
        let mut current = start.clone();
        for name in relative.split('/').filter(|s| !s.is_empty()) {
            current = self.child(&current, name, events)?;
        }
        Ok(current)
    }

    /// Get or create the node at an absolute path.
    pub(crate) fn node_at(&self, path: &NodePath) -> Result<Arc<NodeData>> {
        if let Some(existing) = self.existing(path) {
            return Ok(existing);
        }
        let mut events = PendingEvents::default();
        let root = self.root_data();
        let result = self.descend(&root, &path.relative(), &mut events);
        events.fire();
        result
    }

    /// Mark `data` and every ancestor dirty, one lock at a time.
    pub(crate) fn mark_dirty(&self, data: &Arc<NodeData>) {
        lock(&data.state).dirty = true;
        let mut current = data.path.parent();
        while let Some(path) = current {
            if let Some(ancestor) = self.existing(&path) {
                lock(&ancestor.state).dirty = true;
            }
            current = path.parent();
        }
    }
}

/// A hierarchical, multi-scope preference store.
///
/// Cloning is cheap; clones share the same tree.
///
/// ```rust
/// use std::sync::Arc;
/// use prefstore_backing::MemoryBackingStore;
/// use prefstore_core::PreferenceStore;
///
/// let store = PreferenceStore::new(Arc::new(MemoryBackingStore::new()));
/// let node = store.node("/instance/org.example").unwrap();
/// node.put("greeting", "hello").unwrap();
/// node.flush().unwrap();
///
/// assert_eq!(
///     store.get_string("org.example", "greeting", None, &[]).unwrap(),
///     Some("hello".to_string())
/// );
/// ```
#[derive(Clone)]
pub struct PreferenceStore {
    pub(crate) inner: Arc<StoreInner>,
}

impl PreferenceStore {
    /// A store with the default configuration and no default values.
    pub fn new(backing: Arc<dyn BackingStore>) -> Self {
        Self::with_config(backing, StoreConfig::default(), Arc::new(NoDefaults))
    }

    /// A store with the built-in scopes laid out according to `config`.
    pub fn with_config(
        backing: Arc<dyn BackingStore>,
        config: StoreConfig,
        defaults: Arc<dyn DefaultsProvider>,
    ) -> Self {
        let root = Arc::new(NodeData::new(NodePath::root(), BTreeMap::new()));
        let mut nodes = HashMap::new();
        nodes.insert(NodePath::root(), root.clone());

        let mut scopes: BTreeMap<String, Arc<dyn Scope>> = BTreeMap::new();
        let builtin: [Arc<dyn Scope>; 4] = [
            Arc::new(DefaultScope::new(defaults)),
            Arc::new(QualifierScope::instance(&config)),
            Arc::new(QualifierScope::configuration(&config)),
            Arc::new(ProjectScope::new(&config)),
        ];
        for scope in builtin {
            let path = NodePath::root().child(scope.name());
            lock(&root.state).children.insert(scope.name().to_string());
            nodes.insert(path.clone(), Arc::new(NodeData::new(path, BTreeMap::new())));
            scopes.insert(scope.name().to_string(), scope);
        }

        let lookup = LookupService::new(config.default_lookup_order.clone());
        Self {
            inner: Arc::new(StoreInner {
                config,
                backing,
                root,
                nodes: RwLock::new(nodes),
                scopes: RwLock::new(scopes),
                loaded: Mutex::new(HashSet::new()),
                lookup,
            }),
        }
    }

    /// Register an additional scope, replacing any scope with the same name.
    ///
    /// The scope root `/<name>` is created if missing and listed as a child
    /// of the tree root. Nodes already created under that name keep their
    /// contents but are loaded and flushed through the new scope from now on.
    pub fn register_scope(&self, scope: Arc<dyn Scope>) -> Result<()> {
        let name = scope.name().to_string();
        check_scope_name(&name)?;
        log::debug!("Registering preference scope '{}'", name);
        write(&self.inner.scopes).insert(name.clone(), scope);
        self.inner.node_at(&NodePath::root().child(&name))?;
        Ok(())
    }

    pub fn scope_names(&self) -> Vec<String> {
        read(&self.inner.scopes).keys().cloned().collect()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// The tree root, `/`.
    pub fn root(&self) -> Node {
        Node::from_data(self.inner.clone(), self.inner.root_data())
    }

    /// The node at an absolute path, created if missing.
    pub fn node(&self, path: &str) -> Result<Node> {
        let path = NodePath::parse(path)?;
        Ok(Node::from_data(self.inner.clone(), self.inner.node_at(&path)?))
    }

    /// The root node of a scope, `/<name>`.
    pub fn scope_root(&self, name: &str) -> Result<Node> {
        check_scope_name(name)?;
        self.root().node(name)
    }
}

fn check_scope_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(Error::invalid_argument(format!(
            "'{}' is not a scope name",
            name
        )));
    }
    Ok(())
}

impl std::fmt::Debug for PreferenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferenceStore")
            .field("scopes", &self.scope_names())
            .finish()
    }
}
