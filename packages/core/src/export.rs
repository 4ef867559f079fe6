//! Export and import of preference subtrees.
//!
//! The export stream is a properties file of absolute tokens plus two kinds
//! of markers: a `file_export_version` entry and one `!<path>` entry per
//! export root. Applying a tree synchronizes every export root destructively:
//! live keys missing from the import are removed.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::codec::{decode_path, encode_path};
use crate::config::{DEFAULT_SCOPE, INSTANCE_SCOPE};
use crate::error::{Error, Result};
use crate::filter::PreferenceFilter;
use crate::node::Node;
use crate::path::NodePath;
use crate::properties;
use crate::store::PreferenceStore;

pub const EXPORT_VERSION_KEY: &str = "file_export_version";
pub const EXPORT_VERSION: &str = "3.0";
const EXPORT_ROOT_PREFIX: char = '!';
const BUNDLE_VERSION_PREFIX: char = '@';

/// Values captured for one node of an export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportedNode {
    pub values: BTreeMap<String, String>,
    pub export_root: bool,
}

/// A detached tree of exported preferences.
///
/// Reading or building one never touches a live store; [`PreferenceStore::apply`]
/// replays it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportedPreferences {
    nodes: BTreeMap<NodePath, ExportedNode>,
}

impl ExportedPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, path: &NodePath, key: &str, value: &str) {
        self.nodes
            .entry(path.clone())
            .or_default()
            .values
            .insert(key.to_string(), value.to_string());
    }

    pub fn mark_export_root(&mut self, path: &NodePath) {
        self.nodes.entry(path.clone()).or_default().export_root = true;
    }

    pub fn get(&self, path: &NodePath) -> Option<&ExportedNode> {
        self.nodes.get(path)
    }

    pub fn export_roots(&self) -> impl Iterator<Item = &NodePath> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.export_root)
            .map(|(path, _)| path)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&NodePath, &ExportedNode)> {
        self.nodes.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The stream entries for this tree. Empty for an empty tree.
    pub fn to_entries(&self) -> BTreeMap<String, String> {
        let mut entries = BTreeMap::new();
        if self.is_empty() {
            return entries;
        }
        entries.insert(EXPORT_VERSION_KEY.to_string(), EXPORT_VERSION.to_string());
        for (path, node) in &self.nodes {
            if node.export_root {
                entries.insert(format!("{}{}", EXPORT_ROOT_PREFIX, path), String::new());
            }
            let prefix = if path.is_root() {
                String::new()
            } else {
                path.to_string()
            };
            for (key, value) in &node.values {
                entries.insert(encode_path(&prefix, key), value.clone());
            }
        }
        entries
    }

    /// Write the tree as a properties stream; an empty tree writes nothing.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let text = properties::store(&self.to_entries(), "\n");
        writer.write_all(text.as_bytes())?;
        Ok(())
    }

    fn from_current(entries: BTreeMap<String, String>) -> Result<Self> {
        let mut tree = Self::new();
        for (token, value) in entries {
            if token == EXPORT_VERSION_KEY || token.starts_with(BUNDLE_VERSION_PREFIX) {
                continue;
            }
            if let Some(path) = token.strip_prefix(EXPORT_ROOT_PREFIX) {
                tree.mark_export_root(&import_path(path)?);
                continue;
            }
            let (path, key) = decode_path(&token);
            tree.put(&import_path(&path)?, &key, &value);
        }
        Ok(tree)
    }

    /// Streams from older writers carry `qualifier=version` and
    /// `qualifier/key=value` entries, all for the instance scope.
    fn from_legacy(entries: BTreeMap<String, String>) -> Result<Self> {
        let scope = NodePath::root().child(INSTANCE_SCOPE);
        let mut tree = Self::new();
        for (token, value) in entries {
            if token.starts_with('/') || token.starts_with(EXPORT_ROOT_PREFIX) {
                return Err(Error::MalformedImport {
                    message: format!("unexpected entry '{}' in legacy preference stream", token),
                });
            }
            match token.split_once('/') {
                Some((qualifier, key)) => tree.put(&scope.child(qualifier), key, &value),
                None => tree.mark_export_root(&scope.child(&token)),
            }
        }
        Ok(tree)
    }
}

fn import_path(path: &str) -> Result<NodePath> {
    NodePath::parse(path).map_err(|e| Error::MalformedImport {
        message: e.to_string(),
    })
}

/// An exclusion matches a candidate equal to it or nested below it.
/// A leading `/` on the exclusion is ignored, and an empty exclusion matches
/// everything.
fn is_excluded(candidate: &str, excludes: &[&str]) -> bool {
    excludes.iter().any(|exclude| {
        let exclude = exclude.strip_prefix('/').unwrap_or(exclude);
        exclude.is_empty()
            || candidate == exclude
            || candidate
                .strip_prefix(exclude)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

fn in_default_scope(path: &NodePath) -> bool {
    path.iter().next().is_some_and(|s| s == DEFAULT_SCOPE)
}

impl PreferenceStore {
    /// Export the subtree of `node`, skipping paths and tokens that match
    /// `excludes`. The default scope is only exported when `node` is in it.
    pub fn export(&self, node: &Node, excludes: &[&str]) -> Result<ExportedPreferences> {
        let base = node.path().clone();
        let skip_defaults = !in_default_scope(&base);
        let mut tree = ExportedPreferences::new();

        node.accept(&mut |current| {
            let path = current.path();
            if skip_defaults && in_default_scope(path) {
                return Ok(false);
            }
            let relative = path
                .strip_prefix(&base)
                .map(|p| p.relative())
                .unwrap_or_default();
            if is_excluded(&relative, excludes) {
                return Ok(false);
            }
            for key in current.keys()? {
                if is_excluded(&encode_path(&relative, &key), excludes) {
                    continue;
                }
                if let Some(value) = current.get(&key, None)? {
                    tree.put(path, &key, &value);
                }
            }
            Ok(true)
        })?;

        if !tree.is_empty() {
            tree.mark_export_root(&base);
        }
        log::debug!("Exported {} nodes below {}", tree.nodes.len(), base);
        Ok(tree)
    }

    pub fn export_to<W: Write + ?Sized>(
        &self,
        node: &Node,
        writer: &mut W,
        excludes: &[&str],
    ) -> Result<()> {
        self.export(node, excludes)?.write_to(writer)
    }

    /// Export what `filters` select at or below `node`.
    ///
    /// For each selected scope, the walk starts at the scope root, or at
    /// `node` when it lies inside that scope; the start is marked as an
    /// export root when it contributed a key.
    pub fn export_filtered(
        &self,
        node: &Node,
        filters: &[PreferenceFilter],
    ) -> Result<ExportedPreferences> {
        let mut tree = ExportedPreferences::new();
        for filter in filters {
            for scope in filter.scopes() {
                let scope_path = NodePath::root().child(scope);
                let start = if node.path().has_prefix(&scope_path) {
                    node.clone()
                } else if scope_path.has_prefix(node.path()) {
                    match self.inner.existing(&scope_path) {
                        Some(data) => Node::from_data(self.inner.clone(), data),
                        None => continue,
                    }
                } else {
                    continue;
                };

                let qualifier_index = self.inner.qualifier_index(scope);
                let mut contributed = false;
                start.accept(&mut |current| {
                    let path = current.path();
                    let qualifier = path.iter().nth(qualifier_index).map(String::as_str);
                    if !filter.covers(scope, qualifier) {
                        return Ok(false);
                    }
                    for key in current.keys()? {
                        if !filter.selects(scope, qualifier, &key) {
                            continue;
                        }
                        if let Some(value) = current.get(&key, None)? {
                            tree.put(path, &key, &value);
                            contributed = true;
                        }
                    }
                    Ok(true)
                })?;

                if contributed {
                    tree.mark_export_root(start.path());
                }
            }
        }
        Ok(tree)
    }

    pub fn export_filtered_to<W: Write + ?Sized>(
        &self,
        node: &Node,
        writer: &mut W,
        filters: &[PreferenceFilter],
    ) -> Result<()> {
        self.export_filtered(node, filters)?.write_to(writer)
    }

    /// The filters selecting at least one key at or below `node`.
    pub fn matches<'a>(
        &self,
        node: &Node,
        filters: &'a [PreferenceFilter],
    ) -> Result<Vec<&'a PreferenceFilter>> {
        let mut matching = Vec::new();
        for filter in filters {
            if !self
                .export_filtered(node, std::slice::from_ref(filter))?
                .is_empty()
            {
                matching.push(filter);
            }
        }
        Ok(matching)
    }

    /// Parse an export stream, upgrading the legacy format when the version
    /// marker is absent.
    pub fn read_preferences(&self, bytes: &[u8]) -> Result<ExportedPreferences> {
        let entries = properties::parse(&properties::decode_bytes(bytes)).map_err(|e| {
            Error::MalformedImport {
                message: e.to_string(),
            }
        })?;
        if entries.is_empty() {
            return Err(Error::MalformedImport {
                message: "preference stream is empty".to_string(),
            });
        }
        if entries.contains_key(EXPORT_VERSION_KEY) {
            ExportedPreferences::from_current(entries)
        } else {
            log::info!("Converting legacy preference stream");
            ExportedPreferences::from_legacy(entries)
        }
    }

    /// Replay `tree` onto the live store and flush what changed.
    pub fn apply(&self, tree: &ExportedPreferences) -> Result<()> {
        self.apply_tree(tree, None, true)
    }

    /// Like [`apply`](Self::apply), restricted to what `filters` select.
    /// Live keys outside the selection are left alone.
    pub fn apply_filtered(
        &self,
        tree: &ExportedPreferences,
        filters: &[PreferenceFilter],
    ) -> Result<()> {
        self.apply_tree(tree, Some(filters), true)
    }

    pub fn import_preferences(&self, bytes: &[u8]) -> Result<()> {
        let tree = self.read_preferences(bytes)?;
        self.apply(&tree)
    }

    pub fn import_from<R: Read + ?Sized>(&self, reader: &mut R) -> Result<()> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        self.import_preferences(&bytes)
    }

    pub(crate) fn apply_tree(
        &self,
        tree: &ExportedPreferences,
        filters: Option<&[PreferenceFilter]>,
        flush: bool,
    ) -> Result<()> {
        // `None` marks a live key the import does not carry.
        let mut working: BTreeMap<NodePath, BTreeMap<String, Option<String>>> = tree
            .nodes()
            .map(|(path, node)| {
                let values = node
                    .values
                    .iter()
                    .filter(|(key, _)| self.selected(path, key, filters))
                    .map(|(key, value)| (key.clone(), Some(value.clone())))
                    .collect();
                (path.clone(), values)
            })
            .collect();

        for root in tree.export_roots() {
            let live = Node::from_data(self.inner.clone(), self.inner.node_at(root)?);
            live.accept(&mut |current| {
                let path = current.path();
                if in_default_scope(path) {
                    return Ok(false);
                }
                let keys = current.keys()?;
                let pending = working.entry(path.clone()).or_default();
                for key in keys {
                    if !pending.contains_key(&key) && self.selected(path, &key, filters) {
                        pending.insert(key, None);
                    }
                }
                Ok(true)
            })?;
        }

        let mut touched = Vec::new();
        for (path, values) in working {
            if values.is_empty() {
                continue;
            }
            let node = Node::from_data(self.inner.clone(), self.inner.node_at(&path)?);
            for (key, value) in values {
                match value {
                    Some(value) => node.put(&key, &value)?,
                    None => node.remove(&key)?,
                }
            }
            touched.push(node);
        }

        log::debug!("Applied preferences to {} nodes", touched.len());
        if flush {
            for node in touched {
                node.flush()?;
            }
        }
        Ok(())
    }

    fn selected(&self, path: &NodePath, key: &str, filters: Option<&[PreferenceFilter]>) -> bool {
        let filters = match filters {
            Some(filters) => filters,
            None => return true,
        };
        let scope = match path.iter().next() {
            Some(scope) => scope,
            None => return false,
        };
        let qualifier = path
            .iter()
            .nth(self.inner.qualifier_index(scope))
            .map(String::as_str);
        filters.iter().any(|f| f.selects(scope, qualifier, key))
    }
}
