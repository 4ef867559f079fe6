//! Scopes: the top-level subtrees of the preference tree and where their
//! files live.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{
    StoreConfig, CONFIGURATION_SCOPE, DEFAULT_SCOPE, INSTANCE_SCOPE, PROJECT_SCOPE,
};
use crate::defaults::DefaultsProvider;
use crate::error::Result;
use crate::node::Node;
use crate::path::NodePath;
use crate::store::PreferenceStore;

/// A named subtree rooted at `/<name>`.
///
/// A scope decides which nodes are persisted independently (the *load
/// level*) and where each of them is stored.
pub trait Scope: Send + Sync {
    fn name(&self) -> &str;

    /// Depth, counted in segments from the tree root, of the nodes that own
    /// a backing stream. `None` means nothing in the scope is persisted.
    fn load_level_depth(&self) -> Option<usize>;

    /// Location of the stream backing the load-level node at `load_level`.
    fn resolve_location(&self, load_level: &NodePath) -> Option<String>;

    /// Location whose preference files name the children of `path`.
    ///
    /// Only nodes above the load level whose children correspond to real
    /// storage (a settings directory) have one.
    fn children_location(&self, _path: &NodePath) -> Option<String> {
        None
    }

    /// Values given to `/<name>/<qualifier>` when it is created.
    fn initialize_defaults(&self, _qualifier: &str) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

/// File layout shared by the persisted built-in scopes.
#[derive(Debug, Clone)]
struct SettingsLayout {
    settings_dir: String,
    file_extension: String,
}

impl SettingsLayout {
    fn from_config(config: &StoreConfig) -> Self {
        Self {
            settings_dir: config.settings_dir.clone(),
            file_extension: config.file_extension.clone(),
        }
    }

    fn settings_location(&self, base: &str) -> String {
        if base.is_empty() {
            self.settings_dir.clone()
        } else {
            format!("{}/{}", base, self.settings_dir)
        }
    }

    fn file_location(&self, base: &str, qualifier: &str) -> String {
        format!(
            "{}/{}.{}",
            self.settings_location(base),
            qualifier,
            self.file_extension
        )
    }
}

/// The default scope: values come from a [`DefaultsProvider`] and are never
/// written anywhere.
pub struct DefaultScope {
    provider: Arc<dyn DefaultsProvider>,
}

impl DefaultScope {
    pub fn new(provider: Arc<dyn DefaultsProvider>) -> Self {
        Self { provider }
    }
}

impl Scope for DefaultScope {
    fn name(&self) -> &str {
        DEFAULT_SCOPE
    }

    fn load_level_depth(&self) -> Option<usize> {
        None
    }

    fn resolve_location(&self, _load_level: &NodePath) -> Option<String> {
        None
    }

    fn initialize_defaults(&self, qualifier: &str) -> BTreeMap<String, String> {
        self.provider.initialize_defaults(qualifier)
    }
}

/// A scope that stores one file per qualifier under a fixed base, such as
/// the instance and configuration scopes.
///
/// `/<name>/<qualifier>` is stored at `<base>/<settings_dir>/<qualifier>.<ext>`.
pub struct QualifierScope {
    name: String,
    base: String,
    layout: SettingsLayout,
}

impl QualifierScope {
    pub fn new(name: &str, base: &str, config: &StoreConfig) -> Self {
        Self {
            name: name.to_string(),
            base: base.trim_matches('/').to_string(),
            layout: SettingsLayout::from_config(config),
        }
    }

    pub fn instance(config: &StoreConfig) -> Self {
        Self::new(INSTANCE_SCOPE, &config.instance_base, config)
    }

    pub fn configuration(config: &StoreConfig) -> Self {
        Self::new(CONFIGURATION_SCOPE, &config.configuration_base, config)
    }
}

impl Scope for QualifierScope {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_level_depth(&self) -> Option<usize> {
        Some(2)
    }

    fn resolve_location(&self, load_level: &NodePath) -> Option<String> {
        if load_level.len() != 2 {
            return None;
        }
        Some(self.layout.file_location(&self.base, &load_level[1]))
    }

    fn children_location(&self, path: &NodePath) -> Option<String> {
        if path.len() != 1 {
            return None;
        }
        Some(self.layout.settings_location(&self.base))
    }
}

/// The project scope: `/project/<project>/<qualifier>` is stored at
/// `<projects_base>/<project>/<settings_dir>/<qualifier>.<ext>`.
pub struct ProjectScope {
    base: String,
    layout: SettingsLayout,
}

impl ProjectScope {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            base: config.projects_base.trim_matches('/').to_string(),
            layout: SettingsLayout::from_config(config),
        }
    }

    fn project_base(&self, project: &str) -> String {
        if self.base.is_empty() {
            project.to_string()
        } else {
            format!("{}/{}", self.base, project)
        }
    }
}

impl Scope for ProjectScope {
    fn name(&self) -> &str {
        PROJECT_SCOPE
    }

    fn load_level_depth(&self) -> Option<usize> {
        Some(3)
    }

    fn resolve_location(&self, load_level: &NodePath) -> Option<String> {
        if load_level.len() != 3 {
            return None;
        }
        Some(
            self.layout
                .file_location(&self.project_base(&load_level[1]), &load_level[2]),
        )
    }

    fn children_location(&self, path: &NodePath) -> Option<String> {
        if path.len() != 2 {
            return None;
        }
        Some(self.layout.settings_location(&self.project_base(&path[1])))
    }
}

/// Names a scope for lookups, optionally bound to a node below the scope
/// root (a project).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeContext {
    name: String,
    base: NodePath,
}

impl ScopeContext {
    /// A context for any registered scope, rooted at `/<name>`.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            base: NodePath::root().child(name),
        }
    }

    pub fn instance() -> Self {
        Self::named(INSTANCE_SCOPE)
    }

    pub fn configuration() -> Self {
        Self::named(CONFIGURATION_SCOPE)
    }

    pub fn default_scope() -> Self {
        Self::named(DEFAULT_SCOPE)
    }

    /// The project scope of one project: `/project/<project>`.
    pub fn project(project: &str) -> Self {
        Self {
            name: PROJECT_SCOPE.to_string(),
            base: NodePath::root().child(PROJECT_SCOPE).child(project),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node holding `qualifier` in this context.
    pub fn node(&self, store: &PreferenceStore, qualifier: &str) -> Result<Node> {
        store.root().node(&self.base.to_string())?.node(qualifier)
    }
}
