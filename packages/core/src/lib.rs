//! Hierarchical, multi-scope preferences.
//!
//! A [`PreferenceStore`] holds a tree of named nodes with string key/value
//! pairs. The first level below the root names a scope:
//!
//! - `/default/<qualifier>` - defaults supplied by a [`DefaultsProvider`], never persisted
//! - `/instance/<qualifier>` and `/configuration/<qualifier>` - one file per qualifier
//! - `/project/<project>/<qualifier>` - one file per project and qualifier
//!
//! Nodes at a scope's load level are read lazily from their backing stream
//! and written back by [`Node::flush`]. Lookups across scopes follow a
//! configurable order, and whole subtrees can be exported and re-applied.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use prefstore_backing::MemoryBackingStore;
//! use prefstore_core::{PreferenceStore, ScopeContext};
//!
//! let store = PreferenceStore::new(Arc::new(MemoryBackingStore::new()));
//! store.node("/default/org.example").unwrap().put_int("size", 10).unwrap();
//! store.node("/project/p1/org.example").unwrap().put_int("size", 12).unwrap();
//!
//! let contexts = [Some(ScopeContext::project("p1"))];
//! assert_eq!(store.get_int("org.example", "size", 0, &contexts).unwrap(), 12);
//! assert_eq!(store.get_int("org.example", "size", 0, &[]).unwrap(), 10);
//! ```

pub mod codec;
mod config;
mod defaults;
mod error;
mod export;
mod filter;
mod listener;
mod lookup;
mod node;
mod path;
mod persistence;
pub mod properties;
mod scope;
mod store;

pub use config::{
    StoreConfig, CONFIGURATION_SCOPE, DEFAULT_SCOPE, INSTANCE_SCOPE, PROJECT_SCOPE,
};
pub use defaults::{CustomizationDefaults, DefaultsProvider, MapDefaults, NoDefaults};
pub use error::{Error, Result};
pub use export::{ExportedNode, ExportedPreferences, EXPORT_VERSION, EXPORT_VERSION_KEY};
pub use filter::{FilterEntry, MatchType, PreferenceFilter, QualifierMapping};
pub use listener::{
    ListenerId, NodeChangeEvent, NodeChangeKind, NodeChangeListener, PreferenceChangeEvent,
    PreferenceChangeListener,
};
pub use node::Node;
pub use path::{NodePath, PathError};
pub use scope::{DefaultScope, ProjectScope, QualifierScope, Scope, ScopeContext};
pub use store::PreferenceStore;

// Re-export backing types for convenience
pub use prefstore_backing::{BackingError, BackingStore, LocalDiskBackingStore, MemoryBackingStore};
