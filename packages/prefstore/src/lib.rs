//! prefstore: hierarchical, multi-scope preferences.
//!
//! Preferences live in a tree of nodes holding string key/value pairs. The
//! tree spans parallel scopes (default, instance, configuration, project),
//! each lazily backed by properties files, with change listeners, dirty
//! tracking and an import/export format.
//!
//! The crates are layered:
//!
//! - [`backing`] moves whole byte streams to and from storage
//! - [`store`] is the preference tree, lookups and import/export
//!
//! The commonly used types are re-exported at the top level.

pub use prefstore_backing as backing;
pub use prefstore_core as store;

pub use prefstore_backing::{BackingError, BackingStore, LocalDiskBackingStore, MemoryBackingStore};
pub use prefstore_core::{
    CustomizationDefaults, DefaultsProvider, Error, ExportedPreferences, FilterEntry, MapDefaults,
    MatchType, Node, NodeChangeEvent, NodeChangeKind, PreferenceChangeEvent, PreferenceFilter,
    PreferenceStore, Result, Scope, ScopeContext, StoreConfig,
};
