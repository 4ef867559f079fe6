//! Change notification.
//!
//! Each node carries two ordered listener lists. Dispatch copies the list
//! first, so listeners added or removed by a running listener only affect
//! later events. No store lock is held while a listener runs.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::store::lock;

/// Whether a child node appeared or went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeChangeKind {
    Added,
    Removed,
}

/// A child was added to or removed from `parent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeChangeEvent {
    pub kind: NodeChangeKind,
    /// Absolute path of the parent node.
    pub parent: String,
    /// Absolute path of the child node.
    pub child: String,
}

/// A key on `node` changed. `None` means absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceChangeEvent {
    pub node: String,
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

pub type NodeChangeListener = Arc<dyn Fn(&NodeChangeEvent) + Send + Sync>;
pub type PreferenceChangeListener = Arc<dyn Fn(&PreferenceChangeEvent) + Send + Sync>;

/// Handle returned on registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    fn next() -> Self {
        ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    node: Mutex<Vec<(ListenerId, NodeChangeListener)>>,
    preference: Mutex<Vec<(ListenerId, PreferenceChangeListener)>>,
}

impl ListenerRegistry {
    pub(crate) fn add_node_listener(&self, listener: NodeChangeListener) -> ListenerId {
        let id = ListenerId::next();
        lock(&self.node).push((id, listener));
        id
    }

    pub(crate) fn remove_node_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.node);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub(crate) fn add_preference_listener(&self, listener: PreferenceChangeListener) -> ListenerId {
        let id = ListenerId::next();
        lock(&self.preference).push((id, listener));
        id
    }

    pub(crate) fn remove_preference_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.preference);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub(crate) fn fire_node_event(&self, event: &NodeChangeEvent) {
        let snapshot: Vec<NodeChangeListener> =
            lock(&self.node).iter().map(|(_, l)| l.clone()).collect();
        for listener in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                log::error!(
                    "Node change listener panicked handling {:?} of {}",
                    event.kind,
                    event.child
                );
            }
        }
    }

    pub(crate) fn fire_preference_event(&self, event: &PreferenceChangeEvent) {
        let snapshot: Vec<PreferenceChangeListener> = lock(&self.preference)
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                log::error!(
                    "Preference change listener panicked handling {} on {}",
                    event.key,
                    event.node
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(key: &str) -> PreferenceChangeEvent {
        PreferenceChangeEvent {
            node: "/instance/q".to_string(),
            key: key.to_string(),
            old_value: None,
            new_value: Some("v".to_string()),
        }
    }

    #[test]
    fn dispatch_in_registration_order() {
        let registry = ListenerRegistry::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            registry.add_preference_listener(Arc::new(move |e: &PreferenceChangeEvent| {
                seen.lock().unwrap().push(format!("{}:{}", tag, e.key));
            }));
        }

        registry.fire_preference_event(&event("k"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:k", "second:k", "third:k"]
        );
    }

    #[test]
    fn removal_by_id() {
        let registry = ListenerRegistry::default();
        let count = Arc::new(AtomicU64::new(0));

        let c = count.clone();
        let id = registry.add_node_listener(Arc::new(move |_: &NodeChangeEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        let e = NodeChangeEvent {
            kind: NodeChangeKind::Added,
            parent: "/".to_string(),
            child: "/a".to_string(),
        };

        registry.fire_node_event(&e);
        assert!(registry.remove_node_listener(id));
        assert!(!registry.remove_node_listener(id));
        registry.fire_node_event(&e);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_removed_during_dispatch_still_runs_this_time() {
        let registry = Arc::new(ListenerRegistry::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let second_id = Arc::new(Mutex::new(None));

        {
            let registry_ref = Arc::downgrade(&registry);
            let second_id = second_id.clone();
            let seen = seen.clone();
            registry.add_preference_listener(Arc::new(move |_: &PreferenceChangeEvent| {
                seen.lock().unwrap().push("first");
                if let (Some(registry), Some(id)) =
                    (registry_ref.upgrade(), *second_id.lock().unwrap())
                {
                    registry.remove_preference_listener(id);
                }
            }));
        }
        {
            let seen = seen.clone();
            let id = registry.add_preference_listener(Arc::new(move |_: &PreferenceChangeEvent| {
                seen.lock().unwrap().push("second");
            }));
            *second_id.lock().unwrap() = Some(id);
        }

        registry.fire_preference_event(&event("a"));
        registry.fire_preference_event(&event("b"));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "first"]);
    }

    #[test]
    fn panicking_listener_does_not_stop_delivery() {
        let registry = ListenerRegistry::default();
        let delivered = Arc::new(AtomicU64::new(0));

        registry.add_preference_listener(Arc::new(|_: &PreferenceChangeEvent| {
            panic!("listener failure");
        }));
        let d = delivered.clone();
        registry.add_preference_listener(Arc::new(move |_: &PreferenceChangeEvent| {
            d.fetch_add(1, Ordering::SeqCst);
        }));

        registry.fire_preference_event(&event("k"));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }
}
