//! Cross-scope lookups.
//!
//! A lookup for `(qualifier, key)` walks the scopes of its lookup order and
//! returns the first value found. Orders can be overridden per qualifier or
//! per `(qualifier, key)`; the most specific registration wins.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::codec::{decode_path, make_relative};
use crate::error::{Error, Result};
use crate::node::{parse_bool, parse_or, Node};
use crate::scope::ScopeContext;
use crate::store::{read, write, PreferenceStore};

type OrderKey = (String, Option<String>);

pub(crate) struct LookupService {
    builtin: Vec<String>,
    orders: RwLock<HashMap<OrderKey, Vec<String>>>,
}

impl LookupService {
    pub(crate) fn new(builtin: Vec<String>) -> Self {
        Self {
            builtin,
            orders: RwLock::new(HashMap::new()),
        }
    }

    fn set(&self, qualifier: &str, key: Option<&str>, order: Option<Vec<String>>) -> Result<()> {
        if qualifier.is_empty() {
            return Err(Error::invalid_argument("lookup order qualifier must not be empty"));
        }
        let entry = (qualifier.to_string(), key.map(str::to_string));
        match order {
            Some(order) => {
                if order.iter().any(String::is_empty) {
                    return Err(Error::invalid_argument(format!(
                        "lookup order for {} contains an empty scope name",
                        qualifier
                    )));
                }
                write(&self.orders).insert(entry, order);
            }
            None => {
                write(&self.orders).remove(&entry);
            }
        }
        Ok(())
    }

    fn exact(&self, qualifier: &str, key: Option<&str>) -> Option<Vec<String>> {
        read(&self.orders)
            .get(&(qualifier.to_string(), key.map(str::to_string)))
            .cloned()
    }

    fn resolve(&self, qualifier: &str, key: Option<&str>) -> Vec<String> {
        key.and_then(|key| self.exact(qualifier, Some(key)))
            .or_else(|| self.exact(qualifier, None))
            .unwrap_or_else(|| self.builtin.clone())
    }
}

impl PreferenceStore {
    /// Override the lookup order for `qualifier`, or for one key of it.
    /// `None` removes the override so the next broader order applies.
    pub fn set_default_lookup_order(
        &self,
        qualifier: &str,
        key: Option<&str>,
        order: Option<Vec<String>>,
    ) -> Result<()> {
        self.inner.lookup.set(qualifier, key, order)
    }

    /// The override registered for exactly this `(qualifier, key)`.
    pub fn get_default_lookup_order(&self, qualifier: &str, key: Option<&str>) -> Option<Vec<String>> {
        self.inner.lookup.exact(qualifier, key)
    }

    /// The order a lookup for `(qualifier, key)` uses.
    pub fn get_lookup_order(&self, qualifier: &str, key: Option<&str>) -> Vec<String> {
        self.inner.lookup.resolve(qualifier, key)
    }

    /// The first value of `key` among `nodes`, skipping `None` entries.
    pub fn get(&self, key: &str, default: Option<&str>, nodes: &[Option<&Node>]) -> Result<Option<String>> {
        for node in nodes.iter().flatten() {
            if let Some(value) = node.get(key, None)? {
                return Ok(Some(value));
            }
        }
        Ok(default.map(str::to_string))
    }

    /// Look `key` up across scopes.
    ///
    /// `key` may carry a path: `a/b//c` is key `c` on child `a/b` of each
    /// qualifier node. For each scope in the lookup order, a context with
    /// that scope's name is used when one is given; otherwise the scope's
    /// own `/<scope>/<qualifier>` node.
    pub fn get_string(
        &self,
        qualifier: &str,
        key: &str,
        default: Option<&str>,
        contexts: &[Option<ScopeContext>],
    ) -> Result<Option<String>> {
        let (child_path, key_name) = decode_path(key);
        let child_path = make_relative(&child_path);

        for scope in self.get_lookup_order(qualifier, Some(key)) {
            let context = contexts
                .iter()
                .flatten()
                .find(|context| context.name() == scope);
            let base = match context {
                Some(context) => context.node(self, qualifier)?,
                None => self.root().node(&scope)?.node(qualifier)?,
            };
            let node = base.node(child_path)?;
            if let Some(value) = node.get(&key_name, None)? {
                return Ok(Some(value));
            }
        }
        Ok(default.map(str::to_string))
    }

    pub fn get_bool(
        &self,
        qualifier: &str,
        key: &str,
        default: bool,
        contexts: &[Option<ScopeContext>],
    ) -> Result<bool> {
        Ok(self
            .get_string(qualifier, key, None, contexts)?
            .map_or(default, |v| parse_bool(&v, default)))
    }

    pub fn get_int(
        &self,
        qualifier: &str,
        key: &str,
        default: i32,
        contexts: &[Option<ScopeContext>],
    ) -> Result<i32> {
        Ok(parse_or(self.get_string(qualifier, key, None, contexts)?, default))
    }

    pub fn get_long(
        &self,
        qualifier: &str,
        key: &str,
        default: i64,
        contexts: &[Option<ScopeContext>],
    ) -> Result<i64> {
        Ok(parse_or(self.get_string(qualifier, key, None, contexts)?, default))
    }

    pub fn get_float(
        &self,
        qualifier: &str,
        key: &str,
        default: f32,
        contexts: &[Option<ScopeContext>],
    ) -> Result<f32> {
        Ok(parse_or(self.get_string(qualifier, key, None, contexts)?, default))
    }

    pub fn get_double(
        &self,
        qualifier: &str,
        key: &str,
        default: f64,
        contexts: &[Option<ScopeContext>],
    ) -> Result<f64> {
        Ok(parse_or(self.get_string(qualifier, key, None, contexts)?, default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prefstore_backing::MemoryBackingStore;
    use std::sync::Arc;

    fn store() -> PreferenceStore {
        PreferenceStore::new(Arc::new(MemoryBackingStore::new()))
    }

    fn order(names: &[&str]) -> Option<Vec<String>> {
        Some(names.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn builtin_order() {
        let store = store();
        assert_eq!(
            store.get_lookup_order("q", None),
            vec!["project", "instance", "configuration", "default"]
        );
        assert_eq!(store.get_default_lookup_order("q", None), None);
    }

    #[test]
    fn overrides_fall_back_to_broader_levels() {
        let store = store();
        store
            .set_default_lookup_order("q", None, order(&["instance", "default"]))
            .unwrap();
        store
            .set_default_lookup_order("q", Some("k"), order(&["default"]))
            .unwrap();

        assert_eq!(store.get_lookup_order("q", Some("k")), vec!["default"]);
        assert_eq!(
            store.get_lookup_order("q", Some("other")),
            vec!["instance", "default"]
        );
        assert_eq!(store.get_default_lookup_order("q", Some("other")), None);

        store.set_default_lookup_order("q", Some("k"), None).unwrap();
        assert_eq!(
            store.get_lookup_order("q", Some("k")),
            vec!["instance", "default"]
        );
        store.set_default_lookup_order("q", None, None).unwrap();
        assert_eq!(store.get_lookup_order("q", Some("k")).len(), 4);
    }

    #[test]
    fn invalid_orders_rejected() {
        let store = store();
        assert!(matches!(
            store.set_default_lookup_order("", None, order(&["instance"])),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            store.set_default_lookup_order("q", None, order(&["instance", ""])),
            Err(Error::InvalidArgument { .. })
        ));
        assert_eq!(store.get_default_lookup_order("q", None), None);
    }

    #[test]
    fn get_skips_missing_nodes() {
        let store = store();
        let a = store.node("/instance/q").unwrap();
        let b = store.node("/default/q").unwrap();
        b.put("k", "from default").unwrap();

        assert_eq!(
            store.get("k", None, &[None, Some(&a), Some(&b)]).unwrap(),
            Some("from default".to_string())
        );
        a.put("k", "from instance").unwrap();
        assert_eq!(
            store.get("k", None, &[None, Some(&a), Some(&b)]).unwrap(),
            Some("from instance".to_string())
        );
        assert_eq!(
            store.get("missing", Some("d"), &[Some(&a)]).unwrap(),
            Some("d".to_string())
        );
    }

    #[test]
    fn lookup_order_scenario() {
        let store = store();
        let instance = store.node("/instance/q").unwrap();
        let default = store.node("/default/q").unwrap();
        instance.put("k", "instance").unwrap();
        default.put("k", "default").unwrap();

        assert_eq!(
            store.get_string("q", "k", None, &[]).unwrap(),
            Some("instance".to_string())
        );

        store
            .set_default_lookup_order("q", Some("k"), order(&["default", "instance"]))
            .unwrap();
        assert_eq!(
            store.get_string("q", "k", None, &[]).unwrap(),
            Some("default".to_string())
        );

        store.set_default_lookup_order("q", Some("k"), None).unwrap();
        assert_eq!(
            store.get_string("q", "k", None, &[]).unwrap(),
            Some("instance".to_string())
        );
    }

    #[test]
    fn contexts_select_project() {
        let store = store();
        store
            .node("/project/p1/q")
            .unwrap()
            .put("k", "p1")
            .unwrap();
        store.node("/instance/q").unwrap().put("k", "instance").unwrap();

        assert_eq!(
            store
                .get_string("q", "k", None, &[Some(ScopeContext::project("p1")), None])
                .unwrap(),
            Some("p1".to_string())
        );
        assert_eq!(
            store
                .get_string("q", "k", None, &[Some(ScopeContext::project("p2"))])
                .unwrap(),
            Some("instance".to_string())
        );
    }

    #[test]
    fn keys_with_paths() {
        let store = store();
        let q = store.node("/instance/q").unwrap();
        q.node("a/b").unwrap().put("c", "v1").unwrap();
        q.put("a/b", "v2").unwrap();

        assert_eq!(store.get_string("q", "a/b/c", None, &[]).unwrap(), Some("v1".to_string()));
        assert_eq!(store.get_string("q", "a/b//c", None, &[]).unwrap(), Some("v1".to_string()));
        assert_eq!(store.get_string("q", "//a/b", None, &[]).unwrap(), Some("v2".to_string()));
        assert_eq!(store.get_string("q", "/a/b", None, &[]).unwrap(), None);
    }

    #[test]
    fn typed_lookups() {
        let store = store();
        let q = store.node("/instance/q").unwrap();
        q.put_int("n", 7).unwrap();
        q.put("word", "seven").unwrap();
        q.put_bool("flag", true).unwrap();

        let none: &[Option<ScopeContext>] = &[];
        assert_eq!(store.get_int("q", "n", 0, none).unwrap(), 7);
        assert_eq!(store.get_int("q", "word", 3, none).unwrap(), 3);
        assert_eq!(store.get_long("q", "n", 0, none).unwrap(), 7);
        assert_eq!(store.get_double("q", "n", 0.0, none).unwrap(), 7.0);
        assert_eq!(store.get_float("q", "missing", 1.5, none).unwrap(), 1.5);
        assert!(store.get_bool("q", "flag", false, none).unwrap());
    }
}
