//! Selection of preferences for filtered export and apply.

use std::collections::BTreeMap;

/// How a [`FilterEntry`] key is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchType {
    #[default]
    Exact,
    Prefix,
}

/// One key, or family of keys, a filter transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterEntry {
    pub key: String,
    pub match_type: MatchType,
}

impl FilterEntry {
    pub fn exact(key: &str) -> Self {
        Self {
            key: key.to_string(),
            match_type: MatchType::Exact,
        }
    }

    pub fn prefix(prefix: &str) -> Self {
        Self {
            key: prefix.to_string(),
            match_type: MatchType::Prefix,
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self.match_type {
            MatchType::Exact => key == self.key,
            MatchType::Prefix => key.starts_with(&self.key),
        }
    }
}

/// Qualifier name to the entries restricting it; `None` selects the whole
/// qualifier subtree.
pub type QualifierMapping = BTreeMap<String, Option<Vec<FilterEntry>>>;

/// Selects preferences by scope, then optionally by qualifier and key.
///
/// A scope without a mapping is transferred whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferenceFilter {
    scopes: Vec<String>,
    mappings: BTreeMap<String, QualifierMapping>,
}

impl PreferenceFilter {
    pub fn new<S: Into<String>>(scopes: impl IntoIterator<Item = S>) -> Self {
        Self {
            scopes: scopes.into_iter().map(Into::into).collect(),
            mappings: BTreeMap::new(),
        }
    }

    /// Restrict `scope` to `qualifier`, and to `entries` within it when
    /// given. Repeated calls add qualifiers. An empty entry list behaves as
    /// `None`.
    pub fn with_qualifier(
        mut self,
        scope: &str,
        qualifier: &str,
        entries: Option<Vec<FilterEntry>>,
    ) -> Self {
        if !self.scopes.iter().any(|s| s == scope) {
            self.scopes.push(scope.to_string());
        }
        let entries = entries.filter(|e| !e.is_empty());
        self.mappings
            .entry(scope.to_string())
            .or_default()
            .insert(qualifier.to_string(), entries);
        self
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn mapping(&self, scope: &str) -> Option<&QualifierMapping> {
        self.mappings.get(scope)
    }

    /// Whether `key` on a node whose scope is `scope` and whose qualifier
    /// segment is `qualifier` is selected. `qualifier` is `None` for nodes
    /// above the qualifier level.
    pub(crate) fn selects(&self, scope: &str, qualifier: Option<&str>, key: &str) -> bool {
        if !self.scopes.iter().any(|s| s == scope) {
            return false;
        }
        let mapping = match self.mapping(scope) {
            Some(mapping) => mapping,
            None => return true,
        };
        match qualifier.and_then(|q| mapping.get(q)) {
            Some(None) => true,
            Some(Some(entries)) => entries.iter().any(|e| e.matches(key)),
            None => false,
        }
    }

    /// Whether anything below `qualifier` of `scope` can be selected.
    pub(crate) fn covers(&self, scope: &str, qualifier: Option<&str>) -> bool {
        if !self.scopes.iter().any(|s| s == scope) {
            return false;
        }
        match (self.mapping(scope), qualifier) {
            (None, _) | (Some(_), None) => true,
            (Some(mapping), Some(q)) => mapping.contains_key(q),
        }
    }
}
