//! Sources of default-scope values.

use std::collections::BTreeMap;
use std::path::Path;

use crate::codec::{decode_path, encode_path, segment};
use crate::error::{Error, Result};
use crate::properties;

/// Supplies the values of `/default/<qualifier>` when that node is first
/// created.
///
/// Returned keys are tokens relative to the qualifier node, as produced by
/// [`encode_path`]: a plain key lands on the qualifier node itself, `a/b`
/// lands on key `b` of child `a`.
pub trait DefaultsProvider: Send + Sync {
    fn initialize_defaults(&self, qualifier: &str) -> BTreeMap<String, String>;
}

/// A provider with no defaults at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDefaults;

impl DefaultsProvider for NoDefaults {
    fn initialize_defaults(&self, _qualifier: &str) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

/// Defaults held in memory, grouped by qualifier.
#[derive(Debug, Default, Clone)]
pub struct MapDefaults {
    by_qualifier: BTreeMap<String, BTreeMap<String, String>>,
}

impl MapDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one default. `token` is relative to the qualifier node.
    #[must_use]
    pub fn with(mut self, qualifier: &str, token: &str, value: &str) -> Self {
        self.insert(qualifier, token, value);
        self
    }

    pub fn insert(&mut self, qualifier: &str, token: &str, value: &str) {
        self.by_qualifier
            .entry(qualifier.to_string())
            .or_default()
            .insert(token.to_string(), value.to_string());
    }
}

impl DefaultsProvider for MapDefaults {
    fn initialize_defaults(&self, qualifier: &str) -> BTreeMap<String, String> {
        self.by_qualifier.get(qualifier).cloned().unwrap_or_default()
    }
}

/// Defaults read from a customization file.
///
/// Each line is `qualifier/<encoded path and key>=value`. The whole token is
/// decoded with [`decode_path`]; the first segment of the decoded path names
/// the qualifier and the rest is the child path below it. So `q///c` is key
/// `/c` on `q`, and `q/a/b//c/d` is key `c/d` on child `a/b` of `q`.
#[derive(Debug, Default, Clone)]
pub struct CustomizationDefaults {
    defaults: MapDefaults,
}

impl CustomizationDefaults {
    pub fn parse(text: &str) -> Result<Self> {
        let entries = properties::parse(text).map_err(|e| Error::Config {
            message: format!("customization file: {}", e),
        })?;

        let mut defaults = MapDefaults::new();
        for (token, value) in entries {
            let (path, key) = decode_path(&token);
            let qualifier = match segment(&path, 0) {
                Some(qualifier) => qualifier,
                None => {
                    log::warn!("Ignoring customization '{}' without a qualifier", token);
                    continue;
                }
            };
            let child: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).skip(1).collect();
            defaults.insert(qualifier, &encode_path(&child.join("/"), &key), &value);
        }
        Ok(Self { defaults })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        log::debug!("Reading customization defaults from {}...", path.display());
        let data = std::fs::read(path)?;
        Self::parse(&properties::decode_bytes(&data))
    }
}

impl DefaultsProvider for CustomizationDefaults {
    fn initialize_defaults(&self, qualifier: &str) -> BTreeMap<String, String> {
        self.defaults.initialize_defaults(qualifier)
    }
}
