//! Absolute node paths.

use std::fmt;

/// Errors related to node path parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The path string is invalid.
    InvalidPath { message: String },
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::InvalidPath { message } => write!(f, "invalid path: {}", message),
        }
    }
}

impl std::error::Error for PathError {}

/// An absolute path in the preference tree.
///
/// Components are node names: any non-empty text without `/`. Names may
/// contain `:` and other punctuation (`repositories:cvs` is one name).
/// The tree root has no components and prints as `/`.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct NodePath {
    pub components: Vec<String>,
}

impl NodePath {
    /// The path of the tree root.
    pub fn root() -> Self {
        NodePath::default()
    }

    /// Parse `/`-separated names, ignoring one leading slash.
    ///
    /// # Path Syntax
    ///
    /// - `""` and `"/"` name the root
    /// - doubled slashes are rejected (`a//b`)
    /// - a trailing slash is rejected (`a/b/`)
    ///
    /// ```rust
    /// use prefstore_core::NodePath;
    ///
    /// let path = NodePath::parse("/instance/org.example").unwrap();
    /// assert_eq!(path.len(), 2);
    /// assert_eq!(path.to_string(), "/instance/org.example");
    /// assert!(NodePath::parse("a//b").is_err());
    /// ```
    pub fn parse(s: &str) -> Result<Self, PathError> {
        let relative = s.strip_prefix('/').unwrap_or(s);
        if relative.is_empty() {
            return Ok(NodePath::root());
        }
        if relative.ends_with('/') {
            return Err(PathError::InvalidPath {
                message: format!("'{}' ends with a slash", s),
            });
        }

        let mut components = Vec::new();
        for component in relative.split('/') {
            if component.is_empty() {
                return Err(PathError::InvalidPath {
                    message: format!("'{}' contains consecutive slashes", s),
                });
            }
            components.push(component.to_string());
        }
        Ok(NodePath { components })
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the number of components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Iterate over components.
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.components.iter()
    }

    /// The last component, or `""` for the root.
    pub fn name(&self) -> &str {
        self.components.last().map(String::as_str).unwrap_or("")
    }

    pub fn parent(&self) -> Option<NodePath> {
        if self.is_root() {
            None
        } else {
            Some(self.slice(0, self.len() - 1))
        }
    }

    /// Append a single name.
    #[must_use]
    pub fn child(&self, name: &str) -> NodePath {
        let mut components = self.components.clone();
        components.push(name.to_string());
        NodePath { components }
    }

    /// Join this path with another.
    #[must_use]
    pub fn join(&self, other: &NodePath) -> NodePath {
        let mut components = self.components.clone();
        components.extend(other.components.iter().cloned());
        NodePath { components }
    }

    /// Check if this path has the given prefix.
    pub fn has_prefix(&self, prefix: &NodePath) -> bool {
        prefix.components.len() <= self.components.len()
            && prefix.components == self.components[..prefix.components.len()]
    }

    /// Strip a prefix from this path.
    ///
    /// Returns `None` if the prefix doesn't match.
    #[must_use]
    pub fn strip_prefix(&self, prefix: &NodePath) -> Option<NodePath> {
        if self.has_prefix(prefix) {
            Some(NodePath {
                components: self.components[prefix.components.len()..].to_vec(),
            })
        } else {
            None
        }
    }

    /// Get a slice of components as a new path.
    pub fn slice(&self, start: usize, end: usize) -> NodePath {
        NodePath {
            components: self.components[start..end].to_vec(),
        }
    }

    /// The components joined with `/`, without a leading slash.
    pub fn relative(&self) -> String {
        self.components.join("/")
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.components.join("/"))
    }
}

impl std::ops::Index<usize> for NodePath {
    type Output = String;

    fn index(&self, i: usize) -> &Self::Output {
        &self.components[i]
    }
}
