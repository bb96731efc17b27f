//! Navigable paths: dot-separated names identifying a semantic position in
//! the domain model (`Order(o).customer.name`).
//!
//! Equal paths denote the same position, so they double as keys for table
//! groups and for result fetches.

use std::fmt;

/// Pseudo-attribute that stands in for a non-aggregated composite identifier.
/// It never appears in a path.
pub const IDENTIFIER_MAPPER_PROPERTY: &str = "_identifierMapper";

/// Append `local` to `base`.
///
/// The identifier-mapper marker is swallowed: `append(base, MARKER) == base`.
pub fn append(base: &str, local: &str) -> String {
    if local == IDENTIFIER_MAPPER_PROPERTY {
        return base.to_string();
    }
    if base.is_empty() {
        return local.to_string();
    }
    let mut path = String::with_capacity(base.len() + local.len() + 1);
    path.push_str(base);
    path.push('.');
    path.push_str(local);
    path
}

/// Everything after the last `.`, or the whole path.
pub fn extract_terminal_name(path: &str) -> &str {
    match path.rfind('.') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Everything before the last `.`, or `""` for a single-segment path.
pub fn extract_parent_path(path: &str) -> &str {
    match path.rfind('.') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Everything before the first `.`, or the whole path.
pub fn extract_root(path: &str) -> &str {
    match path.find('.') {
        Some(idx) => &path[..idx],
        None => path,
    }
}

/// A navigable path value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NavigablePath(String);

impl NavigablePath {
    /// Path of a query root: `Entity(alias)`.
    pub fn root(entity: &str, alias: &str) -> Self {
        Self(format!("{}({})", entity, alias))
    }

    /// Path of an entity without a query alias (loaders, collection owners).
    pub fn for_entity(entity: &str) -> Self {
        Self(entity.to_string())
    }

    pub fn from_full_path(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn append(&self, local: &str) -> Self {
        Self(append(&self.0, local))
    }

    /// An explicitly aliased join: `parent.attribute(alias)`. Two joins of the
    /// same attribute under different aliases get different paths.
    pub fn append_aliased(&self, local: &str, alias: &str) -> Self {
        Self(format!("{}({})", append(&self.0, local), alias))
    }

    pub fn parent(&self) -> Option<Self> {
        let parent = extract_parent_path(&self.0);
        (!parent.is_empty()).then(|| Self(parent.to_string()))
    }

    /// Local name of the last segment, without any alias decoration.
    pub fn terminal_name(&self) -> &str {
        let terminal = extract_terminal_name(&self.0);
        match terminal.find('(') {
            Some(idx) => &terminal[..idx],
            None => terminal,
        }
    }

    pub fn full_path(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        !self.0.contains('.')
    }
}

impl fmt::Display for NavigablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_joins_with_dot() {
        assert_eq!(append("Order", "lineItems"), "Order.lineItems");
        assert_eq!(append("", "Order"), "Order");
        assert_eq!(append("Order(o)", "customer"), append("Order(o)", "customer"));
        assert_ne!(append("Order(o)", "customer"), append("Order(o)", "lineItems"));
    }

    #[test]
    fn identifier_mapper_is_suppressed() {
        assert_eq!(append("Order", IDENTIFIER_MAPPER_PROPERTY), "Order");
        assert_eq!(append("", IDENTIFIER_MAPPER_PROPERTY), "");
        let path = NavigablePath::root("Line", "l")
            .append(IDENTIFIER_MAPPER_PROPERTY)
            .append("lineNo");
        assert_eq!(path.full_path(), "Line(l).lineNo");
    }

    #[test]
    fn extraction() {
        let path = "Order.customer.name";
        assert_eq!(extract_terminal_name(path), "name");
        assert_eq!(extract_parent_path(path), "Order.customer");
        assert_eq!(extract_root(path), "Order");
        assert_eq!(extract_terminal_name("Order"), "Order");
        assert_eq!(extract_parent_path("Order"), "");
        assert_eq!(extract_root("Order"), "Order");
    }

    #[test]
    fn aliased_paths_are_distinct() {
        let root = NavigablePath::root("Order", "o");
        let a = root.append_aliased("lineItems", "a");
        let b = root.append_aliased("lineItems", "b");
        assert_ne!(a, b);
        assert_eq!(a.terminal_name(), "lineItems");
        assert_eq!(a.parent(), Some(root.clone()));
        assert!(root.is_root());
        assert!(root.parent().is_none());
    }
}
