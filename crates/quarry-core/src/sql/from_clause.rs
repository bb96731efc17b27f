//! Per-statement registry of table groups by navigable path and alias.

use super::ast::{TableGroup, TableGroupId};
use crate::error::Error;
use crate::path::NavigablePath;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

/// Owns the table-group arena of the statement being converted.
#[derive(Debug, Default)]
pub struct FromClauseIndex {
    groups: Vec<TableGroup>,
    by_path: HashMap<NavigablePath, TableGroupId>,
    by_alias: HashMap<String, TableGroupId>,
    affected_tables: BTreeSet<String>,
    group_counter: usize,
}

impl FromClauseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number used in the identification variables of the next group
    /// (`o1_0`, `c2_0`, ...). Also used for subquery tables.
    pub fn next_group_number(&mut self) -> usize {
        self.group_counter += 1;
        self.group_counter
    }

    /// Add a group to the arena and register it under its path and alias.
    pub fn register(&mut self, group: TableGroup) -> TableGroupId {
        let id = TableGroupId(self.groups.len());
        for table in group.table_names() {
            self.affected_tables.insert(table.to_string());
        }
        let path = group.navigable_path.clone();
        let alias = group.source_alias.clone();
        self.groups.push(group);
        self.register_path(path, id);
        if let Some(alias) = alias {
            self.register_alias(alias, id);
        }
        id
    }

    /// Bind `path` to `id`. Rebinding an existing path warns and overwrites.
    pub fn register_path(&mut self, path: NavigablePath, id: TableGroupId) {
        if let Some(previous) = self.by_path.insert(path.clone(), id) {
            if previous != id {
                warn!(path = %path, ?previous, current = ?id, "navigable path re-registered");
            }
        }
    }

    /// Bind `alias` to `id`. Rebinding an existing alias warns and overwrites.
    pub fn register_alias(&mut self, alias: String, id: TableGroupId) {
        if let Some(previous) = self.by_alias.insert(alias.clone(), id) {
            if previous != id {
                warn!(alias = %alias, ?previous, current = ?id, "alias re-registered");
            }
        }
    }

    pub fn find_by_path(&self, path: &NavigablePath) -> Option<TableGroupId> {
        self.by_path.get(path).copied()
    }

    pub fn find_by_alias(&self, alias: &str) -> Option<TableGroupId> {
        self.by_alias.get(alias).copied()
    }

    /// The group registered for `path`, creating and registering it first if
    /// there is none.
    pub fn resolve_or_create(
        &mut self,
        path: &NavigablePath,
        create: impl FnOnce(&mut Self) -> Result<TableGroup, Error>,
    ) -> Result<TableGroupId, Error> {
        if let Some(id) = self.find_by_path(path) {
            return Ok(id);
        }
        let group = create(self)?;
        Ok(self.register(group))
    }

    pub fn group(&self, id: TableGroupId) -> &TableGroup {
        &self.groups[id.0]
    }

    pub fn group_mut(&mut self, id: TableGroupId) -> &mut TableGroup {
        &mut self.groups[id.0]
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn affected_tables(&self) -> &BTreeSet<String> {
        &self.affected_tables
    }

    pub fn into_parts(self) -> (Vec<TableGroup>, BTreeSet<String>) {
        (self.groups, self.affected_tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::ast::TableReference;

    fn group(path: &NavigablePath, alias: Option<&str>, table: &str) -> TableGroup {
        TableGroup {
            navigable_path: path.clone(),
            source_alias: alias.map(String::from),
            entity: "Order".into(),
            primary_table: TableReference::new(table, "o1_0"),
            table_reference_joins: Vec::new(),
            table_group_joins: Vec::new(),
        }
    }

    #[test]
    fn resolve_or_create_is_idempotent() {
        let mut index = FromClauseIndex::new();
        let path = NavigablePath::root("Order", "o");
        let first = index
            .resolve_or_create(&path, |_| Ok(group(&path, Some("o"), "orders")))
            .unwrap();
        let second = index
            .resolve_or_create(&path, |_| panic!("group must not be created twice"))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(index.len(), 1);
        assert_eq!(index.find_by_alias("o"), Some(first));
    }

    #[test]
    fn rebinding_overwrites() {
        let mut index = FromClauseIndex::new();
        let path = NavigablePath::root("Order", "o");
        let first = index.register(group(&path, Some("o"), "orders"));
        let second = index.register(group(&path, Some("o"), "orders"));
        assert_ne!(first, second);
        assert_eq!(index.find_by_path(&path), Some(second));
        assert_eq!(index.find_by_alias("o"), Some(second));
    }

    #[test]
    fn tracks_affected_tables() {
        let mut index = FromClauseIndex::new();
        index.register(group(&NavigablePath::root("Order", "o"), None, "orders"));
        index.register(group(&NavigablePath::root("Customer", "c"), None, "customers"));
        let tables: Vec<_> = index.affected_tables().iter().cloned().collect();
        assert_eq!(tables, vec!["customers", "orders"]);
    }
}
