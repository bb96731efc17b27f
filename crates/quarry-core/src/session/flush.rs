//! Flush: persistence-context changes turned into insert, update and delete
//! statements, executed in that order.

use super::persistence_context::{EntityStatus, LoadedState, PersistenceContext};
use crate::cache::{EntityCacheAccess, Statistics};
use crate::error::Error;
use crate::exec::{QueryParameterBindings, StatementExecutor};
use crate::metamodel::{
    BasicType, EntityDescriptor, InheritanceStrategy, Metamodel, DEFAULT_DISCRIMINATOR_COLUMN,
};
use crate::results::{EntityKey, EntityRef};
use crate::sql::{
    render, Assignment, ColumnReference, DeleteStatement, Expression, InsertStatement, Predicate,
    Statement, TableReference, UpdateStatement,
};
use crate::value::Value;
use quarry_lang::Parameter;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Debug)]
struct Insertion {
    key: EntityKey,
    descriptor: Arc<EntityDescriptor>,
    state: LoadedState,
}

#[derive(Debug)]
struct Update {
    key: EntityKey,
    descriptor: Arc<EntityDescriptor>,
    state: LoadedState,
    /// Attribute indexes whose state differs from the snapshot.
    dirty: Vec<usize>,
}

#[derive(Debug)]
struct Deletion {
    key: EntityKey,
    descriptor: Arc<EntityDescriptor>,
}

/// Writes collected from one pass over the persistence context.
#[derive(Debug, Default)]
pub(crate) struct ActionQueue {
    insertions: Vec<Insertion>,
    updates: Vec<Update>,
    deletions: Vec<Deletion>,
}

fn snapshot(instance: &EntityRef, metamodel: &Metamodel) -> Result<LoadedState, Error> {
    instance
        .try_borrow()
        .map_err(|_| Error::IllegalState("entity is borrowed during flush".to_string()))?
        .disassemble(metamodel)
}

impl ActionQueue {
    /// Dirty-check every entry against its snapshot.
    pub(crate) fn plan(context: &PersistenceContext, metamodel: &Metamodel) -> Result<Self, Error> {
        let mut queue = Self::default();
        for (key, entry) in context.entries() {
            let descriptor = Arc::clone(
                entry
                    .instance
                    .try_borrow()
                    .map_err(|_| Error::IllegalState(format!("{} is borrowed during flush", key)))?
                    .descriptor(),
            );
            match entry.status {
                EntityStatus::Loading => {
                    return Err(Error::IllegalState(format!(
                        "cannot flush while {} is loading",
                        key
                    )))
                }
                EntityStatus::ReadOnly => {}
                EntityStatus::Removed => queue.deletions.push(Deletion {
                    key: key.clone(),
                    descriptor,
                }),
                EntityStatus::Managed => {
                    let state = snapshot(&entry.instance, metamodel)?;
                    match (entry.exists_in_database, &entry.loaded_state) {
                        (false, _) => queue.insertions.push(Insertion {
                            key: key.clone(),
                            descriptor,
                            state,
                        }),
                        (true, None) => {
                            return Err(Error::IllegalState(format!(
                                "{} has no loaded state to compare against",
                                key
                            )))
                        }
                        (true, Some(loaded)) => {
                            let dirty: Vec<usize> = state
                                .iter()
                                .zip(loaded)
                                .enumerate()
                                .filter(|(_, (now, then))| now != then)
                                .map(|(i, _)| i)
                                .collect();
                            if dirty.is_empty() {
                                continue;
                            }
                            if let Some(i) = dirty.iter().find(|&&i| {
                                descriptor.is_identifier_attribute(&descriptor.attributes[i].name)
                            }) {
                                return Err(Error::IllegalState(format!(
                                    "identifier attribute '{}' of {} was altered",
                                    descriptor.attributes[*i].name, key
                                )));
                            }
                            queue.updates.push(Update {
                                key: key.clone(),
                                descriptor,
                                state,
                                dirty,
                            });
                        }
                    }
                }
            }
        }
        Ok(queue)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.updates.is_empty() && self.deletions.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.insertions.len() + self.updates.len() + self.deletions.len()
    }

    /// Whether any pending write touches one of `tables`.
    pub(crate) fn touches(&self, tables: &BTreeSet<String>) -> bool {
        self.insertions
            .iter()
            .map(|i| &i.descriptor)
            .chain(self.updates.iter().map(|u| &u.descriptor))
            .chain(self.deletions.iter().map(|d| &d.descriptor))
            .any(|descriptor| descriptor.table_names().iter().any(|t| tables.contains(*t)))
    }

    #[instrument(skip_all, fields(actions = self.len()))]
    pub(crate) fn execute(
        self,
        executor: &StatementExecutor<'_>,
        metamodel: &Metamodel,
        context: &mut PersistenceContext,
        cache: Option<EntityCacheAccess<'_>>,
        statistics: &Statistics,
    ) -> Result<(), Error> {
        for Insertion {
            key,
            descriptor,
            state,
        } in self.insertions
        {
            let writer = EntityWriter::new(metamodel, &descriptor, &key);
            for (table, columns) in writer.columns(&state, None)? {
                let is_primary = table == descriptor.table;
                if !is_primary && columns.iter().all(|(_, v)| v.is_null()) {
                    continue;
                }
                writer.insert(executor, &table, columns)?;
            }
            context.mark_flushed(&key, state)?;
            statistics.record_entity_insert();
        }

        for Update {
            key,
            descriptor,
            state,
            dirty,
        } in self.updates
        {
            let writer = EntityWriter::new(metamodel, &descriptor, &key);
            for (table, columns) in writer.columns(&state, Some(&dirty))? {
                if columns.is_empty() {
                    continue;
                }
                let updated = writer.update(executor, &table, columns.clone())?;
                if updated == 0 {
                    if table == descriptor.table {
                        return Err(Error::IllegalState(format!(
                            "row of {} was deleted concurrently",
                            key
                        )));
                    }
                    if columns.iter().any(|(_, v)| !v.is_null()) {
                        let all = writer
                            .columns(&state, None)?
                            .into_iter()
                            .find(|(t, _)| *t == table)
                            .map(|(_, c)| c)
                            .unwrap_or(columns);
                        writer.insert(executor, &table, all)?;
                    }
                }
            }
            if let Some(cache) = cache {
                cache.evict(&descriptor, &key.id);
            }
            context.mark_flushed(&key, state)?;
            statistics.record_entity_update();
        }

        for Deletion { key, descriptor } in self.deletions {
            let writer = EntityWriter::new(metamodel, &descriptor, &key);
            for table in descriptor.table_names().into_iter().rev() {
                let deleted = writer.delete(executor, table)?;
                if deleted == 0 && table == descriptor.table {
                    return Err(Error::IllegalState(format!(
                        "row of {} was deleted concurrently",
                        key
                    )));
                }
            }
            if let Some(cache) = cache {
                cache.evict(&descriptor, &key.id);
            }
            context.remove_entry(&key);
            statistics.record_entity_delete();
        }

        statistics.record_flush();
        Ok(())
    }
}

/// Column values of one table.
type TableColumns = (String, Vec<(ColumnReference, Value)>);

/// Builds the statements writing one entity row set.
struct EntityWriter<'a> {
    metamodel: &'a Metamodel,
    descriptor: &'a EntityDescriptor,
    key: &'a EntityKey,
}

impl<'a> EntityWriter<'a> {
    fn new(metamodel: &'a Metamodel, descriptor: &'a EntityDescriptor, key: &'a EntityKey) -> Self {
        Self {
            metamodel,
            descriptor,
            key,
        }
    }

    /// Columns per table for `state`, primary table first. With `only`, just
    /// those attributes are included and the discriminator is left out.
    fn columns(&self, state: &LoadedState, only: Option<&[usize]>) -> Result<Vec<TableColumns>, Error> {
        let mut tables: Vec<TableColumns> = self
            .descriptor
            .table_names()
            .into_iter()
            .map(|t| (t.to_string(), Vec::new()))
            .collect();

        for (index, attribute) in self.descriptor.attributes.iter().enumerate() {
            if only.is_some_and(|only| !only.contains(&index)) {
                continue;
            }
            let columns = self.metamodel.attribute_columns(self.descriptor, attribute)?;
            let values = state.get(index).map(Vec::as_slice).unwrap_or_default();
            if values.len() != columns.len() {
                return Err(Error::Mapping(format!(
                    "{}.{} has {} columns but state holds {} values",
                    self.descriptor.name,
                    attribute.name,
                    columns.len(),
                    values.len()
                )));
            }
            for (column, value) in columns.into_iter().zip(values) {
                let table = column.table.as_deref().unwrap_or(&self.descriptor.table);
                let Some((name, target)) = tables.iter_mut().find(|(t, _)| t == table) else {
                    return Err(Error::Mapping(format!(
                        "{} maps column {} to unknown table {}",
                        self.descriptor.name, column.column, table
                    )));
                };
                target.push((
                    TableReference::new(name.clone(), name.clone()).column(column.column, column.jdbc_type),
                    value.clone(),
                ));
            }
        }

        if only.is_none() && self.descriptor.inheritance_strategy() == Some(InheritanceStrategy::SingleTable) {
            let column = self
                .descriptor
                .discriminator_column()
                .unwrap_or(DEFAULT_DISCRIMINATOR_COLUMN);
            let value = self
                .descriptor
                .discriminator_value()
                .unwrap_or(&self.descriptor.name);
            let reference = TableReference::new(&self.descriptor.table, &self.descriptor.table);
            tables[0]
                .1
                .push((reference.column(column, BasicType::String), Value::from(value)));
        }
        Ok(tables)
    }

    /// `key column = id` for `table`.
    fn restriction(&self, table: &str, bindings: &mut Binder) -> Result<Predicate, Error> {
        let reference = TableReference::new(table, table);
        let id_columns = self.descriptor.identifier_columns();
        let ids = self.key.id.values();
        if table == self.descriptor.table {
            let predicates = id_columns
                .into_iter()
                .zip(ids)
                .map(|(column, value)| {
                    Predicate::eq(
                        Expression::Column(reference.column(column.column, column.jdbc_type)),
                        bindings.bind(value.clone(), column.jdbc_type),
                    )
                })
                .collect();
            return Predicate::and(predicates).ok_or_else(|| {
                Error::Mapping(format!("{} has no identifier columns", self.descriptor.name))
            });
        }
        let secondary = self
            .descriptor
            .secondary_tables
            .iter()
            .find(|t| t.name == table)
            .ok_or_else(|| Error::Mapping(format!("{} has no table {}", self.descriptor.name, table)))?;
        match (id_columns.as_slice(), ids) {
            ([column], [value]) => Ok(Predicate::eq(
                Expression::Column(reference.column(&secondary.key_column, column.jdbc_type)),
                bindings.bind(value.clone(), column.jdbc_type),
            )),
            _ => Err(Error::NotYetImplemented(format!(
                "secondary table {} of {} with a composite identifier",
                table, self.descriptor.name
            ))),
        }
    }

    fn insert(
        &self,
        executor: &StatementExecutor<'_>,
        table: &str,
        mut columns: Vec<(ColumnReference, Value)>,
    ) -> Result<usize, Error> {
        let mut binder = Binder::default();
        if table != self.descriptor.table {
            let secondary = self
                .descriptor
                .secondary_tables
                .iter()
                .find(|t| t.name == table)
                .ok_or_else(|| Error::Mapping(format!("{} has no table {}", self.descriptor.name, table)))?;
            let (column, value) = match (self.descriptor.identifier_columns().as_slice(), self.key.id.values()) {
                ([column], [value]) => (column.clone(), value.clone()),
                _ => {
                    return Err(Error::NotYetImplemented(format!(
                        "secondary table {} of {} with a composite identifier",
                        table, self.descriptor.name
                    )))
                }
            };
            let reference = TableReference::new(table, table);
            columns.insert(0, (reference.column(&secondary.key_column, column.jdbc_type), value));
        }
        let statement = InsertStatement {
            target: TableReference::new(table, table),
            columns: columns.iter().map(|(c, _)| c.column.clone()).collect(),
            values: columns
                .into_iter()
                .map(|(c, v)| binder.bind(v, c.jdbc_type))
                .collect(),
        };
        self.execute(executor, Statement::Insert(statement), &binder)
    }

    fn update(
        &self,
        executor: &StatementExecutor<'_>,
        table: &str,
        columns: Vec<(ColumnReference, Value)>,
    ) -> Result<usize, Error> {
        let mut binder = Binder::default();
        let assignments = columns
            .into_iter()
            .map(|(column, value)| {
                let ty = column.jdbc_type;
                Assignment {
                    column,
                    value: binder.bind(value, ty),
                }
            })
            .collect();
        let restriction = self.restriction(table, &mut binder)?;
        let statement = UpdateStatement {
            target: TableReference::new(table, table),
            assignments,
            restriction: Some(restriction),
        };
        self.execute(executor, Statement::Update(statement), &binder)
    }

    fn delete(&self, executor: &StatementExecutor<'_>, table: &str) -> Result<usize, Error> {
        let mut binder = Binder::default();
        let restriction = self.restriction(table, &mut binder)?;
        let statement = DeleteStatement {
            target: TableReference::new(table, table),
            restriction: Some(restriction),
        };
        self.execute(executor, Statement::Delete(statement), &binder)
    }

    fn execute(
        &self,
        executor: &StatementExecutor<'_>,
        statement: Statement,
        binder: &Binder,
    ) -> Result<usize, Error> {
        let operation = render(&statement);
        debug!(entity = %self.key, sql = %operation.sql, "flushing");
        executor.execute_update(&operation, &binder.bindings)
    }
}

/// Positional parameters in placeholder order.
#[derive(Default)]
struct Binder {
    bindings: QueryParameterBindings,
    next: u32,
}

impl Binder {
    fn bind(&mut self, value: Value, ty: BasicType) -> Expression {
        self.next += 1;
        self.bindings.set_positional(self.next, value);
        Expression::Parameter {
            parameter: Parameter::Positional(self.next),
            ty: Some(ty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::EntityInstance;
    use crate::testing::shop;
    use crate::value::Identifier;
    use rusqlite::Connection;
    use std::rc::Rc;

    fn schema() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        connection
            .execute_batch(
                "create table customers (id integer primary key, name text, addr_city text, addr_zip text);
                 create table customer_details (customer_id integer primary key, notes text);
                 create table animals (id integer primary key, DTYPE text not null, name text, breed text, lives integer);",
            )
            .unwrap();
        connection
    }

    fn count(connection: &Connection, sql: &str) -> i64 {
        connection.query_row(sql, [], |r| r.get(0)).unwrap()
    }

    fn managed(
        context: &mut PersistenceContext,
        metamodel: &Metamodel,
        entity: &str,
        id: i64,
        fill: impl FnOnce(&mut EntityInstance),
    ) -> (EntityKey, EntityRef) {
        let descriptor = Arc::clone(metamodel.entity_descriptor(entity).unwrap());
        let mut instance = EntityInstance::new(Arc::clone(&descriptor));
        instance.set_value("id", id).unwrap();
        fill(&mut instance);
        instance.assign_identifier(Identifier::simple(id));
        let key = EntityKey::of(&descriptor, Identifier::simple(id));
        let instance = instance.into_ref();
        context.add_new(key.clone(), Rc::clone(&instance)).unwrap();
        (key, instance)
    }

    #[test]
    fn inserts_then_updates_dirty_columns_then_deletes() {
        let metamodel = shop();
        let connection = schema();
        let executor = StatementExecutor::new(&connection);
        let statistics = Statistics::new(true);
        let mut context = PersistenceContext::new();

        let (key, customer) = managed(&mut context, &metamodel, "Customer", 1, |c| {
            c.set_value("name", "Ada").unwrap();
        });
        let queue = ActionQueue::plan(&context, &metamodel).unwrap();
        assert_eq!(queue.len(), 1);
        assert!(queue.touches(&BTreeSet::from(["customers".to_string()])));
        queue
            .execute(&executor, &metamodel, &mut context, None, &statistics)
            .unwrap();
        assert_eq!(count(&connection, "select count(*) from customers"), 1);
        // all-null secondary row is skipped
        assert_eq!(count(&connection, "select count(*) from customer_details"), 0);

        assert!(ActionQueue::plan(&context, &metamodel).unwrap().is_empty());

        customer.borrow_mut().set_value("notes", "vip").unwrap();
        let queue = ActionQueue::plan(&context, &metamodel).unwrap();
        assert!(!queue.touches(&BTreeSet::from(["orders".to_string()])));
        queue
            .execute(&executor, &metamodel, &mut context, None, &statistics)
            .unwrap();
        let notes: String = connection
            .query_row("select notes from customer_details where customer_id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(notes, "vip");

        context.mark_removed(&key).unwrap();
        ActionQueue::plan(&context, &metamodel)
            .unwrap()
            .execute(&executor, &metamodel, &mut context, None, &statistics)
            .unwrap();
        assert_eq!(count(&connection, "select count(*) from customers"), 0);
        assert_eq!(count(&connection, "select count(*) from customer_details"), 0);
        assert!(context.is_empty());

        let snapshot = statistics.snapshot();
        assert_eq!(
            (snapshot.entity_inserts, snapshot.entity_updates, snapshot.entity_deletes),
            (1, 1, 1)
        );
        assert_eq!(snapshot.flushes, 3);
    }

    #[test]
    fn subtype_insert_writes_discriminator() {
        let metamodel = shop();
        let connection = schema();
        let executor = StatementExecutor::new(&connection);
        let statistics = Statistics::new(false);
        let mut context = PersistenceContext::new();
        managed(&mut context, &metamodel, "Dog", 7, |d| {
            d.set_value("breed", "collie").unwrap();
        });
        ActionQueue::plan(&context, &metamodel)
            .unwrap()
            .execute(&executor, &metamodel, &mut context, None, &statistics)
            .unwrap();
        let dtype: String = connection
            .query_row("select DTYPE from animals where id = 7", [], |r| r.get(0))
            .unwrap();
        assert_eq!(dtype, "Dog");
    }

    #[test]
    fn read_only_entities_are_not_dirty_checked() {
        let metamodel = shop();
        let mut context = PersistenceContext::new();
        let descriptor = Arc::clone(metamodel.entity_descriptor("Customer").unwrap());
        let key = EntityKey::of(&descriptor, Identifier::simple(1i64));
        let mut instance = EntityInstance::new(Arc::clone(&descriptor));
        instance.set_value("id", 1i64).unwrap();
        instance.assign_identifier(Identifier::simple(1i64));
        let instance = instance.into_ref();
        context.begin_loading(key.clone(), Rc::clone(&instance)).unwrap();
        let state = instance.borrow().disassemble(&metamodel).unwrap();
        context.finish_loading(&key, state, true).unwrap();

        instance.borrow_mut().set_value("name", "changed").unwrap();
        assert!(ActionQueue::plan(&context, &metamodel).unwrap().is_empty());

        context.set_read_only(&key, false, None).unwrap();
        instance.borrow_mut().set_value("id", 2i64).unwrap();
        assert!(matches!(
            ActionQueue::plan(&context, &metamodel),
            Err(Error::IllegalState(_))
        ));
    }
}
