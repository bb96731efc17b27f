//! The unit of work: a connection plus a persistence context.

use super::flush::ActionQueue;
use super::persistence_context::{EntityStatus, PersistenceContext};
use super::query::Query;
use super::SessionFactory;
use crate::config::FlushMode;
use crate::error::Error;
use crate::exec::{QueryParameterBindings, StatementExecutor};
use crate::metamodel::EntityDescriptor;
use crate::results::{
    AssemblyContext, AttributeValue, CollectionRef, EntityInstance, EntityKey, EntityRef,
    PendingInitialization, RowAssembler, Tuple,
};
use crate::sql::{render_select, JdbcOperation, SelectStatement, SqmToSqlConverter};
use crate::value::{Identifier, Value};
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, trace};

/// How one result set is assembled.
struct Assembly<'c> {
    read_only: bool,
    cache_reads: bool,
    /// Collection whose elements are the rows being read.
    filling: Option<&'c CollectionRef>,
}

/// A single-threaded unit of work.
///
/// Every entity identity maps to at most one instance per session. Changes
/// to managed instances are written on [`flush`](Session::flush), on
/// [`commit`](Session::commit), and (in `Auto` flush mode) before queries
/// that read affected tables.
pub struct Session {
    factory: Arc<SessionFactory>,
    connection: Connection,
    context: PersistenceContext,
    transaction_active: bool,
    default_read_only: bool,
}

impl Session {
    pub(crate) fn new(factory: Arc<SessionFactory>, connection: Connection) -> Self {
        Self {
            factory,
            connection,
            context: PersistenceContext::new(),
            transaction_active: false,
            default_read_only: false,
        }
    }

    pub fn factory(&self) -> &Arc<SessionFactory> {
        &self.factory
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn persistence_context(&self) -> &PersistenceContext {
        &self.context
    }

    /// Entities loaded from now on enter the context read-only.
    pub fn set_default_read_only(&mut self, read_only: bool) {
        self.default_read_only = read_only;
    }

    pub fn is_default_read_only(&self) -> bool {
        self.default_read_only
    }

    pub fn create_query(&mut self, query: &str) -> Result<Query<'_>, Error> {
        let statement = self.factory.interpret(query)?;
        Ok(Query::new(self, query, statement))
    }

    fn descriptor(&self, entity: &str) -> Result<Arc<EntityDescriptor>, Error> {
        self.factory
            .metamodel()
            .entity_descriptor(entity)
            .cloned()
            .map_err(|_| Error::IllegalArgument(format!("not an entity: {}", entity)))
    }

    /// Coerce each component to the type of its identifier attribute.
    fn coerce_identifier(descriptor: &EntityDescriptor, id: Identifier) -> Result<Identifier, Error> {
        let columns = descriptor.identifier_columns();
        if columns.len() != id.values().len() {
            return Err(Error::IllegalArgument(format!(
                "{} has {} identifier components, {} given",
                descriptor.name,
                columns.len(),
                id.values().len()
            )));
        }
        let values = columns
            .into_iter()
            .zip(id.into_values())
            .map(|(column, value)| {
                let actual = value.type_name();
                if value.is_null() {
                    return Err(Error::IllegalArgument(format!(
                        "null identifier for {}",
                        descriptor.name
                    )));
                }
                column.jdbc_type.coerce(value).ok_or_else(|| {
                    Error::IllegalArgument(format!(
                        "identifier of {} expects {} but {} was given",
                        descriptor.name, column.jdbc_type, actual
                    ))
                })
            })
            .collect::<Result<Vec<Value>, Error>>()?;
        Ok(Identifier::new(values))
    }

    /// Look `id` up in the persistence context, then the second-level cache,
    /// then the database. Removed instances are not found.
    pub fn find(&mut self, entity: &str, id: impl Into<Identifier>) -> Result<Option<EntityRef>, Error> {
        let descriptor = self.descriptor(entity)?;
        let id = Self::coerce_identifier(&descriptor, id.into())?;
        let key = EntityKey::of(&descriptor, id.clone());
        if let Some(entry) = self.context.entry(&key) {
            if entry.status == EntityStatus::Removed {
                return Ok(None);
            }
            let instance = Rc::clone(&entry.instance);
            let matches = self
                .factory
                .metamodel()
                .is_subtype_of(instance.borrow().entity_name(), &descriptor.name);
            return Ok(matches.then_some(instance));
        }
        self.load(&descriptor, &id)
    }

    /// A reference to `id` that is loaded on first [`initialize`](Session::initialize).
    pub fn get_reference(&mut self, entity: &str, id: impl Into<Identifier>) -> Result<EntityRef, Error> {
        let descriptor = self.descriptor(entity)?;
        let id = Self::coerce_identifier(&descriptor, id.into())?;
        Ok(self.context.reference(&descriptor, id))
    }

    fn load(&mut self, descriptor: &Arc<EntityDescriptor>, id: &Identifier) -> Result<Option<EntityRef>, Error> {
        let factory = Arc::clone(&self.factory);
        let metamodel = factory.metamodel();
        let mut ctx = AssemblyContext::new(metamodel, &mut self.context, factory.statistics())
            .with_cache(factory.cache_access())
            .read_only(self.default_read_only);

        let cached = match ctx.load_from_cache(descriptor, id) {
            Ok(cached) => cached,
            Err(e) => {
                ctx.abort();
                return Err(e);
            }
        };
        if let Some(instance) = cached {
            let pending = ctx.finish()?;
            self.initialize_pending(pending)?;
            return Ok(Some(instance));
        }
        ctx.abort();

        let statement =
            SqmToSqlConverter::new(metamodel, factory.functions()).entity_loader(&descriptor.name)?;
        let mut bindings = QueryParameterBindings::new();
        for (i, value) in id.values().iter().enumerate() {
            bindings.set_positional(i as u32 + 1, value.clone());
        }
        debug!(entity = %descriptor.name, %id, "loading by identifier");
        let operation = render_select(&statement);
        let mut assembler = RowAssembler::new(metamodel, &statement)?;
        let (tuples, pending) = self.assemble(
            &operation,
            &bindings,
            &mut assembler,
            Assembly {
                read_only: self.default_read_only,
                cache_reads: false,
                filling: None,
            },
        )?;
        self.initialize_pending(pending)?;
        Ok(tuples.first().and_then(|t| t.entity(0)).cloned())
    }

    /// Execute a select, assemble its rows and then run the eager
    /// initializations they left behind.
    pub(crate) fn run_select(
        &mut self,
        statement: &SelectStatement,
        bindings: &QueryParameterBindings,
        read_only: bool,
    ) -> Result<Vec<Tuple>, Error> {
        let operation = render_select(statement);
        let mut assembler = RowAssembler::new(self.factory.metamodel(), statement)?;
        let (tuples, pending) = self.assemble(
            &operation,
            bindings,
            &mut assembler,
            Assembly {
                read_only,
                cache_reads: true,
                filling: None,
            },
        )?;
        self.initialize_pending(pending)?;
        Ok(tuples)
    }

    fn assemble(
        &mut self,
        operation: &JdbcOperation,
        bindings: &QueryParameterBindings,
        assembler: &mut RowAssembler,
        assembly: Assembly<'_>,
    ) -> Result<(Vec<Tuple>, Vec<PendingInitialization>), Error> {
        let factory = Arc::clone(&self.factory);
        if factory.options().log_sql {
            tracing::info!(target: "quarry::sql", "{}", operation.sql);
        }
        let executor = StatementExecutor::new(&self.connection);
        let mut ctx = AssemblyContext::new(factory.metamodel(), &mut self.context, factory.statistics())
            .with_cache(factory.cache_access())
            .read_only(assembly.read_only);
        if !assembly.cache_reads {
            ctx = ctx.skip_cache_reads();
        }
        if let Some(collection) = assembly.filling {
            ctx.fill(collection)?;
        }
        let column_types = assembler.column_types().to_vec();
        let mut tuples = Vec::new();
        let result = executor.execute_query(operation, bindings, &column_types, |row| {
            if let Some(tuple) = assembler.assemble(row, &mut ctx)? {
                tuples.push(tuple);
            }
            Ok(())
        });
        if let Err(e) = result {
            ctx.abort();
            return Err(e);
        }
        let pending = ctx.finish()?;
        Ok((tuples, pending))
    }

    pub(crate) fn initialize_pending(&mut self, pending: Vec<PendingInitialization>) -> Result<(), Error> {
        for item in pending {
            match item {
                PendingInitialization::Entity(instance) => self.initialize(&instance)?,
                PendingInitialization::Collection(collection) => {
                    self.initialize_collection(&collection)?
                }
            }
        }
        Ok(())
    }

    /// Load the state of a lazy reference obtained from this session.
    pub fn initialize(&mut self, instance: &EntityRef) -> Result<(), Error> {
        let (descriptor, key) = {
            let borrowed = instance
                .try_borrow()
                .map_err(|_| Error::IllegalState("instance is mutably borrowed".to_string()))?;
            if borrowed.is_initialized() {
                return Ok(());
            }
            let key = borrowed.key().ok_or_else(|| {
                Error::IllegalState(format!("{} has no identifier", borrowed.describe()))
            })?;
            (Arc::clone(borrowed.descriptor()), key)
        };
        match self.context.instance(&key) {
            Some(known) if Rc::ptr_eq(&known, instance) => {}
            _ => {
                return Err(Error::IllegalState(format!(
                    "{} is not associated with this session",
                    key
                )))
            }
        }
        trace!(%key, "initializing lazy reference");
        self.factory.statistics().record_entity_fetch();
        match self.load(&descriptor, &key.id)? {
            Some(_) => Ok(()),
            None => Err(Error::IllegalState(format!("no row found for {}", key))),
        }
    }

    /// Load the elements of a lazy collection.
    pub fn initialize_collection(&mut self, collection: &CollectionRef) -> Result<(), Error> {
        let (role, owner) = {
            let borrowed = collection
                .try_borrow()
                .map_err(|_| Error::IllegalState("collection is mutably borrowed".to_string()))?;
            if borrowed.is_initialized() {
                return Ok(());
            }
            let owner = borrowed.owner.clone().ok_or_else(|| {
                Error::IllegalState(format!("collection {} has no owner", borrowed.role))
            })?;
            (borrowed.role.clone(), owner)
        };
        let [owner_id] = owner.id.values() else {
            return Err(Error::NotYetImplemented(format!(
                "collection {} owned by an entity with a composite identifier",
                role
            )));
        };
        trace!(%role, %owner, "initializing collection");

        let factory = Arc::clone(&self.factory);
        let statement =
            SqmToSqlConverter::new(factory.metamodel(), factory.functions()).collection_loader(&role)?;
        let operation = render_select(&statement);
        let mut assembler = RowAssembler::new(factory.metamodel(), &statement)?;
        let mut bindings = QueryParameterBindings::new();
        bindings.set_positional(1, owner_id.clone());

        let (tuples, pending) = self.assemble(
            &operation,
            &bindings,
            &mut assembler,
            Assembly {
                read_only: self.default_read_only,
                cache_reads: true,
                filling: Some(collection),
            },
        )?;
        {
            let mut target = collection
                .try_borrow_mut()
                .map_err(|_| Error::IllegalState("collection is borrowed".to_string()))?;
            for tuple in &tuples {
                if let Some(element) = tuple.entity(0) {
                    target.add(Rc::clone(element));
                }
            }
        }
        self.initialize_pending(pending)
    }

    /// A new transient instance of `entity` with null state.
    pub fn instantiate(&self, entity: &str) -> Result<EntityRef, Error> {
        let descriptor = self.descriptor(entity)?;
        if descriptor.is_abstract {
            return Err(Error::IllegalArgument(format!(
                "cannot instantiate abstract entity {}",
                entity
            )));
        }
        Ok(EntityInstance::new(descriptor).into_ref())
    }

    /// Make a transient instance managed; it is inserted on the next flush.
    /// The identifier must already be assigned.
    pub fn persist(&mut self, instance: &EntityRef) -> Result<(), Error> {
        if self.context.contains(instance) {
            return Ok(());
        }
        let key = {
            let mut borrowed = instance
                .try_borrow_mut()
                .map_err(|_| Error::IllegalState("instance is borrowed".to_string()))?;
            if borrowed.descriptor().is_abstract {
                return Err(Error::IllegalArgument(format!(
                    "cannot persist abstract entity {}",
                    borrowed.entity_name()
                )));
            }
            let id = borrowed.identifier_from_state().ok_or_else(|| {
                Error::IllegalArgument(format!(
                    "identifier of {} must be assigned before persist",
                    borrowed.entity_name()
                ))
            })?;
            borrowed.assign_identifier(id);
            let key = borrowed.key().ok_or_else(|| {
                Error::IllegalState(format!("{} has no identifier", borrowed.describe()))
            })?;
            for slot in borrowed.slots() {
                if let AttributeValue::Collection(collection) = slot {
                    if let Ok(mut collection) = collection.try_borrow_mut() {
                        collection.owner = Some(key.clone());
                    }
                }
            }
            key
        };
        self.context.add_new(key, Rc::clone(instance))
    }

    /// Schedule a managed instance for deletion.
    pub fn remove(&mut self, instance: &EntityRef) -> Result<(), Error> {
        let key = self.managed_key(instance)?;
        self.context.mark_removed(&key)?;
        Ok(())
    }

    fn managed_key(&self, instance: &EntityRef) -> Result<EntityKey, Error> {
        self.context.key_of(instance).ok_or_else(|| {
            let describe = instance
                .try_borrow()
                .map(|i| i.describe())
                .unwrap_or_else(|_| "instance".to_string());
            Error::IllegalArgument(format!("{} is not managed by this session", describe))
        })
    }

    pub fn set_read_only(&mut self, instance: &EntityRef, read_only: bool) -> Result<(), Error> {
        let key = self.managed_key(instance)?;
        let snapshot = if read_only {
            None
        } else {
            let borrowed = instance
                .try_borrow()
                .map_err(|_| Error::IllegalState("instance is mutably borrowed".to_string()))?;
            Some(borrowed.disassemble(self.factory.metamodel())?)
        };
        self.context.set_read_only(&key, read_only, snapshot)
    }

    pub fn is_read_only(&self, instance: &EntityRef) -> Result<bool, Error> {
        let key = self.managed_key(instance)?;
        Ok(self.context.status(&key) == Some(EntityStatus::ReadOnly))
    }

    /// Detach an instance; its pending changes are discarded.
    pub fn evict(&mut self, instance: &EntityRef) -> Result<(), Error> {
        if let Some(key) = self.context.key_of(instance) {
            self.context.evict(&key);
        }
        Ok(())
    }

    /// Detach everything.
    pub fn clear(&mut self) {
        self.context.clear();
    }

    /// Whether `instance` is managed here and not removed.
    pub fn contains(&self, instance: &EntityRef) -> bool {
        self.context.contains(instance)
    }

    /// Whether a flush would write anything.
    pub fn is_dirty(&self) -> Result<bool, Error> {
        Ok(!ActionQueue::plan(&self.context, self.factory.metamodel())?.is_empty())
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        let queue = ActionQueue::plan(&self.context, self.factory.metamodel())?;
        self.execute_flush(queue)
    }

    fn execute_flush(&mut self, queue: ActionQueue) -> Result<(), Error> {
        let factory = Arc::clone(&self.factory);
        let executor = StatementExecutor::new(&self.connection);
        queue.execute(
            &executor,
            factory.metamodel(),
            &mut self.context,
            factory.cache_access(),
            factory.statistics(),
        )
    }

    /// In `Auto` flush mode, flush if pending writes touch `tables`.
    pub(crate) fn auto_flush(&mut self, tables: &BTreeSet<String>) -> Result<(), Error> {
        if self.factory.options().flush_mode != FlushMode::Auto {
            return Ok(());
        }
        let queue = ActionQueue::plan(&self.context, self.factory.metamodel())?;
        if queue.touches(tables) {
            debug!(tables = ?tables, "auto flush before query");
            self.execute_flush(queue)?;
        }
        Ok(())
    }

    pub fn is_transaction_active(&self) -> bool {
        self.transaction_active
    }

    pub fn begin_transaction(&mut self) -> Result<(), Error> {
        if self.transaction_active {
            return Err(Error::IllegalState("transaction already active".to_string()));
        }
        self.connection.execute_batch("BEGIN")?;
        self.transaction_active = true;
        debug!("transaction started");
        Ok(())
    }

    /// Flush and commit.
    pub fn commit(&mut self) -> Result<(), Error> {
        if !self.transaction_active {
            return Err(Error::IllegalState("no active transaction".to_string()));
        }
        if let Err(e) = self.flush() {
            self.rollback()?;
            return Err(e);
        }
        self.connection.execute_batch("COMMIT")?;
        self.transaction_active = false;
        debug!("transaction committed");
        Ok(())
    }

    /// Roll back and clear the persistence context, whose state may no
    /// longer match the database.
    pub fn rollback(&mut self) -> Result<(), Error> {
        if !self.transaction_active {
            return Err(Error::IllegalState("no active transaction".to_string()));
        }
        self.transaction_active = false;
        self.context.clear();
        self.connection.execute_batch("ROLLBACK")?;
        debug!("transaction rolled back");
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("managed", &self.context.len())
            .field("transaction_active", &self.transaction_active)
            .finish()
    }
}
