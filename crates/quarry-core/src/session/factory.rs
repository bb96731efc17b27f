//! Session factory: the immutable, shared half of the runtime.

use super::Session;
use crate::cache::{
    EntityCacheAccess, InMemoryCache, QueryInterpretationCache, SecondLevelCache, Statistics,
};
use crate::config::SessionFactoryOptions;
use crate::error::Error;
use crate::jpa::JpaMetamodel;
use crate::metamodel::Metamodel;
use crate::sql::{render, JdbcOperation, SqmToSqlConverter};
use crate::sqm::{interpret, FunctionRegistry, SqmStatement};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

static MEMORY_DATABASES: AtomicU64 = AtomicU64::new(0);

/// Where sessions connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Database {
    File(PathBuf),
    /// A named shared in-memory database that lives as long as the factory.
    Memory(String),
}

impl Database {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Database::File(path.as_ref().to_path_buf())
    }

    /// A fresh in-memory database private to one factory.
    pub fn memory() -> Self {
        let n = MEMORY_DATABASES.fetch_add(1, Ordering::Relaxed);
        Database::Memory(format!("quarry-{}-{}", std::process::id(), n))
    }

    fn uri(&self) -> String {
        match self {
            Database::File(path) => path.display().to_string(),
            Database::Memory(name) => format!("file:{}?mode=memory&cache=shared", name),
        }
    }
}

pub struct SessionFactoryBuilder {
    metamodel: Arc<Metamodel>,
    options: SessionFactoryOptions,
    database: Database,
    cache: Option<Arc<dyn SecondLevelCache>>,
    functions: FunctionRegistry,
}

impl SessionFactoryBuilder {
    pub fn options(mut self, options: SessionFactoryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn database(mut self, database: Database) -> Self {
        self.database = database;
        self
    }

    pub fn database_path(self, path: impl AsRef<Path>) -> Self {
        self.database(Database::file(path))
    }

    /// Replace the default in-memory second-level cache.
    pub fn second_level_cache(mut self, cache: Arc<dyn SecondLevelCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    pub fn build(self) -> Result<Arc<SessionFactory>, Error> {
        let factory = SessionFactory {
            jpa: JpaMetamodel::new(Arc::clone(&self.metamodel)),
            metamodel: self.metamodel,
            functions: self.functions,
            statistics: Statistics::new(self.options.statistics),
            interpretations: QueryInterpretationCache::new(self.options.query_cache_size),
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(InMemoryCache::new())),
            options: self.options,
            database: self.database,
            keep_alive: None,
        };
        let keep_alive = match factory.database {
            Database::Memory(_) => Some(Mutex::new(factory.connect()?)),
            Database::File(_) => None,
        };
        let factory = SessionFactory {
            keep_alive,
            ..factory
        };
        info!(
            entities = factory.metamodel.entity_count(),
            database = %factory.database.uri(),
            second_level_cache = factory.options.second_level_cache,
            "session factory built"
        );
        Ok(Arc::new(factory))
    }
}

/// Thread-safe owner of the metamodel, caches and statistics. Sessions are
/// opened from an `Arc<SessionFactory>`.
pub struct SessionFactory {
    metamodel: Arc<Metamodel>,
    jpa: JpaMetamodel,
    functions: FunctionRegistry,
    options: SessionFactoryOptions,
    cache: Arc<dyn SecondLevelCache>,
    statistics: Statistics,
    interpretations: QueryInterpretationCache,
    database: Database,
    keep_alive: Option<Mutex<Connection>>,
}

impl std::fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFactory")
            .field("entities", &self.metamodel.entity_count())
            .field("database", &self.database)
            .field("options", &self.options)
            .finish()
    }
}

impl SessionFactory {
    /// A builder connecting to a fresh in-memory database by default.
    pub fn builder(metamodel: impl Into<Arc<Metamodel>>) -> SessionFactoryBuilder {
        SessionFactoryBuilder {
            metamodel: metamodel.into(),
            options: SessionFactoryOptions::default(),
            database: Database::memory(),
            cache: None,
            functions: FunctionRegistry::standard(),
        }
    }

    pub fn metamodel(&self) -> &Arc<Metamodel> {
        &self.metamodel
    }

    pub fn jpa_metamodel(&self) -> &JpaMetamodel {
        &self.jpa
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn options(&self) -> &SessionFactoryOptions {
        &self.options
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn second_level_cache(&self) -> &Arc<dyn SecondLevelCache> {
        &self.cache
    }

    pub fn interpretation_cache(&self) -> &QueryInterpretationCache {
        &self.interpretations
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub(crate) fn cache_access(&self) -> Option<EntityCacheAccess<'_>> {
        self.options
            .second_level_cache
            .then(|| EntityCacheAccess::new(self.cache.as_ref(), &self.statistics))
    }

    /// Parse and interpret `query`, reusing an earlier interpretation of the
    /// same text.
    pub fn interpret(&self, query: &str) -> Result<Arc<SqmStatement>, Error> {
        let (statement, hit) = self
            .interpretations
            .get_or_try_insert(query, || interpret(&self.metamodel, &self.functions, query))?;
        if hit {
            self.statistics.record_interpretation_hit();
        } else {
            self.statistics.record_interpretation_miss();
        }
        Ok(statement)
    }

    /// SQL and parameter binders for `query`, without executing it.
    pub fn translate(&self, query: &str) -> Result<JdbcOperation, Error> {
        let statement = self.interpret(query)?;
        let sql = SqmToSqlConverter::new(&self.metamodel, &self.functions).convert(&statement)?;
        let operation = render(&sql);
        debug!(query, sql = %operation.sql, "translated query");
        Ok(operation)
    }

    pub(crate) fn connect(&self) -> Result<Connection, Error> {
        let connection = Connection::open(self.database.uri())?;
        connection.busy_timeout(self.options.busy_timeout)?;
        Ok(connection)
    }

    /// Run a batch of SQL (typically DDL) outside any session.
    pub fn execute_batch(&self, sql: &str) -> Result<(), Error> {
        match &self.keep_alive {
            Some(connection) => connection.lock().execute_batch(sql)?,
            None => self.connect()?.execute_batch(sql)?,
        }
        Ok(())
    }

    pub fn open_session(self: &Arc<Self>) -> Result<Session, Error> {
        let connection = self.connect()?;
        Ok(Session::new(Arc::clone(self), connection))
    }

    /// A session over a caller-supplied connection.
    pub fn open_session_with(self: &Arc<Self>, connection: Connection) -> Session {
        Session::new(Arc::clone(self), connection)
    }

    /// Drop every cached instance of `entity`'s hierarchy.
    pub fn evict_entity_region(&self, entity: &str) -> Result<(), Error> {
        let descriptor = self.metamodel.entity_descriptor(entity)?;
        self.cache.evict_region(descriptor.cache_region());
        Ok(())
    }

    pub fn evict_all(&self) {
        self.cache.clear();
    }
}
