//! Executable queries bound to a session.

use super::Session;
use crate::error::Error;
use crate::exec::{QueryParameterBindings, StatementExecutor};
use crate::jpa::{EntityGraph, GraphSemantic};
use crate::results::Tuple;
use crate::sql::{render, Expression, SelectStatement, SqmToSqlConverter, Statement};
use crate::sqm::{SqmParameterInfo, SqmStatement};
use crate::value::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A query created by [`Session::create_query`]. Builders consume and return
/// the query; [`list`](Query::list), [`single_result`](Query::single_result)
/// and [`execute_update`](Query::execute_update) run it.
pub struct Query<'s> {
    session: &'s mut Session,
    query: String,
    statement: Arc<SqmStatement>,
    bindings: QueryParameterBindings,
    first_result: Option<usize>,
    max_results: Option<usize>,
    read_only: Option<bool>,
    graph: Option<(Arc<EntityGraph>, GraphSemantic)>,
}

impl<'s> Query<'s> {
    pub(crate) fn new(session: &'s mut Session, query: &str, statement: Arc<SqmStatement>) -> Self {
        Self {
            session,
            query: query.to_string(),
            statement,
            bindings: QueryParameterBindings::new(),
            first_result: None,
            max_results: None,
            read_only: None,
            graph: None,
        }
    }

    pub fn query_string(&self) -> &str {
        &self.query
    }

    /// Declared parameters in first-occurrence order.
    pub fn parameters(&self) -> &[SqmParameterInfo] {
        self.statement.parameters()
    }

    pub fn set_parameter(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.bindings.set_named(name, value);
        self
    }

    pub fn set_positional_parameter(mut self, position: u32, value: impl Into<Value>) -> Self {
        self.bindings.set_positional(position, value);
        self
    }

    pub fn set_first_result(mut self, first: usize) -> Self {
        self.first_result = Some(first);
        self
    }

    pub fn set_max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    /// Entities this query loads enter the context read-only.
    pub fn set_read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    pub fn with_entity_graph(mut self, graph: Arc<EntityGraph>, semantic: GraphSemantic) -> Self {
        self.graph = Some((graph, semantic));
        self
    }

    /// Apply a named entity graph through the fetch or load graph hint.
    /// Unknown hints are ignored.
    pub fn set_hint(self, hint: &str, graph_name: &str) -> Result<Self, Error> {
        let Some(semantic) = GraphSemantic::from_hint(hint) else {
            warn!(hint, "ignoring unknown query hint");
            return Ok(self);
        };
        let graph = self
            .session
            .factory()
            .jpa_metamodel()
            .find_entity_graph(graph_name)
            .ok_or_else(|| Error::IllegalArgument(format!("no entity graph named {}", graph_name)))?;
        Ok(self.with_entity_graph(graph, semantic))
    }

    fn convert(&self) -> Result<Statement, Error> {
        let factory = self.session.factory();
        let converter = SqmToSqlConverter::new(factory.metamodel(), factory.functions());
        match &self.graph {
            Some((graph, semantic)) => converter
                .with_entity_graph(graph, *semantic)
                .convert(&self.statement),
            None => converter.convert(&self.statement),
        }
    }

    /// The SQL this query runs, with row limits applied.
    pub fn sql(&self) -> Result<String, Error> {
        let statement = match self.convert()? {
            Statement::Select(select) => Statement::Select(self.limit_in_sql(select)),
            other => other,
        };
        Ok(render(&statement).sql)
    }

    /// Push first/max results into the SQL unless rows repeat per collection
    /// element, in which case they are applied after de-duplication.
    fn limit_in_sql(&self, mut select: SelectStatement) -> SelectStatement {
        if select.has_collection_fetch {
            return select;
        }
        if let Some(max) = self.max_results {
            select.query_spec.limit = Some(Expression::literal(max as i64));
        }
        if let Some(first) = self.first_result {
            select.query_spec.offset = Some(Expression::literal(first as i64));
        }
        select
    }

    pub fn list(self) -> Result<Vec<Tuple>, Error> {
        let select = match self.convert()? {
            Statement::Select(select) => select,
            _ => {
                return Err(Error::IllegalState(format!(
                    "not a select query: {}",
                    self.query
                )))
            }
        };
        self.bindings.validate(self.statement.parameters())?;
        let in_memory = select.has_collection_fetch
            && (self.first_result.is_some() || self.max_results.is_some());
        if in_memory {
            warn!(query = %self.query, "first/max results with collection fetch; applying in memory");
        }
        let select = self.limit_in_sql(select);

        let read_only = self.read_only.unwrap_or(self.session.is_default_read_only());
        self.session.auto_flush(&select.affected_tables)?;
        let factory = Arc::clone(self.session.factory());
        if factory.options().log_sql {
            info!(target: "quarry::sql", query = %self.query, "executing query");
        }
        let tuples = self.session.run_select(&select, &self.bindings, read_only)?;
        factory.statistics().record_query_execution();
        debug!(query = %self.query, rows = tuples.len(), "query executed");

        if !in_memory {
            return Ok(tuples);
        }
        let first = self.first_result.unwrap_or(0);
        let max = self.max_results.unwrap_or(usize::MAX);
        Ok(tuples.into_iter().skip(first).take(max).collect())
    }

    /// The only result, `None` if there is none.
    pub fn single_result(self) -> Result<Option<Tuple>, Error> {
        let mut tuples = self.list()?;
        match tuples.len() {
            0 => Ok(None),
            1 => Ok(tuples.pop()),
            n => Err(Error::NonUniqueResult(n)),
        }
    }

    /// Run an update or delete statement and return the affected row count.
    /// Cached state of every entity stored in the target table is evicted.
    pub fn execute_update(self) -> Result<usize, Error> {
        let statement = self.convert()?;
        if matches!(statement, Statement::Select(_)) {
            return Err(Error::IllegalState(format!(
                "not an update or delete statement: {}",
                self.query
            )));
        }
        self.bindings.validate(self.statement.parameters())?;
        let operation = render(&statement);
        self.session.auto_flush(&operation.affected_tables)?;

        let factory = Arc::clone(self.session.factory());
        if factory.options().log_sql {
            info!(target: "quarry::sql", "{}", operation.sql);
        }
        let executor = StatementExecutor::new(self.session.connection());
        let count = executor.execute_update(&operation, &self.bindings)?;
        factory.statistics().record_query_execution();

        let metamodel = factory.metamodel();
        for descriptor in metamodel.entities_for_tables(operation.affected_tables.iter().map(String::as_str)) {
            factory.second_level_cache().evict_region(descriptor.cache_region());
        }
        debug!(query = %self.query, rows = count, "bulk statement executed");
        Ok(count)
    }
}

impl std::fmt::Debug for Query<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("query", &self.query)
            .field("first_result", &self.first_result)
            .field("max_results", &self.max_results)
            .finish()
    }
}
