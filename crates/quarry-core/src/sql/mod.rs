//! SQL AST, SQM conversion and SQL text rendering.

mod ast;
mod converter;
mod from_clause;
mod render;

pub use ast::{
    Assignment, ColumnReference, DeleteStatement, Expression, InsertStatement, Predicate,
    QuerySpec, SelectStatement, SortSpecification, SqlJoinType, SqlSelection, Statement, SubQuery,
    TableGroup, TableGroupId, TableGroupJoin, TableReference, TableReferenceJoin, UpdateStatement,
};
pub use converter::{SelectionRegistry, SqmToSqlConverter};
pub use from_clause::FromClauseIndex;
pub use render::{render, render_select, JdbcOperation, ParameterBinder};
