//! Semantic query model: the query language resolved against the metamodel.
//!
//! Interpretation runs in two steps. `quarry_lang::parse` produces a syntax
//! tree; [`SemanticQueryBuilder`] resolves aliases, paths and functions and
//! infers types, yielding an [`SqmStatement`] that the SQL converter consumes.

mod builder;
mod function;
mod tree;

pub use builder::{interpret, SemanticQueryBuilder};
pub use function::{
    aggregate_type, ArgumentKind, FunctionDescriptor, FunctionRegistry, ReturnType, SqlRendering,
};
pub use tree::{
    SqmAssignment, SqmDeleteStatement, SqmExpression, SqmJoin, SqmJoinTarget, SqmParameterInfo,
    SqmPath, SqmPathKind, SqmPredicate, SqmQuerySpec, SqmRoot, SqmSelectStatement, SqmSelection,
    SqmSortSpecification, SqmStatement, SqmUpdateStatement,
};
