//! Quarry Core - metamodel, query translation, execution and sessions.
//!
//! A query travels through three representations: the syntax tree from
//! `quarry-lang`, the semantic query model ([`sqm`]) resolved against the
//! [`metamodel`], and the SQL AST ([`sql`]) rendered for SQLite. Sessions
//! execute the SQL and assemble rows into managed entity instances.

pub mod cache;
pub mod config;
pub mod error;
pub mod exec;
pub mod jpa;
pub mod metamodel;
pub mod path;
pub mod results;
pub mod session;
pub mod sql;
pub mod sqm;
pub mod value;

#[cfg(test)]
mod testing;

pub use cache::{CacheEntry, InMemoryCache, SecondLevelCache, Statistics, StatisticsSnapshot};
pub use config::{FlushMode, SessionFactoryOptions};
pub use error::{Error, SemanticError, SemanticErrorKind};
pub use jpa::{EntityGraph, GraphSemantic, JpaMetamodel};
pub use metamodel::{
    AttributeDescriptor, BasicType, BootModel, EmbeddableMapping, EntityMapping, FetchStrategy,
    Metamodel,
};
pub use path::NavigablePath;
pub use results::{EmbeddableValue, EntityInstance, EntityRef, ResultItem, Tuple};
pub use session::{Database, Query, Session, SessionFactory, SessionFactoryBuilder};
pub use value::{Identifier, Value};

/// Re-export the query language parser.
pub use quarry_lang as lang;
