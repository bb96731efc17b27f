//! Parameter binding and statement execution.

mod bindings;
mod jdbc;

pub use bindings::QueryParameterBindings;
pub use jdbc::{read_value, StatementExecutor};
