//! Core error types.

use quarry_lang::{render_diagnostic, ParseError, Span};
use thiserror::Error;

/// Errors raised by the metamodel, query pipeline and session.
#[derive(Debug, Error)]
pub enum Error {
    /// A name or navigable role that the metamodel does not know.
    #[error("'{0}' is not navigable")]
    NotNavigable(String),

    /// Illegal use of the API, e.g. asking for the descriptor of an unmapped type.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// Inconsistent boot model or instance state that does not fit the mapping.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// Malformed query text.
    #[error("syntax error: {0}")]
    Syntax(#[from] ParseError),

    /// Well-formed query that does not make sense against the metamodel.
    #[error("semantic error: {0}")]
    Semantic(#[from] SemanticError),

    /// SQM could not be turned into SQL.
    #[error("translation error: {0}")]
    Translation(String),

    /// The result assembler could not be built for a domain result.
    #[error("unable to create assembler: {0}")]
    AssemblerCreation(String),

    /// The database rejected a statement.
    #[error("database error executing [{sql}]: {source}")]
    Database {
        sql: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Database failure outside of statement execution (transactions, pragmas).
    #[error("database error: {0}")]
    Connection(#[from] rusqlite::Error),

    /// A recognized construct that is not supported yet.
    #[error("not yet implemented: {0}")]
    NotYetImplemented(String),

    /// Operation is not valid in the current session or entity state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Missing or ill-typed query parameter binding.
    #[error("parameter error: {0}")]
    Parameter(String),

    /// A single result was requested but the query produced several.
    #[error("query returned {0} results where at most one was expected")]
    NonUniqueResult(usize),

    /// Second-level cache entry could not be encoded or decoded.
    #[error("cache error: {0}")]
    Cache(String),
}

impl Error {
    /// Render the error against the query text when it carries a span.
    pub fn format_with_source(&self, source: &str) -> String {
        match self {
            Error::Syntax(e) => e.format_with_source(source),
            Error::Semantic(e) => e.format_with_source(source),
            other => format!("error: {}\n", other),
        }
    }
}

/// Kinds of semantic errors, for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticErrorKind {
    UnknownEntity,
    UnknownAlias,
    UnknownAttribute,
    UnknownFunction,
    DuplicateAlias,
    TypeMismatch,
    InvalidPath,
    InvalidFetchJoin,
    InvalidArguments,
    MissingParameter,
}

/// A query that parses but does not type-check against the metamodel.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} [{fragment}]")]
pub struct SemanticError {
    pub kind: SemanticErrorKind,
    pub message: String,
    /// The offending fragment of the query text.
    pub fragment: String,
    pub span: Span,
}

impl SemanticError {
    pub fn new(
        kind: SemanticErrorKind,
        message: impl Into<String>,
        source: &str,
        span: Span,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            fragment: span.slice(source).to_string(),
            span,
        }
    }

    pub fn format_with_source(&self, source: &str) -> String {
        render_diagnostic(
            source,
            &format!("error[{:?}]", self.kind),
            &self.message,
            self.span,
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semantic_error_carries_fragment() {
        let source = "select o from Order o where o.total > 1";
        let err = SemanticError::new(
            SemanticErrorKind::UnknownAttribute,
            "unknown attribute 'total' on 'Order'",
            source,
            Span::new(28, 35),
        );
        assert_eq!(err.fragment, "o.total");
        assert!(err.to_string().contains("[o.total]"));
        assert!(err.format_with_source(source).contains("UnknownAttribute"));
    }

    #[test]
    fn parse_errors_convert() {
        let err: Error = ParseError::new("boom", Span::new(0, 1)).into();
        assert!(matches!(err, Error::Syntax(_)));
    }
}
