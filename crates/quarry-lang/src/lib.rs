//! Quarry Query Language
//!
//! This crate provides the lexer and parser for Quarry's object query
//! language, an HQL-style dialect that queries entities and their attributes
//! rather than tables and columns.
//!
//! # Query Language Syntax
//!
//! ## Selects
//!
//! ```text
//! from Order
//! select o from Order o where o.amount > 100 order by o.orderNumber
//! select o from Order o join fetch o.lineItems li where li.quantity >= :min
//! select c.name, count(o) from Customer c left join c.orders o group by c.name
//! select case when o.amount > 1000 then 'big' else 'small' end from Order o
//! from Order o where :item member of o.lineItems
//! ```
//!
//! ## Updates and deletes
//!
//! ```text
//! update Order o set o.status = 'CLOSED' where o.amount < 10
//! delete from Order o where o.status = 'CANCELLED'
//! ```
//!
//! # Usage
//!
//! ```rust
//! use quarry_lang::{parse, Statement};
//!
//! let stmt = parse("select o from Order o where o.amount > 100").unwrap();
//! assert!(matches!(stmt, Statement::Select(_)));
//! ```
//!
//! Name resolution and typing are not done here; see `quarry-core`.

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod span;

pub use ast::{
    AggregateFunction, ArithmeticOp, Assignment, ComparisonOp, DeleteStatement, DottedPath,
    Expression, FromClause, FromRoot, Join, JoinType, JunctionKind, Literal, NullPrecedence,
    Parameter, Predicate, SelectClause, SelectItem, SelectStatement, SortDirection, SortItem,
    Statement, UpdateStatement,
};
pub use error::{render_diagnostic, ParseError};
pub use lexer::{SpannedToken, Token};
pub use span::{Span, Spanned};

/// Parse a query string into a syntax tree.
///
/// # Example
///
/// ```rust
/// use quarry_lang::parse;
///
/// let stmt = parse("delete from Order o where o.amount < 10").unwrap();
/// ```
pub fn parse(source: &str) -> Result<Statement, ParseError> {
    parser::parse(source)
}

/// Tokenize a source string (useful for debugging and tooling).
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, ParseError> {
    lexer::tokenize(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entry_point() {
        let stmt = parse("from Order o").unwrap();
        assert!(matches!(stmt, Statement::Select(_)));
    }

    #[test]
    fn test_error_formatting_end_to_end() {
        let source = "select o from Order o where o.amount >";
        let err = parse(source).unwrap_err();
        let formatted = err.format_with_source(source);
        assert!(formatted.contains("unexpected end of input"));
        assert!(formatted.contains("line 1:"));
    }

    #[test]
    fn test_tokenize_entry_point() {
        let tokens = tokenize("from Order").unwrap();
        assert_eq!(tokens.len(), 2);
    }
}
