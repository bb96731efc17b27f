//! SQL AST: table groups, column references, expressions and statements
//! bound to concrete tables and columns.

use crate::error::Error;
use crate::metamodel::BasicType;
use crate::path::NavigablePath;
use crate::results::DomainResult;
use crate::sqm::SqlRendering;
use crate::value::Value;
use quarry_lang::{
    AggregateFunction, ArithmeticOp, ComparisonOp, JunctionKind, NullPrecedence, Parameter,
    SortDirection,
};
use std::collections::BTreeSet;

/// Index of a table group in its statement's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableGroupId(pub usize);

/// A table with the identification variable it is known by in the statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableReference {
    pub table_name: String,
    pub identification_variable: String,
}

impl TableReference {
    pub fn new(table_name: impl Into<String>, identification_variable: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            identification_variable: identification_variable.into(),
        }
    }

    pub fn column(&self, column: impl Into<String>, jdbc_type: BasicType) -> ColumnReference {
        ColumnReference {
            qualifier: self.identification_variable.clone(),
            column: column.into(),
            jdbc_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlJoinType {
    Inner,
    Left,
}

impl SqlJoinType {
    pub fn sql(self) -> &'static str {
        match self {
            SqlJoinType::Inner => "join",
            SqlJoinType::Left => "left join",
        }
    }
}

impl From<quarry_lang::JoinType> for SqlJoinType {
    fn from(join_type: quarry_lang::JoinType) -> Self {
        match join_type {
            quarry_lang::JoinType::Inner => SqlJoinType::Inner,
            quarry_lang::JoinType::Left => SqlJoinType::Left,
        }
    }
}

/// A secondary table of the same entity, joined on the identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct TableReferenceJoin {
    pub join_type: SqlJoinType,
    pub reference: TableReference,
    pub predicate: Predicate,
}

/// Another table group reached through an association.
#[derive(Debug, Clone, PartialEq)]
pub struct TableGroupJoin {
    pub join_type: SqlJoinType,
    pub group: TableGroupId,
    pub predicate: Predicate,
}

/// The tables backing one navigable path: the entity's primary table plus its
/// secondary tables, and the groups joined from it.
#[derive(Debug, Clone, PartialEq)]
pub struct TableGroup {
    pub navigable_path: NavigablePath,
    /// Alias given in the query text, if any.
    pub source_alias: Option<String>,
    pub entity: String,
    pub primary_table: TableReference,
    pub table_reference_joins: Vec<TableReferenceJoin>,
    pub table_group_joins: Vec<TableGroupJoin>,
}

impl TableGroup {
    /// Find the primary or a secondary table reference by table name.
    pub fn resolve_table_reference(&self, table_name: &str) -> Result<&TableReference, Error> {
        if self.primary_table.table_name == table_name {
            return Ok(&self.primary_table);
        }
        self.table_reference_joins
            .iter()
            .map(|j| &j.reference)
            .find(|r| r.table_name == table_name)
            .ok_or_else(|| {
                Error::Translation(format!(
                    "unable to resolve table reference '{}' for '{}'; available tables: [{}]",
                    table_name,
                    self.navigable_path,
                    self.table_names().join(", ")
                ))
            })
    }

    pub fn table_names(&self) -> Vec<&str> {
        std::iter::once(self.primary_table.table_name.as_str())
            .chain(
                self.table_reference_joins
                    .iter()
                    .map(|j| j.reference.table_name.as_str()),
            )
            .collect()
    }
}

/// `qualifier.column`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnReference {
    pub qualifier: String,
    pub column: String,
    pub jdbc_type: BasicType,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expression {
    Column(ColumnReference),
    Literal {
        value: Value,
        ty: Option<BasicType>,
    },
    Parameter {
        parameter: Parameter,
        ty: Option<BasicType>,
    },
    Binary {
        op: ArithmeticOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Negated(Box<Expression>),
    Function {
        rendering: SqlRendering,
        arguments: Vec<Expression>,
    },
    Aggregate {
        function: AggregateFunction,
        distinct: bool,
        /// `None` for `count(*)`.
        argument: Option<Box<Expression>>,
    },
    /// Row value, e.g. a composite identifier.
    Tuple(Vec<Expression>),
    /// Branches are evaluated in order; the first match wins.
    SearchedCase {
        branches: Vec<(Predicate, Expression)>,
        otherwise: Option<Box<Expression>>,
    },
    SimpleCase {
        operand: Box<Expression>,
        branches: Vec<(Expression, Expression)>,
        otherwise: Option<Box<Expression>>,
    },
}

impl Expression {
    pub fn column(reference: ColumnReference) -> Self {
        Expression::Column(reference)
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        let value = value.into();
        let ty = BasicType::of_value(&value);
        Expression::Literal { value, ty }
    }
}

/// A correlated subquery over a single table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubQuery {
    /// Empty selects the constant `1`.
    pub selection: Vec<Expression>,
    pub table: TableReference,
    pub restriction: Predicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Predicate {
    Comparison {
        op: ComparisonOp,
        lhs: Expression,
        rhs: Expression,
    },
    Junction {
        kind: JunctionKind,
        predicates: Vec<Predicate>,
    },
    Negated(Box<Predicate>),
    Between {
        expression: Expression,
        low: Expression,
        high: Expression,
        negated: bool,
    },
    IsNull {
        expression: Expression,
        negated: bool,
    },
    Like {
        expression: Expression,
        pattern: Expression,
        escape: Option<Expression>,
        negated: bool,
    },
    InList {
        expression: Expression,
        values: Vec<Expression>,
        negated: bool,
    },
    InSubQuery {
        expression: Expression,
        subquery: Box<SubQuery>,
        negated: bool,
    },
    Exists {
        subquery: Box<SubQuery>,
        negated: bool,
    },
}

impl Predicate {
    pub fn eq(lhs: Expression, rhs: Expression) -> Self {
        Predicate::Comparison {
            op: ComparisonOp::Eq,
            lhs,
            rhs,
        }
    }

    /// Conjunction of `predicates`, flattening single elements.
    pub fn and(mut predicates: Vec<Predicate>) -> Option<Self> {
        match predicates.len() {
            0 => None,
            1 => predicates.pop(),
            _ => Some(Predicate::Junction {
                kind: JunctionKind::And,
                predicates,
            }),
        }
    }

    /// Column-wise equality between two equally long column lists.
    pub fn columns_equal(lhs: Vec<ColumnReference>, rhs: Vec<ColumnReference>) -> Option<Self> {
        Self::and(
            lhs.into_iter()
                .zip(rhs)
                .map(|(l, r)| Predicate::eq(Expression::Column(l), Expression::Column(r)))
                .collect(),
        )
    }
}

/// A projected expression and its stable position in the row.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlSelection {
    pub position: usize,
    pub expression: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortSpecification {
    pub expression: Expression,
    pub direction: SortDirection,
    pub nulls: Option<NullPrecedence>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuerySpec {
    pub distinct: bool,
    pub selections: Vec<SqlSelection>,
    pub roots: Vec<TableGroupId>,
    pub where_clause: Option<Predicate>,
    pub group_by: Vec<Expression>,
    pub having: Option<Predicate>,
    pub order_by: Vec<SortSpecification>,
    pub limit: Option<Expression>,
    pub offset: Option<Expression>,
}

/// A select statement with its table-group arena and the domain results that
/// describe how rows become objects.
#[derive(Debug, Clone)]
pub struct SelectStatement {
    pub table_groups: Vec<TableGroup>,
    pub query_spec: QuerySpec,
    pub domain_results: Vec<DomainResult>,
    pub affected_tables: BTreeSet<String>,
    /// Rows repeat the root entity once per collection element.
    pub has_collection_fetch: bool,
}

impl SelectStatement {
    pub fn table_group(&self, id: TableGroupId) -> &TableGroup {
        &self.table_groups[id.0]
    }

    /// Joins reachable from the roots.
    pub fn join_count(&self) -> usize {
        self.table_groups
            .iter()
            .map(|g| g.table_group_joins.len())
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: ColumnReference,
    pub value: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub target: TableReference,
    pub assignments: Vec<Assignment>,
    pub restriction: Option<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub target: TableReference,
    pub restriction: Option<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub target: TableReference,
    pub columns: Vec<String>,
    pub values: Vec<Expression>,
}

/// Any statement the renderer accepts.
#[derive(Debug, Clone)]
pub enum Statement {
    Select(SelectStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    Insert(InsertStatement),
}

impl Statement {
    /// Tables the statement reads or writes.
    pub fn affected_tables(&self) -> BTreeSet<String> {
        match self {
            Statement::Select(s) => s.affected_tables.clone(),
            Statement::Update(u) => BTreeSet::from([u.target.table_name.clone()]),
            Statement::Delete(d) => BTreeSet::from([d.target.table_name.clone()]),
            Statement::Insert(i) => BTreeSet::from([i.target.table_name.clone()]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> TableGroup {
        let primary = TableReference::new("customers", "c1_0");
        let secondary = TableReference::new("customer_details", "c1_1");
        TableGroup {
            navigable_path: NavigablePath::root("Customer", "c"),
            source_alias: Some("c".into()),
            entity: "Customer".into(),
            primary_table: primary.clone(),
            table_reference_joins: vec![TableReferenceJoin {
                join_type: SqlJoinType::Left,
                predicate: Predicate::eq(
                    Expression::Column(primary.column("id", BasicType::Long)),
                    Expression::Column(secondary.column("customer_id", BasicType::Long)),
                ),
                reference: secondary,
            }],
            table_group_joins: Vec::new(),
        }
    }

    #[test]
    fn resolves_primary_and_secondary_references() {
        let group = group();
        assert_eq!(
            group.resolve_table_reference("customers").unwrap().identification_variable,
            "c1_0"
        );
        assert_eq!(
            group
                .resolve_table_reference("customer_details")
                .unwrap()
                .identification_variable,
            "c1_1"
        );
    }

    #[test]
    fn unknown_table_lists_available_tables() {
        let err = group().resolve_table_reference("orders").unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, Error::Translation(_)));
        assert!(message.contains("'orders'"));
        assert!(message.contains("[customers, customer_details]"));
    }

    #[test]
    fn structural_identity() {
        let a = Expression::Column(ColumnReference {
            qualifier: "o1_0".into(),
            column: "total".into(),
            jdbc_type: BasicType::Double,
        });
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, Expression::literal(1));
        assert_eq!(Predicate::and(vec![]), None);
        assert!(matches!(
            Predicate::and(vec![Predicate::eq(a.clone(), b.clone())]),
            Some(Predicate::Comparison { .. })
        ));
    }
}
