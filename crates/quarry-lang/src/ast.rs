//! Syntax tree for the object query language.
//!
//! The tree is purely syntactic: names are not checked against any mapping
//! and expressions carry no types. Semantic analysis happens downstream.

use crate::span::{Span, Spanned};

/// A top-level statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
}

impl Statement {
    pub fn span(&self) -> Span {
        match self {
            Statement::Select(s) => s.span,
            Statement::Update(u) => u.span,
            Statement::Delete(d) => d.span,
        }
    }
}

/// `select ... from ... where ... group by ... having ... order by ... limit ... offset ...`
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    /// `None` when the query starts with `from` (selects every root).
    pub select: Option<SelectClause>,
    pub from: FromClause,
    pub where_clause: Option<Predicate>,
    pub group_by: Vec<Expression>,
    pub having: Option<Predicate>,
    pub order_by: Vec<SortItem>,
    pub limit: Option<Expression>,
    pub offset: Option<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectClause {
    pub distinct: bool,
    pub items: Vec<SelectItem>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expression: Expression,
    pub alias: Option<Spanned<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FromClause {
    pub roots: Vec<FromRoot>,
    pub span: Span,
}

/// A root entity reference together with the joins hanging off it.
#[derive(Debug, Clone, PartialEq)]
pub struct FromRoot {
    pub entity: Spanned<String>,
    pub alias: Option<Spanned<String>>,
    pub joins: Vec<Join>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Left,
}

/// `[inner | left [outer]] join [fetch] alias.attribute [as] alias [on predicate]`
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub fetch: bool,
    pub path: DottedPath,
    pub alias: Option<Spanned<String>>,
    pub condition: Option<Predicate>,
    pub span: Span,
}

/// A dotted reference such as `o.customer.name`.
#[derive(Debug, Clone, PartialEq)]
pub struct DottedPath {
    pub segments: Vec<Spanned<String>>,
    pub span: Span,
}

impl DottedPath {
    /// The path as written, segments joined by `.`.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.value.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Literal values as written in the query.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Decimal(f64),
    /// A single-character quoted literal, e.g. `'A'`.
    Character(char),
    String(String),
}

/// Query parameter reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Parameter {
    /// `:name`
    Named(String),
    /// `?1`
    Positional(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(AggregateFunction::Count),
            "sum" => Some(AggregateFunction::Sum),
            "avg" => Some(AggregateFunction::Avg),
            "min" => Some(AggregateFunction::Min),
            "max" => Some(AggregateFunction::Max),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }
}

/// Value expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Path(DottedPath),
    Literal(Spanned<Literal>),
    Parameter(Spanned<Parameter>),
    Arithmetic {
        op: ArithmeticOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
        span: Span,
    },
    Negate {
        operand: Box<Expression>,
        span: Span,
    },
    Function {
        name: Spanned<String>,
        arguments: Vec<Expression>,
        span: Span,
    },
    Aggregate {
        function: AggregateFunction,
        distinct: bool,
        /// `None` for `count(*)`.
        argument: Option<Box<Expression>>,
        span: Span,
    },
    /// `case when p then e ... [else e] end`
    SearchedCase {
        branches: Vec<(Predicate, Expression)>,
        otherwise: Option<Box<Expression>>,
        span: Span,
    },
    /// `case x when v then e ... [else e] end`
    SimpleCase {
        operand: Box<Expression>,
        branches: Vec<(Expression, Expression)>,
        otherwise: Option<Box<Expression>>,
        span: Span,
    },
}

impl Expression {
    pub fn span(&self) -> Span {
        match self {
            Expression::Path(p) => p.span,
            Expression::Literal(l) => l.span,
            Expression::Parameter(p) => p.span,
            Expression::Arithmetic { span, .. }
            | Expression::Negate { span, .. }
            | Expression::Function { span, .. }
            | Expression::Aggregate { span, .. }
            | Expression::SearchedCase { span, .. }
            | Expression::SimpleCase { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JunctionKind {
    And,
    Or,
}

/// Boolean conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Comparison {
        op: ComparisonOp,
        lhs: Expression,
        rhs: Expression,
        span: Span,
    },
    Junction {
        kind: JunctionKind,
        predicates: Vec<Predicate>,
        span: Span,
    },
    Not {
        predicate: Box<Predicate>,
        span: Span,
    },
    Between {
        expression: Expression,
        low: Expression,
        high: Expression,
        negated: bool,
        span: Span,
    },
    IsNull {
        expression: Expression,
        negated: bool,
        span: Span,
    },
    Like {
        expression: Expression,
        pattern: Expression,
        escape: Option<Expression>,
        negated: bool,
        span: Span,
    },
    InList {
        expression: Expression,
        values: Vec<Expression>,
        negated: bool,
        span: Span,
    },
    MemberOf {
        element: Expression,
        collection: DottedPath,
        negated: bool,
        span: Span,
    },
    IsEmpty {
        collection: DottedPath,
        negated: bool,
        span: Span,
    },
}

impl Predicate {
    pub fn span(&self) -> Span {
        match self {
            Predicate::Comparison { span, .. }
            | Predicate::Junction { span, .. }
            | Predicate::Not { span, .. }
            | Predicate::Between { span, .. }
            | Predicate::IsNull { span, .. }
            | Predicate::Like { span, .. }
            | Predicate::InList { span, .. }
            | Predicate::MemberOf { span, .. }
            | Predicate::IsEmpty { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NullPrecedence {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortItem {
    pub expression: Expression,
    pub direction: SortDirection,
    pub nulls: Option<NullPrecedence>,
    pub span: Span,
}

/// `update Entity [alias] set path = value, ... [where predicate]`
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub entity: Spanned<String>,
    pub alias: Option<Spanned<String>>,
    pub assignments: Vec<Assignment>,
    pub where_clause: Option<Predicate>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub path: DottedPath,
    pub value: Expression,
    pub span: Span,
}

/// `delete [from] Entity [alias] [where predicate]`
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub entity: Spanned<String>,
    pub alias: Option<Spanned<String>>,
    pub where_clause: Option<Predicate>,
    pub span: Span,
}
