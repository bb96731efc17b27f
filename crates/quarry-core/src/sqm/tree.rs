//! SQM node types.
//!
//! Every expression carries the type inferred for it against the metamodel.
//! Operator enums are shared with the syntax tree.

use crate::metamodel::{BasicType, ColumnMapping, ExpressableType};
use crate::path::NavigablePath;
use crate::value::Value;
use quarry_lang::{
    AggregateFunction, ArithmeticOp, ComparisonOp, JoinType, JunctionKind, NullPrecedence,
    Parameter, SortDirection,
};

/// A semantically resolved statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqmStatement {
    Select(SqmSelectStatement),
    Update(SqmUpdateStatement),
    Delete(SqmDeleteStatement),
}

impl SqmStatement {
    /// Entity names whose tables the statement reads or writes.
    pub fn query_spaces(&self) -> Vec<&str> {
        match self {
            SqmStatement::Select(s) => {
                let mut spaces: Vec<&str> = s
                    .query_spec
                    .roots
                    .iter()
                    .map(|r| r.entity.as_str())
                    .chain(s.query_spec.joins.iter().map(|j| j.target.entity()))
                    .collect();
                spaces.sort_unstable();
                spaces.dedup();
                spaces
            }
            SqmStatement::Update(u) => vec![u.target.entity.as_str()],
            SqmStatement::Delete(d) => vec![d.target.entity.as_str()],
        }
    }

    /// Parameters in first-occurrence order with their inferred types.
    pub fn parameters(&self) -> &[SqmParameterInfo] {
        match self {
            SqmStatement::Select(s) => &s.parameters,
            SqmStatement::Update(u) => &u.parameters,
            SqmStatement::Delete(d) => &d.parameters,
        }
    }

    pub fn is_select(&self) -> bool {
        matches!(self, SqmStatement::Select(_))
    }
}

/// A query parameter and the type its usage implies.
#[derive(Debug, Clone, PartialEq)]
pub struct SqmParameterInfo {
    pub parameter: Parameter,
    pub ty: Option<ExpressableType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqmSelectStatement {
    pub query_spec: SqmQuerySpec,
    pub parameters: Vec<SqmParameterInfo>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqmQuerySpec {
    pub distinct: bool,
    pub selections: Vec<SqmSelection>,
    pub roots: Vec<SqmRoot>,
    /// Explicit joins in declaration order; a join's left-hand side always
    /// precedes it.
    pub joins: Vec<SqmJoin>,
    pub where_clause: Option<SqmPredicate>,
    pub group_by: Vec<SqmExpression>,
    pub having: Option<SqmPredicate>,
    pub order_by: Vec<SqmSortSpecification>,
    pub limit: Option<SqmExpression>,
    pub offset: Option<SqmExpression>,
}

impl SqmQuerySpec {
    pub fn fetch_joins(&self) -> impl Iterator<Item = &SqmJoin> {
        self.joins.iter().filter(|j| j.fetch)
    }

    pub fn has_collection_fetch(&self) -> bool {
        self.fetch_joins()
            .any(|j| matches!(j.target, SqmJoinTarget::Collection { .. }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqmSelection {
    pub expression: SqmExpression,
    pub alias: Option<String>,
}

/// A query root (`from Order o`).
#[derive(Debug, Clone, PartialEq)]
pub struct SqmRoot {
    pub entity: String,
    pub alias: Option<String>,
    pub navigable_path: NavigablePath,
}

impl SqmRoot {
    pub fn as_path(&self) -> SqmPath {
        SqmPath {
            navigable_path: self.navigable_path.clone(),
            kind: SqmPathKind::Root {
                entity: self.entity.clone(),
            },
            ty: ExpressableType::Entity(self.entity.clone()),
        }
    }
}

/// What an explicit join reaches.
#[derive(Debug, Clone, PartialEq)]
pub enum SqmJoinTarget {
    ToOne { entity: String },
    Collection { role: String, element: String },
}

impl SqmJoinTarget {
    /// The joined entity (the element entity for collections).
    pub fn entity(&self) -> &str {
        match self {
            SqmJoinTarget::ToOne { entity } => entity,
            SqmJoinTarget::Collection { element, .. } => element,
        }
    }
}

/// An explicit attribute join (`join fetch o.lineItems li`).
#[derive(Debug, Clone, PartialEq)]
pub struct SqmJoin {
    /// Entity-valued path the join starts from.
    pub lhs: SqmPath,
    pub attribute: String,
    pub navigable_path: NavigablePath,
    pub alias: Option<String>,
    pub join_type: JoinType,
    pub fetch: bool,
    pub target: SqmJoinTarget,
    pub on: Option<SqmPredicate>,
}

impl SqmJoin {
    pub fn as_path(&self) -> SqmPath {
        SqmPath {
            navigable_path: self.navigable_path.clone(),
            kind: SqmPathKind::Join {
                entity: self.target.entity().to_string(),
            },
            ty: ExpressableType::Entity(self.target.entity().to_string()),
        }
    }
}

/// A resolved domain path.
#[derive(Debug, Clone, PartialEq)]
pub struct SqmPath {
    pub navigable_path: NavigablePath,
    pub kind: SqmPathKind,
    pub ty: ExpressableType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqmPathKind {
    /// A query root.
    Root { entity: String },
    /// The alias of an explicit join.
    Join { entity: String },
    /// A to-one association, joined implicitly if it has to be.
    ToOne {
        lhs: Box<SqmPath>,
        attribute: String,
        target: String,
    },
    /// A plural attribute; only valid in joins, `member of` and `is empty`.
    Plural {
        lhs: Box<SqmPath>,
        attribute: String,
        role: String,
        element: String,
    },
    Embedded {
        lhs: Box<SqmPath>,
        attribute: String,
        embeddable: String,
        column_prefix: String,
    },
    /// The virtual embeddable grouping a non-aggregated composite identifier.
    /// Its navigable path is its owner's path.
    IdentifierMapper { lhs: Box<SqmPath> },
    /// A column of the nearest entity-valued ancestor.
    Basic {
        lhs: Box<SqmPath>,
        attribute: String,
        column: ColumnMapping,
    },
    /// The identifier of a to-one target, read from the owner's foreign key.
    ForeignKey {
        lhs: Box<SqmPath>,
        attribute: String,
        column: ColumnMapping,
    },
}

impl SqmPath {
    /// Whether the path denotes an entity (root, join alias or to-one).
    pub fn is_entity_valued(&self) -> bool {
        matches!(
            self.kind,
            SqmPathKind::Root { .. } | SqmPathKind::Join { .. } | SqmPathKind::ToOne { .. }
        )
    }

    /// Entity of an entity-valued path.
    pub fn entity_name(&self) -> Option<&str> {
        match &self.kind {
            SqmPathKind::Root { entity } | SqmPathKind::Join { entity } => Some(entity),
            SqmPathKind::ToOne { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn lhs(&self) -> Option<&SqmPath> {
        match &self.kind {
            SqmPathKind::Root { .. } | SqmPathKind::Join { .. } => None,
            SqmPathKind::ToOne { lhs, .. }
            | SqmPathKind::Plural { lhs, .. }
            | SqmPathKind::Embedded { lhs, .. }
            | SqmPathKind::IdentifierMapper { lhs }
            | SqmPathKind::Basic { lhs, .. }
            | SqmPathKind::ForeignKey { lhs, .. } => Some(lhs),
        }
    }

    /// Nearest entity-valued path at or above this one; its table group owns
    /// this path's columns.
    pub fn owning_entity_path(&self) -> &SqmPath {
        let mut current = self;
        while !current.is_entity_valued() {
            match current.lhs() {
                Some(lhs) => current = lhs,
                None => break,
            }
        }
        current
    }
}

/// A typed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum SqmExpression {
    Path(SqmPath),
    /// `ty` is `None` only for the null literal.
    Literal {
        value: Value,
        ty: Option<BasicType>,
    },
    Parameter {
        parameter: Parameter,
        ty: Option<ExpressableType>,
    },
    Binary {
        op: ArithmeticOp,
        lhs: Box<SqmExpression>,
        rhs: Box<SqmExpression>,
        ty: BasicType,
    },
    Negated {
        operand: Box<SqmExpression>,
        ty: BasicType,
    },
    Function {
        name: String,
        arguments: Vec<SqmExpression>,
        ty: BasicType,
    },
    Aggregate {
        function: AggregateFunction,
        distinct: bool,
        /// `None` for `count(*)`.
        argument: Option<Box<SqmExpression>>,
        ty: BasicType,
    },
    /// Branches are evaluated in order; the first whose predicate holds wins.
    SearchedCase {
        branches: Vec<(SqmPredicate, SqmExpression)>,
        otherwise: Option<Box<SqmExpression>>,
        ty: Option<BasicType>,
    },
    SimpleCase {
        operand: Box<SqmExpression>,
        branches: Vec<(SqmExpression, SqmExpression)>,
        otherwise: Option<Box<SqmExpression>>,
        ty: Option<BasicType>,
    },
}

impl SqmExpression {
    pub fn literal(value: Value) -> Self {
        let ty = BasicType::of_value(&value);
        SqmExpression::Literal { value, ty }
    }

    pub fn expressable_type(&self) -> Option<ExpressableType> {
        match self {
            SqmExpression::Path(p) => Some(p.ty.clone()),
            SqmExpression::Literal { ty, .. } => ty.map(ExpressableType::Basic),
            SqmExpression::Parameter { ty, .. } => ty.clone(),
            SqmExpression::Binary { ty, .. }
            | SqmExpression::Negated { ty, .. }
            | SqmExpression::Function { ty, .. }
            | SqmExpression::Aggregate { ty, .. } => Some(ExpressableType::Basic(*ty)),
            SqmExpression::SearchedCase { ty, .. } | SqmExpression::SimpleCase { ty, .. } => {
                ty.map(ExpressableType::Basic)
            }
        }
    }

    pub fn basic_type(&self) -> Option<BasicType> {
        self.expressable_type().and_then(|t| t.basic())
    }

    /// Re-type a literal after construction, re-wrapping its value.
    ///
    /// Returns `false` when the value cannot be represented as `target`; the
    /// node is left untouched in that case. Non-literals are unaffected.
    pub fn apply_inferred_type(&mut self, target: BasicType) -> bool {
        if let SqmExpression::Literal { value, ty } = self {
            if value.is_null() {
                *ty = Some(target);
                return true;
            }
            match target.coerce(value.clone()) {
                Some(coerced) => {
                    *value = coerced;
                    *ty = Some(target);
                    true
                }
                None => false,
            }
        } else {
            true
        }
    }

    pub fn as_path(&self) -> Option<&SqmPath> {
        match self {
            SqmExpression::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, SqmExpression::Aggregate { .. })
    }
}

/// A typed predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum SqmPredicate {
    Comparison {
        op: ComparisonOp,
        lhs: SqmExpression,
        rhs: SqmExpression,
    },
    Junction {
        kind: JunctionKind,
        predicates: Vec<SqmPredicate>,
    },
    Negated(Box<SqmPredicate>),
    Between {
        expression: SqmExpression,
        low: SqmExpression,
        high: SqmExpression,
        negated: bool,
    },
    IsNull {
        expression: SqmExpression,
        negated: bool,
    },
    Like {
        expression: SqmExpression,
        pattern: SqmExpression,
        escape: Option<SqmExpression>,
        negated: bool,
    },
    InList {
        expression: SqmExpression,
        values: Vec<SqmExpression>,
        negated: bool,
    },
    MemberOf {
        element: SqmExpression,
        collection: SqmPath,
        negated: bool,
    },
    EmptyCollection {
        collection: SqmPath,
        negated: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqmSortSpecification {
    pub expression: SqmExpression,
    pub direction: SortDirection,
    pub nulls: Option<NullPrecedence>,
}

/// `update Entity set ... where ...`
#[derive(Debug, Clone, PartialEq)]
pub struct SqmUpdateStatement {
    pub target: SqmRoot,
    pub assignments: Vec<SqmAssignment>,
    pub where_clause: Option<SqmPredicate>,
    pub parameters: Vec<SqmParameterInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqmAssignment {
    pub target: SqmPath,
    pub value: SqmExpression,
}

/// `delete from Entity where ...`
#[derive(Debug, Clone, PartialEq)]
pub struct SqmDeleteStatement {
    pub target: SqmRoot,
    pub where_clause: Option<SqmPredicate>,
    pub parameters: Vec<SqmParameterInfo>,
}
