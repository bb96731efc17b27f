//! SQM to SQL AST conversion.
//!
//! Roots register their table groups first, then explicit joins in source
//! order; paths met afterwards resolve through the [`FromClauseIndex`], so the
//! same navigable path always maps to the same table group. To-one navigation
//! beyond the foreign key creates inner joins on demand.

use super::ast::*;
use super::from_clause::FromClauseIndex;
use crate::error::Error;
use crate::jpa::{EntityGraph, GraphSemantic};
use crate::metamodel::{
    AttributeDescriptor, AttributeKind, BasicType, ColumnMapping, EntityDescriptor,
    ExpressableType, FetchStrategy, InheritanceStrategy, Metamodel, DEFAULT_DISCRIMINATOR_COLUMN,
};
use crate::path::NavigablePath;
use crate::results::{DomainResult, EntityResult, Fetch};
use crate::sqm::{
    FunctionRegistry, SqmDeleteStatement, SqmExpression, SqmJoin, SqmJoinTarget, SqmPath,
    SqmPathKind, SqmPredicate, SqmSelectStatement, SqmStatement, SqmUpdateStatement,
};
use quarry_lang::{AggregateFunction, JoinType, JunctionKind, Parameter};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Projected expressions, deduplicated by structural identity.
#[derive(Debug, Default)]
pub struct SelectionRegistry {
    selections: Vec<SqlSelection>,
    positions: HashMap<Expression, usize>,
}

impl SelectionRegistry {
    /// Position of `expression`, registering it if it is new.
    pub fn resolve(&mut self, expression: Expression) -> usize {
        if let Some(position) = self.positions.get(&expression) {
            return *position;
        }
        let position = self.selections.len();
        self.positions.insert(expression.clone(), position);
        self.selections.push(SqlSelection {
            position,
            expression,
        });
        position
    }

    pub fn len(&self) -> usize {
        self.selections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    pub fn into_selections(self) -> Vec<SqlSelection> {
        self.selections
    }
}

/// A fetch join's table group and navigable path.
#[derive(Debug, Clone)]
struct FetchedJoin {
    group: TableGroupId,
    path: NavigablePath,
}

/// Converts one SQM statement. Not reusable across statements.
pub struct SqmToSqlConverter<'a> {
    metamodel: &'a Metamodel,
    functions: &'a FunctionRegistry,
    index: FromClauseIndex,
    selections: SelectionRegistry,
    /// Fetch joins keyed by (owner path, attribute).
    fetch_joins: HashMap<(NavigablePath, String), FetchedJoin>,
    graph: Option<(&'a EntityGraph, GraphSemantic)>,
    /// DML statements address their target by table name and support
    /// neither joins nor secondary tables.
    dml: bool,
}

impl<'a> SqmToSqlConverter<'a> {
    pub fn new(metamodel: &'a Metamodel, functions: &'a FunctionRegistry) -> Self {
        Self {
            metamodel,
            functions,
            index: FromClauseIndex::new(),
            selections: SelectionRegistry::default(),
            fetch_joins: HashMap::new(),
            graph: None,
            dml: false,
        }
    }

    /// Apply an entity graph to the selected roots of a select statement.
    pub fn with_entity_graph(mut self, graph: &'a EntityGraph, semantic: GraphSemantic) -> Self {
        self.graph = Some((graph, semantic));
        self
    }

    pub fn convert(self, statement: &SqmStatement) -> Result<Statement, Error> {
        match statement {
            SqmStatement::Select(s) => self.convert_select(s).map(Statement::Select),
            SqmStatement::Update(u) => self.convert_update(u).map(Statement::Update),
            SqmStatement::Delete(d) => self.convert_delete(d).map(Statement::Delete),
        }
    }

    pub fn convert_select(mut self, statement: &SqmSelectStatement) -> Result<SelectStatement, Error> {
        let spec = &statement.query_spec;
        let mut restrictions = Vec::new();

        let mut roots = Vec::with_capacity(spec.roots.len());
        for root in &spec.roots {
            let id = self.register_root(&root.entity, &root.navigable_path, root.alias.clone())?;
            if let Some(restriction) = self.discriminator_restriction(id)? {
                restrictions.push(restriction);
            }
            roots.push(id);
        }

        let mut joins = spec.joins.clone();
        joins.extend(self.graph_joins(statement)?);
        let has_collection_fetch = joins
            .iter()
            .any(|j| j.fetch && matches!(j.target, SqmJoinTarget::Collection { .. }));
        for join in &joins {
            self.register_join(join)?;
        }

        let mut domain_results = Vec::with_capacity(spec.selections.len());
        for selection in &spec.selections {
            domain_results.push(self.domain_result(&selection.expression, selection.alias.clone())?);
        }

        if let Some(predicate) = &spec.where_clause {
            restrictions.insert(0, self.predicate(predicate)?);
        }
        let where_clause = Predicate::and(restrictions);
        let group_by = spec
            .group_by
            .iter()
            .map(|e| self.expression(e))
            .collect::<Result<Vec<_>, _>>()?;
        let having = spec.having.as_ref().map(|p| self.predicate(p)).transpose()?;
        let mut order_by = Vec::with_capacity(spec.order_by.len());
        for sort in &spec.order_by {
            order_by.push(SortSpecification {
                expression: self.expression(&sort.expression)?,
                direction: sort.direction,
                nulls: sort.nulls,
            });
        }
        let limit = spec.limit.as_ref().map(|e| self.expression(e)).transpose()?;
        let offset = spec.offset.as_ref().map(|e| self.expression(e)).transpose()?;

        let selections = std::mem::take(&mut self.selections).into_selections();
        let (table_groups, affected_tables) = self.index.into_parts();
        debug!(
            groups = table_groups.len(),
            selections = selections.len(),
            "converted select"
        );
        Ok(SelectStatement {
            table_groups,
            query_spec: QuerySpec {
                distinct: spec.distinct,
                selections,
                roots,
                where_clause,
                group_by,
                having,
                order_by,
                limit,
                offset,
            },
            domain_results,
            affected_tables,
            has_collection_fetch,
        })
    }

    pub fn convert_update(mut self, statement: &SqmUpdateStatement) -> Result<UpdateStatement, Error> {
        self.dml = true;
        let target = &statement.target;
        let id = self.register_root(&target.entity, &target.navigable_path, target.alias.clone())?;
        let mut assignments = Vec::with_capacity(statement.assignments.len());
        for assignment in &statement.assignments {
            let column = match &assignment.target.kind {
                SqmPathKind::Basic { column, .. } => self.basic_column(&assignment.target, column)?,
                SqmPathKind::ToOne { lhs, attribute, .. } => self.foreign_key_column(lhs, attribute)?,
                _ => {
                    return Err(Error::Translation(format!(
                        "cannot assign to '{}'",
                        assignment.target.navigable_path
                    )))
                }
            };
            let value = self.expression(&assignment.value)?;
            assignments.push(Assignment { column, value });
        }
        let restriction = self.dml_restriction(id, statement.where_clause.as_ref())?;
        Ok(UpdateStatement {
            target: self.index.group(id).primary_table.clone(),
            assignments,
            restriction,
        })
    }

    pub fn convert_delete(mut self, statement: &SqmDeleteStatement) -> Result<DeleteStatement, Error> {
        self.dml = true;
        let target = &statement.target;
        let id = self.register_root(&target.entity, &target.navigable_path, target.alias.clone())?;
        let restriction = self.dml_restriction(id, statement.where_clause.as_ref())?;
        Ok(DeleteStatement {
            target: self.index.group(id).primary_table.clone(),
            restriction,
        })
    }

    fn dml_restriction(
        &mut self,
        id: TableGroupId,
        where_clause: Option<&SqmPredicate>,
    ) -> Result<Option<Predicate>, Error> {
        let mut restrictions = Vec::new();
        if let Some(predicate) = where_clause {
            restrictions.push(self.predicate(predicate)?);
        }
        if let Some(discriminator) = self.discriminator_restriction(id)? {
            restrictions.push(discriminator);
        }
        Ok(Predicate::and(restrictions))
    }

    /// Load-by-identifier: every attribute of `entity` (and subtypes) where
    /// the identifier columns equal `?1..?n`.
    pub fn entity_loader(mut self, entity: &str) -> Result<SelectStatement, Error> {
        let path = NavigablePath::for_entity(entity);
        let id = self.register_root(entity, &path, None)?;
        let result = self.entity_result_for_group(id, path, None)?;
        let primary = self.index.group(id).primary_table.clone();
        let descriptor = self.descriptor(entity)?;
        let mut restrictions: Vec<Predicate> = descriptor
            .identifier_columns()
            .into_iter()
            .enumerate()
            .map(|(i, column)| {
                Predicate::eq(
                    Expression::Column(primary.column(column.column, column.jdbc_type)),
                    Expression::Parameter {
                        parameter: Parameter::Positional(i as u32 + 1),
                        ty: Some(column.jdbc_type),
                    },
                )
            })
            .collect();
        if let Some(discriminator) = self.discriminator_restriction(id)? {
            restrictions.push(discriminator);
        }
        Ok(self.finish_loader(id, result, Predicate::and(restrictions)))
    }

    /// Collection-by-owner: the elements of `role` whose key column equals `?1`.
    pub fn collection_loader(mut self, role: &str) -> Result<SelectStatement, Error> {
        let collection = Arc::clone(self.metamodel.collection_descriptor(role)?);
        let path = NavigablePath::for_entity(&collection.element);
        let id = self.register_root(&collection.element, &path, None)?;
        let result = self.entity_result_for_group(id, path, None)?;
        let owner = self.descriptor(&collection.owner)?;
        let key_type = owner.identifier_type().ok_or_else(|| {
            Error::NotYetImplemented(format!(
                "collection {} owned by an entity with a composite identifier",
                role
            ))
        })?;
        let primary = self.index.group(id).primary_table.clone();
        let mut restrictions = vec![Predicate::eq(
            Expression::Column(primary.column(&collection.key_column, key_type)),
            Expression::Parameter {
                parameter: Parameter::Positional(1),
                ty: Some(key_type),
            },
        )];
        if let Some(discriminator) = self.discriminator_restriction(id)? {
            restrictions.push(discriminator);
        }
        Ok(self.finish_loader(id, result, Predicate::and(restrictions)))
    }

    fn finish_loader(
        mut self,
        root: TableGroupId,
        result: EntityResult,
        where_clause: Option<Predicate>,
    ) -> SelectStatement {
        let selections = std::mem::take(&mut self.selections).into_selections();
        let (table_groups, affected_tables) = self.index.into_parts();
        SelectStatement {
            table_groups,
            query_spec: QuerySpec {
                selections,
                roots: vec![root],
                where_clause,
                ..QuerySpec::default()
            },
            domain_results: vec![DomainResult::Entity(result)],
            affected_tables,
            has_collection_fetch: false,
        }
    }

    // ------------------------------------------------------------------
    // Table groups
    // ------------------------------------------------------------------

    fn descriptor(&self, entity: &str) -> Result<Arc<EntityDescriptor>, Error> {
        self.metamodel.entity_descriptor(entity).map(Arc::clone)
    }

    fn register_root(
        &mut self,
        entity: &str,
        path: &NavigablePath,
        alias: Option<String>,
    ) -> Result<TableGroupId, Error> {
        let metamodel = self.metamodel;
        let dml = self.dml;
        self.index.resolve_or_create(path, |index| {
            create_table_group(metamodel, index, entity, path, alias, dml)
        })
    }

    /// Create (or reuse) the group reached through `attribute` of the entity in
    /// `lhs`, joining it to `lhs`.
    fn join_association(
        &mut self,
        lhs: TableGroupId,
        attribute: &str,
        path: &NavigablePath,
        alias: Option<String>,
        join_type: SqlJoinType,
    ) -> Result<TableGroupId, Error> {
        if let Some(existing) = self.index.find_by_path(path) {
            if let Some(alias) = alias {
                self.index.register_alias(alias, existing);
            }
            return Ok(existing);
        }
        if self.dml {
            return Err(Error::NotYetImplemented(format!(
                "joins in update and delete statements ({})",
                path
            )));
        }

        let owner_name = self.index.group(lhs).entity.clone();
        let (owner, descriptor) = self.find_attribute(&owner_name, attribute)?;
        let lhs_primary = self.index.group(lhs).primary_table.clone();

        let (target, lhs_columns, target_columns) = match &descriptor.kind {
            AttributeKind::ToOne { target, .. } => {
                let fk = self.metamodel.attribute_columns(&owner, &descriptor)?;
                let target_descriptor = self.descriptor(target)?;
                (
                    target.clone(),
                    fk.into_iter()
                        .map(|c| lhs_primary.column(c.column, c.jdbc_type))
                        .collect::<Vec<_>>(),
                    target_descriptor.identifier_columns(),
                )
            }
            AttributeKind::ToMany {
                target, key_column, ..
            } => {
                let key_type = owner.identifier_type().ok_or_else(|| {
                    Error::NotYetImplemented(format!(
                        "collection {}.{} owned by an entity with a composite identifier",
                        owner.name, attribute
                    ))
                })?;
                (
                    target.clone(),
                    owner
                        .identifier_columns()
                        .into_iter()
                        .map(|c| lhs_primary.column(c.column, c.jdbc_type))
                        .collect(),
                    vec![ColumnMapping {
                        table: None,
                        column: key_column.clone(),
                        jdbc_type: key_type,
                    }],
                )
            }
            _ => {
                return Err(Error::Translation(format!(
                    "'{}' of {} is not an association",
                    attribute, owner.name
                )))
            }
        };

        let metamodel = self.metamodel;
        let id = self.index.resolve_or_create(path, |index| {
            create_table_group(metamodel, index, &target, path, alias, false)
        })?;
        let target_primary = self.index.group(id).primary_table.clone();
        let target_columns = target_columns
            .into_iter()
            .map(|c| target_primary.column(c.column, c.jdbc_type))
            .collect();
        let mut predicates: Vec<Predicate> = Predicate::columns_equal(lhs_columns, target_columns)
            .into_iter()
            .collect();
        if let Some(discriminator) = self.discriminator_restriction(id)? {
            predicates.push(discriminator);
        }
        let predicate = Predicate::and(predicates).ok_or_else(|| {
            Error::Translation(format!("no join columns for {}.{}", owner.name, attribute))
        })?;
        self.index.group_mut(lhs).table_group_joins.push(TableGroupJoin {
            join_type,
            group: id,
            predicate,
        });
        Ok(id)
    }

    fn register_join(&mut self, join: &SqmJoin) -> Result<(), Error> {
        let lhs = self.entity_group(&join.lhs)?;
        let id = self.join_association(
            lhs,
            &join.attribute,
            &join.navigable_path,
            join.alias.clone(),
            join.join_type.into(),
        )?;
        if let Some(on) = &join.on {
            let on = self.predicate(on)?;
            if let Some(group_join) = self
                .index
                .group_mut(lhs)
                .table_group_joins
                .iter_mut()
                .find(|j| j.group == id)
            {
                let existing = group_join.predicate.clone();
                group_join.predicate = Predicate::Junction {
                    kind: JunctionKind::And,
                    predicates: vec![existing, on],
                };
            }
        }
        if join.fetch {
            self.fetch_joins.insert(
                (join.lhs.navigable_path.clone(), join.attribute.clone()),
                FetchedJoin {
                    group: id,
                    path: join.navigable_path.clone(),
                },
            );
        }
        Ok(())
    }

    /// Left fetch joins for the graph's associations on every selected root
    /// of the graph's entity.
    fn graph_joins(&self, statement: &SqmSelectStatement) -> Result<Vec<SqmJoin>, Error> {
        let Some((graph, _)) = self.graph else {
            return Ok(Vec::new());
        };
        let spec = &statement.query_spec;
        let mut joins = Vec::new();
        for root in &spec.roots {
            let applies = root.entity == graph.root_entity
                || self.metamodel.is_subtype_of(&root.entity, &graph.root_entity);
            let selected = spec.selections.iter().any(|s| {
                s.expression
                    .as_path()
                    .map(|p| p.navigable_path == root.navigable_path)
                    .unwrap_or(false)
            });
            if !applies || !selected {
                continue;
            }
            let descriptor = self.descriptor(&root.entity)?;
            for node in &graph.attribute_nodes {
                let already_fetched = spec.joins.iter().any(|j| {
                    j.fetch && j.attribute == *node && j.lhs.navigable_path == root.navigable_path
                });
                let Some(attribute) = descriptor.attribute(node) else {
                    continue;
                };
                let target = match &attribute.kind {
                    AttributeKind::ToOne { target, .. } => SqmJoinTarget::ToOne {
                        entity: target.clone(),
                    },
                    AttributeKind::ToMany { target, .. } => SqmJoinTarget::Collection {
                        role: attribute.collection_role().unwrap_or_default(),
                        element: target.clone(),
                    },
                    _ => continue,
                };
                if already_fetched {
                    continue;
                }
                joins.push(SqmJoin {
                    lhs: root.as_path(),
                    attribute: node.clone(),
                    navigable_path: root.navigable_path.append(node),
                    alias: None,
                    join_type: JoinType::Left,
                    fetch: true,
                    target,
                    on: None,
                });
            }
        }
        Ok(joins)
    }

    /// Group of an entity-valued path, joining to-one paths on demand.
    fn entity_group(&mut self, path: &SqmPath) -> Result<TableGroupId, Error> {
        match &path.kind {
            SqmPathKind::Root { .. } | SqmPathKind::Join { .. } => {
                self.index.find_by_path(&path.navigable_path).ok_or_else(|| {
                    Error::Translation(format!(
                        "no table group registered for '{}'",
                        path.navigable_path
                    ))
                })
            }
            SqmPathKind::ToOne { lhs, attribute, .. } => {
                if let Some(existing) = self.index.find_by_path(&path.navigable_path) {
                    return Ok(existing);
                }
                let lhs_group = self.entity_group(lhs)?;
                self.join_association(
                    lhs_group,
                    attribute,
                    &path.navigable_path,
                    None,
                    SqlJoinType::Inner,
                )
            }
            _ => Err(Error::Translation(format!(
                "'{}' is not entity valued",
                path.navigable_path
            ))),
        }
    }

    /// An attribute of `entity` or of one of its subtypes, with its declaring
    /// descriptor.
    fn find_attribute(
        &self,
        entity: &str,
        attribute: &str,
    ) -> Result<(Arc<EntityDescriptor>, AttributeDescriptor), Error> {
        let descriptor = self.descriptor(entity)?;
        if let Some(found) = descriptor.attribute(attribute) {
            return Ok((Arc::clone(&descriptor), found.clone()));
        }
        for subtype in self.metamodel.concrete_subtypes(entity) {
            if let Some(found) = subtype.attribute(attribute) {
                return Ok((Arc::clone(subtype), found.clone()));
            }
        }
        Err(Error::NotNavigable(format!("{}.{}", entity, attribute)))
    }

    /// `DTYPE in (...)` for groups of a single-table subtype.
    fn discriminator_restriction(&self, id: TableGroupId) -> Result<Option<Predicate>, Error> {
        let group = self.index.group(id);
        let descriptor = self.descriptor(&group.entity)?;
        let Some(hierarchy) = &descriptor.hierarchy else {
            return Ok(None);
        };
        if hierarchy.strategy != InheritanceStrategy::SingleTable || hierarchy.root == descriptor.name {
            return Ok(None);
        }
        let column = descriptor
            .discriminator_column()
            .unwrap_or(DEFAULT_DISCRIMINATOR_COLUMN);
        let values = self
            .metamodel
            .concrete_subtypes(&descriptor.name)
            .into_iter()
            .filter_map(|e| e.discriminator_value().map(|v| Expression::literal(v)))
            .collect();
        Ok(Some(Predicate::InList {
            expression: Expression::Column(group.primary_table.column(column, BasicType::String)),
            values,
            negated: false,
        }))
    }

    // ------------------------------------------------------------------
    // Columns and expressions
    // ------------------------------------------------------------------

    fn basic_column(&mut self, path: &SqmPath, column: &ColumnMapping) -> Result<ColumnReference, Error> {
        let group_id = self.entity_group(path.owning_entity_path())?;
        let group = self.index.group(group_id);
        let reference = match &column.table {
            Some(table) if *table != group.primary_table.table_name => {
                if self.dml {
                    return Err(Error::NotYetImplemented(format!(
                        "secondary table column {}.{} in update or delete",
                        table, column.column
                    )));
                }
                group.resolve_table_reference(table)?
            }
            _ => &group.primary_table,
        };
        Ok(reference.column(&column.column, column.jdbc_type))
    }

    /// Foreign-key column of a to-one attribute on its owner's group.
    fn foreign_key_column(&mut self, owner: &SqmPath, attribute: &str) -> Result<ColumnReference, Error> {
        let group_id = self.entity_group(owner)?;
        let entity = self.index.group(group_id).entity.clone();
        let (descriptor, attr) = self.find_attribute(&entity, attribute)?;
        let column = self
            .metamodel
            .attribute_columns(&descriptor, &attr)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Mapping(format!("{}.{} has no column", entity, attribute)))?;
        Ok(self
            .index
            .group(group_id)
            .primary_table
            .column(column.column, column.jdbc_type))
    }

    fn identifier_expression(&self, group_id: TableGroupId) -> Result<Expression, Error> {
        let group = self.index.group(group_id);
        let descriptor = self.descriptor(&group.entity)?;
        let mut columns: Vec<Expression> = descriptor
            .identifier_columns()
            .into_iter()
            .map(|c| Expression::Column(group.primary_table.column(c.column, c.jdbc_type)))
            .collect();
        if columns.len() == 1 {
            Ok(columns.remove(0))
        } else {
            Ok(Expression::Tuple(columns))
        }
    }

    fn path_expression(&mut self, path: &SqmPath) -> Result<Expression, Error> {
        match &path.kind {
            SqmPathKind::Basic { column, .. } | SqmPathKind::ForeignKey { column, .. } => {
                Ok(Expression::Column(self.basic_column(path, column)?))
            }
            SqmPathKind::Root { .. } | SqmPathKind::Join { .. } => {
                let group = self.entity_group(path)?;
                self.identifier_expression(group)
            }
            SqmPathKind::ToOne { lhs, attribute, .. } => {
                // An explicit join of this path is already there; otherwise
                // the foreign key is enough.
                match self.index.find_by_path(&path.navigable_path) {
                    Some(group) => self.identifier_expression(group),
                    None => Ok(Expression::Column(self.foreign_key_column(lhs, attribute)?)),
                }
            }
            SqmPathKind::Embedded {
                lhs,
                embeddable,
                column_prefix,
                ..
            } => {
                let group_id = self.entity_group(lhs.owning_entity_path())?;
                let primary = self.index.group(group_id).primary_table.clone();
                let embeddable = self.metamodel.embeddable_descriptor(embeddable)?;
                let columns = embeddable
                    .attributes
                    .iter()
                    .filter_map(|a| match &a.kind {
                        AttributeKind::Basic {
                            column, basic_type, ..
                        } => Some(Expression::Column(
                            primary.column(format!("{}{}", column_prefix, column), *basic_type),
                        )),
                        _ => None,
                    })
                    .collect();
                Ok(Expression::Tuple(columns))
            }
            SqmPathKind::Plural { .. } | SqmPathKind::IdentifierMapper { .. } => {
                Err(Error::Translation(format!(
                    "'{}' cannot be used as a value",
                    path.navigable_path
                )))
            }
        }
    }

    fn parameter_type(&self, ty: Option<&ExpressableType>) -> Option<BasicType> {
        match ty? {
            ExpressableType::Basic(t) => Some(*t),
            ExpressableType::Entity(entity) => self
                .metamodel
                .find_entity_descriptor(entity)
                .and_then(|e| e.identifier_type()),
            _ => None,
        }
    }

    /// Aggregates over a row value. `count` counts the first column, which is
    /// non-null for every present row; other forms are rejected.
    fn tuple_aggregate_argument(
        function: AggregateFunction,
        distinct: bool,
        columns: Vec<Expression>,
    ) -> Result<Expression, Error> {
        if function != AggregateFunction::Count {
            return Err(Error::Translation(format!(
                "cannot apply {:?} to a composite value",
                function
            )));
        }
        if distinct && columns.len() > 1 {
            return Err(Error::NotYetImplemented(
                "count(distinct ...) over a composite value".to_string(),
            ));
        }
        columns
            .into_iter()
            .next()
            .ok_or_else(|| Error::Translation("empty composite value in aggregate".to_string()))
    }

    fn expression(&mut self, expression: &SqmExpression) -> Result<Expression, Error> {
        Ok(match expression {
            SqmExpression::Path(path) => self.path_expression(path)?,
            SqmExpression::Literal { value, ty } => Expression::Literal {
                value: value.clone(),
                ty: *ty,
            },
            SqmExpression::Parameter { parameter, ty } => Expression::Parameter {
                parameter: parameter.clone(),
                ty: self.parameter_type(ty.as_ref()),
            },
            SqmExpression::Binary { op, lhs, rhs, .. } => Expression::Binary {
                op: *op,
                lhs: Box::new(self.expression(lhs)?),
                rhs: Box::new(self.expression(rhs)?),
            },
            SqmExpression::Negated { operand, .. } => {
                Expression::Negated(Box::new(self.expression(operand)?))
            }
            SqmExpression::Function {
                name, arguments, ..
            } => {
                let rendering = self
                    .functions
                    .find(name)
                    .map(|f| f.rendering)
                    .ok_or_else(|| Error::Translation(format!("unknown function '{}'", name)))?;
                Expression::Function {
                    rendering,
                    arguments: arguments
                        .iter()
                        .map(|a| self.expression(a))
                        .collect::<Result<_, _>>()?,
                }
            }
            SqmExpression::Aggregate {
                function,
                distinct,
                argument,
                ..
            } => {
                let argument = match argument.as_deref() {
                    Some(a) => match self.expression(a)? {
                        Expression::Tuple(columns) => {
                            Some(Box::new(Self::tuple_aggregate_argument(*function, *distinct, columns)?))
                        }
                        other => Some(Box::new(other)),
                    },
                    None => None,
                };
                Expression::Aggregate {
                    function: *function,
                    distinct: *distinct,
                    argument,
                }
            }
            SqmExpression::SearchedCase {
                branches,
                otherwise,
                ..
            } => {
                let mut converted = Vec::with_capacity(branches.len());
                for (predicate, result) in branches {
                    converted.push((self.predicate(predicate)?, self.expression(result)?));
                }
                Expression::SearchedCase {
                    branches: converted,
                    otherwise: otherwise
                        .as_deref()
                        .map(|e| self.expression(e).map(Box::new))
                        .transpose()?,
                }
            }
            SqmExpression::SimpleCase {
                operand,
                branches,
                otherwise,
                ..
            } => {
                let operand = Box::new(self.expression(operand)?);
                let mut converted = Vec::with_capacity(branches.len());
                for (when, result) in branches {
                    converted.push((self.expression(when)?, self.expression(result)?));
                }
                Expression::SimpleCase {
                    operand,
                    branches: converted,
                    otherwise: otherwise
                        .as_deref()
                        .map(|e| self.expression(e).map(Box::new))
                        .transpose()?,
                }
            }
        })
    }

    fn predicate(&mut self, predicate: &SqmPredicate) -> Result<Predicate, Error> {
        Ok(match predicate {
            SqmPredicate::Comparison { op, lhs, rhs } => Predicate::Comparison {
                op: *op,
                lhs: self.expression(lhs)?,
                rhs: self.expression(rhs)?,
            },
            SqmPredicate::Junction { kind, predicates } => Predicate::Junction {
                kind: *kind,
                predicates: predicates
                    .iter()
                    .map(|p| self.predicate(p))
                    .collect::<Result<_, _>>()?,
            },
            SqmPredicate::Negated(inner) => Predicate::Negated(Box::new(self.predicate(inner)?)),
            SqmPredicate::Between {
                expression,
                low,
                high,
                negated,
            } => Predicate::Between {
                expression: self.expression(expression)?,
                low: self.expression(low)?,
                high: self.expression(high)?,
                negated: *negated,
            },
            SqmPredicate::IsNull {
                expression,
                negated,
            } => Predicate::IsNull {
                expression: self.expression(expression)?,
                negated: *negated,
            },
            SqmPredicate::Like {
                expression,
                pattern,
                escape,
                negated,
            } => Predicate::Like {
                expression: self.expression(expression)?,
                pattern: self.expression(pattern)?,
                escape: escape.as_ref().map(|e| self.expression(e)).transpose()?,
                negated: *negated,
            },
            SqmPredicate::InList {
                expression,
                values,
                negated,
            } => Predicate::InList {
                expression: self.expression(expression)?,
                values: values
                    .iter()
                    .map(|v| self.expression(v))
                    .collect::<Result<_, _>>()?,
                negated: *negated,
            },
            SqmPredicate::MemberOf {
                element,
                collection,
                negated,
            } => {
                let element = self.expression(element)?;
                let (subquery, element_id) = self.collection_subquery(collection)?;
                Predicate::InSubQuery {
                    expression: element,
                    subquery: Box::new(SubQuery {
                        selection: vec![element_id],
                        ..subquery
                    }),
                    negated: *negated,
                }
            }
            SqmPredicate::EmptyCollection {
                collection,
                negated,
            } => {
                let (subquery, _) = self.collection_subquery(collection)?;
                Predicate::Exists {
                    subquery: Box::new(subquery),
                    negated: !*negated,
                }
            }
        })
    }

    /// Correlated subquery over a collection's element table, restricted to
    /// the owner's elements. Returns it with the element identifier column.
    fn collection_subquery(&mut self, collection: &SqmPath) -> Result<(SubQuery, Expression), Error> {
        let SqmPathKind::Plural { lhs, role, .. } = &collection.kind else {
            return Err(Error::Translation(format!(
                "'{}' is not a collection",
                collection.navigable_path
            )));
        };
        let descriptor = Arc::clone(self.metamodel.collection_descriptor(role)?);
        let element = self.descriptor(&descriptor.element)?;
        let owner_group = self.entity_group(lhs)?;
        let owner_id = self.identifier_expression(owner_group)?;
        let key_type = self
            .descriptor(&descriptor.owner)?
            .identifier_type()
            .ok_or_else(|| {
                Error::NotYetImplemented(format!("collection {} with a composite owner key", role))
            })?;
        let element_id = element.simple_identifier().and_then(|a| match &a.kind {
            AttributeKind::Basic {
                column, basic_type, ..
            } => Some((column.clone(), *basic_type)),
            _ => None,
        });
        let (id_column, id_type) = element_id.ok_or_else(|| {
            Error::NotYetImplemented(format!(
                "collection {} of elements with a composite identifier",
                role
            ))
        })?;

        let number = self.index.next_group_number();
        let table = TableReference::new(
            element.table.clone(),
            format!("{}{}_0", stem(&element.name), number),
        );
        let restriction = Predicate::eq(
            Expression::Column(table.column(&descriptor.key_column, key_type)),
            owner_id,
        );
        let element_id = Expression::Column(table.column(id_column, id_type));
        Ok((
            SubQuery {
                selection: Vec::new(),
                table,
                restriction,
            },
            element_id,
        ))
    }

    // ------------------------------------------------------------------
    // Domain results
    // ------------------------------------------------------------------

    fn domain_result(&mut self, expression: &SqmExpression, alias: Option<String>) -> Result<DomainResult, Error> {
        if let Some(path) = expression.as_path() {
            match &path.kind {
                SqmPathKind::Root { .. } | SqmPathKind::Join { .. } | SqmPathKind::ToOne { .. } => {
                    let group = self.entity_group(path)?;
                    let result =
                        self.entity_result_for_group(group, path.navigable_path.clone(), alias)?;
                    return Ok(DomainResult::Entity(result));
                }
                SqmPathKind::Embedded { embeddable, .. } => {
                    let Expression::Tuple(columns) = self.path_expression(path)? else {
                        return Err(Error::Translation(format!(
                            "embedded path '{}' has no columns",
                            path.navigable_path
                        )));
                    };
                    let positions = columns
                        .into_iter()
                        .map(|c| self.selections.resolve(c))
                        .collect();
                    return Ok(DomainResult::Embeddable {
                        embeddable: embeddable.clone(),
                        positions,
                        alias,
                    });
                }
                SqmPathKind::Plural { role, .. } => {
                    return Ok(DomainResult::Collection { role: role.clone() })
                }
                _ => {}
            }
        }
        let ty = expression.basic_type();
        let sql = self.expression(expression)?;
        Ok(DomainResult::Basic {
            position: self.selections.resolve(sql),
            ty,
            alias,
        })
    }

    /// Select every column of the group's entity and its subtypes, nesting the
    /// results of fetch joins registered for `path`.
    fn entity_result_for_group(
        &mut self,
        group_id: TableGroupId,
        path: NavigablePath,
        alias: Option<String>,
    ) -> Result<EntityResult, Error> {
        let group = self.index.group(group_id).clone();
        let descriptor = self.descriptor(&group.entity)?;
        let primary = &group.primary_table;

        let identifier = descriptor
            .identifier_columns()
            .into_iter()
            .map(|c| {
                self.selections
                    .resolve(Expression::Column(primary.column(c.column, c.jdbc_type)))
            })
            .collect();
        let discriminator = match descriptor.inheritance_strategy() {
            Some(InheritanceStrategy::SingleTable) => {
                let column = descriptor
                    .discriminator_column()
                    .unwrap_or(DEFAULT_DISCRIMINATOR_COLUMN);
                Some(self.selections.resolve(Expression::Column(
                    primary.column(column, BasicType::String),
                )))
            }
            _ => None,
        };

        // Attributes of the entity first, then those only subtypes declare.
        let mut attributes: Vec<(Arc<EntityDescriptor>, AttributeDescriptor)> = descriptor
            .attributes
            .iter()
            .map(|a| (Arc::clone(&descriptor), a.clone()))
            .collect();
        for subtype in self.metamodel.concrete_subtypes(&descriptor.name) {
            for attribute in &subtype.attributes {
                if !attributes.iter().any(|(_, a)| a.name == attribute.name) {
                    attributes.push((Arc::clone(subtype), attribute.clone()));
                }
            }
        }

        let force_lazy = matches!(self.graph, Some((_, GraphSemantic::Fetch)));
        let mut fetches = Vec::with_capacity(attributes.len());
        for (owner, attribute) in attributes {
            let fetched = self
                .fetch_joins
                .get(&(path.clone(), attribute.name.clone()))
                .cloned();
            let fetch = match &attribute.kind {
                AttributeKind::Basic {
                    column,
                    basic_type,
                    table,
                } => {
                    let reference = match table {
                        Some(table) => group.resolve_table_reference(table)?,
                        None => primary,
                    };
                    Fetch::Basic {
                        attribute: attribute.name.clone(),
                        position: self
                            .selections
                            .resolve(Expression::Column(reference.column(column, *basic_type))),
                        ty: *basic_type,
                    }
                }
                AttributeKind::Embedded { embeddable, .. } => {
                    let positions = self
                        .metamodel
                        .attribute_columns(&owner, &attribute)?
                        .into_iter()
                        .map(|c| {
                            self.selections
                                .resolve(Expression::Column(primary.column(c.column, c.jdbc_type)))
                        })
                        .collect();
                    Fetch::Embedded {
                        attribute: attribute.name.clone(),
                        embeddable: embeddable.clone(),
                        positions,
                    }
                }
                AttributeKind::ToOne { target, fetch, .. } => match fetched {
                    Some(join) => Fetch::ToOneJoined {
                        attribute: attribute.name.clone(),
                        entity: Box::new(self.entity_result_for_group(join.group, join.path, None)?),
                    },
                    None => {
                        let column = self
                            .metamodel
                            .attribute_columns(&owner, &attribute)?
                            .into_iter()
                            .next()
                            .ok_or_else(|| {
                                Error::Mapping(format!("{}.{} has no column", owner.name, attribute.name))
                            })?;
                        Fetch::ToOneDelayed {
                            attribute: attribute.name.clone(),
                            target: target.clone(),
                            key: self
                                .selections
                                .resolve(Expression::Column(primary.column(column.column, column.jdbc_type))),
                            strategy: if force_lazy { FetchStrategy::Lazy } else { *fetch },
                        }
                    }
                },
                AttributeKind::ToMany { fetch, .. } => {
                    let role = attribute.collection_role().unwrap_or_default();
                    match fetched {
                        Some(join) => Fetch::CollectionJoined {
                            attribute: attribute.name.clone(),
                            role,
                            element: Box::new(self.entity_result_for_group(join.group, join.path, None)?),
                        },
                        None => Fetch::CollectionDelayed {
                            attribute: attribute.name.clone(),
                            role,
                            strategy: if force_lazy { FetchStrategy::Lazy } else { *fetch },
                        },
                    }
                }
            };
            fetches.push(fetch);
        }

        Ok(EntityResult {
            entity: descriptor.name.clone(),
            navigable_path: path,
            identifier,
            discriminator,
            fetches,
            alias,
        })
    }
}

fn stem(entity: &str) -> String {
    entity
        .chars()
        .next()
        .map(|c| c.to_ascii_lowercase().to_string())
        .unwrap_or_else(|| "t".to_string())
}

/// Primary and secondary table references for `entity` (the union of the
/// secondary tables of all its subtypes).
fn create_table_group(
    metamodel: &Metamodel,
    index: &mut FromClauseIndex,
    entity: &str,
    path: &NavigablePath,
    alias: Option<String>,
    dml: bool,
) -> Result<TableGroup, Error> {
    let descriptor = metamodel.entity_descriptor(entity)?;
    match descriptor.inheritance_strategy() {
        Some(strategy @ (InheritanceStrategy::Joined | InheritanceStrategy::TablePerClass)) => {
            return Err(Error::NotYetImplemented(format!(
                "{:?} inheritance ({})",
                strategy, descriptor.name
            )))
        }
        _ => {}
    }

    if dml {
        return Ok(TableGroup {
            navigable_path: path.clone(),
            source_alias: alias,
            entity: descriptor.name.clone(),
            primary_table: TableReference::new(descriptor.table.clone(), descriptor.table.clone()),
            table_reference_joins: Vec::new(),
            table_group_joins: Vec::new(),
        });
    }

    let number = index.next_group_number();
    let prefix = stem(&descriptor.name);
    let primary = TableReference::new(descriptor.table.clone(), format!("{}{}_0", prefix, number));

    let mut secondary_tables = descriptor.secondary_tables.clone();
    for subtype in metamodel.concrete_subtypes(entity) {
        for table in &subtype.secondary_tables {
            if !secondary_tables.iter().any(|t| t.name == table.name) {
                secondary_tables.push(table.clone());
            }
        }
    }

    let identifier = descriptor.identifier_columns();
    if !secondary_tables.is_empty() && identifier.len() != 1 {
        return Err(Error::NotYetImplemented(format!(
            "secondary tables of {} with a composite identifier",
            descriptor.name
        )));
    }

    let mut table_reference_joins = Vec::with_capacity(secondary_tables.len());
    for (i, table) in secondary_tables.iter().enumerate() {
        let reference = TableReference::new(table.name.clone(), format!("{}{}_{}", prefix, number, i + 1));
        let lhs = identifier
            .iter()
            .map(|c| primary.column(c.column.clone(), c.jdbc_type))
            .collect();
        let rhs = identifier
            .iter()
            .map(|c| reference.column(table.key_column.clone(), c.jdbc_type))
            .collect();
        if let Some(predicate) = Predicate::columns_equal(lhs, rhs) {
            table_reference_joins.push(TableReferenceJoin {
                join_type: SqlJoinType::Left,
                reference,
                predicate,
            });
        }
    }

    Ok(TableGroup {
        navigable_path: path.clone(),
        source_alias: alias,
        entity: descriptor.name.clone(),
        primary_table: primary,
        table_reference_joins,
        table_group_joins: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqm::interpret;
    use crate::testing::shop;

    fn select(query: &str) -> Result<SelectStatement, Error> {
        let metamodel = shop();
        let functions = FunctionRegistry::standard();
        let sqm = interpret(&metamodel, &functions, query)?;
        match SqmToSqlConverter::new(&metamodel, &functions).convert(&sqm)? {
            Statement::Select(s) => Ok(s),
            other => panic!("expected a select, got {:?}", other),
        }
    }

    fn convert(query: &str) -> Result<Statement, Error> {
        let metamodel = shop();
        let functions = FunctionRegistry::standard();
        let sqm = interpret(&metamodel, &functions, query)?;
        SqmToSqlConverter::new(&metamodel, &functions).convert(&sqm)
    }

    fn entity_result(statement: &SelectStatement) -> &EntityResult {
        match &statement.domain_results[0] {
            DomainResult::Entity(e) => e,
            other => panic!("expected an entity result, got {:?}", other),
        }
    }

    #[test]
    fn selection_registry_deduplicates() {
        let mut registry = SelectionRegistry::default();
        let table = TableReference::new("orders", "o1_0");
        let a = registry.resolve(Expression::Column(table.column("id", BasicType::Long)));
        let b = registry.resolve(Expression::Column(table.column("total", BasicType::Double)));
        let c = registry.resolve(Expression::Column(table.column("id", BasicType::Long)));
        assert_eq!((a, b, c), (0, 1, 0));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn single_root_with_restriction() {
        let statement = select("select o from Order o where o.total > 100").unwrap();
        assert_eq!(statement.table_groups.len(), 1);
        assert_eq!(statement.join_count(), 0);
        assert_eq!(
            statement.table_groups[0].primary_table.identification_variable,
            "o1_0"
        );
        assert!(matches!(
            statement.query_spec.where_clause,
            Some(Predicate::Comparison { .. })
        ));
        assert_eq!(
            statement.affected_tables.iter().collect::<Vec<_>>(),
            vec!["orders"]
        );
    }

    #[test]
    fn identifier_column_is_selected_once() {
        let statement = select("select o from Order o").unwrap();
        let result = entity_result(&statement);
        let Some(Fetch::Basic { position, .. }) = result.fetch("id") else {
            panic!("id is fetched as a basic attribute");
        };
        assert_eq!(result.identifier, vec![*position]);
        // id, total, status, priority, customer_id
        assert_eq!(statement.query_spec.selections.len(), 5);
    }

    #[test]
    fn lazy_to_one_is_delayed() {
        let statement = select("select o from Order o").unwrap();
        let result = entity_result(&statement);
        assert!(matches!(
            result.fetch("customer"),
            Some(Fetch::ToOneDelayed {
                strategy: FetchStrategy::Lazy,
                ..
            })
        ));
        assert!(matches!(
            result.fetch("lineItems"),
            Some(Fetch::CollectionDelayed { role, .. }) if role == "Order.lineItems"
        ));
    }

    #[test]
    fn implicit_join_is_created_once() {
        let statement = select(
            "select o.customer.name from Order o where o.customer.name = 'Acme' order by o.customer.name",
        )
        .unwrap();
        assert_eq!(statement.table_groups.len(), 2);
        assert_eq!(statement.join_count(), 1);
        assert_eq!(
            statement.table_groups[0].table_group_joins[0].join_type,
            SqlJoinType::Inner
        );
    }

    #[test]
    fn foreign_key_comparison_needs_no_join() {
        let statement = select("select o from Order o where o.customer = :c").unwrap();
        assert_eq!(statement.join_count(), 0);
        let Some(Predicate::Comparison { lhs, rhs, .. }) = &statement.query_spec.where_clause
        else {
            panic!("expected a comparison");
        };
        assert!(matches!(lhs, Expression::Column(c) if c.column == "customer_id"));
        assert!(matches!(
            rhs,
            Expression::Parameter {
                ty: Some(BasicType::Long),
                ..
            }
        ));
    }

    #[test]
    fn secondary_table_is_left_joined() {
        let statement = select("select c from Customer c where c.notes is null").unwrap();
        let group = &statement.table_groups[0];
        assert_eq!(group.table_reference_joins.len(), 1);
        assert_eq!(group.table_reference_joins[0].join_type, SqlJoinType::Left);
        assert_eq!(
            group.table_reference_joins[0].reference.identification_variable,
            "c1_1"
        );
        let Some(Predicate::IsNull {
            expression: Expression::Column(column),
            ..
        }) = &statement.query_spec.where_clause
        else {
            panic!("expected is null");
        };
        assert_eq!(column.qualifier, "c1_1");
    }

    #[test]
    fn subtype_root_is_restricted_by_discriminator() {
        let statement = select("select d from Dog d").unwrap();
        let Some(Predicate::InList { values, .. }) = &statement.query_spec.where_clause else {
            panic!("expected a discriminator restriction");
        };
        assert_eq!(values, &vec![Expression::literal("Dog")]);
        assert!(entity_result(&statement).discriminator.is_some());

        let animals = select("select a from Animal a").unwrap();
        assert!(animals.query_spec.where_clause.is_none());
        let result = entity_result(&animals);
        assert!(result.fetch("breed").is_some());
        assert!(result.fetch("lives").is_some());
    }

    #[test]
    fn member_of_and_is_empty_use_subqueries() {
        let statement =
            select("select c from Customer c where :o member of c.orders").unwrap();
        assert!(matches!(
            statement.query_spec.where_clause,
            Some(Predicate::InSubQuery { negated: false, .. })
        ));

        let statement = select("select c from Customer c where c.orders is empty").unwrap();
        assert!(matches!(
            statement.query_spec.where_clause,
            Some(Predicate::Exists { negated: true, .. })
        ));
        assert_eq!(statement.join_count(), 0);
    }

    #[test]
    fn fetch_join_nests_the_target() {
        let statement = select("select o from Order o join fetch o.customer").unwrap();
        assert_eq!(statement.join_count(), 1);
        let result = entity_result(&statement);
        let Some(Fetch::ToOneJoined { entity, .. }) = result.fetch("customer") else {
            panic!("customer should be join fetched");
        };
        assert_eq!(entity.entity, "Customer");
        assert!(!statement.has_collection_fetch);

        let statement = select("select c from Customer c left join fetch c.orders").unwrap();
        assert!(statement.has_collection_fetch);
        assert!(entity_result(&statement).has_collection_fetch());
    }

    #[test]
    fn entity_graph_adds_fetch_joins() {
        let metamodel = shop();
        let functions = FunctionRegistry::standard();
        let graph = EntityGraph::new("order.customer", "Order").with_attribute_node("customer");
        let sqm = interpret(&metamodel, &functions, "select o from Order o").unwrap();
        let SqmStatement::Select(sqm) = sqm else {
            panic!("expected a select");
        };
        let statement = SqmToSqlConverter::new(&metamodel, &functions)
            .with_entity_graph(&graph, GraphSemantic::Fetch)
            .convert_select(&sqm)
            .unwrap();
        assert_eq!(statement.join_count(), 1);
        assert_eq!(
            statement.table_groups[0].table_group_joins[0].join_type,
            SqlJoinType::Left
        );
        assert!(matches!(
            entity_result(&statement).fetch("customer"),
            Some(Fetch::ToOneJoined { .. })
        ));
    }

    #[test]
    fn update_and_delete_address_tables_by_name() {
        let Statement::Update(update) =
            convert("update Order o set o.status = 'shipped' where o.total > 10").unwrap()
        else {
            panic!("expected an update");
        };
        assert_eq!(update.target.identification_variable, "orders");
        assert_eq!(update.assignments[0].column.column, "status");

        let Statement::Delete(delete) = convert("delete from Dog d").unwrap() else {
            panic!("expected a delete");
        };
        assert!(matches!(delete.restriction, Some(Predicate::InList { .. })));
    }

    #[test]
    fn unsupported_dml_shapes() {
        assert!(matches!(
            convert("update Order o set o.status = 'x' where o.customer.name = 'y'"),
            Err(Error::NotYetImplemented(_))
        ));
        assert!(matches!(
            convert("delete from Customer c where c.notes = 'x'"),
            Err(Error::NotYetImplemented(_))
        ));
    }

    #[test]
    fn loaders() {
        let metamodel = shop();
        let functions = FunctionRegistry::standard();
        let loader = SqmToSqlConverter::new(&metamodel, &functions)
            .entity_loader("Order")
            .unwrap();
        assert!(matches!(
            loader.query_spec.where_clause,
            Some(Predicate::Comparison { .. })
        ));

        let composite = SqmToSqlConverter::new(&metamodel, &functions)
            .entity_loader("LineItem")
            .unwrap();
        assert!(matches!(
            composite.query_spec.where_clause,
            Some(Predicate::Junction { .. })
        ));

        let collection = SqmToSqlConverter::new(&metamodel, &functions)
            .collection_loader("Order.lineItems")
            .unwrap();
        assert_eq!(entity_result(&collection).entity, "LineItem");
    }
}
