//! Builds SQM from the syntax tree, resolving names and inferring types
//! against the runtime metamodel.

use super::function::{aggregate_type, ArgumentKind, FunctionRegistry};
use super::tree::*;
use crate::error::{Error, SemanticError, SemanticErrorKind};
use crate::metamodel::{
    AttributeDescriptor, AttributeKind, BasicType, ColumnMapping, ExpressableType, Metamodel,
};
use crate::path::{self, NavigablePath, IDENTIFIER_MAPPER_PROPERTY};
use crate::value::Value;
use quarry_lang::{
    AggregateFunction, ComparisonOp, DeleteStatement, DottedPath, Expression, FromRoot, Join,
    Literal, Parameter, Predicate, SelectStatement, Span, Spanned, Statement, UpdateStatement,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Parse and interpret a query string.
pub fn interpret(
    metamodel: &Metamodel,
    functions: &FunctionRegistry,
    query: &str,
) -> Result<SqmStatement, Error> {
    let statement = quarry_lang::parse(query)?;
    let sqm = SemanticQueryBuilder::new(metamodel, functions, query).build(&statement)?;
    debug!(query, "interpreted query");
    Ok(sqm)
}

/// One-shot builder; holds the alias and parameter registries of a single
/// statement.
pub struct SemanticQueryBuilder<'a> {
    metamodel: &'a Metamodel,
    functions: &'a FunctionRegistry,
    source: &'a str,
    aliases: HashMap<String, SqmPath>,
    roots: Vec<SqmRoot>,
    joins: Vec<SqmJoin>,
    join_spans: Vec<Span>,
    parameters: Vec<SqmParameterInfo>,
    select_aliases: HashMap<String, SqmExpression>,
    implicit_aliases: usize,
}

impl<'a> SemanticQueryBuilder<'a> {
    pub fn new(metamodel: &'a Metamodel, functions: &'a FunctionRegistry, source: &'a str) -> Self {
        Self {
            metamodel,
            functions,
            source,
            aliases: HashMap::new(),
            roots: Vec::new(),
            joins: Vec::new(),
            join_spans: Vec::new(),
            parameters: Vec::new(),
            select_aliases: HashMap::new(),
            implicit_aliases: 0,
        }
    }

    pub fn build(mut self, statement: &Statement) -> Result<SqmStatement, Error> {
        match statement {
            Statement::Select(s) => self.build_select(s).map(SqmStatement::Select),
            Statement::Update(u) => self.build_update(u).map(SqmStatement::Update),
            Statement::Delete(d) => self.build_delete(d).map(SqmStatement::Delete),
        }
    }

    fn error(&self, kind: SemanticErrorKind, message: impl Into<String>, span: Span) -> Error {
        Error::Semantic(SemanticError::new(kind, message, self.source, span))
    }

    fn mismatch(&self, message: impl Into<String>, span: Span) -> Error {
        self.error(SemanticErrorKind::TypeMismatch, message, span)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn build_select(&mut self, stmt: &SelectStatement) -> Result<SqmSelectStatement, Error> {
        for root in &stmt.from.roots {
            self.register_root(root)?;
            for join in &root.joins {
                self.build_join(join)?;
            }
        }

        let mut selections = Vec::new();
        let mut distinct = false;
        match &stmt.select {
            Some(clause) => {
                distinct = clause.distinct;
                for item in &clause.items {
                    let expression = self.build_expression(&item.expression)?;
                    if let Some(alias) = &item.alias {
                        if self.select_aliases.contains_key(&alias.value)
                            || self.aliases.contains_key(&alias.value)
                        {
                            return Err(self.error(
                                SemanticErrorKind::DuplicateAlias,
                                format!("alias '{}' is already defined", alias.value),
                                alias.span,
                            ));
                        }
                        self.select_aliases
                            .insert(alias.value.clone(), expression.clone());
                    }
                    selections.push(SqmSelection {
                        expression,
                        alias: item.alias.as_ref().map(|a| a.value.clone()),
                    });
                }
            }
            None => {
                for root in &self.roots {
                    selections.push(SqmSelection {
                        expression: SqmExpression::Path(root.as_path()),
                        alias: root.alias.clone(),
                    });
                }
            }
        }

        self.validate_fetch_joins(&selections)?;

        let where_clause = stmt
            .where_clause
            .as_ref()
            .map(|p| self.build_predicate(p))
            .transpose()?;
        let group_by = stmt
            .group_by
            .iter()
            .map(|e| self.build_expression(e))
            .collect::<Result<Vec<_>, _>>()?;
        let having = stmt
            .having
            .as_ref()
            .map(|p| self.build_predicate(p))
            .transpose()?;

        let mut order_by = Vec::with_capacity(stmt.order_by.len());
        for item in &stmt.order_by {
            let expression = match self.select_alias_reference(&item.expression) {
                Some(selected) => selected,
                None => self.build_expression(&item.expression)?,
            };
            order_by.push(SqmSortSpecification {
                expression,
                direction: item.direction,
                nulls: item.nulls,
            });
        }

        let limit = stmt
            .limit
            .as_ref()
            .map(|e| self.build_row_count(e))
            .transpose()?;
        let offset = stmt
            .offset
            .as_ref()
            .map(|e| self.build_row_count(e))
            .transpose()?;

        Ok(SqmSelectStatement {
            query_spec: SqmQuerySpec {
                distinct,
                selections,
                roots: std::mem::take(&mut self.roots),
                joins: std::mem::take(&mut self.joins),
                where_clause,
                group_by,
                having,
                order_by,
                limit,
                offset,
            },
            parameters: std::mem::take(&mut self.parameters),
        })
    }

    fn build_update(&mut self, stmt: &UpdateStatement) -> Result<SqmUpdateStatement, Error> {
        let target = self.register_target(&stmt.entity, stmt.alias.as_ref())?;
        // Unqualified assignment paths resolve against the target.
        self.roots.push(target.clone());
        let mut assignments = Vec::with_capacity(stmt.assignments.len());
        for assignment in &stmt.assignments {
            let path = self.resolve_path(&assignment.path)?;
            match &path.kind {
                SqmPathKind::Basic { .. } | SqmPathKind::ToOne { .. } => {}
                _ => {
                    return Err(self.error(
                        SemanticErrorKind::InvalidPath,
                        format!(
                            "'{}' cannot be assigned; only basic attributes and to-one references can",
                            assignment.path.text()
                        ),
                        assignment.path.span,
                    ))
                }
            }
            let mut target_expr = SqmExpression::Path(path.clone());
            let mut value = self.build_expression(&assignment.value)?;
            self.reconcile(&mut target_expr, &mut value, assignment.span)?;
            assignments.push(SqmAssignment {
                target: path,
                value,
            });
        }
        let where_clause = stmt
            .where_clause
            .as_ref()
            .map(|p| self.build_predicate(p))
            .transpose()?;
        Ok(SqmUpdateStatement {
            target,
            assignments,
            where_clause,
            parameters: std::mem::take(&mut self.parameters),
        })
    }

    fn build_delete(&mut self, stmt: &DeleteStatement) -> Result<SqmDeleteStatement, Error> {
        let target = self.register_target(&stmt.entity, stmt.alias.as_ref())?;
        self.roots.push(target.clone());
        let where_clause = stmt
            .where_clause
            .as_ref()
            .map(|p| self.build_predicate(p))
            .transpose()?;
        Ok(SqmDeleteStatement {
            target,
            where_clause,
            parameters: std::mem::take(&mut self.parameters),
        })
    }

    // ------------------------------------------------------------------
    // From clause
    // ------------------------------------------------------------------

    fn register_root(&mut self, root: &FromRoot) -> Result<(), Error> {
        let sqm_root = self.register_target(&root.entity, root.alias.as_ref())?;
        self.roots.push(sqm_root);
        Ok(())
    }

    fn register_target(
        &mut self,
        entity: &Spanned<String>,
        alias: Option<&Spanned<String>>,
    ) -> Result<SqmRoot, Error> {
        let descriptor = self
            .metamodel
            .find_entity_descriptor(&entity.value)
            .ok_or_else(|| {
                self.error(
                    SemanticErrorKind::UnknownEntity,
                    format!("unknown entity '{}'", entity.value),
                    entity.span,
                )
            })?;
        let path_alias = match alias {
            Some(a) => a.value.clone(),
            None => {
                let generated = format!("_{}", self.implicit_aliases);
                self.implicit_aliases += 1;
                generated
            }
        };
        let root = SqmRoot {
            entity: descriptor.name.clone(),
            alias: alias.map(|a| a.value.clone()),
            navigable_path: NavigablePath::root(&descriptor.name, &path_alias),
        };
        if let Some(alias) = alias {
            self.bind_alias(alias, root.as_path())?;
        }
        Ok(root)
    }

    fn bind_alias(&mut self, alias: &Spanned<String>, path: SqmPath) -> Result<(), Error> {
        if self.aliases.contains_key(&alias.value) {
            return Err(self.error(
                SemanticErrorKind::DuplicateAlias,
                format!("alias '{}' is used for more than one from-clause element", alias.value),
                alias.span,
            ));
        }
        self.aliases.insert(alias.value.clone(), path);
        Ok(())
    }

    fn build_join(&mut self, join: &Join) -> Result<(), Error> {
        let segments = &join.path.segments;
        let Some((last, prefix)) = segments.split_last() else {
            return Err(self.error(
                SemanticErrorKind::InvalidPath,
                "empty join path",
                join.path.span,
            ));
        };

        let lhs = if prefix.is_empty() {
            self.single_root_path().ok_or_else(|| {
                self.error(
                    SemanticErrorKind::InvalidPath,
                    "join path must start with an alias",
                    join.path.span,
                )
            })?
        } else {
            let end = prefix.last().map(|s| s.span.end).unwrap_or(join.path.span.end);
            self.resolve_path(&DottedPath {
                segments: prefix.to_vec(),
                span: Span::new(join.path.span.start, end),
            })?
        };

        let owner_name = lhs.entity_name().ok_or_else(|| {
            self.error(
                SemanticErrorKind::InvalidPath,
                format!("cannot join from non-entity path '{}'", lhs.navigable_path),
                join.path.span,
            )
        })?;
        let owner = Arc::clone(self.metamodel.entity_descriptor(owner_name)?);
        let attribute = owner.attribute(&last.value).ok_or_else(|| {
            self.error(
                SemanticErrorKind::UnknownAttribute,
                format!("unknown attribute '{}' of entity '{}'", last.value, owner.name),
                join.path.span,
            )
        })?;

        let target = match &attribute.kind {
            AttributeKind::ToOne { target, .. } => SqmJoinTarget::ToOne {
                entity: target.clone(),
            },
            AttributeKind::ToMany { target, .. } => SqmJoinTarget::Collection {
                role: path::append(&attribute.declaring_type, &attribute.name),
                element: target.clone(),
            },
            _ => {
                return Err(self.error(
                    SemanticErrorKind::InvalidPath,
                    format!("'{}' is not an association and cannot be joined", last.value),
                    join.path.span,
                ))
            }
        };

        if join.fetch && join.condition.is_some() {
            return Err(self.error(
                SemanticErrorKind::InvalidFetchJoin,
                "fetch joins cannot carry an on condition",
                join.span,
            ));
        }

        let navigable_path = match &join.alias {
            Some(alias) => lhs
                .navigable_path
                .append_aliased(&attribute.name, &alias.value),
            None => lhs.navigable_path.append(&attribute.name),
        };
        let mut sqm_join = SqmJoin {
            lhs,
            attribute: attribute.name.clone(),
            navigable_path,
            alias: join.alias.as_ref().map(|a| a.value.clone()),
            join_type: join.join_type,
            fetch: join.fetch,
            target,
            on: None,
        };
        if let Some(alias) = &join.alias {
            self.bind_alias(alias, sqm_join.as_path())?;
        }
        sqm_join.on = join
            .condition
            .as_ref()
            .map(|p| self.build_predicate(p))
            .transpose()?;

        self.joins.push(sqm_join);
        self.join_spans.push(join.span);
        Ok(())
    }

    /// The owner of every fetch join must itself be selected, directly or
    /// through a chain of fetch joins.
    fn validate_fetch_joins(&self, selections: &[SqmSelection]) -> Result<(), Error> {
        let mut fetched: HashSet<&NavigablePath> = selections
            .iter()
            .filter_map(|s| s.expression.as_path())
            .filter(|p| matches!(p.kind, SqmPathKind::Root { .. } | SqmPathKind::Join { .. }))
            .map(|p| &p.navigable_path)
            .collect();
        for (join, span) in self.joins.iter().zip(&self.join_spans) {
            if !join.fetch {
                continue;
            }
            if !fetched.contains(&join.lhs.navigable_path) {
                return Err(self.error(
                    SemanticErrorKind::InvalidFetchJoin,
                    format!(
                        "query specified join fetching, but the owner of the fetched association '{}' was not present in the select list",
                        join.lhs.navigable_path
                    ),
                    *span,
                ));
            }
            fetched.insert(&join.navigable_path);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------

    fn single_root_path(&self) -> Option<SqmPath> {
        match self.roots.as_slice() {
            [root] => Some(root.as_path()),
            _ => None,
        }
    }

    /// Resolve a dotted path, qualified by an alias or, with a single root,
    /// relative to that root.
    fn resolve_path(&self, dotted: &DottedPath) -> Result<SqmPath, Error> {
        let Some(first) = dotted.segments.first() else {
            return Err(self.error(SemanticErrorKind::InvalidPath, "empty path", dotted.span));
        };

        let (mut current, rest) = if let Some(bound) = self.aliases.get(&first.value) {
            (bound.clone(), &dotted.segments[1..])
        } else {
            match self.single_root_path() {
                Some(root) if self.root_has_attribute(&root, &first.value) => {
                    (root, &dotted.segments[..])
                }
                _ => {
                    return Err(self.error(
                        SemanticErrorKind::UnknownAlias,
                        format!("could not resolve '{}' to an alias or attribute", first.value),
                        first.span,
                    ))
                }
            }
        };

        for segment in rest {
            let span = Span::new(dotted.span.start, segment.span.end);
            current = self.dereference(current, segment, span)?;
        }
        Ok(current)
    }

    fn root_has_attribute(&self, root: &SqmPath, name: &str) -> bool {
        root.entity_name()
            .and_then(|e| self.metamodel.find_entity_descriptor(e))
            .map(|e| e.attribute(name).is_some() || name == "id")
            .unwrap_or(false)
    }

    fn dereference(
        &self,
        current: SqmPath,
        segment: &Spanned<String>,
        span: Span,
    ) -> Result<SqmPath, Error> {
        let name = segment.value.as_str();
        match &current.kind {
            SqmPathKind::Root { .. } | SqmPathKind::Join { .. } | SqmPathKind::ToOne { .. } => {
                let entity_name = current.entity_name().unwrap_or_default().to_string();
                let entity = Arc::clone(self.metamodel.entity_descriptor(&entity_name)?);

                if let SqmPathKind::ToOne { lhs, attribute, .. } = &current.kind {
                    let targets_identifier = entity
                        .simple_identifier()
                        .map(|id| id.name == name || name == "id")
                        .unwrap_or(false);
                    if targets_identifier {
                        let column = self.foreign_key_column(lhs, attribute, span)?;
                        let ty = ExpressableType::Basic(column.jdbc_type);
                        return Ok(SqmPath {
                            navigable_path: current.navigable_path.append(name),
                            kind: SqmPathKind::ForeignKey {
                                lhs: lhs.clone(),
                                attribute: attribute.clone(),
                                column,
                            },
                            ty,
                        });
                    }
                }

                if let Some(attribute) = entity.attribute(name) {
                    return Ok(attribute_path(current, attribute));
                }
                if name == "id" {
                    if entity.identifier.is_composite() {
                        return Ok(SqmPath {
                            navigable_path: current.navigable_path.append(IDENTIFIER_MAPPER_PROPERTY),
                            kind: SqmPathKind::IdentifierMapper {
                                lhs: Box::new(current),
                            },
                            ty: ExpressableType::Embeddable(IDENTIFIER_MAPPER_PROPERTY.to_string()),
                        });
                    }
                    if let Some(id) = entity.simple_identifier() {
                        return Ok(attribute_path(current, id));
                    }
                }
                Err(self.error(
                    SemanticErrorKind::UnknownAttribute,
                    format!("unknown attribute '{}' of entity '{}'", name, entity.name),
                    span,
                ))
            }
            SqmPathKind::IdentifierMapper { lhs } => {
                let entity_name = lhs.entity_name().unwrap_or_default();
                let entity = self.metamodel.entity_descriptor(entity_name)?;
                match entity.attribute(name) {
                    Some(attribute) if entity.is_identifier_attribute(name) => {
                        Ok(attribute_path(current, attribute))
                    }
                    _ => Err(self.error(
                        SemanticErrorKind::UnknownAttribute,
                        format!("'{}' is not part of the identifier of '{}'", name, entity.name),
                        span,
                    )),
                }
            }
            SqmPathKind::Embedded {
                embeddable,
                column_prefix,
                ..
            } => {
                let descriptor = self.metamodel.embeddable_descriptor(embeddable)?;
                let attribute = descriptor.attribute(name).ok_or_else(|| {
                    self.error(
                        SemanticErrorKind::UnknownAttribute,
                        format!("unknown attribute '{}' of embeddable '{}'", name, embeddable),
                        span,
                    )
                })?;
                match &attribute.kind {
                    AttributeKind::Basic {
                        column, basic_type, ..
                    } => {
                        let column = ColumnMapping {
                            table: None,
                            column: format!("{}{}", column_prefix, column),
                            jdbc_type: *basic_type,
                        };
                        Ok(SqmPath {
                            navigable_path: current.navigable_path.append(name),
                            ty: ExpressableType::Basic(*basic_type),
                            kind: SqmPathKind::Basic {
                                lhs: Box::new(current),
                                attribute: name.to_string(),
                                column,
                            },
                        })
                    }
                    _ => Err(self.error(
                        SemanticErrorKind::InvalidPath,
                        format!("embeddable attribute '{}' is not basic", name),
                        span,
                    )),
                }
            }
            SqmPathKind::Plural { attribute, .. } => Err(self.error(
                SemanticErrorKind::InvalidPath,
                format!(
                    "plural attribute '{}' cannot be dereferenced; join it and use the join alias",
                    attribute
                ),
                span,
            )),
            SqmPathKind::Basic { attribute, .. } | SqmPathKind::ForeignKey { attribute, .. } => {
                Err(self.error(
                    SemanticErrorKind::InvalidPath,
                    format!("basic attribute '{}' cannot be dereferenced", attribute),
                    span,
                ))
            }
        }
    }

    fn foreign_key_column(
        &self,
        owner_path: &SqmPath,
        attribute: &str,
        span: Span,
    ) -> Result<ColumnMapping, Error> {
        let owner_name = owner_path.entity_name().unwrap_or_default();
        let owner = self.metamodel.entity_descriptor(owner_name)?;
        let descriptor = owner.attribute(attribute).ok_or_else(|| {
            self.error(
                SemanticErrorKind::UnknownAttribute,
                format!("unknown attribute '{}' of entity '{}'", attribute, owner.name),
                span,
            )
        })?;
        self.metamodel
            .attribute_columns(owner, descriptor)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Mapping(format!("{}.{} has no column", owner.name, attribute)))
    }

    /// A path used as a value.
    fn resolve_value_path(&self, dotted: &DottedPath) -> Result<SqmPath, Error> {
        let path = self.resolve_path(dotted)?;
        match &path.kind {
            SqmPathKind::Plural { attribute, .. } => Err(self.error(
                SemanticErrorKind::InvalidPath,
                format!(
                    "plural attribute '{}' can only be joined or used with 'member of' and 'is empty'",
                    attribute
                ),
                dotted.span,
            )),
            SqmPathKind::IdentifierMapper { .. } => Err(self.error(
                SemanticErrorKind::InvalidPath,
                "a composite identifier must be dereferenced to one of its attributes",
                dotted.span,
            )),
            _ => Ok(path),
        }
    }

    fn select_alias_reference(&self, expression: &Expression) -> Option<SqmExpression> {
        match expression {
            Expression::Path(p) if p.segments.len() == 1 => {
                let name = &p.segments[0].value;
                if self.aliases.contains_key(name) {
                    return None;
                }
                self.select_aliases.get(name).cloned()
            }
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn build_expression(&mut self, expression: &Expression) -> Result<SqmExpression, Error> {
        match expression {
            Expression::Path(p) => Ok(SqmExpression::Path(self.resolve_value_path(p)?)),
            Expression::Literal(l) => Ok(SqmExpression::literal(literal_value(&l.value))),
            Expression::Parameter(p) => {
                self.register_parameter(&p.value);
                Ok(SqmExpression::Parameter {
                    parameter: p.value.clone(),
                    ty: None,
                })
            }
            Expression::Arithmetic { op, lhs, rhs, span } => {
                let mut lhs = self.build_expression(lhs)?;
                let mut rhs = self.build_expression(rhs)?;
                let ty = self.reconcile_numeric(&mut lhs, &mut rhs, *span)?;
                Ok(SqmExpression::Binary {
                    op: *op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    ty,
                })
            }
            Expression::Negate { operand, span } => {
                let mut operand = self.build_expression(operand)?;
                let ty = match operand.basic_type() {
                    Some(t) if t.is_numeric() => t,
                    None if operand.expressable_type().is_none() => {
                        self.infer(&mut operand, &ExpressableType::Basic(BasicType::Double));
                        BasicType::Double
                    }
                    _ => return Err(self.mismatch("unary minus requires a numeric operand", *span)),
                };
                Ok(SqmExpression::Negated {
                    operand: Box::new(operand),
                    ty,
                })
            }
            Expression::Function {
                name,
                arguments,
                span,
            } => self.build_function(name, arguments, *span),
            Expression::Aggregate {
                function,
                distinct,
                argument,
                span,
            } => {
                let argument = argument
                    .as_deref()
                    .map(|a| self.build_expression(a))
                    .transpose()?;
                let argument_type = argument.as_ref().and_then(|a| a.basic_type());
                let entity_argument = argument
                    .as_ref()
                    .and_then(|a| a.expressable_type())
                    .map(|t| t.is_entity())
                    .unwrap_or(false);
                let ty = if entity_argument && *function != AggregateFunction::Count {
                    None
                } else {
                    aggregate_type(*function, argument_type)
                };
                let ty = ty.ok_or_else(|| {
                    self.mismatch(
                        format!(
                            "{}() cannot be applied to {}",
                            function.name(),
                            argument
                                .as_ref()
                                .and_then(|a| a.expressable_type())
                                .map(|t| t.to_string())
                                .unwrap_or_else(|| "an untyped argument".into())
                        ),
                        *span,
                    )
                })?;
                Ok(SqmExpression::Aggregate {
                    function: *function,
                    distinct: *distinct,
                    argument: argument.map(Box::new),
                    ty,
                })
            }
            Expression::SearchedCase {
                branches,
                otherwise,
                span,
            } => {
                let mut built = Vec::with_capacity(branches.len());
                for (predicate, result) in branches {
                    let predicate = self.build_predicate(predicate)?;
                    let result = self.build_expression(result)?;
                    built.push((predicate, result));
                }
                let mut otherwise = otherwise
                    .as_deref()
                    .map(|e| self.build_expression(e))
                    .transpose()?;
                let mut results: Vec<&mut SqmExpression> =
                    built.iter_mut().map(|(_, r)| r).collect();
                if let Some(o) = otherwise.as_mut() {
                    results.push(o);
                }
                let ty = self.reconcile_results(results, *span)?;
                Ok(SqmExpression::SearchedCase {
                    branches: built,
                    otherwise: otherwise.map(Box::new),
                    ty,
                })
            }
            Expression::SimpleCase {
                operand,
                branches,
                otherwise,
                span,
            } => {
                let mut operand = self.build_expression(operand)?;
                let mut built = Vec::with_capacity(branches.len());
                for (when, result) in branches {
                    let mut when = self.build_expression(when)?;
                    self.reconcile(&mut operand, &mut when, *span)?;
                    let result = self.build_expression(result)?;
                    built.push((when, result));
                }
                let mut otherwise = otherwise
                    .as_deref()
                    .map(|e| self.build_expression(e))
                    .transpose()?;
                let mut results: Vec<&mut SqmExpression> =
                    built.iter_mut().map(|(_, r)| r).collect();
                if let Some(o) = otherwise.as_mut() {
                    results.push(o);
                }
                let ty = self.reconcile_results(results, *span)?;
                Ok(SqmExpression::SimpleCase {
                    operand: Box::new(operand),
                    branches: built,
                    otherwise: otherwise.map(Box::new),
                    ty,
                })
            }
        }
    }

    fn build_function(
        &mut self,
        name: &Spanned<String>,
        arguments: &[Expression],
        span: Span,
    ) -> Result<SqmExpression, Error> {
        let descriptor = self.functions.find(&name.value).cloned().ok_or_else(|| {
            self.error(
                SemanticErrorKind::UnknownFunction,
                format!("unknown function '{}'", name.value),
                name.span,
            )
        })?;
        if !descriptor.accepts_arity(arguments.len()) {
            return Err(self.error(
                SemanticErrorKind::InvalidArguments,
                format!(
                    "{}() takes {} arguments but {} were given",
                    descriptor.name,
                    descriptor.arity_description(),
                    arguments.len()
                ),
                span,
            ));
        }

        let mut built = Vec::with_capacity(arguments.len());
        for (i, argument) in arguments.iter().enumerate() {
            let mut expression = self.build_expression(argument)?;
            let kind = descriptor.argument_kind(i);
            match expression.basic_type() {
                Some(ty) => {
                    if !kind.accepts(ty) {
                        return Err(self.error(
                            SemanticErrorKind::InvalidArguments,
                            format!(
                                "argument {} of {}() has type {}, expected {:?}",
                                i + 1,
                                descriptor.name,
                                ty,
                                kind
                            ),
                            argument.span(),
                        ));
                    }
                    if kind == ArgumentKind::String {
                        expression.apply_inferred_type(BasicType::String);
                    }
                }
                None => {
                    if expression.expressable_type().is_some() {
                        return Err(self.error(
                            SemanticErrorKind::InvalidArguments,
                            format!("argument {} of {}() must be a basic value", i + 1, descriptor.name),
                            argument.span(),
                        ));
                    }
                    if let Some(implied) = kind.implied_type() {
                        self.infer(&mut expression, &ExpressableType::Basic(implied));
                    }
                }
            }
            built.push(expression);
        }

        if descriptor.name == "coalesce" {
            let results: Vec<&mut SqmExpression> = built.iter_mut().collect();
            self.reconcile_results(results, span)?;
        }

        let argument_types: Vec<_> = built.iter().map(|a| a.basic_type()).collect();
        let ty = descriptor
            .resolve_return_type(&argument_types)
            .or_else(|| descriptor.argument_kind(0).implied_type())
            .unwrap_or(BasicType::String);
        Ok(SqmExpression::Function {
            name: descriptor.name.to_string(),
            arguments: built,
            ty,
        })
    }

    fn build_row_count(&mut self, expression: &Expression) -> Result<SqmExpression, Error> {
        let mut built = self.build_expression(expression)?;
        match built.basic_type() {
            Some(BasicType::Integer) | Some(BasicType::Long) => Ok(built),
            None if built.expressable_type().is_none() => {
                self.infer(&mut built, &ExpressableType::Basic(BasicType::Integer));
                Ok(built)
            }
            _ => Err(self.mismatch("limit and offset must be integers", expression.span())),
        }
    }

    // ------------------------------------------------------------------
    // Predicates
    // ------------------------------------------------------------------

    fn build_predicate(&mut self, predicate: &Predicate) -> Result<SqmPredicate, Error> {
        match predicate {
            Predicate::Comparison { op, lhs, rhs, span } => {
                let mut lhs = self.build_expression(lhs)?;
                let mut rhs = self.build_expression(rhs)?;
                self.reconcile(&mut lhs, &mut rhs, *span)?;
                let entity_valued = [&lhs, &rhs]
                    .iter()
                    .any(|e| e.expressable_type().map(|t| t.is_entity()).unwrap_or(false));
                if entity_valued && !matches!(op, ComparisonOp::Eq | ComparisonOp::Ne) {
                    return Err(self.mismatch("entities can only be compared for equality", *span));
                }
                Ok(SqmPredicate::Comparison { op: *op, lhs, rhs })
            }
            Predicate::Junction {
                kind, predicates, ..
            } => Ok(SqmPredicate::Junction {
                kind: *kind,
                predicates: predicates
                    .iter()
                    .map(|p| self.build_predicate(p))
                    .collect::<Result<_, _>>()?,
            }),
            Predicate::Not { predicate, .. } => {
                Ok(SqmPredicate::Negated(Box::new(self.build_predicate(predicate)?)))
            }
            Predicate::Between {
                expression,
                low,
                high,
                negated,
                span,
            } => {
                let mut expression = self.build_expression(expression)?;
                let mut low = self.build_expression(low)?;
                let mut high = self.build_expression(high)?;
                self.reconcile(&mut expression, &mut low, *span)?;
                self.reconcile(&mut expression, &mut high, *span)?;
                if expression.basic_type().is_none() && expression.expressable_type().is_some() {
                    return Err(self.mismatch("between requires basic values", *span));
                }
                Ok(SqmPredicate::Between {
                    expression,
                    low,
                    high,
                    negated: *negated,
                })
            }
            Predicate::IsNull {
                expression,
                negated,
                ..
            } => Ok(SqmPredicate::IsNull {
                expression: self.build_expression(expression)?,
                negated: *negated,
            }),
            Predicate::Like {
                expression,
                pattern,
                escape,
                negated,
                span,
            } => {
                let mut expression = self.build_expression(expression)?;
                let mut pattern = self.build_expression(pattern)?;
                let string = ExpressableType::Basic(BasicType::String);
                for operand in [&mut expression, &mut pattern] {
                    match operand.basic_type() {
                        Some(t) if t.is_string_like() => {
                            operand.apply_inferred_type(BasicType::String);
                        }
                        None if operand.expressable_type().is_none() => {
                            self.infer(operand, &string);
                        }
                        _ => return Err(self.mismatch("like requires string operands", *span)),
                    }
                }
                let escape = match escape {
                    Some(e) => {
                        let mut escape = self.build_expression(e)?;
                        match escape.basic_type() {
                            Some(t) if t.is_string_like() => {
                                if !escape.apply_inferred_type(BasicType::Character) {
                                    return Err(self.mismatch(
                                        "escape must be a single character",
                                        e.span(),
                                    ));
                                }
                            }
                            None => {
                                self.infer(&mut escape, &ExpressableType::Basic(BasicType::Character))
                            }
                            _ => {
                                return Err(self.mismatch("escape must be a single character", e.span()))
                            }
                        }
                        Some(escape)
                    }
                    None => None,
                };
                Ok(SqmPredicate::Like {
                    expression,
                    pattern,
                    escape,
                    negated: *negated,
                })
            }
            Predicate::InList {
                expression,
                values,
                negated,
                span,
            } => {
                let mut expression = self.build_expression(expression)?;
                let mut built = Vec::with_capacity(values.len());
                for value in values {
                    let mut value = self.build_expression(value)?;
                    self.reconcile(&mut expression, &mut value, *span)?;
                    built.push(value);
                }
                Ok(SqmPredicate::InList {
                    expression,
                    values: built,
                    negated: *negated,
                })
            }
            Predicate::MemberOf {
                element,
                collection,
                negated,
                span,
            } => {
                let (collection, element_entity) = self.resolve_collection(collection)?;
                let mut element = self.build_expression(element)?;
                let element_type = ExpressableType::Entity(element_entity.clone());
                match element.expressable_type() {
                    None => self.infer(&mut element, &element_type),
                    Some(ExpressableType::Entity(name))
                        if name == element_entity
                            || self.metamodel.is_subtype_of(&name, &element_entity) => {}
                    Some(other) => {
                        return Err(self.mismatch(
                            format!("{} cannot be a member of a collection of {}", other, element_entity),
                            *span,
                        ))
                    }
                }
                Ok(SqmPredicate::MemberOf {
                    element,
                    collection,
                    negated: *negated,
                })
            }
            Predicate::IsEmpty {
                collection,
                negated,
                ..
            } => Ok(SqmPredicate::EmptyCollection {
                collection: self.resolve_collection(collection)?.0,
                negated: *negated,
            }),
        }
    }

    /// A plural path and its element entity.
    fn resolve_collection(&self, dotted: &DottedPath) -> Result<(SqmPath, String), Error> {
        let path = self.resolve_path(dotted)?;
        if let SqmPathKind::Plural { element, .. } = &path.kind {
            let element = element.clone();
            Ok((path, element))
        } else {
            Err(self.error(
                SemanticErrorKind::InvalidPath,
                format!("'{}' is not a collection", dotted.text()),
                dotted.span,
            ))
        }
    }

    // ------------------------------------------------------------------
    // Typing
    // ------------------------------------------------------------------

    fn register_parameter(&mut self, parameter: &Parameter) {
        if !self.parameters.iter().any(|p| &p.parameter == parameter) {
            self.parameters.push(SqmParameterInfo {
                parameter: parameter.clone(),
                ty: None,
            });
        }
    }

    /// Give an untyped parameter or null literal the type implied by context.
    fn infer(&mut self, expression: &mut SqmExpression, implied: &ExpressableType) {
        if let SqmExpression::Parameter { parameter, ty } = expression {
            if ty.is_none() {
                *ty = Some(implied.clone());
                if let Some(info) = self
                    .parameters
                    .iter_mut()
                    .find(|p| p.parameter == *parameter && p.ty.is_none())
                {
                    info.ty = Some(implied.clone());
                }
            }
        } else if let Some(basic) = implied.basic() {
            expression.apply_inferred_type(basic);
        }
    }

    /// Make two operands of a comparison-like construct agree on a type.
    fn reconcile(
        &mut self,
        lhs: &mut SqmExpression,
        rhs: &mut SqmExpression,
        span: Span,
    ) -> Result<(), Error> {
        match (lhs.expressable_type(), rhs.expressable_type()) {
            (None, None) => Ok(()),
            (Some(t), None) => {
                self.infer(rhs, &t);
                Ok(())
            }
            (None, Some(t)) => {
                self.infer(lhs, &t);
                Ok(())
            }
            (Some(ExpressableType::Basic(a)), Some(ExpressableType::Basic(b))) => {
                if !a.is_compatible_with(b) {
                    return Err(self.mismatch(
                        format!("cannot compare {} with {}", a, b),
                        span,
                    ));
                }
                let lhs_literal = matches!(lhs, SqmExpression::Literal { .. });
                let rhs_literal = matches!(rhs, SqmExpression::Literal { .. });
                if rhs_literal && !lhs_literal {
                    rhs.apply_inferred_type(a);
                } else if lhs_literal && !rhs_literal {
                    lhs.apply_inferred_type(b);
                }
                Ok(())
            }
            (Some(ExpressableType::Entity(a)), Some(ExpressableType::Entity(b))) => {
                if a == b || self.metamodel.is_subtype_of(&a, &b) || self.metamodel.is_subtype_of(&b, &a)
                {
                    Ok(())
                } else {
                    Err(self.mismatch(format!("cannot compare entity {} with entity {}", a, b), span))
                }
            }
            (Some(a), Some(b)) => Err(self.mismatch(format!("cannot compare {} with {}", a, b), span)),
        }
    }

    fn reconcile_numeric(
        &mut self,
        lhs: &mut SqmExpression,
        rhs: &mut SqmExpression,
        span: Span,
    ) -> Result<BasicType, Error> {
        self.reconcile(lhs, rhs, span)?;
        match (lhs.basic_type(), rhs.basic_type()) {
            (Some(a), Some(b)) if a.is_numeric() && b.is_numeric() => Ok(a.widen(b)),
            (None, None) if lhs.expressable_type().is_none() && rhs.expressable_type().is_none() => {
                let double = ExpressableType::Basic(BasicType::Double);
                self.infer(lhs, &double);
                self.infer(rhs, &double);
                Ok(BasicType::Double)
            }
            _ => Err(self.mismatch("arithmetic requires numeric operands", span)),
        }
    }

    /// Unify the result branches of a case expression (or coalesce arguments)
    /// and push the unified type into literals and parameters.
    fn reconcile_results(
        &mut self,
        mut results: Vec<&mut SqmExpression>,
        span: Span,
    ) -> Result<Option<BasicType>, Error> {
        let mut unified: Option<BasicType> = None;
        for result in &results {
            match result.expressable_type() {
                Some(ExpressableType::Basic(t)) => {
                    unified = Some(match unified {
                        None => t,
                        Some(current) => unify(current, t).ok_or_else(|| {
                            self.mismatch(
                                format!("case results have incompatible types {} and {}", current, t),
                                span,
                            )
                        })?,
                    });
                }
                Some(other) => {
                    return Err(self.mismatch(
                        format!("case results must be basic values, found {}", other),
                        span,
                    ))
                }
                None => {}
            }
        }
        if let Some(ty) = unified {
            let implied = ExpressableType::Basic(ty);
            for result in results.iter_mut() {
                self.infer(&mut **result, &implied);
            }
        }
        Ok(unified)
    }
}

fn unify(a: BasicType, b: BasicType) -> Option<BasicType> {
    if a == b {
        Some(a)
    } else if a.is_numeric() && b.is_numeric() {
        Some(a.widen(b))
    } else if a.is_string_like() && b.is_string_like() {
        Some(BasicType::String)
    } else {
        None
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Boolean(b) => Value::Bool(*b),
        Literal::Integer(i) => Value::Int32(*i),
        Literal::Long(l) => Value::Int64(*l),
        Literal::Decimal(d) => Value::Float64(*d),
        Literal::Character(c) => Value::Char(*c),
        Literal::String(s) => Value::String(s.clone()),
    }
}

fn attribute_path(lhs: SqmPath, attribute: &AttributeDescriptor) -> SqmPath {
    let navigable_path = lhs.navigable_path.append(&attribute.name);
    let lhs = Box::new(lhs);
    match &attribute.kind {
        AttributeKind::Basic {
            column,
            basic_type,
            table,
        } => SqmPath {
            navigable_path,
            kind: SqmPathKind::Basic {
                lhs,
                attribute: attribute.name.clone(),
                column: ColumnMapping {
                    table: table.clone(),
                    column: column.clone(),
                    jdbc_type: *basic_type,
                },
            },
            ty: ExpressableType::Basic(*basic_type),
        },
        AttributeKind::Embedded {
            embeddable,
            column_prefix,
        } => SqmPath {
            navigable_path,
            kind: SqmPathKind::Embedded {
                lhs,
                attribute: attribute.name.clone(),
                embeddable: embeddable.clone(),
                column_prefix: column_prefix.clone(),
            },
            ty: ExpressableType::Embeddable(embeddable.clone()),
        },
        AttributeKind::ToOne { target, .. } => SqmPath {
            navigable_path,
            kind: SqmPathKind::ToOne {
                lhs,
                attribute: attribute.name.clone(),
                target: target.clone(),
            },
            ty: ExpressableType::Entity(target.clone()),
        },
        AttributeKind::ToMany { target, .. } => {
            let role = path::append(&attribute.declaring_type, &attribute.name);
            SqmPath {
                navigable_path,
                ty: ExpressableType::Collection {
                    role: role.clone(),
                    element: target.clone(),
                },
                kind: SqmPathKind::Plural {
                    lhs,
                    attribute: attribute.name.clone(),
                    role,
                    element: target.clone(),
                },
            }
        }
    }
}
