//! Recursive descent parser for the query language.

use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::{tokenize, SpannedToken, Token};
use crate::span::{Span, Spanned};

/// Parser over a fully tokenized query.
///
/// Tokens are buffered up front so that parenthesized predicates can be
/// told apart from parenthesized expressions by backtracking.
pub struct Parser<'source> {
    tokens: Vec<SpannedToken>,
    pos: usize,
    source: &'source str,
}

impl<'source> Parser<'source> {
    pub fn new(source: &'source str) -> Result<Self, ParseError> {
        Ok(Self {
            tokens: tokenize(source)?,
            pos: 0,
            source,
        })
    }

    /// Parse a complete statement, rejecting trailing input.
    pub fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        let statement = match self.peek() {
            Some(Token::Select) | Some(Token::From) => Statement::Select(self.parse_select()?),
            Some(Token::Update) => Statement::Update(self.parse_update()?),
            Some(Token::Delete) => Statement::Delete(self.parse_delete()?),
            Some(_) => {
                let tok = self.next_token()?;
                return Err(ParseError::new(
                    format!("expected 'select', 'from', 'update' or 'delete', found {}", tok.token),
                    tok.span,
                ));
            }
            None => {
                return Err(ParseError::new("empty query", Span::new(0, self.source.len())))
            }
        };

        if let Some(tok) = self.tokens.get(self.pos) {
            return Err(ParseError::new(
                format!("unexpected {} after end of statement", tok.token),
                tok.span,
            ));
        }

        Ok(statement)
    }

    fn parse_select(&mut self) -> Result<SelectStatement, ParseError> {
        let start = self.current_span();

        let select = if self.check(&Token::Select) {
            Some(self.parse_select_clause()?)
        } else {
            None
        };

        self.expect_token(Token::From)?;
        let from = self.parse_from_clause()?;

        let where_clause = if self.eat(&Token::Where).is_some() {
            Some(self.parse_predicate()?)
        } else {
            None
        };

        let mut group_by = Vec::new();
        if self.eat(&Token::Group).is_some() {
            self.expect_token(Token::By)?;
            group_by.push(self.parse_expression()?);
            while self.eat(&Token::Comma).is_some() {
                group_by.push(self.parse_expression()?);
            }
        }

        let having = if self.eat(&Token::Having).is_some() {
            Some(self.parse_predicate()?)
        } else {
            None
        };

        let mut order_by = Vec::new();
        if self.eat(&Token::Order).is_some() {
            self.expect_token(Token::By)?;
            order_by.push(self.parse_sort_item()?);
            while self.eat(&Token::Comma).is_some() {
                order_by.push(self.parse_sort_item()?);
            }
        }

        let limit = if self.eat(&Token::Limit).is_some() {
            Some(self.parse_expression()?)
        } else {
            None
        };
        let offset = if self.eat(&Token::Offset).is_some() {
            Some(self.parse_expression()?)
        } else {
            None
        };

        Ok(SelectStatement {
            select,
            from,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
            offset,
            span: start.merge(self.previous_span()),
        })
    }

    fn parse_select_clause(&mut self) -> Result<SelectClause, ParseError> {
        let start = self.expect_token(Token::Select)?.span;
        let distinct = self.eat(&Token::Distinct).is_some();

        let mut items = vec![self.parse_select_item()?];
        while self.eat(&Token::Comma).is_some() {
            items.push(self.parse_select_item()?);
        }

        Ok(SelectClause {
            distinct,
            items,
            span: start.merge(self.previous_span()),
        })
    }

    fn parse_select_item(&mut self) -> Result<SelectItem, ParseError> {
        let expression = self.parse_expression()?;
        let alias = self.parse_optional_alias()?;
        Ok(SelectItem { expression, alias })
    }

    fn parse_from_clause(&mut self) -> Result<FromClause, ParseError> {
        let start = self.current_span();
        let mut roots = vec![self.parse_from_root()?];
        while self.eat(&Token::Comma).is_some() {
            roots.push(self.parse_from_root()?);
        }
        Ok(FromClause {
            roots,
            span: start.merge(self.previous_span()),
        })
    }

    fn parse_from_root(&mut self) -> Result<FromRoot, ParseError> {
        let entity = self.parse_entity_name()?;
        let alias = self.parse_optional_alias()?;

        let mut joins = Vec::new();
        while matches!(
            self.peek(),
            Some(Token::Join) | Some(Token::Inner) | Some(Token::Left)
        ) {
            joins.push(self.parse_join()?);
        }

        Ok(FromRoot {
            span: entity.span.merge(self.previous_span()),
            entity,
            alias,
            joins,
        })
    }

    fn parse_join(&mut self) -> Result<Join, ParseError> {
        let start = self.current_span();
        let join_type = match self.peek() {
            Some(Token::Left) => {
                self.next_token()?;
                self.eat(&Token::Outer);
                JoinType::Left
            }
            Some(Token::Inner) => {
                self.next_token()?;
                JoinType::Inner
            }
            _ => JoinType::Inner,
        };
        self.expect_token(Token::Join)?;
        let fetch = self.eat(&Token::Fetch).is_some();

        let path = self.parse_dotted_path()?;
        if path.segments.len() < 2 {
            return Err(ParseError::new(
                format!("join path '{}' must navigate from an alias", path.text()),
                path.span,
            )
            .with_hint("write joins as 'join alias.attribute'"));
        }

        let alias = self.parse_optional_alias()?;
        let condition = if self.eat(&Token::On).is_some() || self.eat(&Token::With).is_some() {
            Some(self.parse_predicate()?)
        } else {
            None
        };

        Ok(Join {
            join_type,
            fetch,
            path,
            alias,
            condition,
            span: start.merge(self.previous_span()),
        })
    }

    fn parse_sort_item(&mut self) -> Result<SortItem, ParseError> {
        let expression = self.parse_expression()?;
        let start = expression.span();

        let direction = if self.eat(&Token::Desc).is_some() {
            SortDirection::Descending
        } else {
            self.eat(&Token::Asc);
            SortDirection::Ascending
        };

        let nulls = if self.eat(&Token::Nulls).is_some() {
            let tok = self.next_token()?;
            match tok.token {
                Token::First => Some(NullPrecedence::First),
                Token::Last => Some(NullPrecedence::Last),
                other => {
                    return Err(ParseError::new(
                        format!("expected 'first' or 'last' after 'nulls', found {}", other),
                        tok.span,
                    ))
                }
            }
        } else {
            None
        };

        Ok(SortItem {
            expression,
            direction,
            nulls,
            span: start.merge(self.previous_span()),
        })
    }

    fn parse_update(&mut self) -> Result<UpdateStatement, ParseError> {
        let start = self.expect_token(Token::Update)?.span;
        let entity = self.parse_entity_name()?;
        let alias = self.parse_optional_alias()?;
        self.expect_token(Token::Set)?;

        let mut assignments = vec![self.parse_assignment()?];
        while self.eat(&Token::Comma).is_some() {
            assignments.push(self.parse_assignment()?);
        }

        let where_clause = if self.eat(&Token::Where).is_some() {
            Some(self.parse_predicate()?)
        } else {
            None
        };

        Ok(UpdateStatement {
            entity,
            alias,
            assignments,
            where_clause,
            span: start.merge(self.previous_span()),
        })
    }

    fn parse_assignment(&mut self) -> Result<Assignment, ParseError> {
        let path = self.parse_dotted_path()?;
        self.expect_token(Token::Eq)?;
        let value = self.parse_expression()?;
        Ok(Assignment {
            span: path.span.merge(value.span()),
            path,
            value,
        })
    }

    fn parse_delete(&mut self) -> Result<DeleteStatement, ParseError> {
        let start = self.expect_token(Token::Delete)?.span;
        self.eat(&Token::From);
        let entity = self.parse_entity_name()?;
        let alias = self.parse_optional_alias()?;

        let where_clause = if self.eat(&Token::Where).is_some() {
            Some(self.parse_predicate()?)
        } else {
            None
        };

        Ok(DeleteStatement {
            entity,
            alias,
            where_clause,
            span: start.merge(self.previous_span()),
        })
    }

    // ------------------------------------------------------------------
    // Predicates
    // ------------------------------------------------------------------

    /// Parse a boolean condition (`or` binds loosest).
    pub fn parse_predicate(&mut self) -> Result<Predicate, ParseError> {
        self.parse_or_predicate()
    }

    fn parse_or_predicate(&mut self) -> Result<Predicate, ParseError> {
        let first = self.parse_and_predicate()?;
        if !self.check(&Token::Or) {
            return Ok(first);
        }

        let mut predicates = vec![first];
        while self.eat(&Token::Or).is_some() {
            predicates.push(self.parse_and_predicate()?);
        }
        Ok(junction(JunctionKind::Or, predicates))
    }

    fn parse_and_predicate(&mut self) -> Result<Predicate, ParseError> {
        let first = self.parse_not_predicate()?;
        if !self.check(&Token::And) {
            return Ok(first);
        }

        let mut predicates = vec![first];
        while self.eat(&Token::And).is_some() {
            predicates.push(self.parse_not_predicate()?);
        }
        Ok(junction(JunctionKind::And, predicates))
    }

    fn parse_not_predicate(&mut self) -> Result<Predicate, ParseError> {
        if let Some(not) = self.eat(&Token::Not) {
            let predicate = self.parse_not_predicate()?;
            return Ok(Predicate::Not {
                span: not.span.merge(predicate.span()),
                predicate: Box::new(predicate),
            });
        }
        self.parse_primary_predicate()
    }

    fn parse_primary_predicate(&mut self) -> Result<Predicate, ParseError> {
        if self.check(&Token::LParen) {
            let saved = self.pos;
            self.next_token()?;
            if let Ok(predicate) = self.parse_predicate() {
                if self.eat(&Token::RParen).is_some() {
                    return Ok(predicate);
                }
            }
            // Not a grouped predicate; reparse as an expression such as `(a + b) > 1`.
            self.pos = saved;
        }

        let lhs = self.parse_expression()?;
        let start = lhs.span();

        match self.peek() {
            Some(Token::Is) => {
                self.next_token()?;
                let negated = self.eat(&Token::Not).is_some();
                let tok = self.next_token()?;
                match tok.token {
                    Token::Null => Ok(Predicate::IsNull {
                        expression: lhs,
                        negated,
                        span: start.merge(tok.span),
                    }),
                    Token::Empty => {
                        let collection = expect_path_expression(lhs, "is empty")?;
                        Ok(Predicate::IsEmpty {
                            collection,
                            negated,
                            span: start.merge(tok.span),
                        })
                    }
                    other => Err(ParseError::new(
                        format!("expected 'null' or 'empty' after 'is', found {}", other),
                        tok.span,
                    )),
                }
            }
            Some(Token::Not) => {
                let not = self.next_token()?;
                match self.peek() {
                    Some(Token::Between)
                    | Some(Token::Like)
                    | Some(Token::In)
                    | Some(Token::Member) => self.parse_predicate_suffix(lhs, true),
                    _ => Err(ParseError::new(
                        "expected 'between', 'like', 'in' or 'member' after 'not'",
                        not.span,
                    )),
                }
            }
            Some(Token::Between) | Some(Token::Like) | Some(Token::In) | Some(Token::Member) => {
                self.parse_predicate_suffix(lhs, false)
            }
            Some(Token::Eq)
            | Some(Token::Ne)
            | Some(Token::Lt)
            | Some(Token::Le)
            | Some(Token::Gt)
            | Some(Token::Ge) => {
                let tok = self.next_token()?;
                let op = match tok.token {
                    Token::Eq => ComparisonOp::Eq,
                    Token::Ne => ComparisonOp::Ne,
                    Token::Lt => ComparisonOp::Lt,
                    Token::Le => ComparisonOp::Le,
                    Token::Gt => ComparisonOp::Gt,
                    _ => ComparisonOp::Ge,
                };
                if self.check(&Token::Eq) {
                    let eq = self.current_span();
                    return Err(ParseError::new("unexpected '='", eq)
                        .with_hint("use '=' for equality comparison"));
                }
                let rhs = self.parse_expression()?;
                Ok(Predicate::Comparison {
                    op,
                    span: start.merge(rhs.span()),
                    lhs,
                    rhs,
                })
            }
            _ => {
                let span = self.current_span();
                Err(ParseError::new(
                    match self.peek() {
                        Some(tok) => format!("expected a comparison operator, found {}", tok),
                        None => "expected a comparison operator, found end of input".to_string(),
                    },
                    span,
                ))
            }
        }
    }

    fn parse_predicate_suffix(
        &mut self,
        lhs: Expression,
        negated: bool,
    ) -> Result<Predicate, ParseError> {
        let start = lhs.span();
        let tok = self.next_token()?;
        match tok.token {
            Token::Between => {
                let low = self.parse_expression()?;
                self.expect_token(Token::And)?;
                let high = self.parse_expression()?;
                Ok(Predicate::Between {
                    span: start.merge(high.span()),
                    expression: lhs,
                    low,
                    high,
                    negated,
                })
            }
            Token::Like => {
                let pattern = self.parse_expression()?;
                let escape = if self.eat(&Token::Escape).is_some() {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                Ok(Predicate::Like {
                    span: start.merge(self.previous_span()),
                    expression: lhs,
                    pattern,
                    escape,
                    negated,
                })
            }
            Token::In => {
                self.expect_token(Token::LParen)?;
                let mut values = vec![self.parse_expression()?];
                while self.eat(&Token::Comma).is_some() {
                    values.push(self.parse_expression()?);
                }
                let end = self.expect_token(Token::RParen)?;
                Ok(Predicate::InList {
                    expression: lhs,
                    values,
                    negated,
                    span: start.merge(end.span),
                })
            }
            Token::Member => {
                self.eat(&Token::Of);
                let collection = self.parse_dotted_path()?;
                Ok(Predicate::MemberOf {
                    span: start.merge(collection.span),
                    element: lhs,
                    collection,
                    negated,
                })
            }
            other => Err(ParseError::new(
                format!("unexpected {} in predicate", other),
                tok.span,
            )),
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Parse a value expression (`+`/`-` bind loosest).
    pub fn parse_expression(&mut self) -> Result<Expression, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithmeticOp::Add,
                Some(Token::Minus) => ArithmeticOp::Subtract,
                _ => break,
            };
            self.next_token()?;
            let rhs = self.parse_multiplicative()?;
            lhs = Expression::Arithmetic {
                op,
                span: lhs.span().merge(rhs.span()),
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithmeticOp::Multiply,
                Some(Token::Slash) => ArithmeticOp::Divide,
                Some(Token::Percent) => ArithmeticOp::Modulo,
                _ => break,
            };
            self.next_token()?;
            let rhs = self.parse_unary()?;
            lhs = Expression::Arithmetic {
                op,
                span: lhs.span().merge(rhs.span()),
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expression, ParseError> {
        if let Some(minus) = self.eat(&Token::Minus) {
            let operand = self.parse_unary()?;
            let span = minus.span.merge(operand.span());
            return Ok(match operand {
                Expression::Literal(Spanned {
                    value: Literal::Integer(n),
                    ..
                }) => Expression::Literal(Spanned::new(Literal::Integer(-n), span)),
                Expression::Literal(Spanned {
                    value: Literal::Long(n),
                    ..
                }) => Expression::Literal(Spanned::new(narrow_integer(-n), span)),
                Expression::Literal(Spanned {
                    value: Literal::Decimal(n),
                    ..
                }) => Expression::Literal(Spanned::new(Literal::Decimal(-n), span)),
                other => Expression::Negate {
                    operand: Box::new(other),
                    span,
                },
            });
        }
        if self.eat(&Token::Plus).is_some() {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        let tok = self.next_token()?;
        let span = tok.span;
        let literal = |value: Literal| -> Result<Expression, ParseError> {
            Ok(Expression::Literal(Spanned::new(value, span)))
        };

        match tok.token {
            Token::IntegerLiteral(n) => literal(narrow_integer(n)),
            Token::LongLiteral(n) => literal(Literal::Long(n)),
            Token::DecimalLiteral(n) => literal(Literal::Decimal(n)),
            Token::StringLiteral(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => literal(Literal::Character(c)),
                    _ => literal(Literal::String(s)),
                }
            }
            Token::True => literal(Literal::Boolean(true)),
            Token::False => literal(Literal::Boolean(false)),
            Token::Null => literal(Literal::Null),
            Token::NamedParameter(name) => Ok(Expression::Parameter(Spanned::new(
                Parameter::Named(name),
                span,
            ))),
            Token::PositionalParameter(position) => Ok(Expression::Parameter(Spanned::new(
                Parameter::Positional(position),
                span,
            ))),
            Token::LParen => {
                let inner = self.parse_expression()?;
                self.expect_token(Token::RParen)?;
                Ok(inner)
            }
            Token::Case => self.parse_case(span),
            Token::Ident(name) => {
                if self.check(&Token::LParen) {
                    self.parse_function_call(Spanned::new(name, span))
                } else {
                    self.parse_path_from(Spanned::new(name, span))
                        .map(Expression::Path)
                }
            }
            other => Err(ParseError::new(
                format!("expected an expression, found {}", other),
                span,
            )),
        }
    }

    fn parse_case(&mut self, start: Span) -> Result<Expression, ParseError> {
        if self.check(&Token::When) {
            let mut branches = Vec::new();
            while self.eat(&Token::When).is_some() {
                let condition = self.parse_predicate()?;
                self.expect_token(Token::Then)?;
                let result = self.parse_expression()?;
                branches.push((condition, result));
            }
            let otherwise = self.parse_case_otherwise()?;
            let end = self.expect_token(Token::End)?;
            return Ok(Expression::SearchedCase {
                branches,
                otherwise,
                span: start.merge(end.span),
            });
        }

        let operand = self.parse_expression()?;
        let mut branches = Vec::new();
        while self.eat(&Token::When).is_some() {
            let value = self.parse_expression()?;
            self.expect_token(Token::Then)?;
            let result = self.parse_expression()?;
            branches.push((value, result));
        }
        if branches.is_empty() {
            return Err(ParseError::new(
                "case expression needs at least one 'when' branch",
                start.merge(self.previous_span()),
            ));
        }
        let otherwise = self.parse_case_otherwise()?;
        let end = self.expect_token(Token::End)?;
        Ok(Expression::SimpleCase {
            operand: Box::new(operand),
            branches,
            otherwise,
            span: start.merge(end.span),
        })
    }

    fn parse_case_otherwise(&mut self) -> Result<Option<Box<Expression>>, ParseError> {
        if self.eat(&Token::Else).is_some() {
            Ok(Some(Box::new(self.parse_expression()?)))
        } else {
            Ok(None)
        }
    }

    fn parse_function_call(&mut self, name: Spanned<String>) -> Result<Expression, ParseError> {
        self.expect_token(Token::LParen)?;

        if let Some(function) = AggregateFunction::from_name(&name.value) {
            let distinct = self.eat(&Token::Distinct).is_some();
            let argument = if let Some(star) = self.eat(&Token::Star) {
                if function != AggregateFunction::Count {
                    return Err(ParseError::new(
                        format!("'*' is only allowed in count(), not {}()", function.name()),
                        star.span,
                    ));
                }
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            };
            let end = self.expect_token(Token::RParen)?;
            return Ok(Expression::Aggregate {
                function,
                distinct,
                argument,
                span: name.span.merge(end.span),
            });
        }

        let mut arguments = Vec::new();
        if !self.check(&Token::RParen) {
            arguments.push(self.parse_expression()?);
            while self.eat(&Token::Comma).is_some() {
                arguments.push(self.parse_expression()?);
            }
        }
        let end = self.expect_token(Token::RParen)?;
        Ok(Expression::Function {
            span: name.span.merge(end.span),
            name,
            arguments,
        })
    }

    // ------------------------------------------------------------------
    // Names and paths
    // ------------------------------------------------------------------

    fn parse_dotted_path(&mut self) -> Result<DottedPath, ParseError> {
        let first = self.expect_ident()?;
        self.parse_path_from(first)
    }

    fn parse_path_from(&mut self, first: Spanned<String>) -> Result<DottedPath, ParseError> {
        let start = first.span;
        let mut segments = vec![first];
        while self.eat(&Token::Dot).is_some() {
            segments.push(self.expect_name()?);
        }
        Ok(DottedPath {
            span: start.merge(self.previous_span()),
            segments,
        })
    }

    /// Entity names may be qualified (`com.acme.Order`) and may collide with keywords.
    fn parse_entity_name(&mut self) -> Result<Spanned<String>, ParseError> {
        let first = self.expect_name()?;
        let mut span = first.span;
        let mut name = first.value;
        while self.eat(&Token::Dot).is_some() {
            let segment = self.expect_name()?;
            name.push('.');
            name.push_str(&segment.value);
            span = span.merge(segment.span);
        }
        Ok(Spanned::new(name, span))
    }

    fn parse_optional_alias(&mut self) -> Result<Option<Spanned<String>>, ParseError> {
        if self.eat(&Token::As).is_some() {
            return self.expect_ident().map(Some);
        }
        if let Some(Token::Ident(_)) = self.peek() {
            return self.expect_ident().map(Some);
        }
        Ok(None)
    }

    fn expect_ident(&mut self) -> Result<Spanned<String>, ParseError> {
        let tok = self.next_token()?;
        match tok.token {
            Token::Ident(name) => Ok(Spanned::new(name, tok.span)),
            other => Err(ParseError::new(
                format!("expected identifier, found {}", other),
                tok.span,
            )),
        }
    }

    /// An identifier, or a keyword used as a name (keeps the source spelling).
    fn expect_name(&mut self) -> Result<Spanned<String>, ParseError> {
        let tok = self.next_token()?;
        match tok.token {
            Token::Ident(name) => Ok(Spanned::new(name, tok.span)),
            ref keyword if keyword.keyword_text().is_some() => Ok(Spanned::new(
                tok.span.slice(self.source).to_string(),
                tok.span,
            )),
            other => Err(ParseError::new(
                format!("expected a name, found {}", other),
                tok.span,
            )),
        }
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek()
            .map(|t| std::mem::discriminant(t) == std::mem::discriminant(expected))
            .unwrap_or(false)
    }

    /// Consume the next token if it matches.
    fn eat(&mut self, expected: &Token) -> Option<SpannedToken> {
        if self.check(expected) {
            let tok = self.tokens[self.pos].clone();
            self.pos += 1;
            Some(tok)
        } else {
            None
        }
    }

    fn expect_token(&mut self, expected: Token) -> Result<SpannedToken, ParseError> {
        let tok = self.next_token()?;
        if std::mem::discriminant(&tok.token) == std::mem::discriminant(&expected) {
            Ok(tok)
        } else {
            Err(ParseError::new(
                format!("expected {}, found {}", expected, tok.token),
                tok.span,
            ))
        }
    }

    fn next_token(&mut self) -> Result<SpannedToken, ParseError> {
        match self.tokens.get(self.pos) {
            Some(tok) => {
                self.pos += 1;
                Ok(tok.clone())
            }
            None => Err(ParseError::new(
                "unexpected end of input",
                Span::new(self.source.len(), self.source.len()),
            )),
        }
    }

    fn current_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|t| t.span)
            .unwrap_or_else(|| Span::new(self.source.len(), self.source.len()))
    }

    fn previous_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|t| t.span)
            .unwrap_or_default()
    }
}

fn junction(kind: JunctionKind, predicates: Vec<Predicate>) -> Predicate {
    let span = predicates
        .iter()
        .map(Predicate::span)
        .reduce(Span::merge)
        .unwrap_or_default();
    Predicate::Junction {
        kind,
        predicates,
        span,
    }
}

fn narrow_integer(n: i64) -> Literal {
    match i32::try_from(n) {
        Ok(small) => Literal::Integer(small),
        Err(_) => Literal::Long(n),
    }
}

fn expect_path_expression(expression: Expression, context: &str) -> Result<DottedPath, ParseError> {
    match expression {
        Expression::Path(path) => Ok(path),
        other => Err(ParseError::new(
            format!("'{}' requires a collection path", context),
            other.span(),
        )),
    }
}

/// Parse a query string into a statement.
pub fn parse(source: &str) -> Result<Statement, ParseError> {
    Parser::new(source)?.parse_statement()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn select(source: &str) -> SelectStatement {
        match parse(source).unwrap() {
            Statement::Select(s) => s,
            other => panic!("expected select, got {:?}", other),
        }
    }

    fn path_text(expression: &Expression) -> String {
        match expression {
            Expression::Path(p) => p.text(),
            other => panic!("expected path, got {:?}", other),
        }
    }

    #[test]
    fn parse_basic_select() {
        let stmt = select("select o from Order o where o.amount > 100 order by o.orderNumber");

        let clause = stmt.select.as_ref().unwrap();
        assert_eq!(clause.items.len(), 1);
        assert_eq!(path_text(&clause.items[0].expression), "o");

        assert_eq!(stmt.from.roots.len(), 1);
        assert_eq!(stmt.from.roots[0].entity.value, "Order");
        assert_eq!(stmt.from.roots[0].alias.as_ref().unwrap().value, "o");

        match stmt.where_clause.unwrap() {
            Predicate::Comparison { op, lhs, rhs, .. } => {
                assert_eq!(op, ComparisonOp::Gt);
                assert_eq!(path_text(&lhs), "o.amount");
                assert!(matches!(
                    rhs,
                    Expression::Literal(Spanned {
                        value: Literal::Integer(100),
                        ..
                    })
                ));
            }
            other => panic!("expected comparison, got {:?}", other),
        }

        assert_eq!(stmt.order_by.len(), 1);
        assert_eq!(path_text(&stmt.order_by[0].expression), "o.orderNumber");
        assert_eq!(stmt.order_by[0].direction, SortDirection::Ascending);
    }

    #[test]
    fn parse_from_only_query() {
        let stmt = select("from Customer");
        assert!(stmt.select.is_none());
        assert!(stmt.from.roots[0].alias.is_none());
    }

    #[test]
    fn parse_joins() {
        let stmt = select(
            "select distinct o from Order o left outer join fetch o.lineItems li \
             join o.customer c on c.active = true",
        );
        assert!(stmt.select.unwrap().distinct);

        let joins = &stmt.from.roots[0].joins;
        assert_eq!(joins.len(), 2);
        assert_eq!(joins[0].join_type, JoinType::Left);
        assert!(joins[0].fetch);
        assert_eq!(joins[0].path.text(), "o.lineItems");
        assert_eq!(joins[0].alias.as_ref().unwrap().value, "li");

        assert_eq!(joins[1].join_type, JoinType::Inner);
        assert!(!joins[1].fetch);
        assert!(joins[1].condition.is_some());
    }

    #[test]
    fn join_needs_alias_qualified_path() {
        let err = parse("from Order o join lineItems").unwrap_err();
        assert!(err.message.contains("must navigate from an alias"));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let stmt = select("from Order o where o.a = 1 or o.b = 2 and o.c = 3");
        match stmt.where_clause.unwrap() {
            Predicate::Junction {
                kind: JunctionKind::Or,
                predicates,
                ..
            } => {
                assert_eq!(predicates.len(), 2);
                assert!(matches!(
                    predicates[1],
                    Predicate::Junction {
                        kind: JunctionKind::And,
                        ..
                    }
                ));
            }
            other => panic!("expected or-junction, got {:?}", other),
        }
    }

    #[test]
    fn grouped_predicate_vs_grouped_expression() {
        let stmt = select("from Order o where (o.a = 1 or o.b = 2) and (o.x + 1) > 3");
        match stmt.where_clause.unwrap() {
            Predicate::Junction { predicates, .. } => {
                assert!(matches!(predicates[0], Predicate::Junction { .. }));
                match &predicates[1] {
                    Predicate::Comparison { lhs, .. } => {
                        assert!(matches!(lhs, Expression::Arithmetic { .. }))
                    }
                    other => panic!("expected comparison, got {:?}", other),
                }
            }
            other => panic!("expected junction, got {:?}", other),
        }
    }

    #[test]
    fn parse_predicate_forms() {
        let stmt = select(
            "from Order o where o.amount between 10 and 20 \
             and o.note is not null \
             and o.code not like 'A%' escape '!' \
             and o.status in ('NEW', 'PAID') \
             and :item member of o.lineItems \
             and o.lineItems is not empty",
        );
        let predicates = match stmt.where_clause.unwrap() {
            Predicate::Junction { predicates, .. } => predicates,
            other => panic!("expected junction, got {:?}", other),
        };
        assert_eq!(predicates.len(), 6);
        assert!(matches!(predicates[0], Predicate::Between { negated: false, .. }));
        assert!(matches!(predicates[1], Predicate::IsNull { negated: true, .. }));
        assert!(matches!(
            predicates[2],
            Predicate::Like {
                negated: true,
                escape: Some(_),
                ..
            }
        ));
        assert!(matches!(&predicates[3], Predicate::InList { values, .. } if values.len() == 2));
        assert!(matches!(predicates[4], Predicate::MemberOf { negated: false, .. }));
        assert!(matches!(predicates[5], Predicate::IsEmpty { negated: true, .. }));
    }

    #[test]
    fn single_character_string_is_character_literal() {
        let stmt = select("from Order o where o.status = 'A' or o.status = 'AB'");
        let predicates = match stmt.where_clause.unwrap() {
            Predicate::Junction { predicates, .. } => predicates,
            other => panic!("expected junction, got {:?}", other),
        };
        let rhs = |p: &Predicate| match p {
            Predicate::Comparison { rhs, .. } => rhs.clone(),
            other => panic!("expected comparison, got {:?}", other),
        };
        assert!(matches!(
            rhs(&predicates[0]),
            Expression::Literal(Spanned {
                value: Literal::Character('A'),
                ..
            })
        ));
        assert!(matches!(
            rhs(&predicates[1]),
            Expression::Literal(Spanned {
                value: Literal::String(_),
                ..
            })
        ));
    }

    #[test]
    fn searched_case_keeps_branch_order() {
        let stmt = select(
            "select case when o.amount > 1000 then 'big' when o.amount > 100 then 'medium' \
             else 'small' end from Order o",
        );
        let item = &stmt.select.unwrap().items[0];
        match &item.expression {
            Expression::SearchedCase {
                branches,
                otherwise,
                ..
            } => {
                assert_eq!(branches.len(), 2);
                match &branches[0].1 {
                    Expression::Literal(Spanned {
                        value: Literal::String(s),
                        ..
                    }) => assert_eq!(s, "big"),
                    other => panic!("unexpected branch result {:?}", other),
                }
                assert!(otherwise.is_some());
            }
            other => panic!("expected searched case, got {:?}", other),
        }
    }

    #[test]
    fn simple_case_and_aggregates() {
        let stmt = select(
            "select c.name, count(distinct o), sum(o.amount), count(*), \
             case o.status when 'N' then 1 else 0 end \
             from Customer c join c.orders o group by c.name having count(o) > 1",
        );
        let items = stmt.select.unwrap().items;
        assert!(matches!(
            items[1].expression,
            Expression::Aggregate {
                function: AggregateFunction::Count,
                distinct: true,
                ..
            }
        ));
        assert!(matches!(
            items[3].expression,
            Expression::Aggregate { argument: None, .. }
        ));
        assert!(matches!(items[4].expression, Expression::SimpleCase { .. }));
        assert_eq!(stmt.group_by.len(), 1);
        assert!(stmt.having.is_some());
    }

    #[test]
    fn star_only_in_count() {
        let err = parse("select sum(*) from Order o").unwrap_err();
        assert!(err.message.contains("only allowed in count"));
    }

    #[test]
    fn arithmetic_precedence_and_negative_literals() {
        let stmt = select("select o.a + o.b * -2 from Order o");
        match &stmt.select.unwrap().items[0].expression {
            Expression::Arithmetic {
                op: ArithmeticOp::Add,
                rhs,
                ..
            } => match rhs.as_ref() {
                Expression::Arithmetic {
                    op: ArithmeticOp::Multiply,
                    rhs,
                    ..
                } => assert!(matches!(
                    rhs.as_ref(),
                    Expression::Literal(Spanned {
                        value: Literal::Integer(-2),
                        ..
                    })
                )),
                other => panic!("expected multiply, got {:?}", other),
            },
            other => panic!("expected add, got {:?}", other),
        }
    }

    #[test]
    fn keywords_as_attribute_names() {
        let stmt = select("select o.first, o.order from Order o order by o.last desc nulls last");
        let items = stmt.select.unwrap().items;
        assert_eq!(path_text(&items[0].expression), "o.first");
        assert_eq!(path_text(&items[1].expression), "o.order");
        assert_eq!(stmt.order_by[0].direction, SortDirection::Descending);
        assert_eq!(stmt.order_by[0].nulls, Some(NullPrecedence::Last));
    }

    #[test]
    fn parse_limit_offset_and_parameters() {
        let stmt = select("from Order o where o.customer = :customer limit ?1 offset 20");
        assert!(matches!(
            stmt.limit,
            Some(Expression::Parameter(Spanned {
                value: Parameter::Positional(1),
                ..
            }))
        ));
        assert!(stmt.offset.is_some());
    }

    #[test]
    fn parse_update() {
        match parse("update Order o set o.amount = o.amount * 2, o.status = 'X' where o.id = 1")
            .unwrap()
        {
            Statement::Update(update) => {
                assert_eq!(update.entity.value, "Order");
                assert_eq!(update.assignments.len(), 2);
                assert_eq!(update.assignments[0].path.text(), "o.amount");
                assert!(update.where_clause.is_some());
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn parse_delete_without_from() {
        match parse("delete Order where amount < 10").unwrap() {
            Statement::Delete(delete) => {
                assert_eq!(delete.entity.value, "Order");
                assert!(delete.alias.is_none());
                assert!(delete.where_clause.is_some());
            }
            other => panic!("expected delete, got {:?}", other),
        }
    }

    #[test]
    fn qualified_entity_name() {
        let stmt = select("from com.acme.Order o");
        assert_eq!(stmt.from.roots[0].entity.value, "com.acme.Order");
    }

    #[test]
    fn trailing_input_is_rejected() {
        let err = parse("from Order o where o.a = 1 )").unwrap_err();
        assert!(err.message.contains("after end of statement"));
    }

    #[test]
    fn double_equals_gets_hint() {
        let err = parse("from Order o where o.a == 1").unwrap_err();
        assert_eq!(err.hint.as_deref(), Some("use '=' for equality comparison"));
    }

    #[test]
    fn unexpected_end_of_input() {
        let err = parse("select o from").unwrap_err();
        assert!(err.message.contains("unexpected end of input"));
    }
}
