//! SQL text rendering for SQLite.
//!
//! Numeric and boolean literals are inlined; every other literal and every
//! query parameter becomes a `?` placeholder with a [`ParameterBinder`] in
//! placeholder order.

use super::ast::*;
use crate::metamodel::BasicType;
use crate::sqm::SqlRendering;
use crate::value::Value;
use quarry_lang::{ArithmeticOp, ComparisonOp, JunctionKind, NullPrecedence, Parameter, SortDirection};
use std::collections::BTreeSet;
use std::fmt::Write;

/// Source of the value bound to one placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterBinder {
    Literal(Value),
    Query {
        parameter: Parameter,
        ty: Option<BasicType>,
    },
}

/// Rendered SQL ready to be prepared.
#[derive(Debug, Clone, PartialEq)]
pub struct JdbcOperation {
    pub sql: String,
    pub parameter_binders: Vec<ParameterBinder>,
    pub affected_tables: BTreeSet<String>,
}

pub fn render(statement: &Statement) -> JdbcOperation {
    let mut renderer = SqlRenderer::default();
    match statement {
        Statement::Select(s) => renderer.select(s),
        Statement::Update(u) => renderer.update(u),
        Statement::Delete(d) => renderer.delete(d),
        Statement::Insert(i) => renderer.insert(i),
    }
    renderer.finish(statement.affected_tables())
}

pub fn render_select(statement: &SelectStatement) -> JdbcOperation {
    let mut renderer = SqlRenderer::default();
    renderer.select(statement);
    renderer.finish(statement.affected_tables.clone())
}

#[derive(Default)]
struct SqlRenderer {
    sql: String,
    binders: Vec<ParameterBinder>,
}

impl SqlRenderer {
    fn finish(self, affected_tables: BTreeSet<String>) -> JdbcOperation {
        JdbcOperation {
            sql: self.sql,
            parameter_binders: self.binders,
            affected_tables,
        }
    }

    fn push(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    fn placeholder(&mut self, binder: ParameterBinder) {
        self.binders.push(binder);
        self.sql.push('?');
    }

    fn select(&mut self, statement: &SelectStatement) {
        let spec = &statement.query_spec;
        self.push("select ");
        if spec.distinct {
            self.push("distinct ");
        }
        if spec.selections.is_empty() {
            self.push("1");
        }
        for (i, selection) in spec.selections.iter().enumerate() {
            if i > 0 {
                self.push(",");
            }
            self.expression(&selection.expression);
        }
        self.push(" from ");
        for (i, root) in spec.roots.iter().enumerate() {
            if i > 0 {
                self.push(",");
            }
            self.table_group(statement, *root);
        }
        if let Some(predicate) = &spec.where_clause {
            self.push(" where ");
            self.predicate(predicate);
        }
        if !spec.group_by.is_empty() {
            self.push(" group by ");
            self.expression_list(&spec.group_by);
        }
        if let Some(having) = &spec.having {
            self.push(" having ");
            self.predicate(having);
        }
        if !spec.order_by.is_empty() {
            self.push(" order by ");
            for (i, sort) in spec.order_by.iter().enumerate() {
                if i > 0 {
                    self.push(",");
                }
                self.expression(&sort.expression);
                if sort.direction == SortDirection::Descending {
                    self.push(" desc");
                }
                match sort.nulls {
                    Some(NullPrecedence::First) => self.push(" nulls first"),
                    Some(NullPrecedence::Last) => self.push(" nulls last"),
                    None => {}
                }
            }
        }
        match (&spec.limit, &spec.offset) {
            (Some(limit), offset) => {
                self.push(" limit ");
                self.expression(limit);
                if let Some(offset) = offset {
                    self.push(" offset ");
                    self.expression(offset);
                }
            }
            // SQLite has no offset without limit.
            (None, Some(offset)) => {
                self.push(" limit -1 offset ");
                self.expression(offset);
            }
            (None, None) => {}
        }
    }

    fn table_group(&mut self, statement: &SelectStatement, id: TableGroupId) {
        let group = statement.table_group(id);
        self.table_reference(&group.primary_table);
        self.group_joins(statement, group);
    }

    /// Secondary tables then joined groups, flattened into one join list.
    fn group_joins(&mut self, statement: &SelectStatement, group: &TableGroup) {
        for join in &group.table_reference_joins {
            let _ = write!(self.sql, " {} ", join.join_type.sql());
            self.table_reference(&join.reference);
            self.push(" on ");
            self.predicate(&join.predicate);
        }
        for join in &group.table_group_joins {
            let joined = statement.table_group(join.group);
            let _ = write!(self.sql, " {} ", join.join_type.sql());
            self.table_reference(&joined.primary_table);
            self.push(" on ");
            self.predicate(&join.predicate);
            self.group_joins(statement, joined);
        }
    }

    fn table_reference(&mut self, reference: &TableReference) {
        self.push(&reference.table_name);
        if reference.identification_variable != reference.table_name {
            self.push(" ");
            self.push(&reference.identification_variable);
        }
    }

    fn update(&mut self, statement: &UpdateStatement) {
        let _ = write!(self.sql, "update {} set ", statement.target.table_name);
        for (i, assignment) in statement.assignments.iter().enumerate() {
            if i > 0 {
                self.push(",");
            }
            self.push(&assignment.column.column);
            self.push("=");
            self.expression(&assignment.value);
        }
        if let Some(restriction) = &statement.restriction {
            self.push(" where ");
            self.predicate(restriction);
        }
    }

    fn delete(&mut self, statement: &DeleteStatement) {
        let _ = write!(self.sql, "delete from {}", statement.target.table_name);
        if let Some(restriction) = &statement.restriction {
            self.push(" where ");
            self.predicate(restriction);
        }
    }

    fn insert(&mut self, statement: &InsertStatement) {
        let _ = write!(self.sql, "insert into {} (", statement.target.table_name);
        for (i, column) in statement.columns.iter().enumerate() {
            if i > 0 {
                self.push(",");
            }
            self.push(column);
        }
        self.push(") values (");
        self.expression_list(&statement.values);
        self.push(")");
    }

    fn expression_list(&mut self, expressions: &[Expression]) {
        for (i, expression) in expressions.iter().enumerate() {
            if i > 0 {
                self.push(",");
            }
            self.expression(expression);
        }
    }

    fn column(&mut self, column: &ColumnReference) {
        self.push(&column.qualifier);
        self.push(".");
        self.push(&column.column);
    }

    fn literal(&mut self, value: &Value) {
        match value {
            Value::Null => self.push("null"),
            Value::Bool(b) => self.push(if *b { "1" } else { "0" }),
            Value::Int32(i) => {
                let _ = write!(self.sql, "{}", i);
            }
            Value::Int64(i) => {
                let _ = write!(self.sql, "{}", i);
            }
            Value::Float64(f) if f.is_finite() => {
                let _ = write!(self.sql, "{:?}", f);
            }
            other => self.placeholder(ParameterBinder::Literal(other.clone())),
        }
    }

    fn expression(&mut self, expression: &Expression) {
        match expression {
            Expression::Column(column) => self.column(column),
            Expression::Literal { value, .. } => self.literal(value),
            Expression::Parameter { parameter, ty } => self.placeholder(ParameterBinder::Query {
                parameter: parameter.clone(),
                ty: *ty,
            }),
            Expression::Binary { op, lhs, rhs } => {
                self.push("(");
                self.expression(lhs);
                self.push(arithmetic_operator(*op));
                self.expression(rhs);
                self.push(")");
            }
            Expression::Negated(operand) => {
                self.push("-(");
                self.expression(operand);
                self.push(")");
            }
            Expression::Function {
                rendering,
                arguments,
            } => match rendering {
                SqlRendering::Call(name) => {
                    self.push(name);
                    self.push("(");
                    self.expression_list(arguments);
                    self.push(")");
                }
                SqlRendering::Infix(operator) => {
                    self.push("(");
                    for (i, argument) in arguments.iter().enumerate() {
                        if i > 0 {
                            let _ = write!(self.sql, " {} ", operator);
                        }
                        self.expression(argument);
                    }
                    self.push(")");
                }
                SqlRendering::SwappedCall(name) => {
                    self.push(name);
                    self.push("(");
                    let swapped: Vec<Expression> = match arguments.as_slice() {
                        [a, b, rest @ ..] => {
                            let mut v = vec![b.clone(), a.clone()];
                            v.extend(rest.iter().cloned());
                            v
                        }
                        _ => arguments.clone(),
                    };
                    self.expression_list(&swapped);
                    self.push(")");
                }
            },
            Expression::Aggregate {
                function,
                distinct,
                argument,
            } => {
                self.push(function.name());
                self.push("(");
                match argument {
                    Some(argument) => {
                        if *distinct {
                            self.push("distinct ");
                        }
                        self.expression(argument);
                    }
                    None => self.push("*"),
                }
                self.push(")");
            }
            Expression::Tuple(elements) => {
                self.push("(");
                self.expression_list(elements);
                self.push(")");
            }
            Expression::SearchedCase {
                branches,
                otherwise,
            } => {
                self.push("case");
                for (when, then) in branches {
                    self.push(" when ");
                    self.predicate(when);
                    self.push(" then ");
                    self.expression(then);
                }
                if let Some(otherwise) = otherwise {
                    self.push(" else ");
                    self.expression(otherwise);
                }
                self.push(" end");
            }
            Expression::SimpleCase {
                operand,
                branches,
                otherwise,
            } => {
                self.push("case ");
                self.expression(operand);
                for (when, then) in branches {
                    self.push(" when ");
                    self.expression(when);
                    self.push(" then ");
                    self.expression(then);
                }
                if let Some(otherwise) = otherwise {
                    self.push(" else ");
                    self.expression(otherwise);
                }
                self.push(" end");
            }
        }
    }

    fn predicate(&mut self, predicate: &Predicate) {
        match predicate {
            Predicate::Comparison { op, lhs, rhs } => {
                self.expression(lhs);
                self.push(comparison_operator(*op));
                self.expression(rhs);
            }
            Predicate::Junction { kind, predicates } => {
                if predicates.is_empty() {
                    self.push(match kind {
                        JunctionKind::And => "1=1",
                        JunctionKind::Or => "1=0",
                    });
                    return;
                }
                let separator = match kind {
                    JunctionKind::And => " and ",
                    JunctionKind::Or => " or ",
                };
                self.push("(");
                for (i, p) in predicates.iter().enumerate() {
                    if i > 0 {
                        self.push(separator);
                    }
                    self.predicate(p);
                }
                self.push(")");
            }
            Predicate::Negated(inner) => {
                self.push("not (");
                self.predicate(inner);
                self.push(")");
            }
            Predicate::Between {
                expression,
                low,
                high,
                negated,
            } => {
                self.expression(expression);
                self.push(if *negated { " not between " } else { " between " });
                self.expression(low);
                self.push(" and ");
                self.expression(high);
            }
            Predicate::IsNull {
                expression,
                negated,
            } => {
                self.expression(expression);
                self.push(if *negated { " is not null" } else { " is null" });
            }
            Predicate::Like {
                expression,
                pattern,
                escape,
                negated,
            } => {
                self.expression(expression);
                self.push(if *negated { " not like " } else { " like " });
                self.expression(pattern);
                if let Some(escape) = escape {
                    self.push(" escape ");
                    self.expression(escape);
                }
            }
            Predicate::InList {
                expression,
                values,
                negated,
            } => {
                if values.is_empty() {
                    self.push(if *negated { "1=1" } else { "1=0" });
                    return;
                }
                self.expression(expression);
                self.push(if *negated { " not in (" } else { " in (" });
                self.expression_list(values);
                self.push(")");
            }
            Predicate::InSubQuery {
                expression,
                subquery,
                negated,
            } => {
                self.expression(expression);
                self.push(if *negated { " not in (" } else { " in (" });
                self.subquery(subquery);
                self.push(")");
            }
            Predicate::Exists { subquery, negated } => {
                self.push(if *negated { "not exists(" } else { "exists(" });
                self.subquery(subquery);
                self.push(")");
            }
        }
    }

    fn subquery(&mut self, subquery: &SubQuery) {
        self.push("select ");
        if subquery.selection.is_empty() {
            self.push("1");
        } else {
            self.expression_list(&subquery.selection);
        }
        self.push(" from ");
        self.table_reference(&subquery.table);
        self.push(" where ");
        self.predicate(&subquery.restriction);
    }
}

fn arithmetic_operator(op: ArithmeticOp) -> &'static str {
    match op {
        ArithmeticOp::Add => " + ",
        ArithmeticOp::Subtract => " - ",
        ArithmeticOp::Multiply => " * ",
        ArithmeticOp::Divide => " / ",
        ArithmeticOp::Modulo => " % ",
    }
}

fn comparison_operator(op: ComparisonOp) -> &'static str {
    match op {
        ComparisonOp::Eq => "=",
        ComparisonOp::Ne => "<>",
        ComparisonOp::Lt => "<",
        ComparisonOp::Le => "<=",
        ComparisonOp::Gt => ">",
        ComparisonOp::Ge => ">=",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::sql::SqmToSqlConverter;
    use crate::sqm::{interpret, FunctionRegistry};
    use crate::testing::shop;
    use pretty_assertions::assert_eq;

    fn sql(query: &str) -> Result<JdbcOperation, Error> {
        let metamodel = shop();
        let functions = FunctionRegistry::standard();
        let sqm = interpret(&metamodel, &functions, query)?;
        let statement = SqmToSqlConverter::new(&metamodel, &functions).convert(&sqm)?;
        Ok(render(&statement))
    }

    #[test]
    fn basic_select() {
        let op = sql("select o.status from Order o where o.total > 100 and o.status = :s").unwrap();
        assert_eq!(
            op.sql,
            "select o1_0.status from orders o1_0 where (o1_0.total>100.0 and o1_0.status=?)"
        );
        assert_eq!(
            op.parameter_binders,
            vec![ParameterBinder::Query {
                parameter: Parameter::Named("s".into()),
                ty: Some(BasicType::String)
            }]
        );
    }

    #[test]
    fn string_literals_are_bound() {
        let op = sql("select o.id from Order o where o.status = 'open'").unwrap();
        assert_eq!(op.sql, "select o1_0.id from orders o1_0 where o1_0.status=?");
        assert_eq!(
            op.parameter_binders,
            vec![ParameterBinder::Literal(Value::String("open".into()))]
        );
    }

    #[test]
    fn implicit_join() {
        let op = sql("select o.id from Order o where o.customer.name = :n").unwrap();
        assert_eq!(
            op.sql,
            "select o1_0.id from orders o1_0 join customers c2_0 on o1_0.customer_id=c2_0.id \
             left join customer_details c2_1 on c2_0.id=c2_1.customer_id where c2_0.name=?"
        );
        assert_eq!(
            op.affected_tables.iter().collect::<Vec<_>>(),
            vec!["customer_details", "customers", "orders"]
        );
    }

    #[test]
    fn order_limit_offset() {
        let op = sql("select o.id from Order o order by o.total desc nulls last offset 5").unwrap();
        assert_eq!(
            op.sql,
            "select o1_0.id from orders o1_0 order by o1_0.total desc nulls last limit -1 offset 5"
        );
    }

    #[test]
    fn is_empty_renders_not_exists() {
        let op = sql("select c.id from Customer c where c.orders is empty").unwrap();
        assert!(op
            .sql
            .ends_with("where not exists(select 1 from orders o2_0 where o2_0.customer_id=c1_0.id)"));
    }

    #[test]
    fn dml() {
        let op = sql("update Order set status = 'X', priority = priority + 1 where id = :id").unwrap();
        assert_eq!(
            op.sql,
            "update orders set status=?,priority=(orders.priority + 1) where orders.id=?"
        );
        assert_eq!(op.parameter_binders.len(), 2);

        let op = sql("delete from Dog d").unwrap();
        assert_eq!(op.sql, "delete from animals where animals.DTYPE in (?)");
    }
    #[test]
    fn subtracting_negatives_keeps_operators_apart() {
        let op = sql("select o.total - -5 from Order o").unwrap();
        assert!(!op.sql.contains("--"), "{}", op.sql);
        assert!(op.sql.contains("o1_0.total - -5"), "{}", op.sql);

        let op = sql("select o.total - -o.priority from Order o").unwrap();
        assert!(!op.sql.contains("--"), "{}", op.sql);
        assert!(op.sql.contains("o1_0.total - -"), "{}", op.sql);
    }

    #[test]
    fn searched_case_keeps_branch_order() {
        let op = sql(
            "select case when o.total > 5 then 'first' when o.total > 100 then 'second' end from Order o",
        )
        .unwrap();
        assert_eq!(
            op.sql,
            "select case when o1_0.total>5.0 then ? when o1_0.total>100.0 then ? end from orders o1_0"
        );
        assert_eq!(
            op.parameter_binders,
            vec![
                ParameterBinder::Literal(Value::from("first")),
                ParameterBinder::Literal(Value::from("second")),
            ]
        );
    }

    #[test]
    fn count_of_composite_identifier_counts_first_column() {
        let op = sql("select count(l) from LineItem l").unwrap();
        assert_eq!(op.sql, "select count(l1_0.order_id) from line_items l1_0");

        let op = sql("select count(l) from Order o left join o.lineItems l").unwrap();
        assert!(op.sql.starts_with("select count(l2_0.order_id) from orders o1_0 left join"));
    }

    #[test]
    fn count_distinct_composite_is_not_yet_implemented() {
        let result = sql("select count(distinct l) from LineItem l");
        assert!(matches!(result, Err(Error::NotYetImplemented(_))));
    }

    #[test]
    fn insert_lists_bare_columns() {
        let statement = Statement::Insert(InsertStatement {
            target: TableReference::new("orders", "orders"),
            columns: vec!["id".to_string(), "status".to_string()],
            values: vec![Expression::literal(7i64), Expression::literal("open")],
        });
        let op = render(&statement);
        assert_eq!(op.sql, "insert into orders (id,status) values (7,?)");
        assert_eq!(op.affected_tables.iter().collect::<Vec<_>>(), vec!["orders"]);
    }
}
