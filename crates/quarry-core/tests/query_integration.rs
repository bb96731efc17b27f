//! Integration tests for query interpretation, translation and execution.

use quarry_core::lang::ComparisonOp;
use quarry_core::sql::{Predicate, SqmToSqlConverter, Statement};
use quarry_core::sqm::{interpret, FunctionRegistry};
use quarry_core::{
    AttributeDescriptor, BasicType, EntityMapping, Error, Metamodel, Session, SessionFactory,
    Value,
};
use std::sync::Arc;

fn sales_model() -> Metamodel {
    Metamodel::builder()
        .entity(
            EntityMapping::new("Customer", "customers")
                .with_id("id", "id", BasicType::Long)
                .with_attribute(AttributeDescriptor::basic("name", "name", BasicType::String))
                .with_attribute(AttributeDescriptor::to_many("orders", "Order", "customer_id")),
        )
        .entity(
            EntityMapping::new("Order", "orders")
                .with_id("id", "id", BasicType::Long)
                .with_attribute(AttributeDescriptor::basic(
                    "orderNumber",
                    "order_number",
                    BasicType::String,
                ))
                .with_attribute(AttributeDescriptor::basic("amount", "amount", BasicType::Double))
                .with_attribute(AttributeDescriptor::basic("status", "status", BasicType::String))
                .with_attribute(AttributeDescriptor::to_one("customer", "Customer", "customer_id"))
                .cacheable(),
        )
        .build()
        .unwrap()
}

const SCHEMA: &str = "
    create table customers (id integer primary key, name text);
    create table orders (
        id integer primary key,
        order_number text,
        amount real,
        status text,
        customer_id integer references customers(id)
    );
    insert into customers values (1, 'Ada'), (2, 'Grace');
    insert into orders values
        (10, 'A-003', 250.0, 'open', 1),
        (11, 'A-001', 120.5, 'shipped', 1),
        (12, 'A-002', 80.0, 'open', 2),
        (13, 'A-004', 99.0, 'open', 2);
";

struct TestContext {
    factory: Arc<SessionFactory>,
}

impl TestContext {
    fn new() -> Self {
        let factory = SessionFactory::builder(sales_model()).build().unwrap();
        factory.execute_batch(SCHEMA).unwrap();
        Self { factory }
    }

    fn session(&self) -> Session {
        self.factory.open_session().unwrap()
    }
}

fn order_numbers(session: &mut Session, query: &str) -> Vec<String> {
    session
        .create_query(query)
        .unwrap()
        .list()
        .unwrap()
        .iter()
        .map(|t| {
            t.entity(0)
                .unwrap()
                .borrow()
                .get_value("orderNumber")
                .unwrap()
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect()
}

#[test]
fn filtered_query_translates_to_single_table_group() {
    let metamodel = sales_model();
    let functions = FunctionRegistry::standard();
    let sqm = interpret(
        &metamodel,
        &functions,
        "select o from Order o where o.amount > 100 order by o.orderNumber",
    )
    .unwrap();
    let statement = SqmToSqlConverter::new(&metamodel, &functions)
        .convert(&sqm)
        .unwrap();
    let Statement::Select(select) = statement else {
        panic!("expected a select");
    };

    assert_eq!(select.table_groups.len(), 1);
    assert_eq!(select.join_count(), 0);
    assert!(matches!(
        select.query_spec.where_clause,
        Some(Predicate::Comparison {
            op: ComparisonOp::Gt,
            ..
        })
    ));
    assert_eq!(select.query_spec.order_by.len(), 1);
}

#[test]
fn filtered_query_returns_ordered_entities() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let numbers = order_numbers(
        &mut session,
        "select o from Order o where o.amount > 100 order by o.orderNumber",
    );
    assert_eq!(numbers, vec!["A-001", "A-003"]);
}

#[test]
fn repeated_queries_share_instances() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let first = session
        .create_query("select o from Order o where o.id = 10")
        .unwrap()
        .single_result()
        .unwrap()
        .unwrap();
    let second = session
        .create_query("select o from Order o where o.status = 'open' order by o.amount desc")
        .unwrap()
        .list()
        .unwrap();
    assert!(std::rc::Rc::ptr_eq(
        first.entity(0).unwrap(),
        second[0].entity(0).unwrap()
    ));
}

#[test]
fn named_parameters_are_bound() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let rows = session
        .create_query("select o.orderNumber, o.amount from Order o where o.status = :status order by o.amount")
        .unwrap()
        .set_parameter("status", "open")
        .list()
        .unwrap();
    let values: Vec<(Value, Value)> = rows
        .iter()
        .map(|t| (t.value(0).unwrap().clone(), t.value(1).unwrap().clone()))
        .collect();
    assert_eq!(
        values,
        vec![
            (Value::from("A-002"), Value::Float64(80.0)),
            (Value::from("A-004"), Value::Float64(99.0)),
            (Value::from("A-003"), Value::Float64(250.0)),
        ]
    );
}

#[test]
fn missing_parameter_is_reported() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let result = session
        .create_query("select o from Order o where o.status = :status")
        .unwrap()
        .list();
    assert!(matches!(result, Err(Error::Parameter(_))));
}

#[test]
fn aggregate_projection() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let tuple = session
        .create_query("select count(o) from Order o where o.status = 'open'")
        .unwrap()
        .single_result()
        .unwrap()
        .unwrap();
    assert_eq!(tuple.value(0), Some(&Value::Int64(3)));
}

#[test]
fn subtracting_a_negative_literal() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let tuple = session
        .create_query("select o.amount - -5 from Order o where o.id = 10")
        .unwrap()
        .single_result()
        .unwrap()
        .unwrap();
    assert_eq!(tuple.value(0), Some(&Value::Float64(255.0)));
}

#[test]
fn first_matching_case_branch_wins() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let tuple = session
        .create_query(
            "select case when o.amount > 5 then 'first' when o.amount > 100 then 'second' end \
             from Order o where o.id = 10",
        )
        .unwrap()
        .single_result()
        .unwrap()
        .unwrap();
    assert_eq!(tuple.value(0), Some(&Value::from("first")));
}

#[test]
fn implicit_join_through_to_one() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let numbers = order_numbers(
        &mut session,
        "select o from Order o where o.customer.name = 'Grace' order by o.orderNumber",
    );
    assert_eq!(numbers, vec!["A-002", "A-004"]);
}

#[test]
fn paging_is_applied() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let rows = session
        .create_query("select o.orderNumber from Order o order by o.orderNumber")
        .unwrap()
        .set_first_result(1)
        .set_max_results(2)
        .list()
        .unwrap();
    let numbers: Vec<&Value> = rows.iter().map(|t| t.value(0).unwrap()).collect();
    assert_eq!(numbers, vec![&Value::from("A-002"), &Value::from("A-003")]);
}

#[test]
fn single_result_rejects_many_rows() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let result = session
        .create_query("select o from Order o")
        .unwrap()
        .single_result();
    assert!(matches!(result, Err(Error::NonUniqueResult(4))));
}

#[test]
fn bulk_update_changes_rows() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let count = session
        .create_query("update Order set status = 'closed' where amount < :limit")
        .unwrap()
        .set_parameter("limit", 100.0)
        .execute_update()
        .unwrap();
    assert_eq!(count, 2);

    let closed = session
        .create_query("select count(o) from Order o where o.status = 'closed'")
        .unwrap()
        .single_result()
        .unwrap()
        .unwrap();
    assert_eq!(closed.value(0), Some(&Value::Int64(2)));
}

#[test]
fn select_rejected_by_execute_update() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    let result = session
        .create_query("select o from Order o")
        .unwrap()
        .execute_update();
    assert!(matches!(result, Err(Error::IllegalState(_))));
}

#[test]
fn unknown_entity_is_a_semantic_error() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    assert!(session.create_query("select x from Invoice x").is_err());
}

#[test]
fn query_executions_are_counted() {
    let ctx = TestContext::new();
    let mut session = ctx.session();
    order_numbers(&mut session, "select o from Order o");
    order_numbers(&mut session, "select o from Order o");
    let snapshot = ctx.factory.statistics().snapshot();
    assert_eq!(snapshot.query_executions, 2);
    assert_eq!(snapshot.interpretation_hits, 1);
}
