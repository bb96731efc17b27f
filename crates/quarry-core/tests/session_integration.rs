//! Integration tests for sessions: identity, lazy loading, flushing and the
//! second-level cache.

use quarry_core::config::FlushMode;
use quarry_core::{
    AttributeDescriptor, BasicType, EntityMapping, EntityRef, Error, Metamodel, Session,
    SessionFactory, SessionFactoryOptions, Value,
};
use std::rc::Rc;
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
        customer_id integer references customers(id)
    );
    insert into customers values (1, 'Ada');
    insert into orders values (10, 'A-001', 250.0, 1), (11, 'A-002', 75.0, 1);
";

fn factory_with(options: SessionFactoryOptions) -> Arc<SessionFactory> {
    let factory = SessionFactory::builder(sales_model())
        .options(options)
        .build()
        .unwrap();
    factory.execute_batch(SCHEMA).unwrap();
    factory
}

fn factory() -> Arc<SessionFactory> {
    factory_with(SessionFactoryOptions::default())
}

fn value(instance: &EntityRef, name: &str) -> Value {
    instance.borrow().get_value(name).unwrap()
}

fn count_orders(session: &mut Session) -> i64 {
    session
        .create_query("select count(o) from Order o")
        .unwrap()
        .single_result()
        .unwrap()
        .unwrap()
        .value(0)
        .and_then(Value::as_i64)
        .unwrap()
}

#[test]
fn find_returns_one_instance_per_identity() {
    let factory = factory();
    let mut session = factory.open_session().unwrap();
    let first = session.find("Order", 10i64).unwrap().unwrap();
    let second = session.find("Order", 10i64).unwrap().unwrap();
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(value(&first, "orderNumber"), Value::from("A-001"));
    assert!(session.find("Order", 99i64).unwrap().is_none());
}

#[test]
fn find_coerces_identifier_type() {
    let factory = factory();
    let mut session = factory.open_session().unwrap();
    let order = session.find("Order", 10i32).unwrap().unwrap();
    assert_eq!(value(&order, "amount"), Value::Float64(250.0));
}

#[test]
fn find_rejects_mistyped_identifier() {
    let factory = factory();
    let mut session = factory.open_session().unwrap();
    let result = session.find("Order", "ten");
    assert!(matches!(result, Err(Error::IllegalArgument(_))));
}

#[test]
fn eager_to_one_is_loaded() {
    let factory = factory();
    let mut session = factory.open_session().unwrap();
    let order = session.find("Order", 10i64).unwrap().unwrap();
    let customer = order.borrow().get_reference("customer").unwrap().unwrap();
    assert!(customer.borrow().is_initialized());
    assert_eq!(value(&customer, "name"), Value::from("Ada"));
}

#[test]
fn reference_is_loaded_on_initialize() {
    let factory = factory();
    let mut session = factory.open_session().unwrap();
    let customer = session.get_reference("Customer", 1i64).unwrap();
    assert!(!customer.borrow().is_initialized());

    session.initialize(&customer).unwrap();
    assert!(customer.borrow().is_initialized());
    assert_eq!(value(&customer, "name"), Value::from("Ada"));

    let found = session.find("Customer", 1i64).unwrap().unwrap();
    assert!(Rc::ptr_eq(&customer, &found));
}

#[test]
fn lazy_collection_is_initialized_on_demand() {
    let factory = factory();
    let mut session = factory.open_session().unwrap();
    let customer = session.find("Customer", 1i64).unwrap().unwrap();
    let orders = customer.borrow().get_collection("orders").unwrap();
    assert!(!orders.borrow().is_initialized());

    session.initialize_collection(&orders).unwrap();
    assert_eq!(orders.borrow().len().unwrap(), 2);

    let order = session.find("Order", 11i64).unwrap().unwrap();
    assert!(orders
        .borrow()
        .elements()
        .unwrap()
        .iter()
        .any(|e| Rc::ptr_eq(e, &order)));
}

#[test]
fn persist_and_commit_inserts_row() {
    let factory = factory();
    let mut session = factory.open_session().unwrap();
    session.begin_transaction().unwrap();
    let order = session.instantiate("Order").unwrap();
    {
        let mut order = order.borrow_mut();
        order.set_value("id", 12i64).unwrap();
        order.set_value("orderNumber", "A-003").unwrap();
        order.set_value("amount", 10.0).unwrap();
    }
    session.persist(&order).unwrap();
    assert!(session.contains(&order));
    session.commit().unwrap();

    let mut other = factory.open_session().unwrap();
    let loaded = other.find("Order", 12i64).unwrap().unwrap();
    assert_eq!(value(&loaded, "orderNumber"), Value::from("A-003"));
    assert_eq!(factory.statistics().snapshot().entity_inserts, 1);
}

#[test]
fn persist_requires_identifier() {
    let factory = factory();
    let mut session = factory.open_session().unwrap();
    let order = session.instantiate("Order").unwrap();
    assert!(matches!(
        session.persist(&order),
        Err(Error::IllegalArgument(_))
    ));
}

#[test]
fn dirty_state_is_flushed() {
    let factory = factory();
    let mut session = factory.open_session().unwrap();
    let order = session.find("Order", 11i64).unwrap().unwrap();
    assert!(!session.is_dirty().unwrap());

    order.borrow_mut().set_value("amount", 80.0).unwrap();
    assert!(session.is_dirty().unwrap());
    session.flush().unwrap();
    assert!(!session.is_dirty().unwrap());

    let mut other = factory.open_session().unwrap();
    let reloaded = other
        .create_query("select o.amount from Order o where o.id = 11")
        .unwrap()
        .single_result()
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.value(0), Some(&Value::Float64(80.0)));
    assert_eq!(factory.statistics().snapshot().entity_updates, 1);
}

#[test]
fn read_only_changes_are_not_written() {
    let factory = factory();
    let mut session = factory.open_session().unwrap();
    session.set_default_read_only(true);
    let order = session.find("Order", 11i64).unwrap().unwrap();
    assert!(session.is_read_only(&order).unwrap());
    order.borrow_mut().set_value("amount", 1.0).unwrap();
    assert!(!session.is_dirty().unwrap());
}

#[test]
fn removed_entity_is_deleted() {
    let factory = factory();
    let mut session = factory.open_session().unwrap();
    let order = session.find("Order", 11i64).unwrap().unwrap();
    session.remove(&order).unwrap();
    assert!(!session.contains(&order));
    assert!(session.find("Order", 11i64).unwrap().is_none());
    session.flush().unwrap();
    assert_eq!(count_orders(&mut session), 1);
}

#[test]
fn auto_flush_precedes_queries() {
    let factory = factory();
    let mut session = factory.open_session().unwrap();
    let order = session.instantiate("Order").unwrap();
    order.borrow_mut().set_value("id", 20i64).unwrap();
    session.persist(&order).unwrap();
    assert_eq!(count_orders(&mut session), 3);
}

#[test]
fn commit_mode_defers_writes() {
    let factory = factory_with(SessionFactoryOptions::default().with_flush_mode(FlushMode::Commit));
    let mut session = factory.open_session().unwrap();
    let order = session.instantiate("Order").unwrap();
    order.borrow_mut().set_value("id", 20i64).unwrap();
    session.persist(&order).unwrap();
    assert_eq!(count_orders(&mut session), 2);
    session.flush().unwrap();
    assert_eq!(count_orders(&mut session), 3);
}

#[test]
fn rollback_discards_changes() {
    let factory = factory();
    let mut session = factory.open_session().unwrap();
    session.begin_transaction().unwrap();
    let order = session.find("Order", 10i64).unwrap().unwrap();
    session.remove(&order).unwrap();
    session.flush().unwrap();
    session.rollback().unwrap();
    assert!(session.persistence_context().is_empty());
    assert_eq!(count_orders(&mut session), 2);
}

#[test]
fn second_level_cache_serves_other_sessions() {
    let factory = factory();
    {
        let mut session = factory.open_session().unwrap();
        session.find("Order", 10i64).unwrap().unwrap();
    }
    let mut session = factory.open_session().unwrap();
    let order = session.find("Order", 10i64).unwrap().unwrap();
    assert_eq!(value(&order, "amount"), Value::Float64(250.0));

    let (hits, misses, puts) = factory.statistics().region("Order").unwrap();
    assert_eq!((hits, misses, puts), (1, 1, 1));
}

#[test]
fn bulk_update_evicts_cached_state() {
    let factory = factory();
    {
        let mut session = factory.open_session().unwrap();
        session.find("Order", 10i64).unwrap().unwrap();
        session
            .create_query("update Order set amount = 1.0 where id = 10")
            .unwrap()
            .execute_update()
            .unwrap();
    }
    let mut session = factory.open_session().unwrap();
    let order = session.find("Order", 10i64).unwrap().unwrap();
    assert_eq!(value(&order, "amount"), Value::Float64(1.0));
}

#[test]
fn disabled_cache_is_bypassed() {
    let factory = factory_with(SessionFactoryOptions::default().with_second_level_cache(false));
    for _ in 0..2 {
        let mut session = factory.open_session().unwrap();
        session.find("Order", 10i64).unwrap().unwrap();
    }
    assert!(factory.statistics().region("Order").is_none());
    assert_eq!(factory.statistics().snapshot().entity_loads, 4);
}

#[test]
fn evict_detaches_instance() {
    let factory = factory();
    let mut session = factory.open_session().unwrap();
    let order = session.find("Order", 10i64).unwrap().unwrap();
    session.evict(&order).unwrap();
    assert!(!session.contains(&order));
    let again = session.find("Order", 10i64).unwrap().unwrap();
    assert!(!Rc::ptr_eq(&order, &again));
}
