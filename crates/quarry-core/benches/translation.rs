//! Query interpretation and translation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use quarry_core::sql::{render, SqmToSqlConverter};
use quarry_core::sqm::{interpret, FunctionRegistry};
use quarry_core::{AttributeDescriptor, BasicType, EntityMapping, Metamodel, SessionFactory};

const QUERIES: &[(&str, &str)] = &[
    ("simple", "select o from Order o"),
    (
        "filtered",
        "select o from Order o where o.amount > 100 order by o.orderNumber",
    ),
    (
        "implicit_join",
        "select o.orderNumber from Order o where o.customer.name = :name",
    ),
    (
        "fetch_join",
        "select c from Customer c join fetch c.orders o where o.amount between 10 and 20",
    ),
    (
        "aggregate",
        "select o.customer.name, count(o), sum(o.amount) from Order o group by o.customer.name",
    ),
];

fn model() -> Metamodel {
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
                .with_attribute(AttributeDescriptor::to_one("customer", "Customer", "customer_id")),
        )
        .build()
        .unwrap()
}

fn bench_interpret(c: &mut Criterion) {
    let mut group = c.benchmark_group("translation/interpret");
    let metamodel = model();
    let functions = FunctionRegistry::standard();

    for (name, query) in QUERIES {
        group.bench_with_input(BenchmarkId::from_parameter(name), query, |b, query| {
            b.iter(|| black_box(interpret(&metamodel, &functions, query).unwrap()));
        });
    }

    group.finish();
}

fn bench_convert_and_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("translation/convert");
    let metamodel = model();
    let functions = FunctionRegistry::standard();

    for (name, query) in QUERIES {
        let sqm = interpret(&metamodel, &functions, query).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(name), &sqm, |b, sqm| {
            b.iter(|| {
                let statement = SqmToSqlConverter::new(&metamodel, &functions)
                    .convert(sqm)
                    .unwrap();
                black_box(render(&statement))
            });
        });
    }

    group.finish();
}

fn bench_cached_translate(c: &mut Criterion) {
    let factory = SessionFactory::builder(model()).build().unwrap();

    c.bench_function("translation/cached", |b| {
        b.iter(|| black_box(factory.translate(QUERIES[1].1).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_interpret,
    bench_convert_and_render,
    bench_cached_translate,
);

criterion_main!(benches);
