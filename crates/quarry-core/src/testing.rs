//! Shared fixtures for unit tests.

use crate::metamodel::{
    AttributeDescriptor, BasicType, EmbeddableMapping, EntityMapping, FetchStrategy, Metamodel,
};

/// A small shop model covering every mapping shape:
///
/// - `Customer`: embedded `address`, a secondary table, `orders` collection
/// - `Order`: lazy to-one `customer`, `lineItems` collection, cacheable
/// - `LineItem`: composite identifier
/// - `Animal` / `Dog` / `Cat`: single-table hierarchy on `DTYPE`
pub(crate) fn shop() -> Metamodel {
    Metamodel::builder()
        .embeddable(
            EmbeddableMapping::new("Address")
                .with_attribute(AttributeDescriptor::basic("city", "city", BasicType::String))
                .with_attribute(AttributeDescriptor::basic("zip", "zip", BasicType::String)),
        )
        .entity(
            EntityMapping::new("Customer", "customers")
                .with_type_name("shop::Customer")
                .with_id("id", "id", BasicType::Long)
                .with_secondary_table("customer_details", "customer_id")
                .with_attribute(AttributeDescriptor::basic("name", "name", BasicType::String))
                .with_attribute(
                    AttributeDescriptor::embedded("address", "Address").with_column_prefix("addr_"),
                )
                .with_attribute(
                    AttributeDescriptor::basic("notes", "notes", BasicType::String)
                        .on_table("customer_details"),
                )
                .with_attribute(AttributeDescriptor::to_many("orders", "Order", "customer_id"))
                .cacheable(),
        )
        .entity(
            EntityMapping::new("Order", "orders")
                .with_type_name("shop::Order")
                .with_id("id", "id", BasicType::Long)
                .with_attribute(AttributeDescriptor::basic("total", "total", BasicType::Double))
                .with_attribute(AttributeDescriptor::basic("status", "status", BasicType::String))
                .with_attribute(AttributeDescriptor::basic("priority", "priority", BasicType::Integer))
                .with_attribute(
                    AttributeDescriptor::to_one("customer", "Customer", "customer_id")
                        .with_fetch(FetchStrategy::Lazy),
                )
                .with_attribute(AttributeDescriptor::to_many("lineItems", "LineItem", "order_id"))
                .cacheable(),
        )
        .entity(
            EntityMapping::new("LineItem", "line_items")
                .with_composite_id(vec![
                    ("orderId", "order_id", BasicType::Long),
                    ("lineNo", "line_no", BasicType::Integer),
                ])
                .with_attribute(AttributeDescriptor::basic("product", "product", BasicType::String))
                .with_attribute(AttributeDescriptor::basic("quantity", "quantity", BasicType::Integer)),
        )
        .entity(
            EntityMapping::new("Animal", "animals")
                .with_id("id", "id", BasicType::Long)
                .single_table("DTYPE")
                .with_attribute(AttributeDescriptor::basic("name", "name", BasicType::String))
                .abstract_entity(),
        )
        .entity(
            EntityMapping::subtype("Dog", "Animal")
                .with_attribute(AttributeDescriptor::basic("breed", "breed", BasicType::String)),
        )
        .entity(
            EntityMapping::subtype("Cat", "Animal")
                .with_attribute(AttributeDescriptor::basic("lives", "lives", BasicType::Integer)),
        )
        .build()
        .expect("shop model is valid")
}
