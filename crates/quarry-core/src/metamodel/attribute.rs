//! Persistent attribute descriptors.

use super::types::{BasicType, ExpressableType};
use super::{Fetchable, HasColumns, Navigable};
use crate::path;

/// When an association is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// Loaded together with the owner (by join fetch or a subsequent select).
    Eager,
    /// Loaded on first access.
    Lazy,
}

impl FetchStrategy {
    pub fn eager() -> Self {
        FetchStrategy::Eager
    }

    pub fn lazy() -> Self {
        FetchStrategy::Lazy
    }
}

/// Physical column behind a basic value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnMapping {
    /// Secondary table name, `None` for the owner's primary table.
    pub table: Option<String>,
    pub column: String,
    pub jdbc_type: BasicType,
}

/// The shape of an attribute.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttributeKind {
    /// A single column.
    Basic {
        column: String,
        #[serde(rename = "type")]
        basic_type: BasicType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table: Option<String>,
    },
    /// A value type whose components live in the owner's primary table.
    Embedded {
        embeddable: String,
        #[serde(default)]
        column_prefix: String,
    },
    /// Many-to-one / one-to-one with the foreign key on the owner's table.
    ToOne {
        target: String,
        join_column: String,
        #[serde(default = "FetchStrategy::eager")]
        fetch: FetchStrategy,
    },
    /// One-to-many with the foreign key on the target's table.
    ToMany {
        target: String,
        key_column: String,
        #[serde(default = "FetchStrategy::lazy")]
        fetch: FetchStrategy,
    },
}

fn default_nullable() -> bool {
    true
}

/// A persistent attribute of an entity or embeddable.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AttributeDescriptor {
    pub name: String,
    #[serde(flatten)]
    pub kind: AttributeKind,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Entity or embeddable that declares the attribute; filled in at build time.
    #[serde(skip)]
    pub declaring_type: String,
}

impl AttributeDescriptor {
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
            declaring_type: String::new(),
        }
    }

    pub fn basic(name: impl Into<String>, column: impl Into<String>, basic_type: BasicType) -> Self {
        Self::new(
            name,
            AttributeKind::Basic {
                column: column.into(),
                basic_type,
                table: None,
            },
        )
    }

    pub fn embedded(name: impl Into<String>, embeddable: impl Into<String>) -> Self {
        Self::new(
            name,
            AttributeKind::Embedded {
                embeddable: embeddable.into(),
                column_prefix: String::new(),
            },
        )
    }

    pub fn to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        join_column: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            AttributeKind::ToOne {
                target: target.into(),
                join_column: join_column.into(),
                fetch: FetchStrategy::Eager,
            },
        )
    }

    pub fn to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        key_column: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            AttributeKind::ToMany {
                target: target.into(),
                key_column: key_column.into(),
                fetch: FetchStrategy::Lazy,
            },
        )
    }

    /// Override the fetch strategy of an association. No effect on other kinds.
    pub fn with_fetch(mut self, strategy: FetchStrategy) -> Self {
        match &mut self.kind {
            AttributeKind::ToOne { fetch, .. } | AttributeKind::ToMany { fetch, .. } => {
                *fetch = strategy
            }
            _ => {}
        }
        self
    }

    /// Map a basic attribute onto a secondary table.
    pub fn on_table(mut self, table_name: impl Into<String>) -> Self {
        if let AttributeKind::Basic { table, .. } = &mut self.kind {
            *table = Some(table_name.into());
        }
        self
    }

    pub fn with_column_prefix(mut self, prefix: impl Into<String>) -> Self {
        if let AttributeKind::Embedded { column_prefix, .. } = &mut self.kind {
            *column_prefix = prefix.into();
        }
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn is_basic(&self) -> bool {
        matches!(self.kind, AttributeKind::Basic { .. })
    }

    pub fn is_plural(&self) -> bool {
        matches!(self.kind, AttributeKind::ToMany { .. })
    }

    /// Target entity of an association.
    pub fn target_entity(&self) -> Option<&str> {
        match &self.kind {
            AttributeKind::ToOne { target, .. } | AttributeKind::ToMany { target, .. } => {
                Some(target)
            }
            _ => None,
        }
    }

    /// Collection role, `Owner.attribute`, for plural attributes.
    pub fn collection_role(&self) -> Option<String> {
        self.is_plural()
            .then(|| path::append(&self.declaring_type, &self.name))
    }
}

impl Navigable for AttributeDescriptor {
    fn navigable_name(&self) -> &str {
        &self.name
    }

    fn expressable_type(&self) -> ExpressableType {
        match &self.kind {
            AttributeKind::Basic { basic_type, .. } => ExpressableType::Basic(*basic_type),
            AttributeKind::Embedded { embeddable, .. } => {
                ExpressableType::Embeddable(embeddable.clone())
            }
            AttributeKind::ToOne { target, .. } => ExpressableType::Entity(target.clone()),
            AttributeKind::ToMany { target, .. } => ExpressableType::Collection {
                role: path::append(&self.declaring_type, &self.name),
                element: target.clone(),
            },
        }
    }
}

impl Fetchable for AttributeDescriptor {
    fn fetch_strategy(&self) -> FetchStrategy {
        match &self.kind {
            AttributeKind::ToOne { fetch, .. } | AttributeKind::ToMany { fetch, .. } => *fetch,
            _ => FetchStrategy::Eager,
        }
    }

    fn is_association(&self) -> bool {
        matches!(
            self.kind,
            AttributeKind::ToOne { .. } | AttributeKind::ToMany { .. }
        )
    }
}

impl HasColumns for AttributeDescriptor {
    /// Columns owned directly by this attribute. Embedded and foreign-key
    /// columns need the metamodel; see `Metamodel::attribute_columns`.
    fn column_mappings(&self) -> Vec<ColumnMapping> {
        match &self.kind {
            AttributeKind::Basic {
                column,
                basic_type,
                table,
            } => vec![ColumnMapping {
                table: table.clone(),
                column: column.clone(),
                jdbc_type: *basic_type,
            }],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn association_defaults() {
        let customer = AttributeDescriptor::to_one("customer", "Customer", "customer_id");
        assert_eq!(customer.fetch_strategy(), FetchStrategy::Eager);
        assert!(customer.is_association());

        let items = AttributeDescriptor::to_many("lineItems", "LineItem", "order_id");
        assert_eq!(items.fetch_strategy(), FetchStrategy::Lazy);
        assert!(items.is_plural());
    }

    #[test]
    fn basic_columns() {
        let attr = AttributeDescriptor::basic("notes", "notes", BasicType::String)
            .on_table("order_details");
        let columns = attr.column_mappings();
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].table.as_deref(), Some("order_details"));
    }

    #[test]
    fn collection_role_uses_declaring_type() {
        let mut items = AttributeDescriptor::to_many("lineItems", "LineItem", "order_id");
        items.declaring_type = "Order".into();
        assert_eq!(items.collection_role().as_deref(), Some("Order.lineItems"));
        assert_eq!(
            items.expressable_type(),
            ExpressableType::Collection {
                role: "Order.lineItems".into(),
                element: "LineItem".into()
            }
        );
    }

    #[test]
    fn deserializes_tagged_kind() {
        let json = r#"{"name":"customer","kind":"to_one","target":"Customer","join_column":"customer_id"}"#;
        let attr: AttributeDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(attr.target_entity(), Some("Customer"));
        assert_eq!(attr.fetch_strategy(), FetchStrategy::Eager);
        assert!(attr.nullable);

        let json = r#"{"name":"amount","kind":"basic","column":"amount","type":"double","nullable":false}"#;
        let attr: AttributeDescriptor = serde_json::from_str(json).unwrap();
        assert!(attr.is_basic());
        assert!(!attr.nullable);
    }
}
