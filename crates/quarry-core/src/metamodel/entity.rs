//! Runtime entity, embeddable and collection descriptors.

use super::attribute::{AttributeDescriptor, AttributeKind, ColumnMapping, FetchStrategy};
use super::types::{BasicType, ExpressableType};
use super::{HasColumns, Navigable};

/// How an entity is identified.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentifierDescriptor {
    /// A single basic attribute.
    Simple { attribute: String },
    /// Several basic attributes of the entity itself form the identifier.
    NonAggregated { attributes: Vec<String> },
}

impl IdentifierDescriptor {
    pub fn attribute_names(&self) -> Vec<&str> {
        match self {
            IdentifierDescriptor::Simple { attribute } => vec![attribute.as_str()],
            IdentifierDescriptor::NonAggregated { attributes } => {
                attributes.iter().map(String::as_str).collect()
            }
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, IdentifierDescriptor::NonAggregated { .. })
    }
}

/// A table joined to the primary table by identifier.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SecondaryTable {
    pub name: String,
    /// Column of the secondary table holding the owner's identifier.
    pub key_column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InheritanceStrategy {
    SingleTable,
    Joined,
    TablePerClass,
}

/// Position of an entity inside an inheritance hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityHierarchy {
    pub root: String,
    pub strategy: InheritanceStrategy,
    pub discriminator_column: Option<String>,
    pub discriminator_value: Option<String>,
}

/// Immutable runtime description of a mapped entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    pub name: String,
    /// Runtime type handle (fully qualified type name).
    pub type_name: String,
    pub table: String,
    pub secondary_tables: Vec<SecondaryTable>,
    pub identifier: IdentifierDescriptor,
    /// Inherited attributes first, then declared ones.
    pub attributes: Vec<AttributeDescriptor>,
    pub super_type: Option<String>,
    pub hierarchy: Option<EntityHierarchy>,
    pub is_abstract: bool,
    pub cacheable: bool,
}

impl EntityDescriptor {
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    /// Name of the hierarchy root; entity identity is scoped to it.
    pub fn root_entity_name(&self) -> &str {
        self.hierarchy
            .as_ref()
            .map(|h| h.root.as_str())
            .unwrap_or(&self.name)
    }

    pub fn is_identifier_attribute(&self, name: &str) -> bool {
        self.identifier.attribute_names().contains(&name)
    }

    /// The identifier attribute, for simple identifiers.
    pub fn simple_identifier(&self) -> Option<&AttributeDescriptor> {
        match &self.identifier {
            IdentifierDescriptor::Simple { attribute } => self.attribute(attribute),
            IdentifierDescriptor::NonAggregated { .. } => None,
        }
    }

    pub fn identifier_attributes(&self) -> Vec<&AttributeDescriptor> {
        self.identifier
            .attribute_names()
            .into_iter()
            .filter_map(|name| self.attribute(name))
            .collect()
    }

    /// Identifier columns in identifier order (all on the primary table).
    pub fn identifier_columns(&self) -> Vec<ColumnMapping> {
        self.identifier_attributes()
            .into_iter()
            .flat_map(|a| a.column_mappings())
            .collect()
    }

    /// Type of a simple identifier.
    pub fn identifier_type(&self) -> Option<BasicType> {
        match self.simple_identifier().map(|a| &a.kind) {
            Some(AttributeKind::Basic { basic_type, .. }) => Some(*basic_type),
            _ => None,
        }
    }

    /// Primary table first, then secondary tables.
    pub fn table_names(&self) -> Vec<&str> {
        std::iter::once(self.table.as_str())
            .chain(self.secondary_tables.iter().map(|t| t.name.as_str()))
            .collect()
    }

    /// Cache region shared by the whole hierarchy.
    pub fn cache_region(&self) -> &str {
        self.root_entity_name()
    }

    pub fn discriminator_column(&self) -> Option<&str> {
        self.hierarchy
            .as_ref()
            .and_then(|h| h.discriminator_column.as_deref())
    }

    pub fn discriminator_value(&self) -> Option<&str> {
        self.hierarchy
            .as_ref()
            .and_then(|h| h.discriminator_value.as_deref())
    }

    pub fn inheritance_strategy(&self) -> Option<InheritanceStrategy> {
        self.hierarchy.as_ref().map(|h| h.strategy)
    }
}

impl Navigable for EntityDescriptor {
    fn navigable_name(&self) -> &str {
        &self.name
    }

    fn expressable_type(&self) -> ExpressableType {
        ExpressableType::Entity(self.name.clone())
    }
}

/// A value type mapped into its owner's table.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddableDescriptor {
    pub name: String,
    pub type_name: String,
    /// Basic attributes only.
    pub attributes: Vec<AttributeDescriptor>,
}

impl EmbeddableDescriptor {
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

impl Navigable for EmbeddableDescriptor {
    fn navigable_name(&self) -> &str {
        &self.name
    }

    fn expressable_type(&self) -> ExpressableType {
        ExpressableType::Embeddable(self.name.clone())
    }
}

impl HasColumns for EmbeddableDescriptor {
    fn column_mappings(&self) -> Vec<ColumnMapping> {
        self.attributes
            .iter()
            .flat_map(|a| a.column_mappings())
            .collect()
    }
}

/// A one-to-many collection, addressed by its role (`Owner.attribute`).
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionDescriptor {
    pub role: String,
    pub owner: String,
    pub attribute: String,
    pub element: String,
    /// Foreign key column on the element table.
    pub key_column: String,
    pub fetch: FetchStrategy,
}

impl Navigable for CollectionDescriptor {
    fn navigable_name(&self) -> &str {
        &self.role
    }

    fn expressable_type(&self) -> ExpressableType {
        ExpressableType::Collection {
            role: self.role.clone(),
            element: self.element.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> EntityDescriptor {
        EntityDescriptor {
            name: "Order".into(),
            type_name: "shop::Order".into(),
            table: "orders".into(),
            secondary_tables: vec![SecondaryTable {
                name: "order_details".into(),
                key_column: "order_id".into(),
            }],
            identifier: IdentifierDescriptor::NonAggregated {
                attributes: vec!["customerId".into(), "orderNumber".into()],
            },
            attributes: vec![
                AttributeDescriptor::basic("customerId", "customer_id", BasicType::Long),
                AttributeDescriptor::basic("orderNumber", "order_number", BasicType::String),
                AttributeDescriptor::basic("amount", "amount", BasicType::Double),
            ],
            super_type: None,
            hierarchy: None,
            is_abstract: false,
            cacheable: false,
        }
    }

    #[test]
    fn composite_identifier_columns_in_order() {
        let order = order();
        let columns: Vec<_> = order
            .identifier_columns()
            .into_iter()
            .map(|c| c.column)
            .collect();
        assert_eq!(columns, vec!["customer_id", "order_number"]);
        assert!(order.simple_identifier().is_none());
        assert!(order.identifier_type().is_none());
        assert!(order.is_identifier_attribute("orderNumber"));
    }

    #[test]
    fn table_names_primary_first() {
        assert_eq!(order().table_names(), vec!["orders", "order_details"]);
    }

    #[test]
    fn root_name_defaults_to_self() {
        assert_eq!(order().root_entity_name(), "Order");
        assert_eq!(order().cache_region(), "Order");
    }
}
