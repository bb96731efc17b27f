//! Boot model: the already-resolved mapping information fed into the
//! runtime metamodel, either through builders or as JSON.

use super::attribute::AttributeDescriptor;
use super::entity::{IdentifierDescriptor, InheritanceStrategy, SecondaryTable};
use super::types::BasicType;

/// The complete boot model.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BootModel {
    #[serde(default)]
    pub entities: Vec<EntityMapping>,
    #[serde(default)]
    pub embeddables: Vec<EmbeddableMapping>,
}

impl BootModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity: EntityMapping) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn with_embeddable(mut self, embeddable: EmbeddableMapping) -> Self {
        self.embeddables.push(embeddable);
        self
    }
}

/// Inheritance declared on a hierarchy root.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InheritanceMapping {
    pub strategy: InheritanceStrategy,
    #[serde(default)]
    pub discriminator_column: Option<String>,
}

/// Mapping of one entity as produced by annotation/XML processing.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EntityMapping {
    pub name: String,
    /// Defaults to the entity name.
    #[serde(default)]
    pub type_name: Option<String>,
    /// Required for hierarchy roots; single-table subtypes inherit it.
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub secondary_tables: Vec<SecondaryTable>,
    /// Required for hierarchy roots; subtypes inherit it.
    #[serde(default)]
    pub identifier: Option<IdentifierDescriptor>,
    #[serde(default)]
    pub attributes: Vec<AttributeDescriptor>,
    /// Super-entity name.
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub inheritance: Option<InheritanceMapping>,
    /// Defaults to the entity name inside single-table hierarchies.
    #[serde(default)]
    pub discriminator_value: Option<String>,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default)]
    pub cacheable: bool,
}

impl EntityMapping {
    /// Create a root entity mapped to `table`.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: None,
            table: Some(table.into()),
            secondary_tables: Vec::new(),
            identifier: None,
            attributes: Vec::new(),
            extends: None,
            inheritance: None,
            discriminator_value: None,
            is_abstract: false,
            cacheable: false,
        }
    }

    /// Create a subtype of `parent`.
    pub fn subtype(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            table: None,
            extends: Some(parent.into()),
            ..Self::new(name, String::new())
        }
    }

    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// Add a simple identifier attribute.
    pub fn with_id(
        mut self,
        name: impl Into<String>,
        column: impl Into<String>,
        basic_type: BasicType,
    ) -> Self {
        let name = name.into();
        self.attributes
            .insert(0, AttributeDescriptor::basic(name.clone(), column, basic_type).not_null());
        self.identifier = Some(IdentifierDescriptor::Simple { attribute: name });
        self
    }

    /// Add a composite identifier made of basic attributes of this entity.
    pub fn with_composite_id(mut self, parts: Vec<(&str, &str, BasicType)>) -> Self {
        let mut names = Vec::with_capacity(parts.len());
        for (i, (name, column, basic_type)) in parts.into_iter().enumerate() {
            self.attributes
                .insert(i, AttributeDescriptor::basic(name, column, basic_type).not_null());
            names.push(name.to_string());
        }
        self.identifier = Some(IdentifierDescriptor::NonAggregated { attributes: names });
        self
    }

    pub fn with_attribute(mut self, attribute: AttributeDescriptor) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_secondary_table(
        mut self,
        name: impl Into<String>,
        key_column: impl Into<String>,
    ) -> Self {
        self.secondary_tables.push(SecondaryTable {
            name: name.into(),
            key_column: key_column.into(),
        });
        self
    }

    /// Declare a single-table hierarchy rooted at this entity.
    pub fn single_table(mut self, discriminator_column: impl Into<String>) -> Self {
        self.inheritance = Some(InheritanceMapping {
            strategy: InheritanceStrategy::SingleTable,
            discriminator_column: Some(discriminator_column.into()),
        });
        self
    }

    pub fn with_inheritance(mut self, strategy: InheritanceStrategy) -> Self {
        self.inheritance = Some(InheritanceMapping {
            strategy,
            discriminator_column: None,
        });
        self
    }

    pub fn with_discriminator_value(mut self, value: impl Into<String>) -> Self {
        self.discriminator_value = Some(value.into());
        self
    }

    pub fn abstract_entity(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }
}

/// Mapping of an embeddable value type.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EmbeddableMapping {
    pub name: String,
    #[serde(default)]
    pub type_name: Option<String>,
    pub attributes: Vec<AttributeDescriptor>,
}

impl EmbeddableMapping {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: None,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: AttributeDescriptor) -> Self {
        self.attributes.push(attribute);
        self
    }
}
