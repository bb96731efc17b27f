//! The runtime metamodel: immutable registry of entity, embeddable and
//! collection descriptors built once from the boot model.

use super::attribute::{AttributeDescriptor, AttributeKind, ColumnMapping};
use super::boot::{BootModel, EmbeddableMapping, EntityMapping};
use super::entity::{
    CollectionDescriptor, EmbeddableDescriptor, EntityDescriptor, EntityHierarchy,
    IdentifierDescriptor, InheritanceStrategy,
};
use crate::error::Error;
use crate::path;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Default discriminator column when a single-table root names none.
pub const DEFAULT_DISCRIMINATOR_COLUMN: &str = "DTYPE";

/// Something reachable through a navigable role.
#[derive(Debug, Clone, Copy)]
pub enum NavigableRef<'a> {
    Entity(&'a Arc<EntityDescriptor>),
    Embeddable(&'a Arc<EmbeddableDescriptor>),
    Collection(&'a Arc<CollectionDescriptor>),
    Attribute {
        /// Entity or embeddable name declaring the attribute.
        owner: &'a str,
        attribute: &'a AttributeDescriptor,
    },
}

/// Immutable registry of mapped types. Shared across sessions and threads.
#[derive(Debug, Default)]
pub struct Metamodel {
    entities: HashMap<String, Arc<EntityDescriptor>>,
    /// Insertion order, for deterministic visitation.
    entity_order: Vec<String>,
    types: HashMap<String, String>,
    embeddables: HashMap<String, Arc<EmbeddableDescriptor>>,
    collections: HashMap<String, Arc<CollectionDescriptor>>,
    /// Entity name to itself and all (transitive) subtypes.
    subtypes: HashMap<String, Vec<String>>,
    /// (hierarchy root, discriminator value) to entity name.
    discriminators: HashMap<(String, String), String>,
}

impl Metamodel {
    pub fn builder() -> MetamodelBuilder {
        MetamodelBuilder::new()
    }

    pub fn from_boot_model(model: BootModel) -> Result<Self, Error> {
        let mut builder = MetamodelBuilder::new();
        for embeddable in model.embeddables {
            builder = builder.embeddable(embeddable);
        }
        for entity in model.entities {
            builder = builder.entity(entity);
        }
        builder.build()
    }

    /// Build from a JSON boot model.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let model: BootModel = serde_json::from_str(json)
            .map_err(|e| Error::Mapping(format!("invalid boot model: {}", e)))?;
        Self::from_boot_model(model)
    }

    /// Look up an entity by name.
    pub fn entity_descriptor(&self, name: &str) -> Result<&Arc<EntityDescriptor>, Error> {
        self.find_entity_descriptor(name)
            .ok_or_else(|| Error::NotNavigable(name.to_string()))
    }

    pub fn find_entity_descriptor(&self, name: &str) -> Option<&Arc<EntityDescriptor>> {
        self.entities.get(name).or_else(|| {
            // Queries may use the qualified type name in place of the entity name.
            self.types.get(name).and_then(|n| self.entities.get(n))
        })
    }

    /// Look up an entity by its runtime type name. Unmapped types are an
    /// illegal argument, not a missing navigable.
    pub fn entity_descriptor_for_type(
        &self,
        type_name: &str,
    ) -> Result<&Arc<EntityDescriptor>, Error> {
        self.find_entity_descriptor_for_type(type_name)
            .ok_or_else(|| Error::IllegalArgument(format!("not an entity: {}", type_name)))
    }

    pub fn find_entity_descriptor_for_type(
        &self,
        type_name: &str,
    ) -> Option<&Arc<EntityDescriptor>> {
        self.types.get(type_name).and_then(|n| self.entities.get(n))
    }

    /// Look up the entity mapped to the Rust type `T` (by `std::any::type_name`).
    pub fn entity_descriptor_of<T: ?Sized + 'static>(
        &self,
    ) -> Result<&Arc<EntityDescriptor>, Error> {
        self.entity_descriptor_for_type(std::any::type_name::<T>())
    }

    pub fn find_entity_descriptor_of<T: ?Sized + 'static>(&self) -> Option<&Arc<EntityDescriptor>> {
        self.find_entity_descriptor_for_type(std::any::type_name::<T>())
    }

    pub fn embeddable_descriptor(&self, name: &str) -> Result<&Arc<EmbeddableDescriptor>, Error> {
        self.embeddables
            .get(name)
            .ok_or_else(|| Error::NotNavigable(name.to_string()))
    }

    pub fn collection_descriptor(&self, role: &str) -> Result<&Arc<CollectionDescriptor>, Error> {
        self.collections
            .get(role)
            .ok_or_else(|| Error::NotNavigable(role.to_string()))
    }

    /// Resolve a navigable role such as `Order`, `Order.lineItems` or
    /// `Order.shippingAddress.city`.
    pub fn resolve_navigable_role(&self, role: &str) -> Result<NavigableRef<'_>, Error> {
        if let Some(collection) = self.collections.get(role) {
            return Ok(NavigableRef::Collection(collection));
        }
        if let Some(entity) = self.entities.get(role) {
            return Ok(NavigableRef::Entity(entity));
        }
        if let Some(embeddable) = self.embeddables.get(role) {
            return Ok(NavigableRef::Embeddable(embeddable));
        }

        let not_navigable = || Error::NotNavigable(role.to_string());
        let mut segments = role.split('.');
        let root = segments.next().ok_or_else(not_navigable)?;
        let entity = self.entities.get(root).ok_or_else(not_navigable)?;

        let mut owner: &str = &entity.name;
        let mut attributes: &[AttributeDescriptor] = &entity.attributes;
        let mut found = None;
        for segment in segments {
            if found.is_some() {
                // Only embeddables can be navigated through.
                let embeddable = match found {
                    Some(NavigableRef::Attribute {
                        attribute:
                            AttributeDescriptor {
                                kind: AttributeKind::Embedded { embeddable, .. },
                                ..
                            },
                        ..
                    }) => self.embeddables.get(embeddable.as_str()).ok_or_else(not_navigable)?,
                    _ => return Err(not_navigable()),
                };
                owner = &embeddable.name;
                attributes = &embeddable.attributes;
            }
            let attribute = attributes
                .iter()
                .find(|a| a.name == segment)
                .ok_or_else(not_navigable)?;
            found = Some(NavigableRef::Attribute { owner, attribute });
        }
        found.ok_or_else(not_navigable)
    }

    /// Columns backing an attribute of `entity`, resolving embeddables and
    /// foreign keys.
    pub fn attribute_columns(
        &self,
        entity: &EntityDescriptor,
        attribute: &AttributeDescriptor,
    ) -> Result<Vec<ColumnMapping>, Error> {
        match &attribute.kind {
            AttributeKind::Basic {
                column,
                basic_type,
                table,
            } => Ok(vec![ColumnMapping {
                table: table.clone(),
                column: column.clone(),
                jdbc_type: *basic_type,
            }]),
            AttributeKind::Embedded {
                embeddable,
                column_prefix,
            } => {
                let embeddable = self.embeddable_descriptor(embeddable)?;
                Ok(embeddable
                    .attributes
                    .iter()
                    .filter_map(|a| match &a.kind {
                        AttributeKind::Basic {
                            column, basic_type, ..
                        } => Some(ColumnMapping {
                            table: None,
                            column: format!("{}{}", column_prefix, column),
                            jdbc_type: *basic_type,
                        }),
                        _ => None,
                    })
                    .collect())
            }
            AttributeKind::ToOne {
                target,
                join_column,
                ..
            } => {
                let target = self.entity_descriptor(target)?;
                let jdbc_type = target.identifier_type().ok_or_else(|| {
                    Error::Mapping(format!(
                        "{}.{} targets {} which has a composite identifier",
                        entity.name, attribute.name, target.name
                    ))
                })?;
                Ok(vec![ColumnMapping {
                    table: None,
                    column: join_column.clone(),
                    jdbc_type,
                }])
            }
            AttributeKind::ToMany { .. } => Ok(Vec::new()),
        }
    }

    /// The entity and every concrete subtype, in registration order.
    pub fn concrete_subtypes(&self, name: &str) -> Vec<&Arc<EntityDescriptor>> {
        self.subtypes
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|n| self.entities.get(n))
            .filter(|e| !e.is_abstract)
            .collect()
    }

    /// Whether `name` is `ancestor` or one of its subtypes.
    pub fn is_subtype_of(&self, name: &str, ancestor: &str) -> bool {
        self.subtypes
            .get(ancestor)
            .map(|subs| subs.iter().any(|s| s == name))
            .unwrap_or(false)
    }

    /// Concrete entity for a discriminator value read from a row.
    pub fn entity_for_discriminator(
        &self,
        root: &str,
        value: &str,
    ) -> Option<&Arc<EntityDescriptor>> {
        self.discriminators
            .get(&(root.to_string(), value.to_string()))
            .and_then(|n| self.entities.get(n))
    }

    pub fn visit_entity_descriptors(&self, mut visitor: impl FnMut(&Arc<EntityDescriptor>)) {
        for name in &self.entity_order {
            if let Some(entity) = self.entities.get(name) {
                visitor(entity);
            }
        }
    }

    pub fn visit_embeddables(&self, mut visitor: impl FnMut(&Arc<EmbeddableDescriptor>)) {
        let mut names: Vec<_> = self.embeddables.keys().collect();
        names.sort();
        for name in names {
            visitor(&self.embeddables[name]);
        }
    }

    pub fn visit_collections(&self, mut visitor: impl FnMut(&Arc<CollectionDescriptor>)) {
        let mut roles: Vec<_> = self.collections.keys().collect();
        roles.sort();
        for role in roles {
            visitor(&self.collections[role]);
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Entities that own any of the given tables.
    pub fn entities_for_tables<'a, I>(&self, tables: I) -> Vec<&Arc<EntityDescriptor>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let tables: HashSet<&str> = tables.into_iter().collect();
        let mut found = Vec::new();
        self.visit_entity_descriptors(|e| {
            if e.table_names().iter().any(|t| tables.contains(t)) {
                found.push(e.name.clone());
            }
        });
        found
            .iter()
            .filter_map(|n| self.entities.get(n))
            .collect()
    }
}

/// Collects boot mappings and produces a validated [`Metamodel`].
#[derive(Debug, Default)]
pub struct MetamodelBuilder {
    entities: Vec<EntityMapping>,
    embeddables: Vec<EmbeddableMapping>,
}

impl MetamodelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, mapping: EntityMapping) -> Self {
        self.entities.push(mapping);
        self
    }

    pub fn embeddable(mut self, mapping: EmbeddableMapping) -> Self {
        self.embeddables.push(mapping);
        self
    }

    pub fn build(self) -> Result<Metamodel, Error> {
        let mut metamodel = Metamodel::default();

        for mapping in self.embeddables {
            let descriptor = resolve_embeddable(mapping)?;
            if metamodel.embeddables.contains_key(&descriptor.name) {
                return Err(Error::Mapping(format!(
                    "duplicate embeddable '{}'",
                    descriptor.name
                )));
            }
            metamodel
                .embeddables
                .insert(descriptor.name.clone(), Arc::new(descriptor));
        }

        let mut mappings: HashMap<String, EntityMapping> = HashMap::new();
        let mut order = Vec::new();
        for mapping in self.entities {
            if mappings.contains_key(&mapping.name) {
                return Err(Error::Mapping(format!("duplicate entity '{}'", mapping.name)));
            }
            order.push(mapping.name.clone());
            mappings.insert(mapping.name.clone(), mapping);
        }

        let mut resolved: HashMap<String, EntityDescriptor> = HashMap::new();
        for name in &order {
            resolve_entity(name, &mappings, &mut resolved, &mut Vec::new())?;
        }

        for name in &order {
            let entity = &resolved[name];
            validate_entity(entity, &resolved, &metamodel.embeddables)?;

            let type_name = entity.type_name.clone();
            if let Some(existing) = metamodel.types.insert(type_name.clone(), name.clone()) {
                return Err(Error::Mapping(format!(
                    "type '{}' is mapped by both '{}' and '{}'",
                    type_name, existing, name
                )));
            }

            if let Some(value) = entity.discriminator_value() {
                let key = (entity.root_entity_name().to_string(), value.to_string());
                if let Some(existing) = metamodel.discriminators.insert(key, name.clone()) {
                    return Err(Error::Mapping(format!(
                        "discriminator value '{}' used by both '{}' and '{}'",
                        value, existing, name
                    )));
                }
            }

            let mut ancestor = Some(name.clone());
            while let Some(current) = ancestor {
                metamodel
                    .subtypes
                    .entry(current.clone())
                    .or_default()
                    .push(name.clone());
                ancestor = resolved[&current].super_type.clone();
            }

            for attribute in &entity.attributes {
                if let AttributeKind::ToMany {
                    target,
                    key_column,
                    fetch,
                } = &attribute.kind
                {
                    if attribute.declaring_type != *name {
                        continue;
                    }
                    let role = path::append(name, &attribute.name);
                    metamodel.collections.insert(
                        role.clone(),
                        Arc::new(CollectionDescriptor {
                            role,
                            owner: name.clone(),
                            attribute: attribute.name.clone(),
                            element: target.clone(),
                            key_column: key_column.clone(),
                            fetch: *fetch,
                        }),
                    );
                }
            }
        }

        for name in order {
            if let Some(entity) = resolved.remove(&name) {
                metamodel.entities.insert(name.clone(), Arc::new(entity));
                metamodel.entity_order.push(name);
            }
        }

        debug!(
            entities = metamodel.entities.len(),
            embeddables = metamodel.embeddables.len(),
            collections = metamodel.collections.len(),
            "built runtime metamodel"
        );
        Ok(metamodel)
    }
}

fn resolve_embeddable(mapping: EmbeddableMapping) -> Result<EmbeddableDescriptor, Error> {
    let mut attributes = mapping.attributes;
    for attribute in &mut attributes {
        if !attribute.is_basic() {
            return Err(Error::Mapping(format!(
                "embeddable '{}' attribute '{}' must be basic",
                mapping.name, attribute.name
            )));
        }
        attribute.declaring_type = mapping.name.clone();
    }
    Ok(EmbeddableDescriptor {
        type_name: mapping.type_name.unwrap_or_else(|| mapping.name.clone()),
        name: mapping.name,
        attributes,
    })
}

fn resolve_entity(
    name: &str,
    mappings: &HashMap<String, EntityMapping>,
    resolved: &mut HashMap<String, EntityDescriptor>,
    stack: &mut Vec<String>,
) -> Result<(), Error> {
    if resolved.contains_key(name) {
        return Ok(());
    }
    if stack.iter().any(|s| s == name) {
        return Err(Error::Mapping(format!(
            "inheritance cycle: {} -> {}",
            stack.join(" -> "),
            name
        )));
    }
    let mapping = mappings
        .get(name)
        .ok_or_else(|| Error::Mapping(format!("unknown entity '{}'", name)))?;

    let mut declared = mapping.attributes.clone();
    for attribute in &mut declared {
        attribute.declaring_type = mapping.name.clone();
    }

    let descriptor = match &mapping.extends {
        None => {
            let table = mapping
                .table
                .clone()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| Error::Mapping(format!("entity '{}' has no table", name)))?;
            let identifier = mapping
                .identifier
                .clone()
                .ok_or_else(|| Error::Mapping(format!("entity '{}' has no identifier", name)))?;
            let hierarchy = mapping.inheritance.as_ref().map(|inheritance| EntityHierarchy {
                root: mapping.name.clone(),
                strategy: inheritance.strategy,
                discriminator_column: match inheritance.strategy {
                    InheritanceStrategy::SingleTable => Some(
                        inheritance
                            .discriminator_column
                            .clone()
                            .unwrap_or_else(|| DEFAULT_DISCRIMINATOR_COLUMN.to_string()),
                    ),
                    _ => inheritance.discriminator_column.clone(),
                },
                discriminator_value: discriminator_value(mapping, inheritance.strategy),
            });
            EntityDescriptor {
                name: mapping.name.clone(),
                type_name: mapping.type_name.clone().unwrap_or_else(|| mapping.name.clone()),
                table,
                secondary_tables: mapping.secondary_tables.clone(),
                identifier,
                attributes: declared,
                super_type: None,
                hierarchy,
                is_abstract: mapping.is_abstract,
                cacheable: mapping.cacheable,
            }
        }
        Some(parent_name) => {
            stack.push(name.to_string());
            resolve_entity(parent_name, mappings, resolved, stack)?;
            stack.pop();

            let parent = &resolved[parent_name];
            let parent_hierarchy = parent.hierarchy.clone().ok_or_else(|| {
                Error::Mapping(format!(
                    "'{}' extends '{}' which declares no inheritance",
                    name, parent_name
                ))
            })?;
            if mapping.identifier.is_some() {
                return Err(Error::Mapping(format!(
                    "subtype '{}' cannot redeclare the identifier",
                    name
                )));
            }

            let table = match (parent_hierarchy.strategy, &mapping.table) {
                (InheritanceStrategy::SingleTable, Some(t)) if !t.is_empty() && *t != parent.table => {
                    return Err(Error::Mapping(format!(
                        "single-table subtype '{}' maps table '{}' instead of '{}'",
                        name, t, parent.table
                    )))
                }
                (InheritanceStrategy::SingleTable, _) => parent.table.clone(),
                (_, Some(t)) if !t.is_empty() => t.clone(),
                _ => return Err(Error::Mapping(format!("entity '{}' has no table", name))),
            };

            let mut attributes = parent.attributes.clone();
            for attribute in declared {
                if attributes.iter().any(|a| a.name == attribute.name) {
                    return Err(Error::Mapping(format!(
                        "'{}' redeclares inherited attribute '{}'",
                        name, attribute.name
                    )));
                }
                attributes.push(attribute);
            }

            let mut secondary_tables = parent.secondary_tables.clone();
            secondary_tables.extend(mapping.secondary_tables.iter().cloned());

            EntityDescriptor {
                name: mapping.name.clone(),
                type_name: mapping.type_name.clone().unwrap_or_else(|| mapping.name.clone()),
                table,
                secondary_tables,
                identifier: parent.identifier.clone(),
                attributes,
                super_type: Some(parent_name.clone()),
                hierarchy: Some(EntityHierarchy {
                    discriminator_value: discriminator_value(mapping, parent_hierarchy.strategy),
                    ..parent_hierarchy
                }),
                is_abstract: mapping.is_abstract,
                cacheable: parent.cacheable,
            }
        }
    };

    resolved.insert(name.to_string(), descriptor);
    Ok(())
}

fn discriminator_value(mapping: &EntityMapping, strategy: InheritanceStrategy) -> Option<String> {
    match strategy {
        InheritanceStrategy::SingleTable if !mapping.is_abstract => Some(
            mapping
                .discriminator_value
                .clone()
                .unwrap_or_else(|| mapping.name.clone()),
        ),
        _ => mapping.discriminator_value.clone(),
    }
}

fn validate_entity(
    entity: &EntityDescriptor,
    entities: &HashMap<String, EntityDescriptor>,
    embeddables: &HashMap<String, Arc<EmbeddableDescriptor>>,
) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for attribute in &entity.attributes {
        if !seen.insert(attribute.name.as_str()) {
            return Err(Error::Mapping(format!(
                "duplicate attribute '{}' on '{}'",
                attribute.name, entity.name
            )));
        }
    }

    for id_name in entity.identifier.attribute_names() {
        match entity.attribute(id_name).map(|a| &a.kind) {
            Some(AttributeKind::Basic { table: None, .. }) => {}
            Some(AttributeKind::Basic { table: Some(_), .. }) => {
                return Err(Error::Mapping(format!(
                    "identifier attribute '{}.{}' must live on the primary table",
                    entity.name, id_name
                )))
            }
            Some(_) => {
                return Err(Error::Mapping(format!(
                    "identifier attribute '{}.{}' must be basic",
                    entity.name, id_name
                )))
            }
            None => {
                return Err(Error::Mapping(format!(
                    "identifier attribute '{}' is not an attribute of '{}'",
                    id_name, entity.name
                )))
            }
        }
    }
    if let IdentifierDescriptor::NonAggregated { attributes } = &entity.identifier {
        if attributes.len() < 2 {
            return Err(Error::Mapping(format!(
                "composite identifier of '{}' needs at least two attributes",
                entity.name
            )));
        }
    }

    for attribute in &entity.attributes {
        match &attribute.kind {
            AttributeKind::Basic {
                table: Some(table), ..
            } => {
                if !entity.secondary_tables.iter().any(|t| &t.name == table) {
                    return Err(Error::Mapping(format!(
                        "'{}.{}' maps unknown secondary table '{}'",
                        entity.name, attribute.name, table
                    )));
                }
            }
            AttributeKind::Embedded { embeddable, .. } => {
                if !embeddables.contains_key(embeddable) {
                    return Err(Error::Mapping(format!(
                        "'{}.{}' refers to unknown embeddable '{}'",
                        entity.name, attribute.name, embeddable
                    )));
                }
            }
            AttributeKind::ToOne { target, .. } => {
                let target_entity = entities.get(target).ok_or_else(|| {
                    Error::Mapping(format!(
                        "'{}.{}' targets unknown entity '{}'",
                        entity.name, attribute.name, target
                    ))
                })?;
                if target_entity.identifier.is_composite() {
                    return Err(Error::Mapping(format!(
                        "'{}.{}' targets '{}' which has a composite identifier; \
                         composite foreign keys are not supported",
                        entity.name, attribute.name, target
                    )));
                }
            }
            AttributeKind::ToMany { target, .. } => {
                if !entities.contains_key(target) {
                    return Err(Error::Mapping(format!(
                        "'{}.{}' targets unknown entity '{}'",
                        entity.name, attribute.name, target
                    )));
                }
            }
            AttributeKind::Basic { table: None, .. } => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metamodel::{AttributeDescriptor, BasicType, EmbeddableMapping, EntityMapping};

    fn shop() -> Metamodel {
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
                    .with_attribute(AttributeDescriptor::basic("name", "name", BasicType::String))
                    .with_attribute(
                        AttributeDescriptor::embedded("address", "Address")
                            .with_column_prefix("addr_"),
                    )
                    .with_attribute(AttributeDescriptor::to_many("orders", "Order", "customer_id")),
            )
            .entity(
                EntityMapping::new("Order", "orders")
                    .with_type_name("shop::Order")
                    .with_id("id", "id", BasicType::Long)
                    .with_attribute(AttributeDescriptor::to_one("customer", "Customer", "customer_id")),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn lookup_by_name_and_type() {
        let mm = shop();
        assert_eq!(mm.entity_descriptor("Order").unwrap().table, "orders");
        assert_eq!(
            mm.entity_descriptor_for_type("shop::Customer").unwrap().name,
            "Customer"
        );
        assert!(mm.find_entity_descriptor("Invoice").is_none());
        assert!(matches!(
            mm.entity_descriptor("Invoice"),
            Err(Error::NotNavigable(_))
        ));
    }

    #[test]
    fn unmapped_type_is_illegal_argument() {
        struct Unmapped;
        let mm = shop();
        assert!(matches!(
            mm.entity_descriptor_of::<Unmapped>(),
            Err(Error::IllegalArgument(_))
        ));
        assert!(mm.find_entity_descriptor_of::<Unmapped>().is_none());
    }

    #[test]
    fn resolve_roles() {
        let mm = shop();
        assert!(matches!(
            mm.resolve_navigable_role("Customer.orders").unwrap(),
            NavigableRef::Collection(c) if c.element == "Order"
        ));
        match mm.resolve_navigable_role("Customer.address.city").unwrap() {
            NavigableRef::Attribute { owner, attribute } => {
                assert_eq!(owner, "Address");
                assert_eq!(attribute.name, "city");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            mm.resolve_navigable_role("Customer.name.first"),
            Err(Error::NotNavigable(_))
        ));
    }

    #[test]
    fn embedded_and_foreign_key_columns() {
        let mm = shop();
        let customer = mm.entity_descriptor("Customer").unwrap();
        let address = customer.attribute("address").unwrap();
        let columns: Vec<_> = mm
            .attribute_columns(customer, address)
            .unwrap()
            .into_iter()
            .map(|c| c.column)
            .collect();
        assert_eq!(columns, vec!["addr_city", "addr_zip"]);

        let order = mm.entity_descriptor("Order").unwrap();
        let fk = mm
            .attribute_columns(order, order.attribute("customer").unwrap())
            .unwrap();
        assert_eq!(fk[0].column, "customer_id");
        assert_eq!(fk[0].jdbc_type, BasicType::Long);
    }

    #[test]
    fn visitation_is_deterministic() {
        let mm = shop();
        let mut names = Vec::new();
        mm.visit_entity_descriptors(|e| names.push(e.name.clone()));
        assert_eq!(names, vec!["Customer", "Order"]);

        let mut roles = Vec::new();
        mm.visit_collections(|c| roles.push(c.role.clone()));
        assert_eq!(roles, vec!["Customer.orders"]);
    }

    #[test]
    fn single_table_hierarchy() {
        let mm = Metamodel::builder()
            .entity(
                EntityMapping::new("Animal", "animals")
                    .with_id("id", "id", BasicType::Long)
                    .single_table("kind")
                    .abstract_entity(),
            )
            .entity(
                EntityMapping::subtype("Dog", "Animal")
                    .with_discriminator_value("DOG")
                    .with_attribute(AttributeDescriptor::basic("breed", "breed", BasicType::String)),
            )
            .entity(EntityMapping::subtype("Puppy", "Dog"))
            .build()
            .unwrap();

        let dog = mm.entity_descriptor("Dog").unwrap();
        assert_eq!(dog.table, "animals");
        assert_eq!(dog.root_entity_name(), "Animal");
        assert_eq!(dog.discriminator_column(), Some("kind"));
        assert!(dog.attribute("id").is_some());

        let concrete: Vec<_> = mm
            .concrete_subtypes("Animal")
            .into_iter()
            .map(|e| e.name.clone())
            .collect();
        assert_eq!(concrete, vec!["Dog", "Puppy"]);
        assert_eq!(mm.entity_for_discriminator("Animal", "Puppy").unwrap().name, "Puppy");
        assert!(mm.is_subtype_of("Puppy", "Animal"));
        assert!(!mm.is_subtype_of("Animal", "Dog"));
    }

    #[test]
    fn rejects_unknown_targets_and_composite_foreign_keys() {
        let err = Metamodel::builder()
            .entity(
                EntityMapping::new("Order", "orders")
                    .with_id("id", "id", BasicType::Long)
                    .with_attribute(AttributeDescriptor::to_one("customer", "Nobody", "c_id")),
            )
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unknown entity 'Nobody'"));

        let err = Metamodel::builder()
            .entity(EntityMapping::new("Line", "lines").with_composite_id(vec![
                ("orderId", "order_id", BasicType::Long),
                ("lineNo", "line_no", BasicType::Integer),
            ]))
            .entity(
                EntityMapping::new("Note", "notes")
                    .with_id("id", "id", BasicType::Long)
                    .with_attribute(AttributeDescriptor::to_one("line", "Line", "line_id")),
            )
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("composite foreign keys"));
    }

    #[test]
    fn rejects_missing_identifier_and_duplicates() {
        let err = Metamodel::builder()
            .entity(EntityMapping::new("Tag", "tags"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("has no identifier"));

        let err = Metamodel::builder()
            .entity(EntityMapping::new("Tag", "tags").with_id("id", "id", BasicType::Long))
            .entity(EntityMapping::new("Tag", "tags2").with_id("id", "id", BasicType::Long))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate entity"));
    }

    #[test]
    fn from_json_builds_metamodel() {
        let metamodel = Metamodel::from_json(include_str!("../../../../demos/sales.json")).unwrap();
        assert_eq!(metamodel.entity_count(), 2);
        let order = metamodel.entity_descriptor("Order").unwrap();
        assert!(order.cacheable);
        assert_eq!(order.identifier_type(), Some(BasicType::Long));
        assert!(metamodel.collection_descriptor("Customer.orders").is_ok());
    }

    #[test]
    fn from_json_reports_mapping_error() {
        assert!(matches!(
            Metamodel::from_json("{ not json"),
            Err(Error::Mapping(_))
        ));
    }
}
