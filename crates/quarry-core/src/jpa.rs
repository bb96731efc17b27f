//! JPA-style view of the metamodel, plus the named entity graph registry.

use crate::error::Error;
use crate::metamodel::{EntityDescriptor, Metamodel};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// How an entity graph applied to a query treats attributes it does not name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphSemantic {
    /// Unnamed associations are treated as lazy.
    Fetch,
    /// Unnamed associations keep their mapped fetch strategy.
    Load,
}

impl GraphSemantic {
    pub const FETCH_HINT: &'static str = "jakarta.persistence.fetchgraph";
    pub const LOAD_HINT: &'static str = "jakarta.persistence.loadgraph";

    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint {
            Self::FETCH_HINT => Some(GraphSemantic::Fetch),
            Self::LOAD_HINT => Some(GraphSemantic::Load),
            _ => None,
        }
    }
}

/// The associations of a root entity to load together with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityGraph {
    pub name: String,
    pub root_entity: String,
    pub attribute_nodes: Vec<String>,
}

impl EntityGraph {
    pub fn new(name: impl Into<String>, root_entity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root_entity: root_entity.into(),
            attribute_nodes: Vec::new(),
        }
    }

    pub fn with_attribute_node(mut self, attribute: impl Into<String>) -> Self {
        self.add_attribute_node(attribute);
        self
    }

    pub fn add_attribute_node(&mut self, attribute: impl Into<String>) {
        let attribute = attribute.into();
        if !self.attribute_nodes.contains(&attribute) {
            self.attribute_nodes.push(attribute);
        }
    }

    pub fn has_attribute_node(&self, attribute: &str) -> bool {
        self.attribute_nodes.iter().any(|a| a == attribute)
    }
}

/// Kind of a managed type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedTypeKind {
    Entity,
    Embeddable,
}

/// A mapped type as listed by [`JpaMetamodel::managed_types`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedType {
    pub name: String,
    pub type_name: String,
    pub kind: ManagedTypeKind,
}

/// Metamodel facade shared by all sessions of a factory.
#[derive(Debug)]
pub struct JpaMetamodel {
    metamodel: Arc<Metamodel>,
    entity_graphs: RwLock<HashMap<String, Arc<EntityGraph>>>,
}

impl JpaMetamodel {
    pub fn new(metamodel: Arc<Metamodel>) -> Self {
        Self {
            metamodel,
            entity_graphs: RwLock::new(HashMap::new()),
        }
    }

    pub fn metamodel(&self) -> &Arc<Metamodel> {
        &self.metamodel
    }

    /// The entity mapped to a runtime type name.
    pub fn entity(&self, type_name: &str) -> Result<&Arc<EntityDescriptor>, Error> {
        self.metamodel.entity_descriptor_for_type(type_name)
    }

    pub fn entity_of<T: ?Sized + 'static>(&self) -> Result<&Arc<EntityDescriptor>, Error> {
        self.metamodel.entity_descriptor_of::<T>()
    }

    pub fn find_entity(&self, type_name: &str) -> Option<&Arc<EntityDescriptor>> {
        self.metamodel.find_entity_descriptor_for_type(type_name)
    }

    pub fn entity_by_name(&self, name: &str) -> Result<&Arc<EntityDescriptor>, Error> {
        self.metamodel
            .find_entity_descriptor(name)
            .ok_or_else(|| Error::IllegalArgument(format!("not an entity: {}", name)))
    }

    /// Entities in registration order, then embeddables by name.
    pub fn managed_types(&self) -> Vec<ManagedType> {
        let mut types = Vec::new();
        self.metamodel.visit_entity_descriptors(|e| {
            types.push(ManagedType {
                name: e.name.clone(),
                type_name: e.type_name.clone(),
                kind: ManagedTypeKind::Entity,
            })
        });
        self.metamodel.visit_embeddables(|e| {
            types.push(ManagedType {
                name: e.name.clone(),
                type_name: e.type_name.clone(),
                kind: ManagedTypeKind::Embeddable,
            })
        });
        types
    }

    /// Register a named graph after checking its root and attribute nodes.
    pub fn add_named_entity_graph(&self, graph: EntityGraph) -> Result<(), Error> {
        let root = self.entity_by_name(&graph.root_entity)?;
        for node in &graph.attribute_nodes {
            if root.attribute(node).is_none() {
                return Err(Error::IllegalArgument(format!(
                    "entity graph '{}': '{}' is not an attribute of {}",
                    graph.name, node, root.name
                )));
            }
        }
        let mut graphs = self.entity_graphs.write();
        if graphs.contains_key(&graph.name) {
            return Err(Error::IllegalArgument(format!(
                "entity graph '{}' is already registered",
                graph.name
            )));
        }
        debug!(graph = %graph.name, root = %graph.root_entity, "registered entity graph");
        graphs.insert(graph.name.clone(), Arc::new(graph));
        Ok(())
    }

    pub fn find_entity_graph(&self, name: &str) -> Option<Arc<EntityGraph>> {
        self.entity_graphs.read().get(name).cloned()
    }

    /// Graphs whose root is `entity` or one of its supertypes.
    pub fn find_entity_graphs_by_type(&self, entity: &str) -> Vec<Arc<EntityGraph>> {
        let mut graphs: Vec<_> = self
            .entity_graphs
            .read()
            .values()
            .filter(|g| g.root_entity == entity || self.metamodel.is_subtype_of(entity, &g.root_entity))
            .cloned()
            .collect();
        graphs.sort_by(|a, b| a.name.cmp(&b.name));
        graphs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::shop;

    fn jpa() -> JpaMetamodel {
        JpaMetamodel::new(Arc::new(shop()))
    }

    #[test]
    fn entity_lookup() {
        let jpa = jpa();
        assert_eq!(jpa.entity("shop::Order").unwrap().name, "Order");
        assert!(matches!(
            jpa.entity("shop::Invoice"),
            Err(Error::IllegalArgument(_))
        ));
        assert!(jpa.find_entity("shop::Invoice").is_none());
        assert!(matches!(
            jpa.entity_by_name("Invoice"),
            Err(Error::IllegalArgument(_))
        ));

        struct Unmapped;
        assert!(matches!(
            jpa.entity_of::<Unmapped>(),
            Err(Error::IllegalArgument(_))
        ));
    }

    #[test]
    fn managed_types_include_embeddables() {
        let types = jpa().managed_types();
        assert!(types
            .iter()
            .any(|t| t.name == "Address" && t.kind == ManagedTypeKind::Embeddable));
        assert_eq!(types[0].name, "Customer");
    }

    #[test]
    fn graph_registration_is_validated() {
        let jpa = jpa();
        jpa.add_named_entity_graph(
            EntityGraph::new("order.customer", "Order").with_attribute_node("customer"),
        )
        .unwrap();
        assert!(jpa
            .find_entity_graph("order.customer")
            .unwrap()
            .has_attribute_node("customer"));

        let duplicate =
            jpa.add_named_entity_graph(EntityGraph::new("order.customer", "Order"));
        assert!(matches!(duplicate, Err(Error::IllegalArgument(_))));

        let unknown = jpa.add_named_entity_graph(
            EntityGraph::new("bad", "Order").with_attribute_node("invoices"),
        );
        assert!(matches!(unknown, Err(Error::IllegalArgument(_))));
    }

    #[test]
    fn graphs_by_type_include_supertype_graphs() {
        let jpa = jpa();
        jpa.add_named_entity_graph(EntityGraph::new("animal", "Animal").with_attribute_node("name"))
            .unwrap();
        assert_eq!(jpa.find_entity_graphs_by_type("Dog").len(), 1);
        assert!(jpa.find_entity_graphs_by_type("Order").is_empty());
    }

    #[test]
    fn hints() {
        assert_eq!(
            GraphSemantic::from_hint("jakarta.persistence.fetchgraph"),
            Some(GraphSemantic::Fetch)
        );
        assert_eq!(GraphSemantic::from_hint("other"), None);
    }
}
