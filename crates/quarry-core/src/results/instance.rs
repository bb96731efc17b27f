//! Managed entity instances and persistent collections.
//!
//! Sessions are single threaded, so instances are shared through
//! `Rc<RefCell<_>>`. An uninitialized instance is a lazy reference: it knows
//! its identifier but none of its state.

use crate::error::Error;
use crate::metamodel::{AttributeKind, EntityDescriptor, Metamodel};
use crate::value::{Identifier, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

pub type EntityRef = Rc<RefCell<EntityInstance>>;
pub type CollectionRef = Rc<RefCell<PersistentCollection>>;

/// Identity of an entity within a persistence context: hierarchy root name
/// plus identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub root: String,
    pub id: Identifier,
}

impl EntityKey {
    pub fn new(root: impl Into<String>, id: Identifier) -> Self {
        Self {
            root: root.into(),
            id,
        }
    }

    pub fn of(descriptor: &EntityDescriptor, id: Identifier) -> Self {
        Self::new(descriptor.root_entity_name(), id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.root, self.id)
    }
}

/// Component values of an embedded attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddableValue {
    pub embeddable: String,
    pub values: Vec<(String, Value)>,
}

impl EmbeddableValue {
    pub fn new(embeddable: impl Into<String>) -> Self {
        Self {
            embeddable: embeddable.into(),
            values: Vec::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((name.into(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// State of one attribute.
#[derive(Clone)]
pub enum AttributeValue {
    Basic(Value),
    Embedded(Option<EmbeddableValue>),
    Reference(Option<EntityRef>),
    Collection(CollectionRef),
}

impl fmt::Debug for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Basic(v) => write!(f, "Basic({:?})", v),
            AttributeValue::Embedded(e) => write!(f, "Embedded({:?})", e),
            AttributeValue::Reference(None) => f.write_str("Reference(null)"),
            AttributeValue::Reference(Some(r)) => match r.try_borrow() {
                Ok(target) => write!(f, "Reference({})", target.describe()),
                Err(_) => f.write_str("Reference(<borrowed>)"),
            },
            AttributeValue::Collection(c) => match c.try_borrow() {
                Ok(c) => write!(f, "Collection({}, {} elements)", c.role, c.elements.len()),
                Err(_) => f.write_str("Collection(<borrowed>)"),
            },
        }
    }
}

/// One entity instance.
pub struct EntityInstance {
    descriptor: Arc<EntityDescriptor>,
    id: Option<Identifier>,
    /// One slot per descriptor attribute, in descriptor order.
    state: Vec<AttributeValue>,
    initialized: bool,
}

impl EntityInstance {
    /// A transient instance with null state.
    pub fn new(descriptor: Arc<EntityDescriptor>) -> Self {
        let state = descriptor
            .attributes
            .iter()
            .map(|a| match &a.kind {
                AttributeKind::Basic { .. } => AttributeValue::Basic(Value::Null),
                AttributeKind::Embedded { .. } => AttributeValue::Embedded(None),
                AttributeKind::ToOne { .. } => AttributeValue::Reference(None),
                AttributeKind::ToMany { .. } => AttributeValue::Collection(Rc::new(RefCell::new(
                    PersistentCollection::transient(a.collection_role().unwrap_or_default()),
                ))),
            })
            .collect();
        Self {
            descriptor,
            id: None,
            state,
            initialized: true,
        }
    }

    /// An uninitialized lazy reference.
    pub fn proxy(descriptor: Arc<EntityDescriptor>, id: Identifier) -> Self {
        let mut instance = Self::new(descriptor);
        instance.id = Some(id);
        instance.initialized = false;
        instance
    }

    pub fn into_ref(self) -> EntityRef {
        Rc::new(RefCell::new(self))
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    pub fn entity_name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn identifier(&self) -> Option<&Identifier> {
        self.id.as_ref()
    }

    pub fn key(&self) -> Option<EntityKey> {
        self.id
            .as_ref()
            .map(|id| EntityKey::of(&self.descriptor, id.clone()))
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Identifier taken from the identifier attributes, if none of them is null.
    pub fn identifier_from_state(&self) -> Option<Identifier> {
        let values: Vec<Value> = self
            .descriptor
            .identifier
            .attribute_names()
            .into_iter()
            .filter_map(|name| match self.slot(name) {
                Ok(AttributeValue::Basic(v)) => Some(v.clone()),
                _ => None,
            })
            .collect();
        if values.is_empty() || values.iter().any(Value::is_null) {
            None
        } else {
            Some(Identifier::new(values))
        }
    }

    pub(crate) fn assign_identifier(&mut self, id: Identifier) {
        self.id = Some(id);
    }

    /// Re-type an uninitialized reference once its concrete subtype is known.
    pub(crate) fn become_subtype(&mut self, descriptor: Arc<EntityDescriptor>) {
        if !self.initialized && descriptor.name != self.descriptor.name {
            let id = self.id.take();
            *self = Self::new(descriptor);
            self.id = id;
            self.initialized = false;
        }
    }

    pub(crate) fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    fn index(&self, name: &str) -> Result<usize, Error> {
        self.descriptor.attribute_index(name).ok_or_else(|| {
            Error::Mapping(format!(
                "{} has no attribute '{}'",
                self.descriptor.name, name
            ))
        })
    }

    fn slot(&self, name: &str) -> Result<&AttributeValue, Error> {
        let index = self.index(name)?;
        Ok(&self.state[index])
    }

    fn uninitialized(&self, name: &str) -> Error {
        Error::IllegalState(format!(
            "cannot read '{}' of uninitialized {}",
            name,
            self.describe()
        ))
    }

    pub fn get(&self, name: &str) -> Result<&AttributeValue, Error> {
        let slot = self.slot(name)?;
        if self.initialized {
            Ok(slot)
        } else {
            Err(self.uninitialized(name))
        }
    }

    /// Value of a basic attribute. Identifier attributes of a lazy reference
    /// are readable without initializing it.
    pub fn get_value(&self, name: &str) -> Result<Value, Error> {
        let slot = self.slot(name)?;
        if !self.initialized {
            return self
                .identifier_component(name)
                .ok_or_else(|| self.uninitialized(name));
        }
        match slot {
            AttributeValue::Basic(v) => Ok(v.clone()),
            other => Err(Error::Mapping(format!(
                "'{}' of {} is not a basic attribute ({:?})",
                name, self.descriptor.name, other
            ))),
        }
    }

    fn identifier_component(&self, name: &str) -> Option<Value> {
        let names = self.descriptor.identifier.attribute_names();
        let position = names.iter().position(|n| *n == name)?;
        self.id.as_ref()?.values().get(position).cloned()
    }

    pub fn get_reference(&self, name: &str) -> Result<Option<EntityRef>, Error> {
        match self.get(name)? {
            AttributeValue::Reference(r) => Ok(r.clone()),
            _ => Err(Error::Mapping(format!(
                "'{}' of {} is not a to-one association",
                name, self.descriptor.name
            ))),
        }
    }

    pub fn get_collection(&self, name: &str) -> Result<CollectionRef, Error> {
        match self.get(name)? {
            AttributeValue::Collection(c) => Ok(Rc::clone(c)),
            _ => Err(Error::Mapping(format!(
                "'{}' of {} is not a collection",
                name, self.descriptor.name
            ))),
        }
    }

    pub fn get_embedded(&self, name: &str) -> Result<Option<EmbeddableValue>, Error> {
        match self.get(name)? {
            AttributeValue::Embedded(e) => Ok(e.clone()),
            _ => Err(Error::Mapping(format!(
                "'{}' of {} is not embedded",
                name, self.descriptor.name
            ))),
        }
    }

    /// Replace the state of an attribute. The new value must have the
    /// attribute's shape; basic values are coerced to the column type.
    pub fn set(&mut self, name: &str, value: AttributeValue) -> Result<(), Error> {
        if !self.initialized {
            return Err(Error::IllegalState(format!(
                "cannot modify uninitialized {}",
                self.describe()
            )));
        }
        let index = self.index(name)?;
        let attribute = &self.descriptor.attributes[index];
        let value = match (&attribute.kind, value) {
            (AttributeKind::Basic { basic_type, .. }, AttributeValue::Basic(v)) => {
                let actual = v.type_name();
                let coerced = basic_type.coerce(v).ok_or_else(|| {
                    Error::Mapping(format!(
                        "{}.{} is {} but {} was given",
                        self.descriptor.name, name, basic_type, actual
                    ))
                })?;
                if coerced.is_null() && !attribute.nullable {
                    return Err(Error::Mapping(format!(
                        "{}.{} is not nullable",
                        self.descriptor.name, name
                    )));
                }
                AttributeValue::Basic(coerced)
            }
            (AttributeKind::Embedded { embeddable, .. }, AttributeValue::Embedded(e)) => {
                if let Some(e) = &e {
                    if e.embeddable != *embeddable {
                        return Err(Error::Mapping(format!(
                            "{}.{} holds {} values, not {}",
                            self.descriptor.name, name, embeddable, e.embeddable
                        )));
                    }
                }
                AttributeValue::Embedded(e)
            }
            (AttributeKind::ToOne { .. }, AttributeValue::Reference(r)) => AttributeValue::Reference(r),
            (AttributeKind::ToMany { .. }, AttributeValue::Collection(c)) => {
                AttributeValue::Collection(c)
            }
            (_, other) => {
                return Err(Error::Mapping(format!(
                    "{}.{} cannot hold {:?}",
                    self.descriptor.name, name, other
                )))
            }
        };
        self.state[index] = value;
        Ok(())
    }

    pub fn set_value(&mut self, name: &str, value: impl Into<Value>) -> Result<(), Error> {
        self.set(name, AttributeValue::Basic(value.into()))
    }

    pub fn set_reference(&mut self, name: &str, target: Option<EntityRef>) -> Result<(), Error> {
        self.set(name, AttributeValue::Reference(target))
    }

    pub fn set_embedded(&mut self, name: &str, value: Option<EmbeddableValue>) -> Result<(), Error> {
        self.set(name, AttributeValue::Embedded(value))
    }

    /// Overwrite a slot while hydrating, bypassing shape checks.
    pub(crate) fn hydrate(&mut self, index: usize, value: AttributeValue) {
        self.state[index] = value;
    }

    pub(crate) fn slots(&self) -> &[AttributeValue] {
        &self.state
    }

    /// State flattened to column values, one slot per attribute: basic values,
    /// embedded components, the target identifier of references, and nothing
    /// for collections. Used for dirty checking and second-level caching.
    pub fn disassemble(&self, metamodel: &Metamodel) -> Result<Vec<Vec<Value>>, Error> {
        let mut disassembled = Vec::with_capacity(self.state.len());
        for (attribute, value) in self.descriptor.attributes.iter().zip(&self.state) {
            let slot = match value {
                AttributeValue::Basic(v) => vec![v.clone()],
                AttributeValue::Embedded(embedded) => {
                    let descriptor = match &attribute.kind {
                        AttributeKind::Embedded { embeddable, .. } => {
                            metamodel.embeddable_descriptor(embeddable)?
                        }
                        _ => {
                            return Err(Error::Mapping(format!(
                                "{}.{} is not embedded",
                                self.descriptor.name, attribute.name
                            )))
                        }
                    };
                    descriptor
                        .attributes
                        .iter()
                        .map(|component| {
                            embedded
                                .as_ref()
                                .and_then(|e| e.get(&component.name).cloned())
                                .unwrap_or(Value::Null)
                        })
                        .collect()
                }
                AttributeValue::Reference(None) => vec![Value::Null],
                AttributeValue::Reference(Some(target)) => {
                    let target = target.try_borrow().map_err(|_| {
                        Error::IllegalState(format!(
                            "{}.{} target is being modified",
                            self.descriptor.name, attribute.name
                        ))
                    })?;
                    match target.identifier().cloned().or_else(|| target.identifier_from_state()) {
                        Some(id) => id.into_values(),
                        None => {
                            return Err(Error::IllegalState(format!(
                                "{}.{} references an instance without identifier",
                                self.descriptor.name, attribute.name
                            )))
                        }
                    }
                }
                AttributeValue::Collection(_) => Vec::new(),
            };
            disassembled.push(slot);
        }
        Ok(disassembled)
    }

    /// `Order#1` or `Order#<transient>`.
    pub fn describe(&self) -> String {
        match &self.id {
            Some(id) => format!("{}#{}", self.descriptor.name, id),
            None => format!("{}#<transient>", self.descriptor.name),
        }
    }
}

impl fmt::Debug for EntityInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(&self.descriptor.name);
        s.field("id", &self.id);
        if self.initialized {
            for (attribute, value) in self.descriptor.attributes.iter().zip(&self.state) {
                s.field(&attribute.name, value);
            }
        } else {
            s.field("initialized", &false);
        }
        s.finish()
    }
}

/// Elements of a one-to-many association owned by one entity.
#[derive(Debug)]
pub struct PersistentCollection {
    pub role: String,
    /// `None` until the owner has an identity.
    pub owner: Option<EntityKey>,
    elements: Vec<EntityRef>,
    initialized: bool,
}

impl PersistentCollection {
    /// An empty collection of a transient owner.
    pub fn transient(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            owner: None,
            elements: Vec::new(),
            initialized: true,
        }
    }

    /// A collection whose elements are still in the database.
    pub fn uninitialized(role: impl Into<String>, owner: EntityKey) -> Self {
        Self {
            role: role.into(),
            owner: Some(owner),
            elements: Vec::new(),
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn elements(&self) -> Result<&[EntityRef], Error> {
        if self.initialized {
            Ok(&self.elements)
        } else {
            Err(Error::IllegalState(format!(
                "collection {} of {} was not initialized",
                self.role,
                self.owner
                    .as_ref()
                    .map(|o| o.to_string())
                    .unwrap_or_else(|| "<transient>".to_string())
            )))
        }
    }

    pub fn len(&self) -> Result<usize, Error> {
        self.elements().map(|e| e.len())
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        self.elements().map(|e| e.is_empty())
    }

    /// Add an element unless the same instance is already present.
    pub fn add(&mut self, element: EntityRef) -> bool {
        if self.elements.iter().any(|e| Rc::ptr_eq(e, &element)) {
            return false;
        }
        self.elements.push(element);
        true
    }

    pub(crate) fn begin_loading(&mut self) {
        self.elements.clear();
    }

    pub(crate) fn mark_initialized(&mut self) {
        self.initialized = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::shop;

    fn order(metamodel: &Metamodel) -> EntityInstance {
        EntityInstance::new(Arc::clone(metamodel.entity_descriptor("Order").unwrap()))
    }

    #[test]
    fn basic_values_are_coerced() {
        let metamodel = shop();
        let mut order = order(&metamodel);
        order.set_value("id", 7).unwrap();
        order.set_value("total", 12).unwrap();
        assert_eq!(order.get_value("id").unwrap(), Value::Int64(7));
        assert_eq!(order.get_value("total").unwrap(), Value::Float64(12.0));
        assert_eq!(order.identifier_from_state(), Some(Identifier::simple(7i64)));
        assert!(matches!(
            order.set_value("total", "lots"),
            Err(Error::Mapping(_))
        ));
    }

    #[test]
    fn unknown_attributes_are_mapping_errors() {
        let metamodel = shop();
        let mut order = order(&metamodel);
        assert!(matches!(order.get_value("amount"), Err(Error::Mapping(_))));
        assert!(matches!(order.set_value("amount", 1), Err(Error::Mapping(_))));
    }

    #[test]
    fn proxies_expose_only_their_identifier() {
        let metamodel = shop();
        let proxy = EntityInstance::proxy(
            Arc::clone(metamodel.entity_descriptor("Customer").unwrap()),
            Identifier::simple(3i64),
        );
        assert!(!proxy.is_initialized());
        assert_eq!(proxy.get_value("id").unwrap(), Value::Int64(3));
        assert!(matches!(proxy.get_value("name"), Err(Error::IllegalState(_))));
    }

    #[test]
    fn disassembles_references_and_embeddables() {
        let metamodel = shop();
        let customer = EntityInstance::proxy(
            Arc::clone(metamodel.entity_descriptor("Customer").unwrap()),
            Identifier::simple(3i64),
        )
        .into_ref();
        let mut order = order(&metamodel);
        order.set_value("id", 1i64).unwrap();
        order.set_reference("customer", Some(customer)).unwrap();
        let state = order.disassemble(&metamodel).unwrap();
        let customer_slot = metamodel
            .entity_descriptor("Order")
            .unwrap()
            .attribute_index("customer")
            .unwrap();
        assert_eq!(state[customer_slot], vec![Value::Int64(3)]);

        let mut customer = EntityInstance::new(Arc::clone(
            metamodel.entity_descriptor("Customer").unwrap(),
        ));
        customer
            .set_embedded(
                "address",
                Some(EmbeddableValue::new("Address").with("city", "Oslo")),
            )
            .unwrap();
        let state = customer.disassemble(&metamodel).unwrap();
        let address_slot = metamodel
            .entity_descriptor("Customer")
            .unwrap()
            .attribute_index("address")
            .unwrap();
        assert_eq!(
            state[address_slot],
            vec![Value::String("Oslo".into()), Value::Null]
        );
    }

    #[test]
    fn uninitialized_collections_refuse_access() {
        let mut collection = PersistentCollection::uninitialized(
            "Order.lineItems",
            EntityKey::new("Order", Identifier::simple(1i64)),
        );
        assert!(matches!(collection.elements(), Err(Error::IllegalState(_))));
        collection.mark_initialized();
        assert_eq!(collection.len().unwrap(), 0);
    }
}
