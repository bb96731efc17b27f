//! Row assembly: turns result rows into entity instances, embeddables and
//! scalars, reconciling every entity with the persistence context.

use super::domain::{DomainResult, EntityResult, Fetch};
use super::instance::{
    AttributeValue, CollectionRef, EmbeddableValue, EntityInstance, EntityKey, EntityRef,
    PersistentCollection,
};
use crate::cache::{CacheEntry, EntityCacheAccess, Statistics};
use crate::error::Error;
use crate::metamodel::{
    AttributeDescriptor, AttributeKind, BasicType, EmbeddableDescriptor, EntityDescriptor,
    FetchStrategy, Metamodel,
};
use crate::session::PersistenceContext;
use crate::sql::{Expression, SelectStatement};
use crate::value::{Identifier, Value};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;
use tracing::trace;

/// Work left for after the current result set has been read: eager
/// associations that were not join fetched.
#[derive(Debug, Clone)]
pub enum PendingInitialization {
    Entity(EntityRef),
    Collection(CollectionRef),
}

/// One item of a result tuple.
#[derive(Debug, Clone)]
pub enum ResultItem {
    Value(Value),
    Entity(EntityRef),
    Embeddable(Option<EmbeddableValue>),
}

impl ResultItem {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ResultItem::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            ResultItem::Entity(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_embeddable(&self) -> Option<&EmbeddableValue> {
        match self {
            ResultItem::Embeddable(e) => e.as_ref(),
            _ => None,
        }
    }
}

/// One assembled result row.
#[derive(Debug, Clone)]
pub struct Tuple {
    items: Vec<ResultItem>,
    aliases: Rc<[Option<String>]>,
}

impl Tuple {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ResultItem> {
        self.items.get(index)
    }

    pub fn get_by_alias(&self, alias: &str) -> Option<&ResultItem> {
        self.aliases
            .iter()
            .position(|a| a.as_deref() == Some(alias))
            .and_then(|i| self.items.get(i))
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.get(index).and_then(ResultItem::as_value)
    }

    pub fn entity(&self, index: usize) -> Option<&EntityRef> {
        self.get(index).and_then(ResultItem::as_entity)
    }

    pub fn aliases(&self) -> &[Option<String>] {
        &self.aliases
    }

    pub fn items(&self) -> &[ResultItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<ResultItem> {
        self.items
    }
}

struct LoadingEntity {
    key: EntityKey,
    instance: EntityRef,
    from_cache: bool,
}

enum Resolution {
    /// Already known to the persistence context; its state is kept.
    Existing(EntityRef),
    /// Registered as loading; the caller hydrates it.
    Fresh(EntityRef),
}

fn borrow(instance: &EntityRef) -> Result<Ref<'_, EntityInstance>, Error> {
    instance
        .try_borrow()
        .map_err(|_| Error::IllegalState("entity instance is being modified".to_string()))
}

fn borrow_mut(instance: &EntityRef) -> Result<RefMut<'_, EntityInstance>, Error> {
    instance
        .try_borrow_mut()
        .map_err(|_| Error::IllegalState("entity instance is borrowed during loading".to_string()))
}

fn borrow_collection_mut(
    collection: &CollectionRef,
) -> Result<RefMut<'_, PersistentCollection>, Error> {
    collection
        .try_borrow_mut()
        .map_err(|_| Error::IllegalState("collection is borrowed during loading".to_string()))
}

fn embedded_value(embeddable: &EmbeddableDescriptor, values: Vec<Value>) -> Option<EmbeddableValue> {
    if values.iter().all(Value::is_null) {
        return None;
    }
    Some(EmbeddableValue {
        embeddable: embeddable.name.clone(),
        values: embeddable
            .attributes
            .iter()
            .map(|a| a.name.clone())
            .zip(values)
            .collect(),
    })
}

/// Session state seen by assembly: the persistence context, the optional
/// second-level cache, and everything started while reading one result set.
pub struct AssemblyContext<'s> {
    metamodel: &'s Metamodel,
    persistence: &'s mut PersistenceContext,
    statistics: &'s Statistics,
    cache: Option<EntityCacheAccess<'s>>,
    cache_reads: bool,
    read_only: bool,
    loading: Vec<LoadingEntity>,
    collections: Vec<CollectionRef>,
    pending: Vec<PendingInitialization>,
}

impl<'s> AssemblyContext<'s> {
    pub fn new(
        metamodel: &'s Metamodel,
        persistence: &'s mut PersistenceContext,
        statistics: &'s Statistics,
    ) -> Self {
        Self {
            metamodel,
            persistence,
            statistics,
            cache: None,
            cache_reads: true,
            read_only: false,
            loading: Vec::new(),
            collections: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn with_cache(mut self, cache: Option<EntityCacheAccess<'s>>) -> Self {
        self.cache = cache;
        self
    }

    /// Rows are hydrated from the database even when the second-level cache
    /// holds their state. The cache is still populated.
    pub fn skip_cache_reads(mut self) -> Self {
        self.cache_reads = false;
        self
    }

    /// Entities loaded by this assembly enter the context read-only.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    fn begin(&mut self, descriptor: &Arc<EntityDescriptor>, id: Identifier) -> Result<Resolution, Error> {
        let key = EntityKey::of(descriptor, id.clone());
        if let Some(entry) = self.persistence.entry(&key) {
            return Ok(Resolution::Existing(Rc::clone(&entry.instance)));
        }
        let instance = match self.persistence.take_proxy(&key) {
            Some(proxy) => {
                borrow_mut(&proxy)?.become_subtype(Arc::clone(descriptor));
                proxy
            }
            None => EntityInstance::proxy(Arc::clone(descriptor), id).into_ref(),
        };
        self.persistence.begin_loading(key.clone(), Rc::clone(&instance))?;
        self.loading.push(LoadingEntity {
            key,
            instance: Rc::clone(&instance),
            from_cache: false,
        });
        Ok(Resolution::Fresh(instance))
    }

    fn cached(&self, descriptor: &EntityDescriptor, id: &Identifier) -> Option<CacheEntry> {
        if !self.cache_reads {
            return None;
        }
        self.cache?
            .get(descriptor, id)
            .filter(|entry| entry.subclass == descriptor.name)
    }

    /// Resolve `id` from the second-level cache alone. `Ok(None)` means the
    /// caller has to go to the database.
    pub fn load_from_cache(
        &mut self,
        descriptor: &Arc<EntityDescriptor>,
        id: &Identifier,
    ) -> Result<Option<EntityRef>, Error> {
        let Some(cache) = self.cache else {
            return Ok(None);
        };
        let Some(entry) = cache.get(descriptor, id) else {
            return Ok(None);
        };
        let Some(concrete) = self.metamodel.find_entity_descriptor(&entry.subclass).cloned() else {
            return Ok(None);
        };
        if !self.metamodel.is_subtype_of(&concrete.name, &descriptor.name) {
            return Ok(None);
        }
        match self.begin(&concrete, id.clone())? {
            Resolution::Existing(instance) => Ok(Some(instance)),
            Resolution::Fresh(instance) => {
                let key = EntityKey::of(&concrete, id.clone());
                self.hydrate_from_cache(&instance, &concrete, &key, &entry)?;
                Ok(Some(instance))
            }
        }
    }

    fn hydrate_from_cache(
        &mut self,
        instance: &EntityRef,
        descriptor: &Arc<EntityDescriptor>,
        key: &EntityKey,
        entry: &CacheEntry,
    ) -> Result<(), Error> {
        if entry.disassembled_state.len() != descriptor.attributes.len() {
            return Err(Error::Cache(format!(
                "cached state of {} has {} slots, expected {}",
                key,
                entry.disassembled_state.len(),
                descriptor.attributes.len()
            )));
        }
        for (index, (attribute, slot)) in descriptor
            .attributes
            .iter()
            .zip(&entry.disassembled_state)
            .enumerate()
        {
            let value = match &attribute.kind {
                AttributeKind::Basic { .. } => {
                    AttributeValue::Basic(slot.first().cloned().unwrap_or(Value::Null))
                }
                AttributeKind::Embedded { embeddable, .. } => {
                    let embeddable = self.metamodel.embeddable_descriptor(embeddable)?;
                    AttributeValue::Embedded(embedded_value(embeddable, slot.clone()))
                }
                AttributeKind::ToOne { target, fetch, .. } => {
                    if slot.is_empty() || slot.iter().all(Value::is_null) {
                        AttributeValue::Reference(None)
                    } else {
                        let target = Arc::clone(self.metamodel.entity_descriptor(target)?);
                        AttributeValue::Reference(Some(self.reference(
                            &target,
                            Identifier::new(slot.clone()),
                            *fetch,
                        )))
                    }
                }
                AttributeKind::ToMany { fetch, .. } => AttributeValue::Collection(self.collection(
                    attribute,
                    key,
                    *fetch,
                )),
            };
            borrow_mut(instance)?.hydrate(index, value);
        }
        borrow_mut(instance)?.mark_initialized();
        if let Some(loading) = self.loading.iter_mut().find(|l| &l.key == key) {
            loading.from_cache = true;
        }
        trace!(%key, "assembled from second-level cache");
        Ok(())
    }

    /// The instance for a foreign key; eager targets not yet loaded are
    /// queued.
    fn reference(
        &mut self,
        target: &Arc<EntityDescriptor>,
        id: Identifier,
        strategy: FetchStrategy,
    ) -> EntityRef {
        let key = EntityKey::of(target, id.clone());
        let known = self.persistence.entry(&key).is_some();
        let reference = self.persistence.reference(target, id);
        if strategy == FetchStrategy::Eager && !known {
            self.pending
                .push(PendingInitialization::Entity(Rc::clone(&reference)));
        }
        reference
    }

    fn collection(
        &mut self,
        attribute: &AttributeDescriptor,
        owner: &EntityKey,
        strategy: FetchStrategy,
    ) -> CollectionRef {
        let role = attribute.collection_role().unwrap_or_default();
        let collection = Rc::new(RefCell::new(PersistentCollection::uninitialized(
            role,
            owner.clone(),
        )));
        if strategy == FetchStrategy::Eager {
            self.pending
                .push(PendingInitialization::Collection(Rc::clone(&collection)));
        }
        collection
    }

    fn is_filling(&self, collection: &CollectionRef) -> bool {
        self.collections.iter().any(|c| Rc::ptr_eq(c, collection))
    }

    /// Start filling `collection` from rows of this result set.
    pub(crate) fn fill(&mut self, collection: &CollectionRef) -> Result<(), Error> {
        if !self.is_filling(collection) {
            borrow_collection_mut(collection)?.begin_loading();
            self.collections.push(Rc::clone(collection));
        }
        Ok(())
    }

    /// Promote everything loaded to managed, populate the second-level cache
    /// and return eager work still to do. Loading entries are dropped again if
    /// any state cannot be snapshotted.
    pub fn finish(mut self) -> Result<Vec<PendingInitialization>, Error> {
        let loading = std::mem::take(&mut self.loading);
        let mut states = Vec::with_capacity(loading.len());
        for entity in &loading {
            let state = borrow(&entity.instance).and_then(|i| i.disassemble(self.metamodel));
            match state {
                Ok(state) => states.push(state),
                Err(e) => {
                    for entity in &loading {
                        self.persistence.abort_loading(&entity.key);
                    }
                    return Err(e);
                }
            }
        }

        for (entity, state) in loading.into_iter().zip(states) {
            let descriptor = Arc::clone(borrow(&entity.instance)?.descriptor());
            if !entity.from_cache {
                self.statistics.record_entity_load();
                if let Some(cache) = self.cache {
                    cache.put(
                        &descriptor,
                        &entity.key.id,
                        &CacheEntry::new(descriptor.name.clone(), state.clone()),
                    )?;
                }
            }
            self.persistence
                .finish_loading(&entity.key, state, self.read_only)?;
        }

        for collection in self.collections.drain(..) {
            borrow_collection_mut(&collection)?.mark_initialized();
            self.statistics.record_collection_load();
        }

        let mut pending: Vec<PendingInitialization> = Vec::new();
        for item in self.pending.drain(..) {
            let open = match &item {
                PendingInitialization::Entity(e) => e.try_borrow().map(|e| !e.is_initialized()).unwrap_or(false),
                PendingInitialization::Collection(c) => {
                    c.try_borrow().map(|c| !c.is_initialized()).unwrap_or(false)
                }
            };
            let duplicate = pending.iter().any(|p| match (p, &item) {
                (PendingInitialization::Entity(a), PendingInitialization::Entity(b)) => Rc::ptr_eq(a, b),
                (PendingInitialization::Collection(a), PendingInitialization::Collection(b)) => {
                    Rc::ptr_eq(a, b)
                }
                _ => false,
            });
            if open && !duplicate {
                pending.push(item);
            }
        }
        Ok(pending)
    }

    /// Drop every entry this assembly started loading.
    pub fn abort(mut self) {
        for entity in self.loading.drain(..) {
            self.persistence.abort_loading(&entity.key);
        }
    }
}

struct EntityAssembler {
    declared: Arc<EntityDescriptor>,
    identifier: Vec<usize>,
    discriminator: Option<usize>,
    fetches: Vec<FetchAssembler>,
}

enum FetchAssembler {
    Basic {
        attribute: String,
        position: usize,
    },
    Embedded {
        attribute: String,
        embeddable: Arc<EmbeddableDescriptor>,
        positions: Vec<usize>,
    },
    ToOneJoined {
        attribute: String,
        target: Box<EntityAssembler>,
    },
    ToOneDelayed {
        attribute: String,
        target: Arc<EntityDescriptor>,
        key: usize,
        strategy: FetchStrategy,
    },
    CollectionJoined {
        attribute: String,
        element: Box<EntityAssembler>,
    },
    CollectionDelayed {
        attribute: String,
        strategy: FetchStrategy,
    },
}

impl FetchAssembler {
    fn attribute(&self) -> &str {
        match self {
            FetchAssembler::Basic { attribute, .. }
            | FetchAssembler::Embedded { attribute, .. }
            | FetchAssembler::ToOneJoined { attribute, .. }
            | FetchAssembler::ToOneDelayed { attribute, .. }
            | FetchAssembler::CollectionJoined { attribute, .. }
            | FetchAssembler::CollectionDelayed { attribute, .. } => attribute,
        }
    }
}

fn creation(message: String) -> Error {
    Error::AssemblerCreation(message)
}

fn check_position(position: usize, width: usize, what: &str) -> Result<usize, Error> {
    if position < width {
        Ok(position)
    } else {
        Err(creation(format!(
            "{} reads selection {} but only {} are selected",
            what, position, width
        )))
    }
}

impl EntityAssembler {
    fn compile(metamodel: &Metamodel, result: &EntityResult, width: usize) -> Result<Self, Error> {
        let declared = Arc::clone(
            metamodel
                .entity_descriptor(&result.entity)
                .map_err(|e| creation(e.to_string()))?,
        );
        let expected = declared.identifier_columns().len();
        if result.identifier.is_empty() || result.identifier.len() != expected {
            return Err(creation(format!(
                "entity result {} selects {} identifier columns, {} expects {}",
                result.navigable_path,
                result.identifier.len(),
                declared.name,
                expected
            )));
        }
        let identifier = result
            .identifier
            .iter()
            .map(|&p| check_position(p, width, "identifier"))
            .collect::<Result<_, _>>()?;
        let discriminator = result
            .discriminator
            .map(|p| check_position(p, width, "discriminator"))
            .transpose()?;

        let mut fetches = Vec::with_capacity(result.fetches.len());
        for fetch in &result.fetches {
            let known = declared.attribute(fetch.attribute()).is_some()
                || metamodel
                    .concrete_subtypes(&declared.name)
                    .iter()
                    .any(|s| s.attribute(fetch.attribute()).is_some());
            if !known {
                return Err(creation(format!(
                    "{} has no attribute '{}'",
                    declared.name,
                    fetch.attribute()
                )));
            }
            fetches.push(match fetch {
                Fetch::Basic {
                    attribute,
                    position,
                    ..
                } => FetchAssembler::Basic {
                    attribute: attribute.clone(),
                    position: check_position(*position, width, attribute)?,
                },
                Fetch::Embedded {
                    attribute,
                    embeddable,
                    positions,
                } => {
                    let embeddable = Arc::clone(
                        metamodel
                            .embeddable_descriptor(embeddable)
                            .map_err(|e| creation(e.to_string()))?,
                    );
                    if positions.len() != embeddable.attributes.len() {
                        return Err(creation(format!(
                            "embedded '{}' selects {} of {} components",
                            attribute,
                            positions.len(),
                            embeddable.attributes.len()
                        )));
                    }
                    FetchAssembler::Embedded {
                        attribute: attribute.clone(),
                        embeddable,
                        positions: positions
                            .iter()
                            .map(|&p| check_position(p, width, attribute))
                            .collect::<Result<_, _>>()?,
                    }
                }
                Fetch::ToOneJoined { attribute, entity } => FetchAssembler::ToOneJoined {
                    attribute: attribute.clone(),
                    target: Box::new(Self::compile(metamodel, entity, width)?),
                },
                Fetch::ToOneDelayed {
                    attribute,
                    target,
                    key,
                    strategy,
                } => FetchAssembler::ToOneDelayed {
                    attribute: attribute.clone(),
                    target: Arc::clone(
                        metamodel
                            .entity_descriptor(target)
                            .map_err(|e| creation(e.to_string()))?,
                    ),
                    key: check_position(*key, width, attribute)?,
                    strategy: *strategy,
                },
                Fetch::CollectionJoined {
                    attribute, element, ..
                } => FetchAssembler::CollectionJoined {
                    attribute: attribute.clone(),
                    element: Box::new(Self::compile(metamodel, element, width)?),
                },
                Fetch::CollectionDelayed {
                    attribute, strategy, ..
                } => FetchAssembler::CollectionDelayed {
                    attribute: attribute.clone(),
                    strategy: *strategy,
                },
            });
        }

        Ok(Self {
            declared,
            identifier,
            discriminator,
            fetches,
        })
    }

    fn concrete(&self, row: &[Value], metamodel: &Metamodel) -> Result<Arc<EntityDescriptor>, Error> {
        let Some(position) = self.discriminator else {
            return Ok(Arc::clone(&self.declared));
        };
        let root = self.declared.root_entity_name();
        match &row[position] {
            Value::String(value) => metamodel
                .entity_for_discriminator(root, value)
                .cloned()
                .ok_or_else(|| {
                    Error::Mapping(format!("unknown discriminator value '{}' for {}", value, root))
                }),
            other => Err(Error::Mapping(format!(
                "invalid discriminator {:?} for {}",
                other, root
            ))),
        }
    }

    fn resolve(&self, row: &[Value], ctx: &mut AssemblyContext<'_>) -> Result<Option<EntityRef>, Error> {
        let values: Vec<Value> = self.identifier.iter().map(|&p| row[p].clone()).collect();
        if values.iter().all(Value::is_null) {
            return Ok(None);
        }
        let concrete = self.concrete(row, ctx.metamodel)?;
        let id = Identifier::new(values);
        match ctx.begin(&concrete, id.clone())? {
            Resolution::Existing(instance) => {
                self.contribute(row, &instance, ctx, true)?;
                Ok(Some(instance))
            }
            Resolution::Fresh(instance) => {
                let key = EntityKey::of(&concrete, id.clone());
                match ctx.cached(&concrete, &id) {
                    Some(entry) => {
                        ctx.hydrate_from_cache(&instance, &concrete, &key, &entry)?;
                        self.contribute(row, &instance, ctx, true)?;
                    }
                    None => {
                        self.hydrate(row, &instance, &concrete, &key, ctx)?;
                        self.contribute(row, &instance, ctx, false)?;
                    }
                }
                Ok(Some(instance))
            }
        }
    }

    fn hydrate(
        &self,
        row: &[Value],
        instance: &EntityRef,
        concrete: &Arc<EntityDescriptor>,
        key: &EntityKey,
        ctx: &mut AssemblyContext<'_>,
    ) -> Result<(), Error> {
        for fetch in &self.fetches {
            let Some(index) = concrete.attribute_index(fetch.attribute()) else {
                continue;
            };
            let value = match fetch {
                FetchAssembler::Basic { position, .. } => AttributeValue::Basic(row[*position].clone()),
                FetchAssembler::Embedded {
                    embeddable,
                    positions,
                    ..
                } => AttributeValue::Embedded(embedded_value(
                    embeddable,
                    positions.iter().map(|&p| row[p].clone()).collect(),
                )),
                FetchAssembler::ToOneJoined { target, .. } => {
                    AttributeValue::Reference(target.resolve(row, ctx)?)
                }
                FetchAssembler::ToOneDelayed {
                    target,
                    key: position,
                    strategy,
                    ..
                } => match &row[*position] {
                    Value::Null => AttributeValue::Reference(None),
                    value => AttributeValue::Reference(Some(ctx.reference(
                        target,
                        Identifier::simple(value.clone()),
                        *strategy,
                    ))),
                },
                FetchAssembler::CollectionJoined { .. } => {
                    let attribute = &concrete.attributes[index];
                    let collection = ctx.collection(attribute, key, FetchStrategy::Lazy);
                    ctx.fill(&collection)?;
                    AttributeValue::Collection(collection)
                }
                FetchAssembler::CollectionDelayed { strategy, .. } => {
                    let attribute = &concrete.attributes[index];
                    AttributeValue::Collection(ctx.collection(attribute, key, *strategy))
                }
            };
            borrow_mut(instance)?.hydrate(index, value);
        }
        borrow_mut(instance)?.mark_initialized();
        Ok(())
    }

    /// Add this row's join-fetched collection elements to `instance`.
    fn contribute(
        &self,
        row: &[Value],
        instance: &EntityRef,
        ctx: &mut AssemblyContext<'_>,
        include_to_one: bool,
    ) -> Result<(), Error> {
        let descriptor = {
            let instance = borrow(instance)?;
            if !instance.is_initialized() {
                return Ok(());
            }
            Arc::clone(instance.descriptor())
        };
        for fetch in &self.fetches {
            if descriptor.attribute_index(fetch.attribute()).is_none() {
                continue;
            }
            match fetch {
                FetchAssembler::CollectionJoined { attribute, element } => {
                    let collection = borrow(instance)?.get_collection(attribute)?;
                    let element = element.resolve(row, ctx)?;
                    let initialized = collection
                        .try_borrow()
                        .map(|c| c.is_initialized())
                        .unwrap_or(true);
                    if !initialized {
                        ctx.fill(&collection)?;
                    }
                    if ctx.is_filling(&collection) {
                        if let Some(element) = element {
                            borrow_collection_mut(&collection)?.add(element);
                        }
                    }
                }
                FetchAssembler::ToOneJoined { target, .. } if include_to_one => {
                    target.resolve(row, ctx)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

enum ItemAssembler {
    Basic(usize),
    Entity(EntityAssembler),
    Embeddable {
        embeddable: Arc<EmbeddableDescriptor>,
        positions: Vec<usize>,
    },
}

/// Assembles the rows of one select statement into [`Tuple`]s.
///
/// Built once per execution from the statement's domain results; creation
/// fails for results that cannot be assembled, before any row is read.
pub struct RowAssembler {
    items: Vec<ItemAssembler>,
    aliases: Rc<[Option<String>]>,
    column_types: Vec<Option<BasicType>>,
    deduplicate: bool,
    seen: HashSet<Vec<usize>>,
}

impl RowAssembler {
    pub fn new(metamodel: &Metamodel, statement: &SelectStatement) -> Result<Self, Error> {
        let width = statement.query_spec.selections.len();
        let mut column_types = vec![None; width];
        for selection in &statement.query_spec.selections {
            let ty = match &selection.expression {
                Expression::Column(column) => Some(column.jdbc_type),
                Expression::Literal { ty, .. } | Expression::Parameter { ty, .. } => *ty,
                _ => None,
            };
            if let Some(slot) = column_types.get_mut(selection.position) {
                *slot = ty;
            }
        }

        let mut items = Vec::with_capacity(statement.domain_results.len());
        for result in &statement.domain_results {
            items.push(match result {
                DomainResult::Basic { position, ty, .. } => {
                    let position = check_position(*position, width, "scalar result")?;
                    if ty.is_some() {
                        column_types[position] = *ty;
                    }
                    ItemAssembler::Basic(position)
                }
                DomainResult::Entity(entity) => {
                    ItemAssembler::Entity(EntityAssembler::compile(metamodel, entity, width)?)
                }
                DomainResult::Embeddable {
                    embeddable,
                    positions,
                    ..
                } => {
                    let embeddable = Arc::clone(
                        metamodel
                            .embeddable_descriptor(embeddable)
                            .map_err(|e| creation(e.to_string()))?,
                    );
                    if positions.len() != embeddable.attributes.len() {
                        return Err(creation(format!(
                            "embeddable {} result has {} of {} components",
                            embeddable.name,
                            positions.len(),
                            embeddable.attributes.len()
                        )));
                    }
                    ItemAssembler::Embeddable {
                        embeddable,
                        positions: positions
                            .iter()
                            .map(|&p| check_position(p, width, "embeddable result"))
                            .collect::<Result<_, _>>()?,
                    }
                }
                DomainResult::Collection { role } => {
                    return Err(creation(format!(
                        "plural attribute {} cannot be selected; join it instead",
                        role
                    )))
                }
            });
        }

        Ok(Self {
            items,
            aliases: statement
                .domain_results
                .iter()
                .map(|r| r.alias().map(str::to_owned))
                .collect::<Vec<_>>()
                .into(),
            column_types,
            deduplicate: statement.has_collection_fetch,
            seen: HashSet::new(),
        })
    }

    /// Type to read each selected column as.
    pub fn column_types(&self) -> &[Option<BasicType>] {
        &self.column_types
    }

    /// Assemble one row. With collection fetches the same owner spans several
    /// rows; only its first row yields a tuple.
    pub fn assemble(
        &mut self,
        row: &[Value],
        ctx: &mut AssemblyContext<'_>,
    ) -> Result<Option<Tuple>, Error> {
        let mut items = Vec::with_capacity(self.items.len());
        for item in &self.items {
            items.push(match item {
                ItemAssembler::Basic(position) => ResultItem::Value(row[*position].clone()),
                ItemAssembler::Entity(entity) => match entity.resolve(row, ctx)? {
                    Some(instance) => ResultItem::Entity(instance),
                    None => ResultItem::Value(Value::Null),
                },
                ItemAssembler::Embeddable {
                    embeddable,
                    positions,
                } => ResultItem::Embeddable(embedded_value(
                    embeddable,
                    positions.iter().map(|&p| row[p].clone()).collect(),
                )),
            });
        }

        if self.deduplicate {
            let identity: Vec<usize> = items
                .iter()
                .filter_map(|i| i.as_entity().map(|e| Rc::as_ptr(e) as usize))
                .collect();
            if !identity.is_empty() && !self.seen.insert(identity) {
                return Ok(None);
            }
        }
        Ok(Some(Tuple {
            items,
            aliases: Rc::clone(&self.aliases),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::session::EntityStatus;
    use crate::sql::{SqmToSqlConverter, Statement};
    use crate::sqm::{interpret, FunctionRegistry};
    use crate::testing::shop;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn select(metamodel: &Metamodel, query: &str) -> SelectStatement {
        let functions = FunctionRegistry::standard();
        let sqm = interpret(metamodel, &functions, query).unwrap();
        match SqmToSqlConverter::new(metamodel, &functions).convert(&sqm).unwrap() {
            Statement::Select(s) => s,
            other => panic!("expected a select, got {:?}", other),
        }
    }

    /// Build a row by `alias.column`; anything not named is null.
    fn row(statement: &SelectStatement, values: &[(&str, Value)]) -> Vec<Value> {
        let values: HashMap<&str, &Value> = values.iter().map(|(k, v)| (*k, v)).collect();
        let mut row = vec![Value::Null; statement.query_spec.selections.len()];
        for selection in &statement.query_spec.selections {
            if let Expression::Column(c) = &selection.expression {
                let name = format!("{}.{}", c.qualifier, c.column);
                if let Some(v) = values.get(name.as_str()) {
                    row[selection.position] = (*v).clone();
                }
            }
        }
        row
    }

    #[test]
    fn same_identity_yields_same_instance() {
        let metamodel = shop();
        let statistics = Statistics::new(true);
        let mut context = PersistenceContext::new();
        let statement = select(&metamodel, "select o from Order o");
        let mut assembler = RowAssembler::new(&metamodel, &statement).unwrap();

        let first = row(
            &statement,
            &[
                ("o1_0.id", Value::Int64(1)),
                ("o1_0.status", Value::String("open".into())),
                ("o1_0.customer_id", Value::Int64(9)),
            ],
        );
        let mut ctx = AssemblyContext::new(&metamodel, &mut context, &statistics);
        let a = assembler.assemble(&first, &mut ctx).unwrap().unwrap();
        let b = assembler.assemble(&first, &mut ctx).unwrap().unwrap();
        let pending = ctx.finish().unwrap();
        assert!(pending.is_empty());

        let (a, b) = (a.entity(0).unwrap(), b.entity(0).unwrap());
        assert!(Rc::ptr_eq(a, b));
        let order = a.borrow();
        assert_eq!(order.get_value("status").unwrap(), Value::String("open".into()));
        let customer = order.get_reference("customer").unwrap().unwrap();
        assert!(!customer.borrow().is_initialized());
        assert_eq!(customer.borrow().get_value("id").unwrap(), Value::Int64(9));
        assert!(!order
            .get_collection("lineItems")
            .unwrap()
            .borrow()
            .is_initialized());

        let key = order.key().unwrap();
        assert_eq!(context.status(&key), Some(EntityStatus::Managed));
        assert_eq!(statistics.snapshot().entity_loads, 1);
    }

    #[test]
    fn collection_fetch_spreads_over_rows() {
        let metamodel = shop();
        let statistics = Statistics::new(true);
        let mut context = PersistenceContext::new();
        let statement = select(&metamodel, "select o from Order o join fetch o.lineItems");
        let mut assembler = RowAssembler::new(&metamodel, &statement).unwrap();

        let line = |no: i32, product: &str| {
            row(
                &statement,
                &[
                    ("o1_0.id", Value::Int64(1)),
                    ("l1_0.order_id", Value::Int64(1)),
                    ("l1_0.line_no", Value::Int32(no)),
                    ("l1_0.product", Value::String(product.into())),
                ],
            )
        };

        let mut ctx = AssemblyContext::new(&metamodel, &mut context, &statistics);
        let mut tuples = Vec::new();
        for r in [line(1, "tea"), line(2, "milk")] {
            if let Some(t) = assembler.assemble(&r, &mut ctx).unwrap() {
                tuples.push(t);
            }
        }
        ctx.finish().unwrap();

        assert_eq!(tuples.len(), 1);
        let order = tuples[0].entity(0).unwrap().borrow();
        let items = order.get_collection("lineItems").unwrap();
        let items = items.borrow();
        assert_eq!(items.len().unwrap(), 2);
        let products: Vec<Value> = items
            .elements()
            .unwrap()
            .iter()
            .map(|e| e.borrow().get_value("product").unwrap())
            .collect();
        assert_eq!(
            products,
            vec![Value::String("tea".into()), Value::String("milk".into())]
        );
        assert_eq!(statistics.snapshot().collection_loads, 1);
    }

    #[test]
    fn discriminator_selects_subtype() {
        let metamodel = shop();
        let statistics = Statistics::new(false);
        let mut context = PersistenceContext::new();
        let statement = select(&metamodel, "select a from Animal a");
        let mut assembler = RowAssembler::new(&metamodel, &statement).unwrap();
        let dog = row(
            &statement,
            &[
                ("a1_0.id", Value::Int64(3)),
                ("a1_0.DTYPE", Value::String("Dog".into())),
                ("a1_0.breed", Value::String("collie".into())),
            ],
        );
        let mut ctx = AssemblyContext::new(&metamodel, &mut context, &statistics);
        let tuple = assembler.assemble(&dog, &mut ctx).unwrap().unwrap();
        ctx.finish().unwrap();

        let dog = tuple.entity(0).unwrap().borrow();
        assert_eq!(dog.entity_name(), "Dog");
        assert_eq!(dog.get_value("breed").unwrap(), Value::String("collie".into()));
        assert!(matches!(dog.get("lives"), Err(Error::Mapping(_))));

        let unknown = row(
            &statement,
            &[
                ("a1_0.id", Value::Int64(4)),
                ("a1_0.DTYPE", Value::String("Fish".into())),
            ],
        );
        let mut ctx = AssemblyContext::new(&metamodel, &mut context, &statistics);
        assert!(matches!(
            assembler.assemble(&unknown, &mut ctx),
            Err(Error::Mapping(_))
        ));
        ctx.abort();
        assert_eq!(context.len(), 1);
    }

    #[test]
    fn proxy_is_initialized_in_place() {
        let metamodel = shop();
        let statistics = Statistics::new(false);
        let mut context = PersistenceContext::new();
        let customer = Arc::clone(metamodel.entity_descriptor("Customer").unwrap());
        let proxy = context.reference(&customer, Identifier::simple(9i64));

        let statement = select(&metamodel, "select c from Customer c");
        let mut assembler = RowAssembler::new(&metamodel, &statement).unwrap();
        let r = row(
            &statement,
            &[
                ("c1_0.id", Value::Int64(9)),
                ("c1_0.name", Value::String("Ada".into())),
                ("c1_0.addr_city", Value::String("Paris".into())),
            ],
        );
        let mut ctx = AssemblyContext::new(&metamodel, &mut context, &statistics);
        let tuple = assembler.assemble(&r, &mut ctx).unwrap().unwrap();
        ctx.finish().unwrap();

        assert!(Rc::ptr_eq(tuple.entity(0).unwrap(), &proxy));
        let customer = proxy.borrow();
        assert!(customer.is_initialized());
        let address = customer.get_embedded("address").unwrap().unwrap();
        assert_eq!(address.get("city"), Some(&Value::String("Paris".into())));
        assert_eq!(address.get("zip"), Some(&Value::Null));
    }

    #[test]
    fn cached_state_is_used_and_written() {
        let metamodel = shop();
        let statistics = Statistics::new(true);
        let cache = InMemoryCache::new();
        let statement = select(&metamodel, "select c from Customer c");
        let r = row(
            &statement,
            &[
                ("c1_0.id", Value::Int64(5)),
                ("c1_0.name", Value::String("Grace".into())),
            ],
        );

        let mut first = PersistenceContext::new();
        let mut assembler = RowAssembler::new(&metamodel, &statement).unwrap();
        let mut ctx = AssemblyContext::new(&metamodel, &mut first, &statistics)
            .with_cache(Some(EntityCacheAccess::new(&cache, &statistics)));
        assembler.assemble(&r, &mut ctx).unwrap();
        ctx.finish().unwrap();
        assert_eq!(cache.region_size("Customer"), 1);

        let mut second = PersistenceContext::new();
        let customer = Arc::clone(metamodel.entity_descriptor("Customer").unwrap());
        let mut ctx = AssemblyContext::new(&metamodel, &mut second, &statistics)
            .with_cache(Some(EntityCacheAccess::new(&cache, &statistics)));
        let loaded = ctx
            .load_from_cache(&customer, &Identifier::simple(5i64))
            .unwrap()
            .unwrap();
        ctx.finish().unwrap();
        assert_eq!(
            loaded.borrow().get_value("name").unwrap(),
            Value::String("Grace".into())
        );
        let snapshot = statistics.snapshot();
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.entity_loads, 1);
    }

    #[test]
    fn plural_selection_cannot_be_assembled() {
        let metamodel = shop();
        let mut statement = select(&metamodel, "select c from Customer c");
        statement.domain_results = vec![DomainResult::Collection {
            role: "Customer.orders".into(),
        }];
        assert!(matches!(
            RowAssembler::new(&metamodel, &statement),
            Err(Error::AssemblerCreation(_))
        ));
    }

    #[test]
    fn scalars_keep_aliases() {
        let metamodel = shop();
        let statistics = Statistics::new(false);
        let mut context = PersistenceContext::new();
        let statement = select(&metamodel, "select o.status as s, o.total from Order o");
        let mut assembler = RowAssembler::new(&metamodel, &statement).unwrap();
        assert_eq!(
            assembler.column_types(),
            &[Some(BasicType::String), Some(BasicType::Double)]
        );
        let r = vec![Value::String("open".into()), Value::Float64(2.5)];
        let mut ctx = AssemblyContext::new(&metamodel, &mut context, &statistics);
        let tuple = assembler.assemble(&r, &mut ctx).unwrap().unwrap();
        ctx.finish().unwrap();
        assert_eq!(
            tuple.get_by_alias("s").and_then(ResultItem::as_value),
            Some(&Value::String("open".into()))
        );
        assert_eq!(tuple.value(1), Some(&Value::Float64(2.5)));
        assert!(context.is_empty());
    }
}
