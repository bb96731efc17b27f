//! Runtime metamodel.
//!
//! Descriptors are immutable once the [`Metamodel`] is built and are shared
//! through `Arc` by the session factory and every session it opens.
//! Capabilities shared between descriptor kinds are expressed as small
//! traits rather than a type hierarchy.

mod attribute;
mod boot;
mod entity;
mod runtime;
mod types;

pub use attribute::{AttributeDescriptor, AttributeKind, ColumnMapping, FetchStrategy};
pub use boot::{BootModel, EmbeddableMapping, EntityMapping, InheritanceMapping};
pub use entity::{
    CollectionDescriptor, EmbeddableDescriptor, EntityDescriptor, EntityHierarchy,
    IdentifierDescriptor, InheritanceStrategy, SecondaryTable,
};
pub use runtime::{Metamodel, MetamodelBuilder, NavigableRef, DEFAULT_DISCRIMINATOR_COLUMN};
pub use types::{BasicType, ExpressableType};

/// Anything that can appear as a segment of a navigable path.
pub trait Navigable {
    fn navigable_name(&self) -> &str;

    fn expressable_type(&self) -> ExpressableType;
}

/// Something that can be fetched eagerly or lazily.
pub trait Fetchable {
    fn fetch_strategy(&self) -> FetchStrategy;

    fn is_association(&self) -> bool;
}

/// Something backed by one or more columns.
pub trait HasColumns {
    fn column_mappings(&self) -> Vec<ColumnMapping>;
}
