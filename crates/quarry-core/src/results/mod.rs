//! Domain results and their assembly into managed instances.

mod domain;
mod initializer;
mod instance;

pub use domain::{DomainResult, EntityResult, Fetch};
pub use initializer::{AssemblyContext, PendingInitialization, ResultItem, RowAssembler, Tuple};
pub use instance::{
    AttributeValue, CollectionRef, EmbeddableValue, EntityInstance, EntityKey, EntityRef,
    PersistentCollection,
};
