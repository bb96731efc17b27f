//! Descriptions of what a query fetches, expressed as selection positions.

use crate::metamodel::{BasicType, FetchStrategy};
use crate::path::NavigablePath;

/// One item of a query's result tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainResult {
    Basic {
        position: usize,
        /// `None` reads the column with its natural type.
        ty: Option<BasicType>,
        alias: Option<String>,
    },
    Entity(EntityResult),
    Embeddable {
        embeddable: String,
        /// Component positions in embeddable attribute order.
        positions: Vec<usize>,
        alias: Option<String>,
    },
    /// A plural attribute selected as a whole; never assembled.
    Collection { role: String },
}

impl DomainResult {
    pub fn alias(&self) -> Option<&str> {
        match self {
            DomainResult::Basic { alias, .. } | DomainResult::Embeddable { alias, .. } => {
                alias.as_deref()
            }
            DomainResult::Entity(e) => e.alias.as_deref(),
            DomainResult::Collection { .. } => None,
        }
    }
}

/// An entity read from a table group.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityResult {
    /// Entity named in the query; rows may hold any concrete subtype.
    pub entity: String,
    pub navigable_path: NavigablePath,
    /// Identifier column positions in identifier order.
    pub identifier: Vec<usize>,
    pub discriminator: Option<usize>,
    /// Attributes of the entity and all of its subtypes.
    pub fetches: Vec<Fetch>,
    pub alias: Option<String>,
}

impl EntityResult {
    pub fn fetch(&self, attribute: &str) -> Option<&Fetch> {
        self.fetches.iter().find(|f| f.attribute() == attribute)
    }

    /// Whether any fetch, at any depth, join-fetches a collection.
    pub fn has_collection_fetch(&self) -> bool {
        self.fetches.iter().any(|f| match f {
            Fetch::CollectionJoined { .. } => true,
            Fetch::ToOneJoined { entity, .. } => entity.has_collection_fetch(),
            _ => false,
        })
    }
}

/// How one attribute of an entity result is obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetch {
    Basic {
        attribute: String,
        position: usize,
        ty: BasicType,
    },
    Embedded {
        attribute: String,
        embeddable: String,
        positions: Vec<usize>,
    },
    /// The target's columns are in the same row.
    ToOneJoined {
        attribute: String,
        entity: Box<EntityResult>,
    },
    /// Only the foreign key is selected; the target is resolved afterwards.
    ToOneDelayed {
        attribute: String,
        target: String,
        key: usize,
        strategy: FetchStrategy,
    },
    /// Elements arrive one per row, spread across rows of the same owner.
    CollectionJoined {
        attribute: String,
        role: String,
        element: Box<EntityResult>,
    },
    CollectionDelayed {
        attribute: String,
        role: String,
        strategy: FetchStrategy,
    },
}

impl Fetch {
    pub fn attribute(&self) -> &str {
        match self {
            Fetch::Basic { attribute, .. }
            | Fetch::Embedded { attribute, .. }
            | Fetch::ToOneJoined { attribute, .. }
            | Fetch::ToOneDelayed { attribute, .. }
            | Fetch::CollectionJoined { attribute, .. }
            | Fetch::CollectionDelayed { attribute, .. } => attribute,
        }
    }
}
