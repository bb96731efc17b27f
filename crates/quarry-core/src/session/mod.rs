//! Sessions, their persistence context, and the factory that opens them.
//!
//! A [`SessionFactory`] is built once and shared across threads. Each
//! [`Session`] is confined to one thread and owns its connection.

mod factory;
mod flush;
mod persistence_context;
mod query;
#[allow(clippy::module_inception)]
mod session;

pub use factory::{Database, SessionFactory, SessionFactoryBuilder};
pub use persistence_context::{EntityEntry, EntityStatus, LoadedState, PersistenceContext};
pub use query::Query;
pub use session::Session;
