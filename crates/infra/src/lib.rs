//! Infrastructure layer: entity storage, keyset listings and policy resolution.

pub mod resolver;
pub mod store;

pub use resolver::{PolicyQuery, PolicyScope, PolicySource};
pub use store::{
    Association, CascadeStep, EntityStore, InMemoryEntityStore, Listing, PostgresEntityStore,
};
