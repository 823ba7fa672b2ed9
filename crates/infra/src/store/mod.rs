//! Entity store boundary.
//!
//! The trait carries the relationship semantics (cascades, idempotent links,
//! keyset listings); backends only decide how rows are kept.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{CascadeStep, InMemoryEntityStore};
pub use postgres::PostgresEntityStore;
pub use r#trait::{Association, EntityStore, Listing};
