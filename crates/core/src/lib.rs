//! `sluice-core`: domain building blocks of the authorization-data service.
//!
//! This crate contains **pure domain** types: natural keys, entity records,
//! policy documents, keyset page math and the error taxonomy. No I/O.

pub mod entity;
pub mod error;
pub mod id;
pub mod model;
pub mod page;
pub mod policy;

pub use entity::{Entity, EntityKind};
pub use error::{Error, Result};
pub use id::{AccessKeyId, GroupName, PolicyName, Username};
pub use model::{Credential, Group, NewPolicy, NewUser, Policy, SecretAccessKey, User};
pub use page::{Page, PageRequest};
pub use policy::{Effect, PolicyDocument, PolicyStatement};
