//! Narrow ports to the collaborators this subsystem consumes, with in-memory
//! implementations for tests and local runs.

use thiserror::Error;

pub mod actor;
pub mod address;
pub mod cart;
pub mod catalog;

pub use actor::{ActorResolver, ContextActorResolver};
pub use address::{AddressBook, InMemoryAddressBook};
pub use cart::{CartLine, CartSource, InMemoryCarts};
pub use catalog::{Catalog, CatalogEntry, InMemoryCatalog};

/// A collaborator could not answer (as opposed to answering "not found").
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{collaborator} unavailable: {message}")]
pub struct CollaboratorError {
    pub collaborator: &'static str,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self {
            collaborator,
            message: message.into(),
        }
    }
}
