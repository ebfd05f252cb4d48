use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use atelier_core::{AddressId, UserId};

use super::CollaboratorError;

/// Formats a shopper's saved address.
#[async_trait]
pub trait AddressBook: Send + Sync {
    /// `Ok(None)` when the address does not exist or belongs to someone else.
    async fn format(
        &self,
        address_id: AddressId,
        shopper_id: UserId,
    ) -> Result<Option<String>, CollaboratorError>;
}

#[derive(Debug, Default)]
pub struct InMemoryAddressBook {
    addresses: RwLock<HashMap<AddressId, (UserId, String)>>,
}

impl InMemoryAddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, address_id: AddressId, shopper_id: UserId, formatted: impl Into<String>) {
        if let Ok(mut addresses) = self.addresses.write() {
            addresses.insert(address_id, (shopper_id, formatted.into()));
        }
    }
}

#[async_trait]
impl AddressBook for InMemoryAddressBook {
    async fn format(
        &self,
        address_id: AddressId,
        shopper_id: UserId,
    ) -> Result<Option<String>, CollaboratorError> {
        let addresses = self
            .addresses
            .read()
            .map_err(|_| CollaboratorError::new("address book", "lock poisoned"))?;
        Ok(addresses
            .get(&address_id)
            .filter(|(owner, _)| *owner == shopper_id)
            .map(|(_, text)| text.clone()))
    }
}
