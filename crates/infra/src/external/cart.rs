use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use atelier_core::{ItemRef, UserId};

use super::CollaboratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub item: ItemRef,
    pub quantity: u32,
}

/// The shopper's single active cart.
#[async_trait]
pub trait CartSource: Send + Sync {
    /// Lines of the active cart; empty when the shopper has none.
    async fn active_cart(&self, shopper_id: UserId) -> Result<Vec<CartLine>, CollaboratorError>;
}

#[derive(Debug, Default)]
pub struct InMemoryCarts {
    carts: RwLock<HashMap<UserId, Vec<CartLine>>>,
}

impl InMemoryCarts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, shopper_id: UserId, lines: Vec<CartLine>) {
        if let Ok(mut carts) = self.carts.write() {
            carts.insert(shopper_id, lines);
        }
    }
}

#[async_trait]
impl CartSource for InMemoryCarts {
    async fn active_cart(&self, shopper_id: UserId) -> Result<Vec<CartLine>, CollaboratorError> {
        let carts = self
            .carts
            .read()
            .map_err(|_| CollaboratorError::new("cart", "lock poisoned"))?;
        Ok(carts.get(&shopper_id).cloned().unwrap_or_default())
    }
}
