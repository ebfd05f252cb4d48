use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use atelier_core::{DesignerId, DomainError, DomainResult, Entity, WarehouseId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseKind {
    Product,
    Material,
}

impl WarehouseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Material => "material",
        }
    }

    pub fn parse(label: &str) -> DomainResult<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "product" => Ok(Self::Product),
            "material" => Ok(Self::Material),
            other => Err(DomainError::invalid_request(format!(
                "unknown warehouse kind '{other}'"
            ))),
        }
    }
}

/// A designer-owned stock location. Each designer has at most one
/// material warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub designer_id: DesignerId,
    pub kind: WarehouseKind,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Warehouse {
    pub fn register(
        id: WarehouseId,
        designer_id: DesignerId,
        kind: WarehouseKind,
        name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::invalid_request("warehouse name is required"));
        }
        Ok(Self {
            id,
            designer_id,
            kind,
            name: name.trim().to_string(),
            created_at: now,
        })
    }
}

impl Entity for Warehouse {
    type Id = WarehouseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
