//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::id::MaterialId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every variant carries enough structured detail (kind, identifiers, amounts)
/// to render a precise message. Infrastructure failures belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or contradictory input (e.g. both material and product given).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A referenced session/order/material/warehouse/record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The actor does not own the resource.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// No resolvable actor identity.
    #[error("unauthorized")]
    Unauthorized,

    /// Requested consumption exceeds the available quantity.
    #[error(
        "insufficient stock for material {material_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        material_id: MaterialId,
        requested: Decimal,
        available: Decimal,
    },

    /// The resource is not in a state that permits the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An exclusive transition was already taken by another writer.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotFound { .. } => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Unauthorized => "unauthorized",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::InvalidState(_) => "invalid_state",
            Self::Conflict(_) => "conflict",
        }
    }
}
