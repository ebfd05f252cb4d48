//! Line-item and seller references shared by checkout, orders and inventory.
//!
//! Both are tagged variants: an item is a material *or* a product, a seller is a
//! supplier *or* a designer. The "both set" and "neither set" states cannot be
//! represented.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::id::{DesignerId, MaterialId, ProductId, SupplierId};
use crate::value_object::ValueObject;

/// What a line item refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ItemRef {
    Material(MaterialId),
    Product(ProductId),
}

impl ItemRef {
    /// Build a reference from the two optional ids a request carries.
    ///
    /// Exactly one must be present.
    pub fn from_parts(
        material_id: Option<MaterialId>,
        product_id: Option<ProductId>,
    ) -> DomainResult<Self> {
        match (material_id, product_id) {
            (Some(m), None) => Ok(Self::Material(m)),
            (None, Some(p)) => Ok(Self::Product(p)),
            (Some(_), Some(_)) => Err(DomainError::invalid_request(
                "exactly one of material_id or product_id must be provided, got both",
            )),
            (None, None) => Err(DomainError::invalid_request(
                "exactly one of material_id or product_id must be provided, got neither",
            )),
        }
    }

    pub fn material_id(&self) -> Option<MaterialId> {
        match self {
            Self::Material(id) => Some(*id),
            Self::Product(_) => None,
        }
    }

    pub fn product_id(&self) -> Option<ProductId> {
        match self {
            Self::Product(id) => Some(*id),
            Self::Material(_) => None,
        }
    }

    /// Stable label for the item kind ("material" / "product").
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Material(_) => "material",
            Self::Product(_) => "product",
        }
    }
}

impl core::fmt::Display for ItemRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Material(id) => write!(f, "material:{id}"),
            Self::Product(id) => write!(f, "product:{id}"),
        }
    }
}

impl ValueObject for ItemRef {}

/// Kind of seller.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    Supplier,
    Designer,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supplier => "Supplier",
            Self::Designer => "Designer",
        }
    }
}

impl core::str::FromStr for ProviderKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "supplier" => Ok(Self::Supplier),
            "designer" => Ok(Self::Designer),
            other => Err(DomainError::invalid_request(format!(
                "unknown provider type '{other}' (expected Supplier or Designer)"
            ))),
        }
    }
}

/// The seller of a line item. This is the grouping key of a split.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id")]
pub enum Provider {
    Supplier(SupplierId),
    Designer(DesignerId),
}

impl Provider {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Supplier(_) => ProviderKind::Supplier,
            Self::Designer(_) => ProviderKind::Designer,
        }
    }

    /// Untyped id, used to match filters that accept either kind.
    pub fn raw_id(&self) -> Uuid {
        match self {
            Self::Supplier(id) => *id.as_uuid(),
            Self::Designer(id) => *id.as_uuid(),
        }
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        match self {
            Self::Supplier(id) => Some(*id),
            Self::Designer(_) => None,
        }
    }

    pub fn designer_id(&self) -> Option<DesignerId> {
        match self {
            Self::Designer(id) => Some(*id),
            Self::Supplier(_) => None,
        }
    }
}

impl core::fmt::Display for Provider {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Supplier(id) => write!(f, "supplier:{id}"),
            Self::Designer(id) => write!(f, "designer:{id}"),
        }
    }
}

impl ValueObject for Provider {}

/// Narrows a set of items to one seller.
///
/// `id` matches either a supplier id or a designer id; `kind`, when given,
/// additionally pins the seller kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderFilter {
    pub id: Option<Uuid>,
    pub kind: Option<ProviderKind>,
}

impl ProviderFilter {
    pub fn by_id(id: Uuid) -> Self {
        Self {
            id: Some(id),
            kind: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.kind.is_none()
    }

    pub fn matches(&self, provider: &Provider) -> bool {
        let id_ok = self.id.is_none_or(|id| provider.raw_id() == id);
        let kind_ok = self.kind.is_none_or(|kind| provider.kind() == kind);
        id_ok && kind_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_ref_requires_exactly_one_id() {
        let m = MaterialId::new();
        let p = ProductId::new();

        assert_eq!(ItemRef::from_parts(Some(m), None).unwrap(), ItemRef::Material(m));
        assert_eq!(ItemRef::from_parts(None, Some(p)).unwrap(), ItemRef::Product(p));
        assert!(matches!(
            ItemRef::from_parts(Some(m), Some(p)),
            Err(DomainError::InvalidRequest(_))
        ));
        assert!(matches!(
            ItemRef::from_parts(None, None),
            Err(DomainError::InvalidRequest(_))
        ));
    }

    #[test]
    fn provider_filter_matches_either_kind_by_raw_id() {
        let supplier = SupplierId::new();
        let designer = DesignerId::new();

        let by_supplier = ProviderFilter::by_id(*supplier.as_uuid());
        assert!(by_supplier.matches(&Provider::Supplier(supplier)));
        assert!(!by_supplier.matches(&Provider::Designer(designer)));

        let pinned = ProviderFilter {
            id: Some(*supplier.as_uuid()),
            kind: Some(ProviderKind::Designer),
        };
        assert!(!pinned.matches(&Provider::Supplier(supplier)));

        assert!(ProviderFilter::default().matches(&Provider::Designer(designer)));
    }

    #[test]
    fn provider_kind_parses_case_insensitively() {
        assert_eq!("supplier".parse::<ProviderKind>().unwrap(), ProviderKind::Supplier);
        assert_eq!("Designer".parse::<ProviderKind>().unwrap(), ProviderKind::Designer);
        assert!("vendor".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn item_ref_serializes_as_tagged_variant() {
        let id = MaterialId::new();
        let json = serde_json::to_value(ItemRef::Material(id)).unwrap();
        assert_eq!(json["kind"], "material");
        assert_eq!(json["id"], id.to_string());
    }
}
