//! Sparse override payloads.
//!
//! Every field is optional: `None` means "inherit from the default variant".
//! Fields are grouped by category so that pricing and stock never leak into
//! the basic comparison used by the status classifier.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{ExternalImageId, MediaId};
use crate::sku::{validate_name, validate_position, validate_sku};
use crate::variant::{AttributeSet, VariantDraft};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicFields {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub is_default: Option<bool>,
    pub position: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingFields {
    pub price_impact_cents: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockFields {
    pub quantity: Option<i64>,
    pub minimal_quantity: Option<u32>,
}

/// Staged edits reference internal media; committed tenant overrides carry
/// the tenant's own image ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSelection {
    Media(Vec<MediaId>),
    External(Vec<ExternalImageId>),
}

impl ImageSelection {
    pub fn len(&self) -> usize {
        match self {
            ImageSelection::Media(ids) => ids.len(),
            ImageSelection::External(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFields {
    pub images: Option<ImageSelection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldCategory {
    Basic,
    Pricing,
    Stock,
    Media,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OverrideField {
    Sku,
    Name,
    IsActive,
    IsDefault,
    Position,
    Attributes,
    PriceImpact,
    Quantity,
    MinimalQuantity,
    Images,
}

impl OverrideField {
    pub const ALL: [OverrideField; 10] = [
        OverrideField::Sku,
        OverrideField::Name,
        OverrideField::IsActive,
        OverrideField::IsDefault,
        OverrideField::Position,
        OverrideField::Attributes,
        OverrideField::PriceImpact,
        OverrideField::Quantity,
        OverrideField::MinimalQuantity,
        OverrideField::Images,
    ];

    pub fn category(self) -> FieldCategory {
        match self {
            OverrideField::Sku
            | OverrideField::Name
            | OverrideField::IsActive
            | OverrideField::IsDefault
            | OverrideField::Position
            | OverrideField::Attributes => FieldCategory::Basic,
            OverrideField::PriceImpact => FieldCategory::Pricing,
            OverrideField::Quantity | OverrideField::MinimalQuantity => FieldCategory::Stock,
            OverrideField::Images => FieldCategory::Media,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OverrideField::Sku => "sku",
            OverrideField::Name => "name",
            OverrideField::IsActive => "is_active",
            OverrideField::IsDefault => "is_default",
            OverrideField::Position => "position",
            OverrideField::Attributes => "attributes",
            OverrideField::PriceImpact => "price_impact",
            OverrideField::Quantity => "quantity",
            OverrideField::MinimalQuantity => "minimal_quantity",
            OverrideField::Images => "images",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverridePayload {
    pub basic: BasicFields,
    pub attributes: Option<AttributeSet>,
    pub pricing: PricingFields,
    pub stock: StockFields,
    pub media: MediaFields,
}

impl OverridePayload {
    /// Every field populated from a full draft. Used when a tenant-only create
    /// becomes an `ADD` override.
    pub fn from_draft(draft: &VariantDraft) -> Self {
        Self {
            basic: BasicFields {
                sku: Some(draft.sku.clone()),
                name: Some(draft.name.clone()),
                is_active: Some(draft.is_active),
                is_default: Some(draft.is_default),
                position: Some(draft.position),
            },
            attributes: Some(draft.attributes.clone()),
            media: MediaFields {
                images: Some(ImageSelection::Media(draft.images.clone())),
            },
            ..Default::default()
        }
    }

    pub fn contains(&self, field: OverrideField) -> bool {
        match field {
            OverrideField::Sku => self.basic.sku.is_some(),
            OverrideField::Name => self.basic.name.is_some(),
            OverrideField::IsActive => self.basic.is_active.is_some(),
            OverrideField::IsDefault => self.basic.is_default.is_some(),
            OverrideField::Position => self.basic.position.is_some(),
            OverrideField::Attributes => self.attributes.is_some(),
            OverrideField::PriceImpact => self.pricing.price_impact_cents.is_some(),
            OverrideField::Quantity => self.stock.quantity.is_some(),
            OverrideField::MinimalQuantity => self.stock.minimal_quantity.is_some(),
            OverrideField::Images => self.media.images.is_some(),
        }
    }

    pub fn present_fields(&self) -> Vec<OverrideField> {
        OverrideField::ALL
            .into_iter()
            .filter(|field| self.contains(*field))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.present_fields().is_empty()
    }

    /// Field-wise merge; fields present in `incoming` win.
    pub fn merge(&mut self, incoming: OverridePayload) {
        fn take<T>(slot: &mut Option<T>, incoming: Option<T>) {
            if incoming.is_some() {
                *slot = incoming;
            }
        }
        take(&mut self.basic.sku, incoming.basic.sku);
        take(&mut self.basic.name, incoming.basic.name);
        take(&mut self.basic.is_active, incoming.basic.is_active);
        take(&mut self.basic.is_default, incoming.basic.is_default);
        take(&mut self.basic.position, incoming.basic.position);
        take(&mut self.attributes, incoming.attributes);
        take(
            &mut self.pricing.price_impact_cents,
            incoming.pricing.price_impact_cents,
        );
        take(&mut self.stock.quantity, incoming.stock.quantity);
        take(&mut self.stock.minimal_quantity, incoming.stock.minimal_quantity);
        take(&mut self.media.images, incoming.media.images);
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if let Some(sku) = &self.basic.sku {
            validate_sku(sku)?;
        }
        if let Some(name) = &self.basic.name {
            validate_name(name)?;
        }
        if let Some(position) = self.basic.position {
            validate_position(position)?;
        }
        if self.stock.quantity.is_some_and(|quantity| quantity < 0) {
            return Err(CoreError::validation("quantity", "must not be negative"));
        }
        Ok(())
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    /// Content hash of the payload, stored after a successful push so a
    /// re-run with identical content can skip the external write.
    pub fn fingerprint(&self) -> Result<[u8; 32], CoreError> {
        Ok(*blake3::hash(&self.to_msgpack()?).as_bytes())
    }
}
