use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::*;
use crate::payload::{ImageSelection, OverridePayload};
use crate::sku::{validate_name, validate_position, validate_sku};

/// Attribute type -> selected value, e.g. color -> red.
pub type AttributeSet = BTreeMap<AttributeTypeId, AttributeValueId>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub is_variant_master: bool,
    pub default_variant_id: Option<VariantId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub variant_id: VariantId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub is_active: bool,
    pub is_default: bool,
    pub position: i32,
    pub attributes: AttributeSet,
    pub images: Vec<MediaId>,
    pub deleted: bool,
}

impl Variant {
    /// Applies the present fields of a sparse payload in place.
    /// External image selections are ignored here; they only exist for tenant rows.
    pub fn apply(&mut self, payload: &OverridePayload) {
        let basic = &payload.basic;
        if let Some(sku) = &basic.sku {
            self.sku = sku.clone();
        }
        if let Some(name) = &basic.name {
            self.name = name.clone();
        }
        if let Some(is_active) = basic.is_active {
            self.is_active = is_active;
        }
        if let Some(is_default) = basic.is_default {
            self.is_default = is_default;
        }
        if let Some(position) = basic.position {
            self.position = position;
        }
        if let Some(attributes) = &payload.attributes {
            self.attributes = attributes.clone();
        }
        if let Some(ImageSelection::Media(ids)) = &payload.media.images {
            self.images = ids.clone();
        }
    }
}

/// Complete field set for a variant that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDraft {
    pub sku: String,
    pub name: String,
    pub is_active: bool,
    pub is_default: bool,
    pub position: i32,
    pub attributes: AttributeSet,
    pub images: Vec<MediaId>,
}

impl VariantDraft {
    pub fn new(sku: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            sku: sku.into(),
            name: name.into(),
            is_active: true,
            is_default: false,
            position: 0,
            attributes: AttributeSet::new(),
            images: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, type_id: AttributeTypeId, value_id: AttributeValueId) -> Self {
        self.attributes.insert(type_id, value_id);
        self
    }

    pub fn with_position(mut self, position: i32) -> Self {
        self.position = position;
        self
    }

    pub fn with_images(mut self, images: Vec<MediaId>) -> Self {
        self.images = images;
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        validate_sku(&self.sku)?;
        validate_name(&self.name)?;
        validate_position(self.position)?;
        Ok(())
    }
}
