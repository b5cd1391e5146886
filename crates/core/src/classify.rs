//! Per-variant and per-field comparison labels for tenant views.

use crate::external::ExternalVariant;
use crate::ids::TenantId;
use crate::payload::{OverrideField, OverridePayload};
use crate::sku::skus_match;
use crate::variant::Variant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantStatus {
    /// Viewing the default context.
    Default,
    /// Tenant view with nothing on the external side; the default applies.
    Inherited,
    /// External entry agrees with the internal data.
    Same,
    /// External entry disagrees, or there is nothing internal to compare to.
    Different,
    /// A tenant edit exists that has not reached the external system yet.
    PendingSync,
}

impl VariantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantStatus::Default => "default",
            VariantStatus::Inherited => "inherited",
            VariantStatus::Same => "same",
            VariantStatus::Different => "different",
            VariantStatus::PendingSync => "pendingSync",
        }
    }
}

/// The subset of a variant the classifier compares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantFacts {
    pub sku: String,
    pub name: String,
    pub is_active: bool,
    pub image_count: usize,
}

impl VariantFacts {
    pub fn from_variant(variant: &Variant) -> Self {
        Self {
            sku: variant.sku.clone(),
            name: variant.name.clone(),
            is_active: variant.is_active,
            image_count: variant.images.len(),
        }
    }

    /// Facts after a tenant payload has been laid over them.
    pub fn with_payload(mut self, payload: &OverridePayload) -> Self {
        if let Some(sku) = &payload.basic.sku {
            self.sku = sku.clone();
        }
        if let Some(name) = &payload.basic.name {
            self.name = name.clone();
        }
        if let Some(is_active) = payload.basic.is_active {
            self.is_active = is_active;
        }
        if let Some(images) = &payload.media.images {
            self.image_count = images.len();
        }
        self
    }
}

fn names_match(internal: &str, external: &str) -> bool {
    let (internal, external) = (internal.trim(), external.trim());
    // An empty name on either side carries no information.
    internal.is_empty() || external.is_empty() || internal == external
}

fn field_matches(internal: &VariantFacts, external: &ExternalVariant, field: OverrideField) -> bool {
    match field {
        OverrideField::Sku => skus_match(&internal.sku, &external.sku),
        OverrideField::Name => names_match(&internal.name, &external.name),
        OverrideField::IsActive => internal.is_active == external.is_active,
        OverrideField::Images => internal.image_count == external.images.len(),
        // No comparable data on the external side.
        _ => true,
    }
}

const COMPARED_FIELDS: [OverrideField; 4] = [
    OverrideField::Sku,
    OverrideField::IsActive,
    OverrideField::Name,
    OverrideField::Images,
];

/// `Same` when every compared field agrees, `Different` otherwise.
pub fn compare(
    internal: &VariantFacts,
    external: &ExternalVariant,
    field: Option<OverrideField>,
) -> VariantStatus {
    let matches = match field {
        Some(field) => field_matches(internal, external, field),
        None => COMPARED_FIELDS
            .iter()
            .all(|field| field_matches(internal, external, *field)),
    };
    if matches {
        VariantStatus::Same
    } else {
        VariantStatus::Different
    }
}

/// Classify one variant, or one field of it, for the given context.
///
/// `pending` is the tenant's un-synced override payload for the variant,
/// if any. Without a `field`, any non-empty pending payload wins.
pub fn classify(
    tenant: Option<TenantId>,
    internal: Option<&VariantFacts>,
    external: Option<&ExternalVariant>,
    pending: Option<&OverridePayload>,
    field: Option<OverrideField>,
) -> VariantStatus {
    if tenant.is_none() {
        return VariantStatus::Default;
    }
    if let Some(pending) = pending {
        let pending_hit = match field {
            Some(field) => pending.contains(field),
            None => !pending.is_empty(),
        };
        if pending_hit {
            return VariantStatus::PendingSync;
        }
    }
    let Some(internal) = internal else {
        return VariantStatus::Different;
    };
    let Some(external) = external else {
        return VariantStatus::Inherited;
    };
    compare(internal, external, field)
}
