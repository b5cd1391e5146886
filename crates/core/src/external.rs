//! Live view of a tenant's external catalog, fetched per request and never
//! persisted.

use serde::{Deserialize, Serialize};

use crate::ids::{ExternalCombinationId, ExternalImageId, TenantId};
use crate::sku::strip_tenant_suffix;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAttribute {
    pub group: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalVariant {
    pub combination_id: ExternalCombinationId,
    pub sku: String,
    pub name: String,
    pub is_active: bool,
    pub is_default: bool,
    pub position: i32,
    pub attributes: Vec<ExternalAttribute>,
    pub images: Vec<ExternalImageId>,
}

#[derive(Debug, Clone)]
pub struct ExternalSnapshot {
    tenant: TenantId,
    variants: Vec<ExternalVariant>,
    suffix_matching: bool,
}

impl ExternalSnapshot {
    pub fn new(tenant: TenantId, variants: Vec<ExternalVariant>) -> Self {
        Self {
            tenant,
            variants,
            suffix_matching: true,
        }
    }

    pub fn empty(tenant: TenantId) -> Self {
        Self::new(tenant, Vec::new())
    }

    pub fn with_suffix_matching(mut self, enabled: bool) -> Self {
        self.suffix_matching = enabled;
        self
    }

    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    pub fn variants(&self) -> &[ExternalVariant] {
        &self.variants
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    /// Exact SKU match first; then, if enabled, an external SKU whose
    /// `-S<digits>` suffix strips down to `sku`. Never fails, only misses.
    pub fn find_by_sku(&self, sku: &str) -> Option<&ExternalVariant> {
        if let Some(exact) = self.variants.iter().find(|v| v.sku == sku) {
            return Some(exact);
        }
        if !self.suffix_matching {
            return None;
        }
        self.variants
            .iter()
            .find(|v| strip_tenant_suffix(&v.sku) == sku)
    }

    pub fn find_by_combination(&self, id: ExternalCombinationId) -> Option<&ExternalVariant> {
        self.variants.iter().find(|v| v.combination_id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn external(id: i64, sku: &str) -> ExternalVariant {
        ExternalVariant {
            combination_id: ExternalCombinationId::new(id),
            sku: sku.into(),
            name: "Red".into(),
            is_active: true,
            is_default: false,
            position: 0,
            attributes: Vec::new(),
            images: Vec::new(),
        }
    }

    #[test]
    fn exact_match_beats_suffix_match() {
        let snapshot = ExternalSnapshot::new(
            TenantId::new(1),
            vec![external(1, "X-S1"), external(2, "X")],
        );
        assert_eq!(
            snapshot.find_by_sku("X").map(|v| v.combination_id),
            Some(ExternalCombinationId::new(2))
        );
    }

    #[test]
    fn suffix_match_can_be_disabled() {
        let snapshot = ExternalSnapshot::new(TenantId::new(1), vec![external(1, "X-S1")]);
        assert!(snapshot.find_by_sku("X").is_some());
        let strict = snapshot.with_suffix_matching(false);
        assert!(strict.find_by_sku("X").is_none());
        assert!(strict.find_by_combination(ExternalCombinationId::new(1)).is_some());
    }
}
