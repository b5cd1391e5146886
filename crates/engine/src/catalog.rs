//! Boundary to a tenant's external catalog system.

use thiserror::Error;
use variant_sync_core::{
    ExternalCombinationId, ExternalImageId, ExternalProductId, ExternalVariant, TenantId,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    #[error("rejected by catalog: {0}")]
    Rejected(String),
}

/// Everything the external side needs to create or update one combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPayload {
    pub sku: String,
    pub name: String,
    pub is_active: bool,
    pub is_default: bool,
    pub position: i32,
    /// Attribute value codes, ordered by attribute type. `None` leaves the
    /// combination's attributes untouched.
    pub attribute_codes: Option<Vec<String>>,
    pub images: Vec<ExternalImageId>,
    pub price_impact_cents: Option<i64>,
    pub quantity: Option<i64>,
    pub minimal_quantity: Option<u32>,
}

/// Eventually consistent, independently retryable. Reads happen on the
/// request path; writes only from sync jobs.
pub trait ExternalCatalog: Send + Sync {
    fn fetch_variants(
        &self,
        tenant_id: TenantId,
        product: ExternalProductId,
    ) -> Result<Vec<ExternalVariant>, CatalogError>;

    fn create_combination(
        &self,
        tenant_id: TenantId,
        product: ExternalProductId,
        payload: &SyncPayload,
    ) -> Result<ExternalCombinationId, CatalogError>;

    fn update_combination(
        &self,
        tenant_id: TenantId,
        combination: ExternalCombinationId,
        payload: &SyncPayload,
    ) -> Result<(), CatalogError>;

    fn delete_combination(
        &self,
        tenant_id: TenantId,
        combination: ExternalCombinationId,
    ) -> Result<(), CatalogError>;
}
