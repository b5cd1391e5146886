use thiserror::Error;
use variant_sync_core::{
    CoreError, ExternalCombinationId, OverrideId, ProductId, Target, TenantId, VariantId,
};
use variant_sync_storage::StorageError;

use crate::catalog::CatalogError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("variant not found: {0}")]
    VariantNotFound(VariantId),

    #[error("variant {0} does not belong to product {1}")]
    VariantProductMismatch(VariantId, ProductId),

    #[error("tenant-only override not found: {0}")]
    OverrideNotFound(OverrideId),

    #[error("combination {0} is not in the tenant catalog")]
    CombinationNotFound(ExternalCombinationId),

    #[error("{0} is staged for deletion")]
    PendingDelete(Target),

    #[error("unknown attribute value {value} for type {type_id}")]
    UnknownAttribute { type_id: i64, value: i64 },

    #[error("invalid tenant operation: {0}")]
    InvalidTenantOperation(String),

    #[error("tenant {0} has no external product for product {1}")]
    MissingExternalProduct(TenantId, ProductId),

    #[error("nothing staged under {0}")]
    NotStaged(String),

    #[error("job queue unavailable: {0}")]
    QueueUnavailable(String),
}
