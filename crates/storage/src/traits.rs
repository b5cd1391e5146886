use variant_sync_core::{
    ids::*,
    payload::OverridePayload,
    variant::{AttributeSet, Product, Variant, VariantDraft},
};

use crate::error::StorageError;

/// How a tenant override relates to the default variant set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationTag {
    /// Tenant-only variant, or a default variant never pushed to the tenant.
    Add,
    /// Field overrides on a default variant the tenant already has.
    Override,
    /// Default variant suppressed for the tenant.
    Delete,
}

impl OperationTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Override => "OVERRIDE",
            Self::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "ADD" => Ok(Self::Add),
            "OVERRIDE" => Ok(Self::Override),
            "DELETE" => Ok(Self::Delete),
            _ => Err(StorageError::Serialization(format!("unknown operation tag: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverrideSyncStatus {
    Pending,
    InProgress,
    Synced,
    Failed,
}

impl OverrideSyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            _ => Err(StorageError::Serialization(format!("unknown sync status: {s}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OverrideRecord {
    pub override_id: OverrideId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub operation: OperationTag,
    pub payload: OverridePayload,
    pub external_combination_id: Option<ExternalCombinationId>,
    pub sync_status: OverrideSyncStatus,
    pub sync_error: Option<String>,
    pub synced_fingerprint: Option<[u8; 32]>,
    pub updated_at: i64,
}

impl OverrideRecord {
    pub fn is_synced(&self) -> bool {
        self.sync_status == OverrideSyncStatus::Synced
    }
}

#[derive(Debug, Clone)]
pub struct NewOverride {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub operation: OperationTag,
    pub payload: OverridePayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SyncJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(StorageError::Serialization(format!("unknown job status: {s}"))),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

#[derive(Debug, Clone)]
pub struct SyncJobRecord {
    pub job_id: SyncJobId,
    pub product_id: ProductId,
    pub tenant_id: TenantId,
    pub status: SyncJobStatus,
    pub error: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

/// Products, attributes and default-context variants.
pub trait CatalogStore {
    fn insert_product(&mut self, sku: &str, name: &str) -> Result<ProductId, StorageError>;

    fn get_product(&self, product_id: ProductId) -> Result<Option<Product>, StorageError>;

    fn set_product_variant_state(
        &mut self,
        product_id: ProductId,
        is_variant_master: bool,
        default_variant_id: Option<VariantId>,
    ) -> Result<(), StorageError>;

    fn insert_attribute_type(
        &mut self,
        code: &str,
        name: &str,
        position: i32,
    ) -> Result<AttributeTypeId, StorageError>;

    fn insert_attribute_value(
        &mut self,
        type_id: AttributeTypeId,
        code: &str,
        label: &str,
    ) -> Result<AttributeValueId, StorageError>;

    fn attribute_value_exists(
        &self,
        type_id: AttributeTypeId,
        value_id: AttributeValueId,
    ) -> Result<bool, StorageError>;

    /// Value codes for the selected attributes, ordered by attribute type position.
    fn attribute_codes(&self, attributes: &AttributeSet) -> Result<Vec<String>, StorageError>;

    /// SKU is used by a product or by a live variant other than `except`.
    fn sku_taken(&self, sku: &str, except: Option<VariantId>) -> Result<bool, StorageError>;

    fn insert_variant(
        &mut self,
        product_id: ProductId,
        draft: &VariantDraft,
    ) -> Result<VariantId, StorageError>;

    /// Writes the scalar columns of `variant`; attributes and images are untouched.
    fn update_variant(&mut self, variant: &Variant) -> Result<(), StorageError>;

    fn soft_delete_variant(&mut self, variant_id: VariantId) -> Result<(), StorageError>;

    fn replace_variant_attributes(
        &mut self,
        variant_id: VariantId,
        attributes: &AttributeSet,
    ) -> Result<(), StorageError>;

    fn replace_variant_images(
        &mut self,
        variant_id: VariantId,
        images: &[MediaId],
    ) -> Result<(), StorageError>;

    /// Includes tombstoned variants.
    fn get_variant(&self, variant_id: VariantId) -> Result<Option<Variant>, StorageError>;

    /// Live variants ordered by position, then id.
    fn list_variants(&self, product_id: ProductId) -> Result<Vec<Variant>, StorageError>;

    fn clear_default_flags(
        &mut self,
        product_id: ProductId,
        except: Option<VariantId>,
    ) -> Result<(), StorageError>;
}

/// Tenants and the id mappings between internal rows and a tenant's catalog.
pub trait TenantStore {
    fn insert_tenant(&mut self, name: &str) -> Result<TenantId, StorageError>;

    fn set_external_product(
        &mut self,
        tenant_id: TenantId,
        product_id: ProductId,
        external_id: ExternalProductId,
    ) -> Result<(), StorageError>;

    fn external_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Option<ExternalProductId>, StorageError>;

    fn confirmed_external_id(
        &self,
        variant_id: VariantId,
        tenant_id: TenantId,
    ) -> Result<Option<ExternalCombinationId>, StorageError>;

    fn record_external_id(
        &mut self,
        variant_id: VariantId,
        tenant_id: TenantId,
        combination_id: ExternalCombinationId,
    ) -> Result<(), StorageError>;

    fn forget_external_id(
        &mut self,
        variant_id: VariantId,
        tenant_id: TenantId,
    ) -> Result<(), StorageError>;

    fn map_media(
        &mut self,
        media_id: MediaId,
        tenant_id: TenantId,
        external_id: ExternalImageId,
    ) -> Result<(), StorageError>;

    /// Mapped ids in input order; unmapped media are skipped.
    fn external_image_ids(
        &self,
        tenant_id: TenantId,
        media: &[MediaId],
    ) -> Result<Vec<ExternalImageId>, StorageError>;
}

pub trait OverrideStore {
    /// Inserts, or for a row keyed by `(tenant, variant)` replaces tag and
    /// payload in place. Either way the row goes back to `pending`.
    fn upsert_override(&mut self, new: &NewOverride) -> Result<OverrideId, StorageError>;

    fn get_override(&self, override_id: OverrideId) -> Result<Option<OverrideRecord>, StorageError>;

    fn override_for_variant(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
    ) -> Result<Option<OverrideRecord>, StorageError>;

    fn list_overrides(
        &self,
        product_id: ProductId,
        tenant_id: TenantId,
    ) -> Result<Vec<OverrideRecord>, StorageError>;

    fn delete_override(&mut self, override_id: OverrideId) -> Result<(), StorageError>;

    /// Replaces tag and payload of an existing row and puts it back to `pending`.
    fn rewrite_override(
        &mut self,
        override_id: OverrideId,
        operation: OperationTag,
        payload: &OverridePayload,
    ) -> Result<(), StorageError>;

    fn set_override_combination(
        &mut self,
        override_id: OverrideId,
        combination_id: Option<ExternalCombinationId>,
    ) -> Result<(), StorageError>;

    /// Moves every override not yet `synced` to `in_progress` in one
    /// statement and returns the claimed rows, ordered by id.
    fn claim_overrides_for_sync(
        &mut self,
        product_id: ProductId,
        tenant_id: TenantId,
    ) -> Result<Vec<OverrideRecord>, StorageError>;

    /// Records the combination, then marks the row `synced` if it is still
    /// `in_progress`. Returns `false` when the row changed or vanished since
    /// it was claimed; it then keeps its current status.
    fn mark_override_synced(
        &mut self,
        override_id: OverrideId,
        combination_id: Option<ExternalCombinationId>,
        fingerprint: [u8; 32],
    ) -> Result<bool, StorageError>;

    /// `in_progress` to `failed`; `false` when the row changed since it was claimed.
    fn mark_override_failed(
        &mut self,
        override_id: OverrideId,
        error: &str,
    ) -> Result<bool, StorageError>;

    /// Removes a tenant-only row whose `DELETE` was pushed, if it is still
    /// `in_progress`.
    fn retire_override(&mut self, override_id: OverrideId) -> Result<bool, StorageError>;

    /// Every row still `in_progress` for the pair goes to `failed`.
    fn release_claimed_overrides(
        &mut self,
        product_id: ProductId,
        tenant_id: TenantId,
        error: &str,
    ) -> Result<usize, StorageError>;

    fn count_overrides_with_status(
        &self,
        product_id: ProductId,
        tenant_id: TenantId,
        status: OverrideSyncStatus,
    ) -> Result<usize, StorageError>;

    fn count_overrides_needing_sync(
        &self,
        product_id: ProductId,
        tenant_id: TenantId,
    ) -> Result<usize, StorageError>;
}

/// Durable copy of pending ledgers, keyed by `(session, product)`.
pub trait StagingStore {
    fn get_staged(
        &self,
        session: &SessionId,
        product_id: ProductId,
    ) -> Result<Option<Vec<u8>>, StorageError>;

    fn put_staged(
        &mut self,
        session: &SessionId,
        product_id: ProductId,
        payload: &[u8],
    ) -> Result<(), StorageError>;

    fn forget_staged(
        &mut self,
        session: &SessionId,
        product_id: ProductId,
    ) -> Result<(), StorageError>;
}

pub trait SyncJobStore {
    /// Fails with `ConstraintViolation` if an active job exists for the pair.
    fn insert_sync_job(&mut self, job: &SyncJobRecord) -> Result<(), StorageError>;

    fn get_sync_job(&self, job_id: SyncJobId) -> Result<Option<SyncJobRecord>, StorageError>;

    fn active_sync_job(
        &self,
        product_id: ProductId,
        tenant_id: TenantId,
    ) -> Result<Option<SyncJobRecord>, StorageError>;

    fn latest_sync_job(
        &self,
        product_id: ProductId,
        tenant_id: TenantId,
    ) -> Result<Option<SyncJobRecord>, StorageError>;

    fn update_sync_job_status(
        &mut self,
        job_id: SyncJobId,
        status: SyncJobStatus,
        error: Option<&str>,
    ) -> Result<(), StorageError>;
}
