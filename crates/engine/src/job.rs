//! Sync job body. Runs on the worker's own storage connection and reloads
//! everything it needs from the job's identifiers.

use variant_sync_core::{
    AttributeSet, CoreError, ExternalCombinationId, ExternalImageId, ExternalProductId,
    ExternalSnapshot, ImageSelection, TenantId, Variant, sku::tenant_sku,
};
use variant_sync_storage::{
    CatalogStore, OperationTag, OverrideRecord, OverrideStore, OverrideSyncStatus, SqliteStorage,
    StorageError, SyncJobStatus, SyncJobStore, TenantStore,
};

use crate::{
    Engine,
    catalog::{CatalogError, ExternalCatalog, SyncPayload},
    dispatch::{DispatchOutcome, JobQueue, SyncJobRequest, dispatch_job},
    error::EngineError,
};

/// Run one job to a terminal state. Re-running a terminal job is a no-op.
/// A storage error part-way through still leaves the job `failed`.
pub fn run_sync_job(
    storage: &mut SqliteStorage,
    catalog: &dyn ExternalCatalog,
    request: SyncJobRequest,
    suffix_matching: bool,
) -> Result<SyncJobStatus, EngineError> {
    let SyncJobRequest {
        job_id,
        product_id,
        tenant_id,
    } = request;
    let job = storage
        .get_sync_job(job_id)?
        .ok_or_else(|| StorageError::NotFound(format!("sync job {job_id}")))?;
    if job.status.is_terminal() {
        tracing::debug!(%job_id, status = job.status.as_str(), "sync job already finished");
        return Ok(job.status);
    }

    storage.update_sync_job_status(job_id, SyncJobStatus::Running, None)?;
    match sync_claimed(storage, catalog, request, suffix_matching) {
        Ok(status) => Ok(status),
        Err(e) => {
            let message = format!("sync aborted: {e}");
            tracing::error!(%job_id, %product_id, %tenant_id, error = %message, "sync job aborted");
            if let Err(release) = storage.release_claimed_overrides(product_id, tenant_id, &message) {
                tracing::warn!(%job_id, error = %release, "claimed overrides not released");
            }
            if let Err(mark) =
                storage.update_sync_job_status(job_id, SyncJobStatus::Failed, Some(&message))
            {
                tracing::error!(%job_id, error = %mark, "aborted job not marked failed");
            }
            Err(e)
        }
    }
}

fn sync_claimed(
    storage: &mut SqliteStorage,
    catalog: &dyn ExternalCatalog,
    request: SyncJobRequest,
    suffix_matching: bool,
) -> Result<SyncJobStatus, EngineError> {
    let SyncJobRequest {
        job_id,
        product_id,
        tenant_id,
    } = request;
    let overrides = storage.claim_overrides_for_sync(product_id, tenant_id)?;
    tracing::info!(%job_id, %product_id, %tenant_id, overrides = overrides.len(), "sync job started");

    let Some(external_product) = storage.external_product(tenant_id, product_id)? else {
        let message = EngineError::MissingExternalProduct(tenant_id, product_id).to_string();
        fail_all(storage, &overrides, &message)?;
        return finish(storage, request, Some(message));
    };

    let snapshot = match catalog.fetch_variants(tenant_id, external_product) {
        Ok(variants) => {
            ExternalSnapshot::new(tenant_id, variants).with_suffix_matching(suffix_matching)
        }
        Err(e) => {
            let message = format!("fetching external variants: {e}");
            fail_all(storage, &overrides, &message)?;
            return finish(storage, request, Some(message));
        }
    };

    let mut run = SyncRun {
        storage,
        catalog,
        tenant_id,
        external_product,
        snapshot,
        superseded: 0,
    };
    let mut failed = 0usize;
    let mut first_error = None;
    for record in &overrides {
        if let Err(e) = run.sync_override(record) {
            let message = e.to_string();
            tracing::warn!(
                %job_id, override_id = %record.override_id, tag = record.operation.as_str(),
                error = %message, "override sync failed"
            );
            if !run.storage.mark_override_failed(record.override_id, &message)? {
                run.superseded += 1;
            }
            failed += 1;
            first_error.get_or_insert(message);
        }
    }
    if run.superseded > 0 {
        tracing::info!(%job_id, superseded = run.superseded, "overrides changed during sync, left pending");
    }

    let error = first_error.map(|first| format!("{failed} of {} variants failed: {first}", overrides.len()));
    finish(run.storage, request, error)
}

fn fail_all(
    storage: &mut SqliteStorage,
    overrides: &[OverrideRecord],
    message: &str,
) -> Result<(), EngineError> {
    for record in overrides {
        storage.mark_override_failed(record.override_id, message)?;
    }
    Ok(())
}

fn finish(
    storage: &mut SqliteStorage,
    request: SyncJobRequest,
    error: Option<String>,
) -> Result<SyncJobStatus, EngineError> {
    let status = match &error {
        None => SyncJobStatus::Completed,
        Some(_) => SyncJobStatus::Failed,
    };
    storage.update_sync_job_status(request.job_id, status, error.as_deref())?;
    match &error {
        None => tracing::info!(job_id = %request.job_id, "sync job completed"),
        Some(message) => tracing::error!(job_id = %request.job_id, error = %message, "sync job failed"),
    }
    Ok(status)
}

/// Edits committed while a job was running stay `pending`; the dispatch
/// they triggered found that job active. Queue the next job for them.
pub fn dispatch_superseded(
    storage: &mut SqliteStorage,
    queue: &dyn JobQueue,
    request: SyncJobRequest,
) -> Result<Option<DispatchOutcome>, EngineError> {
    let waiting = storage.count_overrides_with_status(
        request.product_id,
        request.tenant_id,
        OverrideSyncStatus::Pending,
    )?;
    if waiting == 0 {
        return Ok(None);
    }
    tracing::info!(
        job_id = %request.job_id, product_id = %request.product_id,
        tenant_id = %request.tenant_id, waiting, "re-dispatching edits made during sync"
    );
    dispatch_job(storage, queue, request.product_id, request.tenant_id).map(Some)
}

struct SyncRun<'a> {
    storage: &'a mut SqliteStorage,
    catalog: &'a dyn ExternalCatalog,
    tenant_id: TenantId,
    external_product: ExternalProductId,
    snapshot: ExternalSnapshot,
    /// Rows that changed after being claimed; their marks were skipped.
    superseded: usize,
}

impl SyncRun<'_> {
    fn sync_override(&mut self, record: &OverrideRecord) -> Result<(), EngineError> {
        let fingerprint = record.payload.fingerprint()?;
        let default = match record.variant_id {
            Some(variant_id) => self.storage.get_variant(variant_id)?,
            None => None,
        };

        if record.operation == OperationTag::Delete {
            if let Some(combination) = self.locate(record, default.as_ref())? {
                match self.catalog.delete_combination(self.tenant_id, combination) {
                    Ok(()) | Err(CatalogError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            let settled = match record.variant_id {
                Some(variant_id) => {
                    self.storage.forget_external_id(variant_id, self.tenant_id)?;
                    self.storage
                        .mark_override_synced(record.override_id, None, fingerprint)?
                }
                // Tenant-only rows have nothing left to show once removed.
                None => self.storage.retire_override(record.override_id)?,
            };
            if !settled {
                self.superseded += 1;
            }
            return Ok(());
        }

        let known = self.locate(record, default.as_ref())?;
        if let Some(combination) = known {
            if record.synced_fingerprint == Some(fingerprint) {
                tracing::debug!(override_id = %record.override_id, "payload unchanged since last push");
                return self.confirm(record, combination, fingerprint);
            }
        }

        let payload = self.build_payload(record, default.as_ref())?;
        let combination = match known {
            Some(combination) => {
                match self
                    .catalog
                    .update_combination(self.tenant_id, combination, &payload)
                {
                    Ok(()) => combination,
                    Err(CatalogError::NotFound(_)) => {
                        tracing::debug!(%combination, "combination gone, recreating");
                        self.create(&payload)?
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => self.create(&payload)?,
        };
        self.confirm(record, combination, fingerprint)
    }

    fn create(&self, payload: &SyncPayload) -> Result<ExternalCombinationId, EngineError> {
        Ok(self
            .catalog
            .create_combination(self.tenant_id, self.external_product, payload)?)
    }

    fn confirm(
        &mut self,
        record: &OverrideRecord,
        combination: ExternalCombinationId,
        fingerprint: [u8; 32],
    ) -> Result<(), EngineError> {
        if let Some(variant_id) = record.variant_id {
            self.storage
                .record_external_id(variant_id, self.tenant_id, combination)?;
        }
        if !self
            .storage
            .mark_override_synced(record.override_id, Some(combination), fingerprint)?
        {
            self.superseded += 1;
        }
        Ok(())
    }

    /// Known combination: the override's own, then the mapping table, then
    /// a SKU match in the snapshot.
    fn locate(
        &self,
        record: &OverrideRecord,
        default: Option<&Variant>,
    ) -> Result<Option<ExternalCombinationId>, EngineError> {
        if let Some(combination) = record.external_combination_id {
            return Ok(Some(combination));
        }
        if let Some(variant_id) = record.variant_id {
            if let Some(combination) = self.storage.confirmed_external_id(variant_id, self.tenant_id)? {
                return Ok(Some(combination));
            }
        }
        let by_sku = record
            .payload
            .basic
            .sku
            .as_deref()
            .and_then(|sku| self.snapshot.find_by_sku(sku))
            .or_else(|| default.and_then(|v| self.snapshot.find_by_sku(&v.sku)));
        Ok(by_sku.map(|external| external.combination_id))
    }

    fn build_payload(
        &self,
        record: &OverrideRecord,
        default: Option<&Variant>,
    ) -> Result<SyncPayload, EngineError> {
        let fields = &record.payload;
        let basic = &fields.basic;
        let sku = match (&basic.sku, default) {
            (Some(sku), _) => sku.clone(),
            (None, Some(variant)) => tenant_sku(&variant.sku, self.tenant_id),
            (None, None) => {
                return Err(CoreError::validation("sku", "tenant-only variant has no sku").into());
            }
        };
        let attributes: Option<AttributeSet> = match (&fields.attributes, default) {
            (Some(attributes), _) => Some(attributes.clone()),
            (None, Some(variant)) => Some(variant.attributes.clone()),
            (None, None) => None,
        };
        let images: Vec<ExternalImageId> = match (&fields.media.images, default) {
            (Some(ImageSelection::External(ids)), _) => ids.clone(),
            (Some(ImageSelection::Media(media)), _) => {
                self.storage.external_image_ids(self.tenant_id, media)?
            }
            (None, Some(variant)) => self.storage.external_image_ids(self.tenant_id, &variant.images)?,
            (None, None) => Vec::new(),
        };

        Ok(SyncPayload {
            name: basic
                .name
                .clone()
                .or_else(|| default.map(|v| v.name.clone()))
                .unwrap_or_else(|| sku.clone()),
            sku,
            is_active: basic
                .is_active
                .or(default.map(|v| v.is_active))
                .unwrap_or(true),
            is_default: basic
                .is_default
                .or(default.map(|v| v.is_default))
                .unwrap_or(false),
            position: basic.position.or(default.map(|v| v.position)).unwrap_or(0),
            attribute_codes: attributes
                .map(|attributes| self.storage.attribute_codes(&attributes))
                .transpose()?,
            images,
            price_impact_cents: fields.pricing.price_impact_cents,
            quantity: fields.stock.quantity,
            minimal_quantity: fields.stock.minimal_quantity,
        })
    }
}

impl Engine {
    /// Run a job on the engine's own connection. Tests and single-process
    /// deployments use this instead of a `SyncWorker`.
    pub fn run_job(&mut self, request: SyncJobRequest) -> Result<SyncJobStatus, EngineError> {
        let status = run_sync_job(
            &mut self.storage,
            self.catalog.as_ref(),
            request,
            self.config.suffix_matching,
        )?;
        dispatch_superseded(&mut self.storage, self.queue.as_ref(), request)?;
        Ok(status)
    }
}
