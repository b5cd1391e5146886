use serde::{Deserialize, Serialize};
use variant_sync_core::{ProductId, SyncJobId, TenantId};
use variant_sync_storage::{
    OverrideStore, SqliteStorage, StorageError, SyncJobRecord, SyncJobStatus, SyncJobStore,
};

use crate::{Engine, error::EngineError};

/// Job arguments; identifiers only, the job reloads everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJobRequest {
    pub job_id: SyncJobId,
    pub product_id: ProductId,
    pub tenant_id: TenantId,
}

/// Fire-and-forget hand-off to whatever runs sync jobs.
pub trait JobQueue: Send {
    fn enqueue(&self, request: SyncJobRequest) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Enqueued(SyncJobId),
    AlreadyActive(SyncJobId),
    NothingToSync,
}

impl DispatchOutcome {
    pub fn job_id(&self) -> Option<SyncJobId> {
        match self {
            DispatchOutcome::Enqueued(id) | DispatchOutcome::AlreadyActive(id) => Some(*id),
            DispatchOutcome::NothingToSync => None,
        }
    }
}

/// Persist and enqueue a sync job unless one is already pending or running
/// for the pair, or nothing needs pushing. Shared by the engine and the
/// worker's follow-up dispatch.
pub fn dispatch_job(
    storage: &mut SqliteStorage,
    queue: &dyn JobQueue,
    product_id: ProductId,
    tenant_id: TenantId,
) -> Result<DispatchOutcome, EngineError> {
    if let Some(active) = storage.active_sync_job(product_id, tenant_id)? {
        tracing::info!(
            %product_id, %tenant_id, job_id = %active.job_id,
            "sync job already active, not dispatching"
        );
        return Ok(DispatchOutcome::AlreadyActive(active.job_id));
    }

    let needing_sync = storage.count_overrides_needing_sync(product_id, tenant_id)?;
    if needing_sync == 0 {
        tracing::debug!(%product_id, %tenant_id, "no overrides need syncing");
        return Ok(DispatchOutcome::NothingToSync);
    }

    let job = SyncJobRecord {
        job_id: SyncJobId::new(),
        product_id,
        tenant_id,
        status: SyncJobStatus::Pending,
        error: None,
        created_at: 0,
        started_at: None,
        finished_at: None,
    };
    match storage.insert_sync_job(&job) {
        Ok(()) => {}
        Err(StorageError::ConstraintViolation(_)) => {
            // Lost a race with a concurrent dispatch.
            if let Some(active) = storage.active_sync_job(product_id, tenant_id)? {
                return Ok(DispatchOutcome::AlreadyActive(active.job_id));
            }
            return Err(EngineError::Storage(StorageError::ConstraintViolation(
                format!("sync job for product {product_id} tenant {tenant_id}"),
            )));
        }
        Err(e) => return Err(e.into()),
    }

    let request = SyncJobRequest {
        job_id: job.job_id,
        product_id,
        tenant_id,
    };
    if let Err(e) = queue.enqueue(request) {
        tracing::error!(%product_id, %tenant_id, job_id = %job.job_id, error = %e, "enqueue failed");
        storage.update_sync_job_status(
            job.job_id,
            SyncJobStatus::Failed,
            Some(&e.to_string()),
        )?;
        return Err(e);
    }

    tracing::info!(
        %product_id, %tenant_id, job_id = %job.job_id, overrides = needing_sync,
        "sync job dispatched"
    );
    Ok(DispatchOutcome::Enqueued(job.job_id))
}

impl Engine {
    // ========================================================================
    // Sync Dispatch
    // ========================================================================

    pub fn dispatch_if_needed(
        &mut self,
        product_id: ProductId,
        tenant_id: TenantId,
    ) -> Result<DispatchOutcome, EngineError> {
        dispatch_job(&mut self.storage, self.queue.as_ref(), product_id, tenant_id)
    }

    pub fn sync_job(&self, job_id: SyncJobId) -> Result<Option<SyncJobRecord>, EngineError> {
        Ok(self.storage.get_sync_job(job_id)?)
    }

    pub fn latest_sync_job(
        &self,
        product_id: ProductId,
        tenant_id: TenantId,
    ) -> Result<Option<SyncJobRecord>, EngineError> {
        Ok(self.storage.latest_sync_job(product_id, tenant_id)?)
    }
}
