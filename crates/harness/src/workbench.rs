use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use variant_sync_core::{
    AttributeTypeId, AttributeValueId, ExternalImageId, ExternalProductId, MediaId, ProductId,
    SessionId, TenantId, VariantDraft, VariantId,
};
use variant_sync_engine::{
    EditContext, Engine, EngineConfig, EngineError, JobQueue, SyncJobRequest, logging,
};
use variant_sync_storage::{CatalogStore, SqliteStorage, SyncJobStatus, TenantStore};

use crate::MockCatalog;

/// Job queue the test drains by hand.
#[derive(Clone, Default)]
pub struct ManualQueue {
    requests: Arc<Mutex<VecDeque<SyncJobRequest>>>,
    unavailable: Arc<AtomicBool>,
}

impl ManualQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.requests
            .lock()
            .map(|queue| queue.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn drain(&self) -> Vec<SyncJobRequest> {
        match self.requests.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Make every enqueue fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl JobQueue for ManualQueue {
    fn enqueue(&self, request: SyncJobRequest) -> Result<(), EngineError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::QueueUnavailable("queue offline".into()));
        }
        self.requests
            .lock()
            .map_err(|_| EngineError::QueueUnavailable("queue poisoned".into()))?
            .push_back(request);
        Ok(())
    }
}

/// One engine wired to a mock catalog and a manual queue.
pub struct TestWorkbench {
    pub engine: Engine,
    pub catalog: Arc<MockCatalog>,
    pub queue: ManualQueue,
    pub session: SessionId,
}

impl TestWorkbench {
    pub fn new() -> Result<Self, EngineError> {
        let storage = SqliteStorage::open_in_memory()?;
        Ok(Self::assemble(
            EngineConfig::default(),
            storage,
            Arc::new(MockCatalog::new()),
            SessionId::new("session-1"),
        ))
    }

    /// File-backed workbench; reopening the same path with the same session
    /// simulates a process restart.
    pub fn open(
        path: &Path,
        catalog: Arc<MockCatalog>,
        session: SessionId,
    ) -> Result<Self, EngineError> {
        let config = EngineConfig::default().with_database_path(path);
        let storage = SqliteStorage::open(path)?;
        Ok(Self::assemble(config, storage, catalog, session))
    }

    fn assemble(
        config: EngineConfig,
        storage: SqliteStorage,
        catalog: Arc<MockCatalog>,
        session: SessionId,
    ) -> Self {
        // RUST_LOG overrides the quiet default.
        logging::init_logging("warn", false);
        let queue = ManualQueue::new();
        let engine = Engine::new(config, storage, catalog.clone(), Box::new(queue.clone()));
        Self {
            engine,
            catalog,
            queue,
            session,
        }
    }

    pub fn create_product(&mut self, sku: &str) -> Result<ProductId, EngineError> {
        Ok(self.engine.storage_mut().insert_product(sku, sku)?)
    }

    pub fn create_tenant(&mut self, name: &str) -> Result<TenantId, EngineError> {
        Ok(self.engine.storage_mut().insert_tenant(name)?)
    }

    /// Give the product an external counterpart in the tenant's catalog.
    pub fn link(
        &mut self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<ExternalProductId, EngineError> {
        let external = self.catalog.new_product_id();
        self.engine
            .storage_mut()
            .set_external_product(tenant_id, product_id, external)?;
        Ok(external)
    }

    pub fn attribute_type(&mut self, code: &str, position: i32) -> Result<AttributeTypeId, EngineError> {
        Ok(self
            .engine
            .storage_mut()
            .insert_attribute_type(code, code, position)?)
    }

    pub fn attribute_value(
        &mut self,
        type_id: AttributeTypeId,
        code: &str,
    ) -> Result<AttributeValueId, EngineError> {
        Ok(self
            .engine
            .storage_mut()
            .insert_attribute_value(type_id, code, code)?)
    }

    pub fn map_media(&mut self, tenant_id: TenantId, media: MediaId) -> Result<ExternalImageId, EngineError> {
        let external = self.catalog.new_image_id();
        self.engine
            .storage_mut()
            .map_media(media, tenant_id, external)?;
        Ok(external)
    }

    pub fn default_ctx(&self, product_id: ProductId) -> EditContext {
        EditContext::default_context(self.session.clone(), product_id)
    }

    pub fn tenant_ctx(&self, product_id: ProductId, tenant_id: TenantId) -> EditContext {
        EditContext::for_tenant(self.session.clone(), product_id, tenant_id)
    }

    /// Stage and commit default variants in one go; returns their ids in order.
    pub fn commit_variants(
        &mut self,
        product_id: ProductId,
        drafts: Vec<VariantDraft>,
    ) -> Result<Vec<VariantId>, EngineError> {
        let ctx = self.default_ctx(product_id);
        for draft in drafts {
            self.engine.stage_create(&ctx, draft)?;
        }
        let result = self.engine.commit(&ctx)?;
        Ok(result.created_ids.into_iter().map(|(_, id)| id).collect())
    }

    /// Run every queued job on the engine's own connection.
    pub fn run_pending_jobs(&mut self) -> Result<Vec<SyncJobStatus>, EngineError> {
        self.queue
            .drain()
            .into_iter()
            .map(|request| self.engine.run_job(request))
            .collect()
    }
}
