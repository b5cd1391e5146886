pub mod catalog;
pub mod commit;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod ledger;
pub mod logging;
pub mod resolver;
pub mod staging;
pub mod worker;

pub use catalog::{CatalogError, ExternalCatalog, SyncPayload};
pub use commit::{CommitItemError, CommitResult};
pub use config::EngineConfig;
pub use dispatch::{DispatchOutcome, JobQueue, SyncJobRequest, dispatch_job};
pub use job::{dispatch_superseded, run_sync_job};
pub use error::EngineError;
pub use ledger::{PendingCounts, PendingLedger};
pub use resolver::{DisplayId, DisplaySource, DisplayVariant};
pub use worker::{ChannelQueue, SyncWorker, WorkerStats};

use std::collections::BTreeMap;
use std::sync::Arc;

use variant_sync_core::{ProductId, Scope, SessionId, SkuGenerator, TenantId};
use variant_sync_storage::SqliteStorage;

/// Who is editing what, passed explicitly to every staging, resolve and
/// commit call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditContext {
    pub session: SessionId,
    pub product_id: ProductId,
    pub tenant_id: Option<TenantId>,
}

impl EditContext {
    pub fn default_context(session: SessionId, product_id: ProductId) -> Self {
        Self {
            session,
            product_id,
            tenant_id: None,
        }
    }

    pub fn for_tenant(session: SessionId, product_id: ProductId, tenant_id: TenantId) -> Self {
        Self {
            session,
            product_id,
            tenant_id: Some(tenant_id),
        }
    }

    pub fn scope(&self) -> Scope {
        Scope::from_tenant(self.tenant_id)
    }

    /// Same session and product, default scope.
    pub fn without_tenant(&self) -> Self {
        Self::default_context(self.session.clone(), self.product_id)
    }

    fn ledger_key(&self) -> (SessionId, ProductId) {
        (self.session.clone(), self.product_id)
    }
}

pub struct Engine {
    config: EngineConfig,
    storage: SqliteStorage,
    catalog: Arc<dyn ExternalCatalog>,
    queue: Box<dyn JobQueue>,
    ledgers: BTreeMap<(SessionId, ProductId), PendingLedger>,
    sku_generator: SkuGenerator,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        storage: SqliteStorage,
        catalog: Arc<dyn ExternalCatalog>,
        queue: Box<dyn JobQueue>,
    ) -> Self {
        let sku_generator = SkuGenerator::new(config.max_sku_attempts);
        Self {
            config,
            storage,
            catalog,
            queue,
            ledgers: BTreeMap::new(),
            sku_generator,
        }
    }

    /// Opens the database named by `config.database_path`.
    pub fn open(
        config: EngineConfig,
        catalog: Arc<dyn ExternalCatalog>,
        queue: Box<dyn JobQueue>,
    ) -> Result<Self, EngineError> {
        let storage = SqliteStorage::open(&config.database_path)?;
        Ok(Self::new(config, storage, catalog, queue))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut SqliteStorage {
        &mut self.storage
    }

    pub fn catalog(&self) -> &Arc<dyn ExternalCatalog> {
        &self.catalog
    }

    /// Execute a batch SQL statement on the underlying connection, mapping errors.
    fn exec_batch(&self, sql: &str) -> Result<(), EngineError> {
        self.storage
            .conn()
            .execute_batch(sql)
            .map_err(|e| EngineError::Storage(variant_sync_storage::StorageError::Sqlite(e)))
    }

    /// Runs `f` inside `BEGIN IMMEDIATE`; commits on `Ok`, rolls back on `Err`.
    fn in_transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        self.exec_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(value) => {
                self.exec_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.exec_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Nested unit inside an open transaction; a failure undoes only `f`'s
    /// writes. The outer `Result` reports savepoint control failures, the
    /// inner one `f`'s own outcome.
    fn in_savepoint<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, EngineError>,
    ) -> Result<Result<T, EngineError>, EngineError> {
        self.exec_batch("SAVEPOINT commit_item")?;
        match f(self) {
            Ok(value) => {
                self.exec_batch("RELEASE commit_item")?;
                Ok(Ok(value))
            }
            Err(e) => {
                self.exec_batch("ROLLBACK TO commit_item")?;
                self.exec_batch("RELEASE commit_item")?;
                Ok(Err(e))
            }
        }
    }
}
