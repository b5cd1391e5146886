use std::sync::Arc;

use variant_sync_core::{
    ExternalCombinationId, ExternalProductId, OverridePayload, PendingKey, ProductId, SessionId,
    Target, TenantId, VariantDraft, VariantId,
};
use variant_sync_engine::{CatalogError, DispatchOutcome, EngineError, ExternalCatalog};
use variant_sync_harness::{MockCatalog, TestWorkbench};
use variant_sync_storage::{
    NewOverride, OperationTag, OverrideStore, OverrideSyncStatus, SqliteStorage, SyncJobStatus,
    SyncJobStore, TenantStore,
};

struct Fixture {
    bench: TestWorkbench,
    product: ProductId,
    tenant: TenantId,
    external: Option<ExternalProductId>,
    ids: Vec<VariantId>,
}

fn fixture(linked: bool) -> Result<Fixture, Box<dyn std::error::Error>> {
    build_fixture(TestWorkbench::new()?, linked)
}

/// Linked fixture on a database file other connections can open.
fn fixture_at(path: &std::path::Path) -> Result<Fixture, Box<dyn std::error::Error>> {
    let bench = TestWorkbench::open(path, Arc::new(MockCatalog::new()), SessionId::new("session-1"))?;
    build_fixture(bench, true)
}

fn build_fixture(
    mut bench: TestWorkbench,
    linked: bool,
) -> Result<Fixture, Box<dyn std::error::Error>> {
    let product = bench.create_product("P")?;
    let tenant = bench.create_tenant("shop")?;
    let external = if linked {
        Some(bench.link(tenant, product)?)
    } else {
        None
    };
    let ids = bench.commit_variants(
        product,
        vec![
            VariantDraft::new("P-V001", "Red"),
            VariantDraft::new("P-V002", "Blue").with_position(1),
        ],
    )?;
    Ok(Fixture {
        bench,
        product,
        tenant,
        external,
        ids,
    })
}

fn renamed(name: &str) -> OverridePayload {
    let mut payload = OverridePayload::default();
    payload.basic.name = Some(name.to_string());
    payload
}

impl Fixture {
    fn commit_tenant_update(
        &mut self,
        variant_id: VariantId,
        payload: OverridePayload,
    ) -> Result<Option<DispatchOutcome>, EngineError> {
        let shop = self.bench.tenant_ctx(self.product, self.tenant);
        self.bench.engine.stage_update(&shop, variant_id, payload)?;
        Ok(self.bench.engine.commit_for_tenant(&shop)?.dispatch)
    }

    fn external(&self) -> Result<ExternalProductId, Box<dyn std::error::Error>> {
        Ok(self.external.ok_or("fixture not linked")?)
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

#[test]
fn no_duplicate_job_while_active() -> Result<(), Box<dyn std::error::Error>> {
    let mut fx = fixture(true)?;
    let first = fx.commit_tenant_update(fx.ids[0], renamed("Rouge"))?;
    let Some(DispatchOutcome::Enqueued(job_id)) = first else {
        return Err(format!("expected enqueue, got {first:?}").into());
    };

    let again = fx.bench.engine.dispatch_if_needed(fx.product, fx.tenant)?;
    assert_eq!(again, DispatchOutcome::AlreadyActive(job_id));
    assert_eq!(fx.bench.queue.len(), 1);

    assert_eq!(fx.bench.run_pending_jobs()?, vec![SyncJobStatus::Completed]);
    let job = fx.bench.engine.sync_job(job_id)?.ok_or("job missing")?;
    assert_eq!(job.status, SyncJobStatus::Completed);
    assert!(job.started_at.is_some());
    assert!(job.finished_at.is_some());

    assert_eq!(
        fx.bench.engine.dispatch_if_needed(fx.product, fx.tenant)?,
        DispatchOutcome::NothingToSync
    );

    let next = fx.commit_tenant_update(fx.ids[1], renamed("Bleu"))?;
    let Some(DispatchOutcome::Enqueued(second)) = next else {
        return Err(format!("expected enqueue, got {next:?}").into());
    };
    assert_ne!(second, job_id);
    Ok(())
}

#[test]
fn enqueue_failure_fails_the_job() -> Result<(), Box<dyn std::error::Error>> {
    let mut fx = fixture(true)?;
    fx.bench.queue.set_unavailable(true);

    let dispatch = fx.commit_tenant_update(fx.ids[0], renamed("Rouge"))?;
    assert_eq!(dispatch, None);
    let job = fx
        .bench
        .engine
        .latest_sync_job(fx.product, fx.tenant)?
        .ok_or("job missing")?;
    assert_eq!(job.status, SyncJobStatus::Failed);

    fx.bench.queue.set_unavailable(false);
    let retry = fx.bench.engine.dispatch_if_needed(fx.product, fx.tenant)?;
    assert!(matches!(retry, DispatchOutcome::Enqueued(_)));
    Ok(())
}

// ============================================================================
// Job execution
// ============================================================================

#[test]
fn add_creates_combination_then_override_updates_it() -> Result<(), Box<dyn std::error::Error>> {
    let mut fx = fixture(true)?;
    let external = fx.external()?;
    fx.commit_tenant_update(fx.ids[0], renamed("Rouge"))?;
    assert_eq!(fx.bench.run_pending_jobs()?, vec![SyncJobStatus::Completed]);

    let storage = fx.bench.engine.storage();
    let record = storage
        .override_for_variant(fx.tenant, fx.ids[0])?
        .ok_or("override missing")?;
    assert_eq!(record.sync_status, OverrideSyncStatus::Synced);
    let combination = record.external_combination_id.ok_or("no combination")?;
    assert_eq!(
        storage.confirmed_external_id(fx.ids[0], fx.tenant)?,
        Some(combination)
    );

    let pushed = fx.bench.catalog.variants(fx.tenant, external);
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].sku, format!("P-V001-S{}", fx.tenant));
    assert_eq!(pushed[0].name, "Rouge");
    assert_eq!(fx.bench.catalog.writes().creates, 1);

    let mut inactive = OverridePayload::default();
    inactive.basic.is_active = Some(false);
    fx.commit_tenant_update(fx.ids[0], inactive)?;
    let record = fx
        .bench
        .engine
        .storage()
        .override_for_variant(fx.tenant, fx.ids[0])?
        .ok_or("override missing")?;
    assert_eq!(record.operation, OperationTag::Override);

    assert_eq!(fx.bench.run_pending_jobs()?, vec![SyncJobStatus::Completed]);
    let writes = fx.bench.catalog.writes();
    assert_eq!(writes.creates, 1);
    assert_eq!(writes.updates, 1);
    let updated = fx
        .bench
        .catalog
        .find(fx.tenant, combination)
        .ok_or("combination missing")?;
    assert!(!updated.is_active);
    assert_eq!(updated.name, "Rouge");
    Ok(())
}

#[test]
fn existing_external_sku_is_adopted_instead_of_duplicated() -> Result<(), Box<dyn std::error::Error>> {
    let mut fx = fixture(true)?;
    let external = fx.external()?;
    let seeded = fx
        .bench
        .catalog
        .seed(fx.tenant, external, &format!("P-V001-S{}", fx.tenant), "Red");

    fx.commit_tenant_update(fx.ids[0], renamed("Rouge"))?;
    fx.bench.run_pending_jobs()?;

    let writes = fx.bench.catalog.writes();
    assert_eq!(writes.creates, 0);
    assert_eq!(writes.updates, 1);
    assert_eq!(
        fx.bench
            .engine
            .storage()
            .confirmed_external_id(fx.ids[0], fx.tenant)?,
        Some(seeded)
    );
    Ok(())
}

#[test]
fn missing_external_product_fails_every_override() -> Result<(), Box<dyn std::error::Error>> {
    let mut fx = fixture(false)?;
    let dispatch = fx.commit_tenant_update(fx.ids[0], renamed("Rouge"))?;
    let job_id = dispatch.and_then(|d| d.job_id()).ok_or("no job")?;

    assert_eq!(fx.bench.run_pending_jobs()?, vec![SyncJobStatus::Failed]);
    let job = fx.bench.engine.sync_job(job_id)?.ok_or("job missing")?;
    assert!(job.error.as_deref().unwrap_or_default().contains("no external product"));

    let record = fx
        .bench
        .engine
        .storage()
        .override_for_variant(fx.tenant, fx.ids[0])?
        .ok_or("override missing")?;
    assert_eq!(record.sync_status, OverrideSyncStatus::Failed);
    assert!(record.sync_error.is_some());
    Ok(())
}

#[test]
fn fetch_failure_fails_job_and_manual_retry_recovers() -> Result<(), Box<dyn std::error::Error>> {
    let mut fx = fixture(true)?;
    fx.bench
        .catalog
        .fail_fetches(Some(CatalogError::Unavailable("gateway down".into())));
    fx.commit_tenant_update(fx.ids[0], renamed("Rouge"))?;
    assert_eq!(fx.bench.run_pending_jobs()?, vec![SyncJobStatus::Failed]);
    let failed = fx
        .bench
        .engine
        .latest_sync_job(fx.product, fx.tenant)?
        .ok_or("job missing")?;
    assert!(failed.error.as_deref().unwrap_or_default().contains("gateway down"));

    // Terminal; nothing retries on its own.
    assert!(fx.bench.queue.is_empty());

    fx.bench.catalog.fail_fetches(None);
    assert_eq!(fx.bench.engine.pending_sync_count(fx.product, fx.tenant)?, 1);
    let retry = fx.bench.engine.dispatch_if_needed(fx.product, fx.tenant)?;
    assert!(matches!(retry, DispatchOutcome::Enqueued(_)));
    assert_eq!(fx.bench.run_pending_jobs()?, vec![SyncJobStatus::Completed]);
    assert_eq!(fx.bench.engine.pending_sync_count(fx.product, fx.tenant)?, 0);
    Ok(())
}

#[test]
fn one_rejected_variant_fails_the_job_but_not_the_rest() -> Result<(), Box<dyn std::error::Error>> {
    let mut fx = fixture(true)?;
    fx.bench
        .catalog
        .reject_sku(&format!("P-V002-S{}", fx.tenant));
    let shop = fx.bench.tenant_ctx(fx.product, fx.tenant);
    fx.bench.engine.stage_update(&shop, fx.ids[0], renamed("Rouge"))?;
    fx.bench.engine.stage_update(&shop, fx.ids[1], renamed("Bleu"))?;
    fx.bench.engine.commit_for_tenant(&shop)?;

    assert_eq!(fx.bench.run_pending_jobs()?, vec![SyncJobStatus::Failed]);
    let job = fx
        .bench
        .engine
        .latest_sync_job(fx.product, fx.tenant)?
        .ok_or("job missing")?;
    assert!(job
        .error
        .as_deref()
        .unwrap_or_default()
        .starts_with("1 of 2 variants failed"));

    let storage = fx.bench.engine.storage();
    let ok = storage
        .override_for_variant(fx.tenant, fx.ids[0])?
        .ok_or("override missing")?;
    let rejected = storage
        .override_for_variant(fx.tenant, fx.ids[1])?
        .ok_or("override missing")?;
    assert_eq!(ok.sync_status, OverrideSyncStatus::Synced);
    assert_eq!(rejected.sync_status, OverrideSyncStatus::Failed);
    Ok(())
}

#[test]
fn delete_removes_combination_and_unhide_pushes_it_back() -> Result<(), Box<dyn std::error::Error>> {
    let mut fx = fixture(true)?;
    let external = fx.external()?;
    fx.commit_tenant_update(fx.ids[0], renamed("Rouge"))?;
    fx.bench.run_pending_jobs()?;
    assert_eq!(fx.bench.catalog.variants(fx.tenant, external).len(), 1);

    let shop = fx.bench.tenant_ctx(fx.product, fx.tenant);
    fx.bench.engine.stage_delete(&shop, fx.ids[0])?;
    fx.bench.engine.commit_for_tenant(&shop)?;
    assert_eq!(fx.bench.run_pending_jobs()?, vec![SyncJobStatus::Completed]);

    assert!(fx.bench.catalog.variants(fx.tenant, external).is_empty());
    assert_eq!(
        fx.bench
            .engine
            .storage()
            .confirmed_external_id(fx.ids[0], fx.tenant)?,
        None
    );

    let outcome = fx.bench.engine.unhide_variant(&shop, fx.ids[0])?;
    assert!(matches!(outcome, Some(DispatchOutcome::Enqueued(_))));
    assert_eq!(fx.bench.run_pending_jobs()?, vec![SyncJobStatus::Completed]);

    let back = fx.bench.catalog.variants(fx.tenant, external);
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].name, "Rouge");
    assert_eq!(fx.bench.catalog.writes().creates, 2);
    Ok(())
}

#[test]
fn delete_without_external_combination_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
    let mut fx = fixture(true)?;
    let shop = fx.bench.tenant_ctx(fx.product, fx.tenant);
    fx.bench.engine.stage_delete(&shop, fx.ids[1])?;
    fx.bench.engine.commit_for_tenant(&shop)?;

    assert_eq!(fx.bench.run_pending_jobs()?, vec![SyncJobStatus::Completed]);
    assert_eq!(fx.bench.catalog.writes().total(), 0);
    Ok(())
}

#[test]
fn override_falls_back_to_add_when_combination_is_gone() -> Result<(), Box<dyn std::error::Error>> {
    let mut fx = fixture(true)?;
    fx.commit_tenant_update(fx.ids[0], renamed("Rouge"))?;
    fx.bench.run_pending_jobs()?;
    let first = fx
        .bench
        .engine
        .storage()
        .confirmed_external_id(fx.ids[0], fx.tenant)?
        .ok_or("not confirmed")?;

    // Removed on the storefront side, not through a job.
    fx.bench.catalog.delete_combination(fx.tenant, first)?;

    fx.commit_tenant_update(fx.ids[0], renamed("Carmin"))?;
    assert_eq!(fx.bench.run_pending_jobs()?, vec![SyncJobStatus::Completed]);

    let second = fx
        .bench
        .engine
        .storage()
        .confirmed_external_id(fx.ids[0], fx.tenant)?
        .ok_or("not confirmed")?;
    assert_ne!(first, second);
    let pushed = fx.bench.catalog.find(fx.tenant, second).ok_or("combination missing")?;
    assert_eq!(pushed.name, "Carmin");
    Ok(())
}

#[test]
fn edit_committed_mid_push_stays_pending_and_is_pushed_next() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("variants.db");
    let mut fx = fixture_at(&path)?;
    let external = fx.external()?;
    fx.commit_tenant_update(fx.ids[0], renamed("First"))?;

    // Another request commits a new name while the job is talking to the catalog.
    let (tenant, product, variant) = (fx.tenant, fx.product, fx.ids[0]);
    let other_path = path.clone();
    fx.bench.catalog.before_next_write(move || {
        let mut other = SqliteStorage::open(&other_path).expect("second connection");
        other
            .upsert_override(&NewOverride {
                tenant_id: tenant,
                product_id: product,
                variant_id: Some(variant),
                operation: OperationTag::Add,
                payload: renamed("Second"),
            })
            .expect("concurrent edit");
    });

    assert_eq!(fx.bench.run_pending_jobs()?, vec![SyncJobStatus::Completed]);
    let record = fx
        .bench
        .engine
        .storage()
        .override_for_variant(fx.tenant, fx.ids[0])?
        .ok_or("override missing")?;
    assert_eq!(record.payload.basic.name.as_deref(), Some("Second"));
    assert_eq!(record.sync_status, OverrideSyncStatus::Pending);
    let names: Vec<String> = fx
        .bench
        .catalog
        .variants(fx.tenant, external)
        .into_iter()
        .map(|v| v.name)
        .collect();
    assert_eq!(names, vec!["First"]);
    // The follow-up job is already queued.
    assert_eq!(fx.bench.queue.len(), 1);

    assert_eq!(fx.bench.run_pending_jobs()?, vec![SyncJobStatus::Completed]);
    let pushed = fx.bench.catalog.variants(fx.tenant, external);
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].name, "Second");
    let writes = fx.bench.catalog.writes();
    assert_eq!(writes.creates, 1);
    assert_eq!(writes.updates, 1);
    assert_eq!(fx.bench.engine.pending_sync_count(fx.product, fx.tenant)?, 0);
    assert!(fx.bench.queue.is_empty());
    Ok(())
}

#[test]
fn storage_error_mid_job_still_fails_the_job() -> Result<(), Box<dyn std::error::Error>> {
    let mut fx = fixture(true)?;
    let dispatch = fx.commit_tenant_update(fx.ids[0], renamed("Rouge"))?;
    let job_id = dispatch.and_then(|d| d.job_id()).ok_or("no job")?;

    // Every sync mark on the override table fails, including the failure mark.
    fx.bench.engine.storage().conn().execute_batch(
        "CREATE TRIGGER lock_override_marks BEFORE UPDATE OF sync_status ON tenant_overrides
             WHEN OLD.sync_status = 'in_progress'
         BEGIN SELECT RAISE(ABORT, 'override table locked'); END;",
    )?;
    assert!(fx.bench.run_pending_jobs().is_err());

    let job = fx.bench.engine.sync_job(job_id)?.ok_or("job missing")?;
    assert_eq!(job.status, SyncJobStatus::Failed);
    assert!(job.finished_at.is_some());
    assert!(job.error.as_deref().unwrap_or_default().starts_with("sync aborted"));
    assert!(fx
        .bench
        .engine
        .storage()
        .active_sync_job(fx.product, fx.tenant)?
        .is_none());

    // The row the aborted job held is picked up by the next one.
    fx.bench
        .engine
        .storage()
        .conn()
        .execute_batch("DROP TRIGGER lock_override_marks;")?;
    let retry = fx.bench.engine.dispatch_if_needed(fx.product, fx.tenant)?;
    assert!(matches!(retry, DispatchOutcome::Enqueued(id) if id != job_id));
    assert_eq!(fx.bench.run_pending_jobs()?, vec![SyncJobStatus::Completed]);
    assert_eq!(fx.bench.engine.pending_sync_count(fx.product, fx.tenant)?, 0);
    Ok(())
}

// ============================================================================
// Tenant-only and external-only rows
// ============================================================================

#[test]
fn tenant_only_override_edit_and_delete_reach_the_catalog() -> Result<(), Box<dyn std::error::Error>> {
    let mut fx = fixture(true)?;
    let external = fx.external()?;
    let shop = fx.bench.tenant_ctx(fx.product, fx.tenant);
    fx.bench
        .engine
        .stage_create(&shop, VariantDraft::new("P-SHOP1", "Shop only"))?;
    let created = fx.bench.engine.commit_for_tenant(&shop)?;
    let (_, override_id) = *created.created_overrides.first().ok_or("override not created")?;
    fx.bench.run_pending_jobs()?;
    let combination = fx
        .bench
        .engine
        .storage()
        .get_override(override_id)?
        .and_then(|o| o.external_combination_id)
        .ok_or("not pushed")?;

    fx.bench
        .engine
        .stage_update(&shop, Target::Override(override_id), renamed("Boutique"))?;
    let edited = fx.bench.engine.commit_for_tenant(&shop)?;
    assert_eq!(edited.updated, 1);
    assert!(matches!(edited.dispatch, Some(DispatchOutcome::Enqueued(_))));
    assert_eq!(fx.bench.run_pending_jobs()?, vec![SyncJobStatus::Completed]);
    let pushed = fx.bench.catalog.find(fx.tenant, combination).ok_or("combination missing")?;
    assert_eq!(pushed.name, "Boutique");
    assert_eq!(pushed.sku, "P-SHOP1");
    assert_eq!(fx.bench.catalog.writes().creates, 1);

    fx.bench.engine.stage_delete(&shop, Target::Override(override_id))?;
    let deleted = fx.bench.engine.commit_for_tenant(&shop)?;
    assert_eq!(deleted.deleted, 1);
    let record = fx
        .bench
        .engine
        .storage()
        .get_override(override_id)?
        .ok_or("override dropped before the push")?;
    assert_eq!(record.operation, OperationTag::Delete);

    assert_eq!(fx.bench.run_pending_jobs()?, vec![SyncJobStatus::Completed]);
    assert!(fx.bench.catalog.variants(fx.tenant, external).is_empty());
    assert!(fx.bench.engine.storage().get_override(override_id)?.is_none());
    Ok(())
}

#[test]
fn external_only_combination_can_be_edited_and_removed() -> Result<(), Box<dyn std::error::Error>> {
    let mut fx = fixture(true)?;
    let external = fx.external()?;
    let kept = fx.bench.catalog.seed(fx.tenant, external, "EXT-1", "Storefront");
    let removed = fx.bench.catalog.seed(fx.tenant, external, "EXT-2", "Legacy");
    let shop = fx.bench.tenant_ctx(fx.product, fx.tenant);

    fx.bench
        .engine
        .stage_update(&shop, Target::External(kept), renamed("Vitrine"))?;
    fx.bench.engine.stage_delete(&shop, Target::External(removed))?;
    let result = fx.bench.engine.commit_for_tenant(&shop)?;
    assert!(result.is_clean(), "{:?}", result.errors);
    assert_eq!(result.updated, 1);
    assert_eq!(result.deleted, 1);

    let adopted = fx.bench.engine.storage().list_overrides(fx.product, fx.tenant)?;
    assert_eq!(adopted.len(), 2);
    assert!(adopted.iter().all(|o| o.variant_id.is_none()));
    let edit = adopted
        .iter()
        .find(|o| o.external_combination_id == Some(kept))
        .ok_or("edit not adopted")?;
    assert_eq!(edit.operation, OperationTag::Override);
    assert_eq!(edit.payload.basic.sku.as_deref(), Some("EXT-1"));
    assert_eq!(edit.payload.basic.name.as_deref(), Some("Vitrine"));

    assert_eq!(fx.bench.run_pending_jobs()?, vec![SyncJobStatus::Completed]);
    let left = fx.bench.catalog.variants(fx.tenant, external);
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].combination_id, kept);
    assert_eq!(left[0].name, "Vitrine");
    assert_eq!(left[0].sku, "EXT-1");
    let writes = fx.bench.catalog.writes();
    assert_eq!(writes.creates, 0);
    assert_eq!(writes.updates, 1);
    assert_eq!(writes.deletes, 1);

    // A second edit lands on the adopted override, not a new one.
    fx.bench
        .engine
        .stage_update(&shop, Target::External(kept), renamed("Vitrine 2"))?;
    fx.bench.engine.commit_for_tenant(&shop)?;
    assert_eq!(fx.bench.engine.storage().list_overrides(fx.product, fx.tenant)?.len(), 1);
    Ok(())
}

#[test]
fn unknown_external_combination_stays_staged() -> Result<(), Box<dyn std::error::Error>> {
    let mut fx = fixture(true)?;
    let shop = fx.bench.tenant_ctx(fx.product, fx.tenant);
    let missing = ExternalCombinationId::new(4242);
    fx.bench
        .engine
        .stage_update(&shop, Target::External(missing), renamed("Ghost"))?;

    let result = fx.bench.engine.commit_for_tenant(&shop)?;
    assert_eq!(result.errors.len(), 1);
    assert_eq!(
        result.errors[0].key,
        PendingKey::Update(shop.scope(), Target::External(missing))
    );
    assert_eq!(fx.bench.engine.pending(&shop)?.len(), 1);
    assert!(fx.bench.engine.storage().list_overrides(fx.product, fx.tenant)?.is_empty());
    Ok(())
}

// ============================================================================
// Idempotency
// ============================================================================

#[test]
fn rerunning_a_finished_job_writes_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let mut fx = fixture(true)?;
    fx.commit_tenant_update(fx.ids[0], renamed("Rouge"))?;
    let requests = fx.bench.queue.drain();
    assert_eq!(requests.len(), 1);

    assert_eq!(fx.bench.engine.run_job(requests[0])?, SyncJobStatus::Completed);
    let writes = fx.bench.catalog.writes();
    assert_eq!(fx.bench.engine.run_job(requests[0])?, SyncJobStatus::Completed);
    assert_eq!(fx.bench.catalog.writes(), writes);
    Ok(())
}

#[test]
fn unchanged_payload_is_not_pushed_again() -> Result<(), Box<dyn std::error::Error>> {
    let mut fx = fixture(true)?;
    fx.commit_tenant_update(fx.ids[0], renamed("Rouge"))?;
    fx.bench.run_pending_jobs()?;
    let writes = fx.bench.catalog.writes();

    // Same value again: the override goes back to pending with an identical payload.
    fx.commit_tenant_update(fx.ids[0], renamed("Rouge"))?;
    assert_eq!(fx.bench.engine.pending_sync_count(fx.product, fx.tenant)?, 1);
    assert_eq!(fx.bench.run_pending_jobs()?, vec![SyncJobStatus::Completed]);

    assert_eq!(fx.bench.catalog.writes(), writes);
    assert_eq!(fx.bench.engine.pending_sync_count(fx.product, fx.tenant)?, 0);
    Ok(())
}
