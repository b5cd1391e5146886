use variant_sync_core::{
    OverrideField, OverridePayload, PendingKey, ProductId, Scope, Target, TenantId, VariantDraft,
    VariantId, VariantStatus,
};
use variant_sync_engine::{CatalogError, DisplayId, DisplaySource, DisplayVariant};
use variant_sync_harness::TestWorkbench;
use variant_sync_storage::OperationTag;

fn renamed(name: &str) -> OverridePayload {
    let mut payload = OverridePayload::default();
    payload.basic.name = Some(name.to_string());
    payload
}

/// Product `PROD` with `X` (Red, position 0) and `Y` (Blue, position 1).
fn catalog_with_two() -> Result<(TestWorkbench, ProductId, Vec<VariantId>), Box<dyn std::error::Error>> {
    let mut bench = TestWorkbench::new()?;
    let product = bench.create_product("PROD")?;
    let ids = bench.commit_variants(
        product,
        vec![
            VariantDraft::new("X", "Red").with_position(0),
            VariantDraft::new("Y", "Blue").with_position(1),
        ],
    )?;
    Ok((bench, product, ids))
}

fn row_for(rows: &[DisplayVariant], variant_id: VariantId) -> Result<&DisplayVariant, String> {
    rows.iter()
        .find(|row| row.variant_id == Some(variant_id))
        .ok_or_else(|| format!("no row for variant {variant_id}"))
}

fn shop(bench: &mut TestWorkbench, product: ProductId) -> Result<TenantId, Box<dyn std::error::Error>> {
    let tenant = bench.create_tenant("shop")?;
    bench.link(tenant, product)?;
    Ok(tenant)
}

// ============================================================================
// Default context
// ============================================================================

#[test]
fn default_context_shows_staged_rows_in_position_order() -> Result<(), Box<dyn std::error::Error>> {
    let (mut bench, product, ids) = catalog_with_two()?;
    let ctx = bench.default_ctx(product);

    let temp_id = bench
        .engine
        .stage_create(&ctx, VariantDraft::new("PROD-V001", "Green").with_position(5))?;
    bench.engine.stage_delete(&ctx, ids[1])?;
    bench.engine.stage_update(&ctx, ids[0], renamed("Crimson"))?;

    let rows = bench.engine.resolve(&ctx)?;
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.status == VariantStatus::Default));
    let order: Vec<DisplayId> = rows.iter().map(|row| row.id).collect();
    assert_eq!(
        order,
        vec![
            DisplayId::Variant(ids[0]),
            DisplayId::Variant(ids[1]),
            DisplayId::Temp(temp_id)
        ]
    );

    assert_eq!(rows[0].name, "Crimson");
    assert!(rows[0].pending_update);
    assert!(rows[1].pending_delete);
    assert!(rows[1].strikethrough);
    assert_eq!(rows[1].undo, Some(PendingKey::Delete(Scope::Default, ids[1].into())));
    assert!(rows[2].pending_create);
    assert_eq!(rows[2].source, DisplaySource::Staged);
    assert_eq!(rows[2].undo, Some(PendingKey::Create(temp_id)));
    Ok(())
}

// ============================================================================
// Tenant context, empty external catalog
// ============================================================================

#[test]
fn empty_snapshot_projects_overrides_onto_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let (mut bench, product, ids) = catalog_with_two()?;
    let tenant = shop(&mut bench, product)?;
    let ctx = bench.tenant_ctx(product, tenant);

    let rows = bench.engine.resolve(&ctx)?;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.status == VariantStatus::Inherited));

    bench.engine.stage_update(&ctx, ids[0], renamed("Rouge"))?;
    let temp_id = bench
        .engine
        .stage_create(&ctx, VariantDraft::new("PROD-SHOP", "Shop only").with_position(9))?;
    let rows = bench.engine.resolve(&ctx)?;
    assert_eq!(rows.len(), 3);
    let x = row_for(&rows, ids[0])?;
    assert_eq!(x.status, VariantStatus::PendingSync);
    assert_eq!(x.name, "Rouge");
    assert!(x.pending_update);
    assert_eq!(row_for(&rows, ids[1])?.status, VariantStatus::Inherited);
    assert_eq!(rows[2].id, DisplayId::Temp(temp_id));
    assert_eq!(rows[2].status, VariantStatus::PendingSync);

    bench.engine.commit_for_tenant(&ctx)?;
    let rows = bench.engine.resolve(&ctx)?;
    let x = row_for(&rows, ids[0])?;
    assert_eq!(x.status, VariantStatus::PendingSync);
    assert_eq!(x.source, DisplaySource::Override);
    assert_eq!(x.operation, Some(OperationTag::Add));
    assert!(!x.pending_update);
    assert!(rows
        .iter()
        .any(|row| matches!(row.id, DisplayId::Override(_)) && row.sku == "PROD-SHOP"));
    Ok(())
}

#[test]
fn persisted_delete_is_struck_through_not_hidden() -> Result<(), Box<dyn std::error::Error>> {
    let (mut bench, product, ids) = catalog_with_two()?;
    let tenant = shop(&mut bench, product)?;
    let ctx = bench.tenant_ctx(product, tenant);

    bench.engine.stage_delete(&ctx, ids[1])?;
    let staged = bench.engine.resolve(&ctx)?;
    let y = row_for(&staged, ids[1])?;
    assert!(y.strikethrough);
    assert!(y.pending_delete);

    bench.engine.commit_for_tenant(&ctx)?;
    let rows = bench.engine.resolve(&ctx)?;
    let y = row_for(&rows, ids[1])?;
    assert!(y.strikethrough);
    assert!(!y.pending_delete);
    assert_eq!(y.operation, Some(OperationTag::Delete));
    assert_eq!(y.status, VariantStatus::PendingSync);
    Ok(())
}

#[test]
fn tenant_only_rows_carry_undo_handles() -> Result<(), Box<dyn std::error::Error>> {
    let (mut bench, product, _) = catalog_with_two()?;
    let tenant = shop(&mut bench, product)?;
    let ctx = bench.tenant_ctx(product, tenant);
    bench
        .engine
        .stage_create(&ctx, VariantDraft::new("SHOP-1", "Shop only").with_position(5))?;
    let created = bench.engine.commit_for_tenant(&ctx)?;
    let (_, override_id) = *created.created_overrides.first().ok_or("override not created")?;
    let target = Target::Override(override_id);
    let scope = Scope::Tenant(tenant);

    bench.engine.stage_update(&ctx, target, renamed("Boutique"))?;
    let rows = bench.engine.resolve(&ctx)?;
    let row = rows
        .iter()
        .find(|row| row.id == DisplayId::Override(override_id))
        .ok_or("tenant-only row missing")?;
    assert_eq!(row.name, "Boutique");
    assert!(row.pending_update);
    assert_eq!(row.undo, Some(PendingKey::Update(scope, target)));

    assert!(bench.engine.undo_update(&ctx, target)?);
    bench.engine.stage_delete(&ctx, target)?;
    let rows = bench.engine.resolve(&ctx)?;
    let row = rows
        .iter()
        .find(|row| row.id == DisplayId::Override(override_id))
        .ok_or("tenant-only row missing")?;
    assert_eq!(row.name, "Shop only");
    assert!(row.pending_delete);
    assert!(row.strikethrough);
    assert_eq!(row.undo, Some(PendingKey::Delete(scope, target)));

    let handle = row.undo.ok_or("no undo handle")?;
    assert!(bench.engine.remove_pending(&ctx, handle)?);
    let rows = bench.engine.resolve(&ctx)?;
    let row = rows
        .iter()
        .find(|row| row.id == DisplayId::Override(override_id))
        .ok_or("tenant-only row missing")?;
    assert!(!row.strikethrough);
    assert_eq!(row.undo, None);
    Ok(())
}

#[test]
fn failed_fetch_falls_back_to_projection() -> Result<(), Box<dyn std::error::Error>> {
    let (mut bench, product, ids) = catalog_with_two()?;
    let tenant = bench.create_tenant("shop")?;
    let external = bench.link(tenant, product)?;
    bench.catalog.seed(tenant, external, "X-S1", "Red");
    bench
        .catalog
        .fail_fetches(Some(CatalogError::Unavailable("timeout".into())));
    let ctx = bench.tenant_ctx(product, tenant);

    let rows = bench.engine.resolve(&ctx)?;
    assert_eq!(rows.len(), 2);
    assert_eq!(row_for(&rows, ids[0])?.status, VariantStatus::Inherited);
    Ok(())
}

// ============================================================================
// Tenant context, live external catalog
// ============================================================================

#[test]
fn suffixed_sku_is_same_until_active_flag_differs() -> Result<(), Box<dyn std::error::Error>> {
    let (mut bench, product, ids) = catalog_with_two()?;
    let tenant = bench.create_tenant("shop")?;
    let external = bench.link(tenant, product)?;
    let combination = bench.catalog.seed(tenant, external, &format!("X-S{tenant}"), "Red");
    let ctx = bench.tenant_ctx(product, tenant);

    let rows = bench.engine.resolve(&ctx)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].variant_id, Some(ids[0]));
    assert_eq!(rows[0].status, VariantStatus::Same);
    assert_eq!(rows[0].sku, format!("X-S{tenant}"));
    assert_eq!(
        bench.engine.classify_variant(&ctx, ids[0], None)?,
        VariantStatus::Same
    );

    bench.catalog.edit(tenant, combination, |v| v.is_active = false);
    assert_eq!(
        bench.engine.classify_variant(&ctx, ids[0], None)?,
        VariantStatus::Different
    );
    assert_eq!(
        bench
            .engine
            .classify_variant(&ctx, ids[0], Some(OverrideField::Sku))?,
        VariantStatus::Same
    );
    assert_eq!(bench.engine.resolve(&ctx)?[0].status, VariantStatus::Different);
    Ok(())
}

#[test]
fn pending_field_is_pending_sync_others_compare() -> Result<(), Box<dyn std::error::Error>> {
    let (mut bench, product, ids) = catalog_with_two()?;
    let tenant = bench.create_tenant("shop")?;
    let external = bench.link(tenant, product)?;
    bench.catalog.seed(tenant, external, &format!("X-S{tenant}"), "Red");
    let ctx = bench.tenant_ctx(product, tenant);

    bench.engine.stage_update(&ctx, ids[0], renamed("Rouge"))?;
    assert_eq!(
        bench
            .engine
            .classify_variant(&ctx, ids[0], Some(OverrideField::Name))?,
        VariantStatus::PendingSync
    );
    assert_eq!(
        bench
            .engine
            .classify_variant(&ctx, ids[0], Some(OverrideField::IsActive))?,
        VariantStatus::Same
    );
    assert_eq!(bench.engine.resolve(&ctx)?[0].status, VariantStatus::PendingSync);

    // No tenant, no comparison.
    let default_ctx = bench.default_ctx(product);
    assert_eq!(
        bench.engine.classify_variant(&default_ctx, ids[0], None)?,
        VariantStatus::Default
    );
    Ok(())
}

#[test]
fn unmatched_external_row_is_different() -> Result<(), Box<dyn std::error::Error>> {
    let (mut bench, product, _) = catalog_with_two()?;
    let tenant = bench.create_tenant("shop")?;
    let external = bench.link(tenant, product)?;
    let stray = bench.catalog.seed(tenant, external, "LEGACY-9", "Old stock");
    let ctx = bench.tenant_ctx(product, tenant);

    let rows = bench.engine.resolve(&ctx)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, DisplayId::External(stray));
    assert_eq!(rows[0].source, DisplaySource::External);
    assert_eq!(rows[0].status, VariantStatus::Different);
    assert_eq!(rows[0].variant_id, None);
    Ok(())
}

#[test]
fn external_only_row_shows_staged_edit_and_delete() -> Result<(), Box<dyn std::error::Error>> {
    let (mut bench, product, _) = catalog_with_two()?;
    let tenant = bench.create_tenant("shop")?;
    let external = bench.link(tenant, product)?;
    let renamed_row = bench.catalog.seed(tenant, external, "LEGACY-1", "Old stock");
    let dropped_row = bench.catalog.seed(tenant, external, "LEGACY-2", "Older stock");
    let ctx = bench.tenant_ctx(product, tenant);
    let scope = Scope::Tenant(tenant);

    bench
        .engine
        .stage_update(&ctx, Target::External(renamed_row), renamed("Clearance"))?;
    bench.engine.stage_delete(&ctx, Target::External(dropped_row))?;
    let rows = bench.engine.resolve(&ctx)?;
    assert_eq!(rows.len(), 2);

    let edited = rows
        .iter()
        .find(|row| row.id == DisplayId::External(renamed_row))
        .ok_or("edited row missing")?;
    assert_eq!(edited.name, "Clearance");
    assert_eq!(edited.status, VariantStatus::PendingSync);
    assert_eq!(
        edited.undo,
        Some(PendingKey::Update(scope, Target::External(renamed_row)))
    );

    let dropped = rows
        .iter()
        .find(|row| row.id == DisplayId::External(dropped_row))
        .ok_or("deleted row missing")?;
    assert!(dropped.strikethrough);
    assert_eq!(
        dropped.undo,
        Some(PendingKey::Delete(scope, Target::External(dropped_row)))
    );

    assert!(bench.engine.undo_delete(&ctx, Target::External(dropped_row))?);
    let rows = bench.engine.resolve(&ctx)?;
    let restored = rows
        .iter()
        .find(|row| row.id == DisplayId::External(dropped_row))
        .ok_or("deleted row missing")?;
    assert!(!restored.strikethrough);
    assert_eq!(restored.status, VariantStatus::Different);
    Ok(())
}

#[test]
fn synced_rows_join_through_the_mapping_table() -> Result<(), Box<dyn std::error::Error>> {
    let (mut bench, product, ids) = catalog_with_two()?;
    let tenant = shop(&mut bench, product)?;
    let ctx = bench.tenant_ctx(product, tenant);

    let mut sku = OverridePayload::default();
    sku.basic.sku = Some("SHOP-RED".into());
    bench.engine.stage_update(&ctx, ids[0], sku)?;
    bench
        .engine
        .stage_create(&ctx, VariantDraft::new("SHOP-ONLY", "Exclusive"))?;
    bench.engine.commit_for_tenant(&ctx)?;
    bench.run_pending_jobs()?;

    let rows = bench.engine.resolve(&ctx)?;
    assert_eq!(rows.len(), 2);
    let x = row_for(&rows, ids[0])?;
    assert_eq!(x.sku, "SHOP-RED");
    assert_eq!(x.status, VariantStatus::Same);
    let exclusive = rows
        .iter()
        .find(|row| matches!(row.id, DisplayId::Override(_)))
        .ok_or("tenant-only row missing")?;
    assert_eq!(exclusive.sku, "SHOP-ONLY");
    assert_eq!(exclusive.status, VariantStatus::Same);
    Ok(())
}

#[test]
fn copy_from_tenant_stages_default_creates() -> Result<(), Box<dyn std::error::Error>> {
    let (mut bench, product, ids) = catalog_with_two()?;
    let tenant = bench.create_tenant("shop")?;
    let external = bench.link(tenant, product)?;
    bench.catalog.seed(tenant, external, &format!("X-S{tenant}"), "Red");
    bench.catalog.seed(tenant, external, "LEGACY-9", "Old stock");
    let ctx = bench.tenant_ctx(product, tenant);

    let staged = bench.engine.copy_variants_from_tenant(&ctx)?;
    assert_eq!(staged.len(), 2);

    let default_ctx = bench.default_ctx(product);
    let rows = bench.engine.resolve(&default_ctx)?;
    let created: Vec<&DisplayVariant> = rows.iter().filter(|row| row.pending_create).collect();
    let mut skus: Vec<&str> = created.iter().map(|row| row.sku.as_str()).collect();
    skus.sort_unstable();
    assert_eq!(skus, vec!["PROD-V001", "PROD-V002"]);
    assert!(created.iter().any(|row| row.name == "Old stock"));
    assert_eq!(row_for(&rows, ids[0])?.status, VariantStatus::Default);
    Ok(())
}
