use variant_sync_core::{
    ExternalCombinationId, ExternalSnapshot, ImageSelection, OverrideId, OverridePayload,
    PendingKey, ProductId, Scope, Target, TempId, TenantId, VariantDraft, VariantId,
    payload::{BasicFields, MediaFields},
};
use variant_sync_storage::{
    CatalogStore, NewOverride, OperationTag, OverrideRecord, OverrideStore, OverrideSyncStatus,
    TenantStore,
};

use crate::{EditContext, Engine, dispatch::DispatchOutcome, error::EngineError};

/// One ledger entry that could not be committed. The entry stays staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitItemError {
    pub key: PendingKey,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitResult {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub errors: Vec<CommitItemError>,
    /// Temp ids of committed default creates and the rows they became.
    pub created_ids: Vec<(TempId, VariantId)>,
    /// Temp ids of committed tenant creates and their `ADD` overrides.
    pub created_overrides: Vec<(TempId, OverrideId)>,
    pub dispatch: Option<DispatchOutcome>,
}

impl CommitResult {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn fail(&mut self, ctx: &EditContext, key: PendingKey, error: EngineError) {
        tracing::error!(
            product_id = %ctx.product_id, key = %key, error = %error,
            "commit item failed"
        );
        self.errors.push(CommitItemError {
            key,
            message: error.to_string(),
        });
    }

    fn absorb(&mut self, other: CommitResult) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.errors.extend(other.errors);
        self.created_ids.extend(other.created_ids);
        self.created_overrides.extend(other.created_overrides);
        if other.dispatch.is_some() {
            self.dispatch = other.dispatch;
        }
    }
}

impl Engine {
    // ========================================================================
    // Default Commit
    // ========================================================================

    /// Apply the default-scope part of the ledger in one transaction:
    /// deletes, then updates, then creates, then product flags. Tenant-scoped
    /// entries stay staged.
    pub fn commit(&mut self, ctx: &EditContext) -> Result<CommitResult, EngineError> {
        let product_id = ctx.product_id;
        self.require_product(product_id)?;
        let ledger = self.ledger(ctx)?.clone();
        let scope = Scope::Default;
        tracing::info!(
            %product_id, pending = ledger.scope_counts(scope).total(),
            "committing default variants"
        );

        let (result, done) = self.in_transaction(|engine| {
            let mut result = CommitResult::default();
            let mut done = Vec::new();

            for target in ledger.deletes_in(scope) {
                let key = PendingKey::Delete(scope, target);
                match engine.in_savepoint(|e| e.commit_delete(product_id, target))? {
                    Ok(()) => {
                        result.deleted += 1;
                        done.push(key);
                    }
                    Err(e) => result.fail(ctx, key, e),
                }
            }

            for (target, payload) in ledger.updates_in(scope) {
                let key = PendingKey::Update(scope, target);
                match engine.in_savepoint(|e| e.commit_update(product_id, target, payload))? {
                    Ok(()) => {
                        result.updated += 1;
                        done.push(key);
                    }
                    Err(e) => result.fail(ctx, key, e),
                }
            }

            for (temp_id, draft) in ledger.creates_in(scope) {
                let key = PendingKey::Create(temp_id);
                match engine.in_savepoint(|e| e.commit_create(product_id, draft))? {
                    Ok(variant_id) => {
                        result.created += 1;
                        result.created_ids.push((temp_id, variant_id));
                        done.push(key);
                    }
                    Err(e) => result.fail(ctx, key, e),
                }
            }

            engine.recompute_product_flags(product_id)?;
            Ok((result, done))
        })?;

        self.forget_committed(ctx, &done)?;
        tracing::info!(
            %product_id, created = result.created, updated = result.updated,
            deleted = result.deleted, failed = result.errors.len(),
            "default commit complete"
        );
        Ok(result)
    }

    fn commit_delete(&mut self, product_id: ProductId, target: Target) -> Result<(), EngineError> {
        let variant_id = default_variant(target)?;
        self.live_variant(product_id, variant_id)?;
        self.storage.soft_delete_variant(variant_id)?;
        Ok(())
    }

    fn commit_update(
        &mut self,
        product_id: ProductId,
        target: Target,
        payload: &OverridePayload,
    ) -> Result<(), EngineError> {
        let variant_id = default_variant(target)?;
        let mut variant = self.live_variant(product_id, variant_id)?;
        variant.apply(payload);
        self.storage.update_variant(&variant)?;
        if let Some(attributes) = &payload.attributes {
            self.check_attributes(attributes)?;
            self.storage.replace_variant_attributes(variant_id, attributes)?;
        }
        if let Some(ImageSelection::Media(images)) = &payload.media.images {
            self.storage.replace_variant_images(variant_id, images)?;
        }
        if payload.basic.is_default == Some(true) {
            self.storage.clear_default_flags(product_id, Some(variant_id))?;
        }
        Ok(())
    }

    fn commit_create(
        &mut self,
        product_id: ProductId,
        draft: &VariantDraft,
    ) -> Result<VariantId, EngineError> {
        draft.validate()?;
        self.check_attributes(&draft.attributes)?;
        let mut draft = draft.clone();
        if self.storage.list_variants(product_id)?.is_empty() {
            draft.is_default = true;
        }
        let variant_id = self.storage.insert_variant(product_id, &draft)?;
        if draft.is_default {
            self.storage.clear_default_flags(product_id, Some(variant_id))?;
        }
        tracing::debug!(%product_id, %variant_id, sku = %draft.sku, "variant created");
        Ok(variant_id)
    }

    /// Keep exactly one default among live variants and refresh the
    /// product's variant-master flag.
    fn recompute_product_flags(&mut self, product_id: ProductId) -> Result<(), EngineError> {
        let live = self.storage.list_variants(product_id)?;
        let flagged = live.iter().find(|v| v.is_default);
        let chosen = flagged
            .or_else(|| live.iter().find(|v| v.is_active))
            .or_else(|| live.first())
            .cloned();

        if let Some(variant) = &chosen {
            if !variant.is_default {
                let mut promoted = variant.clone();
                promoted.is_default = true;
                self.storage.update_variant(&promoted)?;
                tracing::debug!(%product_id, variant_id = %variant.variant_id, "default variant reassigned");
            }
            self.storage
                .clear_default_flags(product_id, Some(variant.variant_id))?;
        }
        self.storage.set_product_variant_state(
            product_id,
            !live.is_empty(),
            chosen.map(|v| v.variant_id),
        )?;
        Ok(())
    }

    fn forget_committed(&mut self, ctx: &EditContext, done: &[PendingKey]) -> Result<(), EngineError> {
        if done.is_empty() {
            return Ok(());
        }
        let ledger = self.ledger_mut(ctx)?;
        for key in done {
            ledger.remove(*key);
        }
        self.persist_ledger(ctx)
    }

    // ========================================================================
    // Tenant Commit
    // ========================================================================

    /// Turn the tenant-scoped part of the ledger into override rows, then
    /// dispatch a sync job if anything was written.
    pub fn commit_for_tenant(&mut self, ctx: &EditContext) -> Result<CommitResult, EngineError> {
        let Some(tenant_id) = ctx.tenant_id else {
            return Err(EngineError::InvalidTenantOperation(
                "tenant commit needs a tenant context".into(),
            ));
        };
        let product_id = ctx.product_id;
        self.require_product(product_id)?;
        let ledger = self.ledger(ctx)?.clone();
        let scope = Scope::Tenant(tenant_id);
        tracing::info!(
            %product_id, %tenant_id, pending = ledger.scope_counts(scope).total(),
            "committing tenant overrides"
        );
        let adopts_external = ledger
            .deletes_in(scope)
            .chain(ledger.updates_in(scope).map(|(target, _)| target))
            .any(|target| matches!(target, Target::External(_)));
        let snapshot = if adopts_external {
            self.fetch_snapshot(product_id, tenant_id)?
        } else {
            ExternalSnapshot::empty(tenant_id)
        };

        let (mut result, done) = self.in_transaction(|engine| {
            let mut result = CommitResult::default();
            let mut done = Vec::new();

            for target in ledger.deletes_in(scope) {
                let key = PendingKey::Delete(scope, target);
                match engine.in_savepoint(|e| {
                    e.commit_tenant_delete(product_id, tenant_id, target, &snapshot)
                })? {
                    Ok(()) => {
                        result.deleted += 1;
                        done.push(key);
                    }
                    Err(e) => result.fail(ctx, key, e),
                }
            }

            for (target, payload) in ledger.updates_in(scope) {
                let key = PendingKey::Update(scope, target);
                match engine.in_savepoint(|e| {
                    e.commit_tenant_update(product_id, tenant_id, target, payload, &snapshot)
                })? {
                    Ok(()) => {
                        result.updated += 1;
                        done.push(key);
                    }
                    Err(e) => result.fail(ctx, key, e),
                }
            }

            for (temp_id, draft) in ledger.creates_in(scope) {
                let key = PendingKey::Create(temp_id);
                match engine.in_savepoint(|e| e.commit_tenant_create(product_id, tenant_id, draft))? {
                    Ok(override_id) => {
                        result.created += 1;
                        result.created_overrides.push((temp_id, override_id));
                        done.push(key);
                    }
                    Err(e) => result.fail(ctx, key, e),
                }
            }
            Ok((result, done))
        })?;

        self.forget_committed(ctx, &done)?;
        tracing::info!(
            %product_id, %tenant_id, created = result.created, updated = result.updated,
            deleted = result.deleted, failed = result.errors.len(),
            "tenant commit complete"
        );

        if result.total() > 0 {
            match self.dispatch_if_needed(product_id, tenant_id) {
                Ok(outcome) => result.dispatch = Some(outcome),
                Err(e) => {
                    tracing::error!(%product_id, %tenant_id, error = %e, "sync dispatch after commit failed");
                }
            }
        }
        Ok(result)
    }

    fn commit_tenant_delete(
        &mut self,
        product_id: ProductId,
        tenant_id: TenantId,
        target: Target,
        snapshot: &ExternalSnapshot,
    ) -> Result<(), EngineError> {
        let variant_id = match target {
            Target::Variant(variant_id) => variant_id,
            Target::Override(override_id) => {
                let record = self.tenant_only_override(product_id, tenant_id, override_id)?;
                return self.delete_tenant_only(record);
            }
            Target::External(combination_id) => {
                if let Some(record) = self.adopted_override(product_id, tenant_id, combination_id)? {
                    return self.delete_tenant_only(record);
                }
                self.adopt_external(
                    product_id,
                    tenant_id,
                    combination_id,
                    OperationTag::Delete,
                    &OverridePayload::default(),
                    snapshot,
                )?;
                return Ok(());
            }
        };
        self.live_variant(product_id, variant_id)?;
        let payload = self
            .storage
            .override_for_variant(tenant_id, variant_id)?
            .map(|o| o.payload)
            .unwrap_or_default();
        self.storage.upsert_override(&NewOverride {
            tenant_id,
            product_id,
            variant_id: Some(variant_id),
            operation: OperationTag::Delete,
            payload,
        })?;
        Ok(())
    }

    /// A tenant-only row never pushed is simply dropped. One the external
    /// catalog has seen, or one a job holds, becomes a `DELETE` for the job.
    fn delete_tenant_only(&mut self, record: OverrideRecord) -> Result<(), EngineError> {
        let override_id = record.override_id;
        if record.external_combination_id.is_none()
            && record.sync_status != OverrideSyncStatus::InProgress
        {
            self.storage.delete_override(override_id)?;
            tracing::debug!(%override_id, "unsynced tenant-only override dropped");
            return Ok(());
        }
        self.storage
            .rewrite_override(override_id, OperationTag::Delete, &record.payload)?;
        tracing::debug!(%override_id, "tenant-only override marked for deletion");
        Ok(())
    }

    fn commit_tenant_update(
        &mut self,
        product_id: ProductId,
        tenant_id: TenantId,
        target: Target,
        payload: &OverridePayload,
        snapshot: &ExternalSnapshot,
    ) -> Result<(), EngineError> {
        let variant_id = match target {
            Target::Variant(variant_id) => variant_id,
            Target::Override(override_id) => {
                let record = self.tenant_only_override(product_id, tenant_id, override_id)?;
                return self.update_tenant_only(record, target, payload);
            }
            Target::External(combination_id) => {
                if let Some(record) = self.adopted_override(product_id, tenant_id, combination_id)? {
                    return self.update_tenant_only(record, target, payload);
                }
                let payload = self.resolve_media(tenant_id, payload.clone())?;
                self.adopt_external(
                    product_id,
                    tenant_id,
                    combination_id,
                    OperationTag::Override,
                    &payload,
                    snapshot,
                )?;
                return Ok(());
            }
        };
        self.live_variant(product_id, variant_id)?;
        let existing = self.storage.override_for_variant(tenant_id, variant_id)?;
        if existing
            .as_ref()
            .is_some_and(|o| o.operation == OperationTag::Delete)
        {
            return Err(EngineError::PendingDelete(target));
        }
        let mut merged = existing.map(|o| o.payload).unwrap_or_default();
        merged.merge(self.resolve_media(tenant_id, payload.clone())?);

        let operation = if self
            .storage
            .confirmed_external_id(variant_id, tenant_id)?
            .is_some()
        {
            OperationTag::Override
        } else {
            OperationTag::Add
        };
        self.storage.upsert_override(&NewOverride {
            tenant_id,
            product_id,
            variant_id: Some(variant_id),
            operation,
            payload: merged,
        })?;
        tracing::debug!(%product_id, %tenant_id, %variant_id, tag = operation.as_str(), "override written");
        Ok(())
    }

    fn update_tenant_only(
        &mut self,
        record: OverrideRecord,
        target: Target,
        payload: &OverridePayload,
    ) -> Result<(), EngineError> {
        if record.operation == OperationTag::Delete {
            return Err(EngineError::PendingDelete(target));
        }
        let mut merged = record.payload;
        merged.merge(self.resolve_media(record.tenant_id, payload.clone())?);
        self.storage
            .rewrite_override(record.override_id, record.operation, &merged)?;
        tracing::debug!(
            override_id = %record.override_id, tag = record.operation.as_str(),
            "tenant-only override rewritten"
        );
        Ok(())
    }

    /// Tenant-only override already tracking `combination_id`, if any.
    fn adopted_override(
        &self,
        product_id: ProductId,
        tenant_id: TenantId,
        combination_id: ExternalCombinationId,
    ) -> Result<Option<OverrideRecord>, EngineError> {
        Ok(self
            .storage
            .list_overrides(product_id, tenant_id)?
            .into_iter()
            .find(|o| o.variant_id.is_none() && o.external_combination_id == Some(combination_id)))
    }

    /// New tenant-only override for a combination only the external catalog
    /// has, seeded from what the catalog shows so the push keeps it intact.
    fn adopt_external(
        &mut self,
        product_id: ProductId,
        tenant_id: TenantId,
        combination_id: ExternalCombinationId,
        operation: OperationTag,
        staged: &OverridePayload,
        snapshot: &ExternalSnapshot,
    ) -> Result<OverrideId, EngineError> {
        let external = snapshot
            .find_by_combination(combination_id)
            .ok_or(EngineError::CombinationNotFound(combination_id))?;
        let mut payload = OverridePayload {
            basic: BasicFields {
                sku: Some(external.sku.clone()),
                name: Some(external.name.clone()),
                is_active: Some(external.is_active),
                is_default: Some(external.is_default),
                position: Some(external.position),
            },
            media: MediaFields {
                images: Some(ImageSelection::External(external.images.clone())),
            },
            ..OverridePayload::default()
        };
        payload.merge(staged.clone());
        let override_id = self.storage.upsert_override(&NewOverride {
            tenant_id,
            product_id,
            variant_id: None,
            operation,
            payload,
        })?;
        self.storage
            .set_override_combination(override_id, Some(combination_id))?;
        tracing::debug!(
            %product_id, %tenant_id, %combination_id, %override_id, tag = operation.as_str(),
            "external combination adopted"
        );
        Ok(override_id)
    }

    fn commit_tenant_create(
        &mut self,
        product_id: ProductId,
        tenant_id: TenantId,
        draft: &VariantDraft,
    ) -> Result<OverrideId, EngineError> {
        draft.validate()?;
        self.check_attributes(&draft.attributes)?;
        let payload = self.resolve_media(tenant_id, OverridePayload::from_draft(draft))?;
        let override_id = self.storage.upsert_override(&NewOverride {
            tenant_id,
            product_id,
            variant_id: None,
            operation: OperationTag::Add,
            payload,
        })?;
        Ok(override_id)
    }

    /// Swap internal media ids for the tenant's external image ids.
    fn resolve_media(
        &self,
        tenant_id: TenantId,
        mut payload: OverridePayload,
    ) -> Result<OverridePayload, EngineError> {
        if let Some(ImageSelection::Media(media)) = &payload.media.images {
            let external = self.storage.external_image_ids(tenant_id, media)?;
            if external.len() < media.len() {
                tracing::warn!(
                    %tenant_id, unmapped = media.len() - external.len(),
                    "media without external image ids dropped"
                );
            }
            payload.media.images = Some(ImageSelection::External(external));
        }
        Ok(payload)
    }

    // ========================================================================
    // Save & Override Maintenance
    // ========================================================================

    /// Default commit, then the tenant commit when `ctx` names a tenant.
    pub fn save(&mut self, ctx: &EditContext) -> Result<CommitResult, EngineError> {
        let mut result = self.commit(ctx)?;
        if ctx.tenant_id.is_some() {
            result.absorb(self.commit_for_tenant(ctx)?);
        }
        Ok(result)
    }

    /// Revert a persisted `DELETE` override so the variant inherits again.
    /// Returns the dispatch outcome when the variant has to be pushed back.
    pub fn unhide_variant(
        &mut self,
        ctx: &EditContext,
        variant_id: VariantId,
    ) -> Result<Option<DispatchOutcome>, EngineError> {
        let Some(tenant_id) = ctx.tenant_id else {
            return Err(EngineError::InvalidTenantOperation(
                "unhide needs a tenant context".into(),
            ));
        };
        self.live_variant(ctx.product_id, variant_id)?;
        let record = self
            .storage
            .override_for_variant(tenant_id, variant_id)?
            .filter(|o| o.operation == OperationTag::Delete)
            .ok_or_else(|| EngineError::NotStaged(format!("delete override for variant {variant_id}")))?;
        self.remove_pending(ctx, PendingKey::Delete(ctx.scope(), variant_id.into()))?;

        let still_external = !record.is_synced()
            || self
                .storage
                .confirmed_external_id(variant_id, tenant_id)?
                .is_some();
        if still_external {
            self.storage.delete_override(record.override_id)?;
            tracing::info!(product_id = %ctx.product_id, %tenant_id, %variant_id, "variant unhidden");
            return Ok(None);
        }

        self.storage.upsert_override(&NewOverride {
            tenant_id,
            product_id: ctx.product_id,
            variant_id: Some(variant_id),
            operation: OperationTag::Add,
            payload: record.payload,
        })?;
        tracing::info!(product_id = %ctx.product_id, %tenant_id, %variant_id, "variant unhidden, re-adding externally");
        Ok(Some(self.dispatch_if_needed(ctx.product_id, tenant_id)?))
    }

    pub fn pending_sync_count(&self, product_id: ProductId, tenant_id: TenantId) -> Result<usize, EngineError> {
        Ok(self.storage.count_overrides_needing_sync(product_id, tenant_id)?)
    }

    pub fn has_overrides(&self, product_id: ProductId, tenant_id: TenantId) -> Result<bool, EngineError> {
        Ok(!self.storage.list_overrides(product_id, tenant_id)?.is_empty())
    }

    /// Stage a default-scope create for every row the tenant context shows,
    /// with fresh counter SKUs. Rows that do not validate are skipped.
    pub fn copy_variants_from_tenant(&mut self, ctx: &EditContext) -> Result<Vec<TempId>, EngineError> {
        if ctx.tenant_id.is_none() {
            return Err(EngineError::InvalidTenantOperation(
                "copy needs a tenant context".into(),
            ));
        }
        let product = self.require_product(ctx.product_id)?;
        let rows = self.resolve(ctx)?;
        let target = ctx.without_tenant();
        let mut reserved = self.staged_skus(&target)?;
        let mut staged = Vec::new();

        for row in rows.iter().filter(|row| !row.strikethrough) {
            let sku = self.generate_sku(
                |generator, taken| generator.next_counter_sku(&product.sku, taken),
                &reserved,
            )?;
            reserved.insert(sku.clone());

            let mut draft = VariantDraft::new(sku, row.name.clone()).with_position(row.position);
            draft.is_active = row.is_active;
            if let Some(source) = row.variant_id {
                if let Some(variant) = self.storage.get_variant(source)? {
                    draft.attributes = variant.attributes;
                    draft.images = variant.images;
                }
            }
            match self.stage_create(&target, draft) {
                Ok(temp_id) => staged.push(temp_id),
                Err(EngineError::Core(e)) => {
                    tracing::warn!(product_id = %ctx.product_id, sku = %row.sku, error = %e, "row not copied");
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!(product_id = %ctx.product_id, copied = staged.len(), "variants copied from tenant");
        Ok(staged)
    }
}

/// Default-scope entries only ever name shared variants.
fn default_variant(target: Target) -> Result<VariantId, EngineError> {
    target.variant().ok_or_else(|| {
        EngineError::InvalidTenantOperation(format!("{target} only exists in a tenant context"))
    })
}
