use std::collections::HashSet;

use variant_sync_core::{
    AttributeSet, CoreError, ImageSelection, OverrideId, OverridePayload, PendingKey,
    PendingOperation, Product, ProductId, Scope, SkuGenerator, Target, TempId, TenantId, Variant,
    VariantDraft, VariantId,
};
use variant_sync_storage::{CatalogStore, OverrideRecord, OverrideStore, StagingStore};

use crate::{
    EditContext, Engine,
    error::EngineError,
    ledger::{PendingCounts, PendingLedger},
};

impl Engine {
    // ========================================================================
    // Request Lifecycle
    // ========================================================================

    /// Merge the durable copy of the context's ledger into memory. Entries
    /// from the durable copy win on the same key; nothing in memory is lost.
    pub fn begin_request(&mut self, ctx: &EditContext) -> Result<(), EngineError> {
        let durable = match self.storage.get_staged(&ctx.session, ctx.product_id)? {
            Some(bytes) => Some(PendingLedger::decode(&bytes)?),
            None => None,
        };
        let ledger = self.ledgers.entry(ctx.ledger_key()).or_default();
        if let Some(durable) = durable {
            ledger.merge_from(durable);
            tracing::debug!(
                session = %ctx.session, product_id = %ctx.product_id,
                pending = ledger.counts().total(),
                "restored pending ledger"
            );
        }
        Ok(())
    }

    /// Drop the in-memory ledger; the durable copy stays.
    pub fn release_request_state(&mut self, ctx: &EditContext) {
        self.ledgers.remove(&ctx.ledger_key());
    }

    pub(crate) fn ledger_mut(&mut self, ctx: &EditContext) -> Result<&mut PendingLedger, EngineError> {
        if !self.ledgers.contains_key(&ctx.ledger_key()) {
            self.begin_request(ctx)?;
        }
        Ok(self.ledgers.entry(ctx.ledger_key()).or_default())
    }

    pub(crate) fn ledger(&mut self, ctx: &EditContext) -> Result<&PendingLedger, EngineError> {
        Ok(self.ledger_mut(ctx)?)
    }

    pub(crate) fn persist_ledger(&mut self, ctx: &EditContext) -> Result<(), EngineError> {
        let Some(ledger) = self.ledgers.get(&ctx.ledger_key()) else {
            return Ok(());
        };
        if ledger.is_empty() {
            self.storage.forget_staged(&ctx.session, ctx.product_id)?;
        } else {
            let bytes = ledger.encode()?;
            self.storage.put_staged(&ctx.session, ctx.product_id, &bytes)?;
        }
        tracing::debug!(session = %ctx.session, product_id = %ctx.product_id, "saved pending ledger");
        Ok(())
    }

    // ========================================================================
    // Staging
    // ========================================================================

    /// Validate and stage one operation, then write the ledger through.
    pub fn stage(
        &mut self,
        ctx: &EditContext,
        op: PendingOperation,
    ) -> Result<PendingKey, EngineError> {
        self.validate_operation(ctx, &op)?;
        let key = op.key();
        self.ledger_mut(ctx)?.stage(op)?;
        self.persist_ledger(ctx)?;
        tracing::debug!(
            session = %ctx.session, product_id = %ctx.product_id, key = %key,
            "staged pending operation"
        );
        Ok(key)
    }

    pub fn stage_create(
        &mut self,
        ctx: &EditContext,
        draft: VariantDraft,
    ) -> Result<TempId, EngineError> {
        self.require_product(ctx.product_id)?;
        draft.validate()?;
        self.check_attributes(&draft.attributes)?;
        let temp_id = self.ledger_mut(ctx)?.allocate_temp_id()?;
        self.stage(
            ctx,
            PendingOperation::Create {
                temp_id,
                payload: draft,
                scope: ctx.scope(),
            },
        )?;
        Ok(temp_id)
    }

    /// Replace the payload of an already staged create.
    pub fn edit_pending_create(
        &mut self,
        ctx: &EditContext,
        temp_id: TempId,
        draft: VariantDraft,
    ) -> Result<(), EngineError> {
        let scope = match self.ledger(ctx)?.get_create(temp_id) {
            Some(create) => create.scope,
            None => return Err(EngineError::NotStaged(format!("create {temp_id}"))),
        };
        if scope != ctx.scope() {
            return Err(EngineError::InvalidTenantOperation(format!(
                "create {temp_id} belongs to {scope}"
            )));
        }
        self.stage(
            ctx,
            PendingOperation::Create {
                temp_id,
                payload: draft,
                scope,
            },
        )?;
        Ok(())
    }

    /// Stage field overrides for a variant, or, in a tenant context, for a
    /// tenant-only override or an external-only combination.
    pub fn stage_update(
        &mut self,
        ctx: &EditContext,
        target: impl Into<Target>,
        payload: OverridePayload,
    ) -> Result<(), EngineError> {
        self.stage(
            ctx,
            PendingOperation::Update {
                target: target.into(),
                payload,
                scope: ctx.scope(),
            },
        )?;
        Ok(())
    }

    pub fn stage_delete(
        &mut self,
        ctx: &EditContext,
        target: impl Into<Target>,
    ) -> Result<(), EngineError> {
        self.stage(
            ctx,
            PendingOperation::Delete {
                target: target.into(),
                scope: ctx.scope(),
            },
        )?;
        Ok(())
    }

    /// Flip the active flag of a staged create; returns the new value.
    pub fn toggle_pending_active(
        &mut self,
        ctx: &EditContext,
        temp_id: TempId,
    ) -> Result<bool, EngineError> {
        let is_active = match self.ledger_mut(ctx)?.get_create_mut(temp_id) {
            Some(create) => {
                create.draft.is_active = !create.draft.is_active;
                create.draft.is_active
            }
            None => return Err(EngineError::NotStaged(format!("create {temp_id}"))),
        };
        self.persist_ledger(ctx)?;
        Ok(is_active)
    }

    // ========================================================================
    // Undo & Clear
    // ========================================================================

    /// Remove one ledger entry. Returns whether anything was staged under `key`.
    pub fn remove_pending(&mut self, ctx: &EditContext, key: PendingKey) -> Result<bool, EngineError> {
        let removed = self.ledger_mut(ctx)?.remove(key);
        if removed {
            self.persist_ledger(ctx)?;
            tracing::debug!(session = %ctx.session, product_id = %ctx.product_id, key = %key, "removed pending operation");
        }
        Ok(removed)
    }

    pub fn discard_pending_create(
        &mut self,
        ctx: &EditContext,
        temp_id: TempId,
    ) -> Result<bool, EngineError> {
        self.remove_pending(ctx, PendingKey::Create(temp_id))
    }

    pub fn undo_update(
        &mut self,
        ctx: &EditContext,
        target: impl Into<Target>,
    ) -> Result<bool, EngineError> {
        self.remove_pending(ctx, PendingKey::Update(ctx.scope(), target.into()))
    }

    pub fn undo_delete(
        &mut self,
        ctx: &EditContext,
        target: impl Into<Target>,
    ) -> Result<bool, EngineError> {
        self.remove_pending(ctx, PendingKey::Delete(ctx.scope(), target.into()))
    }

    /// Drop every staged operation for the session and product, in all scopes.
    pub fn clear_pending(&mut self, ctx: &EditContext) -> Result<(), EngineError> {
        self.ledger_mut(ctx)?.clear();
        self.storage.forget_staged(&ctx.session, ctx.product_id)?;
        tracing::debug!(session = %ctx.session, product_id = %ctx.product_id, "cleared pending ledger");
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn pending(&mut self, ctx: &EditContext) -> Result<Vec<PendingOperation>, EngineError> {
        Ok(self.ledger(ctx)?.list())
    }

    pub fn pending_counts(&mut self, ctx: &EditContext) -> Result<PendingCounts, EngineError> {
        Ok(self.ledger(ctx)?.scope_counts(ctx.scope()))
    }

    /// Anything staged in the context's scope.
    pub fn has_pending_changes(&mut self, ctx: &EditContext) -> Result<bool, EngineError> {
        Ok(self.pending_counts(ctx)?.total() > 0)
    }

    // ========================================================================
    // SKU Suggestions
    // ========================================================================

    /// `{product}-{CODE}...` from the selected attribute values.
    pub fn suggest_sku(
        &mut self,
        ctx: &EditContext,
        attributes: &AttributeSet,
    ) -> Result<String, EngineError> {
        let product = self.require_product(ctx.product_id)?;
        let codes = self.storage.attribute_codes(attributes)?;
        let staged = self.staged_skus(ctx)?;
        self.generate_sku(|generator, taken| {
            generator.from_attribute_codes(&product.sku, &codes, taken)
        }, &staged)
    }

    /// Next free `{product}-Vnnn`.
    pub fn next_variant_sku(&mut self, ctx: &EditContext) -> Result<String, EngineError> {
        let product = self.require_product(ctx.product_id)?;
        let staged = self.staged_skus(ctx)?;
        self.generate_sku(|generator, taken| generator.next_counter_sku(&product.sku, taken), &staged)
    }

    pub(crate) fn staged_skus(&mut self, ctx: &EditContext) -> Result<HashSet<String>, EngineError> {
        let ledger = self.ledger(ctx)?;
        Ok(ledger
            .list()
            .into_iter()
            .filter_map(|op| match op {
                PendingOperation::Create { payload, .. } => Some(payload.sku),
                PendingOperation::Update { payload, .. } => payload.basic.sku,
                PendingOperation::Delete { .. } => None,
            })
            .collect())
    }

    /// Runs `derive` with a collision check covering storage and `reserved`.
    pub(crate) fn generate_sku(
        &self,
        derive: impl FnOnce(
            &SkuGenerator,
            &mut dyn FnMut(&str) -> bool,
        ) -> Result<String, CoreError>,
        reserved: &HashSet<String>,
    ) -> Result<String, EngineError> {
        let mut storage_error = None;
        let mut taken = |candidate: &str| {
            if reserved.contains(candidate) {
                return true;
            }
            match self.storage.sku_taken(candidate, None) {
                Ok(taken) => taken,
                Err(e) => {
                    storage_error.get_or_insert(e);
                    true
                }
            }
        };
        let result = derive(&self.sku_generator, &mut taken);
        if let Some(e) = storage_error {
            return Err(e.into());
        }
        Ok(result?)
    }

    // ========================================================================
    // Validation
    // ========================================================================

    fn validate_operation(&self, ctx: &EditContext, op: &PendingOperation) -> Result<(), EngineError> {
        if op.scope() != ctx.scope() {
            return Err(EngineError::InvalidTenantOperation(format!(
                "operation for {} staged in {} context",
                op.scope(),
                ctx.scope()
            )));
        }
        self.require_product(ctx.product_id)?;
        match op {
            PendingOperation::Create { payload, .. } => {
                payload.validate()?;
                self.check_attributes(&payload.attributes)?;
            }
            PendingOperation::Update {
                target,
                payload,
                scope,
            } => {
                payload.validate()?;
                if let Some(attributes) = &payload.attributes {
                    self.check_attributes(attributes)?;
                }
                if *scope == Scope::Default
                    && matches!(payload.media.images, Some(ImageSelection::External(_)))
                {
                    return Err(CoreError::validation(
                        "images",
                        "external image ids only apply to tenant overrides",
                    )
                    .into());
                }
                self.check_target(ctx, *target)?;
            }
            PendingOperation::Delete { target, .. } => {
                self.check_target(ctx, *target)?;
            }
        }
        Ok(())
    }

    /// Rows other than shared variants only exist per tenant.
    fn check_target(&self, ctx: &EditContext, target: Target) -> Result<(), EngineError> {
        match (target, ctx.tenant_id) {
            (Target::Variant(variant_id), _) => {
                self.live_variant(ctx.product_id, variant_id)?;
            }
            (Target::Override(override_id), Some(tenant_id)) => {
                self.tenant_only_override(ctx.product_id, tenant_id, override_id)?;
            }
            // Membership in the external catalog is checked at commit, which
            // fetches the snapshot anyway.
            (Target::External(_), Some(_)) => {}
            (target, None) => {
                return Err(EngineError::InvalidTenantOperation(format!(
                    "{target} only exists in a tenant context"
                )));
            }
        }
        Ok(())
    }

    /// An override row with no shared variant behind it, owned by the pair.
    pub(crate) fn tenant_only_override(
        &self,
        product_id: ProductId,
        tenant_id: TenantId,
        override_id: OverrideId,
    ) -> Result<OverrideRecord, EngineError> {
        self.storage
            .get_override(override_id)?
            .filter(|record| {
                record.variant_id.is_none()
                    && record.product_id == product_id
                    && record.tenant_id == tenant_id
            })
            .ok_or(EngineError::OverrideNotFound(override_id))
    }

    pub(crate) fn require_product(&self, product_id: ProductId) -> Result<Product, EngineError> {
        self.storage
            .get_product(product_id)?
            .ok_or(EngineError::ProductNotFound(product_id))
    }

    /// A non-deleted variant that belongs to `product_id`.
    pub(crate) fn live_variant(
        &self,
        product_id: ProductId,
        variant_id: VariantId,
    ) -> Result<Variant, EngineError> {
        let variant = self
            .storage
            .get_variant(variant_id)?
            .filter(|v| !v.deleted)
            .ok_or(EngineError::VariantNotFound(variant_id))?;
        if variant.product_id != product_id {
            return Err(EngineError::VariantProductMismatch(variant_id, product_id));
        }
        Ok(variant)
    }

    pub(crate) fn check_attributes(&self, attributes: &AttributeSet) -> Result<(), EngineError> {
        for (type_id, value_id) in attributes {
            if !self.storage.attribute_value_exists(*type_id, *value_id)? {
                return Err(EngineError::UnknownAttribute {
                    type_id: type_id.get(),
                    value: value_id.get(),
                });
            }
        }
        Ok(())
    }
}
