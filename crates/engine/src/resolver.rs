//! Merged, status-annotated variant list for one edit context.
//!
//! Priority when values disagree: staged edit, then tenant override, then
//! the external live snapshot, then the default variant.

use std::collections::{HashMap, HashSet};

use variant_sync_core::{
    ExternalCombinationId, ExternalSnapshot, ExternalVariant, OverrideField, OverrideId,
    OverridePayload, PendingKey, ProductId, Scope, Target, TempId, TenantId, Variant, VariantDraft,
    VariantFacts, VariantId, VariantStatus, classify::classify,
};
use variant_sync_storage::{
    CatalogStore, OperationTag, OverrideRecord, OverrideStore, OverrideSyncStatus, TenantStore,
};

use crate::{EditContext, Engine, error::EngineError, ledger::PendingLedger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayId {
    Temp(TempId),
    Variant(VariantId),
    /// Tenant-only variant.
    Override(OverrideId),
    /// Present only in the tenant's catalog.
    External(ExternalCombinationId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplaySource {
    Default,
    Override,
    External,
    Staged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayVariant {
    pub id: DisplayId,
    pub variant_id: Option<VariantId>,
    pub sku: String,
    pub name: String,
    pub is_active: bool,
    pub is_default: bool,
    pub position: i32,
    pub image_count: usize,
    pub status: VariantStatus,
    pub source: DisplaySource,
    pub operation: Option<OperationTag>,
    pub override_id: Option<OverrideId>,
    pub sync_status: Option<OverrideSyncStatus>,
    pub pending_create: bool,
    pub pending_update: bool,
    pub pending_delete: bool,
    pub strikethrough: bool,
    /// Ledger key that reverts this row's staged change, if it has one.
    pub undo: Option<PendingKey>,
}

impl DisplayVariant {
    fn from_variant(variant: &Variant, status: VariantStatus) -> Self {
        Self {
            id: DisplayId::Variant(variant.variant_id),
            variant_id: Some(variant.variant_id),
            sku: variant.sku.clone(),
            name: variant.name.clone(),
            is_active: variant.is_active,
            is_default: variant.is_default,
            position: variant.position,
            image_count: variant.images.len(),
            status,
            source: DisplaySource::Default,
            operation: None,
            override_id: None,
            sync_status: None,
            pending_create: false,
            pending_update: false,
            pending_delete: false,
            strikethrough: false,
            undo: None,
        }
    }

    fn from_draft(temp_id: TempId, draft: &VariantDraft, status: VariantStatus) -> Self {
        Self {
            id: DisplayId::Temp(temp_id),
            variant_id: None,
            sku: draft.sku.clone(),
            name: draft.name.clone(),
            is_active: draft.is_active,
            is_default: draft.is_default,
            position: draft.position,
            image_count: draft.images.len(),
            status,
            source: DisplaySource::Staged,
            operation: None,
            override_id: None,
            sync_status: None,
            pending_create: true,
            pending_update: false,
            pending_delete: false,
            strikethrough: false,
            undo: Some(PendingKey::Create(temp_id)),
        }
    }

    fn from_external(external: &ExternalVariant, status: VariantStatus) -> Self {
        Self {
            id: DisplayId::External(external.combination_id),
            variant_id: None,
            sku: external.sku.clone(),
            name: external.name.clone(),
            is_active: external.is_active,
            is_default: external.is_default,
            position: external.position,
            image_count: external.images.len(),
            status,
            source: DisplaySource::External,
            operation: None,
            override_id: None,
            sync_status: None,
            pending_create: false,
            pending_update: false,
            pending_delete: false,
            strikethrough: false,
            undo: None,
        }
    }

    fn show_external(&mut self, external: &ExternalVariant) {
        self.sku = external.sku.clone();
        self.name = external.name.clone();
        self.is_active = external.is_active;
        self.image_count = external.images.len();
    }

    fn apply(&mut self, payload: &OverridePayload) {
        let basic = &payload.basic;
        if let Some(sku) = &basic.sku {
            self.sku = sku.clone();
        }
        if let Some(name) = &basic.name {
            self.name = name.clone();
        }
        if let Some(is_active) = basic.is_active {
            self.is_active = is_active;
        }
        if let Some(is_default) = basic.is_default {
            self.is_default = is_default;
        }
        if let Some(position) = basic.position {
            self.position = position;
        }
        if let Some(images) = &payload.media.images {
            self.image_count = images.len();
        }
    }

    /// Lay the staged update and delete for `target` over the row. Returns
    /// whether anything was staged.
    fn apply_staged(&mut self, ledger: &PendingLedger, scope: Scope, target: Target) -> bool {
        let mut staged = false;
        if let Some(payload) = ledger.get_update(scope, target) {
            self.apply(payload);
            self.pending_update = true;
            self.undo = Some(PendingKey::Update(scope, target));
            staged = true;
        }
        if ledger.is_deleted(scope, target) {
            self.pending_delete = true;
            self.strikethrough = true;
            self.undo = Some(PendingKey::Delete(scope, target));
            staged = true;
        }
        staged
    }
}

/// Everything tenant-specific a resolve needs, loaded once.
struct TenantView {
    tenant_id: TenantId,
    snapshot: ExternalSnapshot,
    overrides: Vec<OverrideRecord>,
    confirmed: HashMap<VariantId, ExternalCombinationId>,
}

impl TenantView {
    fn scope(&self) -> Scope {
        Scope::Tenant(self.tenant_id)
    }

    fn override_for(&self, variant_id: VariantId) -> Option<&OverrideRecord> {
        self.overrides
            .iter()
            .find(|o| o.variant_id == Some(variant_id))
    }

    /// Mapping table first, then the override's recorded combination, then SKU.
    fn external_for(&self, variant: &Variant) -> Option<&ExternalVariant> {
        let record = self.override_for(variant.variant_id);
        let known = self
            .confirmed
            .get(&variant.variant_id)
            .copied()
            .or_else(|| record.and_then(|o| o.external_combination_id));
        if let Some(found) = known.and_then(|id| self.snapshot.find_by_combination(id)) {
            return Some(found);
        }
        let overridden_sku = record.and_then(|o| o.payload.basic.sku.as_deref());
        let found = overridden_sku
            .and_then(|sku| self.snapshot.find_by_sku(sku))
            .or_else(|| self.snapshot.find_by_sku(&variant.sku));
        if found.is_none() {
            tracing::debug!(
                tenant_id = %self.tenant_id, variant_id = %variant.variant_id, sku = %variant.sku,
                "no external match for variant"
            );
        }
        found
    }

    /// What the tenant should show for `variant` once everything is synced.
    fn expected_facts(&self, variant: &Variant) -> VariantFacts {
        let facts = VariantFacts::from_variant(variant);
        match self.override_for(variant.variant_id) {
            Some(o) if o.operation != OperationTag::Delete => facts.with_payload(&o.payload),
            _ => facts,
        }
    }

    /// Un-synced override payload with the staged update laid over it.
    fn pending_payload(&self, ledger: &PendingLedger, variant_id: VariantId) -> Option<OverridePayload> {
        let mut pending: Option<OverridePayload> = self
            .override_for(variant_id)
            .filter(|o| !o.is_synced() && o.operation != OperationTag::Delete)
            .map(|o| o.payload.clone());
        if let Some(staged) = ledger.get_update(self.scope(), variant_id) {
            pending.get_or_insert_with(OverridePayload::default).merge(staged.clone());
        }
        pending
    }
}

fn tenant_only_facts(payload: &OverridePayload) -> VariantFacts {
    VariantFacts {
        sku: payload.basic.sku.clone().unwrap_or_default(),
        name: payload.basic.name.clone().unwrap_or_default(),
        is_active: payload.basic.is_active.unwrap_or(true),
        image_count: payload.media.images.as_ref().map_or(0, |images| images.len()),
    }
}

impl Engine {
    // ========================================================================
    // Context Resolution
    // ========================================================================

    /// The variant list as it should be displayed for `ctx`, stable-sorted by position.
    pub fn resolve(&mut self, ctx: &EditContext) -> Result<Vec<DisplayVariant>, EngineError> {
        self.require_product(ctx.product_id)?;
        let defaults = self.storage.list_variants(ctx.product_id)?;
        let ledger = self.ledger(ctx)?.clone();

        let mut rows = match ctx.tenant_id {
            None => resolve_default(&defaults, &ledger),
            Some(tenant_id) => {
                let view = self.tenant_view(ctx.product_id, tenant_id, &defaults)?;
                if view.snapshot.is_empty() {
                    resolve_projected(&view, &defaults, &ledger)
                } else {
                    resolve_live(&view, &defaults, &ledger)
                }
            }
        };
        rows.sort_by_key(|row| row.position);
        Ok(rows)
    }

    /// Comparison label for one variant, or one field of it, in `ctx`.
    pub fn classify_variant(
        &mut self,
        ctx: &EditContext,
        variant_id: VariantId,
        field: Option<OverrideField>,
    ) -> Result<VariantStatus, EngineError> {
        let Some(tenant_id) = ctx.tenant_id else {
            return Ok(VariantStatus::Default);
        };
        let variant = self.live_variant(ctx.product_id, variant_id)?;
        let ledger = self.ledger(ctx)?.clone();
        let view = self.tenant_view(ctx.product_id, tenant_id, std::slice::from_ref(&variant))?;
        let pending = view.pending_payload(&ledger, variant_id);
        let facts = view.expected_facts(&variant);
        Ok(classify(
            Some(tenant_id),
            Some(&facts),
            view.external_for(&variant),
            pending.as_ref(),
            field,
        ))
    }

    /// External snapshot for the pair. A missing external product or a
    /// failed fetch yields an empty snapshot.
    pub fn fetch_snapshot(
        &self,
        product_id: ProductId,
        tenant_id: TenantId,
    ) -> Result<ExternalSnapshot, EngineError> {
        let Some(external_product) = self.storage.external_product(tenant_id, product_id)? else {
            tracing::debug!(%product_id, %tenant_id, "product not linked to tenant catalog");
            return Ok(ExternalSnapshot::empty(tenant_id));
        };
        match self.catalog.fetch_variants(tenant_id, external_product) {
            Ok(variants) => Ok(ExternalSnapshot::new(tenant_id, variants)
                .with_suffix_matching(self.config.suffix_matching)),
            Err(e) => {
                tracing::warn!(%product_id, %tenant_id, error = %e, "external fetch failed, using empty snapshot");
                Ok(ExternalSnapshot::empty(tenant_id))
            }
        }
    }

    fn tenant_view(
        &self,
        product_id: ProductId,
        tenant_id: TenantId,
        defaults: &[Variant],
    ) -> Result<TenantView, EngineError> {
        let snapshot = self.fetch_snapshot(product_id, tenant_id)?;
        let overrides = self.storage.list_overrides(product_id, tenant_id)?;
        let mut confirmed = HashMap::new();
        for variant in defaults {
            if let Some(id) = self.storage.confirmed_external_id(variant.variant_id, tenant_id)? {
                confirmed.insert(variant.variant_id, id);
            }
        }
        Ok(TenantView {
            tenant_id,
            snapshot,
            overrides,
            confirmed,
        })
    }
}

fn resolve_default(defaults: &[Variant], ledger: &PendingLedger) -> Vec<DisplayVariant> {
    let scope = Scope::Default;
    let mut rows: Vec<DisplayVariant> = defaults
        .iter()
        .map(|variant| {
            let mut row = DisplayVariant::from_variant(variant, VariantStatus::Default);
            row.apply_staged(ledger, scope, variant.variant_id.into());
            row
        })
        .collect();
    rows.extend(
        ledger
            .creates_in(scope)
            .map(|(temp_id, draft)| DisplayVariant::from_draft(temp_id, draft, VariantStatus::Default)),
    );
    rows
}

/// Row for a default variant in a tenant context.
fn tenant_variant_row(
    view: &TenantView,
    ledger: &PendingLedger,
    variant: &Variant,
    external: Option<&ExternalVariant>,
) -> DisplayVariant {
    let scope = view.scope();
    let record = view.override_for(variant.variant_id);
    let staged_update = ledger.get_update(scope, variant.variant_id);
    let staged_delete = ledger.is_deleted(scope, variant.variant_id);
    let unsynced = record.is_some_and(|o| !o.is_synced());

    let mut row = DisplayVariant::from_variant(variant, VariantStatus::Inherited);
    if let Some(o) = record {
        row.source = DisplaySource::Override;
        row.operation = Some(o.operation);
        row.override_id = Some(o.override_id);
        row.sync_status = Some(o.sync_status);
    }
    match external {
        Some(ext) => {
            row.show_external(ext);
            if record.is_none() {
                row.source = DisplaySource::External;
            }
            if let Some(o) = record.filter(|o| unsynced && o.operation != OperationTag::Delete) {
                row.apply(&o.payload);
            }
        }
        None => {
            if let Some(o) = record.filter(|o| o.operation != OperationTag::Delete) {
                row.apply(&o.payload);
            }
        }
    }
    row.apply_staged(ledger, scope, variant.variant_id.into());
    row.strikethrough =
        staged_delete || record.is_some_and(|o| o.operation == OperationTag::Delete);

    row.status = if staged_update.is_some() || staged_delete || unsynced {
        VariantStatus::PendingSync
    } else {
        match external {
            Some(ext) => classify(
                Some(view.tenant_id),
                Some(&view.expected_facts(variant)),
                Some(ext),
                None,
                None,
            ),
            None if record.is_some() => VariantStatus::Different,
            None => VariantStatus::Inherited,
        }
    };
    row
}

/// Row for a tenant-only override.
fn tenant_only_row(
    view: &TenantView,
    ledger: &PendingLedger,
    record: &OverrideRecord,
    external: Option<&ExternalVariant>,
) -> DisplayVariant {
    let facts = tenant_only_facts(&record.payload);
    let mut row = DisplayVariant {
        id: DisplayId::Override(record.override_id),
        variant_id: None,
        sku: facts.sku.clone(),
        name: facts.name.clone(),
        is_active: facts.is_active,
        is_default: record.payload.basic.is_default.unwrap_or(false),
        position: record.payload.basic.position.unwrap_or(0),
        image_count: facts.image_count,
        status: VariantStatus::PendingSync,
        source: DisplaySource::Override,
        operation: Some(record.operation),
        override_id: Some(record.override_id),
        sync_status: Some(record.sync_status),
        pending_create: false,
        pending_update: false,
        pending_delete: false,
        strikethrough: record.operation == OperationTag::Delete,
        undo: None,
    };
    if record.is_synced() {
        match external {
            Some(ext) => {
                row.show_external(ext);
                row.status = classify(Some(view.tenant_id), Some(&facts), Some(ext), None, None);
            }
            None => row.status = VariantStatus::Different,
        }
    }
    if row.apply_staged(ledger, view.scope(), Target::Override(record.override_id)) {
        row.status = VariantStatus::PendingSync;
    }
    row
}

/// Row for a combination only the tenant's catalog has.
fn external_only_row(
    view: &TenantView,
    ledger: &PendingLedger,
    ext: &ExternalVariant,
) -> DisplayVariant {
    let mut row = DisplayVariant::from_external(
        ext,
        classify(Some(view.tenant_id), None, Some(ext), None, None),
    );
    if row.apply_staged(ledger, view.scope(), Target::External(ext.combination_id)) {
        row.status = VariantStatus::PendingSync;
    }
    row
}

fn staged_tenant_creates(view: &TenantView, ledger: &PendingLedger) -> Vec<DisplayVariant> {
    ledger
        .creates_in(view.scope())
        .map(|(temp_id, draft)| DisplayVariant::from_draft(temp_id, draft, VariantStatus::PendingSync))
        .collect()
}

/// Empty external snapshot: overrides projected onto the default set.
fn resolve_projected(
    view: &TenantView,
    defaults: &[Variant],
    ledger: &PendingLedger,
) -> Vec<DisplayVariant> {
    let mut rows: Vec<DisplayVariant> = defaults
        .iter()
        .map(|variant| tenant_variant_row(view, ledger, variant, None))
        .collect();
    rows.extend(
        view.overrides
            .iter()
            .filter(|o| o.variant_id.is_none())
            .map(|o| tenant_only_row(view, ledger, o, None)),
    );
    rows.extend(staged_tenant_creates(view, ledger));
    rows
}

/// Non-empty external snapshot: external rows annotated against their
/// internal counterparts, plus anything not reflected externally yet.
fn resolve_live(
    view: &TenantView,
    defaults: &[Variant],
    ledger: &PendingLedger,
) -> Vec<DisplayVariant> {
    let scope = view.scope();
    let matches: Vec<(&Variant, Option<ExternalCombinationId>)> = defaults
        .iter()
        .map(|v| (v, view.external_for(v).map(|ext| ext.combination_id)))
        .collect();

    let mut rows = Vec::new();
    let mut shown_variants = HashSet::new();
    let mut shown_overrides = HashSet::new();

    for ext in view.snapshot.variants() {
        let default = matches
            .iter()
            .find(|(v, matched)| *matched == Some(ext.combination_id) && !shown_variants.contains(&v.variant_id))
            .map(|(v, _)| *v);
        if let Some(variant) = default {
            shown_variants.insert(variant.variant_id);
            rows.push(tenant_variant_row(view, ledger, variant, Some(ext)));
            continue;
        }
        let tenant_only = view.overrides.iter().find(|o| {
            o.variant_id.is_none() && o.external_combination_id == Some(ext.combination_id)
        });
        if let Some(record) = tenant_only {
            shown_overrides.insert(record.override_id);
            rows.push(tenant_only_row(view, ledger, record, Some(ext)));
            continue;
        }
        rows.push(external_only_row(view, ledger, ext));
    }

    for variant in defaults {
        if shown_variants.contains(&variant.variant_id) {
            continue;
        }
        let touched = view.override_for(variant.variant_id).is_some()
            || ledger.get_update(scope, variant.variant_id).is_some()
            || ledger.is_deleted(scope, variant.variant_id);
        if touched {
            rows.push(tenant_variant_row(view, ledger, variant, None));
        }
    }
    rows.extend(
        view.overrides
            .iter()
            .filter(|o| o.variant_id.is_none() && !shown_overrides.contains(&o.override_id))
            .map(|o| tenant_only_row(view, ledger, o, None)),
    );
    rows.extend(staged_tenant_creates(view, ledger));
    rows
}
