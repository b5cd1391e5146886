use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use variant_sync_core::{
    ExternalAttribute, ExternalCombinationId, ExternalImageId, ExternalProductId,
    ExternalVariant, TenantId,
};
use variant_sync_engine::{CatalogError, ExternalCatalog, SyncPayload};

/// Write calls the catalog accepted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteCounts {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl WriteCounts {
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.deletes
    }
}

type WriteHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct CatalogState {
    next_id: i64,
    products: BTreeMap<(TenantId, ExternalProductId), Vec<ExternalVariant>>,
    fetch_error: Option<CatalogError>,
    rejected_skus: HashSet<String>,
    writes: WriteCounts,
    before_write: Option<WriteHook>,
}

impl CatalogState {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        1000 + self.next_id
    }

    fn find_mut(
        &mut self,
        tenant_id: TenantId,
        combination: ExternalCombinationId,
    ) -> Option<&mut ExternalVariant> {
        self.products
            .iter_mut()
            .filter(|((t, _), _)| *t == tenant_id)
            .flat_map(|(_, variants)| variants.iter_mut())
            .find(|v| v.combination_id == combination)
    }
}

/// In-memory stand-in for tenant storefront catalogs.
#[derive(Default)]
pub struct MockCatalog {
    state: Mutex<CatalogState>,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn new_product_id(&self) -> ExternalProductId {
        ExternalProductId::new(self.state().allocate())
    }

    pub fn new_image_id(&self) -> ExternalImageId {
        ExternalImageId::new(self.state().allocate())
    }

    /// Put an active combination straight into the tenant's catalog.
    pub fn seed(
        &self,
        tenant_id: TenantId,
        product: ExternalProductId,
        sku: &str,
        name: &str,
    ) -> ExternalCombinationId {
        let mut state = self.state();
        let combination_id = ExternalCombinationId::new(state.allocate());
        let position = state
            .products
            .get(&(tenant_id, product))
            .map_or(0, |variants| variants.len() as i32);
        state
            .products
            .entry((tenant_id, product))
            .or_default()
            .push(ExternalVariant {
                combination_id,
                sku: sku.to_string(),
                name: name.to_string(),
                is_active: true,
                is_default: position == 0,
                position,
                attributes: Vec::new(),
                images: Vec::new(),
            });
        combination_id
    }

    /// Change a combination behind the engine's back.
    pub fn edit(
        &self,
        tenant_id: TenantId,
        combination: ExternalCombinationId,
        f: impl FnOnce(&mut ExternalVariant),
    ) -> bool {
        match self.state().find_mut(tenant_id, combination) {
            Some(variant) => {
                f(variant);
                true
            }
            None => false,
        }
    }

    pub fn variants(&self, tenant_id: TenantId, product: ExternalProductId) -> Vec<ExternalVariant> {
        self.state()
            .products
            .get(&(tenant_id, product))
            .cloned()
            .unwrap_or_default()
    }

    pub fn find(
        &self,
        tenant_id: TenantId,
        combination: ExternalCombinationId,
    ) -> Option<ExternalVariant> {
        self.state().find_mut(tenant_id, combination).map(|v| v.clone())
    }

    /// Every fetch fails with `error` until cleared with `None`.
    pub fn fail_fetches(&self, error: Option<CatalogError>) {
        self.state().fetch_error = error;
    }

    /// Writes carrying this SKU are rejected.
    pub fn reject_sku(&self, sku: &str) {
        self.state().rejected_skus.insert(sku.to_string());
    }

    pub fn writes(&self) -> WriteCounts {
        self.state().writes
    }

    /// Run `hook` once, just before the next create or update is applied.
    /// It runs without the catalog lock held.
    pub fn before_next_write(&self, hook: impl FnOnce() + Send + 'static) {
        self.state().before_write = Some(Box::new(hook));
    }

    fn run_write_hook(&self) {
        let hook = self.state().before_write.take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

fn check_sku(state: &CatalogState, payload: &SyncPayload) -> Result<(), CatalogError> {
    if state.rejected_skus.contains(&payload.sku) {
        return Err(CatalogError::Rejected(format!("sku {} refused", payload.sku)));
    }
    Ok(())
}

fn write_payload(variant: &mut ExternalVariant, payload: &SyncPayload) {
    variant.sku = payload.sku.clone();
    variant.name = payload.name.clone();
    variant.is_active = payload.is_active;
    variant.is_default = payload.is_default;
    variant.position = payload.position;
    variant.images = payload.images.clone();
    if let Some(codes) = &payload.attribute_codes {
        variant.attributes = codes
            .iter()
            .map(|code| ExternalAttribute {
                group: "attribute".into(),
                value: code.clone(),
            })
            .collect();
    }
}

impl ExternalCatalog for MockCatalog {
    fn fetch_variants(
        &self,
        tenant_id: TenantId,
        product: ExternalProductId,
    ) -> Result<Vec<ExternalVariant>, CatalogError> {
        let state = self.state();
        if let Some(error) = &state.fetch_error {
            return Err(error.clone());
        }
        Ok(state
            .products
            .get(&(tenant_id, product))
            .cloned()
            .unwrap_or_default())
    }

    fn create_combination(
        &self,
        tenant_id: TenantId,
        product: ExternalProductId,
        payload: &SyncPayload,
    ) -> Result<ExternalCombinationId, CatalogError> {
        self.run_write_hook();
        let mut state = self.state();
        check_sku(&state, payload)?;
        let combination_id = ExternalCombinationId::new(state.allocate());
        let mut variant = ExternalVariant {
            combination_id,
            sku: String::new(),
            name: String::new(),
            is_active: true,
            is_default: false,
            position: 0,
            attributes: Vec::new(),
            images: Vec::new(),
        };
        write_payload(&mut variant, payload);
        state
            .products
            .entry((tenant_id, product))
            .or_default()
            .push(variant);
        state.writes.creates += 1;
        Ok(combination_id)
    }

    fn update_combination(
        &self,
        tenant_id: TenantId,
        combination: ExternalCombinationId,
        payload: &SyncPayload,
    ) -> Result<(), CatalogError> {
        self.run_write_hook();
        let mut state = self.state();
        check_sku(&state, payload)?;
        let variant = state
            .find_mut(tenant_id, combination)
            .ok_or_else(|| CatalogError::NotFound(format!("combination {combination}")))?;
        write_payload(variant, payload);
        state.writes.updates += 1;
        Ok(())
    }

    fn delete_combination(
        &self,
        tenant_id: TenantId,
        combination: ExternalCombinationId,
    ) -> Result<(), CatalogError> {
        let mut state = self.state();
        let mut removed = false;
        for ((t, _), variants) in state.products.iter_mut() {
            if *t != tenant_id {
                continue;
            }
            let before = variants.len();
            variants.retain(|v| v.combination_id != combination);
            removed |= variants.len() != before;
        }
        if !removed {
            return Err(CatalogError::NotFound(format!("combination {combination}")));
        }
        state.writes.deletes += 1;
        Ok(())
    }
}
