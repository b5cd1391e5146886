//! In-memory pending-operation ledger for one `(session, product)` pair.
//!
//! The ledger itself never touches storage; `Engine` writes its encoded form
//! to the staging table after every mutation.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use variant_sync_core::{
    CoreError, OverridePayload, PendingKey, PendingOperation, Scope, Target, TempId, VariantDraft,
};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedCreate {
    pub draft: VariantDraft,
    pub scope: Scope,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl PendingCounts {
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.deletes
    }
}

/// Wire form of the ledger in the staging table.
#[derive(Debug, Serialize, Deserialize)]
struct LedgerState {
    operations: Vec<PendingOperation>,
    next_temp_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLedger {
    creates: BTreeMap<TempId, StagedCreate>,
    updates: BTreeMap<(Scope, Target), OverridePayload>,
    deletes: BTreeSet<(Scope, Target)>,
    /// Next temporary id to hand out; always negative, only ever decreases.
    next_temp_id: i64,
}

impl Default for PendingLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingLedger {
    pub fn new() -> Self {
        Self {
            creates: BTreeMap::new(),
            updates: BTreeMap::new(),
            deletes: BTreeSet::new(),
            next_temp_id: -1,
        }
    }

    pub fn allocate_temp_id(&mut self) -> Result<TempId, EngineError> {
        let id = TempId::new(self.next_temp_id)?;
        self.next_temp_id -= 1;
        Ok(id)
    }

    pub fn stage(&mut self, op: PendingOperation) -> Result<(), EngineError> {
        match op {
            PendingOperation::Create {
                temp_id,
                payload,
                scope,
            } => {
                self.next_temp_id = self.next_temp_id.min(temp_id.get() - 1);
                self.creates.insert(
                    temp_id,
                    StagedCreate {
                        draft: payload,
                        scope,
                    },
                );
            }
            PendingOperation::Update {
                target,
                payload,
                scope,
            } => {
                if self.deletes.contains(&(scope, target)) {
                    return Err(EngineError::PendingDelete(target));
                }
                self.updates.insert((scope, target), payload);
            }
            PendingOperation::Delete { target, scope } => {
                self.updates.remove(&(scope, target));
                self.deletes.insert((scope, target));
            }
        }
        Ok(())
    }

    /// Returns whether an entry was removed.
    pub fn remove(&mut self, key: PendingKey) -> bool {
        match key {
            PendingKey::Create(temp_id) => self.creates.remove(&temp_id).is_some(),
            PendingKey::Update(scope, target) => self.updates.remove(&(scope, target)).is_some(),
            PendingKey::Delete(scope, target) => self.deletes.remove(&(scope, target)),
        }
    }

    /// Drops every entry. The temp id counter keeps going so ids are never reused.
    pub fn clear(&mut self) {
        self.creates.clear();
        self.updates.clear();
        self.deletes.clear();
    }

    pub fn clear_scope(&mut self, scope: Scope) {
        self.creates.retain(|_, create| create.scope != scope);
        self.updates.retain(|(s, _), _| *s != scope);
        self.deletes.retain(|(s, _)| *s != scope);
    }

    /// Creates in staging order, then updates, then deletes.
    pub fn list(&self) -> Vec<PendingOperation> {
        let creates = self
            .creates
            .iter()
            .rev()
            .map(|(temp_id, create)| PendingOperation::Create {
                temp_id: *temp_id,
                payload: create.draft.clone(),
                scope: create.scope,
            });
        let updates = self
            .updates
            .iter()
            .map(|((scope, target), payload)| PendingOperation::Update {
                target: *target,
                payload: payload.clone(),
                scope: *scope,
            });
        let deletes = self
            .deletes
            .iter()
            .map(|(scope, target)| PendingOperation::Delete {
                target: *target,
                scope: *scope,
            });
        creates.chain(updates).chain(deletes).collect()
    }

    pub fn creates_in(&self, scope: Scope) -> impl Iterator<Item = (TempId, &VariantDraft)> + '_ {
        self.creates
            .iter()
            .rev()
            .filter(move |(_, create)| create.scope == scope)
            .map(|(temp_id, create)| (*temp_id, &create.draft))
    }

    pub fn updates_in(&self, scope: Scope) -> impl Iterator<Item = (Target, &OverridePayload)> + '_ {
        self.updates
            .iter()
            .filter(move |((s, _), _)| *s == scope)
            .map(|((_, target), payload)| (*target, payload))
    }

    pub fn deletes_in(&self, scope: Scope) -> impl Iterator<Item = Target> + '_ {
        self.deletes
            .iter()
            .filter(move |(s, _)| *s == scope)
            .map(|(_, target)| *target)
    }

    pub fn get_create(&self, temp_id: TempId) -> Option<&StagedCreate> {
        self.creates.get(&temp_id)
    }

    pub fn get_create_mut(&mut self, temp_id: TempId) -> Option<&mut StagedCreate> {
        self.creates.get_mut(&temp_id)
    }

    pub fn get_update(&self, scope: Scope, target: impl Into<Target>) -> Option<&OverridePayload> {
        self.updates.get(&(scope, target.into()))
    }

    pub fn is_deleted(&self, scope: Scope, target: impl Into<Target>) -> bool {
        self.deletes.contains(&(scope, target.into()))
    }

    pub fn counts(&self) -> PendingCounts {
        PendingCounts {
            creates: self.creates.len(),
            updates: self.updates.len(),
            deletes: self.deletes.len(),
        }
    }

    pub fn scope_counts(&self, scope: Scope) -> PendingCounts {
        PendingCounts {
            creates: self.creates_in(scope).count(),
            updates: self.updates_in(scope).count(),
            deletes: self.deletes_in(scope).count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts().total() == 0
    }

    /// Union with `incoming`; entries in `incoming` win on the same key and
    /// a delete on either side still drops the matching update.
    pub fn merge_from(&mut self, incoming: PendingLedger) {
        self.next_temp_id = self.next_temp_id.min(incoming.next_temp_id);
        self.creates.extend(incoming.creates);
        self.deletes.extend(incoming.deletes);
        self.updates.extend(incoming.updates);
        let deletes = &self.deletes;
        self.updates.retain(|key, _| !deletes.contains(key));
    }

    pub fn encode(&self) -> Result<Vec<u8>, EngineError> {
        let state = LedgerState {
            operations: self.list(),
            next_temp_id: self.next_temp_id,
        };
        rmp_serde::to_vec(&state)
            .map_err(|e| EngineError::Core(CoreError::Serialization(e.to_string())))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EngineError> {
        let state: LedgerState = rmp_serde::from_slice(bytes)
            .map_err(|e| EngineError::Core(CoreError::Serialization(e.to_string())))?;
        let mut ledger = Self::new();
        for op in state.operations {
            ledger.stage(op)?;
        }
        ledger.next_temp_id = ledger.next_temp_id.min(state.next_temp_id);
        Ok(ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use variant_sync_core::{
        ExternalCombinationId, OverrideId, TenantId, VariantId, payload::BasicFields,
    };

    fn rename(name: &str) -> OverridePayload {
        OverridePayload {
            basic: BasicFields {
                name: Some(name.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn create(ledger: &mut PendingLedger, sku: &str) -> TempId {
        let temp_id = ledger.allocate_temp_id().unwrap();
        ledger
            .stage(PendingOperation::Create {
                temp_id,
                payload: VariantDraft::new(sku, "Red"),
                scope: Scope::Default,
            })
            .unwrap();
        temp_id
    }

    #[test]
    fn temp_ids_strictly_decrease() {
        let mut ledger = PendingLedger::new();
        let ids: Vec<i64> = (0..5).map(|i| create(&mut ledger, &format!("P-{i}")).get()).collect();
        assert_eq!(ids, vec![-1, -2, -3, -4, -5]);
        ledger.clear();
        assert_eq!(ledger.allocate_temp_id().unwrap().get(), -6);
    }

    #[test]
    fn list_keeps_creation_order() {
        let mut ledger = PendingLedger::new();
        create(&mut ledger, "A");
        create(&mut ledger, "B");
        let skus: Vec<String> = ledger
            .list()
            .into_iter()
            .filter_map(|op| match op {
                PendingOperation::Create { payload, .. } => Some(payload.sku),
                _ => None,
            })
            .collect();
        assert_eq!(skus, vec!["A", "B"]);
    }

    #[test]
    fn delete_wins_over_update() {
        let mut ledger = PendingLedger::new();
        let variant_id = VariantId::new(3);
        ledger
            .stage(PendingOperation::Update {
                target: variant_id.into(),
                payload: rename("Blue"),
                scope: Scope::Default,
            })
            .unwrap();
        ledger
            .stage(PendingOperation::Delete {
                target: variant_id.into(),
                scope: Scope::Default,
            })
            .unwrap();
        assert!(ledger.get_update(Scope::Default, variant_id).is_none());
        assert!(ledger.is_deleted(Scope::Default, variant_id));

        let err = ledger
            .stage(PendingOperation::Update {
                target: variant_id.into(),
                payload: rename("Green"),
                scope: Scope::Default,
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::PendingDelete(_)));
    }

    #[test]
    fn scopes_are_independent() {
        let mut ledger = PendingLedger::new();
        let variant_id = VariantId::new(3);
        let tenant = Scope::Tenant(TenantId::new(1));
        ledger
            .stage(PendingOperation::Delete {
                target: variant_id.into(),
                scope: tenant,
            })
            .unwrap();
        ledger
            .stage(PendingOperation::Update {
                target: variant_id.into(),
                payload: rename("Blue"),
                scope: Scope::Default,
            })
            .unwrap();
        assert_eq!(ledger.scope_counts(tenant).deletes, 1);
        assert_eq!(ledger.scope_counts(Scope::Default).updates, 1);

        ledger.clear_scope(tenant);
        assert_eq!(ledger.counts().total(), 1);
    }

    #[test]
    fn targets_of_different_kinds_never_share_an_entry() {
        let mut ledger = PendingLedger::new();
        let tenant = Scope::Tenant(TenantId::new(1));
        ledger
            .stage(PendingOperation::Update {
                target: Target::Override(OverrideId::new(4)),
                payload: rename("Shop only"),
                scope: tenant,
            })
            .unwrap();
        ledger
            .stage(PendingOperation::Delete {
                target: Target::External(ExternalCombinationId::new(4)),
                scope: tenant,
            })
            .unwrap();

        assert!(ledger.get_update(tenant, Target::Override(OverrideId::new(4))).is_some());
        assert!(ledger.get_update(tenant, VariantId::new(4)).is_none());
        assert!(ledger.is_deleted(tenant, Target::External(ExternalCombinationId::new(4))));
        assert!(!ledger.is_deleted(tenant, Target::Override(OverrideId::new(4))));
        assert_eq!(ledger.scope_counts(tenant).total(), 2);

        assert!(ledger.remove(PendingKey::Update(tenant, Target::Override(OverrideId::new(4)))));
        assert_eq!(ledger.scope_counts(tenant).updates, 0);
    }

    #[test]
    fn merge_is_a_union_with_incoming_winning() {
        let mut memory = PendingLedger::new();
        let mut durable = PendingLedger::new();
        memory
            .stage(PendingOperation::Update {
                target: Target::Variant(VariantId::new(1)),
                payload: rename("Memory"),
                scope: Scope::Default,
            })
            .unwrap();
        durable
            .stage(PendingOperation::Update {
                target: Target::Variant(VariantId::new(1)),
                payload: rename("Durable"),
                scope: Scope::Default,
            })
            .unwrap();
        durable
            .stage(PendingOperation::Update {
                target: Target::Variant(VariantId::new(2)),
                payload: rename("Other"),
                scope: Scope::Default,
            })
            .unwrap();
        create(&mut durable, "A");
        create(&mut durable, "B");

        memory.merge_from(durable);
        assert_eq!(
            memory.get_update(Scope::Default, VariantId::new(1)),
            Some(&rename("Durable"))
        );
        assert!(memory.get_update(Scope::Default, VariantId::new(2)).is_some());
        assert_eq!(memory.allocate_temp_id().unwrap().get(), -3);
    }

    #[test]
    fn merge_applies_delete_from_either_side() {
        let mut memory = PendingLedger::new();
        let mut durable = PendingLedger::new();
        memory
            .stage(PendingOperation::Update {
                target: Target::Variant(VariantId::new(1)),
                payload: rename("Memory"),
                scope: Scope::Default,
            })
            .unwrap();
        durable
            .stage(PendingOperation::Delete {
                target: Target::Variant(VariantId::new(1)),
                scope: Scope::Default,
            })
            .unwrap();
        memory.merge_from(durable);
        assert!(memory.get_update(Scope::Default, VariantId::new(1)).is_none());
        assert!(memory.is_deleted(Scope::Default, VariantId::new(1)));
    }

    #[test]
    fn encode_decode_preserves_entries_and_counter() {
        let mut ledger = PendingLedger::new();
        create(&mut ledger, "A");
        let second = create(&mut ledger, "B");
        ledger.remove(PendingKey::Create(second));
        ledger
            .stage(PendingOperation::Delete {
                target: Target::Variant(VariantId::new(9)),
                scope: Scope::Tenant(TenantId::new(2)),
            })
            .unwrap();

        let mut decoded = PendingLedger::decode(&ledger.encode().unwrap()).unwrap();
        assert_eq!(decoded.list(), ledger.list());
        assert_eq!(decoded.allocate_temp_id().unwrap().get(), -3);
    }
}
