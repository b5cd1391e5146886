use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{ExternalCombinationId, OverrideId, TempId, TenantId, VariantId};
use crate::payload::OverridePayload;
use crate::variant::VariantDraft;

/// Which storage tier a staged operation commits into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    Default,
    Tenant(TenantId),
}

impl Scope {
    pub fn from_tenant(tenant: Option<TenantId>) -> Self {
        match tenant {
            Some(tenant) => Scope::Tenant(tenant),
            None => Scope::Default,
        }
    }

    pub fn tenant(&self) -> Option<TenantId> {
        match self {
            Scope::Default => None,
            Scope::Tenant(tenant) => Some(*tenant),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Default => f.write_str("default"),
            Scope::Tenant(tenant) => write!(f, "tenant:{tenant}"),
        }
    }
}

/// Row an update or delete applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Target {
    Variant(VariantId),
    /// Tenant-only variant stored as an override row.
    Override(OverrideId),
    /// Combination that exists only in the tenant's catalog.
    External(ExternalCombinationId),
}

impl Target {
    pub fn variant(&self) -> Option<VariantId> {
        match self {
            Target::Variant(variant_id) => Some(*variant_id),
            _ => None,
        }
    }
}

impl From<VariantId> for Target {
    fn from(variant_id: VariantId) -> Self {
        Target::Variant(variant_id)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Variant(id) => write!(f, "variant {id}"),
            Target::Override(id) => write!(f, "override {id}"),
            Target::External(id) => write!(f, "combination {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingOperation {
    Create {
        temp_id: TempId,
        payload: VariantDraft,
        scope: Scope,
    },
    Update {
        target: Target,
        payload: OverridePayload,
        scope: Scope,
    },
    Delete {
        target: Target,
        scope: Scope,
    },
}

impl PendingOperation {
    pub fn key(&self) -> PendingKey {
        match self {
            PendingOperation::Create { temp_id, .. } => PendingKey::Create(*temp_id),
            PendingOperation::Update { target, scope, .. } => PendingKey::Update(*scope, *target),
            PendingOperation::Delete { target, scope } => PendingKey::Delete(*scope, *target),
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            PendingOperation::Create { scope, .. }
            | PendingOperation::Update { scope, .. }
            | PendingOperation::Delete { scope, .. } => *scope,
        }
    }
}

/// Identity of a ledger entry; also the handle the UI uses for undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PendingKey {
    Create(TempId),
    Update(Scope, Target),
    Delete(Scope, Target),
}

impl fmt::Display for PendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingKey::Create(temp_id) => write!(f, "create {temp_id}"),
            PendingKey::Update(scope, target) => write!(f, "update {target} ({scope})"),
            PendingKey::Delete(scope, target) => write!(f, "delete {target} ({scope})"),
        }
    }
}
