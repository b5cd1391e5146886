pub mod classify;
pub mod error;
pub mod external;
pub mod ids;
pub mod payload;
pub mod pending;
pub mod sku;
pub mod variant;

pub use classify::{VariantFacts, VariantStatus};
pub use error::CoreError;
pub use external::{ExternalAttribute, ExternalSnapshot, ExternalVariant};
pub use ids::*;
pub use payload::{ImageSelection, OverrideField, OverridePayload};
pub use pending::{PendingKey, PendingOperation, Scope, Target};
pub use sku::SkuGenerator;
pub use variant::{AttributeSet, Product, Variant, VariantDraft};
