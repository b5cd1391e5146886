//! SKU derivation, validation, and cross-system SKU matching.

use crate::error::CoreError;
use crate::ids::TenantId;

pub const SKU_MAX_LEN: usize = 100;
pub const NAME_MAX_LEN: usize = 255;
pub const POSITION_MAX: i32 = 9999;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 999;

pub fn validate_sku(sku: &str) -> Result<(), CoreError> {
    if sku.is_empty() {
        return Err(CoreError::validation("sku", "must not be empty"));
    }
    if sku.chars().count() > SKU_MAX_LEN {
        return Err(CoreError::validation(
            "sku",
            format!("longer than {SKU_MAX_LEN} characters"),
        ));
    }
    if let Some(bad) = sku
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(CoreError::validation(
            "sku",
            format!("character {bad:?} not allowed"),
        ));
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<(), CoreError> {
    if name.trim().is_empty() {
        return Err(CoreError::validation("name", "must not be empty"));
    }
    if name.chars().count() > NAME_MAX_LEN {
        return Err(CoreError::validation(
            "name",
            format!("longer than {NAME_MAX_LEN} characters"),
        ));
    }
    if let Some(bad) = name.chars().find(|c| {
        !(c.is_alphabetic() || c.is_whitespace() || c.is_ascii_digit() || *c == '-' || *c == '_')
    }) {
        return Err(CoreError::validation(
            "name",
            format!("character {bad:?} not allowed"),
        ));
    }
    Ok(())
}

pub fn validate_position(position: i32) -> Result<(), CoreError> {
    if !(0..=POSITION_MAX).contains(&position) {
        return Err(CoreError::validation(
            "position",
            format!("must be within 0..={POSITION_MAX}"),
        ));
    }
    Ok(())
}

/// `{base}-V{nnn}`.
pub fn counter_sku(base: &str, counter: u32) -> String {
    format!("{base}-V{counter:03}")
}

/// Deterministic SKU derivation with a caller-supplied collision check.
///
/// `taken` must answer for both product SKUs and variant SKUs, plus any SKU
/// already claimed by a staged create.
#[derive(Debug, Clone, Copy)]
pub struct SkuGenerator {
    max_attempts: u32,
}

impl Default for SkuGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl SkuGenerator {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// First free `{base}-V001`, `{base}-V002`, ...
    pub fn next_counter_sku(
        &self,
        base: &str,
        mut taken: impl FnMut(&str) -> bool,
    ) -> Result<String, CoreError> {
        for counter in 1..=self.max_attempts {
            let candidate = counter_sku(base, counter);
            if !taken(&candidate) {
                return Ok(candidate);
            }
        }
        Err(CoreError::SkuExhausted {
            base: base.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// `{base}-{CODE}-{CODE}` from attribute value codes, already ordered by
    /// attribute type. A taken candidate gets `-2`, `-3`, ... appended.
    /// With no codes this falls back to the counter scheme.
    pub fn from_attribute_codes(
        &self,
        base: &str,
        codes: &[String],
        mut taken: impl FnMut(&str) -> bool,
    ) -> Result<String, CoreError> {
        let parts: Vec<String> = codes
            .iter()
            .map(|code| normalize_code(code))
            .filter(|code| !code.is_empty())
            .collect();
        if parts.is_empty() {
            return self.next_counter_sku(base, taken);
        }

        let stem = format!("{base}-{}", parts.join("-"));
        if !taken(&stem) {
            return Ok(stem);
        }
        for n in 2..=self.max_attempts {
            let candidate = format!("{stem}-{n}");
            if !taken(&candidate) {
                return Ok(candidate);
            }
        }
        Err(CoreError::SkuExhausted {
            base: stem,
            attempts: self.max_attempts,
        })
    }
}

fn normalize_code(code: &str) -> String {
    code.trim()
        .chars()
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect::<String>()
        .to_ascii_uppercase()
}

/// SKU as published to a tenant storefront: `{sku}-S{tenant}`.
pub fn tenant_sku(sku: &str, tenant: TenantId) -> String {
    format!("{sku}-S{tenant}")
}

/// Removes a trailing `-S<digits>` tenant suffix, if any.
pub fn strip_tenant_suffix(sku: &str) -> &str {
    let Some(idx) = sku.rfind("-S") else {
        return sku;
    };
    let digits = &sku[idx + 2..];
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        &sku[..idx]
    } else {
        sku
    }
}

/// Internal SKU `internal` corresponds to the external SKU `external`, either
/// verbatim or after stripping the tenant suffix from the external side.
pub fn skus_match(internal: &str, external: &str) -> bool {
    internal == external || strip_tenant_suffix(external) == internal
}
