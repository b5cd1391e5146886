use std::path::PathBuf;
use std::time::Duration;

use variant_sync_core::sku::DEFAULT_MAX_ATTEMPTS;

/// Runtime settings for the engine and its sync worker.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_path: PathBuf,
    pub max_sku_attempts: u32,
    /// Fall back to `-S<digits>` stripped SKU matching against the external catalog.
    pub suffix_matching: bool,
    pub worker_poll_interval_ms: u64,
    pub log_level: String,
    pub log_json: bool,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            database_path: lookup("VARIANT_SYNC_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            max_sku_attempts: lookup("VARIANT_SYNC_MAX_SKU_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_sku_attempts),
            suffix_matching: lookup("VARIANT_SYNC_SUFFIX_MATCHING")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.suffix_matching),
            worker_poll_interval_ms: lookup("VARIANT_SYNC_WORKER_POLL_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.worker_poll_interval_ms),
            log_level: lookup("VARIANT_SYNC_LOG_LEVEL").unwrap_or(defaults.log_level),
            log_json: lookup("VARIANT_SYNC_LOG_JSON")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.log_json),
        }
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("variant-sync.db"),
            max_sku_attempts: DEFAULT_MAX_ATTEMPTS,
            suffix_matching: true,
            worker_poll_interval_ms: 50,
            log_level: "info".into(),
            log_json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("VARIANT_SYNC_DB", "/tmp/v.db"),
            ("VARIANT_SYNC_MAX_SKU_ATTEMPTS", "10"),
            ("VARIANT_SYNC_SUFFIX_MATCHING", "false"),
        ]
        .into_iter()
        .collect();
        let config = EngineConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.database_path, PathBuf::from("/tmp/v.db"));
        assert_eq!(config.max_sku_attempts, 10);
        assert!(!config.suffix_matching);
        assert_eq!(config.worker_poll_interval_ms, 50);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn unparsable_values_fall_back() {
        let config = EngineConfig::from_lookup(|k| {
            (k == "VARIANT_SYNC_WORKER_POLL_MS").then(|| "soon".to_string())
        });
        assert_eq!(config.worker_poll_interval(), Duration::from_millis(50));
    }
}
