use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS products (
    product_id INTEGER PRIMARY KEY AUTOINCREMENT,
    sku TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    is_variant_master INTEGER NOT NULL DEFAULT 0,
    default_variant_id INTEGER
);

CREATE TABLE IF NOT EXISTS attribute_types (
    attribute_type_id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    position INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS attribute_values (
    attribute_value_id INTEGER PRIMARY KEY AUTOINCREMENT,
    attribute_type_id INTEGER NOT NULL REFERENCES attribute_types (attribute_type_id),
    code TEXT NOT NULL,
    label TEXT NOT NULL,
    UNIQUE (attribute_type_id, code)
);

-- Variants are tombstoned, never erased: sync history keeps pointing at them.
CREATE TABLE IF NOT EXISTS variants (
    variant_id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id INTEGER NOT NULL REFERENCES products (product_id),
    sku TEXT NOT NULL,
    name TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_default INTEGER NOT NULL DEFAULT 0,
    position INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER)),
    updated_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER)),
    deleted_at INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_variants_live_sku ON variants (sku) WHERE deleted_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_variants_product ON variants (product_id, position) WHERE deleted_at IS NULL;

CREATE TABLE IF NOT EXISTS variant_attributes (
    variant_id INTEGER NOT NULL REFERENCES variants (variant_id),
    attribute_type_id INTEGER NOT NULL REFERENCES attribute_types (attribute_type_id),
    attribute_value_id INTEGER NOT NULL REFERENCES attribute_values (attribute_value_id),
    PRIMARY KEY (variant_id, attribute_type_id)
);

CREATE TABLE IF NOT EXISTS variant_images (
    variant_id INTEGER NOT NULL REFERENCES variants (variant_id),
    media_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (variant_id, media_id)
);

CREATE TABLE IF NOT EXISTS tenants (
    tenant_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tenant_products (
    tenant_id INTEGER NOT NULL REFERENCES tenants (tenant_id),
    product_id INTEGER NOT NULL REFERENCES products (product_id),
    external_product_id INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, product_id)
);

-- Primary join between internal variants and external combinations.
CREATE TABLE IF NOT EXISTS variant_external_ids (
    variant_id INTEGER NOT NULL REFERENCES variants (variant_id),
    tenant_id INTEGER NOT NULL REFERENCES tenants (tenant_id),
    external_combination_id INTEGER NOT NULL,
    confirmed_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER)),
    PRIMARY KEY (variant_id, tenant_id)
);

CREATE TABLE IF NOT EXISTS media_external_images (
    media_id INTEGER NOT NULL,
    tenant_id INTEGER NOT NULL REFERENCES tenants (tenant_id),
    external_image_id INTEGER NOT NULL,
    PRIMARY KEY (media_id, tenant_id)
);

CREATE TABLE IF NOT EXISTS tenant_overrides (
    override_id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id INTEGER NOT NULL REFERENCES tenants (tenant_id),
    product_id INTEGER NOT NULL REFERENCES products (product_id),
    variant_id INTEGER REFERENCES variants (variant_id),
    operation TEXT NOT NULL CHECK (operation IN ('ADD', 'OVERRIDE', 'DELETE')),
    payload BLOB NOT NULL,
    external_combination_id INTEGER,
    sync_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (sync_status IN ('pending', 'in_progress', 'synced', 'failed')),
    sync_error TEXT,
    synced_fingerprint BLOB CHECK (synced_fingerprint IS NULL OR length(synced_fingerprint) = 32),
    updated_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER))
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_overrides_tenant_variant
    ON tenant_overrides (tenant_id, variant_id) WHERE variant_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_overrides_product ON tenant_overrides (product_id, tenant_id);

-- Write-ahead copy of each session's pending ledger.
CREATE TABLE IF NOT EXISTS staged_ledgers (
    session_id TEXT NOT NULL,
    product_id INTEGER NOT NULL,
    payload BLOB NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER)),
    PRIMARY KEY (session_id, product_id)
);

CREATE TABLE IF NOT EXISTS sync_jobs (
    job_id BLOB PRIMARY KEY CHECK (length(job_id) = 16),
    product_id INTEGER NOT NULL,
    tenant_id INTEGER NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('pending', 'running', 'completed', 'failed')),
    error TEXT,
    created_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER)),
    started_at INTEGER,
    finished_at INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_jobs_active
    ON sync_jobs (product_id, tenant_id) WHERE status IN ('pending', 'running');
CREATE INDEX IF NOT EXISTS idx_sync_jobs_product ON sync_jobs (product_id, tenant_id, created_at);
";
