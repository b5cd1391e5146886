use std::path::Path;

use rusqlite::{Connection, OptionalExtension};

use variant_sync_core::{
    ids::*,
    payload::OverridePayload,
    variant::{AttributeSet, Product, Variant, VariantDraft},
};

use crate::error::StorageError;
use crate::traits::{
    CatalogStore, NewOverride, OperationTag, OverrideRecord, OverrideStore, OverrideSyncStatus,
    StagingStore, SyncJobRecord, SyncJobStatus, SyncJobStore, TenantStore,
};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Raw connection, for transaction control statements.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    fn load_attributes(&self, variant_id: VariantId) -> Result<AttributeSet, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT attribute_type_id, attribute_value_id FROM variant_attributes WHERE variant_id = ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![variant_id.get()], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut attributes = AttributeSet::new();
        for row in rows {
            let (type_id, value_id) = row?;
            attributes.insert(AttributeTypeId::new(type_id), AttributeValueId::new(value_id));
        }
        Ok(attributes)
    }

    fn load_images(&self, variant_id: VariantId) -> Result<Vec<MediaId>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT media_id FROM variant_images WHERE variant_id = ?1 ORDER BY position",
        )?;
        let images = stmt
            .query_map(rusqlite::params![variant_id.get()], |row| {
                row.get::<_, i64>(0).map(MediaId::new)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(images)
    }

    fn hydrate_variant(&self, mut variant: Variant) -> Result<Variant, StorageError> {
        variant.attributes = self.load_attributes(variant.variant_id)?;
        variant.images = self.load_images(variant.variant_id)?;
        Ok(variant)
    }

    fn query_overrides(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<OverrideRecord>, StorageError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, read_override_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    fn query_jobs(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<SyncJobRecord>, StorageError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, read_job_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }
}

const VARIANT_COLUMNS: &str =
    "variant_id, product_id, sku, name, is_active, is_default, position, (deleted_at IS NOT NULL)";

fn read_variant_row(row: &rusqlite::Row) -> rusqlite::Result<Variant> {
    Ok(Variant {
        variant_id: VariantId::new(row.get(0)?),
        product_id: ProductId::new(row.get(1)?),
        sku: row.get(2)?,
        name: row.get(3)?,
        is_active: row.get(4)?,
        is_default: row.get(5)?,
        position: row.get(6)?,
        attributes: AttributeSet::new(),
        images: Vec::new(),
        deleted: row.get(7)?,
    })
}

const OVERRIDE_COLUMNS: &str = "override_id, tenant_id, product_id, variant_id, operation, payload, \
     external_combination_id, sync_status, sync_error, synced_fingerprint, updated_at";

/// Row as stored; decoding the tag and payload can fail outside rusqlite.
struct RawOverride {
    override_id: i64,
    tenant_id: i64,
    product_id: i64,
    variant_id: Option<i64>,
    operation: String,
    payload: Vec<u8>,
    external_combination_id: Option<i64>,
    sync_status: String,
    sync_error: Option<String>,
    synced_fingerprint: Option<Vec<u8>>,
    updated_at: i64,
}

fn read_override_row(row: &rusqlite::Row) -> rusqlite::Result<RawOverride> {
    Ok(RawOverride {
        override_id: row.get(0)?,
        tenant_id: row.get(1)?,
        product_id: row.get(2)?,
        variant_id: row.get(3)?,
        operation: row.get(4)?,
        payload: row.get(5)?,
        external_combination_id: row.get(6)?,
        sync_status: row.get(7)?,
        sync_error: row.get(8)?,
        synced_fingerprint: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

impl RawOverride {
    fn into_record(self) -> Result<OverrideRecord, StorageError> {
        Ok(OverrideRecord {
            override_id: OverrideId::new(self.override_id),
            tenant_id: TenantId::new(self.tenant_id),
            product_id: ProductId::new(self.product_id),
            variant_id: self.variant_id.map(VariantId::new),
            operation: OperationTag::parse(&self.operation)?,
            payload: OverridePayload::from_msgpack(&self.payload)?,
            external_combination_id: self.external_combination_id.map(ExternalCombinationId::new),
            sync_status: OverrideSyncStatus::parse(&self.sync_status)?,
            sync_error: self.sync_error,
            synced_fingerprint: self
                .synced_fingerprint
                .map(|bytes| to_array::<32>(bytes, "synced_fingerprint"))
                .transpose()?,
            updated_at: self.updated_at,
        })
    }
}

const JOB_COLUMNS: &str =
    "job_id, product_id, tenant_id, status, error, created_at, started_at, finished_at";

struct RawJob {
    job_id: Vec<u8>,
    product_id: i64,
    tenant_id: i64,
    status: String,
    error: Option<String>,
    created_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
}

fn read_job_row(row: &rusqlite::Row) -> rusqlite::Result<RawJob> {
    Ok(RawJob {
        job_id: row.get(0)?,
        product_id: row.get(1)?,
        tenant_id: row.get(2)?,
        status: row.get(3)?,
        error: row.get(4)?,
        created_at: row.get(5)?,
        started_at: row.get(6)?,
        finished_at: row.get(7)?,
    })
}

impl RawJob {
    fn into_record(self) -> Result<SyncJobRecord, StorageError> {
        Ok(SyncJobRecord {
            job_id: SyncJobId::from_bytes(to_array::<16>(self.job_id, "job_id")?),
            product_id: ProductId::new(self.product_id),
            tenant_id: TenantId::new(self.tenant_id),
            status: SyncJobStatus::parse(&self.status)?,
            error: self.error,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

impl CatalogStore for SqliteStorage {
    fn insert_product(&mut self, sku: &str, name: &str) -> Result<ProductId, StorageError> {
        let result = self.conn.execute(
            "INSERT INTO products (sku, name) VALUES (?1, ?2)",
            rusqlite::params![sku, name],
        );
        match result {
            Ok(_) => Ok(ProductId::new(self.conn.last_insert_rowid())),
            Err(e) if is_constraint_violation(&e) => Err(StorageError::DuplicateSku {
                sku: sku.to_string(),
            }),
            Err(e) => Err(StorageError::Sqlite(e)),
        }
    }

    fn get_product(&self, product_id: ProductId) -> Result<Option<Product>, StorageError> {
        let product = self
            .conn
            .query_row(
                "SELECT product_id, sku, name, is_variant_master, default_variant_id FROM products WHERE product_id = ?1",
                rusqlite::params![product_id.get()],
                |row| {
                    Ok(Product {
                        product_id: ProductId::new(row.get(0)?),
                        sku: row.get(1)?,
                        name: row.get(2)?,
                        is_variant_master: row.get(3)?,
                        default_variant_id: row.get::<_, Option<i64>>(4)?.map(VariantId::new),
                    })
                },
            )
            .optional()?;
        Ok(product)
    }

    fn set_product_variant_state(
        &mut self,
        product_id: ProductId,
        is_variant_master: bool,
        default_variant_id: Option<VariantId>,
    ) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE products SET is_variant_master = ?1, default_variant_id = ?2 WHERE product_id = ?3",
            rusqlite::params![
                is_variant_master,
                default_variant_id.map(|id| id.get()),
                product_id.get()
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("product {product_id}")));
        }
        Ok(())
    }

    fn insert_attribute_type(
        &mut self,
        code: &str,
        name: &str,
        position: i32,
    ) -> Result<AttributeTypeId, StorageError> {
        self.conn.execute(
            "INSERT INTO attribute_types (code, name, position) VALUES (?1, ?2, ?3)",
            rusqlite::params![code, name, position],
        )?;
        Ok(AttributeTypeId::new(self.conn.last_insert_rowid()))
    }

    fn insert_attribute_value(
        &mut self,
        type_id: AttributeTypeId,
        code: &str,
        label: &str,
    ) -> Result<AttributeValueId, StorageError> {
        self.conn.execute(
            "INSERT INTO attribute_values (attribute_type_id, code, label) VALUES (?1, ?2, ?3)",
            rusqlite::params![type_id.get(), code, label],
        )?;
        Ok(AttributeValueId::new(self.conn.last_insert_rowid()))
    }

    fn attribute_value_exists(
        &self,
        type_id: AttributeTypeId,
        value_id: AttributeValueId,
    ) -> Result<bool, StorageError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM attribute_values WHERE attribute_type_id = ?1 AND attribute_value_id = ?2)",
            rusqlite::params![type_id.get(), value_id.get()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn attribute_codes(&self, attributes: &AttributeSet) -> Result<Vec<String>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT t.position, v.code FROM attribute_values v
             JOIN attribute_types t ON t.attribute_type_id = v.attribute_type_id
             WHERE v.attribute_type_id = ?1 AND v.attribute_value_id = ?2",
        )?;
        let mut codes = Vec::with_capacity(attributes.len());
        for (type_id, value_id) in attributes {
            let row = stmt
                .query_row(rusqlite::params![type_id.get(), value_id.get()], |row| {
                    Ok((row.get::<_, i32>(0)?, row.get::<_, String>(1)?))
                })
                .optional()?;
            match row {
                Some((position, code)) => codes.push((position, *type_id, code)),
                None => {
                    return Err(StorageError::NotFound(format!(
                        "attribute value {value_id} for type {type_id}"
                    )));
                }
            }
        }
        codes.sort();
        Ok(codes.into_iter().map(|(_, _, code)| code).collect())
    }

    fn sku_taken(&self, sku: &str, except: Option<VariantId>) -> Result<bool, StorageError> {
        let taken: bool = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM products WHERE sku = ?1)
                 OR EXISTS (SELECT 1 FROM variants WHERE sku = ?1 AND deleted_at IS NULL
                            AND (?2 IS NULL OR variant_id <> ?2))",
            rusqlite::params![sku, except.map(|id| id.get())],
            |row| row.get(0),
        )?;
        Ok(taken)
    }

    fn insert_variant(
        &mut self,
        product_id: ProductId,
        draft: &VariantDraft,
    ) -> Result<VariantId, StorageError> {
        if self.sku_taken(&draft.sku, None)? {
            return Err(StorageError::DuplicateSku {
                sku: draft.sku.clone(),
            });
        }
        let result = self.conn.execute(
            "INSERT INTO variants (product_id, sku, name, is_active, is_default, position) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                product_id.get(),
                draft.sku,
                draft.name,
                draft.is_active,
                draft.is_default,
                draft.position,
            ],
        );
        match result {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(StorageError::DuplicateSku {
                    sku: draft.sku.clone(),
                });
            }
            Err(e) => return Err(StorageError::Sqlite(e)),
        }
        let variant_id = VariantId::new(self.conn.last_insert_rowid());
        self.replace_variant_attributes(variant_id, &draft.attributes)?;
        self.replace_variant_images(variant_id, &draft.images)?;
        Ok(variant_id)
    }

    fn update_variant(&mut self, variant: &Variant) -> Result<(), StorageError> {
        if self.sku_taken(&variant.sku, Some(variant.variant_id))? {
            return Err(StorageError::DuplicateSku {
                sku: variant.sku.clone(),
            });
        }
        let changed = self.conn.execute(
            "UPDATE variants SET sku = ?1, name = ?2, is_active = ?3, is_default = ?4, position = ?5,
                 updated_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)
             WHERE variant_id = ?6 AND deleted_at IS NULL",
            rusqlite::params![
                variant.sku,
                variant.name,
                variant.is_active,
                variant.is_default,
                variant.position,
                variant.variant_id.get(),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("variant {}", variant.variant_id)));
        }
        Ok(())
    }

    fn soft_delete_variant(&mut self, variant_id: VariantId) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE variants SET deleted_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER), is_default = 0
             WHERE variant_id = ?1 AND deleted_at IS NULL",
            rusqlite::params![variant_id.get()],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("variant {variant_id}")));
        }
        Ok(())
    }

    fn replace_variant_attributes(
        &mut self,
        variant_id: VariantId,
        attributes: &AttributeSet,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "DELETE FROM variant_attributes WHERE variant_id = ?1",
            rusqlite::params![variant_id.get()],
        )?;
        let mut stmt = self.conn.prepare(
            "INSERT INTO variant_attributes (variant_id, attribute_type_id, attribute_value_id) VALUES (?1, ?2, ?3)",
        )?;
        for (type_id, value_id) in attributes {
            stmt.execute(rusqlite::params![variant_id.get(), type_id.get(), value_id.get()])?;
        }
        Ok(())
    }

    fn replace_variant_images(
        &mut self,
        variant_id: VariantId,
        images: &[MediaId],
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "DELETE FROM variant_images WHERE variant_id = ?1",
            rusqlite::params![variant_id.get()],
        )?;
        let mut stmt = self.conn.prepare(
            "INSERT OR IGNORE INTO variant_images (variant_id, media_id, position) VALUES (?1, ?2, ?3)",
        )?;
        for (position, media_id) in images.iter().enumerate() {
            stmt.execute(rusqlite::params![variant_id.get(), media_id.get(), position as i64])?;
        }
        Ok(())
    }

    fn get_variant(&self, variant_id: VariantId) -> Result<Option<Variant>, StorageError> {
        let variant = self
            .conn
            .query_row(
                &format!("SELECT {VARIANT_COLUMNS} FROM variants WHERE variant_id = ?1"),
                rusqlite::params![variant_id.get()],
                read_variant_row,
            )
            .optional()?;
        variant.map(|v| self.hydrate_variant(v)).transpose()
    }

    fn list_variants(&self, product_id: ProductId) -> Result<Vec<Variant>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {VARIANT_COLUMNS} FROM variants
             WHERE product_id = ?1 AND deleted_at IS NULL
             ORDER BY position, variant_id"
        ))?;
        let rows = stmt
            .query_map(rusqlite::params![product_id.get()], read_variant_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(|v| self.hydrate_variant(v)).collect()
    }

    fn clear_default_flags(
        &mut self,
        product_id: ProductId,
        except: Option<VariantId>,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE variants SET is_default = 0
             WHERE product_id = ?1 AND is_default = 1 AND (?2 IS NULL OR variant_id <> ?2)",
            rusqlite::params![product_id.get(), except.map(|id| id.get())],
        )?;
        Ok(())
    }
}

impl TenantStore for SqliteStorage {
    fn insert_tenant(&mut self, name: &str) -> Result<TenantId, StorageError> {
        self.conn.execute(
            "INSERT INTO tenants (name) VALUES (?1)",
            rusqlite::params![name],
        )?;
        Ok(TenantId::new(self.conn.last_insert_rowid()))
    }

    fn set_external_product(
        &mut self,
        tenant_id: TenantId,
        product_id: ProductId,
        external_id: ExternalProductId,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO tenant_products (tenant_id, product_id, external_product_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(tenant_id, product_id) DO UPDATE SET external_product_id = excluded.external_product_id",
            rusqlite::params![tenant_id.get(), product_id.get(), external_id.get()],
        )?;
        Ok(())
    }

    fn external_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<Option<ExternalProductId>, StorageError> {
        let id = self
            .conn
            .query_row(
                "SELECT external_product_id FROM tenant_products WHERE tenant_id = ?1 AND product_id = ?2",
                rusqlite::params![tenant_id.get(), product_id.get()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(id.map(ExternalProductId::new))
    }

    fn confirmed_external_id(
        &self,
        variant_id: VariantId,
        tenant_id: TenantId,
    ) -> Result<Option<ExternalCombinationId>, StorageError> {
        let id = self
            .conn
            .query_row(
                "SELECT external_combination_id FROM variant_external_ids WHERE variant_id = ?1 AND tenant_id = ?2",
                rusqlite::params![variant_id.get(), tenant_id.get()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(id.map(ExternalCombinationId::new))
    }

    fn record_external_id(
        &mut self,
        variant_id: VariantId,
        tenant_id: TenantId,
        combination_id: ExternalCombinationId,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO variant_external_ids (variant_id, tenant_id, external_combination_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(variant_id, tenant_id) DO UPDATE SET
                 external_combination_id = excluded.external_combination_id,
                 confirmed_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)",
            rusqlite::params![variant_id.get(), tenant_id.get(), combination_id.get()],
        )?;
        Ok(())
    }

    fn forget_external_id(
        &mut self,
        variant_id: VariantId,
        tenant_id: TenantId,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "DELETE FROM variant_external_ids WHERE variant_id = ?1 AND tenant_id = ?2",
            rusqlite::params![variant_id.get(), tenant_id.get()],
        )?;
        Ok(())
    }

    fn map_media(
        &mut self,
        media_id: MediaId,
        tenant_id: TenantId,
        external_id: ExternalImageId,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO media_external_images (media_id, tenant_id, external_image_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(media_id, tenant_id) DO UPDATE SET external_image_id = excluded.external_image_id",
            rusqlite::params![media_id.get(), tenant_id.get(), external_id.get()],
        )?;
        Ok(())
    }

    fn external_image_ids(
        &self,
        tenant_id: TenantId,
        media: &[MediaId],
    ) -> Result<Vec<ExternalImageId>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT external_image_id FROM media_external_images WHERE media_id = ?1 AND tenant_id = ?2",
        )?;
        let mut resolved = Vec::with_capacity(media.len());
        for media_id in media {
            let id = stmt
                .query_row(rusqlite::params![media_id.get(), tenant_id.get()], |row| {
                    row.get::<_, i64>(0)
                })
                .optional()?;
            if let Some(id) = id {
                resolved.push(ExternalImageId::new(id));
            }
        }
        Ok(resolved)
    }
}

impl OverrideStore for SqliteStorage {
    fn upsert_override(&mut self, new: &NewOverride) -> Result<OverrideId, StorageError> {
        let payload = new.payload.to_msgpack()?;
        let existing = match new.variant_id {
            Some(variant_id) => self.override_for_variant(new.tenant_id, variant_id)?,
            None => None,
        };
        if let Some(existing) = existing {
            self.conn.execute(
                "UPDATE tenant_overrides SET operation = ?1, payload = ?2, sync_status = 'pending', sync_error = NULL,
                     updated_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)
                 WHERE override_id = ?3",
                rusqlite::params![new.operation.as_str(), payload, existing.override_id.get()],
            )?;
            return Ok(existing.override_id);
        }

        let result = self.conn.execute(
            "INSERT INTO tenant_overrides (tenant_id, product_id, variant_id, operation, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                new.tenant_id.get(),
                new.product_id.get(),
                new.variant_id.map(|id| id.get()),
                new.operation.as_str(),
                payload,
            ],
        );
        match result {
            Ok(_) => Ok(OverrideId::new(self.conn.last_insert_rowid())),
            Err(e) if is_constraint_violation(&e) => Err(StorageError::ConstraintViolation(
                format!("override {} for tenant {}", new.operation.as_str(), new.tenant_id),
            )),
            Err(e) => Err(StorageError::Sqlite(e)),
        }
    }

    fn get_override(&self, override_id: OverrideId) -> Result<Option<OverrideRecord>, StorageError> {
        let records = self.query_overrides(
            &format!("SELECT {OVERRIDE_COLUMNS} FROM tenant_overrides WHERE override_id = ?1"),
            rusqlite::params![override_id.get()],
        )?;
        Ok(records.into_iter().next())
    }

    fn override_for_variant(
        &self,
        tenant_id: TenantId,
        variant_id: VariantId,
    ) -> Result<Option<OverrideRecord>, StorageError> {
        let records = self.query_overrides(
            &format!(
                "SELECT {OVERRIDE_COLUMNS} FROM tenant_overrides WHERE tenant_id = ?1 AND variant_id = ?2"
            ),
            rusqlite::params![tenant_id.get(), variant_id.get()],
        )?;
        Ok(records.into_iter().next())
    }

    fn list_overrides(
        &self,
        product_id: ProductId,
        tenant_id: TenantId,
    ) -> Result<Vec<OverrideRecord>, StorageError> {
        self.query_overrides(
            &format!(
                "SELECT {OVERRIDE_COLUMNS} FROM tenant_overrides
                 WHERE product_id = ?1 AND tenant_id = ?2 ORDER BY override_id"
            ),
            rusqlite::params![product_id.get(), tenant_id.get()],
        )
    }

    fn delete_override(&mut self, override_id: OverrideId) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "DELETE FROM tenant_overrides WHERE override_id = ?1",
            rusqlite::params![override_id.get()],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("override {override_id}")));
        }
        Ok(())
    }

    fn rewrite_override(
        &mut self,
        override_id: OverrideId,
        operation: OperationTag,
        payload: &OverridePayload,
    ) -> Result<(), StorageError> {
        let payload = payload.to_msgpack()?;
        let changed = self.conn.execute(
            "UPDATE tenant_overrides SET operation = ?1, payload = ?2, sync_status = 'pending', sync_error = NULL,
                 updated_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)
             WHERE override_id = ?3",
            rusqlite::params![operation.as_str(), payload, override_id.get()],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("override {override_id}")));
        }
        Ok(())
    }

    fn set_override_combination(
        &mut self,
        override_id: OverrideId,
        combination_id: Option<ExternalCombinationId>,
    ) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE tenant_overrides SET external_combination_id = ?1 WHERE override_id = ?2",
            rusqlite::params![combination_id.map(|id| id.get()), override_id.get()],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("override {override_id}")));
        }
        Ok(())
    }

    fn claim_overrides_for_sync(
        &mut self,
        product_id: ProductId,
        tenant_id: TenantId,
    ) -> Result<Vec<OverrideRecord>, StorageError> {
        let mut claimed = self.query_overrides(
            &format!(
                "UPDATE tenant_overrides SET sync_status = 'in_progress', sync_error = NULL,
                     updated_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)
                 WHERE product_id = ?1 AND tenant_id = ?2 AND sync_status <> 'synced'
                 RETURNING {OVERRIDE_COLUMNS}"
            ),
            rusqlite::params![product_id.get(), tenant_id.get()],
        )?;
        claimed.sort_by_key(|record| record.override_id);
        Ok(claimed)
    }

    fn mark_override_synced(
        &mut self,
        override_id: OverrideId,
        combination_id: Option<ExternalCombinationId>,
        fingerprint: [u8; 32],
    ) -> Result<bool, StorageError> {
        let changed = self.conn.execute(
            "UPDATE tenant_overrides SET sync_status = 'synced', sync_error = NULL,
                 external_combination_id = ?1, synced_fingerprint = ?2,
                 updated_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)
             WHERE override_id = ?3 AND sync_status = 'in_progress'",
            rusqlite::params![
                combination_id.map(|id| id.get()),
                &fingerprint[..],
                override_id.get()
            ],
        )?;
        if changed > 0 {
            return Ok(true);
        }
        // Superseded: the combination still exists externally, so the next
        // push must update it rather than create another.
        self.conn.execute(
            "UPDATE tenant_overrides SET external_combination_id = ?1 WHERE override_id = ?2",
            rusqlite::params![combination_id.map(|id| id.get()), override_id.get()],
        )?;
        Ok(false)
    }

    fn mark_override_failed(
        &mut self,
        override_id: OverrideId,
        error: &str,
    ) -> Result<bool, StorageError> {
        let changed = self.conn.execute(
            "UPDATE tenant_overrides SET sync_status = 'failed', sync_error = ?1,
                 updated_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)
             WHERE override_id = ?2 AND sync_status = 'in_progress'",
            rusqlite::params![error, override_id.get()],
        )?;
        Ok(changed > 0)
    }

    fn retire_override(&mut self, override_id: OverrideId) -> Result<bool, StorageError> {
        let changed = self.conn.execute(
            "DELETE FROM tenant_overrides WHERE override_id = ?1 AND sync_status = 'in_progress'",
            rusqlite::params![override_id.get()],
        )?;
        Ok(changed > 0)
    }

    fn release_claimed_overrides(
        &mut self,
        product_id: ProductId,
        tenant_id: TenantId,
        error: &str,
    ) -> Result<usize, StorageError> {
        let changed = self.conn.execute(
            "UPDATE tenant_overrides SET sync_status = 'failed', sync_error = ?1,
                 updated_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)
             WHERE product_id = ?2 AND tenant_id = ?3 AND sync_status = 'in_progress'",
            rusqlite::params![error, product_id.get(), tenant_id.get()],
        )?;
        Ok(changed)
    }

    fn count_overrides_with_status(
        &self,
        product_id: ProductId,
        tenant_id: TenantId,
        status: OverrideSyncStatus,
    ) -> Result<usize, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tenant_overrides
             WHERE product_id = ?1 AND tenant_id = ?2 AND sync_status = ?3",
            rusqlite::params![product_id.get(), tenant_id.get(), status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn count_overrides_needing_sync(
        &self,
        product_id: ProductId,
        tenant_id: TenantId,
    ) -> Result<usize, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tenant_overrides
             WHERE product_id = ?1 AND tenant_id = ?2 AND sync_status <> 'synced'",
            rusqlite::params![product_id.get(), tenant_id.get()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl StagingStore for SqliteStorage {
    fn get_staged(
        &self,
        session: &SessionId,
        product_id: ProductId,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let payload = self
            .conn
            .query_row(
                "SELECT payload FROM staged_ledgers WHERE session_id = ?1 AND product_id = ?2",
                rusqlite::params![session.as_str(), product_id.get()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(payload)
    }

    fn put_staged(
        &mut self,
        session: &SessionId,
        product_id: ProductId,
        payload: &[u8],
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO staged_ledgers (session_id, product_id, payload) VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id, product_id) DO UPDATE SET
                 payload = excluded.payload,
                 updated_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)",
            rusqlite::params![session.as_str(), product_id.get(), payload],
        )?;
        Ok(())
    }

    fn forget_staged(
        &mut self,
        session: &SessionId,
        product_id: ProductId,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "DELETE FROM staged_ledgers WHERE session_id = ?1 AND product_id = ?2",
            rusqlite::params![session.as_str(), product_id.get()],
        )?;
        Ok(())
    }
}

impl SyncJobStore for SqliteStorage {
    fn insert_sync_job(&mut self, job: &SyncJobRecord) -> Result<(), StorageError> {
        let result = self.conn.execute(
            "INSERT INTO sync_jobs (job_id, product_id, tenant_id, status, error) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                job.job_id.as_bytes().as_slice(),
                job.product_id.get(),
                job.tenant_id.get(),
                job.status.as_str(),
                job.error,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(StorageError::ConstraintViolation(
                format!(
                    "active sync job already exists for product {} tenant {}",
                    job.product_id, job.tenant_id
                ),
            )),
            Err(e) => Err(StorageError::Sqlite(e)),
        }
    }

    fn get_sync_job(&self, job_id: SyncJobId) -> Result<Option<SyncJobRecord>, StorageError> {
        let jobs = self.query_jobs(
            &format!("SELECT {JOB_COLUMNS} FROM sync_jobs WHERE job_id = ?1"),
            rusqlite::params![job_id.as_bytes().as_slice()],
        )?;
        Ok(jobs.into_iter().next())
    }

    fn active_sync_job(
        &self,
        product_id: ProductId,
        tenant_id: TenantId,
    ) -> Result<Option<SyncJobRecord>, StorageError> {
        let jobs = self.query_jobs(
            &format!(
                "SELECT {JOB_COLUMNS} FROM sync_jobs
                 WHERE product_id = ?1 AND tenant_id = ?2 AND status IN ('pending', 'running')"
            ),
            rusqlite::params![product_id.get(), tenant_id.get()],
        )?;
        Ok(jobs.into_iter().next())
    }

    fn latest_sync_job(
        &self,
        product_id: ProductId,
        tenant_id: TenantId,
    ) -> Result<Option<SyncJobRecord>, StorageError> {
        let jobs = self.query_jobs(
            &format!(
                "SELECT {JOB_COLUMNS} FROM sync_jobs
                 WHERE product_id = ?1 AND tenant_id = ?2
                 ORDER BY created_at DESC, rowid DESC LIMIT 1"
            ),
            rusqlite::params![product_id.get(), tenant_id.get()],
        )?;
        Ok(jobs.into_iter().next())
    }

    fn update_sync_job_status(
        &mut self,
        job_id: SyncJobId,
        status: SyncJobStatus,
        error: Option<&str>,
    ) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE sync_jobs SET status = ?1, error = ?2,
                 started_at = CASE WHEN ?1 = 'running' AND started_at IS NULL
                     THEN CAST(unixepoch('now','subsec') * 1000 AS INTEGER) ELSE started_at END,
                 finished_at = CASE WHEN ?1 IN ('completed', 'failed')
                     THEN CAST(unixepoch('now','subsec') * 1000 AS INTEGER) ELSE finished_at END
             WHERE job_id = ?3",
            rusqlite::params![status.as_str(), error, job_id.as_bytes().as_slice()],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("sync job {job_id}")));
        }
        Ok(())
    }
}
