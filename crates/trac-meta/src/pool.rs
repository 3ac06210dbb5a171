use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::RwLock;

use trac_error::{Result, TracError};

/// Caches `tenant_code → tenant_id`, reloading the whole table under a
/// coarse lock on a miss (spec §4.4). A single process-wide cache is shared
/// by every request; misses are expected to be rare (new tenants are
/// provisioned out of band, not created by this service).
#[derive(Debug)]
pub struct TenantCache {
    pool: PgPool,
    entries: RwLock<HashMap<String, i32>>,
}

impl TenantCache {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, tenant_code: &str) -> Result<i32> {
        if let Some(id) = self.entries.read().await.get(tenant_code) {
            return Ok(*id);
        }

        self.reload().await?;

        self.entries
            .read()
            .await
            .get(tenant_code)
            .copied()
            .ok_or_else(|| TracError::UnknownTenant(tenant_code.to_string()))
    }

    async fn reload(&self) -> Result<()> {
        let mut guard = self.entries.write().await;

        // Another task may have reloaded between our read-miss and taking
        // the write lock; re-check before paying for another round trip.
        if !guard.is_empty() {
            return Ok(());
        }

        let rows: Vec<(String, i32)> = sqlx::query_as("select tenant_code, tenant_id from tenant")
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?;

        guard.clear();
        guard.extend(rows);
        Ok(())
    }
}

/// A process-local, connection-unique counter seeding the `mapping_stage`
/// column of `key_mapping` (spec §4.4: "an atomic counter per connection is
/// sufficient").
#[derive(Debug, Default)]
pub struct MappingStageCounter(AtomicI64);

impl MappingStageCounter {
    pub fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// The handle every `trac-meta` operation is called through: a connection
/// pool, the tenant cache, and the mapping-stage counter.
#[derive(Debug, Clone)]
pub struct MetaStore {
    pub(crate) pool: PgPool,
    pub(crate) tenants: Arc<TenantCache>,
    pub(crate) mapping_stage: Arc<MappingStageCounter>,
}

impl MetaStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            tenants: Arc::new(TenantCache::new(pool.clone())),
            mapping_stage: Arc::new(MappingStageCounter::default()),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn tenant_id(&self, tenant_code: &str) -> Result<i32> {
        self.tenants.resolve(tenant_code).await
    }
}

/// Maps an opaque `sqlx::Error` to the failure taxonomy of spec §4.4:
/// duplicate PK, missing FK, or an unclassified internal error. Type
/// mismatches are detected by callers that already hold the expected type
/// and so are raised directly as `WrongItemType`, not through this mapping.
pub(crate) fn sql_err(err: sqlx::Error) -> TracError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some("23505") => TracError::DuplicateItem(db_err.message().to_string()),
            Some("23503") => TracError::MissingItem(db_err.message().to_string()),
            _ => TracError::TracInternal(err.to_string()),
        },
        sqlx::Error::RowNotFound => TracError::MissingItem("no matching row".to_string()),
        _ => TracError::TracInternal(err.to_string()),
    }
}
