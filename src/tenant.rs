//! Tenant resolution.
//!
//! Maps a phone number to its tenant context, falling back to a fixed default
//! tenant row. The fallback is explicit here rather than an ambient global.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::model::Tenant;

/// Row id of the tenant seeded by schema.sql.
pub const DEFAULT_TENANT_ID: i64 = 1;

#[async_trait]
pub trait TenantResolver: Send + Sync {
    async fn resolve(&self, phone: &str) -> anyhow::Result<Tenant>;
}

pub struct SqliteTenantResolver {
    pool: SqlitePool,
}

impl SqliteTenantResolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantResolver for SqliteTenantResolver {
    async fn resolve(&self, phone: &str) -> anyhow::Result<Tenant> {
        let known = sqlx::query_as::<_, Tenant>(
            "SELECT t.id, t.name FROM tenants t \
             JOIN participants p ON p.tenant_id = t.id \
             WHERE p.phone_e164 = ? LIMIT 1",
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(tenant) = known {
            return Ok(tenant);
        }
        let default = sqlx::query_as::<_, Tenant>("SELECT id, name FROM tenants WHERE id = ?")
            .bind(DEFAULT_TENANT_ID)
            .fetch_one(&self.pool)
            .await?;
        Ok(default)
    }
}
