//! Audit store backed by `saas_app_binding_audit_events`.

use async_trait::async_trait;
use sspm_discovery::audit::{
    BindingAuditEvent, BindingAuditEventInput, BindingAuditFilter, BindingAuditStore,
};
use sspm_discovery::{DiscoveryError, Result};

use crate::error::DbError;
use crate::models::BindingAuditEventRow;
use crate::pool::DbPool;

#[derive(Debug, Clone)]
pub struct PgBindingAuditStore {
    pool: DbPool,
}

impl PgBindingAuditStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BindingAuditStore for PgBindingAuditStore {
    async fn log_event(&self, input: BindingAuditEventInput) -> Result<BindingAuditEvent> {
        let row = BindingAuditEventRow::insert(self.pool.inner(), &input)
            .await
            .map_err(DbError::QueryFailed)?;
        Ok(BindingAuditEvent::try_from(row)?)
    }

    async fn query_events(&self, filter: BindingAuditFilter) -> Result<Vec<BindingAuditEvent>> {
        BindingAuditEventRow::query(self.pool.inner(), &filter)
            .await
            .map_err(DbError::QueryFailed)?
            .into_iter()
            .map(|row| BindingAuditEvent::try_from(row).map_err(DiscoveryError::from))
            .collect()
    }
}
