//! Connector runtime registry backed by `connector_configurations`.

use async_trait::async_trait;
use sspm_discovery::{ConnectorRegistry, ConnectorRuntimeState, Result};
use tracing::{instrument, warn};

use crate::error::DbError;
use crate::models::ConnectorConfigurationRow;
use crate::pool::DbPool;

#[derive(Debug, Clone)]
pub struct PgConnectorRegistry {
    pool: DbPool,
}

impl PgConnectorRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert or replace the configuration for one connector kind.
    #[instrument(skip(self, state), fields(connector_kind = %state.kind))]
    pub async fn upsert(&self, state: &ConnectorRuntimeState) -> Result<()> {
        ConnectorConfigurationRow::upsert(self.pool.inner(), state)
            .await
            .map_err(DbError::QueryFailed)?;
        Ok(())
    }
}

#[async_trait]
impl ConnectorRegistry for PgConnectorRegistry {
    /// Rows naming an unknown connector kind are skipped with a warning so
    /// one bad row cannot block every pass.
    #[instrument(level = "debug", skip(self))]
    async fn load_states(&self) -> Result<Vec<ConnectorRuntimeState>> {
        let rows = ConnectorConfigurationRow::list_all(self.pool.inner())
            .await
            .map_err(DbError::QueryFailed)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let kind = row.connector_kind.clone();
                row.into_state()
                    .inspect_err(|e| warn!(connector_kind = %kind, error = %e, "Skipping connector row"))
                    .ok()
            })
            .collect())
    }
}
