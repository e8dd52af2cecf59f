//! Connector runtime configuration model. One row per connector kind.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use sspm_discovery::{ConnectorKind, ConnectorRuntimeState};

/// A row of `connector_configurations`.
#[derive(Debug, Clone, FromRow)]
pub struct ConnectorConfigurationRow {
    pub connector_kind: String,
    pub display_name: Option<String>,
    pub source_name: String,
    pub enabled: bool,
    pub configured: bool,
    pub sync_interval_minutes: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectorConfigurationRow {
    /// Runtime state for this row. The catalog display name is used when
    /// none is stored.
    pub fn into_state(self) -> sspm_discovery::Result<ConnectorRuntimeState> {
        let kind: ConnectorKind = self.connector_kind.parse()?;
        let mut state = ConnectorRuntimeState::active(kind, self.source_name)
            .with_enabled(self.enabled)
            .with_configured(self.configured);
        if let Some(name) = self.display_name.filter(|n| !n.trim().is_empty()) {
            state.display_name = name;
        }
        if let Some(minutes) = self.sync_interval_minutes.filter(|m| *m > 0) {
            state = state.with_sync_interval(chrono::Duration::minutes(i64::from(minutes)));
        }
        Ok(state)
    }

    pub async fn list_all(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM connector_configurations
            ORDER BY connector_kind
            ",
        )
        .fetch_all(pool)
        .await
    }

    /// Insert or replace the configuration for a connector kind.
    pub async fn upsert(pool: &PgPool, state: &ConnectorRuntimeState) -> Result<(), sqlx::Error> {
        let interval = state
            .sync_interval
            .map(|d| i32::try_from(d.num_minutes()).unwrap_or(i32::MAX));
        sqlx::query(
            r"
            INSERT INTO connector_configurations (
                connector_kind, display_name, source_name, enabled, configured,
                sync_interval_minutes, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (connector_kind) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                source_name = EXCLUDED.source_name,
                enabled = EXCLUDED.enabled,
                configured = EXCLUDED.configured,
                sync_interval_minutes = EXCLUDED.sync_interval_minutes,
                updated_at = NOW()
            ",
        )
        .bind(state.kind.as_str())
        .bind(&state.display_name)
        .bind(&state.source_name)
        .bind(state.enabled)
        .bind(state.configured)
        .bind(interval)
        .execute(pool)
        .await?;
        Ok(())
    }
}
