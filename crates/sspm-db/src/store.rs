//! PostgreSQL discovery store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sspm_discovery::{
    AppSighting, BindingStore, DiscoveryError, DiscoveryRepository, GovernanceOverride,
    PostureInputRow, PostureUpdate, Result, SaasApp, SaasAppBinding, SaasAppId, SourceKey,
    SyncRun, SyncRunRollup, UpsertBinding, UpsertOutcome,
};
use tracing::instrument;

use crate::error::DbError;
use crate::models::{
    source_key, GovernanceOverrideRow, PostureInputDbRow, SaasAppBindingRow, SaasAppRow,
    SyncRunRollupRow, SyncRunRow,
};
use crate::pool::DbPool;

/// Distinct actors are counted over this many trailing days.
pub const ACTOR_WINDOW_DAYS: i64 = 30;

/// [`DiscoveryRepository`] and [`BindingStore`] backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgDiscoveryStore {
    pool: DbPool,
}

impl PgDiscoveryStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record a connector sync run outcome.
    #[instrument(skip(self, run), fields(source = %run.source, status = %run.status))]
    pub async fn record_sync_run(&self, run: &SyncRun) -> Result<()> {
        SyncRunRow::insert(self.pool.inner(), run)
            .await
            .map_err(DbError::QueryFailed)?;
        Ok(())
    }
}

fn query_failed(err: sqlx::Error) -> DiscoveryError {
    DbError::QueryFailed(err).into()
}

/// Foreign key failures on app-scoped writes mean the app does not exist.
fn app_write_failed(app_id: SaasAppId) -> impl FnOnce(sqlx::Error) -> DiscoveryError {
    move |err| {
        let err = DbError::QueryFailed(err);
        if err.is_foreign_key_violation() {
            DiscoveryError::AppNotFound(app_id)
        } else {
            err.into()
        }
    }
}

#[async_trait]
impl DiscoveryRepository for PgDiscoveryStore {
    #[instrument(level = "debug", skip(self))]
    async fn list_posture_inputs(&self) -> Result<Vec<PostureInputRow>> {
        let since = Utc::now() - Duration::days(ACTOR_WINDOW_DAYS);
        let rows = PostureInputDbRow::list(self.pool.inner(), since)
            .await
            .map_err(query_failed)?;
        rows.into_iter()
            .map(|row| PostureInputRow::try_from(row).map_err(DiscoveryError::from))
            .collect()
    }

    #[instrument(level = "debug", skip(self, sources), fields(sources = sources.len()))]
    async fn latest_successful_sync(
        &self,
        sources: &[SourceKey],
    ) -> Result<HashMap<SourceKey, DateTime<Utc>>> {
        if sources.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = SyncRunRow::latest_successful(self.pool.inner(), sources)
            .await
            .map_err(query_failed)?;
        rows.into_iter()
            .map(|(kind, name, finished_at)| -> Result<(SourceKey, DateTime<Utc>)> {
                Ok((source_key(&kind, name)?, finished_at))
            })
            .collect()
    }

    #[instrument(level = "debug", skip(self, update), fields(app_id = %update.app_id))]
    async fn update_posture(&self, update: &PostureUpdate) -> Result<()> {
        let updated = SaasAppRow::update_posture(self.pool.inner(), update)
            .await
            .map_err(query_failed)?;
        if updated == 0 {
            return Err(DiscoveryError::AppNotFound(update.app_id));
        }
        Ok(())
    }

    #[instrument(level = "debug", skip(self, sources), fields(sources = sources.len()))]
    async fn sync_run_rollup(
        &self,
        sources: &[SourceKey],
        since: DateTime<Utc>,
    ) -> Result<Vec<SyncRunRollup>> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }
        SyncRunRollupRow::for_sources(self.pool.inner(), sources, since)
            .await
            .map_err(query_failed)?
            .into_iter()
            .map(SyncRunRollupRow::into_rollup)
            .collect()
    }

    async fn get_app(&self, app_id: SaasAppId) -> Result<Option<SaasApp>> {
        SaasAppRow::find_by_id(self.pool.inner(), app_id.into_inner())
            .await
            .map_err(query_failed)?
            .map(|row| SaasApp::try_from(row).map_err(DiscoveryError::from))
            .transpose()
    }

    async fn list_apps(&self) -> Result<Vec<SaasApp>> {
        SaasAppRow::list_all(self.pool.inner())
            .await
            .map_err(query_failed)?
            .into_iter()
            .map(|row| SaasApp::try_from(row).map_err(DiscoveryError::from))
            .collect()
    }

    #[instrument(skip(self, sighting), fields(canonical_key = %canonical_key))]
    async fn upsert_app(&self, canonical_key: &str, sighting: &AppSighting) -> Result<SaasApp> {
        let row = SaasAppRow::upsert_sighting(self.pool.inner(), canonical_key, sighting)
            .await
            .map_err(query_failed)?;
        Ok(SaasApp::try_from(row)?)
    }

    #[instrument(skip(self, input), fields(app_id = %input.app_id))]
    async fn upsert_governance_override(&self, input: &GovernanceOverride) -> Result<()> {
        GovernanceOverrideRow::upsert(self.pool.inner(), input)
            .await
            .map_err(app_write_failed(input.app_id))
    }

    async fn get_governance_override(
        &self,
        app_id: SaasAppId,
    ) -> Result<Option<GovernanceOverride>> {
        GovernanceOverrideRow::find_by_app(self.pool.inner(), app_id.into_inner())
            .await
            .map_err(query_failed)?
            .map(|row| GovernanceOverride::try_from(row).map_err(DiscoveryError::from))
            .transpose()
    }
}

#[async_trait]
impl BindingStore for PgDiscoveryStore {
    #[instrument(
        level = "debug",
        skip(self, input),
        fields(app_id = %input.app_id, source = %input.source, origin = %input.origin)
    )]
    async fn upsert_binding(&self, input: &UpsertBinding) -> Result<UpsertOutcome> {
        SaasAppBindingRow::upsert(self.pool.inner(), input)
            .await
            .map_err(app_write_failed(input.app_id))
    }

    #[instrument(skip(self, input), fields(app_id = %input.app_id, source = %input.source))]
    async fn pin_manual_binding(&self, input: &UpsertBinding) -> Result<UpsertOutcome> {
        SaasAppBindingRow::pin_manual(self.pool.inner(), input)
            .await
            .map_err(app_write_failed(input.app_id))
    }

    async fn list_bindings(&self, app_id: SaasAppId) -> Result<Vec<SaasAppBinding>> {
        SaasAppBindingRow::list_by_app(self.pool.inner(), app_id.into_inner())
            .await
            .map_err(query_failed)?
            .into_iter()
            .map(SaasAppBindingRow::into_binding)
            .collect()
    }

    #[instrument(level = "debug", skip(self, primary), fields(app_id = %app_id))]
    async fn set_primary(&self, app_id: SaasAppId, primary: Option<&SourceKey>) -> Result<()> {
        SaasAppBindingRow::set_primary(self.pool.inner(), app_id.into_inner(), primary)
            .await
            .map_err(query_failed)?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self), fields(app_id = %app_id))]
    async fn recompute_primary(&self, app_id: SaasAppId) -> Result<Option<SaasAppBinding>> {
        SaasAppBindingRow::recompute_primary(self.pool.inner(), app_id.into_inner())
            .await
            .map_err(query_failed)?
            .map(SaasAppBindingRow::into_binding)
            .transpose()
    }

    #[instrument(skip(self), fields(app_id = %app_id))]
    async fn clear_manual_bindings(&self, app_id: SaasAppId) -> Result<u64> {
        SaasAppBindingRow::clear_manual(self.pool.inner(), app_id.into_inner())
            .await
            .map_err(query_failed)
    }
}
