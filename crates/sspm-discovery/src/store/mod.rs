//! Evidence repository interface.
//!
//! The driver reads and writes discovery state only through
//! [`DiscoveryRepository`]; bindings go through
//! [`BindingStore`](crate::binding::BindingStore). `sspm-db` provides the
//! PostgreSQL implementation, [`InMemoryDiscoveryStore`] serves tests and
//! embedded use.

mod memory;

pub use memory::InMemoryDiscoveryStore;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::health::SyncRunRollup;
use crate::types::{
    AppSighting, GovernanceOverride, PostureInputRow, PostureUpdate, SaasApp, SaasAppId, SourceKey,
};

/// Durable store of discovered apps, usage evidence, overrides and sync runs.
#[async_trait]
pub trait DiscoveryRepository: Send + Sync {
    /// One row per discovered app with its primary binding, usage signals and
    /// governance override fields.
    async fn list_posture_inputs(&self) -> Result<Vec<PostureInputRow>>;

    /// Last successful sync finish time for each requested source. Sources
    /// that never succeeded are absent from the map.
    async fn latest_successful_sync(
        &self,
        sources: &[SourceKey],
    ) -> Result<HashMap<SourceKey, DateTime<Utc>>>;

    /// Persist the combined posture and risk fields for one app.
    async fn update_posture(&self, update: &PostureUpdate) -> Result<()>;

    /// Sync-run aggregates for the requested sources over runs finished
    /// since `since`. Sources without runs may be omitted.
    async fn sync_run_rollup(
        &self,
        sources: &[SourceKey],
        since: DateTime<Utc>,
    ) -> Result<Vec<SyncRunRollup>>;

    async fn get_app(&self, app_id: SaasAppId) -> Result<Option<SaasApp>>;

    async fn list_apps(&self) -> Result<Vec<SaasApp>>;

    /// Create the app for `canonical_key` on first sighting, otherwise
    /// advance `last_seen_at` and fill missing identity fields.
    async fn upsert_app(&self, canonical_key: &str, sighting: &AppSighting) -> Result<SaasApp>;

    /// One override row per app; replaces any existing row.
    async fn upsert_governance_override(&self, input: &GovernanceOverride) -> Result<()>;

    async fn get_governance_override(&self, app_id: SaasAppId)
        -> Result<Option<GovernanceOverride>>;
}
