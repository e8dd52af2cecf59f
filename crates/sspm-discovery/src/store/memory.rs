//! In-memory discovery store.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::DiscoveryRepository;
use crate::binding::{select_primary, BindingStore};
use crate::error::{DiscoveryError, Result};
use crate::health::{SyncRun, SyncRunRollup, SyncRunStatus};
use crate::types::{
    AppSighting, BindingId, BindingOrigin, GovernanceOverride, ManagedState, PostureInputRow,
    PostureUpdate, RiskLevel, SaasApp, SaasAppBinding, SaasAppId, SourceKey, UpsertBinding,
    UpsertOutcome, UsageSignals,
};

#[derive(Debug, Default)]
struct State {
    apps: HashMap<SaasAppId, SaasApp>,
    apps_by_key: HashMap<String, SaasAppId>,
    bindings: HashMap<(SaasAppId, SourceKey), SaasAppBinding>,
    overrides: HashMap<SaasAppId, GovernanceOverride>,
    signals: HashMap<SaasAppId, UsageSignals>,
    sync_runs: Vec<SyncRun>,
    failing_updates: HashSet<SaasAppId>,
    stored_bound_kinds: HashMap<SaasAppId, String>,
    stalled_updates: bool,
    posture_writes: usize,
}

/// In-memory implementation of [`DiscoveryRepository`] and [`BindingStore`].
///
/// Apps and bindings share one lock so conditional binding writes are atomic.
#[derive(Debug, Default)]
pub struct InMemoryDiscoveryStore {
    state: RwLock<State>,
}

impl InMemoryDiscoveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert an app directly (for testing).
    pub fn insert_app(&self, app: SaasApp) {
        let mut state = self.write();
        state.apps_by_key.insert(app.canonical_key.clone(), app.id);
        state.apps.insert(app.id, app);
    }

    /// Set usage evidence for an app (for testing).
    pub fn set_usage_signals(&self, app_id: SaasAppId, signals: UsageSignals) {
        self.write().signals.insert(app_id, signals);
    }

    /// Record a sync run outcome (for testing).
    pub fn record_sync_run(&self, run: SyncRun) {
        self.write().sync_runs.push(run);
    }

    /// Record a successful sync run that finished at `finished_at` (for testing).
    pub fn record_successful_sync(&self, source: SourceKey, finished_at: DateTime<Utc>) {
        self.record_sync_run(SyncRun {
            source,
            status: SyncRunStatus::Success,
            error_kind: None,
            started_at: finished_at - chrono::Duration::seconds(30),
            finished_at: Some(finished_at),
        });
    }

    /// Make posture updates for an app fail with a repository error (for testing).
    pub fn fail_posture_updates_for(&self, app_id: SaasAppId) {
        self.write().failing_updates.insert(app_id);
    }

    /// Make every posture update hang until the caller gives up (for testing).
    pub fn stall_posture_updates(&self) {
        self.write().stalled_updates = true;
    }

    /// Report `connector_kind` as the stored kind of an app's primary binding,
    /// as a row written by a newer catalog would (for testing).
    pub fn set_stored_bound_kind(&self, app_id: SaasAppId, connector_kind: &str) {
        self.write()
            .stored_bound_kinds
            .insert(app_id, connector_kind.to_string());
    }

    /// Number of successful posture writes (for testing).
    pub fn posture_write_count(&self) -> usize {
        self.read().posture_writes
    }
}

fn new_app(id: SaasAppId, canonical_key: &str, sighting: &AppSighting) -> SaasApp {
    SaasApp {
        id,
        canonical_key: canonical_key.to_string(),
        display_name: sighting.display_name.clone(),
        primary_domain: Some(canonical_key.to_string()),
        vendor_name: sighting.vendor_name.clone(),
        first_seen_at: sighting.seen_at,
        last_seen_at: sighting.seen_at,
        managed_state: ManagedState::Unmanaged,
        managed_reason: String::new(),
        bound_source: None,
        risk_score: 0,
        risk_level: RiskLevel::Low,
        suggested_criticality: None,
        suggested_classification: None,
    }
}

#[async_trait]
impl DiscoveryRepository for InMemoryDiscoveryStore {
    async fn list_posture_inputs(&self) -> Result<Vec<PostureInputRow>> {
        let state = self.read();
        let mut apps: Vec<&SaasApp> = state.apps.values().collect();
        apps.sort_by(|a, b| a.canonical_key.cmp(&b.canonical_key));

        Ok(apps
            .into_iter()
            .map(|app| {
                let primary = state
                    .bindings
                    .values()
                    .find(|b| b.app_id == app.id && b.is_primary);
                let governance = state.overrides.get(&app.id);
                PostureInputRow {
                    app_id: app.id,
                    display_name: app.display_name.clone(),
                    bound_connector_kind: primary.map(|b| {
                        state
                            .stored_bound_kinds
                            .get(&app.id)
                            .cloned()
                            .unwrap_or_else(|| b.source.connector_kind.as_str().to_string())
                    }),
                    bound_source_name: primary.map(|b| b.source.source_name.clone()),
                    signals: state.signals.get(&app.id).copied().unwrap_or_default(),
                    owner_id: governance.and_then(|g| g.owner_id),
                    override_criticality: governance.and_then(|g| g.business_criticality),
                    override_classification: governance.and_then(|g| g.data_classification),
                }
            })
            .collect())
    }

    async fn latest_successful_sync(
        &self,
        sources: &[SourceKey],
    ) -> Result<HashMap<SourceKey, DateTime<Utc>>> {
        let state = self.read();
        let mut latest: HashMap<SourceKey, DateTime<Utc>> = HashMap::new();
        for run in state
            .sync_runs
            .iter()
            .filter(|r| r.status == SyncRunStatus::Success && sources.contains(&r.source))
        {
            if let Some(finished_at) = run.finished_at {
                latest
                    .entry(run.source.clone())
                    .and_modify(|at| *at = (*at).max(finished_at))
                    .or_insert(finished_at);
            }
        }
        Ok(latest)
    }

    async fn update_posture(&self, update: &PostureUpdate) -> Result<()> {
        let stalled = self.read().stalled_updates;
        if stalled {
            std::future::pending::<()>().await;
        }
        let mut state = self.write();
        if state.failing_updates.contains(&update.app_id) {
            return Err(DiscoveryError::Repository(format!(
                "update of app {} rejected",
                update.app_id
            )));
        }
        let app = state
            .apps
            .get_mut(&update.app_id)
            .ok_or(DiscoveryError::AppNotFound(update.app_id))?;
        app.managed_state = update.managed_state;
        app.managed_reason = update.managed_reason.clone();
        app.bound_source = update.bound_source.clone();
        app.risk_score = update.risk_score;
        app.risk_level = update.risk_level;
        app.suggested_criticality = Some(update.suggested_criticality);
        app.suggested_classification = Some(update.suggested_classification);
        state.posture_writes += 1;
        Ok(())
    }

    async fn sync_run_rollup(
        &self,
        sources: &[SourceKey],
        since: DateTime<Utc>,
    ) -> Result<Vec<SyncRunRollup>> {
        let state = self.read();
        Ok(sources
            .iter()
            .map(|source| SyncRunRollup::from_runs(source.clone(), &state.sync_runs, since))
            .collect())
    }

    async fn get_app(&self, app_id: SaasAppId) -> Result<Option<SaasApp>> {
        Ok(self.read().apps.get(&app_id).cloned())
    }

    async fn list_apps(&self) -> Result<Vec<SaasApp>> {
        let mut apps: Vec<SaasApp> = self.read().apps.values().cloned().collect();
        apps.sort_by(|a, b| a.canonical_key.cmp(&b.canonical_key));
        Ok(apps)
    }

    async fn upsert_app(&self, canonical_key: &str, sighting: &AppSighting) -> Result<SaasApp> {
        let mut state = self.write();
        let existing = state.apps_by_key.get(canonical_key).copied();
        let id = match existing {
            Some(id) => id,
            None => {
                let id = SaasAppId::new();
                state.apps_by_key.insert(canonical_key.to_string(), id);
                state.apps.insert(id, new_app(id, canonical_key, sighting));
                id
            }
        };
        let app = state
            .apps
            .get_mut(&id)
            .ok_or(DiscoveryError::AppNotFound(id))?;
        app.last_seen_at = app.last_seen_at.max(sighting.seen_at);
        app.first_seen_at = app.first_seen_at.min(sighting.seen_at);
        if app.vendor_name.is_none() {
            app.vendor_name = sighting.vendor_name.clone();
        }
        Ok(app.clone())
    }

    async fn upsert_governance_override(&self, input: &GovernanceOverride) -> Result<()> {
        let mut state = self.write();
        if !state.apps.contains_key(&input.app_id) {
            return Err(DiscoveryError::AppNotFound(input.app_id));
        }
        state.overrides.insert(input.app_id, input.clone());
        Ok(())
    }

    async fn get_governance_override(
        &self,
        app_id: SaasAppId,
    ) -> Result<Option<GovernanceOverride>> {
        Ok(self.read().overrides.get(&app_id).cloned())
    }
}

/// Conditional binding write; the caller holds the write lock.
fn upsert_locked(state: &mut State, input: &UpsertBinding) -> Result<UpsertOutcome> {
    if !state.apps.contains_key(&input.app_id) {
        return Err(DiscoveryError::AppNotFound(input.app_id));
    }
    let now = Utc::now();
    let key = (input.app_id, input.source.clone());

    if let Some(existing) = state.bindings.get_mut(&key) {
        if existing.origin == BindingOrigin::Manual && input.origin == BindingOrigin::Auto {
            return Ok(UpsertOutcome::SkippedManual);
        }
        existing.origin = input.origin;
        existing.confidence = input.confidence;
        existing.is_primary = input.is_primary;
        existing.created_by = input.created_by.or(existing.created_by);
        existing.updated_at = now;
        return Ok(UpsertOutcome::Updated);
    }

    state.bindings.insert(
        key,
        SaasAppBinding {
            id: BindingId::new(),
            app_id: input.app_id,
            source: input.source.clone(),
            origin: input.origin,
            confidence: input.confidence,
            is_primary: input.is_primary,
            created_by: input.created_by,
            created_at: now,
            updated_at: now,
        },
    );
    Ok(UpsertOutcome::Inserted)
}

#[async_trait]
impl BindingStore for InMemoryDiscoveryStore {
    async fn upsert_binding(&self, input: &UpsertBinding) -> Result<UpsertOutcome> {
        upsert_locked(&mut self.write(), input)
    }

    async fn pin_manual_binding(&self, input: &UpsertBinding) -> Result<UpsertOutcome> {
        let mut state = self.write();
        state.bindings.retain(|_, b| {
            !(b.app_id == input.app_id
                && b.origin == BindingOrigin::Manual
                && b.source != input.source)
        });
        upsert_locked(&mut state, input)
    }

    async fn list_bindings(&self, app_id: SaasAppId) -> Result<Vec<SaasAppBinding>> {
        let mut bindings: Vec<SaasAppBinding> = self
            .read()
            .bindings
            .values()
            .filter(|b| b.app_id == app_id)
            .cloned()
            .collect();
        bindings.sort_by(|a, b| a.source.cmp(&b.source));
        Ok(bindings)
    }

    async fn set_primary(&self, app_id: SaasAppId, primary: Option<&SourceKey>) -> Result<()> {
        let mut state = self.write();
        for binding in state.bindings.values_mut().filter(|b| b.app_id == app_id) {
            binding.is_primary = primary == Some(&binding.source);
        }
        Ok(())
    }

    async fn recompute_primary(&self, app_id: SaasAppId) -> Result<Option<SaasAppBinding>> {
        let mut state = self.write();
        let candidates: Vec<SaasAppBinding> = state
            .bindings
            .values()
            .filter(|b| b.app_id == app_id)
            .cloned()
            .collect();
        let selected = select_primary(&candidates).map(|b| b.source.clone());

        let mut primary = None;
        for binding in state.bindings.values_mut().filter(|b| b.app_id == app_id) {
            binding.is_primary = selected.as_ref() == Some(&binding.source);
            if binding.is_primary {
                primary = Some(binding.clone());
            }
        }
        Ok(primary)
    }

    async fn clear_manual_bindings(&self, app_id: SaasAppId) -> Result<u64> {
        let mut state = self.write();
        let before = state.bindings.len();
        state
            .bindings
            .retain(|_, b| !(b.app_id == app_id && b.origin == BindingOrigin::Manual));
        let removed = (before - state.bindings.len()) as u64;

        if removed > 0 {
            for binding in state.bindings.values_mut().filter(|b| b.app_id == app_id) {
                binding.is_primary = false;
            }
        }
        Ok(removed)
    }
}
