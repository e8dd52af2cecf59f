//! Reconciliation driver: one full recompute of posture and risk.
//!
//! A pass loads connector runtime state and every app's posture inputs,
//! batch-fetches freshness for the bound sources, classifies and scores each
//! app, persists the result per app, and finally publishes aggregate gauges.
//! Writes are idempotent per app, so overlapping passes converge. A cancelled
//! pass publishes nothing.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{DiscoveryConfig, FailurePolicy};
use crate::connector::{ConnectorRegistry, ConnectorRuntimeState};
use crate::error::{DiscoveryError, Result};
use crate::guard::guarded;
use crate::metrics::{labels, DiscoveryGauge, GaugeLabels, GaugePublisher};
use crate::posture::{classify_managed_state, PostureInput};
use crate::risk::{
    suggested_business_criticality, suggested_data_classification, RiskInput, RiskScorer,
};
use crate::store::DiscoveryRepository;
use crate::types::{ManagedState, PostureInputRow, PostureUpdate, RiskLevel, SaasAppId, SourceKey};

/// An app that could not be reconciled in a pass.
#[derive(Debug, Clone)]
pub struct AppFailure {
    pub app_id: SaasAppId,
    pub display_name: String,
    pub error: DiscoveryError,
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub apps_total: usize,
    pub apps_reconciled: usize,
    pub managed: usize,
    pub unmanaged: usize,
    /// Apps at `high` or `critical` risk.
    pub high_risk: usize,
    pub failures: Vec<AppFailure>,
    pub elapsed: StdDuration,
}

impl PassReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Connector runtime and freshness snapshot shared by every app in a pass.
struct PassSnapshot<'a> {
    runtimes: HashMap<SourceKey, &'a ConnectorRuntimeState>,
    last_success: HashMap<SourceKey, DateTime<Utc>>,
    now: DateTime<Utc>,
}

/// Orchestrates reconciliation passes.
pub struct ReconciliationDriver {
    registry: Arc<dyn ConnectorRegistry>,
    repository: Arc<dyn DiscoveryRepository>,
    gauges: Arc<GaugePublisher>,
    config: DiscoveryConfig,
    scorer: RiskScorer,
}

impl ReconciliationDriver {
    pub fn new(
        registry: Arc<dyn ConnectorRegistry>,
        repository: Arc<dyn DiscoveryRepository>,
        gauges: Arc<GaugePublisher>,
        config: DiscoveryConfig,
    ) -> Self {
        let scorer = config.risk_scorer();
        Self {
            registry,
            repository,
            gauges,
            config,
            scorer,
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Run one full pass.
    #[instrument(skip(self, cancel), fields(failure_policy = ?self.config.failure_policy))]
    pub async fn run_pass(&self, cancel: &CancellationToken) -> Result<PassReport> {
        let started = Instant::now();
        let timeout = self.config.repository_timeout();
        info!("Reconciliation pass started");

        let states = guarded(cancel, timeout, "load connector states", self.registry.load_states())
            .await
            .inspect_err(|e| error!(error = %e, "Failed to load connector states"))?;
        let rows = guarded(
            cancel,
            timeout,
            "list posture inputs",
            self.repository.list_posture_inputs(),
        )
        .await
        .inspect_err(|e| error!(error = %e, "Failed to load posture inputs"))?;

        let bound: Vec<Result<Option<SourceKey>>> =
            rows.iter().map(PostureInputRow::bound_source).collect();
        let sources: Vec<SourceKey> = bound
            .iter()
            .filter_map(|b| b.as_ref().ok().and_then(Clone::clone))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let last_success = if sources.is_empty() {
            HashMap::new()
        } else {
            guarded(
                cancel,
                timeout,
                "load latest successful syncs",
                self.repository.latest_successful_sync(&sources),
            )
            .await
            .inspect_err(|e| error!(error = %e, "Failed to load sync freshness"))?
        };

        let snapshot = PassSnapshot {
            runtimes: states.iter().map(|s| (s.source_key(), s)).collect(),
            last_success,
            now: Utc::now(),
        };

        let mut report = PassReport {
            apps_total: rows.len(),
            ..PassReport::default()
        };
        let mut updates: Vec<PostureUpdate> = Vec::with_capacity(rows.len());

        for (row, bound) in rows.iter().zip(bound) {
            let outcome = match bound {
                Ok(bound) => self.reconcile_app(row, bound, &snapshot, cancel).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(update) => {
                    report.apps_reconciled += 1;
                    match update.managed_state {
                        ManagedState::Managed => report.managed += 1,
                        ManagedState::Unmanaged => report.unmanaged += 1,
                    }
                    if update.risk_level.is_elevated() {
                        report.high_risk += 1;
                    }
                    updates.push(update);
                }
                Err(DiscoveryError::Cancelled) => {
                    warn!(reconciled = report.apps_reconciled, "Reconciliation pass cancelled");
                    return Err(DiscoveryError::Cancelled);
                }
                // Only record-scoped failures are isolated.
                Err(e)
                    if self.config.failure_policy == FailurePolicy::IsolatePerApp
                        && e.is_record_scoped() =>
                {
                    warn!(app_id = %row.app_id, error = %e, "Failed to reconcile app");
                    report.failures.push(AppFailure {
                        app_id: row.app_id,
                        display_name: row.display_name.clone(),
                        error: e,
                    });
                }
                Err(e) => {
                    error!(
                        app_id = %row.app_id,
                        error = %e,
                        transient = e.is_transient(),
                        "Reconciliation pass aborted"
                    );
                    return Err(e);
                }
            }
        }

        if cancel.is_cancelled() {
            warn!("Reconciliation pass cancelled before publishing metrics");
            return Err(DiscoveryError::Cancelled);
        }
        self.publish_gauges(&states, &updates);

        report.elapsed = started.elapsed();
        info!(
            apps_total = report.apps_total,
            apps_reconciled = report.apps_reconciled,
            managed = report.managed,
            unmanaged = report.unmanaged,
            high_risk = report.high_risk,
            failures = report.failures.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Reconciliation pass completed"
        );
        Ok(report)
    }

    async fn reconcile_app(
        &self,
        row: &PostureInputRow,
        bound: Option<SourceKey>,
        snapshot: &PassSnapshot<'_>,
        cancel: &CancellationToken,
    ) -> Result<PostureUpdate> {
        let runtime = bound
            .as_ref()
            .and_then(|key| snapshot.runtimes.get(key).copied());
        let freshness_window = self.config.freshness.window(
            runtime
                .map(ConnectorRuntimeState::effective_sync_interval)
                .unwrap_or_else(chrono::Duration::zero),
        );

        let posture = classify_managed_state(&PostureInput {
            has_primary_binding: bound.is_some(),
            connector_configured: runtime.is_some_and(|r| r.configured),
            connector_enabled: runtime.is_some_and(|r| r.enabled),
            last_successful_sync: bound
                .as_ref()
                .and_then(|key| snapshot.last_success.get(key).copied()),
            freshness_window,
            now: snapshot.now,
        });

        let signals = row.signals;
        let suggested_criticality =
            suggested_business_criticality(signals.actors_30d, signals.has_privileged_scope);
        let suggested_classification = suggested_data_classification(
            signals.has_privileged_scope,
            signals.has_confidential_scope,
        );

        let risk = self.scorer.score(&RiskInput {
            managed_state: posture.state,
            has_privileged_scope: signals.has_privileged_scope,
            has_confidential_scope: signals.has_confidential_scope,
            has_owner: row.owner_id.is_some(),
            actors_30d: signals.actors_30d,
            business_criticality: row.override_criticality.unwrap_or(suggested_criticality),
            data_classification: row
                .override_classification
                .unwrap_or(suggested_classification),
        });

        let update = PostureUpdate {
            app_id: row.app_id,
            managed_state: posture.state,
            managed_reason: posture.reason.as_str().to_string(),
            bound_source: bound,
            risk_score: risk.score,
            risk_level: risk.level,
            suggested_criticality,
            suggested_classification,
        };

        guarded(
            cancel,
            self.config.repository_timeout(),
            "update posture",
            self.repository.update_posture(&update),
        )
        .await?;

        debug!(
            app_id = %row.app_id,
            managed_state = %update.managed_state,
            reason = %posture.reason,
            risk_score = update.risk_score,
            risk_level = %update.risk_level,
            "App reconciled"
        );
        Ok(update)
    }

    /// Counts restricted to apps bound to a currently configured source.
    fn publish_gauges(&self, states: &[ConnectorRuntimeState], updates: &[PostureUpdate]) {
        let configured: BTreeSet<SourceKey> = states
            .iter()
            .filter(|s| s.configured)
            .map(ConnectorRuntimeState::source_key)
            .collect();

        let app_labels = |source: &SourceKey, state: ManagedState| -> GaugeLabels {
            labels([
                ("connector_kind", source.connector_kind.as_str()),
                ("source_name", source.source_name.as_str()),
                ("managed_state", state.as_str()),
            ])
        };
        let risk_labels = |source: &SourceKey, level: RiskLevel| -> GaugeLabels {
            labels([
                ("connector_kind", source.connector_kind.as_str()),
                ("source_name", source.source_name.as_str()),
                ("risk_level", level.as_str()),
            ])
        };

        let mut discovered: HashMap<GaugeLabels, i64> = HashMap::new();
        let mut high_risk: HashMap<GaugeLabels, i64> = HashMap::new();
        for source in &configured {
            for state in [ManagedState::Managed, ManagedState::Unmanaged] {
                discovered.insert(app_labels(source, state), 0);
            }
            for level in [RiskLevel::High, RiskLevel::Critical] {
                high_risk.insert(risk_labels(source, level), 0);
            }
        }

        for update in updates {
            let Some(source) = update.bound_source.as_ref().filter(|s| configured.contains(*s))
            else {
                continue;
            };
            *discovered
                .entry(app_labels(source, update.managed_state))
                .or_default() += 1;
            if update.risk_level.is_elevated() {
                *high_risk
                    .entry(risk_labels(source, update.risk_level))
                    .or_default() += 1;
            }
        }

        self.gauges.publish(DiscoveryGauge::DiscoveredApps, &discovered);
        self.gauges.publish(DiscoveryGauge::HighRiskApps, &high_risk);
    }
}
